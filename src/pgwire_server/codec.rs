//! Frame decoder (and client-side encoder) for PostgreSQL frontend messages.
//!
//! The first frame on a connection has no tag: `int32 length` + `int32 code`. After an SSL, GSS
//! or cancel negotiation frame the client may send another startup frame or go straight to tagged
//! frames, so the decoder sniffs the first byte (always 0 for a startup length). Everything after
//! the StartupMessage is `tag` + `int32 length` + payload.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::DEFAULT_MAX_MESSAGE_SIZE;
use crate::error::{ProtocolError, ProtocolResult};
use crate::pgwire_server::messages::*;
use crate::pgwire_server::trace::trace_frame;

/// PostgreSQL refuses startup packets above this size.
pub const MAX_STARTUP_PACKET_LEN: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing decoded yet.
    Startup,
    /// A negotiation frame was seen; next frame may be startup or tagged.
    Negotiated,
    Regular,
}

pub struct FrontendCodec {
    phase: Phase,
    max_message_size: usize,
    trace_frames: bool,
}

impl FrontendCodec {
    pub fn new() -> Self {
        Self { phase: Phase::Startup, max_message_size: DEFAULT_MAX_MESSAGE_SIZE, trace_frames: false }
    }

    /// Codec that expects tagged frames from the first byte.
    pub fn regular() -> Self {
        Self { phase: Phase::Regular, ..Self::new() }
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    pub fn with_frame_tracing(mut self, enabled: bool) -> Self {
        self.trace_frames = enabled;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn decode_startup(&mut self, src: &mut BytesMut) -> ProtocolResult<Option<Frame>> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = i32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        if len < 8 {
            return Err(ProtocolError::InvalidLength { kind: "startup", len });
        }
        let len = len as usize;
        if len > MAX_STARTUP_PACKET_LEN {
            return Err(ProtocolError::FrameTooLarge { kind: "startup", len, max: MAX_STARTUP_PACKET_LEN });
        }
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(len).freeze();
        if self.trace_frames {
            trace_frame("startup", &frame, false);
        }
        let payload = frame.slice(4..);
        let payload_len = payload.len();
        let message = decode_startup_payload(payload)?;
        self.phase = match message {
            FrontendMessage::Startup(_) => Phase::Regular,
            _ => Phase::Negotiated,
        };
        Ok(Some(Frame { payload_len, message }))
    }

    fn decode_regular(&mut self, src: &mut BytesMut) -> ProtocolResult<Option<Frame>> {
        if src.len() < 5 {
            return Ok(None);
        }
        let tag = src[0];
        let len = i32::from_be_bytes([src[1], src[2], src[3], src[4]]);
        if len < 4 {
            return Err(ProtocolError::InvalidLength { kind: tag_kind(tag), len });
        }
        let len = len as usize;
        if len > self.max_message_size {
            return Err(ProtocolError::FrameTooLarge { kind: tag_kind(tag), len, max: self.max_message_size });
        }
        let total = 1 + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total).freeze();
        if self.trace_frames {
            trace_frame(tag_kind(tag), &frame, tag == b'p');
        }
        let payload = frame.slice(5..);
        let payload_len = payload.len();
        let message = decode_tagged_payload(tag, payload)?;
        Ok(Some(Frame { payload_len, message }))
    }
}

impl Default for FrontendCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrontendCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.phase {
            Phase::Startup => self.decode_startup(src),
            Phase::Negotiated => {
                if src.is_empty() {
                    return Ok(None);
                }
                if src[0] == 0 {
                    self.decode_startup(src)
                } else {
                    self.phase = Phase::Regular;
                    self.decode_regular(src)
                }
            }
            Phase::Regular => self.decode_regular(src),
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(ProtocolError::UnexpectedEof(buf.len())),
        }
    }
}

impl Encoder<FrontendMessage> for FrontendCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: FrontendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_message(&item, dst);
        Ok(())
    }
}

fn tag_kind(tag: u8) -> &'static str {
    match tag {
        b'Q' => "Query",
        b'P' => "Parse",
        b'B' => "Bind",
        b'E' => "Execute",
        b'D' => "Describe",
        b'C' => "Close",
        b'S' => "Sync",
        b'X' => "Terminate",
        b'H' => "Flush",
        b'p' => "PasswordMessage",
        _ => "Unknown",
    }
}

/// Bounds-checked cursor over one frame's payload.
struct PayloadReader {
    kind: &'static str,
    declared: usize,
    buf: Bytes,
}

impl PayloadReader {
    fn new(kind: &'static str, payload: Bytes) -> Self {
        Self { kind, declared: payload.len(), buf: payload }
    }

    fn need(&self, n: usize, field: &'static str) -> ProtocolResult<()> {
        if self.buf.remaining() < n {
            return Err(ProtocolError::Truncated { kind: self.kind, field });
        }
        Ok(())
    }

    fn u8(&mut self, field: &'static str) -> ProtocolResult<u8> {
        self.need(1, field)?;
        Ok(self.buf.get_u8())
    }

    fn i16(&mut self, field: &'static str) -> ProtocolResult<i16> {
        self.need(2, field)?;
        Ok(self.buf.get_i16())
    }

    fn i32(&mut self, field: &'static str) -> ProtocolResult<i32> {
        self.need(4, field)?;
        Ok(self.buf.get_i32())
    }

    /// int16 element count; negative counts are malformed.
    fn count(&mut self, field: &'static str) -> ProtocolResult<usize> {
        let n = self.i16(field)?;
        if n < 0 {
            return Err(ProtocolError::InvalidField { kind: self.kind, field, value: n as i64 });
        }
        Ok(n as usize)
    }

    fn bytes(&mut self, n: usize, field: &'static str) -> ProtocolResult<Bytes> {
        self.need(n, field)?;
        Ok(self.buf.split_to(n))
    }

    fn cstring(&mut self, field: &'static str) -> ProtocolResult<String> {
        let Some(nul) = self.buf.iter().position(|&b| b == 0) else {
            return Err(ProtocolError::Truncated { kind: self.kind, field });
        };
        let raw = self.buf.split_to(nul);
        self.buf.advance(1);
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8 { kind: self.kind, field })
    }

    fn rest(&mut self) -> Bytes {
        let n = self.buf.remaining();
        self.buf.split_to(n)
    }

    /// Every declared byte must have been consumed.
    fn finish(self) -> ProtocolResult<()> {
        if self.buf.has_remaining() {
            return Err(ProtocolError::LengthMismatch {
                kind: self.kind,
                declared: self.declared,
                consumed: self.declared - self.buf.remaining(),
            });
        }
        Ok(())
    }
}

fn decode_startup_payload(payload: Bytes) -> ProtocolResult<FrontendMessage> {
    let mut r = PayloadReader::new("startup", payload);
    let code = r.i32("request code")?;
    let message = match code {
        SSL_REQUEST_CODE => {
            r.kind = "SSLRequest";
            FrontendMessage::SslRequest
        }
        GSSENC_REQUEST_CODE => {
            r.kind = "GSSENCRequest";
            FrontendMessage::GssEncRequest
        }
        CANCEL_REQUEST_CODE => {
            r.kind = "CancelRequest";
            let process_id = r.i32("process id")?;
            let secret_key = r.i32("secret key")?;
            FrontendMessage::CancelRequest { process_id, secret_key }
        }
        code => {
            r.kind = "StartupMessage";
            let protocol_version = ProtocolVersion::from_code(code);
            if protocol_version.major != 3 {
                return Err(ProtocolError::UnsupportedProtocolVersion {
                    major: protocol_version.major,
                    minor: protocol_version.minor,
                });
            }
            let mut parameters = BTreeMap::new();
            loop {
                let key = r.cstring("parameter name")?;
                if key.is_empty() {
                    break;
                }
                let value = r.cstring("parameter value")?;
                parameters.insert(key, value);
            }
            FrontendMessage::Startup(StartupMessage { protocol_version, parameters })
        }
    };
    r.finish()?;
    Ok(message)
}

fn decode_tagged_payload(tag: u8, payload: Bytes) -> ProtocolResult<FrontendMessage> {
    let mut r = PayloadReader::new(tag_kind(tag), payload);
    let message = match tag {
        b'Q' => FrontendMessage::Query { sql: r.cstring("query string")? },
        b'P' => {
            let statement = r.cstring("statement name")?;
            let sql = r.cstring("query string")?;
            let n = r.count("parameter type count")?;
            let mut param_types = Vec::with_capacity(n);
            for _ in 0..n {
                param_types.push(r.i32("parameter type")? as u32);
            }
            FrontendMessage::Parse(ParseMessage { statement, sql, param_types })
        }
        b'B' => {
            let portal = r.cstring("portal name")?;
            let statement = r.cstring("statement name")?;
            let n = r.count("parameter format count")?;
            let mut param_formats = Vec::with_capacity(n);
            for _ in 0..n {
                param_formats.push(r.i16("parameter format")?);
            }
            let n = r.count("parameter count")?;
            let mut params = Vec::with_capacity(n);
            for _ in 0..n {
                let len = r.i32("parameter length")?;
                match len {
                    -1 => params.push(None),
                    len if len < -1 => {
                        return Err(ProtocolError::InvalidField { kind: "Bind", field: "parameter length", value: len as i64 })
                    }
                    len => params.push(Some(r.bytes(len as usize, "parameter value")?)),
                }
            }
            let n = r.count("result format count")?;
            let mut result_formats = Vec::with_capacity(n);
            for _ in 0..n {
                result_formats.push(r.i16("result format")?);
            }
            FrontendMessage::Bind(BindMessage { portal, statement, param_formats, params, result_formats })
        }
        b'E' => {
            let portal = r.cstring("portal name")?;
            let max_rows = r.i32("max rows")?;
            FrontendMessage::Execute(ExecuteMessage { portal, max_rows })
        }
        b'D' | b'C' => {
            let b = r.u8("object type")?;
            let Some(target) = Target::from_byte(b) else {
                return Err(ProtocolError::InvalidField { kind: r.kind, field: "object type", value: b as i64 });
            };
            let name = r.cstring("object name")?;
            let body = TargetMessage { target, name };
            if tag == b'D' { FrontendMessage::Describe(body) } else { FrontendMessage::Close(body) }
        }
        b'S' => FrontendMessage::Sync,
        b'X' => FrontendMessage::Terminate,
        b'H' => FrontendMessage::Flush,
        b'p' => FrontendMessage::Password(Password(r.rest())),
        tag => FrontendMessage::Unknown { tag, payload: r.rest() },
    };
    r.finish()?;
    Ok(message)
}

pub fn put_cstring(dst: &mut BytesMut, s: &str) {
    dst.put_slice(s.as_bytes());
    dst.put_u8(0);
}

fn frame_tag(msg: &FrontendMessage) -> Option<u8> {
    let tag = match msg {
        FrontendMessage::Query { .. } => b'Q',
        FrontendMessage::Parse(_) => b'P',
        FrontendMessage::Bind(_) => b'B',
        FrontendMessage::Execute(_) => b'E',
        FrontendMessage::Describe(_) => b'D',
        FrontendMessage::Close(_) => b'C',
        FrontendMessage::Sync => b'S',
        FrontendMessage::Terminate => b'X',
        FrontendMessage::Flush => b'H',
        FrontendMessage::Password(_) => b'p',
        FrontendMessage::Unknown { tag, .. } => *tag,
        FrontendMessage::SslRequest
        | FrontendMessage::GssEncRequest
        | FrontendMessage::CancelRequest { .. }
        | FrontendMessage::Startup(_) => return None,
    };
    Some(tag)
}

/// Writes `msg` in wire format, as a client would send it.
pub fn encode_message(msg: &FrontendMessage, dst: &mut BytesMut) {
    if let Some(tag) = frame_tag(msg) {
        dst.put_u8(tag);
        let start = dst.len();
        dst.put_i32(0);
        encode_tagged_body(msg, dst);
        patch_len(dst, start);
        return;
    }
    match msg {
        FrontendMessage::SslRequest => {
            dst.put_i32(8);
            dst.put_i32(SSL_REQUEST_CODE);
        }
        FrontendMessage::GssEncRequest => {
            dst.put_i32(8);
            dst.put_i32(GSSENC_REQUEST_CODE);
        }
        FrontendMessage::CancelRequest { process_id, secret_key } => {
            dst.put_i32(16);
            dst.put_i32(CANCEL_REQUEST_CODE);
            dst.put_i32(*process_id);
            dst.put_i32(*secret_key);
        }
        FrontendMessage::Startup(s) => {
            let start = dst.len();
            dst.put_i32(0);
            dst.put_i32(s.protocol_version.code());
            for (k, v) in &s.parameters {
                put_cstring(dst, k);
                put_cstring(dst, v);
            }
            dst.put_u8(0);
            patch_len(dst, start);
        }
        _ => {}
    }
}

fn encode_tagged_body(msg: &FrontendMessage, dst: &mut BytesMut) {
    match msg {
        FrontendMessage::Query { sql } => put_cstring(dst, sql),
        FrontendMessage::Parse(p) => {
            put_cstring(dst, &p.statement);
            put_cstring(dst, &p.sql);
            dst.put_i16(p.param_types.len() as i16);
            for oid in &p.param_types {
                dst.put_u32(*oid);
            }
        }
        FrontendMessage::Bind(b) => {
            put_cstring(dst, &b.portal);
            put_cstring(dst, &b.statement);
            dst.put_i16(b.param_formats.len() as i16);
            for f in &b.param_formats {
                dst.put_i16(*f);
            }
            dst.put_i16(b.params.len() as i16);
            for p in &b.params {
                match p {
                    None => dst.put_i32(-1),
                    Some(v) => {
                        dst.put_i32(v.len() as i32);
                        dst.put_slice(v);
                    }
                }
            }
            dst.put_i16(b.result_formats.len() as i16);
            for f in &b.result_formats {
                dst.put_i16(*f);
            }
        }
        FrontendMessage::Execute(e) => {
            put_cstring(dst, &e.portal);
            dst.put_i32(e.max_rows);
        }
        FrontendMessage::Describe(t) | FrontendMessage::Close(t) => {
            dst.put_u8(t.target.as_byte());
            put_cstring(dst, &t.name);
        }
        FrontendMessage::Password(p) => dst.put_slice(&p.0),
        FrontendMessage::Unknown { payload, .. } => dst.put_slice(payload),
        _ => {}
    }
}

/// Back-fills the int32 length that starts at `start` (length counts itself).
fn patch_len(dst: &mut BytesMut, start: usize) {
    let len = (dst.len() - start) as i32;
    dst[start..start + 4].copy_from_slice(&len.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(msgs: &[FrontendMessage]) -> BytesMut {
        let mut buf = BytesMut::new();
        for m in msgs {
            encode_message(m, &mut buf);
        }
        buf
    }

    fn startup(user: &str) -> FrontendMessage {
        let mut parameters = BTreeMap::new();
        parameters.insert("user".to_string(), user.to_string());
        parameters.insert("database".to_string(), "app".to_string());
        FrontendMessage::Startup(StartupMessage { protocol_version: ProtocolVersion::V3_0, parameters })
    }

    fn decode_all(codec: &mut FrontendCodec, buf: &mut BytesMut) -> Vec<Frame> {
        let mut out = Vec::new();
        while let Some(frame) = codec.decode(buf).expect("decode") {
            out.push(frame);
        }
        out
    }

    #[test]
    fn startup_then_simple_query() {
        let mut buf = encoded(&[startup("alice"), FrontendMessage::Query { sql: "SELECT 1".into() }]);
        let mut codec = FrontendCodec::new();
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].message, startup("alice"));
        assert_eq!(frames[1].message, FrontendMessage::Query { sql: "SELECT 1".into() });
        // "SELECT 1\0"
        assert_eq!(frames[1].payload_len, 9);
        assert_eq!(codec.phase(), Phase::Regular);
        assert!(buf.is_empty());
    }

    #[test]
    fn ssl_request_then_startup() {
        let mut buf = encoded(&[FrontendMessage::SslRequest, startup("bob")]);
        let mut codec = FrontendCodec::new();
        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.message, FrontendMessage::SslRequest);
        assert_eq!(first.payload_len, 4);
        assert_eq!(codec.phase(), Phase::Negotiated);
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.message, startup("bob"));
        assert_eq!(codec.phase(), Phase::Regular);
    }

    #[test]
    fn negotiated_phase_accepts_tagged_frames() {
        let mut buf = encoded(&[FrontendMessage::GssEncRequest, FrontendMessage::Sync]);
        let mut codec = FrontendCodec::new();
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames[0].message, FrontendMessage::GssEncRequest);
        assert_eq!(frames[1].message, FrontendMessage::Sync);
        assert_eq!(codec.phase(), Phase::Regular);
    }

    #[test]
    fn cancel_request() {
        let mut buf = encoded(&[FrontendMessage::CancelRequest { process_id: 7, secret_key: 99 }]);
        let frame = FrontendCodec::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.message, FrontendMessage::CancelRequest { process_id: 7, secret_key: 99 });
        assert_eq!(frame.payload_len, 12);
    }

    #[test]
    fn extended_protocol_messages() {
        let msgs = vec![
            FrontendMessage::Parse(ParseMessage { statement: "s1".into(), sql: "SELECT $1::int".into(), param_types: vec![23] }),
            FrontendMessage::Bind(BindMessage {
                portal: "".into(),
                statement: "s1".into(),
                param_formats: vec![0],
                params: vec![Some(Bytes::from_static(b"42")), None],
                result_formats: vec![1],
            }),
            FrontendMessage::Describe(TargetMessage { target: Target::Portal, name: "".into() }),
            FrontendMessage::Execute(ExecuteMessage { portal: "".into(), max_rows: 0 }),
            FrontendMessage::Close(TargetMessage { target: Target::Statement, name: "s1".into() }),
            FrontendMessage::Flush,
            FrontendMessage::Sync,
            FrontendMessage::Password(Password(Bytes::from_static(b"secret\0"))),
            FrontendMessage::Terminate,
        ];
        let mut buf = encoded(&msgs);
        let mut codec = FrontendCodec::regular();
        let decoded: Vec<_> = decode_all(&mut codec, &mut buf).into_iter().map(|f| f.message).collect();
        assert_eq!(decoded, msgs);
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let full = encoded(&[FrontendMessage::Query { sql: "SELECT 42".into() }]);
        let mut codec = FrontendCodec::regular();
        let mut buf = BytesMut::from(&full[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[3..full.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&full[full.len() - 1..]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.message.sql(), Some("SELECT 42"));
    }

    #[test]
    fn unknown_tag_is_opaque() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'd');
        buf.put_i32(4 + 3);
        buf.put_slice(b"abc");
        let frame = FrontendCodec::regular().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.message, FrontendMessage::Unknown { tag: b'd', payload: Bytes::from_static(b"abc") });
        assert_eq!(frame.payload_len, 3);
    }

    #[test]
    fn declared_length_longer_than_fields() {
        // Execute declares 4 extra bytes after max_rows.
        let mut buf = BytesMut::new();
        buf.put_u8(b'E');
        buf.put_i32(4 + 1 + 4 + 4);
        buf.put_u8(0);
        buf.put_i32(0);
        buf.put_i32(0);
        let err = FrontendCodec::regular().decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::LengthMismatch { kind: "Execute", declared: 9, consumed: 5 }), "{err:?}");
    }

    #[test]
    fn missing_terminator_is_truncated() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'Q');
        buf.put_i32(4 + 8);
        buf.put_slice(b"SELECT 1");
        let err = FrontendCodec::regular().decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { kind: "Query", .. }), "{err:?}");
    }

    #[test]
    fn invalid_lengths() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'Q');
        buf.put_i32(3);
        assert!(matches!(
            FrontendCodec::regular().decode(&mut buf),
            Err(ProtocolError::InvalidLength { len: 3, .. })
        ));

        let mut buf = BytesMut::new();
        buf.put_i32(4);
        buf.put_i32(0);
        assert!(matches!(
            FrontendCodec::new().decode(&mut buf),
            Err(ProtocolError::InvalidLength { kind: "startup", len: 4 })
        ));
    }

    #[test]
    fn oversized_frames_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'Q');
        buf.put_i32(1025);
        let err = FrontendCodec::regular().with_max_message_size(1024).decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { len: 1025, max: 1024, .. }), "{err:?}");

        let mut buf = BytesMut::new();
        buf.put_i32(20_000);
        let err = FrontendCodec::new().decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { kind: "startup", .. }), "{err:?}");
    }

    #[test]
    fn protocol_v2_rejected() {
        let mut buf = BytesMut::new();
        buf.put_i32(9);
        buf.put_i32(2 << 16);
        buf.put_u8(0);
        let err = FrontendCodec::new().decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedProtocolVersion { major: 2, minor: 0 }), "{err:?}");
    }

    #[test]
    fn bad_describe_target() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'D');
        buf.put_i32(4 + 2);
        buf.put_u8(b'Z');
        buf.put_u8(0);
        let err = FrontendCodec::regular().decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "object type", value: 90, .. }), "{err:?}");
    }

    #[test]
    fn query_with_invalid_utf8() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'Q');
        buf.put_i32(4 + 3);
        buf.put_slice(&[0xff, 0xfe, 0]);
        let err = FrontendCodec::regular().decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidUtf8 { kind: "Query", .. }), "{err:?}");
    }

    #[test]
    fn parse_negative_parameter_count() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'P');
        let start = buf.len();
        buf.put_i32(0);
        put_cstring(&mut buf, "s1");
        put_cstring(&mut buf, "SELECT $1");
        buf.put_i16(-1);
        patch_len(&mut buf, start);
        let err = FrontendCodec::regular().decode(&mut buf).unwrap_err();
        assert!(
            matches!(err, ProtocolError::InvalidField { kind: "Parse", field: "parameter type count", value: -1 }),
            "{err:?}"
        );
    }

    #[test]
    fn bind_negative_parameter_length() {
        let mut buf = BytesMut::new();
        buf.put_u8(b'B');
        let start = buf.len();
        buf.put_i32(0);
        put_cstring(&mut buf, "");
        put_cstring(&mut buf, "");
        buf.put_i16(0);
        buf.put_i16(1);
        buf.put_i32(-2);
        buf.put_i16(0);
        patch_len(&mut buf, start);
        let err = FrontendCodec::regular().decode(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { kind: "Bind", value: -2, .. }), "{err:?}");
    }

    #[test]
    fn eof_mid_frame() {
        let full = encoded(&[FrontendMessage::Query { sql: "SELECT 1".into() }]);
        let mut buf = BytesMut::from(&full[..6]);
        let err = FrontendCodec::regular().decode_eof(&mut buf).unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedEof(6)), "{err:?}");

        let mut empty = BytesMut::new();
        assert!(FrontendCodec::regular().decode_eof(&mut empty).unwrap().is_none());
    }

    #[test]
    fn encoder_matches_wire_layout() {
        let mut codec = FrontendCodec::regular();
        let mut buf = BytesMut::new();
        codec.encode(FrontendMessage::Query { sql: "SELECT 1".into() }, &mut buf).unwrap();
        assert_eq!(&buf[..], b"Q\x00\x00\x00\x0dSELECT 1\x00");

        let mut buf = BytesMut::new();
        codec.encode(FrontendMessage::SslRequest, &mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f]);
    }
}
