//! Frontend (client → server) message model.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde_json::{json, Map, Value};

pub const SSL_REQUEST_CODE: i32 = (1234 << 16) | 5679; // 80877103
pub const GSSENC_REQUEST_CODE: i32 = (1234 << 16) | 5680; // 80877104
pub const CANCEL_REQUEST_CODE: i32 = (1234 << 16) | 5678; // 80877102

/// Structured fields attached to protocol events.
pub type EventFields = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    SslRequest,
    GssEncRequest,
    CancelRequest,
    Startup,
    Query,
    Parse,
    Bind,
    Execute,
    Describe,
    Close,
    Sync,
    Terminate,
    Flush,
    Password,
    Unknown,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::SslRequest => "SSLRequest",
            MessageKind::GssEncRequest => "GSSENCRequest",
            MessageKind::CancelRequest => "CancelRequest",
            MessageKind::Startup => "StartupMessage",
            MessageKind::Query => "Query",
            MessageKind::Parse => "Parse",
            MessageKind::Bind => "Bind",
            MessageKind::Execute => "Execute",
            MessageKind::Describe => "Describe",
            MessageKind::Close => "Close",
            MessageKind::Sync => "Sync",
            MessageKind::Terminate => "Terminate",
            MessageKind::Flush => "Flush",
            MessageKind::Password => "PasswordMessage",
            MessageKind::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    pub const V3_0: ProtocolVersion = ProtocolVersion { major: 3, minor: 0 };

    pub fn from_code(code: i32) -> Self {
        let code = code as u32;
        Self { major: (code >> 16) as u16, minor: (code & 0xFFFF) as u16 }
    }

    pub fn code(&self) -> i32 {
        (((self.major as u32) << 16) | self.minor as u32) as i32
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupMessage {
    pub protocol_version: ProtocolVersion,
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMessage {
    pub statement: String,
    pub sql: String,
    pub param_types: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMessage {
    pub portal: String,
    pub statement: String,
    pub param_formats: Vec<i16>,
    /// `None` is SQL NULL.
    pub params: Vec<Option<Bytes>>,
    pub result_formats: Vec<i16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteMessage {
    pub portal: String,
    pub max_rows: i32,
}

/// Object addressed by Describe and Close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Statement,
    Portal,
}

impl Target {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'S' => Some(Target::Statement),
            b'P' => Some(Target::Portal),
            _ => None,
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            Target::Statement => b'S',
            Target::Portal => b'P',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetMessage {
    pub target: Target,
    pub name: String,
}

/// Opaque credential. `Debug` only reveals the length.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(pub Bytes);

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Password(<{} bytes redacted>)", self.0.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    SslRequest,
    GssEncRequest,
    CancelRequest { process_id: i32, secret_key: i32 },
    Startup(StartupMessage),
    Query { sql: String },
    Parse(ParseMessage),
    Bind(BindMessage),
    Execute(ExecuteMessage),
    Describe(TargetMessage),
    Close(TargetMessage),
    Sync,
    Terminate,
    Flush,
    Password(Password),
    /// Tag the decoder does not model; passed through untouched.
    Unknown { tag: u8, payload: Bytes },
}

impl FrontendMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            FrontendMessage::SslRequest => MessageKind::SslRequest,
            FrontendMessage::GssEncRequest => MessageKind::GssEncRequest,
            FrontendMessage::CancelRequest { .. } => MessageKind::CancelRequest,
            FrontendMessage::Startup(_) => MessageKind::Startup,
            FrontendMessage::Query { .. } => MessageKind::Query,
            FrontendMessage::Parse(_) => MessageKind::Parse,
            FrontendMessage::Bind(_) => MessageKind::Bind,
            FrontendMessage::Execute(_) => MessageKind::Execute,
            FrontendMessage::Describe(_) => MessageKind::Describe,
            FrontendMessage::Close(_) => MessageKind::Close,
            FrontendMessage::Sync => MessageKind::Sync,
            FrontendMessage::Terminate => MessageKind::Terminate,
            FrontendMessage::Flush => MessageKind::Flush,
            FrontendMessage::Password(_) => MessageKind::Password,
            FrontendMessage::Unknown { .. } => MessageKind::Unknown,
        }
    }

    /// SQL carried by Query and Parse.
    pub fn sql(&self) -> Option<&str> {
        match self {
            FrontendMessage::Query { sql } => Some(sql),
            FrontendMessage::Parse(p) => Some(&p.sql),
            _ => None,
        }
    }

    /// Decoded fields for protocol events. Credentials are reduced to their length and the cancel
    /// secret is left out.
    pub fn fields(&self) -> EventFields {
        let mut m = Map::new();
        match self {
            FrontendMessage::SslRequest
            | FrontendMessage::GssEncRequest
            | FrontendMessage::Sync
            | FrontendMessage::Terminate
            | FrontendMessage::Flush => {}
            FrontendMessage::CancelRequest { process_id, .. } => {
                m.insert("process_id".into(), json!(process_id));
            }
            FrontendMessage::Startup(s) => {
                m.insert("protocol_version".into(), json!(s.protocol_version.to_string()));
                for (k, v) in &s.parameters {
                    m.insert(k.clone(), json!(v));
                }
            }
            FrontendMessage::Query { sql } => {
                m.insert("sql".into(), json!(sql));
            }
            FrontendMessage::Parse(p) => {
                m.insert("name".into(), json!(p.statement));
                m.insert("query".into(), json!(p.sql));
                m.insert("parameter_oids".into(), json!(p.param_types));
            }
            FrontendMessage::Bind(b) => {
                m.insert("destination_portal".into(), json!(b.portal));
                m.insert("prepared_statement".into(), json!(b.statement));
                m.insert("parameter_count".into(), json!(b.params.len()));
                m.insert("result_format_count".into(), json!(b.result_formats.len()));
            }
            FrontendMessage::Execute(e) => {
                m.insert("portal".into(), json!(e.portal));
                m.insert("max_rows".into(), json!(e.max_rows));
            }
            FrontendMessage::Describe(t) | FrontendMessage::Close(t) => {
                m.insert("object_type".into(), json!((t.target.as_byte() as char).to_string()));
                m.insert("name".into(), json!(t.name));
            }
            FrontendMessage::Password(p) => {
                m.insert("password_length".into(), json!(p.0.len()));
            }
            FrontendMessage::Unknown { tag, payload } => {
                m.insert("tag".into(), json!(printable_tag(*tag)));
                m.insert("payload_length".into(), json!(payload.len()));
            }
        }
        m
    }
}

/// A decoded message plus the payload length its frame declared (length field minus 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload_len: usize,
    pub message: FrontendMessage,
}

pub(crate) fn printable_tag(tag: u8) -> String {
    if tag.is_ascii_graphic() { (tag as char).to_string() } else { format!("0x{:02x}", tag) }
}
