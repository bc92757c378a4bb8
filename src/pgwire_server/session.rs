//! One accepted connection: drives the decode loop and feeds the sink.

use std::any::Any;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{NormalizeError, ProtocolError};
use crate::normalize::QueryNormalizer;
use crate::pgwire_server::codec::FrontendCodec;
use crate::pgwire_server::messages::{Frame, FrontendMessage};
use crate::sink::{query_preview, Sink, SinkEvent};

/// Identity assigned at accept time, rendered as `conn_<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Established,
    Active,
    /// Cancellation observed; the loop is exiting.
    Draining,
    Closed,
}

pub struct Session<S = TcpStream> {
    id: ConnectionId,
    peer: SocketAddr,
    frames: FramedRead<S, FrontendCodec>,
    normalizer: Arc<dyn QueryNormalizer>,
    sink: Arc<dyn Sink>,
    read_timeout: Duration,
    state: SessionState,
    frames_seen: u64,
}

impl<S: AsyncRead + Unpin> Session<S> {
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        stream: S,
        config: &ServerConfig,
        normalizer: Arc<dyn QueryNormalizer>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        let codec = FrontendCodec::new()
            .with_max_message_size(config.max_message_size)
            .with_frame_tracing(config.trace_frames);
        Self {
            id,
            peer,
            frames: FramedRead::new(stream, codec),
            normalizer,
            sink,
            read_timeout: config.read_timeout,
            state: SessionState::Established,
            frames_seen: 0,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Reads until end of stream, Terminate, a decode error or `cancel`. Read deadlines only
    /// re-check cancellation. The stream is dropped with the session.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), ProtocolError> {
        self.state = SessionState::Active;
        debug!(target: "pgwire", "conn_id={} peer={} session active", self.id, self.peer);

        let result = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = timeout(self.read_timeout, self.frames.next()) => Some(next),
            };
            let Some(next) = next else {
                self.state = SessionState::Draining;
                debug!(target: "pgwire", "conn_id={} shutdown requested, closing session", self.id);
                break Ok(());
            };
            match next {
                Err(_elapsed) => continue,
                Ok(None) => {
                    debug!(target: "pgwire", "conn_id={} client closed connection", self.id);
                    break Ok(());
                }
                Ok(Some(Err(e))) => {
                    warn!(target: "pgwire", conn_id = %self.id, error = %e, "closing session after read failure");
                    break Err(e);
                }
                Ok(Some(Ok(frame))) => {
                    let terminate = matches!(frame.message, FrontendMessage::Terminate);
                    self.frames_seen += 1;
                    self.dispatch(frame);
                    if terminate {
                        debug!(target: "pgwire", "conn_id={} terminate received", self.id);
                        break Ok(());
                    }
                }
            }
        };

        self.state = SessionState::Closed;
        info!(target: "pgwire", conn_id = %self.id, peer = %self.peer, frames = self.frames_seen, "session closed");
        result
    }

    fn dispatch(&self, frame: Frame) {
        let Frame { payload_len, message } = frame;
        let kind = message.kind();

        if let Some(sql) = message.sql() {
            self.record(SinkEvent::RawQuery { conn_id: self.id, text: sql.to_string() });
            match self.normalize(sql) {
                Ok(query) => self.record(SinkEvent::Normalized { conn_id: self.id, query }),
                Err(e) => warn!(
                    target: "pgwire",
                    conn_id = %self.id,
                    %kind,
                    error = %e,
                    query = %query_preview(sql),
                    "query normalization failed"
                ),
            }
            return;
        }

        let mut fields = message.fields();
        fields.insert("payload_length".into(), json!(payload_len));
        self.record(SinkEvent::Protocol { conn_id: self.id, kind, fields });
    }

    fn normalize(&self, sql: &str) -> Result<crate::normalize::NormalizedQuery, NormalizeError> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.normalizer.normalize(sql))) {
            Ok(res) => res,
            Err(payload) => Err(NormalizeError::SyntaxError(format!(
                "normalizer panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    fn record(&self, event: SinkEvent) {
        let label = event.label();
        match panic::catch_unwind(AssertUnwindSafe(|| self.sink.record(event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(target: "pgwire", conn_id = %self.id, event = label, error = %e, "sink rejected event"),
            Err(payload) => error!(
                target: "pgwire",
                "conn_id={} sink panicked while recording {}: {}",
                self.id,
                label,
                panic_message(payload.as_ref())
            ),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
