//! Destinations for decoded queries and protocol events.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::info;

use crate::error::SinkError;
use crate::normalize::NormalizedQuery;
use crate::pgwire_server::messages::{EventFields, MessageKind};
use crate::pgwire_server::session::ConnectionId;

/// Longest query text written to a log line.
pub const QUERY_LOG_MAX_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub enum SinkEvent {
    /// SQL exactly as the client sent it (Query or Parse).
    RawQuery { conn_id: ConnectionId, text: String },
    Normalized { conn_id: ConnectionId, query: NormalizedQuery },
    /// Any message without SQL.
    Protocol { conn_id: ConnectionId, kind: MessageKind, fields: EventFields },
}

impl SinkEvent {
    pub fn conn_id(&self) -> ConnectionId {
        match self {
            SinkEvent::RawQuery { conn_id, .. }
            | SinkEvent::Normalized { conn_id, .. }
            | SinkEvent::Protocol { conn_id, .. } => *conn_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SinkEvent::RawQuery { .. } => "raw_query",
            SinkEvent::Normalized { .. } => "normalized",
            SinkEvent::Protocol { .. } => "protocol",
        }
    }
}

/// Receives session events. Implementations must not block: they run on the session task.
pub trait Sink: Send + Sync {
    fn record(&self, event: SinkEvent) -> Result<(), SinkError>;
}

/// Single-line, trimmed query text capped at [`QUERY_LOG_MAX_CHARS`] characters.
pub fn query_preview(sql: &str) -> String {
    let flat: String = sql.chars().map(|c| if c == '\n' || c == '\r' { ' ' } else { c }).collect();
    let flat = flat.trim();
    if flat.chars().count() <= QUERY_LOG_MAX_CHARS {
        return flat.to_string();
    }
    let mut out: String = flat.chars().take(QUERY_LOG_MAX_CHARS).collect();
    out.push_str("...");
    out
}

/// Writes every event as a structured `info` line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl Sink for TracingSink {
    fn record(&self, event: SinkEvent) -> Result<(), SinkError> {
        match &event {
            SinkEvent::RawQuery { conn_id, text } => {
                info!(
                    target: "pgwire",
                    %conn_id,
                    query = %query_preview(text),
                    query_length = text.len(),
                    "query received"
                );
            }
            SinkEvent::Normalized { conn_id, query } => {
                info!(
                    target: "pgwire",
                    %conn_id,
                    fingerprint = %query.fingerprint,
                    normalized = %query_preview(&query.normalized),
                    "query normalized"
                );
            }
            SinkEvent::Protocol { conn_id, kind, fields } => {
                let fields = serde_json::Value::Object(fields.clone());
                info!(target: "pgwire", %conn_id, %kind, %fields, "protocol message");
            }
        }
        Ok(())
    }
}

/// Hands events to a downstream consumer over a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<SinkEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<SinkEvent>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving half of a channel holding `capacity` events.
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<SinkEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl Sink for ChannelSink {
    fn record(&self, event: SinkEvent) -> Result<(), SinkError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Backpressure,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Forwards each event to every inner sink. All sinks see the event even if an earlier one
/// fails; the first error is returned.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn Sink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Sink for FanoutSink {
    fn record(&self, event: SinkEvent) -> Result<(), SinkError> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.record(event.clone()) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<SinkEvent>>);

    impl Sink for Collect {
        fn record(&self, event: SinkEvent) -> Result<(), SinkError> {
            self.0.lock().push(event);
            Ok(())
        }
    }

    struct Failing;

    impl Sink for Failing {
        fn record(&self, _event: SinkEvent) -> Result<(), SinkError> {
            Err(SinkError::Other("disk full".into()))
        }
    }

    fn raw(n: u64, text: &str) -> SinkEvent {
        SinkEvent::RawQuery { conn_id: ConnectionId(n), text: text.into() }
    }

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(query_preview("  SELECT 1\nFROM t\r\n  "), "SELECT 1 FROM t");
        let long = "x".repeat(QUERY_LOG_MAX_CHARS + 20);
        let p = query_preview(&long);
        assert_eq!(p.len(), QUERY_LOG_MAX_CHARS + 3);
        assert!(p.ends_with("..."));
        let exact = "y".repeat(QUERY_LOG_MAX_CHARS);
        assert_eq!(query_preview(&exact), exact);
    }

    #[test]
    fn tracing_sink_accepts_everything() {
        let sink = TracingSink;
        sink.record(raw(1, "SELECT 1")).unwrap();
        let query = normalize("SELECT 1").unwrap();
        sink.record(SinkEvent::Normalized { conn_id: ConnectionId(1), query }).unwrap();
        sink.record(SinkEvent::Protocol { conn_id: ConnectionId(1), kind: MessageKind::Sync, fields: EventFields::new() })
            .unwrap();
    }

    #[tokio::test]
    async fn channel_sink_reports_backpressure_and_close() {
        let (sink, mut rx) = ChannelSink::bounded(1);
        sink.record(raw(1, "SELECT 1")).unwrap();
        assert!(matches!(sink.record(raw(1, "SELECT 2")), Err(SinkError::Backpressure)));

        let got = rx.recv().await.unwrap();
        assert!(matches!(got, SinkEvent::RawQuery { ref text, .. } if text == "SELECT 1"));
        drop(rx);
        assert!(matches!(sink.record(raw(1, "SELECT 3")), Err(SinkError::Closed)));
    }

    #[test]
    fn fanout_reaches_all_sinks() {
        let a = Arc::new(Collect::default());
        let b = Arc::new(Collect::default());
        let mut fanout = FanoutSink::new(vec![a.clone(), Arc::new(Failing)]);
        fanout.push(b.clone());
        assert_eq!(fanout.len(), 3);

        let err = fanout.record(raw(7, "SELECT 1")).unwrap_err();
        assert!(matches!(err, SinkError::Other(_)));
        assert_eq!(a.0.lock().len(), 1);
        assert_eq!(b.0.lock().len(), 1);
        assert_eq!(b.0.lock()[0].conn_id(), ConnectionId(7));
    }

    #[test]
    fn empty_fanout_is_ok() {
        let fanout = FanoutSink::default();
        assert!(fanout.is_empty());
        fanout.record(raw(1, "SELECT 1")).unwrap();
    }
}
