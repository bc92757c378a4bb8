pub mod config;
pub mod error;
pub mod logging;
pub mod normalize;
pub mod pgwire_server;
pub mod sink;

pub use config::ServerConfig;
pub use error::{NormalizeError, ProtocolError, ServerError, SinkError};
pub use normalize::{normalize, Fingerprint, NormalizedQuery, QueryNormalizer, SqlNormalizer};
pub use pgwire_server::Server;
pub use sink::{ChannelSink, FanoutSink, Sink, SinkEvent, TracingSink};
