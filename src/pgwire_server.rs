//! Passive PostgreSQL wire-protocol listener.
//!
//! Accepts client connections, decodes every frontend frame and forwards the embedded SQL (raw and
//! normalized) plus a structured event per protocol message to a [`Sink`](crate::sink::Sink). The
//! server never writes protocol responses back to the client.

pub mod codec;
pub mod messages;
pub mod server;
pub mod session;
pub mod trace;

pub use codec::{FrontendCodec, Phase};
pub use messages::{EventFields, Frame, FrontendMessage, MessageKind};
pub use server::Server;
pub use session::{ConnectionId, Session, SessionState};
