//! Chat Relay Server — name registry and per-connection sessions.
//!
//! The registry owns the name → outbound sink mapping shared by every
//! connection. Each accepted connection runs one `ConnectionSession`, which
//! negotiates a name, routes the client's lines through the registry and
//! tears its entry down when the client goes away.

pub mod registry;
pub mod server;
pub mod session;

pub use registry::{Delivery, OutboundSink, Registry};
pub use server::ChatServer;
pub use session::{ConnectionSession, SessionConfig, SessionState};
