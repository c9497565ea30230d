//! Chat Relay Transport Layer
//!
//! Provides the TCP transport for the chat relay.
//! The transport layer handles:
//! - Binding and the accept loop
//! - Connection limits
//! - Newline framing of each accepted stream
//! - Shutdown and draining of live connections
//!
//! The transport is decoupled from the chat logic via the `ConnectionHandler` trait.

pub mod client;
pub mod server;

pub use client::{ClientConnection, LineReader, LineWriter};
pub use server::{ConnectionHandler, TransportConfig, TransportError, TransportServer};
