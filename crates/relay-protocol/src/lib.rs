//! Chat Relay - Line Protocol
//!
//! Newline-delimited text protocol spoken between the relay and its clients.
//! This crate is the single source of truth for the server's fixed texts,
//! the classification of inbound lines, outbound message formatting and
//! the error kinds a session can run into.

pub mod directive;
pub mod error;
pub mod messages;

pub use directive::Directive;
pub use error::{ChatError, ChatResult};
pub use messages::{Messages, validate_name};
