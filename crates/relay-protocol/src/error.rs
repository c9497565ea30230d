//! Error kinds a chat session can run into.
//!
//! None of these are fatal to the server: each is handled inside the session
//! that hit it. The user-visible kinds map to an inline protocol line via
//! [`ChatError::reply`].

use crate::messages::Messages;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Candidate name was empty.
    #[error("display name is empty")]
    InvalidName,

    /// Candidate name is held by another live session.
    #[error("display name {0:?} is already taken")]
    NameTaken(String),

    /// Private message target is not registered.
    #[error("user {0:?} is not available")]
    TargetUnavailable(String),

    /// `@` line without a space between target and text.
    #[error("private message without a separating space")]
    MalformedPrivate,

    /// The client sent a line longer than the configured limit.
    #[error("line exceeds maximum length")]
    LineTooLong,

    /// Read or write failure on the session's own transport.
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    /// A line could not be queued for a client whose session is going away.
    #[error("outbound queue for {0:?} is closed")]
    SinkClosed(String),

    /// This client fell too far behind on its outbound queue and was
    /// dropped from the registry.
    #[error("outbound queue full, client is not keeping up")]
    SlowConsumer,
}

impl ChatError {
    /// The line sent back to the client for this failure, if any.
    pub fn reply(&self) -> Option<String> {
        match self {
            Self::InvalidName | Self::NameTaken(_) => Some(Messages::NAME_REJECTED.to_string()),
            Self::TargetUnavailable(target) => Some(Messages::unavailable(target)),
            Self::MalformedPrivate => Some(Messages::INVALID_PRIVATE_FORMAT.to_string()),
            Self::LineTooLong => Some(Messages::LINE_TOO_LONG.to_string()),
            Self::Transport(_) | Self::SinkClosed(_) | Self::SlowConsumer => None,
        }
    }

    /// Whether the session should end after this error.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            Self::InvalidName
                | Self::NameTaken(_)
                | Self::LineTooLong
                | Self::Transport(_)
                | Self::SlowConsumer
        )
    }
}
