//! Domain-specific error types for the deck emulator.
//!
//! All fallible operations return `Result<T, DeckError>`.
//! Every error that surfaces on a command path maps to a protocol
//! status line via [`DeckError::status_line`]; a bad command never
//! terminates the connection or crashes the process.

use thiserror::Error;

use crate::protocol::status;

/// The canonical error type for the deck emulator.
#[derive(Debug, Error)]
pub enum DeckError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// The command text was malformed.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// The command name is not recognised.
    #[error("unsupported command")]
    Unsupported,

    /// A parameter name is not recognised.
    #[error("unsupported parameter: {0}")]
    UnsupportedParameter(String),

    /// A parameter value failed to parse as its expected type.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// A clip id, slot id, or speed was outside its valid range.
    #[error("out of range")]
    OutOfRange,

    // ── Deck Errors ──────────────────────────────────────────────
    /// The timeline has no clips.
    #[error("timeline empty")]
    TimelineEmpty,

    /// The referenced slot has no mounted disk.
    #[error("no disk in slot")]
    NoDisk,

    /// A slot directory could not be read.
    #[error("disk error: {0}")]
    Disk(String),

    /// Remote control is disabled on this deck.
    #[error("remote control disabled")]
    RemoteDisabled,

    /// A second client attempted to connect while a session was bound.
    #[error("connection rejected")]
    ConnectionRejected,

    // ── Collaborator Errors ──────────────────────────────────────
    /// The media engine reported a failure.
    #[error("engine error: {0}")]
    Engine(String),

    /// Two timecodes at different frame rates were combined.
    #[error("timecode rate mismatch: {0} vs {1}")]
    RateMismatch(u32, u32),

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// A channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// Catch-all for unexpected internal failures.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DeckError {
    /// The protocol status line a client sees for this error.
    pub fn status_line(&self) -> &'static str {
        match self {
            DeckError::Syntax(_) => status::ERR_SYNTAX,
            DeckError::Unsupported => status::ERR_UNSUPPORTED,
            DeckError::UnsupportedParameter(_) => status::ERR_UNSUPPORTED_PARAMETER,
            DeckError::InvalidValue(_) => status::ERR_INVALID_VALUE,
            DeckError::OutOfRange => status::ERR_OUT_OF_RANGE,
            DeckError::TimelineEmpty => status::ERR_TIMELINE_EMPTY,
            DeckError::NoDisk => status::ERR_NO_DISK,
            DeckError::Disk(_) => status::ERR_DISK_ERROR,
            DeckError::RemoteDisabled => status::ERR_REMOTE_DISABLED,
            DeckError::ConnectionRejected => status::ERR_CONNECTION_REJECTED,
            DeckError::Engine(_)
            | DeckError::RateMismatch(_, _)
            | DeckError::Io(_)
            | DeckError::ChannelClosed
            | DeckError::Internal(_) => status::ERR_INTERNAL,
        }
    }
}

impl From<String> for DeckError {
    fn from(s: String) -> Self {
        DeckError::Internal(s)
    }
}

impl From<&str> for DeckError {
    fn from(s: &str) -> Self {
        DeckError::Internal(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for DeckError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        DeckError::ChannelClosed
    }
}
