//! Error types for the push-to-talk relay

use thiserror::Error;

use crate::session::ConnectionId;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Live stream error: {0}")]
    Live(#[from] LiveError),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Session and broadcast-lock errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid password")]
    AuthFailed,

    #[error("Another user is broadcasting ({holder})")]
    Blocked { holder: ConnectionId },

    #[error("Connection already registered: {0}")]
    AlreadyRegistered(ConnectionId),

    #[error("Authentication required")]
    NotAuthenticated,

    #[error("Hub is no longer running")]
    HubClosed,
}

/// Inbound frame validation errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Invalid payload for {event}: {reason}")]
    InvalidPayload { event: String, reason: String },
}

/// Live stream bridge errors
#[derive(Error, Debug)]
pub enum LiveError {
    #[error("Failed to spawn encoder '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Encoder stdin unavailable")]
    PipeUnavailable,

    #[error("Failed to purge {path}: {source}")]
    Purge {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
