//! Error types for the realtime client.

use std::time::Duration;

/// Result type for realtime operations.
pub type Result<T> = std::result::Result<T, RealtimeError>;

/// Top-level error returned by the client, the transport and the codec.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    /// The underlying connection was refused, reset or closed unexpectedly.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The transport failed or closed before `setupComplete` was observed.
    #[error("Connection failed before setup completed: {0}")]
    Connection(String),

    /// No `setupComplete` frame arrived within the configured bound.
    #[error("No setupComplete received within {0:?}")]
    SetupTimeout(Duration),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Audio pipeline setup failed.
    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RealtimeError {
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::Connection(msg.into())
    }

    /// True for errors that end the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Connection(_) | Self::SetupTimeout(_))
    }
}

/// An operation was invoked in a state that does not allow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("Session is not ready; setupComplete has not been received")]
    NotReady,
    #[error("Not connected")]
    NotConnected,
    #[error("A connection attempt is already in flight")]
    AlreadyConnecting,
    #[error("Already connected")]
    AlreadyConnected,
}

/// An inbound frame could not be turned into a typed frame.
///
/// Decode errors never end a session; the receive loop logs and skips the frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Unknown frame with keys [{0}]")]
    UnknownFrame(String),
    #[error("Binary frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Configuration rejected before any connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    Missing(&'static str),
    #[error("Invalid tool declaration '{name}': {reason}")]
    InvalidTool { name: String, reason: String },
    #[error("Duplicate tool declaration '{0}'")]
    DuplicateTool(String),
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}
