//! Shared error type across courierlink crates.

use thiserror::Error;

/// Stable error classes (used in logs, stats and close reasons).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Credential missing, refresh failed, or upgrade rejected with 401/403.
    Auth,
    /// Socket open/read/write failure.
    Transport,
    /// An awaited step (open, pong, send ack) did not complete in time.
    Timeout,
    /// Malformed envelope or payload.
    Decode,
    /// Outgoing value could not be serialized.
    Encode,
    /// Durable store failure.
    Storage,
    /// Invalid configuration.
    Config,
    /// Runtime invariant broken (task gone, channel closed).
    Internal,
}

impl ErrorClass {
    /// String representation used in logs and rendered stats.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Auth => "AUTH",
            ErrorClass::Transport => "TRANSPORT",
            ErrorClass::Timeout => "TIMEOUT",
            ErrorClass::Decode => "DECODE",
            ErrorClass::Encode => "ENCODE",
            ErrorClass::Storage => "STORAGE",
            ErrorClass::Config => "CONFIG",
            ErrorClass::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, LinkError>;

/// Unified error type used by core and client.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    #[error("auth failed: {0}")]
    AuthFailed(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("bad config: {0}")]
    Config(String),
    #[error("unsupported config version")]
    UnsupportedVersion,
    #[error("not connected")]
    NotConnected,
    #[error("internal: {0}")]
    Internal(String),
}

impl LinkError {
    /// Map to a stable class.
    pub fn class(&self) -> ErrorClass {
        match self {
            LinkError::AuthFailed(_) => ErrorClass::Auth,
            LinkError::Transport(_) | LinkError::NotConnected => ErrorClass::Transport,
            LinkError::Timeout(_) => ErrorClass::Timeout,
            LinkError::Decode(_) => ErrorClass::Decode,
            LinkError::Encode(_) => ErrorClass::Encode,
            LinkError::Storage(_) => ErrorClass::Storage,
            LinkError::Config(_) | LinkError::UnsupportedVersion => ErrorClass::Config,
            LinkError::Internal(_) => ErrorClass::Internal,
        }
    }

    /// Whether the connection manager may retry after this error.
    ///
    /// Auth failures are surfaced to the caller and never retried here.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::Transport | ErrorClass::Timeout
        )
    }

    pub fn is_auth(&self) -> bool {
        self.class() == ErrorClass::Auth
    }
}
