use std::fmt;
use std::time::Duration;

use courierlink_core::error::LinkError;

/// Lifecycle state. Only the manager actor writes it; everyone else reads a
/// `watch` copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// A reconnect timer is pending.
    Reconnecting { attempt: u32, next_delay: Duration },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Why the link closed, as delivered to the `on_close` hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Transport(String),
    ServerClosed,
    PingTimeout,
    /// Not retried; a new `connect` is required.
    AuthFailed(String),
    /// Terminal after the retry budget is spent.
    RetriesExhausted { attempts: u32 },
}

impl CloseReason {
    /// No reconnect follows a terminal close.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CloseReason::AuthFailed(_) | CloseReason::RetriesExhausted { .. })
    }
}

impl From<LinkError> for CloseReason {
    fn from(e: LinkError) -> Self {
        match e {
            LinkError::AuthFailed(msg) => CloseReason::AuthFailed(msg),
            other => CloseReason::Transport(other.to_string()),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Transport(m) => write!(f, "transport: {m}"),
            CloseReason::ServerClosed => f.write_str("closed by server"),
            CloseReason::PingTimeout => f.write_str("pong not received in time"),
            CloseReason::AuthFailed(m) => write!(f, "auth failed: {m}"),
            CloseReason::RetriesExhausted { attempts } => {
                write!(f, "gave up after {attempts} reconnect attempts")
            }
        }
    }
}
