//! Notifications sent from a session to its collaborators.

use std::fmt;
use std::sync::mpsc::Sender;

/// Connectivity as reported to health/status displays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    /// Closed without an error (idle timeout, peer closed, shutdown)
    Disconnected,
    /// Connect or socket failure; retried on the next command
    TransportError,
    /// The projector rejected the password; not retried until it changes
    AuthFailed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Connecting => "connecting",
            Self::Connected => "ok",
            Self::Disconnected => "disconnected",
            Self::TransportError => "network error",
            Self::AuthFailed => "authentication error",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A status parameter was written (sent even when the value is unchanged)
    StatusChanged { key: String, value: String },
    ConnectionChanged {
        status: ConnectionStatus,
        detail: String,
    },
}

/// Channel sender for session events
pub type EventSender = Sender<SessionEvent>;
