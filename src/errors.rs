//! Error types shared across the client.

use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Shared client result type.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client error enumeration covering every failure a caller can observe.
///
/// The type is `Clone` so a single connection-loss error can resolve every
/// outstanding request at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Endpoint resolution, handshake, or transport failure.
    Connection(String),
    /// Operation attempted while no connection is active.
    NotConnected,
    /// Outbound payload could not be encoded into a frame.
    Encoding(String),
    /// No matching response arrived before the deadline.
    Timeout {
        /// Request kind (`type` discriminator) that timed out.
        kind: String,
        /// Deadline that elapsed.
        after: Duration,
    },
    /// The caller cancelled the request.
    Cancelled {
        /// Request kind (`type` discriminator) that was cancelled.
        kind: String,
    },
    /// The server answered with `success: false`.
    Remote {
        /// Request kind (`type` discriminator) the failure belongs to.
        kind: String,
        /// Message carried by the response frame.
        message: String,
    },
    /// Framing or I/O failure below the frame layer.
    Io(String),
}

impl ClientError {
    /// Whether this error means the connection is gone or was never there.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::NotConnected)
    }
}

impl Display for ClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Connection(msg) => write!(f, "connection: {msg}"),
            Self::NotConnected => write!(f, "not connected"),
            Self::Encoding(msg) => write!(f, "encoding: {msg}"),
            Self::Timeout { kind, after } => {
                write!(f, "timeout: no response to '{kind}' within {after:?}")
            }
            Self::Cancelled { kind } => write!(f, "cancelled: request '{kind}'"),
            Self::Remote { kind, message } => write!(f, "remote: '{kind}' failed: {message}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<toml::de::Error> for ClientError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}
