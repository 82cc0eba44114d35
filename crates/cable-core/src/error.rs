//! Error types shared across the Cable crates.

use thiserror::Error;

/// Errors produced by the client, its transport and its wire dialect.
#[derive(Debug, Error)]
pub enum CableError {
    /// The connection was lost — transport close, heartbeat timeout or a
    /// server-initiated disconnect. In-flight operations fail with this
    /// instead of hanging.
    #[error("disconnected: {reason}")]
    Disconnected { reason: String },

    /// The server explicitly refused a subscription. Terminal for the
    /// affected channel.
    #[error("subscription rejected: {identifier}")]
    SubscriptionRejected {
        identifier: String,
        reason: Option<String>,
    },

    /// Transport-level open/send failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame or command could not be encoded/decoded.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Invalid configuration (unknown protocol, non-object params, missing
    /// URL). The only class surfaced synchronously at construction time.
    #[error("configuration error: {0}")]
    Config(String),

    /// The connection is closed and accepts no further operations.
    #[error("connection closed")]
    Closed,
}

impl CableError {
    /// Shorthand for a [`CableError::Disconnected`] with the given reason.
    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
        }
    }

    /// Returns `true` for terminal conditions that no reconnect can undo.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SubscriptionRejected { .. } | Self::Closed | Self::Config(_)
        )
    }

    /// Returns `true` if this error represents a lost connection that a
    /// reconnect may recover from.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected { .. } | Self::Transport(_))
    }
}
