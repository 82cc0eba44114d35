//! The `Transport` trait — contract between a connection and its socket.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::CableError;

/// Events a transport reports to its owning connection.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The underlying socket is open and ready to carry frames.
    Opened,
    /// The socket closed. `reason` carries the close reason when the server
    /// supplied one (e.g. `"token_expired"`).
    Closed { reason: Option<String> },
    /// One raw inbound frame.
    Message(String),
}

/// The duplex message transport a connection multiplexes over.
///
/// # Thread Safety
/// Implementations must be `Send + Sync` for use across Tokio tasks.
///
/// # Object Safety
/// The trait is object-safe and can be stored as `Arc<dyn Transport>`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open the socket and report subsequent events on `events`.
    ///
    /// A fresh sender is handed to every `open`, so events from a torn-down
    /// socket never leak into a newer connection episode.
    async fn open(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), CableError>;

    /// Close the socket. Does nothing if it is already closed.
    async fn close(&self);

    /// Send one raw outbound frame.
    async fn send(&self, raw: String) -> Result<(), CableError>;

    /// Retarget the next `open` (a token refresh updates credentials carried
    /// in the URL).
    fn set_url(&self, url: String);

    /// The current target URL.
    fn url(&self) -> String;
}
