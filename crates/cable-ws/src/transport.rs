//! WebSocket transport over tokio-tungstenite.

use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use cable_core::{CableError, Transport, TransportEvent};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// [`Transport`] backed by one tokio-tungstenite socket at a time.
///
/// `open` splits the socket: the write half is kept for `send`, the read
/// half is drained by a background task that forwards text frames and
/// reports the close (with the server's reason when the close frame
/// carries one). TLS is negotiated from the URL scheme (`ws` / `wss`).
pub struct WebSocketTransport {
    url: StdMutex<String>,
    sink: Mutex<Option<WsSink>>,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: StdMutex::new(url.into()),
            sink: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), CableError> {
        let url = self.url();
        let (socket, _response) = connect_async(url.as_str())
            .await
            .map_err(|err| CableError::Transport(err.to_string()))?;
        let (sink, mut stream) = socket.split();
        *self.sink.lock().await = Some(sink);
        let _ = events.send(TransportEvent::Opened);

        tokio::spawn(async move {
            while let Some(next) = stream.next().await {
                match next {
                    Ok(Message::Text(text)) => {
                        if events.send(TransportEvent::Message(text)).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let reason = frame
                            .filter(|frame| !frame.reason.is_empty())
                            .map(|frame| frame.reason.into_owned());
                        let _ = events.send(TransportEvent::Closed { reason });
                        return;
                    }
                    // Control frames are handled by tungstenite; binary
                    // frames are not part of the protocol.
                    Ok(_) => {}
                    Err(err) => {
                        tracing::debug!(error = %err, "websocket read failed");
                        let _ = events.send(TransportEvent::Closed { reason: None });
                        return;
                    }
                }
            }
            let _ = events.send(TransportEvent::Closed { reason: None });
        });
        Ok(())
    }

    async fn close(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
    }

    async fn send(&self, raw: String) -> Result<(), CableError> {
        let mut guard = self.sink.lock().await;
        match guard.as_mut() {
            Some(sink) => sink
                .send(Message::Text(raw))
                .await
                .map_err(|err| CableError::Transport(err.to_string())),
            None => Err(CableError::disconnected("websocket is not open")),
        }
    }

    fn set_url(&self, url: String) {
        *self.url.lock().unwrap() = url;
    }

    fn url(&self) -> String {
        self.url.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    #[tokio::test]
    async fn round_trip_against_local_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text("hello".into())).await.unwrap();
            let echoed = ws.next().await.unwrap().unwrap();
            assert_eq!(echoed, Message::Text("ping".into()));
            ws.close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "bye".into(),
            }))
            .await
            .unwrap();
        });

        let transport = WebSocketTransport::new(format!("ws://{addr}"));
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.open(tx).await.unwrap();

        assert!(matches!(rx.recv().await, Some(TransportEvent::Opened)));
        match rx.recv().await {
            Some(TransportEvent::Message(text)) => assert_eq!(text, "hello"),
            other => panic!("expected text frame, got: {other:?}"),
        }

        transport.send("ping".into()).await.unwrap();
        match rx.recv().await {
            Some(TransportEvent::Closed { reason }) => assert_eq!(reason.as_deref(), Some("bye")),
            other => panic!("expected close, got: {other:?}"),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn open_failure_is_reported() {
        let transport = WebSocketTransport::new("ws://127.0.0.1:1");
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(matches!(
            transport.open(tx).await,
            Err(CableError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn send_without_open_fails() {
        let transport = WebSocketTransport::new("ws://127.0.0.1:1");
        assert!(matches!(
            transport.send("x".into()).await,
            Err(CableError::Disconnected { .. })
        ));
    }
}
