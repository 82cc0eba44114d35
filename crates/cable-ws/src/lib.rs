//! WebSocket front door for Cable.
//!
//! [`connect`] wires a [`WebSocketTransport`], the JSON codec and the
//! client core together. Pass a [`ClientConfig`] to pick the dialect,
//! heartbeat cadence and reconnect behavior; the default is lazy, so the
//! socket opens on the first subscribe.

pub mod transport;

pub use transport::WebSocketTransport;

use std::sync::Arc;

use cable_client::Connection;
use cable_core::{CableError, ClientConfig, JsonEncoder};

/// Build a connection to the cable endpoint at `url`.
///
/// With `lazy: false` the connect is initiated before this returns;
/// failures then surface as channel events, not here. Configuration
/// problems fail immediately.
pub fn connect(url: impl Into<String>, config: ClientConfig) -> Result<Connection, CableError> {
    let transport = Arc::new(WebSocketTransport::new(url));
    Connection::spawn(transport, Arc::new(JsonEncoder), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;

    use cable_client::{ChannelEvent, ConnectionState};

    #[tokio::test]
    async fn end_to_end_subscribe_and_receive() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(json!({"type": "welcome"}).to_string()))
                .await
                .unwrap();

            let raw = match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => text,
                other => panic!("expected subscribe command, got: {other:?}"),
            };
            let cmd: serde_json::Value = serde_json::from_str(&raw).unwrap();
            assert_eq!(cmd["command"], "subscribe");
            let identifier = cmd["identifier"].clone();

            ws.send(Message::Text(
                json!({"type": "confirm_subscription", "identifier": identifier}).to_string(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text(
                json!({"identifier": identifier, "message": {"body": "hi"}}).to_string(),
            ))
            .await
            .unwrap();

            // Hold the socket until the client closes it.
            while let Some(Ok(frame)) = ws.next().await {
                if matches!(frame, Message::Close(_)) {
                    break;
                }
            }
        });

        let conn = connect(format!("ws://{addr}"), ClientConfig::default()).unwrap();
        let mut channel = conn.subscribe("Room", json!({"id": "1"})).await.unwrap();

        assert!(matches!(
            timeout(Duration::from_secs(2), channel.next_event())
                .await
                .unwrap(),
            Some(ChannelEvent::Connected)
        ));
        match timeout(Duration::from_secs(2), channel.next_event())
            .await
            .unwrap()
        {
            Some(ChannelEvent::Message(payload)) => assert_eq!(payload, json!({"body": "hi"})),
            other => panic!("expected message, got: {other:?}"),
        }
        assert_eq!(conn.state().await, ConnectionState::Connected);

        conn.close(None).await;
        server.await.unwrap();
    }
}
