//! Protocol dispatcher — translates generic subscribe/unsubscribe/perform
//! operations into wire commands, interprets inbound frames, and tracks
//! in-flight subscribe requests.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::oneshot;

use cable_core::{CableError, Command, Encoder, FrameKind, Identifier, ProtocolKind};

/// Generic events produced by interpreting inbound frames.
#[derive(Debug)]
pub enum ProtocolEvent {
    /// Server handshake completed. `restored` is only ever `true` for
    /// dialects that declare recoverable closures.
    Connected { restored: bool },
    /// Server heartbeat, with the server-reported timestamp when present.
    Ping { timestamp: Option<f64> },
    /// Server-initiated disconnect; `reconnect: false` is fatal.
    Disconnected {
        reason: Option<String>,
        reconnect: bool,
    },
    /// The server confirmed a pending subscription.
    Confirmed { identifier: Identifier },
    /// The server refused a pending subscription.
    Rejected {
        identifier: Identifier,
        reason: Option<String>,
    },
    /// A routed application payload for the hub to fan out.
    Message {
        identifier: Identifier,
        payload: Value,
    },
    /// Anomalous or unknown frame — already logged, nothing to dispatch.
    Ignored,
}

/// Deferred continuation for one in-flight subscribe. Resolved on
/// confirm/reject, failed on [`Protocol::reset`].
type Confirmation = oneshot::Sender<Result<(), CableError>>;

/// Pure translator between operations and wire frames. Holds only the
/// in-flight subscription bookkeeping; everything else lives in the
/// connection and its hub.
pub struct Protocol {
    kind: ProtocolKind,
    encoder: Arc<dyn Encoder>,
    pending: HashMap<Identifier, Confirmation>,
}

impl Protocol {
    pub fn new(kind: ProtocolKind, encoder: Arc<dyn Encoder>) -> Self {
        Self {
            kind,
            encoder,
            pending: HashMap::new(),
        }
    }

    /// Whether this dialect can resume a session after a short closure
    /// without resubscribing every channel.
    pub fn recoverable_closure(&self) -> bool {
        self.kind.recoverable_closure()
    }

    /// Build a subscribe command for `(channel, params)` and record the
    /// deferred continuation keyed by the derived identifier.
    ///
    /// Concurrent subscribes for different identifiers never interfere. A
    /// second subscribe for an identifier already in flight replaces the
    /// stale continuation (failing it) — the hub refuses duplicates before
    /// they get this far.
    pub fn subscribe(
        &mut self,
        channel: &str,
        params: &Value,
    ) -> Result<(Identifier, Command, oneshot::Receiver<Result<(), CableError>>), CableError>
    {
        let identifier = Identifier::derive(channel, params)?;
        let (tx, rx) = oneshot::channel();
        if let Some(stale) = self.pending.insert(identifier.clone(), tx) {
            tracing::warn!(identifier = %identifier, "subscribe already in flight, superseding");
            let _ = stale.send(Err(CableError::disconnected("superseded by a newer subscribe")));
        }
        Ok((identifier.clone(), Command::subscribe(&identifier), rx))
    }

    /// Build an unsubscribe command, abandoning any in-flight subscribe for
    /// the same identifier.
    pub fn unsubscribe(&mut self, identifier: &Identifier) -> Command {
        if let Some(stale) = self.pending.remove(identifier) {
            let _ = stale.send(Err(CableError::disconnected("unsubscribed before confirmation")));
        }
        Command::unsubscribe(identifier)
    }

    /// Build a perform ("message") command. `payload` must be a JSON object
    /// or null; the action name is merged in under the `action` key.
    pub fn perform(
        &self,
        identifier: &Identifier,
        action: &str,
        payload: &Value,
    ) -> Result<Command, CableError> {
        let mut data = Map::new();
        match payload {
            Value::Null => {}
            Value::Object(obj) => {
                for (key, value) in obj {
                    data.insert(key.clone(), value.clone());
                }
            }
            other => {
                return Err(CableError::Config(format!(
                    "perform payload must be a JSON object, got: {other}"
                )))
            }
        }
        data.insert("action".into(), Value::String(action.to_owned()));
        Ok(Command::message(identifier, Value::Object(data).to_string()))
    }

    /// Encode an outbound command with this protocol's codec.
    pub fn encode(&self, command: &Command) -> Result<String, CableError> {
        self.encoder.encode(command)
    }

    /// Interpret one inbound frame. Malformed or unexpected frames are
    /// logged and reported as [`ProtocolEvent::Ignored`]; this never fails.
    pub fn receive(&mut self, raw: &str) -> ProtocolEvent {
        let frame = match self.encoder.decode(raw) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(error = %err, "undecodable inbound frame dropped");
                return ProtocolEvent::Ignored;
            }
        };

        match frame.kind {
            Some(FrameKind::Ping) => ProtocolEvent::Ping {
                timestamp: frame.message.as_ref().and_then(Value::as_f64),
            },
            Some(FrameKind::Welcome) => ProtocolEvent::Connected {
                restored: self.recoverable_closure() && frame.restored.unwrap_or(false),
            },
            Some(FrameKind::Disconnect) => {
                let reason = frame.reason;
                self.reset(reason.as_deref().unwrap_or("server requested disconnect"));
                ProtocolEvent::Disconnected {
                    reason,
                    reconnect: frame.reconnect.unwrap_or(true),
                }
            }
            Some(FrameKind::ConfirmSubscription) => match self.take_pending(frame.identifier) {
                Some(identifier) => {
                    ProtocolEvent::Confirmed { identifier }
                }
                None => ProtocolEvent::Ignored,
            },
            Some(FrameKind::RejectSubscription) => {
                match self.take_pending_rejected(frame.identifier, frame.reason.clone()) {
                    Some(identifier) => ProtocolEvent::Rejected {
                        identifier,
                        reason: frame.reason,
                    },
                    None => ProtocolEvent::Ignored,
                }
            }
            Some(FrameKind::Unknown) => {
                tracing::warn!("unknown frame type dropped");
                ProtocolEvent::Ignored
            }
            None => match (frame.identifier, frame.message) {
                (Some(identifier), Some(payload)) => ProtocolEvent::Message {
                    identifier: Identifier::from_raw(identifier),
                    payload,
                },
                _ => {
                    tracing::warn!("frame with neither type nor message dropped");
                    ProtocolEvent::Ignored
                }
            },
        }
    }

    /// Fail every in-flight subscribe with a disconnection error and clear
    /// the table. Invoked whenever the underlying connection is lost, so
    /// callers fail fast instead of hanging.
    pub fn reset(&mut self, reason: &str) {
        for (identifier, confirmation) in self.pending.drain() {
            tracing::debug!(identifier = %identifier, "failing in-flight subscribe");
            let _ = confirmation.send(Err(CableError::disconnected(reason)));
        }
    }

    /// Number of in-flight subscribe requests.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Resolve the pending entry for a confirm frame. A reply for an
    /// identifier with no pending entry is a protocol anomaly: logged,
    /// dropped, never an error — the server may reference identifiers this
    /// client already abandoned.
    fn take_pending(&mut self, identifier: Option<String>) -> Option<Identifier> {
        let identifier = match identifier {
            Some(raw) => Identifier::from_raw(raw),
            None => {
                tracing::warn!("subscription reply without identifier dropped");
                return None;
            }
        };
        match self.pending.remove(&identifier) {
            Some(confirmation) => {
                let _ = confirmation.send(Ok(()));
                Some(identifier)
            }
            None => {
                tracing::warn!(identifier = %identifier, "reply for unknown subscription dropped");
                None
            }
        }
    }

    fn take_pending_rejected(
        &mut self,
        identifier: Option<String>,
        reason: Option<String>,
    ) -> Option<Identifier> {
        let identifier = match identifier {
            Some(raw) => Identifier::from_raw(raw),
            None => {
                tracing::warn!("subscription reply without identifier dropped");
                return None;
            }
        };
        match self.pending.remove(&identifier) {
            Some(confirmation) => {
                let _ = confirmation.send(Err(CableError::SubscriptionRejected {
                    identifier: identifier.to_string(),
                    reason,
                }));
                Some(identifier)
            }
            None => {
                tracing::warn!(identifier = %identifier, "reply for unknown subscription dropped");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cable_core::JsonEncoder;
    use serde_json::json;

    fn protocol() -> Protocol {
        Protocol::new(ProtocolKind::ActionCableV1Json, Arc::new(JsonEncoder))
    }

    fn confirm_frame(identifier: &Identifier) -> String {
        json!({"type": "confirm_subscription", "identifier": identifier.as_str()}).to_string()
    }

    #[test]
    fn welcome_signals_connected() {
        let mut p = protocol();
        assert!(matches!(
            p.receive(r#"{"type":"welcome"}"#),
            ProtocolEvent::Connected { restored: false }
        ));
    }

    #[test]
    fn restored_welcome_requires_recoverable_dialect() {
        let mut plain = protocol();
        assert!(matches!(
            plain.receive(r#"{"type":"welcome","restored":true}"#),
            ProtocolEvent::Connected { restored: false }
        ));

        let mut ext = Protocol::new(ProtocolKind::ActionCableV1ExtJson, Arc::new(JsonEncoder));
        assert!(matches!(
            ext.receive(r#"{"type":"welcome","restored":true}"#),
            ProtocolEvent::Connected { restored: true }
        ));
    }

    #[test]
    fn ping_carries_server_timestamp() {
        let mut p = protocol();
        match p.receive(r#"{"type":"ping","message":1618}"#) {
            ProtocolEvent::Ping { timestamp } => assert_eq!(timestamp, Some(1618.0)),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn confirm_resolves_pending() {
        let mut p = protocol();
        let (identifier, _cmd, mut rx) = p.subscribe("Room", &json!({"id": "2020"})).unwrap();
        assert_eq!(p.pending_len(), 1);

        match p.receive(&confirm_frame(&identifier)) {
            ProtocolEvent::Confirmed { identifier: got } => assert_eq!(got, identifier),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(p.pending_len(), 0);
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn reject_fails_pending_with_rejection() {
        let mut p = protocol();
        let (identifier, _cmd, mut rx) = p.subscribe("Room", &json!(null)).unwrap();

        let raw = json!({"type": "reject_subscription", "identifier": identifier.as_str()})
            .to_string();
        assert!(matches!(p.receive(&raw), ProtocolEvent::Rejected { .. }));
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(CableError::SubscriptionRejected { .. })
        ));
    }

    #[test]
    fn reply_for_unknown_identifier_is_dropped() {
        let mut p = protocol();
        let raw = json!({"type": "confirm_subscription", "identifier": "ghost"}).to_string();
        assert!(matches!(p.receive(&raw), ProtocolEvent::Ignored));

        let raw = json!({"type": "reject_subscription", "identifier": "ghost"}).to_string();
        assert!(matches!(p.receive(&raw), ProtocolEvent::Ignored));
    }

    #[test]
    fn disconnect_resets_pending_first() {
        let mut p = protocol();
        let (_, _, mut rx) = p.subscribe("Room", &json!(null)).unwrap();

        let event = p.receive(r#"{"type":"disconnect","reason":"going away","reconnect":false}"#);
        match event {
            ProtocolEvent::Disconnected { reason, reconnect } => {
                assert_eq!(reason.as_deref(), Some("going away"));
                assert!(!reconnect);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(p.pending_len(), 0);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(CableError::Disconnected { .. })
        ));
    }

    #[test]
    fn disconnect_defaults_to_recoverable() {
        let mut p = protocol();
        assert!(matches!(
            p.receive(r#"{"type":"disconnect"}"#),
            ProtocolEvent::Disconnected { reconnect: true, .. }
        ));
    }

    #[test]
    fn application_payload_is_routed() {
        let mut p = protocol();
        match p.receive(r#"{"identifier":"x","message":{"body":"hi"}}"#) {
            ProtocolEvent::Message { identifier, payload } => {
                assert_eq!(identifier.as_str(), "x");
                assert_eq!(payload, json!({"body": "hi"}));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn junk_never_raises() {
        let mut p = protocol();
        assert!(matches!(p.receive("not json"), ProtocolEvent::Ignored));
        assert!(matches!(
            p.receive(r#"{"type":"future_thing"}"#),
            ProtocolEvent::Ignored
        ));
        assert!(matches!(p.receive(r#"{"reason":"x"}"#), ProtocolEvent::Ignored));
    }

    #[test]
    fn reset_fails_every_pending() {
        let mut p = protocol();
        let (_, _, mut rx_a) = p.subscribe("Room", &json!({"id": "a"})).unwrap();
        let (_, _, mut rx_b) = p.subscribe("Room", &json!({"id": "b"})).unwrap();

        p.reset("network down");
        assert_eq!(p.pending_len(), 0);
        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().unwrap() {
                Err(CableError::Disconnected { reason }) => assert_eq!(reason, "network down"),
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
    }

    #[test]
    fn concurrent_subscribes_do_not_interfere() {
        let mut p = protocol();
        let (id_a, _, mut rx_a) = p.subscribe("Room", &json!({"id": "a"})).unwrap();
        let (_id_b, _, mut rx_b) = p.subscribe("Room", &json!({"id": "b"})).unwrap();
        assert_eq!(p.pending_len(), 2);

        p.receive(&confirm_frame(&id_a));
        assert!(rx_a.try_recv().unwrap().is_ok());
        assert!(rx_b.try_recv().is_err(), "b must still be pending");
        assert_eq!(p.pending_len(), 1);
    }

    #[test]
    fn unsubscribe_abandons_in_flight_subscribe() {
        let mut p = protocol();
        let (identifier, _, mut rx) = p.subscribe("Room", &json!(null)).unwrap();
        let cmd = p.unsubscribe(&identifier);
        assert_eq!(p.pending_len(), 0);
        assert!(matches!(rx.try_recv().unwrap(), Err(_)));
        assert!(p.encode(&cmd).unwrap().contains("unsubscribe"));
    }

    #[test]
    fn perform_merges_action_into_payload() {
        let p = protocol();
        let identifier = Identifier::derive("Room", &json!(null)).unwrap();
        let cmd = p
            .perform(&identifier, "speak", &json!({"body": "hi", "action": "spoofed"}))
            .unwrap();
        let data: Value = serde_json::from_str(cmd.data.as_deref().unwrap()).unwrap();
        assert_eq!(data["action"], "speak");
        assert_eq!(data["body"], "hi");
    }

    #[test]
    fn perform_rejects_non_object_payload() {
        let p = protocol();
        let identifier = Identifier::derive("Room", &json!(null)).unwrap();
        assert!(p.perform(&identifier, "speak", &json!([1])).is_err());
    }
}
