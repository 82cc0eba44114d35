//! ActionCable wire types and identifier derivation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CableError;

/// Canonical subscription key derived from a channel name + params.
///
/// Two subscribe calls with structurally identical payloads derive the same
/// identifier; structurally different payloads never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    /// Derive the identifier for `(channel, params)`.
    ///
    /// The identifier is the JSON serialization of `{"channel": channel}`
    /// merged with `params`. `serde_json::Map` keeps keys sorted, so the
    /// serialization is deterministic regardless of params insertion order.
    pub fn derive(channel: &str, params: &Value) -> Result<Self, CableError> {
        let mut map = Map::new();
        map.insert("channel".into(), Value::String(channel.to_owned()));
        match params {
            Value::Null => {}
            Value::Object(obj) => {
                for (key, value) in obj {
                    map.insert(key.clone(), value.clone());
                }
            }
            other => {
                return Err(CableError::Config(format!(
                    "channel params must be a JSON object, got: {other}"
                )))
            }
        }
        Ok(Self(Value::Object(map).to_string()))
    }

    /// Wrap an identifier string received from the server.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbound command kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Subscribe,
    Unsubscribe,
    Message,
}

/// One outbound wire command.
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    pub command: CommandKind,
    pub identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Command {
    pub fn subscribe(identifier: &Identifier) -> Self {
        Self {
            command: CommandKind::Subscribe,
            identifier: identifier.as_str().to_owned(),
            data: None,
        }
    }

    pub fn unsubscribe(identifier: &Identifier) -> Self {
        Self {
            command: CommandKind::Unsubscribe,
            identifier: identifier.as_str().to_owned(),
            data: None,
        }
    }

    /// An application-level action (`perform`). `data` is the JSON-encoded
    /// `{"action": ..., ...payload}` string the dialect expects.
    pub fn message(identifier: &Identifier, data: String) -> Self {
        Self {
            command: CommandKind::Message,
            identifier: identifier.as_str().to_owned(),
            data: Some(data),
        }
    }
}

/// Inbound frame type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Ping,
    Welcome,
    Disconnect,
    ConfirmSubscription,
    RejectSubscription,
    /// Any `type` string this client does not know. Logged and dropped
    /// upstream, never an error.
    #[serde(other)]
    Unknown,
}

/// One inbound wire frame.
///
/// Absence of `type` with a present `message` is a routed application frame.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Frame {
    #[serde(rename = "type", default)]
    pub kind: Option<FrameKind>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub reconnect: Option<bool>,
    /// Extended dialect only: a welcome with `restored: true` resumes the
    /// previous session without resubscribing.
    #[serde(default)]
    pub restored: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_payloads_collide() {
        let a = Identifier::derive("Room", &json!({"id": "2020", "mode": "live"})).unwrap();
        let b = Identifier::derive("Room", &json!({"mode": "live", "id": "2020"})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_payloads_never_collide() {
        let a = Identifier::derive("Room", &json!({"id": "2020"})).unwrap();
        let b = Identifier::derive("Room", &json!({"id": "2021"})).unwrap();
        let c = Identifier::derive("Chat", &json!({"id": "2020"})).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn params_default_to_empty() {
        let a = Identifier::derive("Room", &Value::Null).unwrap();
        assert_eq!(a.as_str(), r#"{"channel":"Room"}"#);
    }

    #[test]
    fn non_object_params_rejected() {
        let err = Identifier::derive("Room", &json!([1, 2])).unwrap_err();
        assert!(matches!(err, CableError::Config(_)));
    }

    #[test]
    fn command_serialization() {
        let id = Identifier::derive("Room", &Value::Null).unwrap();
        let raw = serde_json::to_string(&Command::subscribe(&id)).unwrap();
        assert!(raw.contains(r#""command":"subscribe""#));
        assert!(!raw.contains("data"));

        let raw = serde_json::to_string(&Command::message(&id, r#"{"action":"speak"}"#.into()))
            .unwrap();
        assert!(raw.contains(r#""command":"message""#));
        assert!(raw.contains("speak"));
    }

    #[test]
    fn frame_decoding() {
        let f: Frame = serde_json::from_str(r#"{"type":"welcome"}"#).unwrap();
        assert_eq!(f.kind, Some(FrameKind::Welcome));

        let f: Frame = serde_json::from_str(r#"{"type":"ping","message":1618}"#).unwrap();
        assert_eq!(f.kind, Some(FrameKind::Ping));
        assert_eq!(f.message, Some(json!(1618)));

        let f: Frame =
            serde_json::from_str(r#"{"type":"disconnect","reason":"unauthorized","reconnect":false}"#)
                .unwrap();
        assert_eq!(f.kind, Some(FrameKind::Disconnect));
        assert_eq!(f.reason.as_deref(), Some("unauthorized"));
        assert_eq!(f.reconnect, Some(false));

        let f: Frame = serde_json::from_str(r#"{"type":"confirm_subscription","identifier":"x"}"#)
            .unwrap();
        assert_eq!(f.kind, Some(FrameKind::ConfirmSubscription));
    }

    #[test]
    fn unknown_type_is_recognizable() {
        let f: Frame = serde_json::from_str(r#"{"type":"shrug"}"#).unwrap();
        assert_eq!(f.kind, Some(FrameKind::Unknown));
    }

    #[test]
    fn typeless_frame_is_application_payload() {
        let f: Frame =
            serde_json::from_str(r#"{"identifier":"x","message":{"body":"hi"}}"#).unwrap();
        assert!(f.kind.is_none());
        assert_eq!(f.message, Some(json!({"body": "hi"})));
    }
}
