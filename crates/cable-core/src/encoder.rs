//! The `Encoder` trait — wire payload codec seam.

use crate::error::CableError;
use crate::frame::{Command, Frame};

/// Translates between wire commands/frames and the raw payloads the
/// transport carries. Binary dialects implement the same trait.
pub trait Encoder: Send + Sync + 'static {
    fn encode(&self, command: &Command) -> Result<String, CableError>;
    fn decode(&self, raw: &str) -> Result<Frame, CableError>;
}

/// JSON passthrough codec — the default for both ActionCable dialects.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode(&self, command: &Command) -> Result<String, CableError> {
        Ok(serde_json::to_string(command)?)
    }

    fn decode(&self, raw: &str) -> Result<Frame, CableError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameKind, Identifier};

    #[test]
    fn encode_decode_json() {
        let enc = JsonEncoder;
        let id = Identifier::from_raw(r#"{"channel":"Room"}"#);
        let raw = enc.encode(&Command::subscribe(&id)).unwrap();
        assert!(raw.contains("subscribe"));

        let frame = enc.decode(r#"{"type":"welcome"}"#).unwrap();
        assert_eq!(frame.kind, Some(FrameKind::Welcome));
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let err = JsonEncoder.decode("not json").unwrap_err();
        assert!(matches!(err, CableError::Codec(_)));
    }
}
