//! The queue message envelope (§6 "Queue message envelope").

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ENVELOPE_VERSION: u32 = 1;

/// The only message kind currently defined: "please attempt to resume this
/// flight" (§4.5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Ready,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueMessage {
    pub version: u32,
    pub kind: MessageKind,
    #[serde(rename = "flightId")]
    pub flight_id: String,
    #[serde(rename = "callingContext", skip_serializing_if = "Option::is_none")]
    pub calling_context: Option<Value>,
}

impl QueueMessage {
    pub fn ready(flight_id: impl Into<String>) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            kind: MessageKind::Ready,
            flight_id: flight_id.into(),
            calling_context: None,
        }
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse an envelope, rejecting unknown versions (§6 "Versioning:
    /// receivers reject unknown versions").
    pub fn from_text(text: &str) -> Result<Self, String> {
        let msg: QueueMessage = serde_json::from_str(text).map_err(|e| e.to_string())?;
        if msg.version != ENVELOPE_VERSION {
            return Err(format!("unsupported envelope version: {}", msg.version));
        }
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let msg = QueueMessage::ready("f1");
        let text = msg.to_text().unwrap();
        let back = QueueMessage::from_text(&text).unwrap();
        assert_eq!(back.flight_id, "f1");
        assert_eq!(back.kind, MessageKind::Ready);
    }

    #[test]
    fn rejects_unknown_version() {
        let text = r#"{"version":99,"kind":"READY","flightId":"f1"}"#;
        assert!(QueueMessage::from_text(text).is_err());
    }
}
