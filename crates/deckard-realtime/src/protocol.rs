//! Classification of raw inbound frames.
//!
//! The protocol is additive: a frame whose `type` this crate does not know is
//! surfaced as [`InboundFrame::Unknown`] instead of being rejected. Only frames
//! that are not JSON objects, lack a `type`, or carry a known `type` with
//! unusable fields are errors.

pub use deckard_realtime_types::{
    ClientInfo, ClientMessage, ContentPart, GuardrailResult, HistoryItem, ServerEvent,
};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("frame is not a JSON object with a string `type`")]
    MissingType,
    #[error("malformed `{kind}` frame: {source}")]
    Malformed {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Known(ServerEvent),
    Unknown { kind: String, payload: Value },
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_string();

        if !ServerEvent::is_known_type(&kind) {
            return Ok(InboundFrame::Unknown {
                kind,
                payload: value,
            });
        }
        serde_json::from_value(value)
            .map(InboundFrame::Known)
            .map_err(|source| ProtocolError::Malformed { kind, source })
    }
}

/// Serializes an outbound message to its text frame.
pub fn encode(message: &ClientMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_event() {
        let frame = InboundFrame::parse(r#"{"type":"tool_start","tool":"web_search"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Known(ServerEvent::ToolStart {
                tool: "web_search".into()
            })
        );
    }

    #[test]
    fn test_parse_unknown_event_is_not_an_error() {
        let frame = InboundFrame::parse(r#"{"type":"response.created","id":7}"#).unwrap();
        match frame {
            InboundFrame::Unknown { kind, payload } => {
                assert_eq!(kind, "response.created");
                assert_eq!(payload["id"], 7);
            }
            other => panic!("Expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        assert!(matches!(
            InboundFrame::parse("{not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_parse_rejects_missing_type() {
        assert!(matches!(
            InboundFrame::parse(r#"{"audio":"AAAA"}"#),
            Err(ProtocolError::MissingType)
        ));
        assert!(matches!(
            InboundFrame::parse(r#"[1,2,3]"#),
            Err(ProtocolError::MissingType)
        ));
    }

    #[test]
    fn test_parse_rejects_malformed_known_event() {
        let err = InboundFrame::parse(r#"{"type":"audio","audio":42}"#).unwrap_err();
        match err {
            ProtocolError::Malformed { kind, .. } => assert_eq!(kind, "audio"),
            other => panic!("Expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_outbound() {
        let text = encode(&ClientMessage::CommitAudio).unwrap();
        assert_eq!(text, r#"{"type":"commit_audio"}"#);
    }
}
