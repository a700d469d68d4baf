//! Wire frames.
//!
//! Every frame in either direction is `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::{Map, Number, Value};

use crate::status::SessionStatus;

/// Events a peer can send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRoom(String),
    LeaveRoom(String),
    Message(MessagePayload),
    Terminate(TerminatePayload),
    StopGenerating(RoomPayload),
    MessageComplete(CompletePayload),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom(_) => "join_room",
            Self::LeaveRoom(_) => "leave_room",
            Self::Message(_) => "message",
            Self::Terminate(_) => "terminate",
            Self::StopGenerating(_) => "stop_generating",
            Self::MessageComplete(_) => "message_complete",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomPayload {
    #[serde(default)]
    pub room: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TerminatePayload {
    #[serde(default)]
    pub room: String,
    pub message: TerminateTarget,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateTarget {
    #[serde(default)]
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletePayload {
    #[serde(default)]
    pub room: String,
    pub message: CompletedMessage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedMessage {
    #[serde(default)]
    pub chunk_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub code_blocks: Option<Value>,
    #[serde(default, deserialize_with = "integral")]
    pub delta_tokens: Option<i64>,
}

/// A chat message as sent by a peer. Fields the relay does not interpret are
/// kept in `extra` and echoed back unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub message: MessageBody,
    /// Event name the message is echoed under; `message` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_feedback: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_message: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The `message` field: an object in the structured shape, or any other
/// value standing for the text of a plain message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    Object(Map<String, Value>),
    Bare(Value),
}

impl Default for MessageBody {
    fn default() -> Self {
        Self::Bare(Value::Null)
    }
}

impl MessageBody {
    /// Read the structured message. Bare values are wrapped as `text`
    /// messages; an object that does not fit the structured shape is an error.
    pub fn into_structured(self) -> Result<StructuredMessage, serde_json::Error> {
        match self {
            Self::Object(fields) => serde_json::from_value(Value::Object(fields)),
            Self::Bare(text) => Ok(StructuredMessage {
                kind: Some("text".to_string()),
                text,
                ..Default::default()
            }),
        }
    }
}

/// Accept integers and floats with no fractional part (`2.0`).
fn integral<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(number) = Option::<Number>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Some(n) = number.as_i64() {
        return Ok(Some(n));
    }
    match number.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
            Ok(Some(f as i64))
        }
        _ => Err(de::Error::custom(format!(
            "expected an integer, found {number}"
        ))),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredMessage {
    /// `text` or `code`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Value,
    #[serde(
        default,
        deserialize_with = "integral",
        skip_serializing_if = "Option::is_none"
    )]
    pub tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<String>,
    /// `Some(false)` marks a continuation of an earlier message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Sent whole rather than streamed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single: Option<bool>,
    #[serde(
        default,
        deserialize_with = "integral",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StructuredMessage {
    pub fn is_code(&self) -> bool {
        self.kind.as_deref() == Some("code")
    }

    pub fn is_continuation(&self) -> bool {
        self.first == Some(false)
    }
}

/// A frame sent to peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub event: String,
    pub data: Value,
}

impl OutboundFrame {
    pub fn relay(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn joined(room: &str) -> Self {
        Self::relay("joined", Value::String(room.to_string()))
    }

    pub fn terminate() -> Self {
        Self::relay("terminate", Value::Bool(true))
    }

    pub fn status(status: SessionStatus) -> Self {
        Self::relay("status", Value::String(status.to_string()))
    }

    pub fn tokens(total: i64) -> Self {
        Self::relay("tokens", Value::from(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_room_carries_bare_room() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"join_room","data":"aaaaaaaaaaaaaaaaaaaaaaaa"}"#)
                .unwrap();
        match event {
            ClientEvent::JoinRoom(room) => assert_eq!(room, "aaaaaaaaaaaaaaaaaaaaaaaa"),
            other => panic!("Expected JoinRoom, got {:?}", other),
        }
    }

    #[test]
    fn unknown_event_is_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"explode","data":{}}"#).is_err());
    }

    #[test]
    fn bare_text_message() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "message",
            "data": { "room": "r", "message": "hello" }
        }))
        .unwrap();
        let ClientEvent::Message(payload) = event else {
            panic!("Expected Message");
        };
        let msg = payload.message.into_structured().unwrap();
        assert_eq!(msg.kind.as_deref(), Some("text"));
        assert_eq!(msg.text, json!("hello"));
    }

    #[test]
    fn structured_message_fields() {
        let payload: MessagePayload = serde_json::from_value(json!({
            "room": "r",
            "authorName": "Agent",
            "isFeedback": true,
            "custom": 7,
            "message": {
                "type": "code",
                "text": "fn main() {}",
                "language": "rust",
                "chunkId": "c-1",
                "first": false,
                "tokens": 3,
                "agentName": "coder"
            }
        }))
        .unwrap();
        assert_eq!(payload.author_name.as_deref(), Some("Agent"));
        assert_eq!(payload.is_feedback, Some(true));
        assert_eq!(payload.extra.get("custom"), Some(&json!(7)));

        let msg = payload.message.into_structured().unwrap();
        assert!(msg.is_code());
        assert!(msg.is_continuation());
        assert_eq!(msg.chunk_id.as_deref(), Some("c-1"));
        assert_eq!(msg.tokens, Some(3));
        assert_eq!(msg.extra.get("agentName"), Some(&json!("coder")));
    }

    #[test]
    fn integral_floats_are_accepted() {
        let msg: StructuredMessage =
            serde_json::from_value(json!({ "text": "x", "tokens": 2.0, "timestamp": 5.0 }))
                .unwrap();
        assert_eq!(msg.tokens, Some(2));
        assert_eq!(msg.timestamp, Some(5));
    }

    #[test]
    fn ill_shaped_object_is_rejected() {
        for message in [
            json!({ "text": "x", "tokens": 2.5 }),
            json!({ "text": "x", "timestamp": 1.5 }),
            json!({ "text": "x", "chunkId": 7 }),
            json!({ "text": "x", "first": "no" }),
        ] {
            let payload: MessagePayload =
                serde_json::from_value(json!({ "room": "r", "message": message.clone() }))
                    .unwrap();
            assert!(
                payload.message.into_structured().is_err(),
                "accepted {message}"
            );
        }
    }

    #[test]
    fn unknown_fields_survive_echo() {
        let input = json!({
            "type": "text",
            "text": "hi",
            "agentName": "coder"
        });
        let msg: StructuredMessage = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(serde_json::to_value(&msg).unwrap(), input);
    }

    #[test]
    fn complete_payload() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "message_complete",
            "data": {
                "room": "r",
                "message": { "chunkId": "c-1", "text": "done", "deltaTokens": 4 }
            }
        }))
        .unwrap();
        let ClientEvent::MessageComplete(payload) = event else {
            panic!("Expected MessageComplete");
        };
        assert_eq!(payload.message.chunk_id.as_deref(), Some("c-1"));
        assert_eq!(payload.message.delta_tokens, Some(4));
        assert!(payload.message.code_blocks.is_none());
    }

    #[test]
    fn outbound_frames() {
        assert_eq!(
            serde_json::to_value(OutboundFrame::terminate()).unwrap(),
            json!({ "event": "terminate", "data": true })
        );
        assert_eq!(
            serde_json::to_value(OutboundFrame::status(SessionStatus::Waiting)).unwrap(),
            json!({ "event": "status", "data": "waiting" })
        );
        assert_eq!(OutboundFrame::tokens(42).data, json!(42));
        assert_eq!(OutboundFrame::joined("abc").data, json!("abc"));
    }
}
