use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::fmt;

use crate::status::SessionStatus;

/// Length of a session id: a 12-byte object id rendered as hex.
pub const ROOM_ID_LEN: usize = 24;

/// Prefix that turns a session room into its shadow room.
pub const SHADOW_ROOM_PREFIX: char = '_';

// === Rooms ===

/// A validated session id, doubling as the name of the session's public room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Accepts exactly 24 ASCII hex digits.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.len() == ROOM_ID_LEN && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    /// Parse a shadow room name (`_<room>`) back into its session id.
    pub fn parse_shadow(raw: &str) -> Option<Self> {
        raw.strip_prefix(SHADOW_ROOM_PREFIX).and_then(Self::parse)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn shadow(&self) -> String {
        format!("{SHADOW_ROOM_PREFIX}{}", self.0)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RoomId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RoomId::parse(&value).ok_or_else(|| format!("invalid room id: {value}"))
    }
}

impl From<RoomId> for String {
    fn from(room: RoomId) -> Self {
        room.0
    }
}

// === Accounts ===

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub email: String,
    pub current_team: Option<String>,
    pub created_at: i64,
}

// === Sessions ===

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub org_id: String,
    pub team_id: String,
    /// Conversation kind, e.g. "task" or "rapid".
    #[serde(rename = "type")]
    pub kind: String,
    pub status: SessionStatus,
    pub tokens_used: i64,
    pub updated_at: i64,
}

// === Chat messages ===

/// One increment of streamed output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub ts: i64,
    pub text: Value,
    #[serde(default)]
    pub tokens: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Option<i64>,
    pub org_id: String,
    pub team_id: String,
    pub session_id: String,
    /// Kind of the owning session at the time the message was written.
    pub session_type: String,
    /// `None` when the backend authored the message.
    pub author_id: Option<String>,
    pub author_name: String,
    /// Caller-supplied creation time in epoch milliseconds.
    pub ts: i64,
    /// `text` or `code`.
    #[serde(rename = "type")]
    pub message_type: String,
    /// The relayed payload as broadcast to the room.
    pub message: Value,
    pub is_feedback: bool,
    pub chunk_id: Option<String>,
    pub tokens: i64,
    pub display_message: Option<Value>,
    pub chunks: Vec<Chunk>,
    pub code_blocks: Option<Value>,
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_accepts_24_hex() {
        let room = RoomId::parse("65f1c0ffee0123456789abcd").unwrap();
        assert_eq!(room.as_str(), "65f1c0ffee0123456789abcd");
        assert_eq!(room.to_string(), "65f1c0ffee0123456789abcd");
    }

    #[test]
    fn room_id_rejects_wrong_length() {
        assert!(RoomId::parse("").is_none());
        assert!(RoomId::parse("abc").is_none());
        assert!(RoomId::parse("65f1c0ffee0123456789abc").is_none());
        assert!(RoomId::parse("65f1c0ffee0123456789abcde").is_none());
    }

    #[test]
    fn room_id_rejects_non_hex() {
        assert!(RoomId::parse("zzzzzzzzzzzzzzzzzzzzzzzz").is_none());
        // Multi-byte chars must not sneak past a byte-length check
        assert!(RoomId::parse("ééééééééééee").is_none());
    }

    #[test]
    fn shadow_room_roundtrip() {
        let room = RoomId::parse("aaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        let shadow = room.shadow();
        assert_eq!(shadow, "_aaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(RoomId::parse_shadow(&shadow), Some(room));
        assert!(RoomId::parse_shadow("aaaaaaaaaaaaaaaaaaaaaaaa").is_none());
    }

    #[test]
    fn room_id_serde() {
        let room: RoomId = serde_json::from_str("\"aaaaaaaaaaaaaaaaaaaaaaaa\"").unwrap();
        assert_eq!(
            serde_json::to_string(&room).unwrap(),
            "\"aaaaaaaaaaaaaaaaaaaaaaaa\""
        );
        assert!(serde_json::from_str::<RoomId>("\"short\"").is_err());
    }

    #[test]
    fn chunk_tokens_default_to_zero() {
        let chunk: Chunk = serde_json::from_str(r#"{"ts": 5, "text": "hi"}"#).unwrap();
        assert_eq!(chunk.tokens, 0);
        assert_eq!(chunk.text, Value::String("hi".into()));
    }
}
