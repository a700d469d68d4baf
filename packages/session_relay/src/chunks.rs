//! Chunk reassembly: turning inbound chat payloads into persisted messages.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{RelayError, RelayResult};
use crate::models::{ChatMessage, Chunk, RoomId, Session};
use crate::repository::RelayRepository;
use crate::ws::protocol::{MessagePayload, StructuredMessage};

pub const DEFAULT_EVENT: &str = "message";

/// The message as echoed to the room and stored with the record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayedMessage {
    pub room: String,
    pub event: String,
    pub message: StructuredMessage,
    /// Set when a human (not the backend) sent it.
    pub incoming: bool,
    pub author_name: String,
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_feedback: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_message: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RelayedMessage {
    pub fn is_feedback(&self) -> bool {
        self.is_feedback.unwrap_or(false)
    }

    pub fn to_value(&self) -> RelayResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// The streamed increment this message carries.
    pub fn chunk(&self) -> Chunk {
        Chunk {
            ts: self.ts,
            text: self.message.text.clone(),
            tokens: self.message.tokens.unwrap_or(0).max(0),
        }
    }
}

/// Normalize an inbound payload.
///
/// Bare values become `text` messages, the timestamp defaults to `now_ms`,
/// and a `code` message whose language is `json` or whose text starts with
/// `{` has its text parsed into a JSON value.
pub fn normalize(
    payload: MessagePayload,
    incoming: bool,
    default_author: &str,
    now_ms: i64,
) -> RelayResult<RelayedMessage> {
    let mut message = payload
        .message
        .into_structured()
        .map_err(|e| RelayError::MalformedInput(format!("malformed message: {e}")))?;
    let ts = message.timestamp.unwrap_or(now_ms);

    if message.is_code() {
        parse_json_code(&mut message)?;
    }

    let author_name = payload
        .author_name
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| default_author.to_string());

    // Fields the relay sets itself are not taken from the peer
    let mut extra = payload.extra;
    extra.remove("incoming");
    extra.remove("ts");

    Ok(RelayedMessage {
        room: payload.room,
        event: payload
            .event
            .filter(|event| !event.is_empty())
            .unwrap_or_else(|| DEFAULT_EVENT.to_string()),
        message,
        incoming,
        author_name,
        ts,
        is_feedback: payload.is_feedback,
        display_message: payload.display_message,
        extra,
    })
}

fn parse_json_code(message: &mut StructuredMessage) -> RelayResult<()> {
    let Value::String(text) = &message.text else {
        return Ok(());
    };
    let declared_json = message.language.as_deref() == Some("json");
    if declared_json || text.starts_with('{') {
        message.text = serde_json::from_str(text)?;
        message.language = Some("json".to_string());
    }
    Ok(())
}

/// What to do with the persisted record for one inbound message.
#[derive(Debug, Clone)]
pub enum ChunkAction {
    /// Start a new record.
    Create(Box<ChatMessage>),
    /// Append to the record started under `chunk_id`.
    Continue { chunk_id: String, chunk: Chunk },
    /// A continuation without a `chunkId`; nothing can be updated.
    Orphan,
}

impl ChunkAction {
    pub fn plan(
        session: &Session,
        relayed: &RelayedMessage,
        author_id: Option<&str>,
    ) -> RelayResult<Self> {
        let chunk = relayed.chunk();
        if relayed.message.is_continuation() {
            return Ok(match &relayed.message.chunk_id {
                Some(chunk_id) => Self::Continue {
                    chunk_id: chunk_id.clone(),
                    chunk,
                },
                None => Self::Orphan,
            });
        }

        let single = relayed.message.single.unwrap_or(false);
        Ok(Self::Create(Box::new(ChatMessage {
            id: None,
            org_id: session.org_id.clone(),
            team_id: session.team_id.clone(),
            session_id: session.id.clone(),
            session_type: session.kind.clone(),
            author_id: author_id.map(String::from),
            author_name: relayed.author_name.clone(),
            ts: relayed.ts,
            message_type: relayed
                .message
                .kind
                .clone()
                .unwrap_or_else(|| "text".to_string()),
            message: relayed.to_value()?,
            is_feedback: relayed.is_feedback(),
            chunk_id: relayed.message.chunk_id.clone(),
            tokens: chunk.tokens,
            display_message: relayed.display_message.clone(),
            chunks: if single { Vec::new() } else { vec![chunk] },
            code_blocks: None,
            completed: false,
        })))
    }

    /// Persist. Returns the session's new token total when a chunk was appended.
    pub async fn apply(
        self,
        repository: &RelayRepository,
        room: &RoomId,
    ) -> RelayResult<Option<i64>> {
        match self {
            Self::Create(record) => {
                if repository.insert_chat_message(&record).await?.is_none() {
                    debug!(
                        room = %room,
                        chunk_id = record.chunk_id.as_deref().unwrap_or(""),
                        "Duplicate first chunk ignored"
                    );
                }
                Ok(None)
            }
            Self::Continue { chunk_id, chunk } => {
                let total = repository
                    .append_chunk(room.as_str(), &chunk_id, &chunk)
                    .await?;
                if total.is_none() {
                    warn!(room = %room, chunk_id = %chunk_id, "Continuation for unknown message");
                }
                Ok(total)
            }
            Self::Orphan => {
                warn!(room = %room, "Continuation without chunkId");
                Ok(None)
            }
        }
    }
}
