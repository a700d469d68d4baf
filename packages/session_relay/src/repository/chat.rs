use anyhow::{Context, Result};
use serde_json::Value;

use crate::models::{ChatMessage, Chunk};

use super::RelayRepository;
use super::sessions::add_session_tokens;

impl RelayRepository {
    /// Insert a new message. Returns `None` when a message with the same
    /// `(session_id, chunk_id)` already exists, so a re-sent first chunk
    /// never produces a duplicate.
    pub async fn insert_chat_message(&self, msg: &ChatMessage) -> Result<Option<i64>> {
        let message = serde_json::to_string(&msg.message)?;
        let chunks = serde_json::to_string(&msg.chunks)?;
        let display_message = msg
            .display_message
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let code_blocks = msg
            .code_blocks
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO chat_messages (
                org_id, team_id, session_id, session_type, author_id, author_name, ts,
                message_type, message, is_feedback, chunk_id, tokens, display_message,
                chunks, code_blocks, completed
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (session_id, chunk_id) WHERE chunk_id IS NOT NULL DO NOTHING
            "#,
        )
        .bind(&msg.org_id)
        .bind(&msg.team_id)
        .bind(&msg.session_id)
        .bind(&msg.session_type)
        .bind(&msg.author_id)
        .bind(&msg.author_name)
        .bind(msg.ts)
        .bind(&msg.message_type)
        .bind(message)
        .bind(msg.is_feedback)
        .bind(&msg.chunk_id)
        .bind(msg.tokens)
        .bind(display_message)
        .bind(chunks)
        .bind(code_blocks)
        .bind(msg.completed)
        .execute(&self.pool)
        .await
        .context("Failed to insert chat message")?;

        if result.rows_affected() == 0 {
            Ok(None)
        } else {
            Ok(Some(result.last_insert_rowid()))
        }
    }

    /// Append a chunk to the message identified by `(session_id, chunk_id)` and
    /// add its tokens to the session counter, in one transaction.
    ///
    /// Returns the session's new token total, or `None` if no such message
    /// exists (nothing is written in that case).
    pub async fn append_chunk(
        &self,
        session_id: &str,
        chunk_id: &str,
        chunk: &Chunk,
    ) -> Result<Option<i64>> {
        let chunk_json = serde_json::to_string(chunk)?;
        let tokens = chunk.tokens.max(0);
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE chat_messages
            SET chunks = json_insert(chunks, '$[#]', json(?)),
                tokens = tokens + ?
            WHERE session_id = ? AND chunk_id = ?
            "#,
        )
        .bind(chunk_json)
        .bind(tokens)
        .bind(session_id)
        .bind(chunk_id)
        .execute(&mut *tx)
        .await
        .context("Failed to append chunk")?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        let total = add_session_tokens(&mut tx, session_id, tokens)
            .await?
            .context("Message has no session to account tokens to")?;

        tx.commit().await?;
        Ok(Some(total))
    }

    /// Finalize a streamed message with its complete text and code blocks and
    /// apply the closing token delta to both the message and the session.
    ///
    /// Returns the session's new token total, or `None` if no such message exists.
    pub async fn complete_message(
        &self,
        session_id: &str,
        chunk_id: &str,
        text: &str,
        code_blocks: Option<&Value>,
        delta_tokens: i64,
    ) -> Result<Option<i64>> {
        let code_blocks = code_blocks.map(serde_json::to_string).transpose()?;
        let delta = delta_tokens.max(0);
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE chat_messages
            SET message = json_set(message, '$.message.text', ?),
                code_blocks = COALESCE(json(?), code_blocks),
                tokens = tokens + ?,
                completed = 1
            WHERE session_id = ? AND chunk_id = ?
            "#,
        )
        .bind(text)
        .bind(code_blocks)
        .bind(delta)
        .bind(session_id)
        .bind(chunk_id)
        .execute(&mut *tx)
        .await
        .context("Failed to complete message")?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        let total = add_session_tokens(&mut tx, session_id, delta)
            .await?
            .context("Message has no session to account tokens to")?;

        tx.commit().await?;
        Ok(Some(total))
    }
}

#[cfg(test)]
impl RelayRepository {
    pub async fn get_chat_message_by_chunk_id(
        &self,
        session_id: &str,
        chunk_id: &str,
    ) -> Result<Option<ChatMessage>> {
        let mut messages = self.list_session_messages(session_id).await?;
        messages.retain(|m| m.chunk_id.as_deref() == Some(chunk_id));
        Ok(messages.pop())
    }

    pub async fn list_session_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>> {
        use sqlx::Row;

        let rows = sqlx::query(
            r#"
            SELECT id, org_id, team_id, session_id, session_type, author_id, author_name, ts,
                   message_type, message, is_feedback, chunk_id, tokens, display_message,
                   chunks, code_blocks, completed
            FROM chat_messages
            WHERE session_id = ?
            ORDER BY ts ASC, id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                let message: String = r.get("message");
                let chunks: String = r.get("chunks");
                let display_message: Option<String> = r.get("display_message");
                let code_blocks: Option<String> = r.get("code_blocks");
                Ok(ChatMessage {
                    id: r.get("id"),
                    org_id: r.get("org_id"),
                    team_id: r.get("team_id"),
                    session_id: r.get("session_id"),
                    session_type: r.get("session_type"),
                    author_id: r.get("author_id"),
                    author_name: r.get("author_name"),
                    ts: r.get("ts"),
                    message_type: r.get("message_type"),
                    message: serde_json::from_str(&message)?,
                    is_feedback: r.get("is_feedback"),
                    chunk_id: r.get("chunk_id"),
                    tokens: r.get("tokens"),
                    display_message: display_message
                        .as_deref()
                        .map(serde_json::from_str)
                        .transpose()?,
                    chunks: serde_json::from_str(&chunks)?,
                    code_blocks: code_blocks.as_deref().map(serde_json::from_str).transpose()?,
                    completed: r.get("completed"),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_helpers::{self, ORG, TEAM_A};
    use crate::status::SessionStatus;
    use serde_json::json;

    const SID: &str = "aaaaaaaaaaaaaaaaaaaaaaaa";

    fn make_msg(chunk_id: Option<&str>, text: &str, tokens: i64) -> ChatMessage {
        ChatMessage {
            id: None,
            org_id: ORG.to_string(),
            team_id: TEAM_A.to_string(),
            session_id: SID.to_string(),
            session_type: "task".to_string(),
            author_id: None,
            author_name: "System".to_string(),
            ts: 1_700_000_000_000,
            message_type: "text".to_string(),
            message: json!({ "room": SID, "message": { "type": "text", "text": text } }),
            is_feedback: false,
            chunk_id: chunk_id.map(String::from),
            tokens,
            display_message: None,
            chunks: vec![Chunk {
                ts: 1_700_000_000_000,
                text: json!(text),
                tokens,
            }],
            code_blocks: None,
            completed: false,
        }
    }

    async fn setup() -> RelayRepository {
        let repo = test_helpers::test_repository().await;
        test_helpers::seed_session(&repo, SID, TEAM_A, SessionStatus::Running).await;
        repo
    }

    #[tokio::test]
    async fn insert_and_read_back() {
        let repo = setup().await;
        let id = repo
            .insert_chat_message(&make_msg(Some("c-1"), "hello", 2))
            .await
            .unwrap();
        assert!(id.is_some());

        let msg = repo
            .get_chat_message_by_chunk_id(SID, "c-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.tokens, 2);
        assert_eq!(msg.chunks.len(), 1);
        assert_eq!(msg.message["message"]["text"], json!("hello"));
        assert!(!msg.completed);
    }

    #[tokio::test]
    async fn duplicate_chunk_id_is_ignored() {
        let repo = setup().await;
        assert!(
            repo.insert_chat_message(&make_msg(Some("c-1"), "a", 1))
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            repo.insert_chat_message(&make_msg(Some("c-1"), "a", 1))
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(repo.list_session_messages(SID).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn messages_without_chunk_id_never_conflict() {
        let repo = setup().await;
        repo.insert_chat_message(&make_msg(None, "a", 0))
            .await
            .unwrap();
        repo.insert_chat_message(&make_msg(None, "b", 0))
            .await
            .unwrap();
        assert_eq!(repo.list_session_messages(SID).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn append_chunk_targets_same_message() {
        let repo = setup().await;
        repo.insert_chat_message(&make_msg(Some("c-1"), "Hel", 1))
            .await
            .unwrap();
        repo.insert_chat_message(&make_msg(Some("c-2"), "other", 1))
            .await
            .unwrap();

        for (i, text) in ["lo", " wor", "ld"].iter().enumerate() {
            let chunk = Chunk {
                ts: 1_700_000_000_001 + i as i64,
                text: json!(text),
                tokens: 3,
            };
            repo.append_chunk(SID, "c-1", &chunk).await.unwrap().unwrap();
        }

        let messages = repo.list_session_messages(SID).await.unwrap();
        assert_eq!(messages.len(), 2);

        let msg = repo
            .get_chat_message_by_chunk_id(SID, "c-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.chunks.len(), 4);
        assert_eq!(msg.chunks[3].text, json!("ld"));
        assert_eq!(msg.tokens, 1 + 9);

        let other = repo
            .get_chat_message_by_chunk_id(SID, "c-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(other.chunks.len(), 1);

        let session = repo.get_session_unscoped(SID).await.unwrap().unwrap();
        assert_eq!(session.tokens_used, 9);
    }

    #[tokio::test]
    async fn append_to_missing_message_writes_nothing() {
        let repo = setup().await;
        let chunk = Chunk {
            ts: 1,
            text: json!("x"),
            tokens: 4,
        };
        assert!(repo.append_chunk(SID, "nope", &chunk).await.unwrap().is_none());
        let session = repo.get_session_unscoped(SID).await.unwrap().unwrap();
        assert_eq!(session.tokens_used, 0);
    }

    #[tokio::test]
    async fn concurrent_appends_sum_tokens() {
        let repo = setup().await;
        repo.insert_chat_message(&make_msg(Some("c-1"), "", 0))
            .await
            .unwrap();

        let handles: Vec<_> = (1..=10)
            .map(|n| {
                let repo = repo.clone();
                tokio::spawn(async move {
                    let chunk = Chunk {
                        ts: n,
                        text: json!(n.to_string()),
                        tokens: n,
                    };
                    repo.append_chunk(SID, "c-1", &chunk).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap().unwrap();
        }

        let session = repo.get_session_unscoped(SID).await.unwrap().unwrap();
        assert_eq!(session.tokens_used, 55);
        let msg = repo
            .get_chat_message_by_chunk_id(SID, "c-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.chunks.len(), 11);
    }

    #[tokio::test]
    async fn complete_message_sets_text_and_tokens() {
        let repo = setup().await;
        repo.insert_chat_message(&make_msg(Some("c-1"), "Hel", 1))
            .await
            .unwrap();

        let blocks = json!([{ "language": "rust", "code": "fn main() {}" }]);
        let total = repo
            .complete_message(SID, "c-1", "Hello world", Some(&blocks), 6)
            .await
            .unwrap();
        assert_eq!(total, Some(6));

        let msg = repo
            .get_chat_message_by_chunk_id(SID, "c-1")
            .await
            .unwrap()
            .unwrap();
        assert!(msg.completed);
        assert_eq!(msg.message["message"]["text"], json!("Hello world"));
        assert_eq!(msg.code_blocks, Some(blocks));
        assert_eq!(msg.tokens, 7);
    }

    #[tokio::test]
    async fn complete_missing_message_is_noop() {
        let repo = setup().await;
        let total = repo
            .complete_message(SID, "ghost", "text", None, 10)
            .await
            .unwrap();
        assert!(total.is_none());
        let session = repo.get_session_unscoped(SID).await.unwrap().unwrap();
        assert_eq!(session.tokens_used, 0);
    }
}
