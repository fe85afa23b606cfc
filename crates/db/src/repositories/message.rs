use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use portline_core::domain::conversation::ConversationKey;
use portline_core::domain::message::{ChatMessage, MessageId, MessageType, NewMessage};

use super::{format_timestamp, parse_timestamp, MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(
        &self,
        key: &ConversationKey,
        messages: Vec<NewMessage>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        // the order is read inside each INSERT so the transaction holds the
        // write lock from its first statement
        let mut tx = self.pool.begin().await?;
        let mut written = Vec::with_capacity(messages.len());
        for message in messages {
            let metadata_json = serde_json::to_string(&message.metadata).map_err(|error| {
                RepositoryError::Decode(format!("metadata encode failed: {error}"))
            })?;
            let id = MessageId(Uuid::new_v4().to_string());

            let order_index: i64 = sqlx::query(
                "INSERT INTO chat_message (
                    id,
                    conversation_key,
                    message_type,
                    content,
                    metadata_json,
                    message_order,
                    created_at
                 ) VALUES (
                    ?, ?, ?, ?, ?,
                    (SELECT COALESCE(MAX(message_order), -1) + 1
                     FROM chat_message
                     WHERE conversation_key = ?),
                    ?
                 )
                 RETURNING message_order",
            )
            .bind(&id.0)
            .bind(key.as_str())
            .bind(message.message_type.as_str())
            .bind(&message.content)
            .bind(metadata_json)
            .bind(key.as_str())
            .bind(format_timestamp(now))
            .fetch_one(&mut *tx)
            .await?
            .try_get("message_order")?;

            written.push(ChatMessage {
                id,
                conversation_key: key.clone(),
                message_type: message.message_type,
                content: message.content,
                metadata: message.metadata,
                order_index,
                created_at: now,
            });
        }
        tx.commit().await?;

        Ok(written)
    }

    async fn recent(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, conversation_key, message_type, content, metadata_json, message_order, created_at
             FROM (
                SELECT *
                FROM chat_message
                WHERE conversation_key = ?
                ORDER BY message_order DESC
                LIMIT ?
             )
             ORDER BY message_order ASC",
        )
        .bind(key.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn count(&self, key: &ConversationKey) -> Result<u64, RepositoryError> {
        let count: i64 =
            sqlx::query("SELECT COUNT(*) AS count FROM chat_message WHERE conversation_key = ?")
                .bind(key.as_str())
                .fetch_one(&self.pool)
                .await?
                .try_get("count")?;
        Ok(count.max(0) as u64)
    }

    async fn clear(&self, key: &ConversationKey) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM chat_message WHERE conversation_key = ?")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn message_from_row(row: SqliteRow) -> Result<ChatMessage, RepositoryError> {
    let type_raw = row.try_get::<String, _>("message_type")?;
    let message_type = MessageType::from_str(&type_raw)
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    let metadata_raw = row.try_get::<String, _>("metadata_json")?;
    let metadata: BTreeMap<String, Value> = serde_json::from_str(&metadata_raw)
        .map_err(|error| RepositoryError::Decode(format!("invalid metadata_json: {error}")))?;

    Ok(ChatMessage {
        id: MessageId(row.try_get("id")?),
        conversation_key: ConversationKey(row.try_get("conversation_key")?),
        message_type,
        content: row.try_get("content")?,
        metadata,
        order_index: row.try_get("message_order")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use portline_core::domain::conversation::ConversationKey;
    use portline_core::domain::message::{MessageType, NewMessage};

    use super::SqlMessageRepository;
    use crate::repositories::MessageRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn append_assigns_gap_free_order_per_conversation() {
        let pool = setup_pool().await;
        let repo = SqlMessageRepository::new(pool.clone());
        let first = ConversationKey::new("525511111111");
        let second = ConversationKey::new("525522222222");

        repo.append(
            &first,
            vec![NewMessage::user("Hola"), NewMessage::assistant("¡Hola! ¿En qué te ayudo?")],
            Utc::now(),
        )
        .await
        .expect("append first turn");
        repo.append(&second, vec![NewMessage::user("Quiero un chip")], Utc::now())
            .await
            .expect("append other conversation");
        let written = repo
            .append(
                &first,
                vec![NewMessage::user("Quiero portarme").with_metadata("channel", "whatsapp")],
                Utc::now(),
            )
            .await
            .expect("append second turn");

        assert_eq!(written[0].order_index, 2);
        let history = repo.recent(&first, 50).await.expect("history");
        let orders: Vec<i64> = history.iter().map(|message| message.order_index).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        assert_eq!(history[1].message_type, MessageType::Assistant);
        assert_eq!(
            history[2].metadata.get("channel").and_then(|value| value.as_str()),
            Some("whatsapp")
        );
        assert_eq!(repo.count(&second).await.expect("count"), 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn recent_returns_newest_window_oldest_first() {
        let pool = setup_pool().await;
        let repo = SqlMessageRepository::new(pool.clone());
        let key = ConversationKey::new("525533333333");

        let batch = (0..5).map(|index| NewMessage::user(format!("mensaje {index}"))).collect();
        repo.append(&key, batch, Utc::now()).await.expect("append");

        let window = repo.recent(&key, 2).await.expect("recent");
        let contents: Vec<&str> = window.iter().map(|message| message.content.as_str()).collect();
        assert_eq!(contents, vec!["mensaje 3", "mensaje 4"]);

        assert_eq!(repo.clear(&key).await.expect("clear"), 5);
        assert_eq!(repo.count(&key).await.expect("count"), 0);

        let restarted = repo
            .append(&key, vec![NewMessage::user("de nuevo")], Utc::now())
            .await
            .expect("append after clear");
        assert_eq!(restarted[0].order_index, 0);

        pool.close().await;
    }

    #[tokio::test]
    async fn concurrent_appends_on_a_file_database_keep_every_message() {
        let dir = tempfile::tempdir().expect("temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("portline.db").display());
        let pool = connect_with_settings(&url, 8, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = Arc::new(SqlMessageRepository::new(pool.clone()));
        let key = ConversationKey::new("525544444444");

        let mut tasks = Vec::new();
        for turn in 0..8 {
            let repo = Arc::clone(&repo);
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                repo.append(
                    &key,
                    vec![
                        NewMessage::user(format!("pregunta {turn}")),
                        NewMessage::assistant(format!("respuesta {turn}")),
                    ],
                    Utc::now(),
                )
                .await
            }));
        }
        for task in tasks {
            task.await.expect("join").expect("append should not fail under contention");
        }

        let history = repo.recent(&key, 100).await.expect("history");
        let orders: Vec<i64> = history.iter().map(|message| message.order_index).collect();
        assert_eq!(orders, (0..16).collect::<Vec<i64>>());

        pool.close().await;
    }
}
