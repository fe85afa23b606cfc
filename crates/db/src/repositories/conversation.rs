use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use portline_core::domain::context::ContextMap;
use portline_core::domain::conversation::{Conversation, ConversationKey};
use portline_core::flows::ConversationState;

use super::{format_timestamp, parse_timestamp, ConversationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlConversationRepository {
    pool: DbPool,
}

impl SqlConversationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ConversationRepository for SqlConversationRepository {
    async fn find_by_key(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                conversation_key,
                phone_number,
                current_state,
                context_json,
                is_active,
                created_at,
                updated_at
             FROM chat_conversation
             WHERE conversation_key = ?",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(conversation_from_row).transpose()
    }

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        let context_json = serde_json::to_string(&conversation.context)
            .map_err(|error| RepositoryError::Decode(format!("context encode failed: {error}")))?;

        sqlx::query(
            "INSERT INTO chat_conversation (
                conversation_key,
                phone_number,
                current_state,
                context_json,
                is_active,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(conversation_key) DO UPDATE SET
                phone_number = excluded.phone_number,
                current_state = excluded.current_state,
                context_json = excluded.context_json,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at",
        )
        .bind(conversation.key.as_str())
        .bind(conversation.phone_number.as_deref())
        .bind(conversation.state.as_str())
        .bind(context_json)
        .bind(conversation.active)
        .bind(format_timestamp(conversation.created_at))
        .bind(format_timestamp(conversation.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_inactive_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                conversation_key,
                phone_number,
                current_state,
                context_json,
                is_active,
                created_at,
                updated_at
             FROM chat_conversation
             WHERE is_active = 1 AND updated_at < ?
             ORDER BY updated_at ASC",
        )
        .bind(format_timestamp(cutoff))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(conversation_from_row).collect()
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM chat_conversation")
            .fetch_one(&self.pool)
            .await?
            .try_get("count")?;
        Ok(count.max(0) as u64)
    }
}

fn conversation_from_row(row: SqliteRow) -> Result<Conversation, RepositoryError> {
    let state_raw = row.try_get::<String, _>("current_state")?;
    let state = ConversationState::from_str(&state_raw)
        .map_err(|error| RepositoryError::Decode(error.to_string()))?;

    let context_raw = row.try_get::<String, _>("context_json")?;
    let context: ContextMap = serde_json::from_str(&context_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid context_json: {error}"))
    })?;

    Ok(Conversation {
        key: ConversationKey(row.try_get("conversation_key")?),
        phone_number: row.try_get("phone_number")?,
        state,
        context,
        active: row.try_get::<bool, _>("is_active")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};
    use serde_json::json;

    use portline_core::domain::context::{ContextKey, ContextMap};
    use portline_core::domain::conversation::{Conversation, ConversationKey};
    use portline_core::flows::ConversationState;

    use super::SqlConversationRepository;
    use crate::repositories::ConversationRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn parse_ts(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("timestamp").with_timezone(&Utc)
    }

    #[tokio::test]
    async fn sql_conversation_repo_round_trip() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());

        let mut conversation =
            Conversation::new(ConversationKey::new("525512345678"), parse_ts("2026-03-01T10:00:00Z"));
        conversation.state = ConversationState::PaymentPending;
        conversation.context = ContextMap::new()
            .with(ContextKey::CustomerId, 42)
            .with(ContextKey::PaymentCompleted, false);
        conversation.context.insert_raw("campaign", json!({"name": "verano"}));

        repo.save(conversation.clone()).await.expect("save");
        let found = repo.find_by_key(&conversation.key).await.expect("find");
        assert_eq!(found, Some(conversation.clone()));

        conversation.state = ConversationState::PaymentConfirmed;
        conversation.updated_at = parse_ts("2026-03-01T10:05:00Z");
        repo.save(conversation.clone()).await.expect("upsert");
        let found = repo.find_by_key(&conversation.key).await.expect("find").expect("present");
        assert_eq!(found.state, ConversationState::PaymentConfirmed);
        assert_eq!(found.created_at, parse_ts("2026-03-01T10:00:00Z"));
        assert_eq!(repo.count().await.expect("count"), 1);

        pool.close().await;
    }

    #[tokio::test]
    async fn missing_conversation_is_none() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let found = repo.find_by_key(&ConversationKey::new("520000000000")).await.expect("find");
        assert_eq!(found, None);
        pool.close().await;
    }

    #[tokio::test]
    async fn inactive_listing_respects_cutoff_and_active_flag() {
        let pool = setup_pool().await;
        let repo = SqlConversationRepository::new(pool.clone());
        let now = parse_ts("2026-04-30T12:00:00Z");

        let stale = Conversation::new(ConversationKey::new("520000000001"), now - Duration::days(45));
        let fresh = Conversation::new(ConversationKey::new("520000000002"), now - Duration::days(2));
        let mut closed =
            Conversation::new(ConversationKey::new("520000000003"), now - Duration::days(60));
        closed.active = false;

        for conversation in [stale.clone(), fresh, closed] {
            repo.save(conversation).await.expect("save");
        }

        let inactive =
            repo.list_inactive_since(now - Duration::days(30)).await.expect("list inactive");
        assert_eq!(inactive, vec![stale]);

        pool.close().await;
    }
}
