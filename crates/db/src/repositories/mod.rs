use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use portline_core::domain::conversation::{Conversation, ConversationKey};
use portline_core::domain::message::{ChatMessage, NewMessage};

pub mod conversation;
pub mod memory;
pub mod message;

pub use conversation::SqlConversationRepository;
pub use memory::{InMemoryConversationRepository, InMemoryMessageRepository};
pub use message::SqlMessageRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn find_by_key(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<Conversation>, RepositoryError>;

    /// Inserts or replaces the record, including `updated_at` exactly as given.
    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError>;

    /// Active conversations whose last update is strictly before `cutoff`.
    async fn list_inactive_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Conversation>, RepositoryError>;

    async fn count(&self) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Appends in order, assigning the next gap-free indices for the conversation.
    async fn append(
        &self,
        key: &ConversationKey,
        messages: Vec<NewMessage>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChatMessage>, RepositoryError>;

    /// The newest `limit` messages, oldest first.
    async fn recent(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RepositoryError>;

    async fn count(&self, key: &ConversationKey) -> Result<u64, RepositoryError>;

    async fn clear(&self, key: &ConversationKey) -> Result<u64, RepositoryError>;
}

/// Fixed-width UTC form so lexical order in SQL matches chronological order.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
