use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use portline_core::domain::conversation::{Conversation, ConversationKey};
use portline_core::domain::message::{ChatMessage, MessageId, NewMessage};

use super::{ConversationRepository, MessageRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<String, Conversation>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_by_key(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(key.as_str()).cloned())
    }

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        let created_at = conversations
            .get(conversation.key.as_str())
            .map(|existing| existing.created_at)
            .unwrap_or(conversation.created_at);
        conversations
            .insert(conversation.key.0.clone(), Conversation { created_at, ..conversation });
        Ok(())
    }

    async fn list_inactive_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        let mut inactive: Vec<Conversation> = conversations
            .values()
            .filter(|conversation| conversation.active && conversation.updated_at < cutoff)
            .cloned()
            .collect();
        inactive.sort_by_key(|conversation| conversation.updated_at);
        Ok(inactive)
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        Ok(self.conversations.read().await.len() as u64)
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(
        &self,
        key: &ConversationKey,
        messages: Vec<NewMessage>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let mut log = self.messages.write().await;
        let entries = log.entry(key.0.clone()).or_default();
        let next = entries.last().map(|message| message.order_index + 1).unwrap_or(0);

        let written: Vec<ChatMessage> = messages
            .into_iter()
            .enumerate()
            .map(|(offset, message)| ChatMessage {
                id: MessageId(Uuid::new_v4().to_string()),
                conversation_key: key.clone(),
                message_type: message.message_type,
                content: message.content,
                metadata: message.metadata,
                order_index: next + offset as i64,
                created_at: now,
            })
            .collect();
        entries.extend(written.iter().cloned());
        Ok(written)
    }

    async fn recent(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let log = self.messages.read().await;
        let entries = log.get(key.as_str()).map(Vec::as_slice).unwrap_or_default();
        Ok(entries[entries.len().saturating_sub(limit)..].to_vec())
    }

    async fn count(&self, key: &ConversationKey) -> Result<u64, RepositoryError> {
        let log = self.messages.read().await;
        Ok(log.get(key.as_str()).map(Vec::len).unwrap_or(0) as u64)
    }

    async fn clear(&self, key: &ConversationKey) -> Result<u64, RepositoryError> {
        let mut log = self.messages.write().await;
        Ok(log.remove(key.as_str()).map(|entries| entries.len()).unwrap_or(0) as u64)
    }
}
