use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use portline_core::audit::{AuditActor, AuditContext, AuditSink, NoopAuditSink};
use portline_core::domain::context::{ContextKey, ContextMap};
use portline_core::domain::conversation::{Conversation, ConversationKey, ConversationStats};
use portline_core::domain::message::{ChatMessage, NewMessage};
use portline_core::errors::ApplicationError;
use portline_core::flows::{ConversationState, OrdinalTransitionPolicy, StateMachine, TransitionPolicy};
use portline_db::{ConversationRepository, MessageRepository, RepositoryError};

use crate::locks::KeyLocks;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<ConversationError> for ApplicationError {
    fn from(value: ConversationError) -> Self {
        ApplicationError::Persistence(value.to_string())
    }
}

/// Durable conversation state, context and message log.
///
/// Every read-modify-write on a conversation runs under that conversation's
/// lock, so concurrent turns or API calls for one key never interleave.
pub struct ConversationService {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    machine: StateMachine<Box<dyn TransitionPolicy>>,
    audit: Arc<dyn AuditSink>,
    locks: KeyLocks,
}

impl ConversationService {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
    ) -> Self {
        Self {
            conversations,
            messages,
            machine: StateMachine::new(Box::new(OrdinalTransitionPolicy)),
            audit: Arc::new(NoopAuditSink),
            locks: KeyLocks::default(),
        }
    }

    pub fn with_policy(mut self, policy: Box<dyn TransitionPolicy>) -> Self {
        self.machine = StateMachine::new(policy);
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn is_valid_transition(&self, from: ConversationState, to: ConversationState) -> bool {
        self.machine.is_valid_transition(from, to)
    }

    pub async fn load(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<Conversation>, ConversationError> {
        Ok(self.conversations.find_by_key(key).await?)
    }

    /// `INITIAL` for conversations that were never persisted.
    pub async fn current_state(
        &self,
        key: &ConversationKey,
    ) -> Result<ConversationState, ConversationError> {
        Ok(self.load(key).await?.map(|conversation| conversation.state).unwrap_or_default())
    }

    pub async fn transition_to(
        &self,
        key: &ConversationKey,
        to: ConversationState,
    ) -> Result<bool, ConversationError> {
        self.transition_by(key, to, AuditActor::System).await
    }

    /// Applies the transition if the policy allows it. Rejections are not errors.
    pub async fn transition_by(
        &self,
        key: &ConversationKey,
        to: ConversationState,
        actor: AuditActor,
    ) -> Result<bool, ConversationError> {
        let audit = AuditContext::new(key.clone(), actor);
        self.update(key, true, |conversation| {
            let from = conversation.state;
            match self.machine.apply_with_audit(from, to, self.audit.as_ref(), &audit) {
                Ok(outcome) => {
                    conversation.state = outcome.to;
                    info!(
                        event_name = "state.transition_applied",
                        conversation_key = %key.masked(),
                        actor = %actor,
                        from = %from,
                        to = %to,
                        "conversation state updated"
                    );
                    (true, true)
                }
                Err(error) => {
                    warn!(
                        event_name = "state.transition_rejected",
                        conversation_key = %key.masked(),
                        actor = %actor,
                        from = %from,
                        to = %to,
                        error = %error,
                        "conversation state unchanged"
                    );
                    (false, false)
                }
            }
        })
        .await
    }

    pub async fn store_context(
        &self,
        key: &ConversationKey,
        context_key: ContextKey,
        value: impl Into<Value>,
    ) -> Result<(), ConversationError> {
        let value = value.into();
        self.update(key, true, move |conversation| {
            conversation.context.insert(context_key, value);
            ((), true)
        })
        .await
    }

    /// Merges `entries` over the stored context, keeping unrelated keys.
    pub async fn store_context_map(
        &self,
        key: &ConversationKey,
        entries: ContextMap,
    ) -> Result<(), ConversationError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.update(key, true, move |conversation| {
            conversation.context.merge(entries);
            ((), true)
        })
        .await
    }

    pub async fn get_context(
        &self,
        key: &ConversationKey,
        context_key: ContextKey,
    ) -> Result<Option<Value>, ConversationError> {
        Ok(self
            .load(key)
            .await?
            .and_then(|conversation| conversation.context.get(context_key).cloned())
            .filter(|value| !value.is_null()))
    }

    pub async fn all_context(&self, key: &ConversationKey) -> Result<ContextMap, ConversationError> {
        Ok(self.load(key).await?.map(|conversation| conversation.context).unwrap_or_default())
    }

    /// Stores the failure and bumps `error_count`.
    pub async fn record_error(
        &self,
        key: &ConversationKey,
        tool: &str,
        message: &str,
    ) -> Result<i64, ConversationError> {
        let now = Utc::now();
        self.update(key, true, |conversation| {
            let count = conversation.context.i64(ContextKey::ErrorCount).unwrap_or(0) + 1;
            conversation.context.insert(ContextKey::LastError, message);
            conversation.context.insert(ContextKey::ErrorTimestamp, now.timestamp_millis());
            conversation.context.insert(ContextKey::FailedTool, tool);
            conversation.context.insert(ContextKey::ErrorCount, count);
            (count, true)
        })
        .await
    }

    pub async fn clear_error_context(&self, key: &ConversationKey) -> Result<bool, ConversationError> {
        self.update_existing(key, true, |conversation| {
            let mut removed = false;
            for error_key in ContextKey::ERROR_TRACKING {
                removed |= conversation.context.remove(error_key).is_some();
            }
            (removed, removed)
        })
        .await
        .map(|removed| removed.unwrap_or(false))
    }

    /// In `ERROR_STATE` with a recorded `last_error`.
    pub async fn is_retry_attempt(&self, key: &ConversationKey) -> Result<bool, ConversationError> {
        Ok(self.load(key).await?.is_some_and(|conversation| {
            conversation.state == ConversationState::ErrorState
                && conversation.context.contains(ContextKey::LastError)
        }))
    }

    pub async fn recover_from_error(
        &self,
        key: &ConversationKey,
        target: ConversationState,
    ) -> Result<bool, ConversationError> {
        self.clear_error_context(key).await?;
        let recovered = self.transition_to(key, target).await?;
        if !recovered {
            warn!(
                event_name = "state.recovery_rejected",
                conversation_key = %key.masked(),
                target = %target,
                "conversation could not leave error state"
            );
        }
        Ok(recovered)
    }

    /// Back to `INITIAL` with empty context and message log.
    pub async fn reset(&self, key: &ConversationKey) -> Result<(), ConversationError> {
        let _guard = self.locks.acquire(key).await;

        self.update_existing_locked(key, true, |conversation| {
            conversation.state = ConversationState::Initial;
            conversation.context = ContextMap::new();
            ((), true)
        })
        .await?;
        let cleared = self.messages.clear(key).await?;
        info!(
            event_name = "state.conversation_reset",
            conversation_key = %key.masked(),
            cleared_messages = cleared,
            "conversation reset"
        );
        Ok(())
    }

    pub async fn stats(
        &self,
        key: &ConversationKey,
    ) -> Result<Option<ConversationStats>, ConversationError> {
        let Some(conversation) = self.load(key).await? else {
            return Ok(None);
        };
        let message_count = self.messages.count(key).await?;
        Ok(Some(ConversationStats {
            conversation_key: conversation.key,
            current_state: conversation.state,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            active: conversation.active,
            message_count,
        }))
    }

    pub async fn append_messages(
        &self,
        key: &ConversationKey,
        messages: Vec<NewMessage>,
    ) -> Result<Vec<ChatMessage>, ConversationError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let _guard = self.locks.acquire(key).await;

        let now = Utc::now();
        self.upsert_locked(key, true, |_| ((), true)).await?;
        Ok(self.messages.append(key, messages, now).await?)
    }

    pub async fn history(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ConversationError> {
        Ok(self.messages.recent(key, limit).await?)
    }

    pub async fn list_inactive_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Conversation>, ConversationError> {
        Ok(self.conversations.list_inactive_since(cutoff).await?)
    }

    /// Context rewrite that keeps `updated_at`, so housekeeping never looks like activity.
    pub(crate) async fn rewrite_context_untouched<R>(
        &self,
        key: &ConversationKey,
        apply: impl FnOnce(&mut ContextMap) -> (R, bool),
    ) -> Result<Option<R>, ConversationError> {
        self.update_existing(key, false, |conversation| apply(&mut conversation.context)).await
    }

    /// Loads or creates the conversation, applies `apply`, and saves when it
    /// reports a change or the record is new.
    async fn update<R>(
        &self,
        key: &ConversationKey,
        touch: bool,
        apply: impl FnOnce(&mut Conversation) -> (R, bool),
    ) -> Result<R, ConversationError> {
        let _guard = self.locks.acquire(key).await;
        self.upsert_locked(key, touch, apply).await
    }

    /// Body of `update`; the caller holds the key's lock.
    async fn upsert_locked<R>(
        &self,
        key: &ConversationKey,
        touch: bool,
        apply: impl FnOnce(&mut Conversation) -> (R, bool),
    ) -> Result<R, ConversationError> {
        let now = Utc::now();
        let (mut conversation, created) = match self.conversations.find_by_key(key).await? {
            Some(conversation) => (conversation, false),
            None => (Conversation::new(key.clone(), now), true),
        };

        let (result, changed) = apply(&mut conversation);
        if changed || created {
            if changed && touch {
                conversation.touch(now);
            }
            self.conversations.save(conversation).await?;
        }
        Ok(result)
    }

    async fn update_existing<R>(
        &self,
        key: &ConversationKey,
        touch: bool,
        apply: impl FnOnce(&mut Conversation) -> (R, bool),
    ) -> Result<Option<R>, ConversationError> {
        let _guard = self.locks.acquire(key).await;
        self.update_existing_locked(key, touch, apply).await
    }

    async fn update_existing_locked<R>(
        &self,
        key: &ConversationKey,
        touch: bool,
        apply: impl FnOnce(&mut Conversation) -> (R, bool),
    ) -> Result<Option<R>, ConversationError> {
        let Some(mut conversation) = self.conversations.find_by_key(key).await? else {
            return Ok(None);
        };
        let (result, changed) = apply(&mut conversation);
        if changed {
            if touch {
                conversation.touch(Utc::now());
            }
            self.conversations.save(conversation).await?;
        }
        Ok(Some(result))
    }
}
