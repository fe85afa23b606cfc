use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{error, info};

use portline_core::domain::context::{ContextKey, ContextMap};
use portline_core::domain::conversation::ConversationKey;

use crate::state::{ConversationError, ConversationService};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub scanned: usize,
    pub cleaned: usize,
    pub failed: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CleanupStats {
    pub total_old_conversations: usize,
    pub pending_cleanup: usize,
    pub already_cleaned: usize,
    pub retention_days: u32,
    pub cutoff_date: DateTime<Utc>,
}

/// Purges PII from conversations idle longer than the retention window.
///
/// Identifiers (customer, order, portability ids) and state survive so the
/// record stays useful for reporting.
pub struct RetentionService {
    conversations: Arc<ConversationService>,
    retention_days: u32,
}

impl RetentionService {
    pub fn new(conversations: Arc<ConversationService>, retention_days: u32) -> Self {
        Self { conversations, retention_days }
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.retention_days))
    }

    pub async fn cleanup_sensitive_data(
        &self,
        now: DateTime<Utc>,
    ) -> Result<CleanupReport, ConversationError> {
        let stale = self.conversations.list_inactive_since(self.cutoff(now)).await?;
        let mut report = CleanupReport { scanned: stale.len(), ..CleanupReport::default() };

        for conversation in stale {
            match self.purge_stored(&conversation.key, now).await {
                Ok(true) => report.cleaned += 1,
                Ok(false) => {}
                Err(purge_error) => {
                    report.failed += 1;
                    error!(
                        event_name = "retention.cleanup.failed",
                        conversation_key = %conversation.key.masked(),
                        error = %purge_error,
                        "failed to purge conversation"
                    );
                }
            }
        }

        info!(
            event_name = "retention.cleanup.completed",
            scanned = report.scanned,
            cleaned = report.cleaned,
            failed = report.failed,
            retention_days = self.retention_days,
            "sensitive data cleanup finished"
        );
        Ok(report)
    }

    /// On-demand erasure regardless of age.
    pub async fn cleanup_conversation(&self, key: &ConversationKey) -> Result<bool, ConversationError> {
        let cleaned = self.purge_stored(key, Utc::now()).await?;
        info!(
            event_name = "retention.cleanup.manual",
            conversation_key = %key.masked(),
            cleaned,
            "manual cleanup requested"
        );
        Ok(cleaned)
    }

    pub async fn cleanup_stats(&self, now: DateTime<Utc>) -> Result<CleanupStats, ConversationError> {
        let cutoff_date = self.cutoff(now);
        let stale = self.conversations.list_inactive_since(cutoff_date).await?;
        let pending_cleanup =
            stale.iter().filter(|conversation| holds_purgeable_data(&conversation.context)).count();
        Ok(CleanupStats {
            total_old_conversations: stale.len(),
            pending_cleanup,
            already_cleaned: stale.len() - pending_cleanup,
            retention_days: self.retention_days,
            cutoff_date,
        })
    }

    async fn purge_stored(
        &self,
        key: &ConversationKey,
        now: DateTime<Utc>,
    ) -> Result<bool, ConversationError> {
        let policy = format!("{}_days", self.retention_days);
        let cleaned = self
            .conversations
            .rewrite_context_untouched(key, |context| {
                let cleaned = purge_sensitive_fields(context, now, &policy);
                (cleaned, cleaned)
            })
            .await?;
        Ok(cleaned.unwrap_or(false))
    }
}

pub fn holds_purgeable_data(context: &ContextMap) -> bool {
    ContextKey::RETENTION_PURGED.iter().any(|key| context.get(*key).is_some())
}

/// Removes every purgeable key present and stamps the marker. Returns `false`
/// without touching the map when there was nothing to remove.
pub fn purge_sensitive_fields(context: &mut ContextMap, now: DateTime<Utc>, policy: &str) -> bool {
    let mut removed = false;
    for key in ContextKey::RETENTION_PURGED {
        removed |= context.remove(key).is_some();
    }
    if removed {
        context.insert(ContextKey::CleanedAt, now.to_rfc3339_opts(SecondsFormat::Secs, true));
        context.insert(ContextKey::RetentionPolicy, policy);
    }
    removed
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use portline_core::domain::context::{ContextKey, ContextMap};
    use portline_core::domain::conversation::{Conversation, ConversationKey};
    use portline_db::{ConversationRepository, InMemoryConversationRepository, InMemoryMessageRepository};

    use crate::retention::RetentionService;
    use crate::state::ConversationService;

    async fn seeded(age_days: i64, context: ContextMap) -> (RetentionService, Arc<InMemoryConversationRepository>) {
        let repository = Arc::new(InMemoryConversationRepository::default());
        let then = Utc::now() - Duration::days(age_days);
        let mut conversation = Conversation::new(ConversationKey::new("525512345678"), then);
        conversation.context = context;
        repository.save(conversation).await.expect("seed");

        let service = Arc::new(ConversationService::new(
            repository.clone(),
            Arc::new(InMemoryMessageRepository::default()),
        ));
        (RetentionService::new(service, 30), repository)
    }

    fn pii_context() -> ContextMap {
        ContextMap::new()
            .with(ContextKey::CustomerId, 42)
            .with(ContextKey::CustomerEmail, "ana@example.com")
            .with(ContextKey::AddressDistrict, "Roma Norte")
            .with(ContextKey::PortabilityNip, "cipher")
            .with(ContextKey::OrderId, "P1")
    }

    #[tokio::test]
    async fn aged_conversation_loses_pii_but_keeps_ids_and_timestamp() {
        let (retention, repository) = seeded(45, pii_context()).await;
        let key = ConversationKey::new("525512345678");
        let before = repository.find_by_key(&key).await.expect("find").expect("exists");

        let report = retention.cleanup_sensitive_data(Utc::now()).await.expect("cleanup");

        assert_eq!(report.scanned, 1);
        assert_eq!(report.cleaned, 1);
        let after = repository.find_by_key(&key).await.expect("find").expect("exists");
        assert!(!after.context.contains(ContextKey::CustomerEmail));
        assert!(!after.context.contains(ContextKey::PortabilityNip));
        assert!(!after.context.contains(ContextKey::AddressDistrict));
        assert_eq!(after.context.i64(ContextKey::CustomerId), Some(42));
        assert_eq!(after.context.str(ContextKey::OrderId), Some("P1"));
        assert!(after.context.contains(ContextKey::CleanedAt));
        assert_eq!(after.context.str(ContextKey::RetentionPolicy), Some("30_days"));
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn second_run_changes_nothing() {
        let (retention, repository) = seeded(45, pii_context()).await;
        let key = ConversationKey::new("525512345678");
        retention.cleanup_sensitive_data(Utc::now()).await.expect("first");
        let after_first = repository.find_by_key(&key).await.expect("find").expect("exists");

        let report = retention
            .cleanup_sensitive_data(Utc::now() + Duration::hours(1))
            .await
            .expect("second");

        assert_eq!(report.cleaned, 0);
        let after_second = repository.find_by_key(&key).await.expect("find").expect("exists");
        assert_eq!(after_second, after_first);
    }

    #[tokio::test]
    async fn recent_conversations_are_left_alone() {
        let (retention, repository) = seeded(3, pii_context()).await;

        let report = retention.cleanup_sensitive_data(Utc::now()).await.expect("cleanup");

        assert_eq!(report.scanned, 0);
        let conversation = repository
            .find_by_key(&ConversationKey::new("525512345678"))
            .await
            .expect("find")
            .expect("exists");
        assert!(conversation.context.contains(ContextKey::CustomerEmail));
    }

    #[tokio::test]
    async fn stats_split_pending_from_cleaned_and_manual_cleanup_ignores_age() {
        let (retention, _) = seeded(45, pii_context()).await;
        let stats = retention.cleanup_stats(Utc::now()).await.expect("stats");
        assert_eq!((stats.total_old_conversations, stats.pending_cleanup), (1, 1));

        retention.cleanup_sensitive_data(Utc::now()).await.expect("cleanup");
        let stats = retention.cleanup_stats(Utc::now()).await.expect("stats");
        assert_eq!((stats.pending_cleanup, stats.already_cleaned), (0, 1));

        let (fresh, _) = seeded(1, pii_context()).await;
        assert!(fresh.cleanup_conversation(&ConversationKey::new("525512345678")).await.expect("manual"));
        assert!(!fresh
            .cleanup_conversation(&ConversationKey::new("000000000000"))
            .await
            .expect("missing conversation"));
    }
}
