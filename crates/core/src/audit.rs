use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::ConversationKey;
use crate::flows::states::ConversationState;

/// Who asked for a state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditActor {
    /// A `[STATE:...]` marker in generated text.
    Assistant,
    /// The conversation management API.
    Operator,
    /// Internal bookkeeping such as error handling and recovery.
    System,
}

impl AuditActor {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assistant => "assistant",
            Self::Operator => "operator",
            Self::System => "system",
        }
    }
}

impl fmt::Display for AuditActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Applied,
    Rejected,
}

/// Correlation data shared by every event of one transition request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditContext {
    pub conversation_key: ConversationKey,
    pub correlation_id: String,
    pub actor: AuditActor,
}

impl AuditContext {
    pub fn new(conversation_key: ConversationKey, actor: AuditActor) -> Self {
        Self { conversation_key, correlation_id: Uuid::new_v4().to_string(), actor }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }
}

/// One attempted state transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub conversation_key: ConversationKey,
    pub correlation_id: String,
    pub actor: AuditActor,
    pub outcome: AuditOutcome,
    pub from: ConversationState,
    pub to: ConversationState,
    /// Name of the policy that refused a rejected transition.
    pub rejected_by: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn applied(context: &AuditContext, from: ConversationState, to: ConversationState) -> Self {
        Self::build(context, AuditOutcome::Applied, from, to, None)
    }

    pub fn rejected(
        context: &AuditContext,
        from: ConversationState,
        to: ConversationState,
        policy: &str,
    ) -> Self {
        Self::build(context, AuditOutcome::Rejected, from, to, Some(policy.to_string()))
    }

    fn build(
        context: &AuditContext,
        outcome: AuditOutcome,
        from: ConversationState,
        to: ConversationState,
        rejected_by: Option<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            conversation_key: context.conversation_key.clone(),
            correlation_id: context.correlation_id.clone(),
            actor: context.actor,
            outcome,
            from,
            to,
            rejected_by,
            occurred_at: Utc::now(),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self.outcome {
            AuditOutcome::Applied => "state.transition_applied",
            AuditOutcome::Rejected => "state.transition_rejected",
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _event: AuditEvent) {}
}

/// Keeps events in memory; used by tests to assert on the trail.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
