use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::audit::{AuditContext, AuditEvent, AuditSink};
use crate::flows::states::{ConversationState, TransitionOutcome};

/// Maximum backward ordinal distance the ordinal policy tolerates for corrections.
pub const BACKWARD_CORRECTION_WINDOW: i32 = 20;

/// Decides whether a conversation may move between two states.
///
/// The engine only depends on this trait so stricter rule sets can be substituted
/// without touching callers.
pub trait TransitionPolicy: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_valid_transition(&self, from: ConversationState, to: ConversationState) -> bool;
}

impl<P> TransitionPolicy for Box<P>
where
    P: TransitionPolicy + ?Sized,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn is_valid_transition(&self, from: ConversationState, to: ConversationState) -> bool {
        (**self).is_valid_transition(from, to)
    }
}

/// Permissive ordinal-distance rule: forward jumps of any size, backward corrections
/// within [`BACKWARD_CORRECTION_WINDOW`], with recovery and fail-safe escapes.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrdinalTransitionPolicy;

impl TransitionPolicy for OrdinalTransitionPolicy {
    fn name(&self) -> &'static str {
        "ordinal"
    }

    fn is_valid_transition(&self, from: ConversationState, to: ConversationState) -> bool {
        use ConversationState::{
            Abandoned, Blocked, Completed, ErrorState, Initial, IntentSelection,
        };

        if matches!(from, ErrorState | Initial) {
            return true;
        }
        if matches!(to, ErrorState | Blocked) {
            return true;
        }
        if from == to {
            return true;
        }
        if matches!(from, Completed | Abandoned | Blocked) {
            return matches!(to, Initial | IntentSelection);
        }

        let (from_rank, to_rank) = (from.ordinal(), to.ordinal());
        to_rank > from_rank || to_rank >= from_rank - BACKWARD_CORRECTION_WINDOW
    }
}

/// Explicit allowed-next-states table. Idempotent retries, fail-safe entry into
/// `ERROR_STATE`/`BLOCKED` and recovery out of `ERROR_STATE` are always permitted.
#[derive(Clone, Debug, Default)]
pub struct TableTransitionPolicy {
    allowed: HashMap<ConversationState, HashSet<ConversationState>>,
}

impl TableTransitionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(
        mut self,
        from: ConversationState,
        to: impl IntoIterator<Item = ConversationState>,
    ) -> Self {
        self.allowed.entry(from).or_default().extend(to);
        self
    }

    pub fn allowed_from(&self, from: ConversationState) -> Vec<ConversationState> {
        let mut next: Vec<ConversationState> =
            self.allowed.get(&from).map(|set| set.iter().copied().collect()).unwrap_or_default();
        next.sort();
        next
    }

    /// Purchase and portability happy paths with one-step corrections.
    pub fn purchase_flow() -> Self {
        use ConversationState::*;

        Self::new()
            .allow(Initial, [CustomerRegistration, IntentSelection])
            .allow(CustomerRegistration, [IntentSelection])
            .allow(IntentSelection, [CustomerRegistration, ProductSelected, ImeiRequired])
            .allow(ProductSelected, [IntentSelection, ImeiRequired, AddressRequired, PaymentPending])
            .allow(ImeiRequired, [IntentSelection, ImeiValidated])
            .allow(ImeiValidated, [ProductSelected, AddressRequired, PaymentPending])
            .allow(AddressRequired, [ProductSelected, PaymentPending])
            .allow(PaymentPending, [AddressRequired, PaymentConfirmed])
            .allow(PaymentConfirmed, [SimShipped, PortabilityWaitSim, Completed])
            .allow(SimShipped, [PortabilityWaitSim, Completed])
            .allow(PortabilityWaitSim, [PortabilityNipRequired])
            .allow(PortabilityNipRequired, [PortabilitySimActivation])
            .allow(PortabilitySimActivation, [PortabilityNipRequired, PortabilityInProgress])
            .allow(PortabilityInProgress, [PortabilityCompleted])
            .allow(PortabilityCompleted, [Completed])
            .allow(Completed, [Initial, IntentSelection])
            .allow(Abandoned, [Initial, IntentSelection])
            .allow(Blocked, [Initial, IntentSelection])
    }
}

impl TransitionPolicy for TableTransitionPolicy {
    fn name(&self) -> &'static str {
        "table"
    }

    fn is_valid_transition(&self, from: ConversationState, to: ConversationState) -> bool {
        if from == to || from == ConversationState::ErrorState {
            return true;
        }
        if matches!(to, ConversationState::ErrorState | ConversationState::Blocked) {
            return true;
        }
        self.allowed.get(&from).is_some_and(|next| next.contains(&to))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("transition from {from} to {to} rejected by {policy} policy")]
    Rejected { from: ConversationState, to: ConversationState, policy: &'static str },
}

pub struct StateMachine<P> {
    policy: P,
}

impl<P> StateMachine<P>
where
    P: TransitionPolicy,
{
    pub fn new(policy: P) -> Self {
        Self { policy }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn is_valid_transition(&self, from: ConversationState, to: ConversationState) -> bool {
        self.policy.is_valid_transition(from, to)
    }

    pub fn apply(
        &self,
        from: ConversationState,
        to: ConversationState,
    ) -> Result<TransitionOutcome, TransitionError> {
        if !self.policy.is_valid_transition(from, to) {
            return Err(TransitionError::Rejected { from, to, policy: self.policy.name() });
        }
        Ok(TransitionOutcome { from, to, changed: from != to })
    }

    pub fn apply_with_audit<S>(
        &self,
        from: ConversationState,
        to: ConversationState,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, TransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(from, to);
        let event = match &result {
            Ok(outcome) => AuditEvent::applied(audit, outcome.from, outcome.to),
            Err(TransitionError::Rejected { policy, .. }) => {
                AuditEvent::rejected(audit, from, to, policy)
            }
        };
        sink.emit(event);
        result
    }
}

impl Default for StateMachine<OrdinalTransitionPolicy> {
    fn default() -> Self {
        Self::new(OrdinalTransitionPolicy)
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditActor, AuditContext, AuditOutcome, InMemoryAuditSink};
    use crate::domain::conversation::ConversationKey;
    use crate::flows::engine::{
        OrdinalTransitionPolicy, StateMachine, TableTransitionPolicy, TransitionError,
        TransitionPolicy,
    };
    use crate::flows::states::ConversationState;

    #[test]
    fn every_state_may_stay_where_it_is() {
        let policy = OrdinalTransitionPolicy;
        for state in ConversationState::ALL {
            assert!(policy.is_valid_transition(state, state), "{state} -> {state}");
        }
    }

    #[test]
    fn forward_progression_is_always_allowed_outside_terminal_states() {
        let policy = OrdinalTransitionPolicy;
        for from in ConversationState::ALL {
            if from.is_terminal() {
                continue;
            }
            for to in ConversationState::ALL {
                if to.ordinal() > from.ordinal() {
                    assert!(policy.is_valid_transition(from, to), "{from} -> {to}");
                }
            }
        }
        assert!(policy.is_valid_transition(
            ConversationState::IntentSelection,
            ConversationState::PaymentPending
        ));
    }

    #[test]
    fn backward_jump_beyond_correction_window_is_denied() {
        let policy = OrdinalTransitionPolicy;
        assert!(!policy.is_valid_transition(
            ConversationState::PaymentPending,
            ConversationState::IntentSelection
        ));
        assert!(policy.is_valid_transition(
            ConversationState::PaymentPending,
            ConversationState::AddressRequired
        ));
        assert!(policy.is_valid_transition(
            ConversationState::PaymentPending,
            ConversationState::ImeiRequired
        ));
    }

    #[test]
    fn error_state_is_reachable_from_and_escapable_to_anything() {
        let policy = OrdinalTransitionPolicy;
        for state in ConversationState::ALL {
            assert!(policy.is_valid_transition(state, ConversationState::ErrorState));
            assert!(policy.is_valid_transition(ConversationState::ErrorState, state));
        }
    }

    #[test]
    fn terminal_states_only_restart() {
        let policy = OrdinalTransitionPolicy;
        for from in [ConversationState::Completed, ConversationState::Abandoned] {
            assert!(policy.is_valid_transition(from, ConversationState::Initial));
            assert!(policy.is_valid_transition(from, ConversationState::IntentSelection));
            assert!(!policy.is_valid_transition(from, ConversationState::PaymentPending));
        }
        assert!(!policy.is_valid_transition(
            ConversationState::Blocked,
            ConversationState::Abandoned
        ));
        assert!(policy.is_valid_transition(
            ConversationState::Completed,
            ConversationState::Blocked
        ));
    }

    #[test]
    fn table_policy_rejects_long_forward_skips() {
        let policy = TableTransitionPolicy::purchase_flow();
        assert!(!policy.is_valid_transition(
            ConversationState::Initial,
            ConversationState::PortabilityCompleted
        ));
        assert!(policy
            .is_valid_transition(ConversationState::Initial, ConversationState::IntentSelection));
        assert!(policy
            .is_valid_transition(ConversationState::SimShipped, ConversationState::ErrorState));
        assert!(policy
            .is_valid_transition(ConversationState::ErrorState, ConversationState::SimShipped));
        assert_eq!(
            policy.allowed_from(ConversationState::Completed),
            vec![ConversationState::Initial, ConversationState::IntentSelection]
        );
    }

    #[test]
    fn machine_accepts_boxed_policies() {
        let machine: StateMachine<Box<dyn TransitionPolicy>> =
            StateMachine::new(Box::new(TableTransitionPolicy::purchase_flow()));
        assert_eq!(machine.policy_name(), "table");

        let error = machine
            .apply(ConversationState::Initial, ConversationState::Completed)
            .expect_err("table policy forbids the jump");
        assert!(matches!(error, TransitionError::Rejected { policy: "table", .. }));
    }

    #[test]
    fn apply_reports_whether_state_changed() {
        let machine = StateMachine::default();
        let same = machine
            .apply(ConversationState::ProductSelected, ConversationState::ProductSelected)
            .expect("idempotent retry");
        assert!(!same.changed);

        let forward = machine
            .apply(ConversationState::ProductSelected, ConversationState::AddressRequired)
            .expect("forward");
        assert!(forward.changed);
    }

    #[test]
    fn transitions_emit_audit_events() {
        let machine = StateMachine::default();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(ConversationKey::new("5215512345678"), AuditActor::Assistant)
            .with_correlation_id("turn-7");

        machine
            .apply_with_audit(
                ConversationState::Initial,
                ConversationState::IntentSelection,
                &sink,
                &audit,
            )
            .expect("initial may go anywhere");
        let _ = machine.apply_with_audit(
            ConversationState::PaymentPending,
            ConversationState::Initial,
            &sink,
            &audit,
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_name(), "state.transition_applied");
        assert_eq!(events[0].to, ConversationState::IntentSelection);
        assert_eq!(events[1].event_name(), "state.transition_rejected");
        assert_eq!(events[1].outcome, AuditOutcome::Rejected);
        assert_eq!(events[1].rejected_by.as_deref(), Some("ordinal"));
        assert_eq!(events[1].correlation_id, "turn-7");
    }
}
