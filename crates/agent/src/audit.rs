use tracing::{info, warn};

use portline_core::audit::{AuditEvent, AuditOutcome, AuditSink};

/// Writes audit events into the structured log stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let conversation_key = event.conversation_key.masked();
        match event.outcome {
            AuditOutcome::Applied => info!(
                event_name = "audit.state_transition",
                audit_event = event.event_name(),
                actor = %event.actor,
                correlation_id = %event.correlation_id,
                conversation_key = %conversation_key,
                from = %event.from,
                to = %event.to,
                "audit"
            ),
            AuditOutcome::Rejected => warn!(
                event_name = "audit.state_transition",
                audit_event = event.event_name(),
                actor = %event.actor,
                correlation_id = %event.correlation_id,
                conversation_key = %conversation_key,
                from = %event.from,
                to = %event.to,
                rejected_by = event.rejected_by.as_deref().unwrap_or_default(),
                "audit"
            ),
        }
    }
}
