use std::sync::Arc;

use analyst_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use analyst_core::domain::thread::ThreadKey;

/// Identity of the turn being processed, shared by every node it visits.
#[derive(Clone)]
pub struct TurnContext {
    pub key: ThreadKey,
    pub correlation_id: String,
    audit: AuditContext,
    sink: Arc<dyn AuditSink>,
}

impl TurnContext {
    pub fn new(key: ThreadKey, correlation_id: impl Into<String>, sink: Arc<dyn AuditSink>) -> Self {
        let correlation_id = correlation_id.into();
        let audit = AuditContext::new(
            key.user_id.0.clone(),
            key.thread_id.0.clone(),
            correlation_id.clone(),
            "workflow",
        );
        Self { key, correlation_id, audit, sink }
    }

    pub fn audit_context(&self) -> &AuditContext {
        &self.audit
    }

    pub fn sink(&self) -> &dyn AuditSink {
        self.sink.as_ref()
    }

    pub fn event(
        &self,
        actor: &str,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> AuditEvent {
        AuditEvent::new(&self.audit.with_actor(actor), event_type, category, outcome)
    }

    pub fn emit(&self, event: AuditEvent) {
        self.sink.emit(event);
    }
}
