use crate::core::events::AuditEvent;

/// AuditSink defines the port (interface) for the audit/log collaborator.
///
/// Called from the request path, so implementations must be fire-and-forget:
/// record quickly (write a log line, push to a channel) and never block.
pub trait AuditSink: Send + Sync + 'static {
    /// Deliver one structured audit event
    fn record(&self, event: AuditEvent);
}

/// Sink that discards every event, for embedders without an audit trail
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) {}
}
