use crate::{core::events::AuditEvent, ports::audit::AuditSink};

/// Audit sink that writes every event to the tracing pipeline under the
/// `vane::audit` target, so deployments can filter or redirect the audit
/// stream independently of application logs.
///
/// This is the default sink for the serve command; embedders with stricter
/// requirements can inject their own [`AuditSink`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match event {
            AuditEvent::RouteCreated {
                route_id,
                name,
                method,
                pattern,
            } => {
                tracing::info!(
                    target: "vane::audit",
                    %route_id,
                    route = %name,
                    %method,
                    %pattern,
                    "Route created"
                );
            }
            AuditEvent::PolicyMatched {
                policy_id,
                policy,
                request_id,
                client_ip,
                path,
            } => {
                tracing::info!(
                    target: "vane::audit",
                    %policy_id,
                    %policy,
                    %request_id,
                    %client_ip,
                    %path,
                    "Policy matched"
                );
            }
            AuditEvent::PolicyLog {
                policy,
                level,
                request_id,
                method,
                path,
                client_ip,
                ..
            } => match level.as_str() {
                "trace" => tracing::trace!(
                    target: "vane::audit",
                    %policy, %request_id, %method, %path, %client_ip,
                    "Policy log"
                ),
                "debug" => tracing::debug!(
                    target: "vane::audit",
                    %policy, %request_id, %method, %path, %client_ip,
                    "Policy log"
                ),
                "warn" => tracing::warn!(
                    target: "vane::audit",
                    %policy, %request_id, %method, %path, %client_ip,
                    "Policy log"
                ),
                "error" => tracing::error!(
                    target: "vane::audit",
                    %policy, %request_id, %method, %path, %client_ip,
                    "Policy log"
                ),
                _ => tracing::info!(
                    target: "vane::audit",
                    %policy, %request_id, %method, %path, %client_ip,
                    "Policy log"
                ),
            },
            AuditEvent::BreakerTransitioned {
                route_id,
                route,
                from,
                to,
            } => {
                tracing::warn!(
                    target: "vane::audit",
                    %route_id,
                    %route,
                    %from,
                    %to,
                    "Circuit breaker transitioned"
                );
            }
            AuditEvent::HealthCheckFailed {
                route_id,
                target_id,
                url,
                reason,
            } => {
                tracing::warn!(
                    target: "vane::audit",
                    %route_id,
                    %target_id,
                    %url,
                    %reason,
                    "Health check failed"
                );
            }
        }
    }
}
