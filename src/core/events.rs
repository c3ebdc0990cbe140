use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::core::circuit_breaker::BreakerState;

/// Best-effort notifications fanned out to in-process subscribers through a
/// broadcast channel. Delivery is not required for correctness; slow or absent
/// subscribers never block the request path.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    RequestRouted {
        request_id: Uuid,
        route_id: Uuid,
        target_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    RouteCreated {
        route_id: Uuid,
        name: String,
    },
    RouteRemoved {
        route_id: Uuid,
        name: String,
    },
    PolicyCreated {
        policy_id: Uuid,
        name: String,
    },
    BreakerTransition {
        route_id: Uuid,
        route: String,
        from: BreakerState,
        to: BreakerState,
    },
}

/// Structured audit records handed to the injected audit sink, fire-and-forget
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    RouteCreated {
        route_id: Uuid,
        name: String,
        method: String,
        pattern: String,
    },
    PolicyMatched {
        policy_id: Uuid,
        policy: String,
        request_id: Uuid,
        client_ip: String,
        path: String,
    },
    /// Emitted by a policy's explicit log action
    PolicyLog {
        policy_id: Uuid,
        policy: String,
        level: String,
        request_id: Uuid,
        method: String,
        path: String,
        client_ip: String,
    },
    BreakerTransitioned {
        route_id: Uuid,
        route: String,
        from: BreakerState,
        to: BreakerState,
    },
    HealthCheckFailed {
        route_id: Uuid,
        target_id: Uuid,
        url: String,
        reason: String,
    },
}
