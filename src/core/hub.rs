//! The routing hub.
//!
//! One [`RoutingHub`] instance owns every moving part of the decision path:
//! the route registry, the atomically swapped routing table, the policy
//! engine, per-route circuit breakers and balancers, the request history and
//! the event fan-out. Collaborators with side effects (audit sink, health
//! probe) are injected, so the hub itself stays deterministic and testable.
//!
//! [`RoutingHub::route_request`] is synchronous: the whole pipeline is
//! in-memory and never blocks on I/O. Async work (probes, sweeps, stats
//! recomputation) lives in the adapter loops, which call back into the hub.
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::{
    config::models::{HistoryConfig, HubConfig, PolicySpec, RouteSpec},
    core::{
        circuit_breaker::BreakerTransition,
        events::{AuditEvent, HubEvent},
        history::{RequestHistory, RequestOutcome, RequestRecord},
        policy::{PolicyEngine, PolicyError, PolicyVerdict, TrafficPolicy},
        route::{Route, RouteError, RouteUsageStats, TargetHealthReport, TargetState},
        routing_table::RoutingTable,
    },
    metrics::{
        increment_requests_blocked, increment_requests_failed, increment_requests_routed,
        record_decision_duration,
    },
    ports::audit::AuditSink,
};

/// Outcome message when routing succeeds
pub const MSG_ROUTED: &str = "Request routed successfully";
/// Outcome message when no enabled route matches the request
pub const MSG_NO_MATCHING_ROUTE: &str = "No matching route found";
/// Outcome message when the matched route's breaker rejects the request
pub const MSG_CIRCUIT_OPEN: &str = "Circuit breaker is open";
/// Outcome message when the matched route has no healthy target
pub const MSG_NO_HEALTHY_TARGETS: &str = "No healthy targets available";

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors raised by the hub's admin surface
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HubError {
    #[error("Route '{0}' is already registered")]
    DuplicateRoute(String),

    #[error("Policy '{0}' is already registered")]
    DuplicatePolicy(String),

    #[error("Invalid {field} duration '{value}': {reason}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Result type for hub operations
pub type HubResult<T> = Result<T, HubError>;

/// Everything the decision pipeline needs to know about one request.
///
/// Header names are lowercased on insertion so policy lookups are
/// case-insensitive without per-request normalization.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub client_ip: String,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        client_ip: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            client_ip: client_ip.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        let name = name.to_ascii_lowercase();
        let value = value.into();
        if name == "user-agent" {
            self.user_agent = Some(value.clone());
        }
        self.headers.insert(name, value);
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// Why a request did not reach a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingFailureKind {
    PolicyBlocked,
    NoMatchingRoute,
    CircuitOpen,
    NoHealthyTargets,
}

impl RoutingFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RoutingFailureKind::PolicyBlocked => "policy_blocked",
            RoutingFailureKind::NoMatchingRoute => "no_matching_route",
            RoutingFailureKind::CircuitOpen => "circuit_open",
            RoutingFailureKind::NoHealthyTargets => "no_healthy_targets",
        }
    }
}

/// The hub's answer for one request.
///
/// On success `target_url` names where the caller should dispatch; `delay`
/// carries the pause a matching delay policy asked for and applies to
/// successful outcomes only in practice, though it is preserved on failures
/// for observability.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingOutcome {
    pub request_id: Uuid,
    pub success: bool,
    pub route_id: Option<Uuid>,
    pub target_id: Option<Uuid>,
    pub target_url: Option<String>,
    pub message: String,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RoutingFailureKind>,
}

impl RoutingOutcome {
    fn routed(
        request_id: Uuid,
        route: &Route,
        target: &TargetState,
        delay: Option<Duration>,
    ) -> Self {
        Self {
            request_id,
            success: true,
            route_id: Some(route.id),
            target_id: Some(target.id),
            target_url: Some(target.url.as_str().to_string()),
            message: MSG_ROUTED.to_string(),
            blocked: false,
            delay,
            failure: None,
        }
    }

    fn blocked(request_id: Uuid, message: String) -> Self {
        Self {
            request_id,
            success: false,
            route_id: None,
            target_id: None,
            target_url: None,
            message,
            blocked: true,
            delay: None,
            failure: Some(RoutingFailureKind::PolicyBlocked),
        }
    }

    fn failed(
        request_id: Uuid,
        route_id: Option<Uuid>,
        kind: RoutingFailureKind,
        message: &str,
        delay: Option<Duration>,
    ) -> Self {
        Self {
            request_id,
            success: false,
            route_id,
            target_id: None,
            target_url: None,
            message: message.to_string(),
            blocked: false,
            delay,
            failure: Some(kind),
        }
    }
}

/// Aggregate hub counters and registry sizes
#[derive(Debug, Clone, Serialize)]
pub struct HubStatistics {
    pub started_at: DateTime<Utc>,
    pub total_requests: u64,
    pub requests_routed: u64,
    pub requests_blocked: u64,
    pub requests_failed: u64,
    pub routes: usize,
    pub enabled_routes: usize,
    pub policies: usize,
    pub history_entries: usize,
}

/// Central routing facade; see the module docs for the moving parts
pub struct RoutingHub {
    routes: scc::HashMap<Uuid, Arc<Route>>,
    table: ArcSwap<RoutingTable>,
    policies: PolicyEngine,
    history: Arc<RequestHistory>,
    audit: Arc<dyn AuditSink>,
    events: broadcast::Sender<HubEvent>,
    requests_routed: AtomicU64,
    requests_blocked: AtomicU64,
    requests_failed: AtomicU64,
    started_at: DateTime<Utc>,
}

impl RoutingHub {
    /// Create an empty hub with the given history settings and audit sink
    pub fn new(history: &HistoryConfig, audit: Arc<dyn AuditSink>) -> HubResult<Self> {
        let retention = humantime::parse_duration(&history.retention).map_err(|e| {
            HubError::InvalidDuration {
                field: "history.retention",
                value: history.retention.clone(),
                reason: e.to_string(),
            }
        })?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            routes: scc::HashMap::new(),
            table: ArcSwap::from_pointee(RoutingTable::default()),
            policies: PolicyEngine::new(),
            history: Arc::new(RequestHistory::new(history.max_entries, retention)),
            audit,
            events,
            requests_routed: AtomicU64::new(0),
            requests_blocked: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            started_at: Utc::now(),
        })
    }

    /// Build a hub and register everything the config declares
    pub fn from_config(config: &HubConfig, audit: Arc<dyn AuditSink>) -> HubResult<Self> {
        let hub = Self::new(&config.history, audit)?;
        for route in &config.routes {
            hub.register_route(route.clone())?;
        }
        for policy in &config.policies {
            hub.register_policy(policy.clone())?;
        }
        Ok(hub)
    }

    /// Route one request through the decision pipeline: policy gate, table
    /// lookup, breaker check, target selection.
    ///
    /// Whatever the verdict, the request lands in the history ring, so rate
    /// conditions and usage statistics see blocked and failed traffic too.
    pub fn route_request(&self, request: &RequestContext) -> RoutingOutcome {
        let request_id = Uuid::new_v4();
        let received_at = Utc::now();
        let started = Instant::now();

        let verdict = self.policies.evaluate(
            request_id,
            request,
            received_at,
            &self.history,
            self.audit.as_ref(),
        );
        let delay = match verdict {
            PolicyVerdict::Blocked {
                policy, message, ..
            } => {
                self.requests_blocked.fetch_add(1, Ordering::AcqRel);
                increment_requests_blocked(&policy);
                tracing::debug!(
                    policy = %policy,
                    method = %request.method,
                    path = %request.path,
                    "Request blocked"
                );
                self.record(
                    request_id,
                    received_at,
                    started,
                    request,
                    None,
                    None,
                    RequestOutcome::Blocked {
                        policy,
                        message: message.clone(),
                    },
                );
                return RoutingOutcome::blocked(request_id, message);
            }
            PolicyVerdict::AllowWithDelay { policy, delay } => {
                tracing::debug!(
                    policy = %policy,
                    delay_ms = delay.as_millis() as u64,
                    "Request delayed by policy"
                );
                Some(delay)
            }
            PolicyVerdict::Allow => None,
        };

        let Some(route_id) = self.table.load().lookup(&request.method, &request.path) else {
            return self.fail(
                request_id,
                received_at,
                started,
                request,
                None,
                RoutingFailureKind::NoMatchingRoute,
                MSG_NO_MATCHING_ROUTE,
                delay,
            );
        };

        // The registry and the table swap independently, so a just-removed or
        // just-disabled route can still win the lookup for one beat
        let Some(route) = self.route(route_id) else {
            return self.fail(
                request_id,
                received_at,
                started,
                request,
                None,
                RoutingFailureKind::NoMatchingRoute,
                MSG_NO_MATCHING_ROUTE,
                delay,
            );
        };
        if !route.enabled() {
            return self.fail(
                request_id,
                received_at,
                started,
                request,
                Some(&route),
                RoutingFailureKind::NoMatchingRoute,
                MSG_NO_MATCHING_ROUTE,
                delay,
            );
        }

        let check = route.breaker.check();
        if let Some(transition) = check.transition {
            self.publish_transition(&route, transition);
        }
        if !check.allowed {
            return self.fail(
                request_id,
                received_at,
                started,
                request,
                Some(&route),
                RoutingFailureKind::CircuitOpen,
                MSG_CIRCUIT_OPEN,
                delay,
            );
        }

        let Some(target) = route.select_target(&request.client_ip) else {
            return self.fail(
                request_id,
                received_at,
                started,
                request,
                Some(&route),
                RoutingFailureKind::NoHealthyTargets,
                MSG_NO_HEALTHY_TARGETS,
                delay,
            );
        };
        target.increment_connections();

        self.requests_routed.fetch_add(1, Ordering::AcqRel);
        increment_requests_routed(&route.name);
        tracing::debug!(
            route = %route.name,
            target = %target.url.as_str(),
            method = %request.method,
            path = %request.path,
            "Request routed"
        );
        self.record(
            request_id,
            received_at,
            started,
            request,
            Some(&route),
            Some(&target),
            RequestOutcome::Routed,
        );
        let _ = self.events.send(HubEvent::RequestRouted {
            request_id,
            route_id: route.id,
            target_id: target.id,
            timestamp: received_at,
        });
        RoutingOutcome::routed(request_id, &route, &target, delay)
    }

    /// Release one in-flight connection slot on a target. Called when a
    /// dispatched request finishes; unknown ids are ignored.
    pub fn complete_request(&self, route_id: Uuid, target_id: Uuid) -> bool {
        let Some(route) = self.route(route_id) else {
            return false;
        };
        let Some(target) = route.target(target_id) else {
            return false;
        };
        target.decrement_connections();
        true
    }

    /// Apply one health-check sweep for a route: refresh each probed target's
    /// health and feed the route's breaker one success or failure per report
    pub fn apply_health_report(&self, route_id: Uuid, reports: &[TargetHealthReport]) {
        let Some(route) = self.route(route_id) else {
            return;
        };
        let now = Utc::now();
        for report in reports {
            let Some(target) = route.target(report.target_id) else {
                continue;
            };
            target.record_probe(report.healthy, report.response_time_ms, now);

            let transition = if report.healthy {
                route.breaker.record_success()
            } else {
                let reason = report
                    .reason
                    .clone()
                    .unwrap_or_else(|| "probe failed".to_string());
                tracing::warn!(
                    route = %route.name,
                    target = %target.url.as_str(),
                    reason = %reason,
                    "Health check failed"
                );
                self.audit.record(AuditEvent::HealthCheckFailed {
                    route_id: route.id,
                    target_id: target.id,
                    url: target.url.as_str().to_string(),
                    reason,
                });
                route.breaker.record_failure()
            };
            if let Some(transition) = transition {
                self.publish_transition(&route, transition);
            }
        }
    }

    /// Register a route and rebuild the routing table. Names are unique
    /// across the hub.
    pub fn register_route(&self, spec: RouteSpec) -> HubResult<Arc<Route>> {
        let mut duplicate = false;
        self.routes.scan(|_, route| {
            if route.name == spec.name {
                duplicate = true;
            }
        });
        if duplicate {
            return Err(HubError::DuplicateRoute(spec.name));
        }

        let route = Arc::new(Route::from_spec(spec)?);
        let _ = self.routes.insert(route.id, route.clone());
        self.rebuild_table();

        self.audit.record(AuditEvent::RouteCreated {
            route_id: route.id,
            name: route.name.clone(),
            method: route.method.clone(),
            pattern: route.pattern.clone(),
        });
        let _ = self.events.send(HubEvent::RouteCreated {
            route_id: route.id,
            name: route.name.clone(),
        });
        tracing::info!(
            route = %route.name,
            method = %route.method,
            pattern = %route.pattern,
            targets = route.targets.len(),
            "Route registered"
        );
        Ok(route)
    }

    /// Remove a route; returns it when the id was known
    pub fn remove_route(&self, route_id: Uuid) -> Option<Arc<Route>> {
        let (_, route) = self.routes.remove(&route_id)?;
        self.rebuild_table();
        let _ = self.events.send(HubEvent::RouteRemoved {
            route_id,
            name: route.name.clone(),
        });
        tracing::info!(route = %route.name, "Route removed");
        Some(route)
    }

    /// Toggle a route and rebuild the table so disabled routes stop matching.
    /// Returns false when the id is unknown.
    pub fn set_route_enabled(&self, route_id: Uuid, enabled: bool) -> bool {
        match self.route(route_id) {
            Some(route) => {
                route.set_enabled(enabled);
                self.rebuild_table();
                tracing::info!(route = %route.name, enabled, "Route toggled");
                true
            }
            None => false,
        }
    }

    pub fn route(&self, route_id: Uuid) -> Option<Arc<Route>> {
        self.routes.read(&route_id, |_, route| route.clone())
    }

    /// All registered routes, ordered by name
    pub fn routes(&self) -> Vec<Arc<Route>> {
        let mut routes = Vec::new();
        self.routes.scan(|_, route| routes.push(route.clone()));
        routes.sort_by(|a, b| a.name.cmp(&b.name));
        routes
    }

    /// Register a traffic policy. Names are unique across the hub.
    pub fn register_policy(&self, spec: PolicySpec) -> HubResult<Arc<TrafficPolicy>> {
        if self.policies.policies().iter().any(|p| p.name == spec.name) {
            return Err(HubError::DuplicatePolicy(spec.name));
        }
        let policy = self.policies.register(spec)?;
        let _ = self.events.send(HubEvent::PolicyCreated {
            policy_id: policy.id,
            name: policy.name.clone(),
        });
        Ok(policy)
    }

    /// Toggle a policy; returns false when the id is unknown
    pub fn set_policy_enabled(&self, policy_id: Uuid, enabled: bool) -> bool {
        self.policies.set_enabled(policy_id, enabled)
    }

    /// All registered policies in evaluation order
    pub fn policies(&self) -> Vec<Arc<TrafficPolicy>> {
        self.policies.policies()
    }

    /// Subscribe to hub events; receivers that lag simply miss events
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    /// Most recent request records, newest first
    pub fn recent_requests(&self, limit: usize) -> Vec<Arc<RequestRecord>> {
        self.history.recent(limit)
    }

    /// Drop history entries older than the retention window; returns how
    /// many were removed
    pub fn sweep_history(&self) -> usize {
        self.history.sweep_expired(Utc::now())
    }

    pub fn statistics(&self) -> HubStatistics {
        let routed = self.requests_routed.load(Ordering::Acquire);
        let blocked = self.requests_blocked.load(Ordering::Acquire);
        let failed = self.requests_failed.load(Ordering::Acquire);
        let mut routes = 0usize;
        let mut enabled_routes = 0usize;
        self.routes.scan(|_, route| {
            routes += 1;
            if route.enabled() {
                enabled_routes += 1;
            }
        });

        HubStatistics {
            started_at: self.started_at,
            total_requests: routed + blocked + failed,
            requests_routed: routed,
            requests_blocked: blocked,
            requests_failed: failed,
            routes,
            enabled_routes,
            policies: self.policies.len(),
            history_entries: self.history.len(),
        }
    }

    /// Rebuild every route's usage window from the request history.
    ///
    /// Runs off the request path (the stats aggregation loop calls it);
    /// readers keep the previous window until the swap.
    pub fn recompute_statistics(&self) {
        #[derive(Default)]
        struct Acc {
            total: u64,
            routed: u64,
            failed: u64,
            sum_ms: f64,
            min_ms: f64,
            max_ms: f64,
            last: Option<DateTime<Utc>>,
        }

        let records = self.history.snapshot();
        let mut per_route: HashMap<Uuid, Acc> = HashMap::new();
        for record in &records {
            let Some(route_id) = record.route_id else {
                continue;
            };
            let acc = per_route.entry(route_id).or_default();
            acc.total += 1;
            if record.outcome.is_routed() {
                acc.routed += 1;
            }
            if record.outcome.is_failed() {
                acc.failed += 1;
            }
            let ms = record.duration_us as f64 / 1000.0;
            acc.sum_ms += ms;
            if acc.total == 1 || ms < acc.min_ms {
                acc.min_ms = ms;
            }
            if ms > acc.max_ms {
                acc.max_ms = ms;
            }
            if acc.last.is_none_or(|t| record.timestamp > t) {
                acc.last = Some(record.timestamp);
            }
        }

        self.routes.scan(|_, route| {
            let stats = match per_route.get(&route.id) {
                Some(acc) => RouteUsageStats {
                    total_requests: acc.total,
                    routed: acc.routed,
                    failed: acc.failed,
                    avg_duration_ms: acc.sum_ms / acc.total as f64,
                    min_duration_ms: acc.min_ms,
                    max_duration_ms: acc.max_ms,
                    updated_at: acc.last,
                },
                None => RouteUsageStats::default(),
            };
            route.stats.store(Arc::new(stats));
        });
        tracing::debug!(records = records.len(), "Recomputed route usage statistics");
    }

    fn rebuild_table(&self) {
        let mut routes = Vec::new();
        self.routes.scan(|_, route| routes.push(route.clone()));
        let table = RoutingTable::build(routes.iter());
        self.table.store(Arc::new(table));
    }

    fn publish_transition(&self, route: &Route, transition: BreakerTransition) {
        self.audit.record(AuditEvent::BreakerTransitioned {
            route_id: route.id,
            route: route.name.clone(),
            from: transition.from,
            to: transition.to,
        });
        let _ = self.events.send(HubEvent::BreakerTransition {
            route_id: route.id,
            route: route.name.clone(),
            from: transition.from,
            to: transition.to,
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn fail(
        &self,
        request_id: Uuid,
        received_at: DateTime<Utc>,
        started: Instant,
        request: &RequestContext,
        route: Option<&Arc<Route>>,
        kind: RoutingFailureKind,
        message: &str,
        delay: Option<Duration>,
    ) -> RoutingOutcome {
        self.requests_failed.fetch_add(1, Ordering::AcqRel);
        increment_requests_failed(kind.as_str());
        tracing::debug!(
            method = %request.method,
            path = %request.path,
            reason = kind.as_str(),
            "Routing failed"
        );
        self.record(
            request_id,
            received_at,
            started,
            request,
            route,
            None,
            RequestOutcome::Failed {
                reason: message.to_string(),
            },
        );
        RoutingOutcome::failed(request_id, route.map(|r| r.id), kind, message, delay)
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        request_id: Uuid,
        received_at: DateTime<Utc>,
        started: Instant,
        request: &RequestContext,
        route: Option<&Arc<Route>>,
        target: Option<&Arc<TargetState>>,
        outcome: RequestOutcome,
    ) {
        let elapsed = started.elapsed();
        let label = match &outcome {
            RequestOutcome::Routed => "routed",
            RequestOutcome::Blocked { .. } => "blocked",
            RequestOutcome::Failed { .. } => "failed",
        };
        record_decision_duration(label, elapsed);

        self.history.record(RequestRecord {
            id: request_id,
            timestamp: received_at,
            method: request.method.clone(),
            path: request.path.clone(),
            client_ip: request.client_ip.clone(),
            user_agent: request.user_agent.clone(),
            route_id: route.map(|r| r.id),
            route_name: route.map(|r| r.name.clone()),
            target_id: target.map(|t| t.id),
            target_url: target.map(|t| t.url.as_str().to_string()),
            outcome,
            duration_us: elapsed.as_micros() as u64,
        });
    }
}

impl std::fmt::Debug for RoutingHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingHub")
            .field("routes", &self.routes.len())
            .field("policies", &self.policies.len())
            .field("history_entries", &self.history.len())
            .field("started_at", &self.started_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::models::{ActionSpec, RouteSpec},
        core::circuit_breaker::BreakerState,
        ports::audit::NullAuditSink,
    };

    fn hub() -> RoutingHub {
        RoutingHub::new(&HistoryConfig::default(), Arc::new(NullAuditSink)).unwrap()
    }

    fn api_route() -> RouteSpec {
        RouteSpec::single_target("api", "GET", "/api/*", "http://backend-1:8080")
    }

    fn get(path: &str) -> RequestContext {
        RequestContext::new("GET", path, "10.0.0.1")
    }

    #[test]
    fn test_route_request_happy_path() {
        let hub = hub();
        let route = hub.register_route(api_route()).unwrap();

        let outcome = hub.route_request(&get("/api/users"));
        assert!(outcome.success);
        assert!(!outcome.blocked);
        assert_eq!(outcome.route_id, Some(route.id));
        assert_eq!(outcome.target_url.as_deref(), Some("http://backend-1:8080"));
        assert_eq!(outcome.message, MSG_ROUTED);

        // Routed request holds a connection slot until completion
        let target = route.target(outcome.target_id.unwrap()).unwrap();
        assert_eq!(target.connections(), 1);
        assert!(hub.complete_request(route.id, target.id));
        assert_eq!(target.connections(), 0);

        let recent = hub.recent_requests(10);
        assert_eq!(recent.len(), 1);
        assert!(recent[0].outcome.is_routed());
    }

    #[test]
    fn test_no_matching_route() {
        let hub = hub();
        hub.register_route(api_route()).unwrap();

        let outcome = hub.route_request(&get("/other"));
        assert!(!outcome.success);
        assert_eq!(outcome.failure, Some(RoutingFailureKind::NoMatchingRoute));
        assert_eq!(outcome.message, MSG_NO_MATCHING_ROUTE);

        // Failed requests are still recorded
        assert_eq!(hub.recent_requests(10).len(), 1);
        assert!(hub.recent_requests(10)[0].outcome.is_failed());
    }

    #[test]
    fn test_disabled_route_stops_matching() {
        let hub = hub();
        let route = hub.register_route(api_route()).unwrap();

        assert!(hub.set_route_enabled(route.id, false));
        let outcome = hub.route_request(&get("/api/users"));
        assert_eq!(outcome.failure, Some(RoutingFailureKind::NoMatchingRoute));

        assert!(hub.set_route_enabled(route.id, true));
        assert!(hub.route_request(&get("/api/users")).success);
    }

    #[test]
    fn test_removed_route_stops_matching() {
        let hub = hub();
        let route = hub.register_route(api_route()).unwrap();

        assert!(hub.route_request(&get("/api/users")).success);
        assert!(hub.remove_route(route.id).is_some());
        assert!(!hub.route_request(&get("/api/users")).success);
        assert!(hub.remove_route(route.id).is_none());
    }

    #[test]
    fn test_duplicate_route_name_rejected() {
        let hub = hub();
        hub.register_route(api_route()).unwrap();

        let mut second = api_route();
        second.pattern = "/api/v2/*".to_string();
        assert!(matches!(
            hub.register_route(second),
            Err(HubError::DuplicateRoute(name)) if name == "api"
        ));
    }

    #[test]
    fn test_policy_blocks_before_lookup() {
        let hub = hub();
        hub.register_route(api_route()).unwrap();
        hub.register_policy(PolicySpec {
            name: "deny-all".to_string(),
            priority: 10,
            conditions: vec![],
            actions: vec![ActionSpec::Deny {
                message: Some("not today".to_string()),
            }],
            enabled: true,
        })
        .unwrap();

        let outcome = hub.route_request(&get("/api/users"));
        assert!(!outcome.success);
        assert!(outcome.blocked);
        assert_eq!(outcome.message, "not today");
        assert_eq!(outcome.route_id, None);

        let stats = hub.statistics();
        assert_eq!(stats.requests_blocked, 1);
        assert_eq!(stats.requests_routed, 0);
        assert!(hub.recent_requests(1)[0].outcome.is_blocked());
    }

    #[test]
    fn test_delay_policy_flows_into_outcome() {
        let hub = hub();
        hub.register_route(api_route()).unwrap();
        hub.register_policy(PolicySpec {
            name: "slow".to_string(),
            priority: 10,
            conditions: vec![],
            actions: vec![ActionSpec::Delay {
                duration: "100ms".to_string(),
            }],
            enabled: true,
        })
        .unwrap();

        let outcome = hub.route_request(&get("/api/users"));
        assert!(outcome.success);
        assert_eq!(outcome.delay, Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_unhealthy_targets_fail_routing() {
        let hub = hub();
        let mut spec = api_route();
        // Breaker disabled so target health is the only gate
        spec.circuit_breaker.enabled = false;
        let route = hub.register_route(spec).unwrap();

        route.targets[0].mark_unhealthy();
        let outcome = hub.route_request(&get("/api/users"));
        assert_eq!(outcome.failure, Some(RoutingFailureKind::NoHealthyTargets));
        assert_eq!(outcome.message, MSG_NO_HEALTHY_TARGETS);
    }

    #[test]
    fn test_failing_probes_open_breaker() {
        let hub = hub();
        let route = hub.register_route(api_route()).unwrap();
        let target_id = route.targets[0].id;

        let mut events = hub.subscribe();
        hub.apply_health_report(
            route.id,
            &[TargetHealthReport {
                target_id,
                healthy: false,
                response_time_ms: 0,
                reason: Some("connection refused".to_string()),
            }],
        );

        // One failure out of one sample exceeds the 50% threshold
        assert_eq!(route.breaker.state(), BreakerState::Open);
        let outcome = hub.route_request(&get("/api/users"));
        assert_eq!(outcome.failure, Some(RoutingFailureKind::CircuitOpen));
        assert_eq!(outcome.message, MSG_CIRCUIT_OPEN);

        let mut saw_transition = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, HubEvent::BreakerTransition { to: BreakerState::Open, .. }) {
                saw_transition = true;
            }
        }
        assert!(saw_transition);
    }

    #[test]
    fn test_healthy_probe_updates_target() {
        let hub = hub();
        let route = hub.register_route(api_route()).unwrap();
        let target = route.targets[0].clone();
        target.mark_unhealthy();

        hub.apply_health_report(
            route.id,
            &[TargetHealthReport {
                target_id: target.id,
                healthy: true,
                response_time_ms: 42,
                reason: None,
            }],
        );

        assert!(target.is_healthy());
        assert_eq!(target.response_time_ms(), 42);
        assert!(target.last_check().is_some());
    }

    #[test]
    fn test_events_for_routed_request() {
        let hub = hub();
        let mut events = hub.subscribe();
        hub.register_route(api_route()).unwrap();
        hub.route_request(&get("/api/users"));

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(match event {
                HubEvent::RouteCreated { .. } => "route_created",
                HubEvent::RequestRouted { .. } => "request_routed",
                _ => "other",
            });
        }
        assert_eq!(kinds, vec!["route_created", "request_routed"]);
    }

    #[test]
    fn test_statistics_counters() {
        let hub = hub();
        hub.register_route(api_route()).unwrap();

        hub.route_request(&get("/api/users"));
        hub.route_request(&get("/api/orders"));
        hub.route_request(&get("/nope"));

        let stats = hub.statistics();
        assert_eq!(stats.requests_routed, 2);
        assert_eq!(stats.requests_failed, 1);
        assert_eq!(stats.requests_blocked, 0);
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.routes, 1);
        assert_eq!(stats.enabled_routes, 1);
        assert_eq!(stats.history_entries, 3);
    }

    #[test]
    fn test_recompute_statistics_aggregates_history() {
        let hub = hub();
        let route = hub.register_route(api_route()).unwrap();

        hub.route_request(&get("/api/a"));
        hub.route_request(&get("/api/b"));
        hub.recompute_statistics();

        let usage = route.stats.load();
        assert_eq!(usage.total_requests, 2);
        assert_eq!(usage.routed, 2);
        assert_eq!(usage.failed, 0);
        assert!(usage.updated_at.is_some());
        assert!(usage.max_duration_ms >= usage.min_duration_ms);
    }

    #[test]
    fn test_from_config_registers_everything() {
        let config = HubConfig::builder()
            .route(api_route())
            .route(RouteSpec::single_target(
                "web",
                "*",
                "/",
                "http://frontend:3000",
            ))
            .policy(PolicySpec {
                name: "audit-everything".to_string(),
                priority: 0,
                conditions: vec![],
                actions: vec![ActionSpec::Log { level: None }],
                enabled: true,
            })
            .build();

        let hub = RoutingHub::from_config(&config, Arc::new(NullAuditSink)).unwrap();
        assert_eq!(hub.routes().len(), 2);
        assert_eq!(hub.policies().len(), 1);
        assert!(hub.route_request(&get("/api/users")).success);
    }

    #[test]
    fn test_request_context_header_lookup_is_case_insensitive() {
        let request = RequestContext::new("GET", "/", "127.0.0.1")
            .with_header("X-Custom", "v")
            .with_header("User-Agent", "test-agent");
        assert_eq!(request.header("x-custom"), Some("v"));
        assert_eq!(request.header("X-CUSTOM"), Some("v"));
        assert_eq!(request.user_agent.as_deref(), Some("test-agent"));
    }
}
