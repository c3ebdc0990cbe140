use std::{
    fmt,
    str::FromStr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::models::{
        HealthCheckPolicy, LoadBalanceStrategy, RetryConfig, RouteSpec, TargetSpec,
    },
    core::{
        circuit_breaker::CircuitBreaker,
        load_balancer::{LoadBalancerFactory, SelectionContext, TargetSelector},
    },
    metrics::set_target_health_status,
};

// Constants for health status to replace magic numbers
const HEALTH_STATUS_UNHEALTHY: u8 = 0;
const HEALTH_STATUS_HEALTHY: u8 = 1;

/// Errors raised while building runtime routes from admin-time specs
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RouteError {
    /// Error when a target URL is invalid
    #[error("Invalid target URL: {0}")]
    InvalidUrl(String),

    /// Error when a duration string cannot be parsed
    #[error("Invalid duration for {field}: '{value}': {reason}")]
    InvalidDuration {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// Error when a route spec carries no targets
    #[error("Route '{0}' has no targets")]
    NoTargets(String),
}

/// Result type for route operations
pub type RouteResult<T> = Result<T, RouteError>;

fn parse_duration(field: &'static str, value: &str) -> RouteResult<Duration> {
    humantime::parse_duration(value).map_err(|e| RouteError::InvalidDuration {
        field,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

/// A type-safe representation of a backend target URL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetUrl {
    url: String,
    /// Whether the URL is secure (HTTPS)
    is_secure: bool,
}

impl TargetUrl {
    /// Creates a new TargetUrl if the provided string is a valid http(s) URL
    pub fn new(url: &str) -> RouteResult<Self> {
        let parsed = url::Url::parse(url).map_err(|e| RouteError::InvalidUrl(format!("{url}: {e}")))?;

        let is_secure = match parsed.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(RouteError::InvalidUrl(format!(
                    "Target URL must use http or https, got scheme '{other}': {url}"
                )));
            }
        };
        if parsed.host_str().is_none() {
            return Err(RouteError::InvalidUrl(format!("Target URL has no host: {url}")));
        }

        Ok(TargetUrl {
            url: url.trim_end_matches('/').to_string(),
            is_secure,
        })
    }

    /// Get the underlying URL as a string reference
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Check if the URL is using HTTPS
    pub fn is_secure(&self) -> bool {
        self.is_secure
    }

    /// Get the underlying URL as a string
    pub fn into_string(self) -> String {
        self.url
    }
}

impl FromStr for TargetUrl {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TargetUrl::new(s)
    }
}

impl fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Health of a single target as seen by the last probe cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Live state of one backend target.
///
/// Shared between the request path and the health-check loop; every field the
/// two sides race on is an atomic. The probe timestamp sits behind a short
/// std mutex because `DateTime` does not fit an atomic.
#[derive(Debug)]
pub struct TargetState {
    pub id: Uuid,
    pub url: TargetUrl,
    pub weight: u32,
    pub priority: u32,
    /// Current health status (uses atomic for thread safety)
    status: AtomicU8, // Uses HEALTH_STATUS_* constants
    connections: AtomicU32,
    error_count: AtomicU32,
    response_time_ms: AtomicU64,
    last_check: Mutex<Option<DateTime<Utc>>>,
}

impl TargetState {
    /// Build target state from its spec; targets start healthy until a probe
    /// says otherwise
    pub fn from_spec(spec: &TargetSpec) -> RouteResult<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            url: TargetUrl::new(&spec.url)?,
            weight: spec.weight,
            priority: spec.priority,
            status: AtomicU8::new(HEALTH_STATUS_HEALTHY),
            connections: AtomicU32::new(0),
            error_count: AtomicU32::new(0),
            response_time_ms: AtomicU64::new(0),
            last_check: Mutex::new(None),
        })
    }

    /// Get the current health status
    pub fn status(&self) -> HealthStatus {
        // Use Acquire ordering for better correctness when reading status
        if self.status.load(Ordering::Acquire) == HEALTH_STATUS_HEALTHY {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status() == HealthStatus::Healthy
    }

    /// Mark the target healthy
    pub fn mark_healthy(&self) {
        // Use Release ordering for updates to ensure visibility to other threads
        self.status.store(HEALTH_STATUS_HEALTHY, Ordering::Release);
        set_target_health_status(self.url.as_str(), true);
    }

    /// Mark the target unhealthy and bump its rolling error count
    pub fn mark_unhealthy(&self) {
        self.status
            .store(HEALTH_STATUS_UNHEALTHY, Ordering::Release);
        self.error_count.fetch_add(1, Ordering::AcqRel);
        set_target_health_status(self.url.as_str(), false);
    }

    /// Apply one probe result: health flag, response-time sample and the
    /// check timestamp together
    pub fn record_probe(&self, healthy: bool, response_time_ms: u64, at: DateTime<Utc>) {
        if healthy {
            self.mark_healthy();
        } else {
            self.mark_unhealthy();
        }
        self.response_time_ms
            .store(response_time_ms, Ordering::Release);
        if let Ok(mut last) = self.last_check.lock() {
            *last = Some(at);
        }
    }

    /// Increment the active connection count; returns the new count
    pub fn increment_connections(&self) -> u32 {
        self.connections.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrement the active connection count, saturating at zero
    pub fn decrement_connections(&self) {
        let _ = self
            .connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));
    }

    pub fn connections(&self) -> u32 {
        self.connections.load(Ordering::Acquire)
    }

    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Acquire)
    }

    pub fn response_time_ms(&self) -> u64 {
        self.response_time_ms.load(Ordering::Acquire)
    }

    pub fn last_check(&self) -> Option<DateTime<Utc>> {
        self.last_check.lock().ok().and_then(|g| *g)
    }

    fn to_view(&self) -> TargetView {
        TargetView {
            id: self.id,
            url: self.url.as_str().to_string(),
            weight: self.weight,
            priority: self.priority,
            healthy: self.is_healthy(),
            connections: self.connections(),
            error_count: self.error_count(),
            response_time_ms: self.response_time_ms(),
            last_check: self.last_check(),
        }
    }
}

/// Per-route probe policy with durations parsed
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub enabled: bool,
    pub path: String,
    pub timeout: Duration,
}

impl ProbeSettings {
    pub fn from_config(config: &HealthCheckPolicy) -> RouteResult<Self> {
        Ok(Self {
            enabled: config.enabled,
            path: config.path.clone(),
            timeout: parse_duration("health_check.timeout", &config.timeout)?,
        })
    }
}

/// Per-route usage statistics, recomputed periodically from request history.
/// Replaced wholesale through an `ArcSwap` so readers never observe a
/// half-updated window.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouteUsageStats {
    pub total_requests: u64,
    pub routed: u64,
    pub failed: u64,
    pub avg_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Runtime representation of one registered route.
///
/// Built once from a [`RouteSpec`] at registration; mutable pieces (enabled
/// flag, target health, breaker, usage stats, the selector's cursor) are all
/// internally synchronized so the route itself can sit behind a plain `Arc`.
pub struct Route {
    pub id: Uuid,
    pub name: String,
    /// Uppercase HTTP method, or "*" for any
    pub method: String,
    pub pattern: String,
    pub middlewares: Vec<String>,
    pub strategy: LoadBalanceStrategy,
    pub retry: RetryConfig,
    pub probe: ProbeSettings,
    pub targets: Vec<Arc<TargetState>>,
    pub breaker: CircuitBreaker,
    pub stats: ArcSwap<RouteUsageStats>,
    pub created_at: DateTime<Utc>,
    enabled: AtomicBool,
    selector: Box<dyn TargetSelector>,
}

impl Route {
    /// Build a runtime route from its spec. Rejects empty target lists,
    /// invalid URLs and unparseable durations; a spec that passes
    /// [`crate::config::HubConfigValidator`] always builds.
    pub fn from_spec(spec: RouteSpec) -> RouteResult<Self> {
        if spec.targets.is_empty() {
            return Err(RouteError::NoTargets(spec.name.clone()));
        }

        let targets = spec
            .targets
            .iter()
            .map(TargetState::from_spec)
            .map(|t| t.map(Arc::new))
            .collect::<RouteResult<Vec<_>>>()?;

        let breaker = CircuitBreaker::from_config(&spec.name, &spec.circuit_breaker)?;
        let probe = ProbeSettings::from_config(&spec.health_check)?;
        let selector = LoadBalancerFactory::create_selector(spec.strategy);

        Ok(Self {
            id: Uuid::new_v4(),
            name: spec.name,
            method: spec.method.to_ascii_uppercase(),
            pattern: spec.pattern,
            middlewares: spec.middlewares,
            strategy: spec.strategy,
            retry: spec.retry,
            probe,
            targets,
            breaker,
            stats: ArcSwap::from_pointee(RouteUsageStats::default()),
            created_at: Utc::now(),
            enabled: AtomicBool::new(spec.enabled),
            selector,
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Targets currently marked healthy, in declaration order
    pub fn healthy_targets(&self) -> Vec<Arc<TargetState>> {
        self.targets
            .iter()
            .filter(|t| t.is_healthy())
            .cloned()
            .collect()
    }

    /// Pick a target among the healthy set using the route's strategy.
    /// Returns `None` iff no target is healthy.
    pub fn select_target(&self, client_ip: &str) -> Option<Arc<TargetState>> {
        let healthy = self.healthy_targets();
        self.selector
            .select(&healthy, &SelectionContext { client_ip })
    }

    pub fn target(&self, target_id: Uuid) -> Option<Arc<TargetState>> {
        self.targets.iter().find(|t| t.id == target_id).cloned()
    }

    /// Snapshot view of the route for admin surfaces
    pub fn to_view(&self) -> RouteView {
        RouteView {
            id: self.id,
            name: self.name.clone(),
            method: self.method.clone(),
            pattern: self.pattern.clone(),
            strategy: self.strategy,
            middlewares: self.middlewares.clone(),
            enabled: self.enabled(),
            created_at: self.created_at,
            targets: self.targets.iter().map(|t| t.to_view()).collect(),
            breaker: self.breaker.snapshot(),
            retry: self.retry.clone(),
            usage: self.stats.load().as_ref().clone(),
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("strategy", &self.strategy)
            .field("targets", &self.targets.len())
            .field("enabled", &self.enabled())
            .finish()
    }
}

/// Serializable snapshot of one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetView {
    pub id: Uuid,
    pub url: String,
    pub weight: u32,
    pub priority: u32,
    pub healthy: bool,
    pub connections: u32,
    pub error_count: u32,
    pub response_time_ms: u64,
    pub last_check: Option<DateTime<Utc>>,
}

/// Serializable snapshot of one route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteView {
    pub id: Uuid,
    pub name: String,
    pub method: String,
    pub pattern: String,
    pub strategy: LoadBalanceStrategy,
    pub middlewares: Vec<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub targets: Vec<TargetView>,
    pub breaker: crate::core::circuit_breaker::BreakerSnapshot,
    pub retry: RetryConfig,
    pub usage: RouteUsageStats,
}

/// One probe result handed back to the hub by the health-check loop
#[derive(Debug, Clone)]
pub struct TargetHealthReport {
    pub target_id: Uuid,
    pub healthy: bool,
    pub response_time_ms: u64,
    /// Why the probe judged the target unhealthy; `None` on success
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::RouteSpec;

    #[test]
    fn test_target_url_valid() {
        let url = "http://example.com";
        let target_url = TargetUrl::new(url).expect("Valid HTTP URL should parse");
        assert_eq!(target_url.as_str(), url);
        assert!(!target_url.is_secure());

        let secure_url = "https://secure.example.com";
        let secure_target_url = TargetUrl::new(secure_url).expect("Valid HTTPS URL should parse");
        assert_eq!(secure_target_url.as_str(), secure_url);
        assert!(secure_target_url.is_secure());
    }

    #[test]
    fn test_target_url_invalid() {
        assert!(TargetUrl::new("example.com").is_err());
        assert!(TargetUrl::new("ftp://example.com").is_err());
    }

    #[test]
    fn test_target_url_trims_trailing_slash() {
        let target_url = TargetUrl::new("http://example.com/").unwrap();
        assert_eq!(target_url.as_str(), "http://example.com");
    }

    #[test]
    fn test_target_state_initial() {
        let state = TargetState::from_spec(&TargetSpec {
            url: "http://example.com".to_string(),
            weight: 3,
            priority: 1,
        })
        .unwrap();

        assert_eq!(state.status(), HealthStatus::Healthy);
        assert_eq!(state.connections(), 0);
        assert_eq!(state.error_count(), 0);
        assert!(state.last_check().is_none());
    }

    #[test]
    fn test_record_probe_updates_all_fields() {
        let state = TargetState::from_spec(&TargetSpec {
            url: "http://example.com".to_string(),
            weight: 1,
            priority: 0,
        })
        .unwrap();

        let at = Utc::now();
        state.record_probe(false, 120, at);

        assert_eq!(state.status(), HealthStatus::Unhealthy);
        assert_eq!(state.error_count(), 1);
        assert_eq!(state.response_time_ms(), 120);
        assert_eq!(state.last_check(), Some(at));

        state.record_probe(true, 35, at);
        assert_eq!(state.status(), HealthStatus::Healthy);
        // Error count is rolling, not reset by recovery
        assert_eq!(state.error_count(), 1);
    }

    #[test]
    fn test_connection_count_never_underflows() {
        let state = TargetState::from_spec(&TargetSpec {
            url: "http://example.com".to_string(),
            weight: 1,
            priority: 0,
        })
        .unwrap();

        assert_eq!(state.increment_connections(), 1);
        state.decrement_connections();
        state.decrement_connections();
        assert_eq!(state.connections(), 0);
    }

    #[test]
    fn test_route_from_spec_normalizes_method() {
        let route = Route::from_spec(RouteSpec::single_target(
            "api",
            "get",
            "/api/*",
            "http://backend:8080",
        ))
        .unwrap();

        assert_eq!(route.method, "GET");
        assert!(route.enabled());
        assert_eq!(route.targets.len(), 1);
    }

    #[test]
    fn test_route_from_spec_rejects_empty_targets() {
        let mut spec = RouteSpec::single_target("api", "GET", "/api/*", "http://backend:8080");
        spec.targets.clear();

        assert!(matches!(
            Route::from_spec(spec),
            Err(RouteError::NoTargets(_))
        ));
    }

    #[test]
    fn test_healthy_targets_filtering() {
        let mut spec = RouteSpec::single_target("api", "GET", "/api/*", "http://backend-1:8080");
        spec.targets.push(TargetSpec {
            url: "http://backend-2:8080".to_string(),
            weight: 1,
            priority: 0,
        });
        let route = Route::from_spec(spec).unwrap();

        assert_eq!(route.healthy_targets().len(), 2);
        route.targets[0].mark_unhealthy();
        let healthy = route.healthy_targets();
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].url.as_str(), "http://backend-2:8080");
    }
}
