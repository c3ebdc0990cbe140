//! Configuration data structures for Vane.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. They are
//! intentionally serde‑friendly and include defaults so that minimal configs remain concise.
//! They describe routes and policies at *admin time*; the runtime state built from them
//! lives in [`crate::core`]. Duration fields are humantime strings ("30s", "5m", "7d").
use serde::{Deserialize, Serialize};

fn default_enabled() -> bool {
    true
}

fn default_method() -> String {
    "*".to_string()
}

fn default_weight() -> u32 {
    1
}

fn default_error_threshold_pct() -> u8 {
    50
}

fn default_recovery_time() -> String {
    "30s".to_string()
}

fn default_timeout_threshold() -> String {
    "5s".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff() -> String {
    "100ms".to_string()
}

fn default_retry_on_status() -> Vec<u16> {
    vec![502, 503, 504]
}

fn default_probe_path() -> String {
    "/health".to_string()
}

fn default_probe_timeout() -> String {
    "2s".to_string()
}

fn default_health_interval() -> String {
    "10s".to_string()
}

fn default_max_entries() -> usize {
    50_000
}

fn default_retention() -> String {
    "7d".to_string()
}

fn default_sweep_interval() -> String {
    "60s".to_string()
}

fn default_stats_interval() -> String {
    "30s".to_string()
}

fn default_allow_probability() -> f64 {
    0.5
}

fn default_rate_window() -> String {
    "60s".to_string()
}

/// One backend instance a route can dispatch to.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TargetSpec {
    /// Backend base URL (http:// or https://)
    pub url: String,
    /// Relative selection weight for the weighted strategy
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Dispatch priority (informational, carried through to views)
    #[serde(default)]
    pub priority: u32,
}

/// Strategy used to pick one target among a route's healthy targets.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    #[default]
    RoundRobin,
    Random,
    Weighted,
    LeastConnections,
    IpHash,
}

impl std::fmt::Display for LoadBalanceStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoadBalanceStrategy::RoundRobin => "round_robin",
            LoadBalanceStrategy::Random => "random",
            LoadBalanceStrategy::Weighted => "weighted",
            LoadBalanceStrategy::LeastConnections => "least_connections",
            LoadBalanceStrategy::IpHash => "ip_hash",
        };
        write!(f, "{name}")
    }
}

/// Per‑route circuit breaker parameters.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Error percentage (1..=100) above which the breaker opens
    pub error_threshold_pct: u8,
    /// How long the breaker stays OPEN before probing (humantime string)
    pub recovery_time: String,
    /// Per-dispatch timeout hint handed to the transport (humantime string)
    pub timeout_threshold: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            error_threshold_pct: default_error_threshold_pct(),
            recovery_time: default_recovery_time(),
            timeout_threshold: default_timeout_threshold(),
        }
    }
}

/// Retry hints handed to the external transport layer. The core never retries
/// a dispatch itself; it only makes this configuration discoverable.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Backoff between attempts (humantime string)
    pub backoff: String,
    /// Status codes the transport should consider retryable
    pub retry_on_status: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
            retry_on_status: default_retry_on_status(),
        }
    }
}

/// Per-route health probing policy. The probe itself is an injected
/// collaborator; this only states whether and how a route's targets are probed.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthCheckPolicy {
    pub enabled: bool,
    /// Probe path appended to each target URL
    pub path: String,
    /// Per-probe timeout (humantime string)
    pub timeout: String,
}

impl Default for HealthCheckPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_probe_path(),
            timeout: default_probe_timeout(),
        }
    }
}

/// A registered rule mapping an HTTP method + path pattern to backend targets.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RouteSpec {
    pub name: String,
    /// HTTP method, or "*" to match any method
    #[serde(default = "default_method")]
    pub method: String,
    /// Path pattern; `*` matches any sequence, `?` matches one character
    pub pattern: String,
    /// Ordered middleware names, carried through untouched
    #[serde(default)]
    pub middlewares: Vec<String>,
    pub targets: Vec<TargetSpec>,
    #[serde(default)]
    pub strategy: LoadBalanceStrategy,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub health_check: HealthCheckPolicy,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// What a policy condition inspects on the inbound request.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Client IP address
    Ip,
    /// A request header (requires `key`)
    Header,
    /// A query parameter (requires `key`)
    Query,
    /// Hour of day, 0..=23 (UTC)
    Time,
    /// Requests from the same client IP within a rolling window
    Rate,
}

/// Comparison applied between the inspected value and the configured one.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    Contains,
    Regex,
    In,
    Gt,
    Lt,
    Between,
}

/// One condition inside a traffic policy. All conditions of a policy must
/// match (AND) for the policy's actions to run.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConditionSpec {
    pub kind: ConditionKind,
    /// Header / query parameter name, where the kind needs one
    #[serde(default)]
    pub key: Option<String>,
    pub operator: ConditionOperator,
    /// Comparison operand; shape depends on the operator (scalar, array, or
    /// two-element range)
    pub value: serde_json::Value,
    /// Rolling window for `Rate` conditions (humantime string, default "60s")
    #[serde(default = "default_rate_window")]
    pub window: String,
}

/// Action taken when a policy matches. Actions run in list order.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ActionSpec {
    /// Reject the request outright
    Deny {
        #[serde(default)]
        message: Option<String>,
    },
    /// Let the request through after an imposed delay
    Delay {
        /// Humantime string, e.g. "250ms"
        duration: String,
    },
    /// Probabilistic acceptance: the request is admitted with
    /// `allow_probability`, otherwise denied
    RateLimit {
        #[serde(default = "default_allow_probability")]
        allow_probability: f64,
    },
    /// Emit an audit record and keep evaluating
    Log {
        #[serde(default)]
        level: Option<String>,
    },
}

/// A condition/action rule evaluated before routing.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PolicySpec {
    pub name: String,
    /// Higher priorities are evaluated first
    #[serde(default)]
    pub priority: i32,
    pub conditions: Vec<ConditionSpec>,
    pub actions: Vec<ActionSpec>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Bounds on the in-memory request history ring.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    /// Hard cap on retained request records; oldest evicted first
    pub max_entries: usize,
    /// Age past which the sweeper drops records (humantime string)
    pub retention: String,
    /// Sweep cadence (humantime string)
    pub sweep_interval: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            retention: default_retention(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// Global health checking cadence. Per-route probing specifics live in each
/// route's [`HealthCheckPolicy`].
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    /// Probe cycle interval (humantime string)
    pub interval: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: default_health_interval(),
        }
    }
}

/// Top-level hub configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct HubConfig {
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
    #[serde(default)]
    pub policies: Vec<PolicySpec>,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    /// Usage statistics recomputation cadence (humantime string)
    #[serde(default = "default_stats_interval")]
    pub stats_interval: String,
}

impl HubConfig {
    /// Create a new hub configuration builder
    pub fn builder() -> HubConfigBuilder {
        HubConfigBuilder::default()
    }
}

/// Builder for HubConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct HubConfigBuilder {
    routes: Vec<RouteSpec>,
    policies: Vec<PolicySpec>,
    history: Option<HistoryConfig>,
    health_check: Option<HealthCheckConfig>,
    stats_interval: Option<String>,
}

impl HubConfigBuilder {
    /// Add a route specification
    pub fn route(mut self, route: RouteSpec) -> Self {
        self.routes.push(route);
        self
    }

    /// Add a traffic policy specification
    pub fn policy(mut self, policy: PolicySpec) -> Self {
        self.policies.push(policy);
        self
    }

    /// Set history bounds
    pub fn history(mut self, history: HistoryConfig) -> Self {
        self.history = Some(history);
        self
    }

    /// Set the global health checking cadence
    pub fn health_check(mut self, health_check: HealthCheckConfig) -> Self {
        self.health_check = Some(health_check);
        self
    }

    /// Set the statistics recomputation cadence
    pub fn stats_interval(mut self, interval: impl Into<String>) -> Self {
        self.stats_interval = Some(interval.into());
        self
    }

    /// Build the final HubConfig
    pub fn build(self) -> HubConfig {
        HubConfig {
            routes: self.routes,
            policies: self.policies,
            history: self.history.unwrap_or_default(),
            health_check: self.health_check.unwrap_or_default(),
            stats_interval: self
                .stats_interval
                .unwrap_or_else(default_stats_interval),
        }
    }
}

impl RouteSpec {
    /// Minimal route spec with a single target, defaults everywhere else.
    /// Mostly a convenience for tests and embedding.
    pub fn single_target(
        name: impl Into<String>,
        method: impl Into<String>,
        pattern: impl Into<String>,
        target_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            method: method.into(),
            pattern: pattern.into(),
            middlewares: Vec::new(),
            targets: vec![TargetSpec {
                url: target_url.into(),
                weight: default_weight(),
                priority: 0,
            }],
            strategy: LoadBalanceStrategy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            health_check: HealthCheckPolicy::default(),
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_spec_defaults() {
        let spec: RouteSpec = serde_json::from_value(serde_json::json!({
            "name": "api",
            "pattern": "/api/*",
            "targets": [{"url": "http://backend-1:8080"}]
        }))
        .expect("route spec deserializes");
        assert_eq!(spec.method, "*");
        assert_eq!(spec.strategy, LoadBalanceStrategy::RoundRobin);
        assert!(spec.enabled);
        assert_eq!(spec.targets[0].weight, 1);
        assert_eq!(spec.circuit_breaker.error_threshold_pct, 50);
    }

    #[test]
    fn test_action_spec_tagged_deserialization() {
        let action: ActionSpec = serde_json::from_value(serde_json::json!({
            "type": "deny",
            "message": "blocked by security policy"
        }))
        .expect("deny action deserializes");
        assert!(matches!(action, ActionSpec::Deny { message: Some(m) } if m.contains("security")));

        let action: ActionSpec =
            serde_json::from_value(serde_json::json!({"type": "rate_limit"}))
                .expect("rate_limit action deserializes");
        assert!(
            matches!(action, ActionSpec::RateLimit { allow_probability } if (allow_probability - 0.5).abs() < f64::EPSILON)
        );
    }

    #[test]
    fn test_condition_spec_defaults() {
        let cond: ConditionSpec = serde_json::from_value(serde_json::json!({
            "kind": "rate",
            "operator": "gt",
            "value": 100
        }))
        .expect("rate condition deserializes");
        assert_eq!(cond.kind, ConditionKind::Rate);
        assert_eq!(cond.window, "60s");
        assert!(cond.key.is_none());
    }

    #[test]
    fn test_hub_config_builder() {
        let config = HubConfig::builder()
            .route(RouteSpec::single_target(
                "health",
                "GET",
                "/api/health",
                "http://svc:9000",
            ))
            .stats_interval("15s")
            .build();

        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.stats_interval, "15s");
        assert_eq!(config.history.max_entries, 50_000);
        assert!(config.health_check.enabled);
    }
}
