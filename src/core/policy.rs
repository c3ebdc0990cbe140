//! Traffic policy engine.
//!
//! Policies gate requests before route resolution. Each policy is an ordered
//! list of conditions (all must hold) and an ordered list of actions. Policies
//! are evaluated highest priority first, ties in registration order, and the
//! first halting action (deny, delay, failed rate-limit draw) decides the
//! request. Condition and action specs are compiled once at registration so
//! the request path never parses regexes or duration strings.
use std::{
    borrow::Cow,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use arc_swap::ArcSwap;
use chrono::{DateTime, Timelike, Utc};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::models::{ActionSpec, ConditionKind, ConditionOperator, ConditionSpec, PolicySpec},
    core::{events::AuditEvent, history::RequestHistory, hub::RequestContext},
    ports::audit::AuditSink,
};

const KNOWN_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Errors raised while compiling a policy spec at admin time
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PolicyError {
    #[error("Policy name must not be empty")]
    EmptyName,

    #[error("Policy '{0}' has no actions")]
    NoActions(String),

    #[error("Policy '{policy}': condition of kind {kind:?} requires a key")]
    MissingKey { policy: String, kind: ConditionKind },

    #[error("Policy '{policy}': invalid regex: {reason}")]
    InvalidRegex { policy: String, reason: String },

    #[error("Policy '{policy}': operator {operator:?} expects {expected}")]
    InvalidValue {
        policy: String,
        operator: ConditionOperator,
        expected: &'static str,
    },

    #[error("Policy '{policy}': invalid duration '{value}': {reason}")]
    InvalidDuration {
        policy: String,
        value: String,
        reason: String,
    },

    #[error("Policy '{policy}': allow_probability must be within 0.0..=1.0, got {value}")]
    InvalidProbability { policy: String, value: f64 },

    #[error("Policy '{policy}': unknown log level '{level}'")]
    UnknownLogLevel { policy: String, level: String },
}

/// Result type for policy operations
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Verdict of one policy-engine pass over a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyVerdict {
    /// No policy objected
    Allow,
    /// A delay action fired; the request proceeds after the given pause
    AllowWithDelay { policy: String, delay: Duration },
    /// A deny (or failed rate-limit draw) fired
    Blocked {
        policy_id: Uuid,
        policy: String,
        message: String,
    },
}

/// Compiled runtime action
#[derive(Debug, Clone)]
enum PolicyAction {
    Deny { message: Option<String> },
    Delay { duration: Duration },
    RateLimit { allow_probability: f64 },
    Log { level: String },
}

fn value_as_text(value: &serde_json::Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    }
}

fn value_as_number(
    policy: &str,
    operator: ConditionOperator,
    value: &serde_json::Value,
) -> PolicyResult<f64> {
    value.as_f64().ok_or(PolicyError::InvalidValue {
        policy: policy.to_string(),
        operator,
        expected: "a number",
    })
}

/// What a condition saw on the request
enum Observed<'a> {
    Text(&'a str),
    Number(f64),
    Missing,
}

impl Observed<'_> {
    fn as_number(&self) -> Option<f64> {
        match self {
            Observed::Number(n) => Some(*n),
            Observed::Text(s) => s.parse().ok(),
            Observed::Missing => None,
        }
    }

    fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Observed::Text(s) => Some(Cow::Borrowed(*s)),
            Observed::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    Some(Cow::Owned(format!("{}", *n as i64)))
                } else {
                    Some(Cow::Owned(n.to_string()))
                }
            }
            Observed::Missing => None,
        }
    }
}

fn json_equals(observed: &Observed<'_>, expected: &serde_json::Value) -> bool {
    if let (Some(obs), Some(exp)) = (observed.as_number(), expected.as_f64()) {
        return (obs - exp).abs() < f64::EPSILON;
    }
    match observed.as_text() {
        Some(obs) => obs == value_as_text(expected).as_str(),
        None => false,
    }
}

#[derive(Debug)]
enum CompiledOperator {
    Equals(serde_json::Value),
    Contains(String),
    Regex(Regex),
    In(Vec<serde_json::Value>),
    Gt(f64),
    Lt(f64),
    Between(f64, f64),
}

impl CompiledOperator {
    fn matches(&self, observed: &Observed<'_>) -> bool {
        match self {
            CompiledOperator::Equals(expected) => json_equals(observed, expected),
            CompiledOperator::Contains(needle) => observed
                .as_text()
                .is_some_and(|text| text.contains(needle.as_str())),
            CompiledOperator::Regex(re) => {
                observed.as_text().is_some_and(|text| re.is_match(&text))
            }
            CompiledOperator::In(options) => {
                options.iter().any(|option| json_equals(observed, option))
            }
            CompiledOperator::Gt(bound) => observed.as_number().is_some_and(|n| n > *bound),
            CompiledOperator::Lt(bound) => observed.as_number().is_some_and(|n| n < *bound),
            CompiledOperator::Between(lo, hi) => observed
                .as_number()
                .is_some_and(|n| n >= *lo && n <= *hi),
        }
    }
}

#[derive(Debug)]
struct CompiledCondition {
    kind: ConditionKind,
    /// Header names are lowercased at compile time
    key: Option<String>,
    operator: CompiledOperator,
    /// Rolling window for Rate conditions
    window: Duration,
}

impl CompiledCondition {
    fn from_spec(policy: &str, spec: &ConditionSpec) -> PolicyResult<Self> {
        if matches!(spec.kind, ConditionKind::Header | ConditionKind::Query)
            && spec.key.as_deref().is_none_or(str::is_empty)
        {
            return Err(PolicyError::MissingKey {
                policy: policy.to_string(),
                kind: spec.kind,
            });
        }

        let operator = match spec.operator {
            ConditionOperator::Equals => CompiledOperator::Equals(spec.value.clone()),
            ConditionOperator::Contains => CompiledOperator::Contains(value_as_text(&spec.value)),
            ConditionOperator::Regex => {
                let pattern = spec.value.as_str().ok_or(PolicyError::InvalidValue {
                    policy: policy.to_string(),
                    operator: spec.operator,
                    expected: "a string pattern",
                })?;
                let re = Regex::new(pattern).map_err(|e| PolicyError::InvalidRegex {
                    policy: policy.to_string(),
                    reason: e.to_string(),
                })?;
                CompiledOperator::Regex(re)
            }
            ConditionOperator::In => {
                let options = spec
                    .value
                    .as_array()
                    .ok_or(PolicyError::InvalidValue {
                        policy: policy.to_string(),
                        operator: spec.operator,
                        expected: "an array",
                    })?
                    .clone();
                CompiledOperator::In(options)
            }
            ConditionOperator::Gt => {
                CompiledOperator::Gt(value_as_number(policy, spec.operator, &spec.value)?)
            }
            ConditionOperator::Lt => {
                CompiledOperator::Lt(value_as_number(policy, spec.operator, &spec.value)?)
            }
            ConditionOperator::Between => {
                let bounds = spec
                    .value
                    .as_array()
                    .filter(|b| b.len() == 2)
                    .ok_or(PolicyError::InvalidValue {
                        policy: policy.to_string(),
                        operator: spec.operator,
                        expected: "a two-element numeric array",
                    })?;
                let lo = value_as_number(policy, spec.operator, &bounds[0])?;
                let hi = value_as_number(policy, spec.operator, &bounds[1])?;
                CompiledOperator::Between(lo, hi)
            }
        };

        let window =
            humantime::parse_duration(&spec.window).map_err(|e| PolicyError::InvalidDuration {
                policy: policy.to_string(),
                value: spec.window.clone(),
                reason: e.to_string(),
            })?;

        let key = spec.key.clone().map(|k| {
            if spec.kind == ConditionKind::Header {
                k.to_ascii_lowercase()
            } else {
                k
            }
        });

        Ok(Self {
            kind: spec.kind,
            key,
            operator,
            window,
        })
    }

    fn holds(
        &self,
        request: &RequestContext,
        received_at: DateTime<Utc>,
        history: &RequestHistory,
    ) -> bool {
        let observed = match self.kind {
            ConditionKind::Ip => Observed::Text(&request.client_ip),
            ConditionKind::Header => self
                .key
                .as_deref()
                .and_then(|k| request.header(k))
                .map_or(Observed::Missing, Observed::Text),
            ConditionKind::Query => self
                .key
                .as_deref()
                .and_then(|k| request.query_param(k))
                .map_or(Observed::Missing, Observed::Text),
            ConditionKind::Time => Observed::Number(f64::from(received_at.hour())),
            ConditionKind::Rate => {
                let since = received_at
                    - chrono::Duration::from_std(self.window)
                        .unwrap_or_else(|_| chrono::Duration::zero());
                let count = history.count_from_ip_since(&request.client_ip, since);
                Observed::Number(count as f64)
            }
        };
        self.operator.matches(&observed)
    }
}

/// One registered traffic policy. Shape is immutable after creation; only the
/// enabled flag and the counters move.
pub struct TrafficPolicy {
    pub id: Uuid,
    pub name: String,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    /// Registration order, the tie-break within equal priorities
    seq: u64,
    conditions: Vec<CompiledCondition>,
    actions: Vec<PolicyAction>,
    spec_conditions: Vec<ConditionSpec>,
    spec_actions: Vec<ActionSpec>,
    enabled: AtomicBool,
    applied: AtomicU64,
    blocked: AtomicU64,
}

impl TrafficPolicy {
    fn from_spec(spec: PolicySpec, seq: u64) -> PolicyResult<Self> {
        if spec.name.trim().is_empty() {
            return Err(PolicyError::EmptyName);
        }
        if spec.actions.is_empty() {
            return Err(PolicyError::NoActions(spec.name));
        }

        let conditions = spec
            .conditions
            .iter()
            .map(|c| CompiledCondition::from_spec(&spec.name, c))
            .collect::<PolicyResult<Vec<_>>>()?;

        let actions = spec
            .actions
            .iter()
            .map(|a| compile_action(&spec.name, a))
            .collect::<PolicyResult<Vec<_>>>()?;

        Ok(Self {
            id: Uuid::new_v4(),
            name: spec.name,
            priority: spec.priority,
            created_at: Utc::now(),
            seq,
            conditions,
            actions,
            spec_conditions: spec.conditions,
            spec_actions: spec.actions,
            enabled: AtomicBool::new(spec.enabled),
            applied: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Times this policy matched a request
    pub fn applied_count(&self) -> u64 {
        self.applied.load(Ordering::Acquire)
    }

    /// Times this policy denied a request
    pub fn blocked_count(&self) -> u64 {
        self.blocked.load(Ordering::Acquire)
    }

    /// True iff every condition holds (AND); a policy without conditions
    /// matches every request
    fn matches(
        &self,
        request: &RequestContext,
        received_at: DateTime<Utc>,
        history: &RequestHistory,
    ) -> bool {
        self.conditions
            .iter()
            .all(|c| c.holds(request, received_at, history))
    }

    pub fn to_view(&self) -> PolicyView {
        PolicyView {
            id: self.id,
            name: self.name.clone(),
            priority: self.priority,
            enabled: self.enabled(),
            applied: self.applied_count(),
            blocked: self.blocked_count(),
            conditions: self.spec_conditions.clone(),
            actions: self.spec_actions.clone(),
            created_at: self.created_at,
        }
    }
}

impl std::fmt::Debug for TrafficPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficPolicy")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("conditions", &self.conditions.len())
            .field("actions", &self.actions.len())
            .field("enabled", &self.enabled())
            .finish()
    }
}

fn compile_action(policy: &str, spec: &ActionSpec) -> PolicyResult<PolicyAction> {
    Ok(match spec {
        ActionSpec::Deny { message } => PolicyAction::Deny {
            message: message.clone(),
        },
        ActionSpec::Delay { duration } => PolicyAction::Delay {
            duration: humantime::parse_duration(duration).map_err(|e| {
                PolicyError::InvalidDuration {
                    policy: policy.to_string(),
                    value: duration.clone(),
                    reason: e.to_string(),
                }
            })?,
        },
        ActionSpec::RateLimit { allow_probability } => {
            if !(0.0..=1.0).contains(allow_probability) {
                return Err(PolicyError::InvalidProbability {
                    policy: policy.to_string(),
                    value: *allow_probability,
                });
            }
            PolicyAction::RateLimit {
                allow_probability: *allow_probability,
            }
        }
        ActionSpec::Log { level } => {
            let level = level
                .as_deref()
                .unwrap_or("info")
                .to_ascii_lowercase();
            if !KNOWN_LOG_LEVELS.contains(&level.as_str()) {
                return Err(PolicyError::UnknownLogLevel {
                    policy: policy.to_string(),
                    level,
                });
            }
            PolicyAction::Log { level }
        }
    })
}

/// Serializable snapshot of one policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyView {
    pub id: Uuid,
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    pub applied: u64,
    pub blocked: u64,
    pub conditions: Vec<ConditionSpec>,
    pub actions: Vec<ActionSpec>,
    pub created_at: DateTime<Utc>,
}

/// Ordered collection of traffic policies behind an atomically swapped
/// snapshot. Registration rebuilds and re-sorts the snapshot; evaluation
/// walks it lock-free.
pub struct PolicyEngine {
    policies: ArcSwap<Vec<Arc<TrafficPolicy>>>,
    seq: AtomicU64,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    pub fn new() -> Self {
        Self {
            policies: ArcSwap::from_pointee(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Compile and register a policy spec; rejects malformed specs so they
    /// never reach the request path
    pub fn register(&self, spec: PolicySpec) -> PolicyResult<Arc<TrafficPolicy>> {
        let seq = self.seq.fetch_add(1, Ordering::AcqRel);
        let policy = Arc::new(TrafficPolicy::from_spec(spec, seq)?);

        let inserted = policy.clone();
        self.policies.rcu(move |current| {
            let mut next: Vec<Arc<TrafficPolicy>> = current.iter().cloned().collect();
            next.push(inserted.clone());
            next.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.seq.cmp(&b.seq)));
            next
        });

        tracing::info!(policy = %policy.name, priority = policy.priority, "Traffic policy registered");
        Ok(policy)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<TrafficPolicy>> {
        self.policies.load().iter().find(|p| p.id == id).cloned()
    }

    /// Toggle a policy; returns false when the id is unknown
    pub fn set_enabled(&self, id: Uuid, enabled: bool) -> bool {
        match self.get(id) {
            Some(policy) => {
                policy.set_enabled(enabled);
                true
            }
            None => false,
        }
    }

    pub fn policies(&self) -> Vec<Arc<TrafficPolicy>> {
        self.policies.load().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.policies.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.load().is_empty()
    }

    /// Evaluate all enabled policies against one request.
    ///
    /// Matching increments the policy's applied counter and emits a
    /// policy-matched audit record; deny paths additionally increment the
    /// blocked counter. The first halting action wins.
    pub fn evaluate(
        &self,
        request_id: Uuid,
        request: &RequestContext,
        received_at: DateTime<Utc>,
        history: &RequestHistory,
        audit: &dyn AuditSink,
    ) -> PolicyVerdict {
        let policies = self.policies.load();
        for policy in policies.iter() {
            if !policy.enabled() {
                continue;
            }
            if !policy.matches(request, received_at, history) {
                continue;
            }

            policy.applied.fetch_add(1, Ordering::AcqRel);
            audit.record(AuditEvent::PolicyMatched {
                policy_id: policy.id,
                policy: policy.name.clone(),
                request_id,
                client_ip: request.client_ip.clone(),
                path: request.path.clone(),
            });
            tracing::debug!(policy = %policy.name, path = %request.path, "Traffic policy matched");

            for action in &policy.actions {
                match action {
                    PolicyAction::Deny { message } => {
                        policy.blocked.fetch_add(1, Ordering::AcqRel);
                        let message = message.clone().unwrap_or_else(|| {
                            format!("Request blocked by policy '{}'", policy.name)
                        });
                        return PolicyVerdict::Blocked {
                            policy_id: policy.id,
                            policy: policy.name.clone(),
                            message,
                        };
                    }
                    PolicyAction::Delay { duration } => {
                        return PolicyVerdict::AllowWithDelay {
                            policy: policy.name.clone(),
                            delay: *duration,
                        };
                    }
                    PolicyAction::RateLimit { allow_probability } => {
                        let draw: f64 = rand::rng().random();
                        if draw >= *allow_probability {
                            policy.blocked.fetch_add(1, Ordering::AcqRel);
                            return PolicyVerdict::Blocked {
                                policy_id: policy.id,
                                policy: policy.name.clone(),
                                message: format!(
                                    "Request rate limited by policy '{}'",
                                    policy.name
                                ),
                            };
                        }
                    }
                    PolicyAction::Log { level } => {
                        audit.record(AuditEvent::PolicyLog {
                            policy_id: policy.id,
                            policy: policy.name.clone(),
                            level: level.clone(),
                            request_id,
                            method: request.method.clone(),
                            path: request.path.clone(),
                            client_ip: request.client_ip.clone(),
                        });
                    }
                }
            }
        }
        PolicyVerdict::Allow
    }
}
