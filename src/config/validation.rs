//! Configuration validation.
//!
//! Validates a [`HubConfig`] before any runtime state is built from it. All
//! problems are collected into a single `Vec<ValidationError>` so operators see
//! every mistake in one pass instead of fixing them one rejected reload at a time.
use std::collections::HashSet;

use http::Method;
use thiserror::Error;
use url::Url;

use crate::config::models::{
    ActionSpec, ConditionKind, ConditionOperator, ConditionSpec, HubConfig, PolicySpec, RouteSpec,
};

const KNOWN_METHODS: [Method; 9] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
    Method::HEAD,
    Method::OPTIONS,
    Method::TRACE,
    Method::CONNECT,
];

const KNOWN_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

pub type ValidationResult = Result<(), Vec<ValidationError>>;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Route '{route}': name must not be empty")]
    EmptyRouteName { route: String },

    #[error("Duplicate route name '{name}'")]
    DuplicateRouteName { name: String },

    #[error("Route '{route}': duplicate method/pattern pair '{method} {pattern}'")]
    DuplicateRoutePattern {
        route: String,
        method: String,
        pattern: String,
    },

    #[error("Route '{route}': pattern '{pattern}' must start with '/'")]
    InvalidPattern { route: String, pattern: String },

    #[error("Route '{route}': unknown HTTP method '{method}'")]
    UnknownMethod { route: String, method: String },

    #[error("Route '{route}': at least one target is required")]
    NoTargets { route: String },

    #[error("Route '{route}': invalid target URL '{url}': {reason}")]
    InvalidTargetUrl {
        route: String,
        url: String,
        reason: String,
    },

    #[error("Route '{route}': circuit breaker error threshold must be 1..=100, got {value}")]
    InvalidErrorThreshold { route: String, value: u8 },

    #[error("Route '{route}': retry max_attempts must be at least 1")]
    InvalidRetryAttempts { route: String },

    #[error("Route '{route}': retry_on_status {status} is not a valid HTTP status")]
    InvalidRetryStatus { route: String, status: u16 },

    #[error("Route '{route}': health check path '{path}' must start with '/'")]
    InvalidProbePath { route: String, path: String },

    #[error("Policy '{policy}': name must not be empty")]
    EmptyPolicyName { policy: String },

    #[error("Duplicate policy name '{name}'")]
    DuplicatePolicyName { name: String },

    #[error("Policy '{policy}': at least one action is required")]
    NoActions { policy: String },

    #[error("Policy '{policy}': condition #{index} of kind {kind:?} requires a key")]
    MissingConditionKey {
        policy: String,
        index: usize,
        kind: ConditionKind,
    },

    #[error("Policy '{policy}': condition #{index} has invalid regex: {reason}")]
    InvalidRegex {
        policy: String,
        index: usize,
        reason: String,
    },

    #[error(
        "Policy '{policy}': condition #{index} operator {operator:?} expects {expected}, got {got}"
    )]
    InvalidConditionValue {
        policy: String,
        index: usize,
        operator: ConditionOperator,
        expected: &'static str,
        got: String,
    },

    #[error("Policy '{policy}': rate_limit allow_probability must be within 0.0..=1.0, got {value}")]
    InvalidProbability { policy: String, value: f64 },

    #[error("Policy '{policy}': unknown log level '{level}'")]
    UnknownLogLevel { policy: String, level: String },

    #[error("{context}: invalid duration '{value}': {reason}")]
    InvalidDuration {
        context: String,
        value: String,
        reason: String,
    },

    #[error("History max_entries must be at least 1")]
    InvalidHistoryCapacity,
}

/// Validates hub configuration before runtime state is built from it
pub struct HubConfigValidator;

impl HubConfigValidator {
    /// Validate the entire hub configuration
    pub fn validate(config: &HubConfig) -> ValidationResult {
        let mut errors = Vec::new();

        Self::validate_routes(&config.routes, &mut errors);
        Self::validate_policies(&config.policies, &mut errors);

        if config.history.max_entries == 0 {
            errors.push(ValidationError::InvalidHistoryCapacity);
        }
        Self::check_duration("History retention", &config.history.retention, &mut errors);
        Self::check_duration(
            "History sweep_interval",
            &config.history.sweep_interval,
            &mut errors,
        );
        Self::check_duration(
            "Health check interval",
            &config.health_check.interval,
            &mut errors,
        );
        Self::check_duration("Stats interval", &config.stats_interval, &mut errors);

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    fn validate_routes(routes: &[RouteSpec], errors: &mut Vec<ValidationError>) {
        let mut seen_names = HashSet::new();
        let mut seen_patterns = HashSet::new();

        for route in routes {
            if route.name.trim().is_empty() {
                errors.push(ValidationError::EmptyRouteName {
                    route: route.name.clone(),
                });
            } else if !seen_names.insert(route.name.clone()) {
                errors.push(ValidationError::DuplicateRouteName {
                    name: route.name.clone(),
                });
            }

            let method = route.method.to_ascii_uppercase();
            if method != "*" && !KNOWN_METHODS.iter().any(|m| m.as_str() == method) {
                errors.push(ValidationError::UnknownMethod {
                    route: route.name.clone(),
                    method: route.method.clone(),
                });
            }

            if !route.pattern.starts_with('/') {
                errors.push(ValidationError::InvalidPattern {
                    route: route.name.clone(),
                    pattern: route.pattern.clone(),
                });
            } else if !seen_patterns.insert((method, route.pattern.clone())) {
                errors.push(ValidationError::DuplicateRoutePattern {
                    route: route.name.clone(),
                    method: route.method.clone(),
                    pattern: route.pattern.clone(),
                });
            }

            if route.targets.is_empty() {
                errors.push(ValidationError::NoTargets {
                    route: route.name.clone(),
                });
            }
            for target in &route.targets {
                Self::validate_target_url(&route.name, &target.url, errors);
            }

            let cb = &route.circuit_breaker;
            if cb.error_threshold_pct == 0 || cb.error_threshold_pct > 100 {
                errors.push(ValidationError::InvalidErrorThreshold {
                    route: route.name.clone(),
                    value: cb.error_threshold_pct,
                });
            }
            Self::check_duration(
                &format!("Route '{}' recovery_time", route.name),
                &cb.recovery_time,
                errors,
            );
            Self::check_duration(
                &format!("Route '{}' timeout_threshold", route.name),
                &cb.timeout_threshold,
                errors,
            );

            if route.retry.max_attempts == 0 {
                errors.push(ValidationError::InvalidRetryAttempts {
                    route: route.name.clone(),
                });
            }
            Self::check_duration(
                &format!("Route '{}' retry backoff", route.name),
                &route.retry.backoff,
                errors,
            );
            for status in &route.retry.retry_on_status {
                if !(100..=599).contains(status) {
                    errors.push(ValidationError::InvalidRetryStatus {
                        route: route.name.clone(),
                        status: *status,
                    });
                }
            }

            if !route.health_check.path.starts_with('/') {
                errors.push(ValidationError::InvalidProbePath {
                    route: route.name.clone(),
                    path: route.health_check.path.clone(),
                });
            }
            Self::check_duration(
                &format!("Route '{}' probe timeout", route.name),
                &route.health_check.timeout,
                errors,
            );
        }
    }

    fn validate_target_url(route: &str, url: &str, errors: &mut Vec<ValidationError>) {
        match Url::parse(url) {
            Ok(parsed) => {
                if !matches!(parsed.scheme(), "http" | "https") {
                    errors.push(ValidationError::InvalidTargetUrl {
                        route: route.to_string(),
                        url: url.to_string(),
                        reason: format!("unsupported scheme '{}'", parsed.scheme()),
                    });
                } else if parsed.host_str().is_none() {
                    errors.push(ValidationError::InvalidTargetUrl {
                        route: route.to_string(),
                        url: url.to_string(),
                        reason: "missing host".to_string(),
                    });
                }
            }
            Err(e) => {
                errors.push(ValidationError::InvalidTargetUrl {
                    route: route.to_string(),
                    url: url.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    fn validate_policies(policies: &[PolicySpec], errors: &mut Vec<ValidationError>) {
        let mut seen_names = HashSet::new();

        for policy in policies {
            if policy.name.trim().is_empty() {
                errors.push(ValidationError::EmptyPolicyName {
                    policy: policy.name.clone(),
                });
            } else if !seen_names.insert(policy.name.clone()) {
                errors.push(ValidationError::DuplicatePolicyName {
                    name: policy.name.clone(),
                });
            }

            if policy.actions.is_empty() {
                errors.push(ValidationError::NoActions {
                    policy: policy.name.clone(),
                });
            }

            for (index, condition) in policy.conditions.iter().enumerate() {
                Self::validate_condition(&policy.name, index, condition, errors);
            }

            for action in &policy.actions {
                match action {
                    ActionSpec::Delay { duration } => {
                        Self::check_duration(
                            &format!("Policy '{}' delay", policy.name),
                            duration,
                            errors,
                        );
                    }
                    ActionSpec::RateLimit { allow_probability } => {
                        if !(0.0..=1.0).contains(allow_probability) {
                            errors.push(ValidationError::InvalidProbability {
                                policy: policy.name.clone(),
                                value: *allow_probability,
                            });
                        }
                    }
                    ActionSpec::Log { level: Some(level) } => {
                        if !KNOWN_LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
                            errors.push(ValidationError::UnknownLogLevel {
                                policy: policy.name.clone(),
                                level: level.clone(),
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    fn validate_condition(
        policy: &str,
        index: usize,
        condition: &ConditionSpec,
        errors: &mut Vec<ValidationError>,
    ) {
        if matches!(condition.kind, ConditionKind::Header | ConditionKind::Query)
            && condition.key.as_deref().is_none_or(str::is_empty)
        {
            errors.push(ValidationError::MissingConditionKey {
                policy: policy.to_string(),
                index,
                kind: condition.kind,
            });
        }

        match condition.operator {
            ConditionOperator::Regex => match condition.value.as_str() {
                Some(pattern) => {
                    if let Err(e) = regex::Regex::new(pattern) {
                        errors.push(ValidationError::InvalidRegex {
                            policy: policy.to_string(),
                            index,
                            reason: e.to_string(),
                        });
                    }
                }
                None => errors.push(ValidationError::InvalidConditionValue {
                    policy: policy.to_string(),
                    index,
                    operator: condition.operator,
                    expected: "a string pattern",
                    got: condition.value.to_string(),
                }),
            },
            ConditionOperator::In => {
                if !condition.value.is_array() {
                    errors.push(ValidationError::InvalidConditionValue {
                        policy: policy.to_string(),
                        index,
                        operator: condition.operator,
                        expected: "an array",
                        got: condition.value.to_string(),
                    });
                }
            }
            ConditionOperator::Between => {
                let ok = condition
                    .value
                    .as_array()
                    .is_some_and(|bounds| bounds.len() == 2 && bounds.iter().all(|v| v.is_number()));
                if !ok {
                    errors.push(ValidationError::InvalidConditionValue {
                        policy: policy.to_string(),
                        index,
                        operator: condition.operator,
                        expected: "a two-element numeric array",
                        got: condition.value.to_string(),
                    });
                }
            }
            ConditionOperator::Gt | ConditionOperator::Lt => {
                if !condition.value.is_number() {
                    errors.push(ValidationError::InvalidConditionValue {
                        policy: policy.to_string(),
                        index,
                        operator: condition.operator,
                        expected: "a number",
                        got: condition.value.to_string(),
                    });
                }
            }
            ConditionOperator::Equals | ConditionOperator::Contains => {}
        }

        if condition.kind == ConditionKind::Rate {
            Self::check_duration(
                &format!("Policy '{policy}' rate window"),
                &condition.window,
                errors,
            );
        }
    }

    fn check_duration(context: &str, value: &str, errors: &mut Vec<ValidationError>) {
        if let Err(e) = humantime::parse_duration(value) {
            errors.push(ValidationError::InvalidDuration {
                context: context.to_string(),
                value: value.to_string(),
                reason: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{HubConfig, RouteSpec};

    fn valid_config() -> HubConfig {
        HubConfig::builder()
            .route(RouteSpec::single_target(
                "api",
                "GET",
                "/api/*",
                "http://backend-1:8080",
            ))
            .build()
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(HubConfigValidator::validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_rejects_bad_target_url() {
        let mut config = valid_config();
        config.routes[0].targets[0].url = "ftp://backend".to_string();

        let errors = HubConfigValidator::validate(&config).unwrap_err();
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::InvalidTargetUrl { .. }))
        );
    }

    #[test]
    fn test_rejects_duplicate_method_pattern() {
        let mut config = valid_config();
        let mut dup = config.routes[0].clone();
        dup.name = "api-copy".to_string();
        config.routes.push(dup);

        let errors = HubConfigValidator::validate(&config).unwrap_err();
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::DuplicateRoutePattern { .. }))
        );
    }

    #[test]
    fn test_rejects_zero_error_threshold() {
        let mut config = valid_config();
        config.routes[0].circuit_breaker.error_threshold_pct = 0;

        let errors = HubConfigValidator::validate(&config).unwrap_err();
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::InvalidErrorThreshold { value: 0, .. }))
        );
    }

    #[test]
    fn test_rejects_header_condition_without_key() {
        let mut config = valid_config();
        config.policies.push(PolicySpec {
            name: "block-bots".to_string(),
            priority: 10,
            conditions: vec![ConditionSpec {
                kind: ConditionKind::Header,
                key: None,
                operator: ConditionOperator::Contains,
                value: serde_json::json!("bot"),
                window: "60s".to_string(),
            }],
            actions: vec![ActionSpec::Deny { message: None }],
            enabled: true,
        });

        let errors = HubConfigValidator::validate(&config).unwrap_err();
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::MissingConditionKey { .. }))
        );
    }

    #[test]
    fn test_rejects_invalid_regex_and_probability() {
        let mut config = valid_config();
        config.policies.push(PolicySpec {
            name: "broken".to_string(),
            priority: 0,
            conditions: vec![ConditionSpec {
                kind: ConditionKind::Ip,
                key: None,
                operator: ConditionOperator::Regex,
                value: serde_json::json!("[unclosed"),
                window: "60s".to_string(),
            }],
            actions: vec![ActionSpec::RateLimit {
                allow_probability: 1.5,
            }],
            enabled: true,
        });

        let errors = HubConfigValidator::validate(&config).unwrap_err();
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::InvalidRegex { .. }))
        );
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::InvalidProbability { .. }))
        );
    }

    #[test]
    fn test_rejects_bad_durations() {
        let mut config = valid_config();
        config.history.retention = "forever".to_string();

        let errors = HubConfigValidator::validate(&config).unwrap_err();
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::InvalidDuration { .. }))
        );
    }
}
