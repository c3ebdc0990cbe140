//! Per-route circuit breaker.
//!
//! A small three-state machine (CLOSED / OPEN / HALF_OPEN) fed by health-check
//! results. While OPEN the hub refuses to route to the associated route without
//! consulting the load balancer; after the recovery window the breaker probes
//! through HALF_OPEN and closes again on a fixed success quota.
use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    config::models::CircuitBreakerConfig,
    core::route::{RouteError, RouteResult},
    metrics::set_breaker_state,
};

/// Consecutive HALF_OPEN probe successes required to close the breaker
const HALF_OPEN_SUCCESS_QUOTA: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        };
        write!(f, "{name}")
    }
}

/// One observed state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerTransition {
    pub from: BreakerState,
    pub to: BreakerState,
}

/// Outcome of a pre-dispatch breaker check
#[derive(Debug, Clone, Copy)]
pub struct BreakerCheck {
    pub allowed: bool,
    pub transition: Option<BreakerTransition>,
}

/// Serializable snapshot of breaker state for admin views
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub enabled: bool,
    pub state: BreakerState,
    pub error_count: u32,
    pub success_count: u32,
    pub last_state_change: DateTime<Utc>,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    error_count: u32,
    success_count: u32,
    /// Monotonic clock driving the recovery window
    changed_at: Instant,
    /// Wall clock mirror of `changed_at` for views
    changed_at_wall: DateTime<Utc>,
}

/// Failure-isolation state machine for a single route.
///
/// Counters are meaningful only for the current state; every transition resets
/// both to zero. All methods take a short std mutex and never block on I/O.
#[derive(Debug)]
pub struct CircuitBreaker {
    route_name: String,
    enabled: bool,
    error_threshold_pct: u8,
    recovery_time: Duration,
    /// Per-dispatch timeout hint surfaced to the embedding transport
    pub timeout_threshold: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn from_config(route_name: &str, config: &CircuitBreakerConfig) -> RouteResult<Self> {
        let recovery_time =
            humantime::parse_duration(&config.recovery_time).map_err(|e| {
                RouteError::InvalidDuration {
                    field: "circuit_breaker.recovery_time",
                    value: config.recovery_time.clone(),
                    reason: e.to_string(),
                }
            })?;
        let timeout_threshold =
            humantime::parse_duration(&config.timeout_threshold).map_err(|e| {
                RouteError::InvalidDuration {
                    field: "circuit_breaker.timeout_threshold",
                    value: config.timeout_threshold.clone(),
                    reason: e.to_string(),
                }
            })?;

        Ok(Self {
            route_name: route_name.to_string(),
            enabled: config.enabled,
            error_threshold_pct: config.error_threshold_pct,
            recovery_time,
            timeout_threshold,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                error_count: 0,
                success_count: 0,
                changed_at: Instant::now(),
                changed_at_wall: Utc::now(),
            }),
        })
    }

    fn lock_inner(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pre-dispatch gate. OPEN rejects until the recovery window elapses, at
    /// which point the breaker moves to HALF_OPEN and lets probe traffic pass.
    pub fn check(&self) -> BreakerCheck {
        if !self.enabled {
            return BreakerCheck {
                allowed: true,
                transition: None,
            };
        }

        let mut inner = self.lock_inner();
        let transition = self.maybe_recover(&mut inner);
        let allowed = inner.state != BreakerState::Open;
        BreakerCheck {
            allowed,
            transition,
        }
    }

    /// Record one successful health-check result
    pub fn record_success(&self) -> Option<BreakerTransition> {
        if !self.enabled {
            return None;
        }

        let mut inner = self.lock_inner();
        let recovered = self.maybe_recover(&mut inner);
        inner.success_count += 1;

        if inner.state == BreakerState::HalfOpen
            && inner.success_count >= HALF_OPEN_SUCCESS_QUOTA
        {
            return Some(self.transition(&mut inner, BreakerState::Closed));
        }
        recovered
    }

    /// Record one failed health-check result. Immediate and strict while
    /// HALF_OPEN; otherwise purely a function of the accumulated error ratio.
    pub fn record_failure(&self) -> Option<BreakerTransition> {
        if !self.enabled {
            return None;
        }

        let mut inner = self.lock_inner();
        let recovered = self.maybe_recover(&mut inner);
        inner.error_count += 1;

        match inner.state {
            BreakerState::HalfOpen => Some(self.transition(&mut inner, BreakerState::Open)),
            BreakerState::Closed => {
                let total = inner.error_count + inner.success_count;
                let ratio = f64::from(inner.error_count) / f64::from(total);
                if ratio > f64::from(self.error_threshold_pct) / 100.0 {
                    Some(self.transition(&mut inner, BreakerState::Open))
                } else {
                    recovered
                }
            }
            BreakerState::Open => recovered,
        }
    }

    /// Current state without side effects. A breaker that is OPEN past its
    /// recovery window still reads OPEN here until the next check or record.
    pub fn state(&self) -> BreakerState {
        if !self.enabled {
            return BreakerState::Closed;
        }
        self.lock_inner().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock_inner();
        BreakerSnapshot {
            enabled: self.enabled,
            state: inner.state,
            error_count: inner.error_count,
            success_count: inner.success_count,
            last_state_change: inner.changed_at_wall,
        }
    }

    /// OPEN moves to HALF_OPEN once the recovery window has elapsed. Called
    /// under the lock from every state-touching method so the transition does
    /// not depend on request traffic arriving.
    fn maybe_recover(&self, inner: &mut BreakerInner) -> Option<BreakerTransition> {
        if inner.state == BreakerState::Open && inner.changed_at.elapsed() > self.recovery_time {
            Some(self.transition(inner, BreakerState::HalfOpen))
        } else {
            None
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) -> BreakerTransition {
        let from = inner.state;
        inner.state = to;
        inner.error_count = 0;
        inner.success_count = 0;
        inner.changed_at = Instant::now();
        inner.changed_at_wall = Utc::now();
        set_breaker_state(&self.route_name, to);

        match to {
            BreakerState::Open => {
                tracing::warn!(route = %self.route_name, %from, %to, "Circuit breaker opened");
            }
            BreakerState::HalfOpen => {
                tracing::info!(route = %self.route_name, %from, %to, "Circuit breaker probing");
            }
            BreakerState::Closed => {
                tracing::info!(route = %self.route_name, %from, %to, "Circuit breaker closed");
            }
        }

        BreakerTransition { from, to }
    }
}
