use std::sync::Arc;

use eyre::{Result, eyre};
use futures_util::future::join_all;
use tokio::time::sleep;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    config::models::HealthCheckConfig,
    core::{
        hub::RoutingHub,
        route::{Route, TargetHealthReport},
    },
    ports::health_probe::{HealthProbe, ProbeError},
    tracing_setup::create_probe_span,
    utils::graceful_shutdown::ShutdownToken,
};

/// Background loop probing every route's targets on a fixed cadence.
///
/// The global config sets the cadence; each route's probe settings supply
/// the endpoint path and timeout. Probe results flow back into the hub,
/// which refreshes target health and feeds the route's circuit breaker.
pub struct HealthChecker {
    hub: Arc<RoutingHub>,
    probe: Arc<dyn HealthProbe>,
    config: HealthCheckConfig,
}

impl HealthChecker {
    pub fn new(
        hub: Arc<RoutingHub>,
        probe: Arc<dyn HealthProbe>,
        config: HealthCheckConfig,
    ) -> Self {
        Self { hub, probe, config }
    }

    /// Run the health check loop until shutdown
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        if !self.config.enabled {
            tracing::info!("Health checking is disabled");
            return Ok(());
        }

        let interval = humantime::parse_duration(&self.config.interval)?;
        tracing::info!(interval = %self.config.interval, "Starting health checker");

        loop {
            // Sleep first so startup isn't spent probing targets that are
            // still coming up
            tokio::select! {
                _ = sleep(interval) => {}
                _ = shutdown.wait_for_shutdown() => {
                    tracing::info!("Health checker shutting down");
                    return Ok(());
                }
            }

            self.check_all_routes().await;
        }
    }

    /// Probe every enabled route once and apply the results
    pub async fn check_all_routes(&self) {
        for route in self.hub.routes() {
            if !route.enabled() || !route.probe.enabled {
                continue;
            }
            let reports = self.check_route(&route).await;
            if !reports.is_empty() {
                self.hub.apply_health_report(route.id, &reports);
            }
        }
        tracing::debug!("Health check cycle completed");
    }

    /// Probe a single route once and apply the result; returns the number of
    /// targets probed
    pub async fn check_route_now(&self, route_id: Uuid) -> Result<usize> {
        let route = self
            .hub
            .route(route_id)
            .ok_or_else(|| eyre!("Unknown route: {route_id}"))?;
        let reports = self.check_route(&route).await;
        let probed = reports.len();
        self.hub.apply_health_report(route.id, &reports);
        Ok(probed)
    }

    /// Healthy and unhealthy target counts across all routes
    pub fn health_summary(&self) -> (usize, usize) {
        let mut healthy = 0;
        let mut unhealthy = 0;
        for route in self.hub.routes() {
            for target in &route.targets {
                if target.is_healthy() {
                    healthy += 1;
                } else {
                    unhealthy += 1;
                }
            }
        }
        (healthy, unhealthy)
    }

    /// Probe all targets of one route concurrently
    async fn check_route(&self, route: &Route) -> Vec<TargetHealthReport> {
        let probes = route.targets.iter().map(|target| {
            let probe = self.probe.clone();
            let url = format!("{}{}", target.url.as_str(), route.probe.path);
            let timeout = route.probe.timeout;
            let target_id = target.id;
            let span = create_probe_span(&route.name, &url);

            async move {
                let report = match probe.probe(&url, timeout).await {
                    Ok(answer) => TargetHealthReport {
                        target_id,
                        healthy: answer.healthy,
                        response_time_ms: answer.response_time_ms,
                        reason: (!answer.healthy)
                            .then(|| "target reported unhealthy".to_string()),
                    },
                    Err(e) => {
                        let response_time_ms = match e {
                            ProbeError::Timeout(t) => t.as_millis() as u64,
                            _ => 0,
                        };
                        TargetHealthReport {
                            target_id,
                            healthy: false,
                            response_time_ms,
                            reason: Some(e.to_string()),
                        }
                    }
                };
                tracing::Span::current().record("healthy", report.healthy);
                tracing::Span::current().record("duration_ms", report.response_time_ms);
                report
            }
            .instrument(span)
        });

        join_all(probes).await
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        config::models::{HistoryConfig, RouteSpec},
        core::circuit_breaker::BreakerState,
        ports::{
            audit::NullAuditSink,
            health_probe::{ProbeReport, ProbeResult},
        },
    };

    /// Scripted probe that records every URL it is asked about
    struct MockProbe {
        outcome: ProbeResult<ProbeReport>,
        seen: Mutex<Vec<String>>,
    }

    impl MockProbe {
        fn answering(healthy: bool) -> Self {
            Self {
                outcome: Ok(ProbeReport {
                    healthy,
                    response_time_ms: 5,
                }),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn unreachable() -> Self {
            Self {
                outcome: Err(ProbeError::Request("connection refused".to_string())),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn urls(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HealthProbe for MockProbe {
        async fn probe(&self, url: &str, _timeout: Duration) -> ProbeResult<ProbeReport> {
            self.seen.lock().unwrap().push(url.to_string());
            match &self.outcome {
                Ok(report) => Ok(*report),
                Err(ProbeError::Request(msg)) => Err(ProbeError::Request(msg.clone())),
                Err(ProbeError::Timeout(t)) => Err(ProbeError::Timeout(*t)),
            }
        }
    }

    fn hub() -> Arc<RoutingHub> {
        Arc::new(RoutingHub::new(&HistoryConfig::default(), Arc::new(NullAuditSink)).unwrap())
    }

    fn api_route() -> RouteSpec {
        RouteSpec::single_target("api", "GET", "/api/*", "http://backend-1:8080")
    }

    #[tokio::test]
    async fn test_probes_hit_the_health_endpoint() {
        let hub = hub();
        hub.register_route(api_route()).unwrap();
        let probe = Arc::new(MockProbe::answering(true));
        let checker = HealthChecker::new(hub, probe.clone(), HealthCheckConfig::default());

        checker.check_all_routes().await;
        assert_eq!(probe.urls(), vec!["http://backend-1:8080/health".to_string()]);
    }

    #[tokio::test]
    async fn test_healthy_answer_refreshes_target() {
        let hub = hub();
        let route = hub.register_route(api_route()).unwrap();
        route.targets[0].mark_unhealthy();

        let probe = Arc::new(MockProbe::answering(true));
        let checker = HealthChecker::new(hub, probe, HealthCheckConfig::default());
        checker.check_all_routes().await;

        assert!(route.targets[0].is_healthy());
        assert_eq!(route.targets[0].response_time_ms(), 5);
        assert!(route.targets[0].last_check().is_some());
        assert_eq!(checker.health_summary(), (1, 0));
    }

    #[tokio::test]
    async fn test_unreachable_target_marks_unhealthy_and_trips_breaker() {
        let hub = hub();
        let route = hub.register_route(api_route()).unwrap();

        let probe = Arc::new(MockProbe::unreachable());
        let checker = HealthChecker::new(hub, probe, HealthCheckConfig::default());
        checker.check_all_routes().await;

        assert!(!route.targets[0].is_healthy());
        // One failing sample out of one exceeds the default 50% threshold
        assert_eq!(route.breaker.state(), BreakerState::Open);
        assert_eq!(checker.health_summary(), (0, 1));
    }

    #[tokio::test]
    async fn test_route_with_probing_disabled_is_skipped() {
        let hub = hub();
        let mut spec = api_route();
        spec.health_check.enabled = false;
        hub.register_route(spec).unwrap();

        let probe = Arc::new(MockProbe::answering(true));
        let checker = HealthChecker::new(hub, probe.clone(), HealthCheckConfig::default());
        checker.check_all_routes().await;

        assert!(probe.urls().is_empty());
    }

    #[tokio::test]
    async fn test_check_route_now_unknown_route() {
        let hub = hub();
        let probe = Arc::new(MockProbe::answering(true));
        let checker = HealthChecker::new(hub, probe, HealthCheckConfig::default());

        let result = checker.check_route_now(Uuid::new_v4()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_respects_disabled_config() {
        let hub = hub();
        let probe = Arc::new(MockProbe::answering(true));
        let config = HealthCheckConfig {
            enabled: false,
            ..HealthCheckConfig::default()
        };
        let checker = HealthChecker::new(hub, probe, config);

        let shutdown = crate::utils::GracefulShutdown::new();
        // Returns immediately instead of looping
        checker.run(shutdown.shutdown_token()).await.unwrap();
    }
}
