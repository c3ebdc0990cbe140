// Integration tests for circuit breaking driven by health probes: opening on
// probe failures, recovering through the half-open window, and the events and
// audit records emitted along the way.
#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use vane::{
        adapters::HealthChecker,
        config::models::{HealthCheckConfig, HubConfig, RouteSpec},
        core::{
            AuditEvent, BreakerState, HubEvent, RequestContext, RoutingHub, TargetHealthReport,
            hub::RoutingFailureKind,
        },
        ports::{AuditSink, HealthProbe, NullAuditSink, ProbeError, ProbeReport, ProbeResult},
    };

    /// Probe whose answer can be flipped between healthy and unreachable
    struct SwitchableProbe {
        healthy: AtomicBool,
    }

    impl SwitchableProbe {
        fn new(healthy: bool) -> Self {
            Self {
                healthy: AtomicBool::new(healthy),
            }
        }

        fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::Relaxed);
        }
    }

    #[async_trait]
    impl HealthProbe for SwitchableProbe {
        async fn probe(&self, _url: &str, _timeout: Duration) -> ProbeResult<ProbeReport> {
            if self.healthy.load(Ordering::Relaxed) {
                Ok(ProbeReport {
                    healthy: true,
                    response_time_ms: 4,
                })
            } else {
                Err(ProbeError::Request("connection refused".to_string()))
            }
        }
    }

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<AuditEvent>>);

    impl CollectingSink {
        fn events(&self) -> Vec<AuditEvent> {
            self.0.lock().unwrap().clone()
        }
    }

    impl AuditSink for CollectingSink {
        fn record(&self, event: AuditEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn route_spec(recovery: &str) -> RouteSpec {
        let mut spec = RouteSpec::single_target("api", "*", "/api/*", "http://backend:8080");
        spec.circuit_breaker.recovery_time = recovery.to_string();
        spec
    }

    fn failing_report(route: &vane::core::Route) -> TargetHealthReport {
        TargetHealthReport {
            target_id: route.targets[0].id,
            healthy: false,
            response_time_ms: 0,
            reason: Some("connection refused".to_string()),
        }
    }

    fn healthy_report(route: &vane::core::Route) -> TargetHealthReport {
        TargetHealthReport {
            target_id: route.targets[0].id,
            healthy: true,
            response_time_ms: 6,
            reason: None,
        }
    }

    #[test]
    fn test_failing_probe_opens_breaker_and_blocks_routing() {
        let config = HubConfig::builder().route(route_spec("60s")).build();
        let hub = RoutingHub::from_config(&config, Arc::new(NullAuditSink)).unwrap();
        let route = hub.routes()[0].clone();

        hub.apply_health_report(route.id, &[failing_report(&route)]);
        assert_eq!(route.breaker.state(), BreakerState::Open);
        assert!(!route.targets[0].is_healthy());

        let outcome = hub.route_request(&RequestContext::new("GET", "/api/users", "10.0.0.1"));
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Circuit breaker is open");
        assert_eq!(outcome.failure, Some(RoutingFailureKind::CircuitOpen));
    }

    #[test]
    fn test_breaker_recovers_through_half_open() {
        let config = HubConfig::builder().route(route_spec("1ms")).build();
        let hub = RoutingHub::from_config(&config, Arc::new(NullAuditSink)).unwrap();
        let route = hub.routes()[0].clone();

        hub.apply_health_report(route.id, &[failing_report(&route)]);
        assert_eq!(route.breaker.state(), BreakerState::Open);

        // Past the recovery window the breaker half-opens, but the target is
        // still marked unhealthy from the failed probe
        std::thread::sleep(Duration::from_millis(10));
        let probing = hub.route_request(&RequestContext::new("GET", "/api/users", "10.0.0.1"));
        assert_eq!(probing.message, "No healthy targets available");
        assert_eq!(route.breaker.state(), BreakerState::HalfOpen);

        // Three healthy probe rounds close the breaker and restore the target
        for _ in 0..3 {
            hub.apply_health_report(route.id, &[healthy_report(&route)]);
        }
        assert_eq!(route.breaker.state(), BreakerState::Closed);
        assert!(route.targets[0].is_healthy());

        let outcome = hub.route_request(&RequestContext::new("GET", "/api/users", "10.0.0.1"));
        assert!(outcome.success);
    }

    #[test]
    fn test_half_open_failure_reopens_immediately() {
        let config = HubConfig::builder().route(route_spec("1ms")).build();
        let hub = RoutingHub::from_config(&config, Arc::new(NullAuditSink)).unwrap();
        let route = hub.routes()[0].clone();

        hub.apply_health_report(route.id, &[failing_report(&route)]);
        std::thread::sleep(Duration::from_millis(10));

        // One healthy round recovers to half-open, the next failure slams
        // the breaker shut again
        hub.apply_health_report(route.id, &[healthy_report(&route)]);
        assert_eq!(route.breaker.state(), BreakerState::HalfOpen);

        hub.apply_health_report(route.id, &[failing_report(&route)]);
        assert_eq!(route.breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_disabled_breaker_never_blocks() {
        let mut spec = route_spec("60s");
        spec.circuit_breaker.enabled = false;
        let config = HubConfig::builder().route(spec).build();
        let hub = RoutingHub::from_config(&config, Arc::new(NullAuditSink)).unwrap();
        let route = hub.routes()[0].clone();

        hub.apply_health_report(route.id, &[failing_report(&route)]);
        assert_eq!(route.breaker.state(), BreakerState::Closed);

        // The unhealthy target still keeps the request from routing, but as
        // a target problem rather than a breaker rejection
        let outcome = hub.route_request(&RequestContext::new("GET", "/api/users", "10.0.0.1"));
        assert_eq!(outcome.message, "No healthy targets available");
        assert_eq!(outcome.failure, Some(RoutingFailureKind::NoHealthyTargets));

        hub.apply_health_report(route.id, &[healthy_report(&route)]);
        assert!(hub.route_request(&RequestContext::new("GET", "/api/users", "10.0.0.1")).success);
    }

    #[test]
    fn test_breaker_transition_events_and_audit_records() {
        let sink = Arc::new(CollectingSink::default());
        let config = HubConfig::builder().route(route_spec("60s")).build();
        let hub = RoutingHub::from_config(&config, sink.clone()).unwrap();
        let route = hub.routes()[0].clone();
        let mut events = hub.subscribe();

        hub.apply_health_report(route.id, &[failing_report(&route)]);

        let event = events.try_recv().unwrap();
        match event {
            HubEvent::BreakerTransition {
                route: name,
                from,
                to,
                ..
            } => {
                assert_eq!(name, "api");
                assert_eq!(from, BreakerState::Closed);
                assert_eq!(to, BreakerState::Open);
            }
            other => panic!("Expected breaker transition, got {other:?}"),
        }

        let audit = sink.events();
        assert!(audit.iter().any(|e| matches!(
            e,
            AuditEvent::HealthCheckFailed { reason, .. } if reason == "connection refused"
        )));
        assert!(audit.iter().any(|e| matches!(
            e,
            AuditEvent::BreakerTransitioned { to: BreakerState::Open, .. }
        )));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_health_checker_drives_breaker_end_to_end() {
        let config = HubConfig::builder().route(route_spec("1ms")).build();
        let hub = Arc::new(RoutingHub::from_config(&config, Arc::new(NullAuditSink)).unwrap());
        let route = hub.routes()[0].clone();

        let probe = Arc::new(SwitchableProbe::new(false));
        let checker = HealthChecker::new(hub.clone(), probe.clone(), HealthCheckConfig::default());

        checker.check_all_routes().await;
        assert_eq!(route.breaker.state(), BreakerState::Open);
        assert_eq!(checker.health_summary(), (0, 1));

        // Backend comes back; three probe rounds re-close the breaker
        probe.set_healthy(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        for _ in 0..3 {
            checker.check_all_routes().await;
        }
        assert_eq!(route.breaker.state(), BreakerState::Closed);
        assert_eq!(checker.health_summary(), (1, 0));

        let outcome = hub.route_request(&RequestContext::new("GET", "/api/users", "10.0.0.1"));
        assert!(outcome.success);
        assert_eq!(route.targets[0].response_time_ms(), 4);
    }
}
