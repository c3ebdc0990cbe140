pub mod circuit_breaker;
pub mod events;
pub mod history;
pub mod hub;
pub mod load_balancer;
pub mod policy;
pub mod route;
pub mod routing_table;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use events::{AuditEvent, HubEvent};
pub use history::{RequestHistory, RequestOutcome, RequestRecord};
pub use hub::{HubError, RequestContext, RoutingHub, RoutingOutcome};
pub use load_balancer::LoadBalancerFactory;
pub use policy::{PolicyEngine, PolicyVerdict, TrafficPolicy};
pub use route::{Route, TargetHealthReport};
pub use routing_table::RoutingTable;
