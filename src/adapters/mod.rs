pub mod audit_log;
pub mod health_checker;
pub mod http_probe;
pub mod maintenance;

/// Re-export commonly used types from adapters
pub use audit_log::TracingAuditSink;
pub use health_checker::HealthChecker;
pub use http_probe::HttpHealthProbe;
pub use maintenance::{HistorySweeper, StatsAggregator};
