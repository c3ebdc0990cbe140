pub mod audit;
pub mod health_probe;

pub use audit::{AuditSink, NullAuditSink};
pub use health_probe::{HealthProbe, ProbeError, ProbeReport, ProbeResult};
