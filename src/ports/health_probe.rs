use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Custom error type for health probe operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProbeError {
    /// Error when the probe request cannot reach the target
    #[error("Probe request failed: {0}")]
    Request(String),

    /// Error when the probe exceeds its timeout
    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),
}

/// Result type alias for probe operations
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Result of probing one target once
#[derive(Debug, Clone, Copy)]
pub struct ProbeReport {
    /// Whether the target answered with a healthy status
    pub healthy: bool,
    /// Observed round-trip time in milliseconds
    pub response_time_ms: u64,
}

/// HealthProbe defines the port (interface) for the external health probe
/// source. The core only consumes probe results; how they are obtained
/// (HTTP, TCP, scripted fakes in tests) is the adapter's business.
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    /// Probe `url` once within `timeout`
    ///
    /// # Returns
    /// A report when the target answered at all (healthy or not), or an error
    /// when it could not be reached within the timeout
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeResult<ProbeReport>;
}
