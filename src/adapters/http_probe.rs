use std::time::{Duration, Instant};

use async_trait::async_trait;
use eyre::Result;

use crate::ports::health_probe::{HealthProbe, ProbeError, ProbeReport, ProbeResult};

/// Health probe adapter on top of `reqwest` with Rustls.
///
/// Sends a HEAD request to the target's health endpoint; any 2xx answer
/// counts as healthy. Transport failures and timeouts surface as errors so
/// the caller can tell an unhealthy answer from an unreachable target.
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Vane-Hub/0.1")
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeResult<ProbeReport> {
        let started = Instant::now();
        tracing::debug!(url, "Probing target health");

        match self.client.head(url).timeout(timeout).send().await {
            Ok(response) => {
                let healthy = response.status().is_success();
                tracing::debug!(
                    url,
                    healthy,
                    status = response.status().as_u16(),
                    "Probe answered"
                );
                Ok(ProbeReport {
                    healthy,
                    response_time_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(e) if e.is_timeout() => Err(ProbeError::Timeout(timeout)),
            Err(e) => Err(ProbeError::Request(e.to_string())),
        }
    }
}
