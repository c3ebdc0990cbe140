use std::{sync::Arc, time::Duration};

use eyre::Result;
use tokio::time::sleep;

use crate::{
    config::models::HubConfig, core::hub::RoutingHub, utils::graceful_shutdown::ShutdownToken,
};

/// Background loop recomputing per-route usage statistics from the request
/// history on a fixed cadence
pub struct StatsAggregator {
    hub: Arc<RoutingHub>,
    interval: Duration,
}

impl StatsAggregator {
    pub fn new(hub: Arc<RoutingHub>, interval: Duration) -> Self {
        Self { hub, interval }
    }

    pub fn from_config(hub: Arc<RoutingHub>, config: &HubConfig) -> Result<Self> {
        let interval = humantime::parse_duration(&config.stats_interval)?;
        Ok(Self::new(hub, interval))
    }

    /// Run the aggregation loop until shutdown
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        tracing::info!(interval = ?self.interval, "Starting statistics aggregator");
        loop {
            tokio::select! {
                _ = sleep(self.interval) => {}
                _ = shutdown.wait_for_shutdown() => {
                    tracing::info!("Statistics aggregator shutting down");
                    return Ok(());
                }
            }
            self.hub.recompute_statistics();
        }
    }
}

/// Background loop evicting request records older than the history
/// retention window
pub struct HistorySweeper {
    hub: Arc<RoutingHub>,
    interval: Duration,
}

impl HistorySweeper {
    pub fn new(hub: Arc<RoutingHub>, interval: Duration) -> Self {
        Self { hub, interval }
    }

    pub fn from_config(hub: Arc<RoutingHub>, config: &HubConfig) -> Result<Self> {
        let interval = humantime::parse_duration(&config.history.sweep_interval)?;
        Ok(Self::new(hub, interval))
    }

    /// Run the sweep loop until shutdown
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        tracing::info!(interval = ?self.interval, "Starting history sweeper");
        loop {
            tokio::select! {
                _ = sleep(self.interval) => {}
                _ = shutdown.wait_for_shutdown() => {
                    tracing::info!("History sweeper shutting down");
                    return Ok(());
                }
            }
            let removed = self.hub.sweep_history();
            if removed > 0 {
                tracing::debug!(removed, "Swept expired request records");
            }
        }
    }
}
