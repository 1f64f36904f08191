//! Periodic eviction sweep
//!
//! Runs [`EvictionService::sweep`] on a fixed interval until shutdown. The
//! sweep itself is blocking SQLite work, so each run goes through
//! `spawn_blocking`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::EvictionConfig;
use crate::error::TerritoryError;
use crate::services::eviction_service::{EvictionService, SweepReport};

pub struct Sweeper {
    eviction: Arc<EvictionService>,
    config: EvictionConfig,
}

impl Sweeper {
    pub fn new(eviction: Arc<EvictionService>, config: EvictionConfig) -> Self {
        Self { eviction, config }
    }

    /// Run one sweep off the async runtime
    pub async fn sweep_once(&self) -> Result<SweepReport, TerritoryError> {
        let eviction = self.eviction.clone();
        let threshold_days = self.config.threshold_days;
        tokio::task::spawn_blocking(move || eviction.sweep(threshold_days))
            .await
            .map_err(|e| TerritoryError::Internal(format!("Sweep task panicked: {}", e)))?
    }

    /// Sweep every `sweep_interval_secs` until a shutdown signal arrives
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.sweep_interval_secs,
            threshold_days = self.config.threshold_days,
            sweep_on_start = self.config.sweep_on_start,
            "Sweeper started"
        );

        let mut tick = interval(Duration::from_secs(self.config.sweep_interval_secs));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick fires immediately
        if !self.config.sweep_on_start {
            tick.tick().await;
        }

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.sweep_once().await {
                        Ok(report) if !report.failures.is_empty() => {
                            warn!(
                                voided = report.voided.len(),
                                failures = report.failures.len(),
                                "Sweep finished with failures"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Sweep failed"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Sweeper shutting down");
                    break;
                }
            }
        }
    }
}
