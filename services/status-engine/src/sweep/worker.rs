use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, instrument};

use crate::engine::StatusEngine;

#[derive(Debug, Clone)]
pub struct SweepWorkerConfig {
    pub interval: Duration,
}

impl Default for SweepWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

pub struct SweepWorker {
    engine: Arc<StatusEngine>,
    config: SweepWorkerConfig,
}

impl SweepWorker {
    pub fn new(engine: Arc<StatusEngine>, config: SweepWorkerConfig) -> Self {
        Self { engine, config }
    }

    /// Run the sweep on every interval tick until shutdown is signaled.
    #[instrument(skip(self, shutdown), name = "sweep_worker")]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting sweep worker"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        // Don't immediately tick on startup - wait for first interval
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.engine.run_bulk_status_sweep().await {
                        error!(error = %e, "Bulk status sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Sweep worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
