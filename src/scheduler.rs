//! Scheduler
//!
//! Reconciliation sweeps over every registered account, either once or
//! continuously on a fixed interval. Complements the event-driven monitor for
//! deposits it may have missed.

use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::sweeper::SweepExecutor;

pub struct Scheduler {
    executor: Arc<SweepExecutor>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(executor: Arc<SweepExecutor>, interval: Duration) -> Self {
        Self { executor, interval }
    }

    /// Sweep every registered account. Returns how many were actually swept.
    pub async fn run_once(&self) -> usize {
        info!("Starting reconciliation cycle");
        let mut swept = 0;

        for address in self.executor.registry().addresses() {
            match self.executor.sweep(address).await {
                Ok(result) if result.is_swept() => swept += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        account = ?address,
                        kind = e.kind(),
                        error = %e,
                        "Reconciliation sweep failed"
                    );
                    // Continue with other accounts even if one fails
                }
            }
        }

        info!(swept, "Reconciliation cycle complete");
        swept
    }

    pub async fn run_continuous(&self) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting continuous reconciliation"
        );

        loop {
            self.run_once().await;
            sleep(self.interval).await;
        }
    }
}
