//! Periodic flushing.

use crate::application::flusher::{FlushEngine, FlushOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Flushes a `FlushEngine` on a fixed interval.
///
/// The first flush happens one interval after start. A tick that lands while
/// a slow flush is still running is delayed rather than bunched up.
pub struct FlushScheduler {
    engine: Arc<FlushEngine>,
    interval: Duration,
}

impl FlushScheduler {
    pub fn new(engine: Arc<FlushEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Spawn the loop on the current tokio runtime.
    pub fn spawn(self) -> SchedulerHandle {
        SchedulerHandle {
            handle: tokio::spawn(self.run()),
        }
    }

    /// Run the scheduler in a loop, flushing periodically
    pub async fn run(self) {
        info!(
            "FlushScheduler: Starting periodic flush (interval: {:?})",
            self.interval
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            match self.engine.flush().await {
                Ok(FlushOutcome::Submitted { metrics, status }) => {
                    debug!("FlushScheduler: Flushed {} metrics (status {})", metrics, status)
                }
                Ok(outcome) => debug!("FlushScheduler: {:?}", outcome),
                Err(e) => warn!("FlushScheduler: Flush failed: {}", e),
            }
        }
    }
}

/// Owns the spawned scheduler task. Dropping the handle stops the loop.
pub struct SchedulerHandle {
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    pub fn stop(self) {
        self.handle.abort();
    }

    /// Aborts the loop and waits until the task has finished.
    pub async fn stop_and_wait(mut self) {
        self.handle.abort();
        let _ = (&mut self.handle).await;
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
