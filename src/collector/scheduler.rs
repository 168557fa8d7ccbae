//! Scheduler Loop
//!
//! Runs a collection cycle, sleeps for the poll interval, repeats. Cycles
//! never overlap: a slow cycle simply delays the next one.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::engine::Collector;
use crate::error::Error;

/// Drives the collector forever.
#[derive(Debug, Clone)]
pub struct Scheduler {
    collector: Arc<Collector>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(collector: Arc<Collector>, interval: Duration) -> Self {
        Self {
            collector,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Loop until the process exits. Routine failures are logged by the
    /// collector and never end the loop.
    pub async fn run(self) {
        info!(
            namespaces = ?self.collector.config().namespaces,
            interval = ?self.interval,
            "Starting collection loop"
        );

        let mut cycle: u64 = 0;
        loop {
            cycle += 1;
            let report = self.collector.run_cycle().await;
            debug!(
                cycle,
                succeeded = report.succeeded,
                failed = report.failed,
                elapsed = ?report.elapsed,
                "Cycle complete, sleeping"
            );

            tokio::time::sleep(self.interval).await;
        }
    }

    /// Run the loop on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Wait on a spawned loop. The loop never returns on its own, so any
    /// outcome here is an error for the process.
    pub async fn watch(handle: JoinHandle<()>) -> Error {
        match handle.await {
            Ok(()) => Error::Internal("collection loop ended".into()),
            Err(e) if e.is_panic() => Error::Internal(format!("collection loop panicked: {}", e)),
            Err(e) => Error::Internal(format!("collection loop stopped: {}", e)),
        }
    }
}
