// Ticker - fixed-interval scheduling of a unit of work with cooperative shutdown
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Runs a job once per interval until shutdown is signalled.
///
/// Runs never overlap: the next tick is only awaited after the previous run
/// completes. A run that overruns the interval is followed immediately by the
/// next one.
#[derive(Debug, Clone)]
pub struct Ticker {
    interval: Duration,
    shutdown_grace: Duration,
}

impl Ticker {
    pub fn new(interval: Duration, shutdown_grace: Duration) -> Self {
        Self {
            interval,
            shutdown_grace,
        }
    }

    /// Drive `job` until `shutdown` flips to true or its sender is dropped.
    ///
    /// A run in flight when shutdown arrives gets `shutdown_grace` to finish
    /// before it is dropped. Returns the number of runs started.
    pub async fn run<F, Fut>(&self, mut job: F, mut shutdown: watch::Receiver<bool>) -> u64
    where
        F: FnMut() -> Fut,
        Fut: Future,
    {
        tracing::debug!(interval = ?self.interval, "ticker running");

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut runs = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }

            tracing::debug!("tick");
            runs += 1;
            let started = Instant::now();
            let run = job();
            tokio::pin!(run);

            tokio::select! {
                _ = &mut run => {}
                _ = shutdown.changed() => {
                    tracing::info!(grace = ?self.shutdown_grace, "shutdown requested, waiting for in-flight run");
                    if tokio::time::timeout(self.shutdown_grace, &mut run).await.is_err() {
                        tracing::warn!("in-flight run abandoned after grace period");
                    }
                    break;
                }
            }

            let elapsed = started.elapsed();
            if elapsed > self.interval {
                tracing::warn!(
                    elapsed = ?elapsed,
                    interval = ?self.interval,
                    "run took longer than the interval"
                );
            }
        }

        tracing::info!(runs, "ticker stopped");
        runs
    }
}
