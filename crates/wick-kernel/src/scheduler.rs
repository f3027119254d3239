//! Bounded worker pool over a list of targets.
//!
//! At most `workers` targets are in flight at once. Each target runs to
//! completion inside its own task; completion order is unspecified.
//!
//! ```text
//! targets ──▶ acquire permit ──▶ spawn ──▶ [delay] ──▶ worker(target)
//!                  ▲                                        │
//!                  └──────────── permit released ◀──────────┘
//! ```
//!
//! Cancelling the token stops dispatch immediately. In-flight workers are
//! raced against the token and dropped, which kills any child process they
//! own (`kill_on_drop`).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::MAX_WORKERS;

/// What happened to a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    /// Targets handed to a worker.
    pub dispatched: usize,
    /// Workers that ran to completion.
    pub completed: usize,
    /// Workers abandoned because of cancellation.
    pub abandoned: usize,
    /// Workers that panicked.
    pub panicked: usize,
    /// Targets never dispatched.
    pub dropped: usize,
    pub cancelled: bool,
}

/// Runs a worker over every target with bounded concurrency.
#[derive(Debug, Clone)]
pub struct Scheduler {
    workers: usize,
    delay: Duration,
    cancel: CancellationToken,
}

impl Scheduler {
    /// `workers` is clamped to `1..=MAX_WORKERS`.
    pub fn new(workers: usize, delay: Duration, cancel: CancellationToken) -> Self {
        Self {
            workers: workers.clamp(1, MAX_WORKERS),
            delay,
            cancel,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `worker` for each target. Returns once every dispatched worker
    /// has finished or been abandoned.
    pub async fn run<I, F, Fut>(&self, targets: I, worker: F) -> SchedulerReport
    where
        I: IntoIterator<Item = String>,
        F: Fn(String, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let worker = Arc::new(worker);
        let mut tasks = JoinSet::new();
        let mut report = SchedulerReport::default();
        let mut targets = targets.into_iter();

        for target in targets.by_ref() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    report.dropped += 1;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => {
                        report.dropped += 1;
                        break;
                    }
                },
            };

            // Reap finished tasks so the set stays bounded by the pool size.
            while let Some(joined) = tasks.try_join_next() {
                tally(&mut report, joined);
            }

            let worker = worker.clone();
            let cancel = self.cancel.clone();
            let delay = self.delay;
            report.dispatched += 1;
            tasks.spawn(async move {
                let _permit = permit;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    _ = async {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        worker(target, cancel.clone()).await;
                    } => true,
                }
            });
        }
        report.dropped += targets.count();

        while let Some(joined) = tasks.join_next().await {
            tally(&mut report, joined);
        }
        report.cancelled = self.cancel.is_cancelled();
        if report.cancelled {
            tracing::info!(
                "interrupted: {} completed, {} abandoned, {} not started",
                report.completed,
                report.abandoned,
                report.dropped
            );
        }
        report
    }
}

fn tally(report: &mut SchedulerReport, joined: Result<bool, tokio::task::JoinError>) {
    match joined {
        Ok(true) => report.completed += 1,
        Ok(false) => report.abandoned += 1,
        Err(e) => {
            tracing::error!("worker panicked: {}", e);
            report.panicked += 1;
        }
    }
}
