//! Dispatcher that runs jobs once they are admitted.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::DispatchConfig;
use crate::ratelimit::{Admission, WindowLimiter};

/// Summary of a dispatch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Jobs that got through admission, including any cut off mid-work
    pub admitted: usize,
    /// Jobs that were admitted and finished their work
    pub completed: usize,
    /// Jobs that were never admitted (timeout or closed limiter)
    pub rejected: usize,
    /// Longest time any completed job spent waiting for admission
    pub max_queued: Duration,
    /// Whether a shutdown signal cut the run short
    pub interrupted: bool,
}

enum JobOutcome {
    Completed { queued: Duration },
    Rejected,
}

/// Runs a batch of simulated jobs, each gated by an `Admission`.
pub struct Dispatcher<A: Admission + 'static> {
    admission: Arc<A>,
    config: DispatchConfig,
}

impl Dispatcher<WindowLimiter> {
    /// Create a dispatcher backed by a window limiter.
    pub fn new(config: DispatchConfig, limiter: Arc<WindowLimiter>) -> Self {
        Self::with_admission(config, limiter)
    }
}

impl<A: Admission + 'static> Dispatcher<A> {
    /// Create a dispatcher backed by any admission gate.
    pub fn with_admission(config: DispatchConfig, admission: Arc<A>) -> Self {
        Self { admission, config }
    }

    /// Run every job to completion.
    pub async fn run(self) -> DispatchReport {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Run jobs until they all finish or `signal` resolves.
    ///
    /// Jobs still queued when the signal fires are dropped, which withdraws
    /// them from the limiter.
    pub async fn run_with_shutdown<F>(self, signal: F) -> DispatchReport
    where
        F: Future<Output = ()> + Send,
    {
        let work = Duration::from_millis(self.config.job_ms);
        let timeout = self.config.admit_timeout_ms.map(Duration::from_millis);
        let started = Instant::now();

        info!(
            jobs = self.config.jobs,
            job_ms = self.config.job_ms,
            "Dispatching jobs"
        );

        let admitted = Arc::new(AtomicUsize::new(0));
        let mut jobs: FuturesUnordered<_> = (0..self.config.jobs)
            .map(|index| {
                run_job(
                    self.admission.clone(),
                    admitted.clone(),
                    index,
                    work,
                    timeout,
                )
            })
            .collect();

        let mut report = DispatchReport::default();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                outcome = jobs.next() => match outcome {
                    Some(JobOutcome::Completed { queued }) => {
                        report.completed += 1;
                        report.max_queued = report.max_queued.max(queued);
                    }
                    Some(JobOutcome::Rejected) => report.rejected += 1,
                    None => break,
                },
                _ = &mut signal => {
                    warn!(abandoned = jobs.len(), "Shutdown requested, abandoning remaining jobs");
                    report.interrupted = true;
                    break;
                }
            }
        }
        drop(jobs);
        report.admitted = admitted.load(Ordering::SeqCst);

        info!(
            admitted = report.admitted,
            completed = report.completed,
            rejected = report.rejected,
            max_queued = ?report.max_queued,
            elapsed = ?started.elapsed(),
            "Dispatch finished"
        );
        report
    }
}

async fn run_job<A: Admission>(
    admission: Arc<A>,
    admitted: Arc<AtomicUsize>,
    index: usize,
    work: Duration,
    timeout: Option<Duration>,
) -> JobOutcome {
    let queued_at = Instant::now();
    let admission_result = match timeout {
        Some(timeout) => admission.admit_timeout(timeout).await,
        None => admission.admit().await,
    };

    if let Err(e) = admission_result {
        warn!(job = index, error = %e, "Job was not admitted");
        return JobOutcome::Rejected;
    }

    admitted.fetch_add(1, Ordering::SeqCst);
    let queued = queued_at.elapsed();
    info!(job = index, queued = ?queued, "Job admitted");
    tokio::time::sleep(work).await;
    JobOutcome::Completed { queued }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: usize, window_ms: u64) -> Arc<WindowLimiter> {
        Arc::new(WindowLimiter::new(limit, Duration::from_millis(window_ms)).unwrap())
    }

    fn dispatch_config(jobs: usize, admit_timeout_ms: Option<u64>) -> DispatchConfig {
        DispatchConfig {
            jobs,
            job_ms: 10,
            admit_timeout_ms,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_jobs_complete() {
        let dispatcher = Dispatcher::new(dispatch_config(5, None), limiter(2, 1000));

        let report = dispatcher.run().await;

        assert_eq!(report.admitted, 5);
        assert_eq!(report.completed, 5);
        assert_eq!(report.rejected, 0);
        assert!(!report.interrupted);
        // Fifth job lands in the third window
        assert!(report.max_queued >= Duration::from_millis(2000));
        assert!(report.max_queued < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_timeout_rejects() {
        let dispatcher = Dispatcher::new(dispatch_config(4, Some(500)), limiter(2, 1000));

        let report = dispatcher.run().await;

        assert_eq!(report.admitted, 2);
        assert_eq!(report.completed, 2);
        assert_eq!(report.rejected, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_abandons_queued_jobs() {
        let limiter = limiter(2, 1000);
        let dispatcher = Dispatcher::new(dispatch_config(6, None), limiter.clone());

        let report = dispatcher
            .run_with_shutdown(tokio::time::sleep(Duration::from_millis(500)))
            .await;

        assert!(report.interrupted);
        assert_eq!(report.admitted, 2);
        assert_eq!(report.completed, 2);
        assert_eq!(limiter.queue_length(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_counts_jobs_cut_off_mid_work() {
        let config = DispatchConfig {
            jobs: 3,
            job_ms: 1000,
            admit_timeout_ms: None,
        };
        let dispatcher = Dispatcher::new(config, limiter(2, 1000));

        let report = dispatcher
            .run_with_shutdown(tokio::time::sleep(Duration::from_millis(500)))
            .await;

        assert!(report.interrupted);
        assert_eq!(report.admitted, 2);
        assert_eq!(report.completed, 0);
        assert_eq!(report.rejected, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_limiter_runs_everything() {
        let dispatcher = Dispatcher::new(dispatch_config(50, None), limiter(0, 0));

        let report = dispatcher.run().await;

        assert_eq!(report.completed, 50);
        assert_eq!(report.max_queued, Duration::ZERO);
    }
}
