//! Supervised one-shot background jobs (training runs, pipeline runs).
//!
//! Every job is spawned on a [`TaskTracker`] and handed a child of the
//! supervisor's [`CancellationToken`]. On shutdown the token is cancelled and
//! the tracker is drained with a timeout; jobs are expected to observe the
//! token between steps, record a terminal state and return.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Owns every in-flight job.
#[derive(Debug)]
pub struct JobSupervisor {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl JobSupervisor {
    /// Create a supervisor cancelled together with `parent`.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            tracker: TaskTracker::new(),
            token: parent.child_token(),
        }
    }

    /// Spawn a job. `job` receives the token it must watch.
    pub fn spawn<F, Fut>(&self, kind: &'static str, job: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.child_token();
        debug!(kind, active = self.tracker.len() + 1, "job spawned");
        let _ = self.tracker.spawn(job(token));
    }

    /// Jobs still running.
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// Whether new and running jobs are being cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel every job and wait up to `timeout` for them to finish.
    ///
    /// Returns `false` if some job was still running at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.token.cancel();
        let _ = self.tracker.close();
        let active = self.tracker.len();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!(active = self.tracker.len(), ?timeout, "jobs still running after shutdown timeout");
            return false;
        }
        info!(drained = active, "background jobs stopped");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn shutdown_cancels_and_waits() {
        let root = CancellationToken::new();
        let jobs = JobSupervisor::new(&root);
        let observed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&observed);
        jobs.spawn("test", move |token| async move {
            token.cancelled().await;
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(jobs.active(), 1);

        assert!(jobs.shutdown(Duration::from_secs(2)).await);
        assert!(observed.load(Ordering::SeqCst));
        assert_eq!(jobs.active(), 0);
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_jobs() {
        let root = CancellationToken::new();
        let jobs = JobSupervisor::new(&root);
        root.cancel();
        assert!(jobs.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_reports_jobs_that_ignore_cancellation() {
        let jobs = JobSupervisor::new(&CancellationToken::new());
        jobs.spawn("stubborn", |_token| async {
            tokio::time::sleep(Duration::from_secs(600)).await;
        });
        assert!(!jobs.shutdown(Duration::from_millis(100)).await);
    }
}
