//! Periodic task scheduler.
//!
//! Each registered task gets its own loop: wait the initial delay, run, sleep
//! the interval, run again, until stopped. Loops are independent, so a slow
//! task never shifts another task's schedule.
//!
//! Async callables run as their own tokio task; blocking callables run on the
//! blocking pool, at most `max_workers` at a time. Either way a failure
//! (error or panic) is logged and counted and the loop carries on.
//!
//! Cancellation is observed only between invocations: a stop or shutdown
//! never interrupts a callable mid-run.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shortest interval a task may be registered with.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Boxed future returned by async task callables.
pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A periodic task body.
#[derive(Clone)]
pub enum TaskFn {
    /// Runs on the async runtime.
    Async(Arc<dyn Fn() -> TaskFuture + Send + Sync>),
    /// Runs on the bounded blocking pool.
    Blocking(Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>),
}

impl TaskFn {
    /// Wrap an async closure.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Async(Arc::new(move || Box::pin(f())))
    }

    /// Wrap a blocking closure.
    pub fn from_blocking<F>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Blocking(Arc::new(f))
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Async(_) => "async",
            Self::Blocking(_) => "blocking",
        }
    }
}

impl fmt::Debug for TaskFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskFn::{}", self.kind())
    }
}

/// Why a single invocation did not succeed.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The callable returned an error.
    #[error("task returned an error: {0:#}")]
    Failed(anyhow::Error),
    /// The callable panicked.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The invocation was aborted before finishing.
    #[error("task invocation was cancelled")]
    Cancelled,
    /// The blocking worker pool has been closed by shutdown.
    #[error("worker pool is closed")]
    PoolClosed,
}

/// Observable state of one task.
#[derive(Clone, Debug, Serialize)]
pub struct TaskStatus {
    /// Time between the end of one run and the start of the next.
    pub interval_secs: f64,
    /// Delay before the first run.
    pub initial_delay_secs: f64,
    /// `async` or `blocking`.
    pub kind: &'static str,
    /// When the last run finished.
    pub last_run: Option<DateTime<Utc>>,
    /// Completed runs, successful or not.
    pub run_count: u64,
    /// Runs that failed.
    pub error_count: u64,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Whether a loop is live for this task.
    pub is_running: bool,
}

struct TaskSpec {
    func: TaskFn,
    interval: Duration,
    initial_delay: Duration,
}

#[derive(Default)]
struct TaskCounters {
    last_run: Option<DateTime<Utc>>,
    run_count: u64,
    error_count: u64,
    last_error: Option<String>,
}

struct RunningLoop {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl RunningLoop {
    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }
}

struct TaskSlot {
    spec: Arc<TaskSpec>,
    counters: Arc<Mutex<TaskCounters>>,
    running: Option<RunningLoop>,
}

/// Runs named callables on fixed intervals until stopped.
pub struct PeriodicTaskScheduler {
    tasks: Mutex<BTreeMap<String, TaskSlot>>,
    shutdown: CancellationToken,
    workers: Arc<Semaphore>,
    max_workers: usize,
}

impl PeriodicTaskScheduler {
    /// Create a scheduler whose blocking tasks share `max_workers` slots.
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            tasks: Mutex::new(BTreeMap::new()),
            shutdown: CancellationToken::new(),
            workers: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    /// Register (or replace) a task. Does not start it.
    ///
    /// Replacing a task keeps its counters and stops any loop still running
    /// the old definition; call [`Self::start_all`] to run the new one.
    pub fn register(
        &self,
        task_id: impl Into<String>,
        func: TaskFn,
        interval: Duration,
        initial_delay: Duration,
    ) {
        let task_id = task_id.into();
        let spec = Arc::new(TaskSpec {
            func,
            interval: interval.max(MIN_INTERVAL),
            initial_delay,
        });
        let mut tasks = self.tasks.lock();
        if let Some(slot) = tasks.get_mut(&task_id) {
            warn!(task_id, "task already registered, overwriting definition");
            slot.spec = spec;
            if let Some(old) = slot.running.take() {
                old.token.cancel();
            }
            return;
        }
        debug!(
            task_id,
            kind = spec.func.kind(),
            interval_ms = spec.interval.as_millis(),
            "registered periodic task"
        );
        let _ = tasks.insert(
            task_id,
            TaskSlot {
                spec,
                counters: Arc::default(),
                running: None,
            },
        );
    }

    /// Register an async task.
    pub fn register_async<F, Fut>(
        &self,
        task_id: impl Into<String>,
        interval: Duration,
        initial_delay: Duration,
        f: F,
    ) where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(task_id, TaskFn::from_async(f), interval, initial_delay);
    }

    /// Register a blocking task.
    pub fn register_blocking<F>(
        &self,
        task_id: impl Into<String>,
        interval: Duration,
        initial_delay: Duration,
        f: F,
    ) where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(task_id, TaskFn::from_blocking(f), interval, initial_delay);
    }

    /// Spawn a loop for every task without a live one. Returns how many
    /// loops were started. Must be called from within a tokio runtime.
    pub fn start_all(&self) -> usize {
        if self.shutdown.is_cancelled() {
            warn!("scheduler is shut down, not starting tasks");
            return 0;
        }
        let mut tasks = self.tasks.lock();
        let mut started = 0;
        for (task_id, slot) in tasks.iter_mut() {
            if slot.running.as_ref().is_some_and(RunningLoop::is_live) {
                continue;
            }
            let token = self.shutdown.child_token();
            let handle = tokio::spawn(run_loop(
                task_id.clone(),
                Arc::clone(&slot.spec),
                Arc::clone(&slot.counters),
                token.clone(),
                Arc::clone(&self.workers),
            ));
            slot.running = Some(RunningLoop { token, handle });
            started += 1;
        }
        info!(started, registered = tasks.len(), "periodic tasks started");
        started
    }

    /// Stop one task's loop and wait for it to exit.
    ///
    /// Returns `false` if the task is unknown or was not running.
    pub async fn stop(&self, task_id: &str) -> bool {
        let running = {
            let mut tasks = self.tasks.lock();
            tasks.get_mut(task_id).and_then(|slot| slot.running.take())
        };
        let Some(running) = running else {
            return false;
        };
        running.token.cancel();
        if let Err(e) = running.handle.await {
            warn!(task_id, error = %e, "task loop ended abnormally");
        }
        info!(task_id, "periodic task stopped");
        true
    }

    /// Stop every loop, waiting up to `timeout` for them to exit.
    ///
    /// Loops still running after the timeout are aborted and abandoned.
    /// Returns `true` if every loop exited in time. After shutdown the
    /// scheduler will not start tasks again.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.shutdown.cancel();
        let loops: Vec<JoinHandle<()>> = {
            let mut tasks = self.tasks.lock();
            tasks
                .values_mut()
                .filter_map(|slot| slot.running.take())
                .map(|running| running.handle)
                .collect()
        };
        let count = loops.len();
        let aborts: Vec<_> = loops.iter().map(JoinHandle::abort_handle).collect();

        info!(
            task_count = count,
            timeout_secs = timeout.as_secs_f64(),
            "waiting for periodic tasks to stop"
        );

        let completed = if tokio::time::timeout(timeout, futures::future::join_all(loops))
            .await
            .is_ok()
        {
            true
        } else {
            warn!("scheduler shutdown timed out after {timeout:?}, abandoning remaining tasks");
            for abort in aborts {
                abort.abort();
            }
            false
        };
        self.workers.close();
        completed
    }

    /// Snapshot of every registered task.
    pub fn status(&self) -> BTreeMap<String, TaskStatus> {
        let tasks = self.tasks.lock();
        tasks
            .iter()
            .map(|(task_id, slot)| {
                let counters = slot.counters.lock();
                let status = TaskStatus {
                    interval_secs: slot.spec.interval.as_secs_f64(),
                    initial_delay_secs: slot.spec.initial_delay.as_secs_f64(),
                    kind: slot.spec.func.kind(),
                    last_run: counters.last_run,
                    run_count: counters.run_count,
                    error_count: counters.error_count,
                    last_error: counters.last_error.clone(),
                    is_running: slot.running.as_ref().is_some_and(RunningLoop::is_live),
                };
                (task_id.clone(), status)
            })
            .collect()
    }

    /// Whether `task_id` is registered.
    pub fn is_registered(&self, task_id: &str) -> bool {
        self.tasks.lock().contains_key(task_id)
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether no tasks are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concurrency limit for blocking tasks.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }
}

async fn run_loop(
    task_id: String,
    spec: Arc<TaskSpec>,
    counters: Arc<Mutex<TaskCounters>>,
    token: CancellationToken,
    workers: Arc<Semaphore>,
) {
    debug!(task_id, "task loop started");
    if !spec.initial_delay.is_zero() {
        tokio::select! {
            biased;
            () = token.cancelled() => return,
            () = tokio::time::sleep(spec.initial_delay) => {}
        }
    }

    loop {
        let started = Instant::now();
        let outcome = invoke(&spec.func, &workers).await;
        let elapsed_ms = started.elapsed().as_millis();

        {
            let mut c = counters.lock();
            c.run_count += 1;
            c.last_run = Some(Utc::now());
            if let Err(e) = &outcome {
                c.error_count += 1;
                c.last_error = Some(e.to_string());
            }
        }
        counter!("scheduler_task_runs_total", "task" => task_id.clone()).increment(1);

        match outcome {
            Ok(()) => debug!(task_id, elapsed_ms, "periodic task completed"),
            Err(e) => {
                counter!("scheduler_task_errors_total", "task" => task_id.clone()).increment(1);
                error!(task_id, elapsed_ms, error = %e, "periodic task failed");
            }
        }

        tokio::select! {
            biased;
            () = token.cancelled() => break,
            () = tokio::time::sleep(spec.interval) => {}
        }
    }
    debug!(task_id, "task loop stopped");
}

async fn invoke(func: &TaskFn, workers: &Arc<Semaphore>) -> Result<(), TaskError> {
    match func {
        TaskFn::Async(f) => flatten(tokio::spawn(f()).await),
        TaskFn::Blocking(f) => {
            let permit = Arc::clone(workers)
                .acquire_owned()
                .await
                .map_err(|_| TaskError::PoolClosed)?;
            let f = Arc::clone(f);
            flatten(
                tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    f()
                })
                .await,
            )
        }
    }
}

fn flatten(joined: Result<anyhow::Result<()>, JoinError>) -> Result<(), TaskError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TaskError::Failed(e)),
        Err(e) if e.is_panic() => Err(TaskError::Panicked(panic_message(e.into_panic()))),
        Err(_) => Err(TaskError::Cancelled),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
