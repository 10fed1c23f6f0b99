//! Serial worker queue for the synchronous pipeline stages.
//!
//! Translation and multipart encoding run on one dedicated thread, in
//! submission order. Async callers hand a closure to [`SerialQueue::run`] and
//! await its result; the closure is skipped when the invocation's
//! [`CancellationToken`] fired before the worker reached it.
//!
//! # Example
//!
//! ```no_run
//! use horizon_lattice_api::{CancellationToken, SerialQueue};
//!
//! # async fn demo() -> horizon_lattice_api::Result<()> {
//! let queue = SerialQueue::new()?;
//! let token = CancellationToken::new();
//! let answer = queue.run(&token, || Ok(6 * 7)).await?;
//! assert_eq!(answer, 42);
//! queue.stop_and_join();
//! # Ok(())
//! # }
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, oneshot};

use crate::cancel::CancellationToken;
use crate::error::{ApiError, Result};
use crate::logging::targets;

/// Default capacity for the task queue.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Configuration for a [`SerialQueue`].
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Name for the worker thread.
    pub name: String,
    /// Stack size for the worker thread in bytes. `None` uses the default.
    pub stack_size: Option<usize>,
    /// Capacity of the task queue.
    pub queue_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "horizon-api-worker".to_string(),
            stack_size: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl QueueConfig {
    /// Create a configuration with the given thread name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

struct QueueState {
    running: AtomicBool,
    pending_tasks: AtomicUsize,
}

enum QueueTask {
    Run(Box<dyn FnOnce() + Send>),
    Shutdown,
}

/// A dedicated thread executing submitted closures one at a time.
///
/// Every queued task holds one of `queue_capacity` slots until it has run.
/// [`SerialQueue::run`] waits for a free slot; [`SerialQueue::submit`] never
/// waits and fails when none is free.
pub struct SerialQueue {
    task_sender: Sender<QueueTask>,
    slots: Arc<Semaphore>,
    handle: Mutex<Option<JoinHandle<()>>>,
    state: Arc<QueueState>,
    name: String,
}

impl SerialQueue {
    /// Start a queue with default configuration.
    pub fn new() -> Result<Self> {
        Self::with_config(QueueConfig::default())
    }

    /// Start a queue with custom configuration.
    pub fn with_config(config: QueueConfig) -> Result<Self> {
        let capacity = config.queue_capacity.max(1);
        // One extra place so `Shutdown` always fits behind a full set of slots.
        let (sender, receiver) = bounded(capacity + 1);
        let state = Arc::new(QueueState {
            running: AtomicBool::new(true),
            pending_tasks: AtomicUsize::new(0),
        });

        let thread_state = state.clone();
        let mut builder = thread::Builder::new().name(config.name.clone());
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let handle = builder
            .spawn(move || {
                queue_loop(receiver, &thread_state);
                thread_state.running.store(false, Ordering::Release);
            })
            .map_err(|e| ApiError::WorkerUnavailable(format!("failed to spawn worker: {e}")))?;

        tracing::debug!(
            target: targets::WORKER,
            name = %config.name,
            capacity = config.queue_capacity,
            "serial queue started"
        );

        Ok(Self {
            task_sender: sender,
            slots: Arc::new(Semaphore::new(capacity)),
            handle: Mutex::new(Some(handle)),
            state,
            name: config.name,
        })
    }

    /// The worker thread's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the queue still accepts tasks.
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Number of tasks queued or running.
    pub fn pending_tasks(&self) -> usize {
        self.state.pending_tasks.load(Ordering::Acquire)
    }

    /// Queue a closure without waiting for it.
    ///
    /// Fails with [`ApiError::WorkerUnavailable`] when the queue is stopped or
    /// every slot is taken.
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_running()?;
        let slot = self.slots.clone().try_acquire_owned().map_err(|_| {
            ApiError::WorkerUnavailable(format!("'{}' queue is full", self.name))
        })?;
        self.enqueue(slot, Box::new(task))
    }

    /// Run `task` on the worker and await its result.
    ///
    /// Waits for a free slot when the queue is full. Resolves to
    /// [`ApiError::RequestCanceled`] as soon as `token` fires; a task that has
    /// not started by then is skipped.
    pub async fn run<R, F>(&self, token: &CancellationToken, task: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> Result<R> + Send + 'static,
    {
        if token.is_cancelled() {
            return Err(ApiError::RequestCanceled);
        }
        self.ensure_running()?;

        let slot = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ApiError::RequestCanceled),
            slot = self.slots.clone().acquire_owned() => slot.map_err(|_| {
                ApiError::WorkerUnavailable(format!("'{}' is stopped", self.name))
            })?,
        };

        let (tx, rx) = oneshot::channel();
        let task_token = token.clone();
        self.enqueue(
            slot,
            Box::new(move || {
                let result = if task_token.is_cancelled() {
                    Err(ApiError::RequestCanceled)
                } else {
                    task()
                };
                let _ = tx.send(result);
            }),
        )?;

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(ApiError::RequestCanceled),
            received = rx => received.unwrap_or_else(|_| {
                Err(ApiError::WorkerUnavailable(
                    "task dropped before completion".to_string(),
                ))
            }),
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(ApiError::WorkerUnavailable(format!(
                "'{}' is stopped",
                self.name
            )))
        }
    }

    /// Send `task` to the worker. The slot is released once the task has run
    /// or been dropped.
    fn enqueue(&self, slot: OwnedSemaphorePermit, task: Box<dyn FnOnce() + Send>) -> Result<()> {
        let task: Box<dyn FnOnce() + Send> = Box::new(move || {
            let _slot = slot;
            task();
        });

        self.state.pending_tasks.fetch_add(1, Ordering::AcqRel);
        match self.task_sender.try_send(QueueTask::Run(task)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.state.pending_tasks.fetch_sub(1, Ordering::AcqRel);
                Err(ApiError::WorkerUnavailable(format!(
                    "'{}' has exited",
                    self.name
                )))
            }
        }
    }

    /// Stop accepting tasks. Already queued tasks still run; callers waiting
    /// for a slot fail.
    pub fn stop(&self) {
        if self.state.running.swap(false, Ordering::AcqRel) {
            tracing::debug!(target: targets::WORKER, name = %self.name, "serial queue stopping");
        }
        self.slots.close();
        let _ = self.task_sender.try_send(QueueTask::Shutdown);
    }

    /// Wait for the worker thread to exit.
    ///
    /// Returns `false` if already joined or the thread panicked.
    pub fn join(&self) -> bool {
        let mut handle = self.handle.lock();
        match handle.take() {
            Some(h) => h.join().is_ok(),
            None => false,
        }
    }

    /// Stop the queue and wait for it to drain.
    pub fn stop_and_join(&self) -> bool {
        self.stop();
        self.join()
    }
}

impl Drop for SerialQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("pending_tasks", &self.pending_tasks())
            .finish()
    }
}

fn execute(task: Box<dyn FnOnce() + Send>, state: &QueueState) {
    if catch_unwind(AssertUnwindSafe(task)).is_err() {
        tracing::error!(target: targets::WORKER, "queued task panicked");
    }
    state.pending_tasks.fetch_sub(1, Ordering::AcqRel);
}

fn queue_loop(receiver: Receiver<QueueTask>, state: &QueueState) {
    loop {
        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(QueueTask::Run(task)) => execute(task, state),
            Ok(QueueTask::Shutdown) => {
                while let Ok(task) = receiver.try_recv() {
                    if let QueueTask::Run(task) = task {
                        execute(task, state);
                    }
                }
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if !state.running.load(Ordering::Acquire)
                    && state.pending_tasks.load(Ordering::Acquire) == 0
                {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
