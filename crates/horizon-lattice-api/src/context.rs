//! Notification contexts: where unauthorized observers run.
//!
//! A UI application typically wants observers to run on its main thread.
//! [`MainThreadContext`] captures the thread it was created on; dispatching
//! from that thread runs the callback synchronously, dispatching from any other
//! thread queues it until the owning loop calls
//! [`MainThreadContext::process_pending`]. Off-thread dispatch never blocks,
//! even when the owning thread is itself awaiting the pipeline.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use crossbeam_channel::{Receiver, Sender, unbounded};

use crate::logging::targets;

/// A callback delivered to a notification context.
pub type Notification = Box<dyn FnOnce() + Send>;

/// Executes notifications on a designated execution context.
pub trait NotificationContext: Send + Sync {
    /// Run or schedule `notification`.
    fn dispatch(&self, notification: Notification);
}

/// Runs notifications inline on the dispatching thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirectContext;

impl NotificationContext for DirectContext {
    fn dispatch(&self, notification: Notification) {
        notification();
    }
}

/// Runs notifications on the thread that created it.
///
/// Cloning shares the same queue and owning thread.
#[derive(Clone)]
pub struct MainThreadContext {
    inner: Arc<MainThreadInner>,
}

struct MainThreadInner {
    owner: ThreadId,
    sender: Sender<Notification>,
    receiver: Receiver<Notification>,
}

impl MainThreadContext {
    /// Create a context owned by the current thread.
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            inner: Arc::new(MainThreadInner {
                owner: thread::current().id(),
                sender,
                receiver,
            }),
        }
    }

    /// Check if the calling thread owns this context.
    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.inner.owner
    }

    /// Number of queued notifications.
    pub fn pending_count(&self) -> usize {
        self.inner.receiver.len()
    }

    /// Run every queued notification. Returns how many ran.
    ///
    /// Does nothing when called off the owning thread.
    pub fn process_pending(&self) -> usize {
        if !self.is_owner_thread() {
            tracing::warn!(
                target: targets::VALIDATION,
                "process_pending called off the owning thread"
            );
            return 0;
        }

        let mut count = 0;
        while let Ok(notification) = self.inner.receiver.try_recv() {
            notification();
            count += 1;
        }
        count
    }
}

impl Default for MainThreadContext {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationContext for MainThreadContext {
    fn dispatch(&self, notification: Notification) {
        if self.is_owner_thread() {
            notification();
            return;
        }
        // The receiver lives in `inner`, so the channel cannot be disconnected.
        let _ = self.inner.sender.send(notification);
    }
}

impl std::fmt::Debug for MainThreadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainThreadContext")
            .field("owner", &self.inner.owner)
            .field("pending", &self.pending_count())
            .finish()
    }
}
