//! The cancellable future returned by every pipeline entry point.
//!
//! Each invocation owns an [`InvocationControl`] shared between the spawned
//! pipeline task and the caller's [`PendingRequest`]. Stage transitions and
//! cancellation both go through the control's lock, so an invocation is either
//! cancelled before validation begins or not at all.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::cancel::CancellationToken;
use crate::error::{ApiError, Result};
use crate::logging::targets;

/// Unique identifier for a pipeline invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    pub(crate) fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a pipeline invocation currently is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PipelineState {
    /// Spawned, no stage started yet.
    Created,
    /// Building the transport request on the worker queue.
    Translating,
    /// Encoding the multipart body on the worker queue (uploads only).
    Encoding,
    /// Waiting on the network fetcher.
    Transferring,
    /// Checking the response status.
    Validating,
    /// Decoding the body.
    Decoding,
    /// Resolved with a value.
    Completed,
    /// Resolved with an error other than cancellation.
    Failed,
    /// Resolved with [`ApiError::RequestCanceled`].
    Cancelled,
}

impl PipelineState {
    /// Whether the invocation has resolved.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a cancel request still has an effect.
    pub fn accepts_cancellation(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Translating | Self::Encoding | Self::Transferring
        )
    }
}

/// Shared per-invocation state.
pub(crate) struct InvocationControl {
    id: RequestId,
    token: CancellationToken,
    state: Mutex<PipelineState>,
}

impl InvocationControl {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: RequestId::new(),
            token: CancellationToken::new(),
            state: Mutex::new(PipelineState::Created),
        })
    }

    pub(crate) fn id(&self) -> RequestId {
        self.id
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    /// Move to `next`, or fail if cancellation arrived while it was still accepted.
    pub(crate) fn enter(&self, next: PipelineState) -> Result<()> {
        let mut state = self.state.lock();
        if self.token.is_cancelled() && state.accepts_cancellation() {
            *state = PipelineState::Cancelled;
            return Err(ApiError::RequestCanceled);
        }
        tracing::trace!(
            target: targets::PIPELINE,
            id = %self.id,
            from = ?*state,
            to = ?next,
            "stage transition"
        );
        *state = next;
        Ok(())
    }

    /// Record the terminal state and hand back the invocation's outcome.
    ///
    /// A success that raced an accepted cancel request resolves as cancelled.
    pub(crate) fn settle<T>(&self, result: Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return result;
        }
        let result = match result {
            Ok(_) if self.token.is_cancelled() && state.accepts_cancellation() => {
                Err(ApiError::RequestCanceled)
            }
            other => other,
        };
        *state = match &result {
            Ok(_) => PipelineState::Completed,
            Err(ApiError::RequestCanceled) => PipelineState::Cancelled,
            Err(_) => PipelineState::Failed,
        };
        result
    }

    pub(crate) fn cancel(&self) -> bool {
        let state = self.state.lock();
        if !state.accepts_cancellation() {
            return false;
        }
        let first = self.token.cancel();
        if first {
            tracing::debug!(
                target: targets::PIPELINE,
                id = %self.id,
                stage = ?*state,
                "cancellation requested"
            );
        }
        first
    }
}

/// A cloneable handle that can cancel an invocation from anywhere.
#[derive(Clone)]
pub struct CancelHandle {
    control: Arc<InvocationControl>,
}

impl CancelHandle {
    /// The invocation's id.
    pub fn id(&self) -> RequestId {
        self.control.id()
    }

    /// Request cancellation.
    ///
    /// Returns `true` if this call cancelled the invocation, `false` if it
    /// was already cancelled or validation has begun.
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.control.token().is_cancelled()
    }

    /// The invocation's current stage.
    pub fn state(&self) -> PipelineState {
        self.control.state()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

/// The outward-facing future of a pipeline invocation.
///
/// Resolves exactly once, with the decoded value or one [`ApiError`].
/// Dropping it before it resolves cancels the invocation, subject to the same
/// rules as [`PendingRequest::cancel`]. Call [`PendingRequest::detach`] to let
/// it run to completion unobserved.
#[must_use = "dropping a PendingRequest cancels the invocation"]
pub struct PendingRequest<T> {
    control: Arc<InvocationControl>,
    handle: JoinHandle<Result<T>>,
    detached: bool,
}

impl<T> PendingRequest<T> {
    pub(crate) fn new(control: Arc<InvocationControl>, handle: JoinHandle<Result<T>>) -> Self {
        Self {
            control,
            handle,
            detached: false,
        }
    }

    /// Let the invocation keep running without anyone awaiting it.
    ///
    /// The result is discarded. Temp files are still released and
    /// [`CancelHandle`]s taken earlier still work.
    pub fn detach(mut self) {
        self.detached = true;
        tracing::trace!(target: targets::PIPELINE, id = %self.control.id(), "invocation detached");
    }

    /// The invocation's id.
    pub fn id(&self) -> RequestId {
        self.control.id()
    }

    /// Request cancellation. See [`CancelHandle::cancel`].
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.control.token().is_cancelled()
    }

    /// The invocation's current stage.
    pub fn state(&self) -> PipelineState {
        self.control.state()
    }

    /// A handle that can cancel this invocation after the future is moved.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            control: self.control.clone(),
        }
    }
}

impl<T> Future for PendingRequest<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) if e.is_cancelled() => Poll::Ready(Err(ApiError::RequestCanceled)),
            Poll::Ready(Err(e)) => {
                tracing::error!(
                    target: targets::PIPELINE,
                    id = %this.control.id(),
                    error = %e,
                    "pipeline task failed"
                );
                Poll::Ready(Err(ApiError::Unknown(format!("pipeline task failed: {e}"))))
            }
        }
    }
}

impl<T> Drop for PendingRequest<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.control.cancel();
        }
    }
}

impl<T> fmt::Debug for PendingRequest<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}
