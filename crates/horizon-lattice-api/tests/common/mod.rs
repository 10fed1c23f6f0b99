//! Shared test doubles for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use horizon_lattice_api::{
    ApiClient, ApiError, FilePrimitives, NetworkFetcher, Result, SerialQueue,
    StdFilePrimitives, TransportRequest, TransportResponse,
};

/// What the mock fetcher does with the next call.
#[derive(Clone)]
pub enum Reply {
    /// Respond with a status and body.
    Respond(u16, Bytes),
    /// Fail with the error produced by the closure.
    Fail(Arc<dyn Fn() -> ApiError + Send + Sync>),
    /// Never resolve until dropped.
    Hang,
}

impl Reply {
    pub fn json(status: u16, body: &str) -> Self {
        Self::Respond(status, Bytes::copy_from_slice(body.as_bytes()))
    }

    pub fn fail(make: impl Fn() -> ApiError + Send + Sync + 'static) -> Self {
        Self::Fail(Arc::new(make))
    }
}

/// A recorded upload call.
#[derive(Clone, Debug)]
pub struct UploadRecord {
    pub request: TransportRequest,
    pub path: PathBuf,
    pub body: Option<Vec<u8>>,
}

#[derive(Default)]
struct FetcherState {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Option<Reply>>,
    fetch_calls: AtomicUsize,
    upload_calls: AtomicUsize,
    requests: Mutex<Vec<TransportRequest>>,
    uploads: Mutex<Vec<UploadRecord>>,
    dropped_in_flight: AtomicUsize,
}

/// Scripted [`NetworkFetcher`] that counts calls.
#[derive(Clone, Default)]
pub struct MockFetcher {
    state: Arc<FetcherState>,
}

impl MockFetcher {
    /// Always reply with `reply`.
    pub fn always(reply: Reply) -> Self {
        let fetcher = Self::default();
        *fetcher.state.fallback.lock() = Some(reply);
        fetcher
    }

    /// Reply with `body` and `status` to every call.
    pub fn responding(status: u16, body: &str) -> Self {
        Self::always(Reply::json(status, body))
    }

    /// Queue a one-shot reply, used before the fallback.
    pub fn push(&self, reply: Reply) {
        self.state.replies.lock().push_back(reply);
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> usize {
        self.state.upload_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.fetch_calls() + self.upload_calls()
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.state.requests.lock().clone()
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.state.uploads.lock().clone()
    }

    /// Number of live clones of this fetcher, the caller's included.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.state)
    }

    /// Number of calls whose future was dropped before resolving.
    pub fn dropped_in_flight(&self) -> usize {
        self.state.dropped_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Reply {
        if let Some(reply) = self.state.replies.lock().pop_front() {
            return reply;
        }
        self.state
            .fallback
            .lock()
            .clone()
            .unwrap_or_else(|| Reply::json(200, "{}"))
    }

    fn respond(&self, reply: Reply) -> BoxFuture<'static, Result<TransportResponse>> {
        let guard = InFlight {
            state: self.state.clone(),
            resolved: false,
        };
        async move {
            let mut guard = guard;
            let result = match reply {
                Reply::Respond(status, body) => Ok(TransportResponse::new(status, body)),
                Reply::Fail(make) => Err(make()),
                Reply::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            };
            guard.resolved = true;
            result
        }
        .boxed()
    }
}

struct InFlight {
    state: Arc<FetcherState>,
    resolved: bool,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.resolved {
            self.state.dropped_in_flight.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl NetworkFetcher for MockFetcher {
    fn fetch_data(&self, request: TransportRequest) -> BoxFuture<'static, Result<TransportResponse>> {
        self.state.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.state.requests.lock().push(request);
        self.respond(self.next_reply())
    }

    fn upload_file(
        &self,
        request: TransportRequest,
        file: PathBuf,
    ) -> BoxFuture<'static, Result<TransportResponse>> {
        self.state.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.state.requests.lock().push(request.clone());
        self.state.uploads.lock().push(UploadRecord {
            request,
            body: std::fs::read(&file).ok(),
            path: file,
        });
        self.respond(self.next_reply())
    }
}

/// [`FilePrimitives`] over `std::fs` that records every call.
#[derive(Clone, Default)]
pub struct RecordingFiles {
    state: Arc<FilesState>,
}

#[derive(Default)]
struct FilesState {
    writes: Mutex<Vec<PathBuf>>,
    removes: Mutex<Vec<PathBuf>>,
    fail_create: AtomicBool,
    fail_remove: AtomicBool,
}

impl RecordingFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make directory creation fail.
    pub fn failing_create(self) -> Self {
        self.state.fail_create.store(true, Ordering::SeqCst);
        self
    }

    /// Make file removal fail (the file is left on disk).
    pub fn failing_remove(self) -> Self {
        self.state.fail_remove.store(true, Ordering::SeqCst);
        self
    }

    pub fn writes(&self) -> Vec<PathBuf> {
        self.state.writes.lock().clone()
    }

    pub fn removes(&self) -> Vec<PathBuf> {
        self.state.removes.lock().clone()
    }

    /// How many times `path` was removed.
    pub fn removal_count(&self, path: &Path) -> usize {
        self.state.removes.lock().iter().filter(|p| *p == path).count()
    }
}

impl FilePrimitives for RecordingFiles {
    fn create_directory(&self, path: &Path, recursive: bool) -> io::Result<()> {
        if self.state.fail_create.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only volume"));
        }
        StdFilePrimitives.create_directory(path, recursive)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.state.removes.lock().push(path.to_path_buf());
        if self.state.fail_remove.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "busy"));
        }
        StdFilePrimitives.remove_file(path)
    }

    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        self.state.writes.lock().push(path.to_path_buf());
        StdFilePrimitives.write_bytes(path, bytes)
    }

    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
        StdFilePrimitives.read_bytes(path)
    }
}

/// Build a client over mocks, writing multipart bodies into `scratch`.
pub fn client(fetcher: &MockFetcher, files: &RecordingFiles, scratch: &Path) -> ApiClient {
    ApiClient::builder("https://api.example.com")
        .fetcher(fetcher.clone())
        .file_primitives(files.clone())
        .scratch_dir(scratch)
        .build()
        .expect("Failed to build client")
}

/// Occupy `queue` until the returned closure is called.
pub fn block_queue(queue: &SerialQueue) -> impl FnOnce() {
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let (started_tx, started_rx) = std::sync::mpsc::channel::<()>();
    queue
        .submit(move || {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
        })
        .expect("queue rejected blocker");
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("blocker never started");
    move || {
        let _ = release_tx.send(());
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Files left in `dir`.
pub fn leftover_files(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}
