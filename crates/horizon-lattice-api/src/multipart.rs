//! Multipart encoder with temp-file backed bodies.
//!
//! Encoding serializes the parts in order into a `multipart/form-data` body,
//! stamps the content type on the base request and writes the body to a
//! uniquely named file inside a scratch directory. The resulting
//! [`EncodedUploadArtifact`] owns that file through a [`TempFile`], which
//! removes it exactly once: either when [`TempFile::cleanup`] is called or, failing
//! that, when the guard is dropped.
//!
//! # Example
//!
//! ```ignore
//! let encoder = MultipartEncoder::new(scratch_dir, Arc::new(StdFilePrimitives));
//! let artifact = encoder.encode(
//!     &[MultipartParameter::bytes("avatar", png, "avatar.png", "image/png")],
//!     request,
//! )?;
//! fetcher.upload_file(artifact.request.clone(), artifact.temp_file.path().to_path_buf()).await;
//! artifact.temp_file.cleanup();
//! ```

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CONTENT_TYPE, HeaderValue};
use parking_lot::Mutex;

use crate::error::{ApiError, Result};
use crate::logging::targets;
use crate::transport::TransportRequest;

/// Default mime type for parts that do not name one.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Serializes directory creation and body writes across every encoder in the
/// process, so concurrent uploads never race on the scratch directory.
static SCRATCH_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Counter mixed into temp file names.
static FILE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// File system operations used by the encoder and the cleanup path.
pub trait FilePrimitives: Send + Sync {
    /// Create a directory, and its parents when `recursive` is set.
    fn create_directory(&self, path: &Path, recursive: bool) -> io::Result<()>;

    /// Remove a file.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Write `bytes` to `path`, replacing any existing file.
    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;

    /// Read a whole file.
    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// [`FilePrimitives`] backed by `std::fs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdFilePrimitives;

impl FilePrimitives for StdFilePrimitives {
    fn create_directory(&self, path: &Path, recursive: bool) -> io::Result<()> {
        if recursive {
            std::fs::create_dir_all(path)
        } else {
            std::fs::create_dir(path)
        }
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        std::fs::write(path, bytes)
    }

    fn read_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}

/// The payload of a multipart part.
#[derive(Clone, Debug)]
pub enum PartValue {
    /// In-memory bytes.
    Bytes(Bytes),
    /// Contents of a file, read at encoding time.
    File(PathBuf),
}

/// One named part of a multipart upload.
#[derive(Clone, Debug)]
pub struct MultipartParameter {
    /// Form field name.
    pub key: String,
    /// Payload.
    pub value: PartValue,
    /// File name reported in the content disposition.
    pub file_name: String,
    /// Mime type of the payload.
    pub mime_type: String,
}

impl MultipartParameter {
    /// A part backed by in-memory bytes.
    pub fn bytes(
        key: impl Into<String>,
        data: impl Into<Bytes>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            value: PartValue::Bytes(data.into()),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
        }
    }

    /// A part backed by a file. The file name defaults to the path's last
    /// component and the mime type to `application/octet-stream`.
    pub fn file(key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            key: key.into(),
            value: PartValue::File(path),
            file_name,
            mime_type: DEFAULT_MIME_TYPE.to_string(),
        }
    }

    /// Override the reported file name.
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    /// Override the mime type.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }
}

/// A temp file with a single pending removal.
pub struct TempFile {
    path: PathBuf,
    fs: Arc<dyn FilePrimitives>,
    removed: bool,
}

impl TempFile {
    fn new(path: PathBuf, fs: Arc<dyn FilePrimitives>) -> Self {
        Self {
            path,
            fs,
            removed: false,
        }
    }

    /// The file's location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file now. Failures are logged, never returned.
    pub fn cleanup(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;
        match self.fs.remove_file(&self.path) {
            Ok(()) => tracing::trace!(
                target: targets::MULTIPART,
                path = %self.path.display(),
                "temp file removed"
            ),
            Err(e) => tracing::warn!(
                target: targets::MULTIPART,
                path = %self.path.display(),
                error = %e,
                "failed to remove temp file"
            ),
        }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        self.remove();
    }
}

impl fmt::Debug for TempFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempFile")
            .field("path", &self.path)
            .field("removed", &self.removed)
            .finish()
    }
}

/// An encoded multipart body and the request that uploads it.
#[derive(Debug)]
pub struct EncodedUploadArtifact {
    /// The base request with `Content-Type: multipart/form-data; boundary=..`.
    pub request: TransportRequest,
    /// The file holding the encoded body.
    pub temp_file: TempFile,
}

/// Encodes multipart parts into scratch files.
#[derive(Clone)]
pub struct MultipartEncoder {
    scratch_dir: PathBuf,
    fs: Arc<dyn FilePrimitives>,
}

impl MultipartEncoder {
    /// Create an encoder writing into `scratch_dir`.
    pub fn new(scratch_dir: impl Into<PathBuf>, fs: Arc<dyn FilePrimitives>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            fs,
        }
    }

    /// The scratch directory.
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Encode `parts` and write the body to a new temp file.
    #[tracing::instrument(
        skip_all,
        target = "horizon_lattice_api::multipart",
        level = "debug",
        fields(parts = parts.len())
    )]
    pub fn encode(
        &self,
        parts: &[MultipartParameter],
        mut request: TransportRequest,
    ) -> Result<EncodedUploadArtifact> {
        let boundary = generate_boundary();
        let body = self.encode_body(parts, &boundary)?;

        let content_type = HeaderValue::try_from(format!("multipart/form-data; boundary={boundary}"))
            .map_err(|e| ApiError::part_failed("", e.to_string()))?;
        request.headers.insert(CONTENT_TYPE, content_type);
        request.body = None;

        let path = self.scratch_dir.join(format!(
            "upload-{}-{}-{:016x}.multipart",
            std::process::id(),
            FILE_COUNTER.fetch_add(1, Ordering::Relaxed),
            rand::random::<u64>()
        ));

        {
            let _guard = SCRATCH_LOCK.lock();
            self.fs
                .create_directory(&self.scratch_dir, true)
                .map_err(|e| ApiError::storage_failed(&self.scratch_dir, e.to_string()))?;
            if let Err(e) = self.fs.write_bytes(&path, &body) {
                self.discard_partial(&path);
                return Err(ApiError::storage_failed(&path, e.to_string()));
            }
        }

        tracing::debug!(
            target: targets::MULTIPART,
            path = %path.display(),
            bytes = body.len(),
            "multipart body written"
        );

        Ok(EncodedUploadArtifact {
            request,
            temp_file: TempFile::new(path, self.fs.clone()),
        })
    }

    /// Remove whatever a failed write left behind.
    fn discard_partial(&self, path: &Path) {
        match self.fs.remove_file(path) {
            Ok(()) => tracing::debug!(
                target: targets::MULTIPART,
                path = %path.display(),
                "partial body removed"
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                target: targets::MULTIPART,
                path = %path.display(),
                error = %e,
                "failed to remove partial body"
            ),
        }
    }

    fn encode_body(&self, parts: &[MultipartParameter], boundary: &str) -> Result<Bytes> {
        let mut body = BytesMut::new();

        for part in parts {
            if !is_valid_mime(&part.mime_type) {
                return Err(ApiError::part_failed(
                    &part.key,
                    format!("invalid mime type '{}'", part.mime_type),
                ));
            }

            let payload = match &part.value {
                PartValue::Bytes(bytes) => bytes.clone(),
                PartValue::File(path) => self
                    .fs
                    .read_bytes(path)
                    .map(Bytes::from)
                    .map_err(|e| {
                        ApiError::part_failed(&part.key, format!("{}: {e}", path.display()))
                    })?,
            };

            body.put_slice(b"--");
            body.put_slice(boundary.as_bytes());
            body.put_slice(b"\r\n");
            body.put_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    escape_quoted(&part.key),
                    escape_quoted(&part.file_name)
                )
                .as_bytes(),
            );
            body.put_slice(format!("Content-Type: {}\r\n\r\n", part.mime_type).as_bytes());
            body.put_slice(&payload);
            body.put_slice(b"\r\n");
        }

        body.put_slice(b"--");
        body.put_slice(boundary.as_bytes());
        body.put_slice(b"--\r\n");

        Ok(body.freeze())
    }
}

impl fmt::Debug for MultipartEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartEncoder")
            .field("scratch_dir", &self.scratch_dir)
            .finish()
    }
}

fn generate_boundary() -> String {
    format!(
        "horizon-lattice.boundary.{:016x}{:016x}",
        rand::random::<u64>(),
        rand::random::<u64>()
    )
}

/// Percent-escape the characters that would break a quoted header parameter.
fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Check a `type/subtype[; params]` mime string.
fn is_valid_mime(mime: &str) -> bool {
    if HeaderValue::from_str(mime).is_err() {
        return false;
    }
    let essence = mime.split(';').next().unwrap_or_default().trim();
    let Some((kind, subtype)) = essence.split_once('/') else {
        return false;
    };
    let is_token = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || "!#$&^_.+-".contains(c))
    };
    is_token(kind) && is_token(subtype)
}
