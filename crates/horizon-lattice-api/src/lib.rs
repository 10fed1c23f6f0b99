//! Asynchronous HTTP API client core for Horizon Lattice.
//!
//! This crate turns a declarative [`RequestDescriptor`] into one asynchronous
//! operation that translates the endpoint, transfers it, validates the status
//! and decodes the body:
//!
//! ```ignore
//! use horizon_lattice_api::{ApiClient, Endpoint, RequestDescriptor};
//!
//! let client = ApiClient::builder("https://api.example.com")
//!     .accept_json()
//!     .build()?;
//!
//! client.add_token_signature("secret");
//!
//! let login: Session = client
//!     .execute(RequestDescriptor::new(
//!         Endpoint::post("/login").json(&credentials),
//!     ))
//!     .await?;
//! ```
//!
//! # Entry points
//!
//! - [`ApiClient::fetch_raw`]: translate and transfer only. Status codes are
//!   left to the caller.
//! - [`ApiClient::execute`]: translate, transfer, validate, decode.
//! - [`ApiClient::upload`]: translate, encode a multipart body into a temp
//!   file, upload it, remove the file, validate, decode.
//!
//! Every entry point returns a [`PendingRequest`], a future that can be
//! cancelled until validation begins.
//!
//! # Uploads
//!
//! ```ignore
//! use horizon_lattice_api::{Endpoint, MultipartParameter, RequestDescriptor};
//!
//! let parts = vec![
//!     MultipartParameter::bytes("avatar", png_bytes, "avatar.png", "image/png"),
//!     MultipartParameter::file("report", "/tmp/report.pdf")
//!         .with_mime_type("application/pdf"),
//! ];
//! let receipt: Receipt = client
//!     .upload(RequestDescriptor::new(Endpoint::post("/files")), parts)
//!     .await?;
//! ```
//!
//! # Unauthorized responses
//!
//! A `401` produces [`ApiError::FailureStatusCode`] and, before that, notifies
//! every registered [`UnauthorizedObserver`]:
//!
//! ```ignore
//! let _guard = client.on_unauthorized(|url, client| {
//!     tracing::warn!("session expired at {url}");
//!     client.clear_signature();
//! });
//! ```
//!
//! # Signatures
//!
//! The signature lives in an immutable [`Environment`] snapshot. Setting or
//! clearing it swaps the snapshot; invocations already started keep the one
//! they captured.

pub mod cancel;
pub mod client;
pub mod config;
pub mod context;
pub mod decoder;
pub mod descriptor;
pub mod error;
pub mod logging;
pub mod multipart;
pub mod pending;
mod pipeline;
pub mod signature;
pub mod translator;
pub mod transport;
pub mod validation;
pub mod worker;

pub use cancel::CancellationToken;
pub use client::{ApiClient, ApiClientBuilder};
pub use config::ClientConfig;
pub use context::{DirectContext, MainThreadContext, Notification, NotificationContext};
pub use decoder::{Decoder, JsonDecoder};
pub use descriptor::{Endpoint, HttpMethod, RequestBody, RequestDescriptor, ResponseCheck};
pub use error::{ApiError, BoxError, EncodingFailure, ErrorCategory, Result};
pub use multipart::{
    EncodedUploadArtifact, FilePrimitives, MultipartEncoder, MultipartParameter, PartValue,
    StdFilePrimitives, TempFile,
};
pub use pending::{CancelHandle, PendingRequest, PipelineState, RequestId};
pub use signature::{Environment, Signature};
pub use translator::{RequestTranslator, RestTranslator};
pub use transport::{
    NetworkFetcher, ReqwestFetcher, ReqwestFetcherBuilder, TransportRequest, TransportResponse,
};
pub use validation::{ObserverGuard, ObserverId, UnauthorizedObserver};
pub use worker::{QueueConfig, SerialQueue};
