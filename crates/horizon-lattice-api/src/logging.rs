//! Logging facilities for the API client.
//!
//! The crate uses the `tracing` crate for instrumentation. Install a subscriber
//! in the application to see the output:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("horizon_lattice_api=debug")
//!     .init();
//! ```

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Crate-wide target.
    pub const API: &str = "horizon_lattice_api";
    /// Stage composition and invocation lifecycle.
    pub const PIPELINE: &str = "horizon_lattice_api::pipeline";
    /// Multipart encoding and temp-file lifecycle.
    pub const MULTIPART: &str = "horizon_lattice_api::multipart";
    /// Status validation and unauthorized notification.
    pub const VALIDATION: &str = "horizon_lattice_api::validation";
    /// Serial worker queue.
    pub const WORKER: &str = "horizon_lattice_api::worker";
    /// Network fetcher.
    pub const TRANSPORT: &str = "horizon_lattice_api::transport";
    /// Signature and environment changes.
    pub const SIGNATURE: &str = "horizon_lattice_api::signature";
}
