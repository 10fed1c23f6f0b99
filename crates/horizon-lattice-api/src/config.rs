//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default capacity of the serial worker queue.
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Configuration for an [`ApiClient`](crate::ApiClient).
///
/// Every field has a default, so a partial document deserializes:
///
/// ```
/// use horizon_lattice_api::ClientConfig;
///
/// let config: ClientConfig =
///     serde_json::from_str(r#"{"base_url": "https://api.example.com"}"#).unwrap();
/// assert_eq!(config.max_redirects, 10);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL that endpoint paths are appended to.
    pub base_url: String,
    /// Request timeout.
    pub timeout: Option<Duration>,
    /// Connect timeout.
    pub connect_timeout: Option<Duration>,
    /// Whether to follow redirects.
    pub follow_redirects: bool,
    /// Maximum number of redirects to follow.
    pub max_redirects: usize,
    /// Whether to enable cookie storage.
    pub cookies_enabled: bool,
    /// Default user agent.
    pub user_agent: Option<String>,
    /// Proxy URL.
    pub proxy: Option<String>,
    /// Directory for encoded multipart bodies. Defaults to a subdirectory of
    /// the system temp directory.
    pub scratch_dir: Option<PathBuf>,
    /// Name of the worker thread for translation and encoding.
    pub worker_name: String,
    /// Capacity of the worker queue.
    pub queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            timeout: Some(Duration::from_secs(30)),
            connect_timeout: Some(Duration::from_secs(10)),
            follow_redirects: true,
            max_redirects: 10,
            cookies_enabled: true,
            user_agent: Some(format!(
                "HorizonLattice/{} (Rust)",
                env!("CARGO_PKG_VERSION")
            )),
            proxy: None,
            scratch_dir: None,
            worker_name: "horizon-api-worker".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Create a configuration for a base URL with default settings.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// The scratch directory, falling back to the system temp directory.
    pub fn resolved_scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("horizon-lattice-api").join("uploads"))
    }
}
