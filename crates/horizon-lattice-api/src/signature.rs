//! Authentication signatures and the environment snapshot.
//!
//! The client never mutates an [`Environment`] in place. Every change builds a
//! new snapshot and swaps the `Arc`, so a pipeline that already captured the
//! previous snapshot keeps translating with it.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use parking_lot::RwLock;
use url::Url;

use crate::error::Result;
use crate::logging::targets;

/// A named credential injected into every translated request.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature {
    name: String,
    value: String,
}

impl Signature {
    /// Create a signature from a header name and value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// `Authorization: Bearer <token>`.
    pub fn bearer(token: impl AsRef<str>) -> Self {
        Self::new("Authorization", format!("Bearer {}", token.as_ref()))
    }

    /// `Authorization: Basic <base64(user:password)>`.
    pub fn basic(username: impl AsRef<str>, password: Option<&str>) -> Self {
        let credentials = match password {
            Some(password) => format!("{}:{}", username.as_ref(), password),
            None => format!("{}:", username.as_ref()),
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        Self::new("Authorization", format!("Basic {encoded}"))
    }

    /// An API key carried in a custom header.
    pub fn api_key(header: impl Into<String>, key: impl Into<String>) -> Self {
        Self::new(header, key)
    }

    /// The header name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The header value.
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signature")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Immutable translator configuration: base URL, default headers and the
/// current signature.
#[derive(Clone, Debug)]
pub struct Environment {
    base_url: Url,
    default_headers: http::HeaderMap,
    signature: Option<Signature>,
}

impl Environment {
    /// Create an environment for a base URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))?;
        Ok(Self {
            base_url,
            default_headers: http::HeaderMap::new(),
            signature: None,
        })
    }

    /// The base URL that endpoint paths are appended to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Headers sent with every request.
    pub fn default_headers(&self) -> &http::HeaderMap {
        &self.default_headers
    }

    /// The signature applied to every request, if any.
    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    pub(crate) fn with_default_headers(mut self, headers: http::HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    pub(crate) fn with_signature(&self, signature: Option<Signature>) -> Self {
        Self {
            base_url: self.base_url.clone(),
            default_headers: self.default_headers.clone(),
            signature,
        }
    }

    pub(crate) fn with_base_url(&self, base_url: Url) -> Self {
        Self {
            base_url,
            default_headers: self.default_headers.clone(),
            signature: self.signature.clone(),
        }
    }
}

/// Holder of the current [`Environment`] snapshot.
///
/// Readers clone the `Arc`; writers replace it. The lock is held only for the
/// pointer swap, never across a read-modify-write of the environment itself.
#[derive(Debug)]
pub(crate) struct EnvironmentStore {
    current: RwLock<Arc<Environment>>,
}

impl EnvironmentStore {
    pub(crate) fn new(environment: Environment) -> Self {
        Self {
            current: RwLock::new(Arc::new(environment)),
        }
    }

    /// Snapshot of the current environment.
    pub(crate) fn current(&self) -> Arc<Environment> {
        self.current.read().clone()
    }

    /// Replace the signature for subsequently started invocations.
    pub(crate) fn replace_signature(&self, signature: Option<Signature>) {
        let mut current = self.current.write();
        let next = Arc::new(current.with_signature(signature));
        tracing::debug!(
            target: targets::SIGNATURE,
            has_signature = next.signature.is_some(),
            "environment replaced"
        );
        *current = next;
    }

    /// Replace the base URL for subsequently started invocations.
    pub(crate) fn replace_base_url(&self, base_url: Url) {
        let mut current = self.current.write();
        let next = Arc::new(current.with_base_url(base_url));
        *current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_signature() {
        let signature = Signature::bearer("abc123");
        assert_eq!(signature.name(), "Authorization");
        assert_eq!(signature.value(), "Bearer abc123");
    }

    #[test]
    fn test_basic_signature() {
        let signature = Signature::basic("user", Some("pass"));
        assert_eq!(signature.value(), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_debug_redacts_value() {
        let debug = format!("{:?}", Signature::bearer("secret-token"));
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let env = Environment::new("https://api.example.com/v1/").unwrap();
        assert_eq!(env.base_url().as_str(), "https://api.example.com/v1");
    }

    #[test]
    fn test_snapshot_is_not_mutated_by_replace() {
        let store = EnvironmentStore::new(Environment::new("https://api.example.com").unwrap());
        store.replace_signature(Some(Signature::bearer("first")));
        let captured = store.current();

        store.replace_signature(Some(Signature::bearer("second")));

        assert_eq!(captured.signature().unwrap().value(), "Bearer first");
        assert_eq!(
            store.current().signature().unwrap().value(),
            "Bearer second"
        );

        store.replace_signature(None);
        assert!(store.current().signature().is_none());
        assert!(captured.signature().is_some());
    }
}
