//! Request descriptors and endpoint values.
//!
//! A [`RequestDescriptor`] is the immutable description a caller hands to the
//! client for a single pipeline invocation: which [`Endpoint`] to hit, how to
//! decode the body, and an optional extra response check.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::decoder::{Decoder, JsonDecoder};
use crate::error::Result;
use crate::logging::targets;
use crate::transport::TransportResponse;

/// HTTP request methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// HTTP GET method.
    Get,
    /// HTTP POST method.
    Post,
    /// HTTP PUT method.
    Put,
    /// HTTP DELETE method.
    Delete,
    /// HTTP PATCH method.
    Patch,
    /// HTTP HEAD method.
    Head,
    /// HTTP OPTIONS method.
    Options,
}

impl HttpMethod {
    /// Convert to the `http` crate method.
    pub fn to_http(self) -> http::Method {
        match self {
            Self::Get => http::Method::GET,
            Self::Post => http::Method::POST,
            Self::Put => http::Method::PUT,
            Self::Delete => http::Method::DELETE,
            Self::Patch => http::Method::PATCH,
            Self::Head => http::Method::HEAD,
            Self::Options => http::Method::OPTIONS,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
            Self::Patch => write!(f, "PATCH"),
            Self::Head => write!(f, "HEAD"),
            Self::Options => write!(f, "OPTIONS"),
        }
    }
}

/// The body of an endpoint.
#[derive(Clone, Debug, Default)]
pub enum RequestBody {
    /// No body.
    #[default]
    None,
    /// Plain text body.
    Text(String),
    /// JSON body (serialized from a value).
    Json(serde_json::Value),
    /// URL-encoded form data, in insertion order.
    Form(Vec<(String, String)>),
    /// Raw binary body.
    Bytes(Bytes),
}

/// An API endpoint: method, path relative to the environment's base URL,
/// query parameters, extra headers and body.
///
/// # Example
///
/// ```
/// use horizon_lattice_api::{Endpoint, HttpMethod};
///
/// let endpoint = Endpoint::get("/items")
///     .query("page", "2")
///     .header("Accept", "application/json");
///
/// assert_eq!(endpoint.method(), HttpMethod::Get);
/// assert_eq!(endpoint.path(), "/items");
/// ```
#[derive(Clone, Debug)]
pub struct Endpoint {
    method: HttpMethod,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: RequestBody,
    timeout: Option<Duration>,
    // Serialization failures are reported by the translator, not here.
    body_error: Option<String>,
}

impl Endpoint {
    /// Create an endpoint with an explicit method.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: RequestBody::None,
            timeout: None,
            body_error: None,
        }
    }

    /// Create a GET endpoint.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    /// Create a POST endpoint.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    /// Create a PUT endpoint.
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    /// Create a DELETE endpoint.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    /// Create a PATCH endpoint.
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add multiple query parameters.
    pub fn query_pairs(mut self, pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query.extend(pairs);
        self
    }

    /// Add a header. Validation happens during translation.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a plain text body.
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = RequestBody::Text(body.into());
        self
    }

    /// Set a JSON body from a serializable value.
    pub fn json<T: Serialize>(mut self, body: &T) -> Self {
        match serde_json::to_value(body) {
            Ok(value) => {
                self.body = RequestBody::Json(value);
                self.body_error = None;
            }
            Err(e) => {
                tracing::debug!(target: targets::PIPELINE, "Failed to serialize JSON body: {}", e);
                self.body_error = Some(e.to_string());
            }
        }
        self
    }

    /// Set a URL-encoded form body.
    pub fn form(mut self, data: impl IntoIterator<Item = (String, String)>) -> Self {
        self.body = RequestBody::Form(data.into_iter().collect());
        self
    }

    /// Set a raw binary body.
    pub fn bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = RequestBody::Bytes(body.into());
        self
    }

    /// Set a timeout for this endpoint, overriding the fetcher's default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The HTTP method.
    pub fn method(&self) -> HttpMethod {
        self.method
    }

    /// The path relative to the base URL.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Query parameters in insertion order.
    pub fn query_params(&self) -> &[(String, String)] {
        &self.query
    }

    /// Extra headers in insertion order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The body.
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// The per-endpoint timeout, if any.
    pub fn timeout_override(&self) -> Option<Duration> {
        self.timeout
    }

    /// The JSON serialization error recorded by [`Endpoint::json`], if any.
    pub fn body_error(&self) -> Option<&str> {
        self.body_error.as_deref()
    }
}

/// Extra response check attached to a descriptor.
///
/// Runs after status validation, only on `2xx` responses.
pub type ResponseCheck = Arc<dyn Fn(TransportResponse) -> Result<TransportResponse> + Send + Sync>;

/// Immutable description of one pipeline invocation producing a `T`.
pub struct RequestDescriptor<T> {
    endpoint: Endpoint,
    decoder: Arc<dyn Decoder<T>>,
    validator: Option<ResponseCheck>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned + 'static> RequestDescriptor<T> {
    /// Describe a request whose body decodes from JSON.
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_decoder(endpoint, JsonDecoder)
    }
}

impl<T> RequestDescriptor<T> {
    /// Describe a request with a custom decoder.
    pub fn with_decoder(endpoint: Endpoint, decoder: impl Decoder<T> + 'static) -> Self {
        Self {
            endpoint,
            decoder: Arc::new(decoder),
            validator: None,
            _marker: PhantomData,
        }
    }

    /// Attach an extra response check.
    pub fn validator<F>(mut self, check: F) -> Self
    where
        F: Fn(TransportResponse) -> Result<TransportResponse> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(check));
        self
    }

    /// The endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The decoder.
    pub fn decoder(&self) -> &Arc<dyn Decoder<T>> {
        &self.decoder
    }

    /// The extra response check, if any.
    pub fn response_check(&self) -> Option<&ResponseCheck> {
        self.validator.as_ref()
    }

    pub(crate) fn into_parts(self) -> (Endpoint, Arc<dyn Decoder<T>>, Option<ResponseCheck>) {
        (self.endpoint, self.decoder, self.validator)
    }
}

impl<T> fmt::Debug for RequestDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("endpoint", &self.endpoint)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}
