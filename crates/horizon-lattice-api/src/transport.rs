//! Transfer stage: the network fetcher interface and its reqwest implementation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use reqwest::redirect::Policy;
use url::Url;

use crate::config::ClientConfig;
use crate::descriptor::HttpMethod;
use crate::error::{ApiError, Result};
use crate::logging::targets;

/// A transport-ready request produced by the translator.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    /// The HTTP method.
    pub method: HttpMethod,
    /// The fully resolved URL, query included.
    pub url: Url,
    /// Request headers, signature included.
    pub headers: http::HeaderMap,
    /// Encoded body, if any.
    pub body: Option<Bytes>,
    /// Timeout override for this request.
    pub timeout: Option<Duration>,
}

impl TransportRequest {
    /// Create a request with no headers or body.
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            headers: http::HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Get a specific header value.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }
}

/// The raw outcome of one transfer.
#[derive(Clone, Debug)]
pub struct TransportResponse {
    /// Response body.
    pub data: Bytes,
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: http::HeaderMap,
    /// Final URL after redirects, if the transport reports one.
    pub source_url: Option<Url>,
}

impl TransportResponse {
    /// Create a response with a status and body.
    pub fn new(status: u16, data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            status,
            headers: http::HeaderMap::new(),
            source_url: None,
        }
    }

    /// Check if the response indicates success (2xx status).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get a specific header value.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }
}

/// Issues requests on the wire.
///
/// Implementations report transport-level failures (connection, timeout) as
/// errors; HTTP status codes are never errors at this level. Dropping a
/// returned future must abort the call in flight.
pub trait NetworkFetcher: Send + Sync {
    /// Send a request and collect the full response.
    fn fetch_data(&self, request: TransportRequest) -> BoxFuture<'static, Result<TransportResponse>>;

    /// Send a request whose body is the contents of `file`.
    fn upload_file(
        &self,
        request: TransportRequest,
        file: PathBuf,
    ) -> BoxFuture<'static, Result<TransportResponse>>;
}

/// Builder for a [`ReqwestFetcher`].
pub struct ReqwestFetcherBuilder {
    config: ClientConfig,
}

impl ReqwestFetcherBuilder {
    /// Create a builder from client configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Disable redirect following.
    pub fn no_redirects(mut self) -> Self {
        self.config.follow_redirects = false;
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Build the fetcher.
    pub fn build(self) -> Result<ReqwestFetcher> {
        let config = &self.config;
        let mut builder = reqwest::Client::builder();

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(connect_timeout) = config.connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }

        if config.follow_redirects {
            builder = builder.redirect(Policy::limited(config.max_redirects));
        } else {
            builder = builder.redirect(Policy::none());
        }

        if config.cookies_enabled {
            builder = builder.cookie_store(true);
        }

        if let Some(ref ua) = config.user_agent {
            builder = builder.user_agent(ua);
        }

        if let Some(ref proxy_url) = config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| ApiError::MalformedUrl(format!("proxy: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder.build()?;
        Ok(ReqwestFetcher {
            client: Arc::new(client),
        })
    }
}

/// [`NetworkFetcher`] backed by a pooled `reqwest::Client`.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Arc<reqwest::Client>,
}

impl ReqwestFetcher {
    /// Create a fetcher with default configuration.
    pub fn new() -> Result<Self> {
        ReqwestFetcherBuilder::new(ClientConfig::default()).build()
    }

    /// Create a builder for a fetcher.
    pub fn builder(config: ClientConfig) -> ReqwestFetcherBuilder {
        ReqwestFetcherBuilder::new(config)
    }

    fn prepare(&self, request: &TransportRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(request.method.to_http(), request.url.clone())
            .headers(request.headers.clone());

        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }
        builder
    }
}

async fn collect(response: reqwest::Response) -> Result<TransportResponse> {
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let source_url = Some(response.url().clone());
    let data = response.bytes().await?;
    Ok(TransportResponse {
        data,
        status,
        headers,
        source_url,
    })
}

impl NetworkFetcher for ReqwestFetcher {
    fn fetch_data(&self, request: TransportRequest) -> BoxFuture<'static, Result<TransportResponse>> {
        let mut builder = self.prepare(&request);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        async move {
            tracing::debug!(
                target: targets::TRANSPORT,
                method = %request.method,
                url = %request.url,
                "sending request"
            );
            let response = builder.send().await?;
            collect(response).await
        }
        .boxed()
    }

    fn upload_file(
        &self,
        request: TransportRequest,
        file: PathBuf,
    ) -> BoxFuture<'static, Result<TransportResponse>> {
        let builder = self.prepare(&request);

        async move {
            let handle = tokio::fs::File::open(&file)
                .await
                .map_err(|e| ApiError::Unknown(format!("open {}: {e}", file.display())))?;
            let length = handle
                .metadata()
                .await
                .map_err(|e| ApiError::Unknown(format!("stat {}: {e}", file.display())))?
                .len();

            tracing::debug!(
                target: targets::TRANSPORT,
                method = %request.method,
                url = %request.url,
                bytes = length,
                "uploading file"
            );

            let response = builder
                .header(http::header::CONTENT_LENGTH, length)
                .body(reqwest::Body::from(handle))
                .send()
                .await?;
            collect(response).await
        }
        .boxed()
    }
}

impl std::fmt::Debug for ReqwestFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestFetcher").finish_non_exhaustive()
    }
}
