//! The pipeline orchestrator: [`ApiClient`] and its builder.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use url::Url;

use crate::config::ClientConfig;
use crate::context::{DirectContext, NotificationContext};
use crate::descriptor::{Endpoint, RequestDescriptor};
use crate::error::{ApiError, Result};
use crate::logging::targets;
use crate::multipart::{FilePrimitives, MultipartEncoder, MultipartParameter, StdFilePrimitives};
use crate::pending::{InvocationControl, PendingRequest};
use crate::pipeline;
use crate::signature::{Environment, EnvironmentStore, Signature};
use crate::transport::{NetworkFetcher, ReqwestFetcher, TransportResponse};
use crate::translator::{RequestTranslator, RestTranslator};
use crate::validation::{
    ObserverGuard, ObserverId, ObserverRegistry, ResponseValidator, UnauthorizedObserver,
};
use crate::worker::{QueueConfig, SerialQueue};

/// Builder for creating an [`ApiClient`].
///
/// Every collaborator is optional; missing ones default to the REST
/// translator, a reqwest fetcher built from the config, `std::fs` file
/// primitives, inline notification delivery, a dedicated worker queue and
/// the ambient tokio runtime.
pub struct ApiClientBuilder {
    config: ClientConfig,
    default_headers: Vec<(String, String)>,
    signature: Option<Signature>,
    translator: Option<Arc<dyn RequestTranslator>>,
    fetcher: Option<Arc<dyn NetworkFetcher>>,
    file_primitives: Option<Arc<dyn FilePrimitives>>,
    context: Option<Arc<dyn NotificationContext>>,
    queue: Option<Arc<SerialQueue>>,
    runtime: Option<Handle>,
}

impl ApiClientBuilder {
    /// Create a builder for a base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_config(ClientConfig::new(base_url))
    }

    /// Create a builder from a full configuration.
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            default_headers: Vec::new(),
            signature: None,
            translator: None,
            fetcher: None,
            file_primitives: None,
            context: None,
            queue: None,
            runtime: None,
        }
    }

    /// Set the request timeout of the default fetcher.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Set the user agent of the default fetcher.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Set the directory for encoded multipart bodies.
    pub fn scratch_dir(mut self, dir: impl Into<std::path::PathBuf>) -> Self {
        self.config.scratch_dir = Some(dir.into());
        self
    }

    /// Add a header sent with every request.
    ///
    /// Invalid names or values make [`ApiClientBuilder::build`] fail.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    /// Set `Accept: application/json` on every request.
    pub fn accept_json(self) -> Self {
        self.default_header("Accept", "application/json")
    }

    /// Set the initial signature.
    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Set an initial `Authorization: Bearer <token>` signature.
    pub fn bearer_token(self, token: impl AsRef<str>) -> Self {
        self.signature(Signature::bearer(token))
    }

    /// Use a custom request translator.
    pub fn translator(mut self, translator: impl RequestTranslator + 'static) -> Self {
        self.translator = Some(Arc::new(translator));
        self
    }

    /// Use a custom network fetcher.
    pub fn fetcher(mut self, fetcher: impl NetworkFetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Use custom file primitives for multipart artifacts.
    pub fn file_primitives(mut self, primitives: impl FilePrimitives + 'static) -> Self {
        self.file_primitives = Some(Arc::new(primitives));
        self
    }

    /// Deliver unauthorized notifications on `context`.
    pub fn notification_context(mut self, context: impl NotificationContext + 'static) -> Self {
        self.context = Some(Arc::new(context));
        self
    }

    /// Run translation and encoding on an existing queue.
    pub fn worker_queue(mut self, queue: Arc<SerialQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Spawn pipeline tasks on `runtime`.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<ApiClient> {
        let mut headers = http::HeaderMap::new();
        for (name, value) in &self.default_headers {
            let name = http::HeaderName::try_from(name.as_str())?;
            let value = http::HeaderValue::try_from(value.as_str())?;
            headers.insert(name, value);
        }
        let environment = Environment::new(&self.config.base_url)?
            .with_default_headers(headers)
            .with_signature(self.signature);

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .map_err(|e| ApiError::WorkerUnavailable(format!("no tokio runtime: {e}")))?,
        };

        let fetcher: Arc<dyn NetworkFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(ReqwestFetcher::builder(self.config.clone()).build()?),
        };

        let queue = match self.queue {
            Some(queue) => queue,
            None => Arc::new(SerialQueue::with_config(QueueConfig {
                name: self.config.worker_name.clone(),
                stack_size: None,
                queue_capacity: self.config.queue_capacity,
            })?),
        };

        let file_primitives = self
            .file_primitives
            .unwrap_or_else(|| Arc::new(StdFilePrimitives));
        let context = self.context.unwrap_or_else(|| Arc::new(DirectContext));
        let observers = Arc::new(ObserverRegistry::new());

        tracing::debug!(
            target: targets::API,
            base_url = %environment.base_url(),
            worker = queue.name(),
            "api client created"
        );

        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                environment: EnvironmentStore::new(environment),
                translator: self.translator.unwrap_or_else(|| Arc::new(RestTranslator)),
                fetcher,
                encoder: MultipartEncoder::new(self.config.resolved_scratch_dir(), file_primitives),
                queue,
                validator: ResponseValidator::new(observers.clone(), context),
                observers,
                runtime,
            }),
        })
    }
}

pub(crate) struct ClientInner {
    pub(crate) environment: EnvironmentStore,
    pub(crate) translator: Arc<dyn RequestTranslator>,
    pub(crate) fetcher: Arc<dyn NetworkFetcher>,
    pub(crate) encoder: MultipartEncoder,
    pub(crate) queue: Arc<SerialQueue>,
    pub(crate) validator: ResponseValidator,
    pub(crate) observers: Arc<ObserverRegistry>,
    pub(crate) runtime: Handle,
}

/// An asynchronous API client.
///
/// Each entry point spawns one pipeline invocation and returns a
/// [`PendingRequest`] for it. The client is cheap to clone; clones share the
/// signature store, worker queue and observers.
///
/// # Example
///
/// ```no_run
/// use horizon_lattice_api::{ApiClient, Endpoint, RequestDescriptor};
///
/// #[derive(serde::Deserialize)]
/// struct Items {
///     items: Vec<String>,
/// }
///
/// # async fn demo() -> horizon_lattice_api::Result<()> {
/// let client = ApiClient::builder("https://api.example.com")
///     .bearer_token("secret")
///     .build()?;
///
/// let items: Items = client.get("/items").await?;
/// println!("{} items", items.items.len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ApiClient {
    pub(crate) inner: Arc<ClientInner>,
}

impl ApiClient {
    /// Create a client for a base URL with default collaborators.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        ApiClientBuilder::new(base_url).build()
    }

    /// Create a builder.
    pub fn builder(base_url: impl Into<String>) -> ApiClientBuilder {
        ApiClientBuilder::new(base_url)
    }

    /// Translate and transfer without validating or decoding.
    ///
    /// Non-`2xx` responses resolve successfully; inspect
    /// [`TransportResponse::status`] yourself.
    pub fn fetch_raw(&self, endpoint: Endpoint) -> PendingRequest<TransportResponse> {
        let control = InvocationControl::new();
        let environment = self.inner.environment.current();
        let task = pipeline::fetch_raw(self.clone(), environment, endpoint, control.clone());
        PendingRequest::new(control, self.inner.runtime.spawn(task))
    }

    /// Translate, transfer, validate and decode.
    pub fn execute<T>(&self, descriptor: RequestDescriptor<T>) -> PendingRequest<T>
    where
        T: Send + 'static,
    {
        let control = InvocationControl::new();
        let environment = self.inner.environment.current();
        let task = pipeline::execute(self.clone(), environment, descriptor, control.clone());
        PendingRequest::new(control, self.inner.runtime.spawn(task))
    }

    /// Encode `parts` into a temp file, upload it, then validate and decode.
    ///
    /// The temp file is removed once the upload resolves, whatever the outcome.
    pub fn upload<T>(
        &self,
        descriptor: RequestDescriptor<T>,
        parts: Vec<MultipartParameter>,
    ) -> PendingRequest<T>
    where
        T: Send + 'static,
    {
        let control = InvocationControl::new();
        let environment = self.inner.environment.current();
        let task = pipeline::upload(self.clone(), environment, descriptor, parts, control.clone());
        PendingRequest::new(control, self.inner.runtime.spawn(task))
    }

    /// `GET` a path and decode the JSON body.
    pub fn get<T>(&self, path: impl Into<String>) -> PendingRequest<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.execute(RequestDescriptor::new(Endpoint::get(path)))
    }

    /// Replace the signature for invocations started from now on.
    pub fn set_signature(&self, signature: Signature) {
        self.inner.environment.replace_signature(Some(signature));
    }

    /// Replace the signature with `Authorization: Bearer <token>`.
    pub fn add_token_signature(&self, token: impl AsRef<str>) {
        self.set_signature(Signature::bearer(token));
    }

    /// Remove the signature for invocations started from now on.
    pub fn clear_signature(&self) {
        self.inner.environment.replace_signature(None);
    }

    /// The current signature.
    pub fn signature(&self) -> Option<Signature> {
        self.inner.environment.current().signature().cloned()
    }

    /// Snapshot of the current environment.
    pub fn current_environment(&self) -> Arc<Environment> {
        self.inner.environment.current()
    }

    /// Replace the base URL for invocations started from now on.
    pub fn set_base_url(&self, base_url: &str) -> Result<()> {
        let url = Url::parse(base_url.trim_end_matches('/'))?;
        self.inner.environment.replace_base_url(url);
        Ok(())
    }

    /// Register a weakly held observer for `401` responses.
    ///
    /// The registration lapses when the last `Arc` to the observer is dropped.
    pub fn register_observer<O>(&self, observer: &Arc<O>) -> ObserverId
    where
        O: UnauthorizedObserver + 'static,
    {
        let weak = Arc::downgrade(observer);
        let weak: Weak<dyn UnauthorizedObserver> = weak;
        self.inner.observers.register(weak)
    }

    /// Remove an observer registration.
    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.inner.observers.unregister(id)
    }

    /// Register a closure for `401` responses, kept alive by the returned guard.
    pub fn on_unauthorized<F>(&self, callback: F) -> ObserverGuard
    where
        F: Fn(&Url, &ApiClient) + Send + Sync + 'static,
    {
        ObserverGuard::new(&self.inner.observers, callback)
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.live_count()
    }

    /// The worker queue running translation and encoding.
    pub fn worker_queue(&self) -> &Arc<SerialQueue> {
        &self.inner.queue
    }

    /// The directory encoded multipart bodies are written to.
    pub fn scratch_dir(&self) -> &Path {
        self.inner.encoder.scratch_dir()
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let environment = self.inner.environment.current();
        f.debug_struct("ApiClient")
            .field("base_url", &environment.base_url().as_str())
            .field("has_signature", &environment.signature().is_some())
            .field("worker", &self.inner.queue.name())
            .finish()
    }
}
