//! Response validation and the unauthorized notification path.
//!
//! Status validation is a hard boundary: `2xx` passes, anything else becomes
//! [`ApiError::FailureStatusCode`] with the body preserved. A `401` also
//! notifies every live [`UnauthorizedObserver`] through the client's
//! [`NotificationContext`] before the error is produced. Observers cannot
//! turn the failure into a success.
//!
//! Observers are held weakly. A registration never keeps the observer (or
//! anything it captures) alive; dead entries are pruned on the next
//! notification.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};
use url::Url;

use crate::client::ApiClient;
use crate::context::NotificationContext;
use crate::error::{ApiError, Result};
use crate::logging::targets;
use crate::transport::TransportResponse;

new_key_type! {
    /// Identifies an observer registration.
    ///
    /// Pass it to [`ApiClient::unregister_observer`] to remove the observer.
    pub struct ObserverId;
}

/// Receives `401 Unauthorized` notifications.
pub trait UnauthorizedObserver: Send + Sync {
    /// Called once per validated `401` response.
    fn on_unauthorized(&self, request_url: &Url, client: &ApiClient);
}

struct FnObserver<F>(F);

impl<F> UnauthorizedObserver for FnObserver<F>
where
    F: Fn(&Url, &ApiClient) + Send + Sync,
{
    fn on_unauthorized(&self, request_url: &Url, client: &ApiClient) {
        (self.0)(request_url, client)
    }
}

/// Registry of weakly held observers.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    observers: Mutex<SlotMap<ObserverId, Weak<dyn UnauthorizedObserver>>>,
}

impl ObserverRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, observer: Weak<dyn UnauthorizedObserver>) -> ObserverId {
        self.observers.lock().insert(observer)
    }

    pub(crate) fn unregister(&self, id: ObserverId) -> bool {
        self.observers.lock().remove(id).is_some()
    }

    /// Number of registrations whose observer is still alive.
    pub(crate) fn live_count(&self) -> usize {
        self.observers
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Upgrade every live observer, dropping dead registrations.
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn UnauthorizedObserver>> {
        let mut observers = self.observers.lock();
        let mut live = Vec::with_capacity(observers.len());
        observers.retain(|_, weak| match weak.upgrade() {
            Some(observer) => {
                live.push(observer);
                true
            }
            None => false,
        });
        live
    }
}

/// Keeps a closure observer registered. Dropping it unregisters the closure.
#[must_use = "the observer is unregistered when the guard is dropped"]
pub struct ObserverGuard {
    registry: Weak<ObserverRegistry>,
    id: ObserverId,
    _observer: Arc<dyn UnauthorizedObserver>,
}

impl ObserverGuard {
    pub(crate) fn new<F>(registry: &Arc<ObserverRegistry>, callback: F) -> Self
    where
        F: Fn(&Url, &ApiClient) + Send + Sync + 'static,
    {
        let observer: Arc<dyn UnauthorizedObserver> = Arc::new(FnObserver(callback));
        let id = registry.register(Arc::downgrade(&observer));
        Self {
            registry: Arc::downgrade(registry),
            id,
            _observer: observer,
        }
    }

    /// The registration id.
    pub fn id(&self) -> ObserverId {
        self.id
    }
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }
}

impl std::fmt::Debug for ObserverGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverGuard").field("id", &self.id).finish()
    }
}

/// Classifies responses and fires the unauthorized notification.
#[derive(Clone)]
pub(crate) struct ResponseValidator {
    observers: Arc<ObserverRegistry>,
    context: Arc<dyn NotificationContext>,
}

impl ResponseValidator {
    pub(crate) fn new(
        observers: Arc<ObserverRegistry>,
        context: Arc<dyn NotificationContext>,
    ) -> Self {
        Self { observers, context }
    }

    /// Validate the status of `response`.
    ///
    /// `request_url` is what observers receive for a `401`.
    #[tracing::instrument(
        skip_all,
        target = "horizon_lattice_api::validation",
        level = "trace",
        fields(status = response.status)
    )]
    pub(crate) fn validate(
        &self,
        response: TransportResponse,
        request_url: &Url,
        client: &ApiClient,
    ) -> Result<TransportResponse> {
        if response.is_success() {
            return Ok(response);
        }

        if response.status == 401 {
            self.notify_unauthorized(request_url, client);
        }

        tracing::debug!(
            target: targets::VALIDATION,
            status = response.status,
            url = %request_url,
            "failure status code"
        );
        Err(ApiError::FailureStatusCode {
            status: response.status,
            body: response.data,
        })
    }

    fn notify_unauthorized(&self, request_url: &Url, client: &ApiClient) {
        let observers = self.observers.snapshot();
        if observers.is_empty() {
            return;
        }

        tracing::info!(
            target: targets::VALIDATION,
            url = %request_url,
            observers = observers.len(),
            "notifying unauthorized observers"
        );

        // A queued notification must not keep the client alive.
        let url = request_url.clone();
        let client = Arc::downgrade(&client.inner);
        self.context.dispatch(Box::new(move || {
            let Some(inner) = client.upgrade() else {
                tracing::debug!(
                    target: targets::VALIDATION,
                    url = %url,
                    "client dropped before unauthorized notification"
                );
                return;
            };
            let client = ApiClient { inner };
            for observer in &observers {
                observer.on_unauthorized(&url, &client);
            }
        }));
    }
}
