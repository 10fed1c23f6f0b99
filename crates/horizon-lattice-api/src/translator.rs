//! Request translation: endpoint + environment into a transport request.
//!
//! Translation is synchronous and deterministic. It runs on the client's
//! worker queue and fails before any network I/O when the endpoint cannot be
//! resolved.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use url::Url;

use crate::descriptor::{Endpoint, RequestBody};
use crate::error::{ApiError, Result};
use crate::signature::Environment;
use crate::transport::TransportRequest;

/// Converts an [`Endpoint`] into a [`TransportRequest`] under an [`Environment`].
///
/// The environment carries the signature captured when the invocation
/// started; implementations must apply it to the produced request.
pub trait RequestTranslator: Send + Sync {
    /// Translate an endpoint.
    fn translate(&self, endpoint: &Endpoint, environment: &Environment) -> Result<TransportRequest>;
}

/// Default translator for REST-style endpoints.
///
/// Resolves the endpoint path against the base URL, appends query pairs and
/// applies headers in order: environment defaults, endpoint headers, then the
/// signature, so the signature always wins.
#[derive(Clone, Copy, Debug, Default)]
pub struct RestTranslator;

impl RestTranslator {
    fn resolve_url(endpoint: &Endpoint, environment: &Environment) -> Result<Url> {
        let path = endpoint.path();
        let mut url = if path.starts_with("http://") || path.starts_with("https://") {
            Url::parse(path)?
        } else {
            let path = if path.starts_with('/') || path.is_empty() {
                path.to_string()
            } else {
                format!("/{}", path)
            };
            let base = environment.base_url().as_str().trim_end_matches('/');
            Url::parse(&format!("{}{}", base, path))?
        };

        if url.cannot_be_a_base() {
            return Err(ApiError::MalformedUrl(format!(
                "'{url}' cannot carry a path"
            )));
        }

        if !endpoint.query_params().is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in endpoint.query_params() {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn encode_body(endpoint: &Endpoint) -> Result<(Option<Bytes>, Option<&'static str>)> {
        if let Some(err) = endpoint.body_error() {
            return Err(ApiError::MalformedParameters(format!(
                "body could not be serialized: {err}"
            )));
        }

        Ok(match endpoint.body() {
            RequestBody::None => (None, None),
            RequestBody::Text(text) => (
                Some(Bytes::from(text.clone())),
                Some("text/plain; charset=utf-8"),
            ),
            RequestBody::Json(value) => {
                let encoded = serde_json::to_vec(value)
                    .map_err(|e| ApiError::MalformedParameters(e.to_string()))?;
                (Some(Bytes::from(encoded)), Some("application/json"))
            }
            RequestBody::Form(data) => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(data.iter())
                    .finish();
                (
                    Some(Bytes::from(encoded)),
                    Some("application/x-www-form-urlencoded"),
                )
            }
            RequestBody::Bytes(bytes) => (Some(bytes.clone()), None),
        })
    }
}

impl RequestTranslator for RestTranslator {
    fn translate(&self, endpoint: &Endpoint, environment: &Environment) -> Result<TransportRequest> {
        let url = Self::resolve_url(endpoint, environment)?;
        let (body, content_type) = Self::encode_body(endpoint)?;

        let mut headers = environment.default_headers().clone();
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        for (name, value) in endpoint.headers() {
            let name = HeaderName::try_from(name.as_str())?;
            let value = HeaderValue::try_from(value.as_str())?;
            headers.insert(name, value);
        }
        if let Some(signature) = environment.signature() {
            let name = HeaderName::try_from(signature.name())?;
            let mut value = HeaderValue::try_from(signature.value())?;
            value.set_sensitive(true);
            headers.insert(name, value);
        }

        Ok(TransportRequest {
            method: endpoint.method(),
            url,
            headers,
            body,
            timeout: endpoint.timeout_override(),
        })
    }
}
