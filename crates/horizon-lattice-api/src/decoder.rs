//! Decoder stage.
//!
//! The pipeline hands validated body bytes to a [`Decoder`] and wraps any
//! failure as [`ApiError::MalformedJsonResponse`], keeping the decoder's own
//! error as the source.

use serde::de::DeserializeOwned;

use crate::error::{ApiError, BoxError, Result};

/// Turns response bytes into a value of type `T`.
pub trait Decoder<T>: Send + Sync {
    /// Decode the body.
    fn decode(&self, data: &[u8]) -> std::result::Result<T, BoxError>;
}

/// JSON decoder backed by `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonDecoder;

impl<T: DeserializeOwned> Decoder<T> for JsonDecoder {
    fn decode(&self, data: &[u8]) -> std::result::Result<T, BoxError> {
        serde_json::from_slice(data).map_err(Into::into)
    }
}

impl<T, F> Decoder<T> for F
where
    F: Fn(&[u8]) -> std::result::Result<T, BoxError> + Send + Sync,
{
    fn decode(&self, data: &[u8]) -> std::result::Result<T, BoxError> {
        self(data)
    }
}

/// Run the decoder stage.
pub(crate) fn decode_body<T>(decoder: &dyn Decoder<T>, data: &[u8]) -> Result<T> {
    decoder
        .decode(data)
        .map_err(ApiError::MalformedJsonResponse)
}
