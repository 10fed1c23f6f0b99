//! Stage composition for the three entry points.
//!
//! ```text
//! fetch_raw: translate -> transfer
//! execute:   translate -> transfer -> validate -> decode
//! upload:    translate -> encode -> transfer(upload) -> cleanup -> validate -> decode
//! ```
//!
//! Translation and encoding hop onto the client's [`SerialQueue`](crate::SerialQueue);
//! transfers run on the fetcher's own scheduling. Each stage starts only
//! after the previous one resolved and after the invocation's control has
//! accepted the transition.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use url::Url;

use crate::client::ApiClient;
use crate::decoder::{Decoder, decode_body};
use crate::descriptor::{Endpoint, RequestDescriptor, ResponseCheck};
use crate::error::{ApiError, Result};
use crate::logging::targets;
use crate::multipart::{EncodedUploadArtifact, MultipartParameter};
use crate::pending::{InvocationControl, PipelineState};
use crate::signature::Environment;
use crate::transport::{TransportRequest, TransportResponse};

/// Translate on the worker queue using the captured environment.
async fn translate(
    client: &ApiClient,
    environment: Arc<Environment>,
    endpoint: Endpoint,
    control: &InvocationControl,
) -> Result<TransportRequest> {
    control.enter(PipelineState::Translating)?;
    let translator = client.inner.translator.clone();
    client
        .inner
        .queue
        .run(control.token(), move || {
            translator.translate(&endpoint, &environment)
        })
        .await
}

/// Race the fetcher against cancellation. Dropping the losing fetch future
/// aborts the call in flight.
async fn transfer(
    control: &InvocationControl,
    fetch: BoxFuture<'static, Result<TransportResponse>>,
) -> Result<TransportResponse> {
    let response = tokio::select! {
        biased;
        _ = control.token().cancelled() => {
            tracing::debug!(target: targets::PIPELINE, id = %control.id(), "transfer aborted");
            return Err(ApiError::RequestCanceled);
        }
        response = fetch => response?,
    };

    if !(100..600).contains(&response.status) {
        return Err(ApiError::MalformedResponse);
    }
    Ok(response)
}

fn validate_and_decode<T>(
    client: &ApiClient,
    control: &InvocationControl,
    response: TransportResponse,
    request_url: &Url,
    check: Option<ResponseCheck>,
    decoder: &dyn Decoder<T>,
) -> Result<T> {
    control.enter(PipelineState::Validating)?;
    let response = client
        .inner
        .validator
        .validate(response, request_url, client)?;
    let response = match check {
        Some(check) => check(response)?,
        None => response,
    };

    control.enter(PipelineState::Decoding)?;
    decode_body(decoder, &response.data)
}

fn log_outcome<T>(control: &InvocationControl, result: &Result<T>) {
    match result {
        Ok(_) => tracing::debug!(target: targets::PIPELINE, id = %control.id(), "invocation completed"),
        Err(e) => tracing::debug!(
            target: targets::PIPELINE,
            id = %control.id(),
            category = ?e.category(),
            error = %e,
            "invocation failed"
        ),
    }
}

#[tracing::instrument(
    skip_all,
    target = "horizon_lattice_api::pipeline",
    level = "debug",
    fields(id = %control.id(), path = endpoint.path())
)]
pub(crate) async fn fetch_raw(
    client: ApiClient,
    environment: Arc<Environment>,
    endpoint: Endpoint,
    control: Arc<InvocationControl>,
) -> Result<TransportResponse> {
    let result: Result<TransportResponse> = async {
        let request = translate(&client, environment, endpoint, &control).await?;
        control.enter(PipelineState::Transferring)?;
        transfer(&control, client.inner.fetcher.fetch_data(request)).await
    }
    .await;

    let result = control.settle(result);
    log_outcome(&control, &result);
    result
}

#[tracing::instrument(
    skip_all,
    target = "horizon_lattice_api::pipeline",
    level = "debug",
    fields(id = %control.id(), path = descriptor.endpoint().path())
)]
pub(crate) async fn execute<T>(
    client: ApiClient,
    environment: Arc<Environment>,
    descriptor: RequestDescriptor<T>,
    control: Arc<InvocationControl>,
) -> Result<T> {
    let (endpoint, decoder, check) = descriptor.into_parts();

    let result: Result<T> = async {
        let request = translate(&client, environment, endpoint, &control).await?;
        let request_url = request.url.clone();

        control.enter(PipelineState::Transferring)?;
        let response = transfer(&control, client.inner.fetcher.fetch_data(request)).await?;

        validate_and_decode(&client, &control, response, &request_url, check, decoder.as_ref())
    }
    .await;

    let result = control.settle(result);
    log_outcome(&control, &result);
    result
}

#[tracing::instrument(
    skip_all,
    target = "horizon_lattice_api::pipeline",
    level = "debug",
    fields(id = %control.id(), path = descriptor.endpoint().path(), parts = parts.len())
)]
pub(crate) async fn upload<T>(
    client: ApiClient,
    environment: Arc<Environment>,
    descriptor: RequestDescriptor<T>,
    parts: Vec<MultipartParameter>,
    control: Arc<InvocationControl>,
) -> Result<T> {
    let (endpoint, decoder, check) = descriptor.into_parts();

    let result: Result<T> = async {
        let request = translate(&client, environment, endpoint, &control).await?;

        control.enter(PipelineState::Encoding)?;
        let encoder = client.inner.encoder.clone();
        // An artifact finished after the caller stopped waiting is dropped
        // with the unsent result, which removes its file.
        let EncodedUploadArtifact { request, temp_file } = client
            .inner
            .queue
            .run(control.token(), move || encoder.encode(&parts, request))
            .await?;
        let request_url = request.url.clone();

        let transferred = match control.enter(PipelineState::Transferring) {
            Ok(()) => {
                let file = temp_file.path().to_path_buf();
                transfer(&control, client.inner.fetcher.upload_file(request, file)).await
            }
            Err(e) => Err(e),
        };
        temp_file.cleanup();

        validate_and_decode(&client, &control, transferred?, &request_url, check, decoder.as_ref())
    }
    .await;

    let result = control.settle(result);
    log_outcome(&control, &result);
    result
}
