//! HTTP plumbing shared by the built-in adapters.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use sourcerouter_shared::RouterError;

use crate::error::{AdapterError, AdapterResult};

/// User-Agent string for upstream requests (GitHub rejects requests without one).
const USER_AGENT: &str = concat!("SourceRouter/", env!("CARGO_PKG_VERSION"));

/// Longest upstream error body quoted back in an error message.
const MAX_ERROR_BODY: usize = 200;

/// Build a reqwest client with the per-adapter timeout.
pub(crate) fn build_client(timeout: Duration) -> Result<Client, RouterError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(5))
        .timeout(timeout)
        .build()
        .map_err(|e| RouterError::Network(format!("failed to build HTTP client: {e}")))
}

/// Turn a non-2xx response into a hard error quoting the start of the body.
pub(crate) async fn ensure_success(response: Response, what: &str) -> AdapterResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
    Err(AdapterError::hard(format!("{what}: HTTP {status}: {snippet}")))
}

/// Check the status and decode a JSON body.
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response, what: &str) -> AdapterResult<T> {
    let response = ensure_success(response, what).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| AdapterError::from(RouterError::parse(format!("{what}: {e}"))))
}
