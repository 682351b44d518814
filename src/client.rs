//! HTTP clients used by each coordinator to reach its peer.

use std::{fmt, future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::{header::CONTENT_TYPE, ClientBuilder};
use thiserror::Error;

use crate::{common::EvaluationId, request::EVALUATION_ID_HEADER};

/// Error returned when a peer could not be reached or refused a payload.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("the request timed out")]
    Timeout,
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),
    #[error("the peer answered with status {0}")]
    Rejected(u16),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(e)
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
/// The evaluator, as seen by the model developer.
pub trait EvaluatorApi: Send + Sync + 'static {
    /// Hands an encrypted evaluation request over to the evaluator.
    async fn send_model(&self, id: EvaluationId, payload: Vec<u8>) -> Result<(), TransportError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
/// The model developer, as seen by the evaluator.
pub trait DeveloperApi: Send + Sync + 'static {
    /// Delivers encrypted evaluation results to the model developer.
    async fn send_results(&self, id: EvaluationId, payload: Vec<u8>)
        -> Result<(), TransportError>;
}

#[derive(Debug, Clone)]
/// A client that posts sealed payloads to the peer's API via HTTP(S).
pub struct HttpClient {
    /// HTTP client
    client: reqwest::Client,
    /// Peer URL
    address: Arc<String>,
}

impl HttpClient {
    /// Creates a new HTTP(S) client. Every request fails with [`TransportError::Timeout`] after
    /// `timeout`.
    pub fn new<S>(address: S, timeout: Duration) -> Result<Self, TransportError>
    where
        S: Into<String>,
    {
        let address = address.into().trim_end_matches('/').to_string();
        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(TransportError::Http)?;
        Ok(Self {
            client,
            address: Arc::new(address),
        })
    }

    async fn post(
        &self,
        path: &str,
        id: EvaluationId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let url = format!("{}/{}", self.address, path);
        let resp = self
            .client
            .post(&url)
            .header(EVALUATION_ID_HEADER, id.to_string())
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Rejected(resp.status().as_u16()))
        }
    }
}

#[async_trait]
impl EvaluatorApi for HttpClient {
    async fn send_model(&self, id: EvaluationId, payload: Vec<u8>) -> Result<(), TransportError> {
        self.post("receive_model", id, payload).await
    }
}

#[async_trait]
impl DeveloperApi for HttpClient {
    async fn send_results(
        &self,
        id: EvaluationId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.post("receive_results", id, payload).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How often a failed request is repeated.
pub struct RetryPolicy {
    /// The number of retries after the first attempt.
    pub retries: u32,
    /// The pause before the first retry. It grows linearly with every further retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 0,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Runs `request` until it succeeds or the retries of `policy` are used up.
pub async fn with_retries<F, Fut, T, E>(policy: RetryPolicy, mut request: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut attempt = 0;
    loop {
        match request().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.retries => {
                attempt += 1;
                warn!(
                    "attempt failed: {}, retrying ({}/{})",
                    e, attempt, policy.retries
                );
                tokio::time::sleep(policy.backoff * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}
