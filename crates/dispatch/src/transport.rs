//! Outbound HTTP to the tracking API.
//!
//! Payloads are URL-encoded. Small payloads go out as a GET query string;
//! anything larger than the configured threshold is POSTed as a form body.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use kissmetrics_core::config::TransportConfig;
use kissmetrics_core::{ForwarderError, ForwarderResult, TransportError};
use kissmetrics_mapper::{Call, Endpoint};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

/// Successful destination response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransportResponse {
    pub status: u16,
}

/// Sends one destination call. Retries, if any, happen inside `send`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, call: &Call) -> Result<TransportResponse, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
    retries: u32,
    post_threshold_bytes: usize,
    retry_backoff: Duration,
}

impl HttpTransport {
    pub fn new(config: &TransportConfig) -> ForwarderResult<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            ForwarderError::Config(format!("invalid transport endpoint '{}': {e}", config.endpoint))
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ForwarderError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            retries: config.retries,
            post_threshold_bytes: config.post_threshold_bytes,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    fn url_for(&self, endpoint: Endpoint) -> Result<Url, TransportError> {
        self.endpoint
            .join(endpoint.path())
            .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))
    }

    async fn attempt(&self, call: &Call) -> Result<TransportResponse, TransportError> {
        let mut url = self.url_for(call.endpoint)?;
        let encoded = call.payload.to_query_string();

        let request = if encoded.len() > self.post_threshold_bytes {
            debug!(path = call.endpoint.path(), bytes = encoded.len(), "payload over GET threshold, posting");
            self.client
                .post(url)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(encoded)
        } else {
            if !encoded.is_empty() {
                url.set_query(Some(&encoded));
            }
            self.client.get(url)
        };

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(TransportResponse {
                status: status.as_u16(),
            })
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(TransportError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, call: &Call) -> Result<TransportResponse, TransportError> {
        let mut attempt = 0;
        loop {
            match self.attempt(call).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt < self.retries => {
                    attempt += 1;
                    metrics::counter!("kissmetrics.retries").increment(1);
                    warn!(
                        path = call.endpoint.path(),
                        attempt,
                        error = %err,
                        "destination call failed, retrying"
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

type FailureRule = Box<dyn Fn(&Call) -> bool + Send + Sync>;

/// In-memory transport that records every call. Calls matching a failure
/// rule are answered with a 500.
#[derive(Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    failures: Vec<FailureRule>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call for which `rule` returns true.
    pub fn failing_when(mut self, rule: impl Fn(&Call) -> bool + Send + Sync + 'static) -> Self {
        self.failures.push(Box::new(rule));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn paths(&self) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|call| call.endpoint.path())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, call: &Call) -> Result<TransportResponse, TransportError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.clone());

        if self.failures.iter().any(|rule| rule(call)) {
            return Err(TransportError::Status {
                status: 500,
                body: "scripted failure".into(),
            });
        }
        Ok(TransportResponse { status: 200 })
    }
}
