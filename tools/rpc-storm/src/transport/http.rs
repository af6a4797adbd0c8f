use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use tracing::trace;

use crate::transport::{Transport, TransportError};

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON over HTTP POST, backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// `max_idle` is usually the worker count so each worker can keep a
    /// connection warm.
    pub fn new(max_idle: usize) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(max_idle)
            .build()
            .map_err(|err| TransportError::Request(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        url: &str,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        let resp = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|err| classify(err, timeout))?;

        // the body is returned for every status: nodes commonly send JSON-RPC
        // error objects with 4xx/5xx codes
        let status = resp.status();
        trace!(%status, "response headers received");
        resp.bytes()
            .await
            .map_err(|err| match classify(err, timeout) {
                TransportError::Request(msg) => TransportError::Body(msg),
                other => other,
            })
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}
