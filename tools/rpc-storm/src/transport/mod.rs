use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod http;

pub use http::HttpTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("timed out waiting for response after {0:?}")]
    Timeout(Duration),
    #[error("request failed: {0}")]
    Request(String),
    #[error("failed to read response body: {0}")]
    Body(String),
}

/// Sends one framed request and returns the raw response body.
///
/// Implementations own connection pooling and TLS. They must be safe to share
/// between every worker of a run and must not retry on their own.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, url: &str, body: Vec<u8>, timeout: Duration)
    -> Result<Bytes, TransportError>;
}
