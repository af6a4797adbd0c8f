//! Protocol clients: encode a fuzzed call, send it, classify what came back.
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::trace;

use crate::catalog::{MethodSpec, Protocol};
use crate::transport::{Transport, TransportError};

pub mod abci;
pub mod ethereum;

pub use abci::AbciClient;
pub use ethereum::EthereumClient;

/// JSON-RPC "method not found"
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Result of one call. Never mutated after it is produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub method: &'static str,
    pub started_at: DateTime<Utc>,
    pub latency: Duration,
    pub result: CallResult,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallResult {
    Success(Value),
    /// node-supplied error object, code and message kept verbatim
    ProtocolError { code: i64, message: String },
    TransportError(String),
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    Success,
    ProtocolError,
    TransportError,
    Timeout,
}

impl ResultKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ProtocolError => "protocol_error",
            Self::TransportError => "transport_error",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl CallResult {
    pub const fn kind(&self) -> ResultKind {
        match self {
            Self::Success(_) => ResultKind::Success,
            Self::ProtocolError { .. } => ResultKind::ProtocolError,
            Self::TransportError(_) => ResultKind::TransportError,
            Self::Timeout => ResultKind::Timeout,
        }
    }

    /// Human readable error detail, `None` on success.
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Success(_) => None,
            Self::ProtocolError { code, message } => Some(format!("code={code} message={message}")),
            Self::TransportError(cause) => Some(cause.clone()),
            Self::Timeout => Some("request timed out".to_string()),
        }
    }
}

/// A protocol family's wire conventions. One implementation is picked at
/// startup and shared by all workers.
#[async_trait]
pub trait ProtocolClient: Send + Sync + 'static {
    fn protocol(&self) -> Protocol;

    /// Build the request envelope for `args` under request id `id`.
    fn encode(&self, id: u64, spec: &MethodSpec, args: &[Value]) -> Value;

    /// Send one call. Every failure mode is folded into the returned outcome.
    async fn invoke(&self, spec: &MethodSpec, args: &[Value]) -> Outcome;
}

/// Pick the client for `protocol`.
pub fn client_for(
    protocol: Protocol,
    url: impl Into<String>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
) -> Arc<dyn ProtocolClient> {
    let rpc = RpcChannel::new(url, transport, timeout);
    match protocol {
        Protocol::Ethereum => Arc::new(EthereumClient::new(rpc)),
        Protocol::Abci => Arc::new(AbciClient::new(rpc)),
    }
}

/// Target url, shared transport and request id counter. Every field is either
/// immutable or atomic so the channel can be used from any worker.
pub struct RpcChannel {
    url: String,
    transport: Arc<dyn Transport>,
    timeout: Duration,
    next_id: AtomicU64,
}

impl fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcChannel")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl RpcChannel {
    pub fn new(url: impl Into<String>, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            transport,
            timeout,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Serialize `request`, send it and classify the response.
    pub async fn call(&self, method: &'static str, request: &Value) -> Outcome {
        let started_at = Utc::now();
        let start = Instant::now();

        let result = match serde_json::to_vec(request) {
            Ok(body) => match self.transport.send(&self.url, body, self.timeout).await {
                Ok(bytes) => decode_response(&bytes),
                Err(TransportError::Timeout(_)) => CallResult::Timeout,
                Err(err) => CallResult::TransportError(err.to_string()),
            },
            Err(err) => CallResult::TransportError(format!("encode error: {err}")),
        };
        let latency = start.elapsed();
        trace!(method, ?latency, kind = %result.kind(), "call finished");

        Outcome {
            method,
            started_at,
            latency,
            result,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorObject {
    code: i64,
    #[serde(default)]
    message: String,
}

/// Classify a raw JSON-RPC 2.0 response body.
pub fn decode_response(body: &[u8]) -> CallResult {
    let envelope = match serde_json::from_slice::<ResponseEnvelope>(body) {
        Ok(envelope) => envelope,
        Err(err) => {
            return CallResult::TransportError(format!(
                "malformed response ({err}): {}",
                preview(body)
            ));
        }
    };

    match envelope.error {
        Some(Value::Null) | None => CallResult::Success(envelope.result.unwrap_or(Value::Null)),
        Some(error) => match serde_json::from_value::<ErrorObject>(error.clone()) {
            Ok(obj) => CallResult::ProtocolError {
                code: obj.code,
                message: obj.message,
            },
            // some nodes answer with a bare string or an object without a code
            Err(_) => CallResult::ProtocolError {
                code: 0,
                message: match error {
                    Value::String(msg) => msg,
                    other => other.to_string(),
                },
            },
        },
    }
}

const PREVIEW_LEN: usize = 120;

/// First characters of `body`, for log and verbose output.
pub(crate) fn preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let mut out: String = text.chars().take(PREVIEW_LEN).collect();
    if text.chars().count() > PREVIEW_LEN {
        out.push_str("...");
    }
    out
}
