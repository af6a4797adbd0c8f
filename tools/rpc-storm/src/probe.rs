//! Pre-flight checks run before any rate-governed traffic.
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, MethodSpec, Protocol};
use crate::error::{Error, Result};
use crate::fuzzer::ParamFuzzer;
use crate::protocols::{CallResult, METHOD_NOT_FOUND, ProtocolClient};

/// Cheapest call each protocol answers.
pub const fn probe_method(protocol: Protocol) -> &'static str {
    match protocol {
        Protocol::Ethereum => "eth_blockNumber",
        Protocol::Abci => "echo",
    }
}

/// Send one call to make sure the endpoint is reachable. Any JSON-RPC answer,
/// error objects included, counts as reachable.
pub async fn check_connection(
    client: &dyn ProtocolClient,
    catalog: &Catalog,
    fuzzer: &mut ParamFuzzer,
) -> Result<()> {
    let protocol = client.protocol();
    let name = probe_method(protocol);
    let spec = catalog
        .spec_for(protocol, name)
        .ok_or_else(|| Error::Startup(format!("probe method `{name}` missing from catalog")))?;

    let outcome = client.invoke(spec, &fuzzer.generate(spec)).await;
    match &outcome.result {
        CallResult::Timeout | CallResult::TransportError(_) => Err(Error::Startup(format!(
            "endpoint did not answer `{name}`: {}",
            outcome.result.detail().unwrap_or_default()
        ))),
        result => {
            info!(method = name, latency = ?outcome.latency, kind = %result.kind(), "endpoint reachable");
            Ok(())
        }
    }
}

/// Call every method once and keep the ones the node serves.
pub async fn filter_available(
    client: &dyn ProtocolClient,
    methods: Vec<&'static MethodSpec>,
    fuzzer: &mut ParamFuzzer,
) -> Result<Vec<&'static MethodSpec>> {
    let mut available = Vec::with_capacity(methods.len());
    for spec in methods {
        let outcome = client.invoke(spec, &fuzzer.generate(spec)).await;
        match &outcome.result {
            CallResult::ProtocolError { code, message } if *code == METHOD_NOT_FOUND => {
                info!(method = spec.name, %message, "method not served, skipping");
            }
            CallResult::TransportError(_) | CallResult::Timeout => {
                warn!(method = spec.name, detail = ?outcome.result.detail(), "method probe failed, skipping");
            }
            _ => {
                debug!(method = spec.name, "method available");
                available.push(spec);
            }
        }
    }
    if available.is_empty() {
        return Err(Error::Startup(
            "none of the selected methods are served by the endpoint".to_string(),
        ));
    }
    Ok(available)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tracing_test::traced_test;

    use super::*;
    use crate::fuzzer::FuzzBounds;
    use crate::protocols::client_for;
    use crate::transport::TransportError;
    use crate::transport::testing::ScriptedTransport;

    fn fuzzer() -> ParamFuzzer {
        ParamFuzzer::seeded(1, 0, FuzzBounds::default())
    }

    #[tokio::test]
    async fn error_object_means_reachable() {
        let transport = Arc::new(ScriptedTransport::answering(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"Method not found"}}"#,
        ));
        let client = client_for(Protocol::Abci, "http://n", transport, Duration::from_secs(1));
        let catalog = Catalog::load().expect("catalog");
        check_connection(client.as_ref(), &catalog, &mut fuzzer())
            .await
            .expect("reachable");
    }

    #[tokio::test]
    async fn refused_connection_fails_startup() {
        let transport = Arc::new(ScriptedTransport::new([Err(TransportError::Connect(
            "connection refused".into(),
        ))]));
        let client = client_for(Protocol::Ethereum, "http://n", transport, Duration::from_secs(1));
        let catalog = Catalog::load().expect("catalog");
        let err = check_connection(client.as_ref(), &catalog, &mut fuzzer())
            .await
            .expect_err("unreachable");
        assert!(matches!(err, Error::Startup(_)));
        assert_eq!(err.exit_code(), 1);
        assert!(err.to_string().contains("eth_blockNumber"));
    }

    #[tokio::test]
    #[traced_test]
    async fn drops_unserved_methods() {
        let transport = Arc::new(ScriptedTransport::new([
            Ok(r#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#),
            Ok(r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"the method eth_mining does not exist/is not available"}}"#),
            Ok(r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32000,"message":"header not found"}}"#),
            Err(TransportError::Timeout(Duration::from_secs(1))),
        ]));
        let client = client_for(Protocol::Ethereum, "http://n", transport, Duration::from_secs(1));
        let catalog = Catalog::load().expect("catalog");
        let methods = ["eth_blockNumber", "eth_mining", "eth_getBalance", "eth_getLogs"]
            .map(|m| catalog.spec_for(Protocol::Ethereum, m).expect("known"))
            .to_vec();

        let kept = filter_available(client.as_ref(), methods, &mut fuzzer())
            .await
            .expect("some remain");
        let names: Vec<_> = kept.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["eth_blockNumber", "eth_getBalance"]);
        assert!(logs_contain("method not served, skipping"));
        assert!(logs_contain("method probe failed, skipping"));
    }

    #[tokio::test]
    async fn nothing_served_is_a_startup_error() {
        let transport = Arc::new(ScriptedTransport::answering(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"Method not found"}}"#,
        ));
        let client = client_for(Protocol::Abci, "http://n", transport, Duration::from_secs(1));
        let catalog = Catalog::load().expect("catalog");
        let methods = catalog.specs(Protocol::Abci).take(3).collect();
        let err = filter_available(client.as_ref(), methods, &mut fuzzer())
            .await
            .expect_err("all unserved");
        assert!(matches!(err, Error::Startup(_)));
    }
}
