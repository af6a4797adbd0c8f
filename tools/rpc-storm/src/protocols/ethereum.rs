use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Outcome, ProtocolClient, RpcChannel};
use crate::catalog::{MethodSpec, Protocol};

/// Ethereum JSON-RPC 2.0, positional `params` array.
#[derive(Debug)]
pub struct EthereumClient {
    rpc: RpcChannel,
}

impl EthereumClient {
    pub fn new(rpc: RpcChannel) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl ProtocolClient for EthereumClient {
    fn protocol(&self) -> Protocol {
        Protocol::Ethereum
    }

    fn encode(&self, id: u64, spec: &MethodSpec, args: &[Value]) -> Value {
        json!({
            "jsonrpc": "2.0",
            "method": spec.name,
            "params": args,
            "id": id,
        })
    }

    async fn invoke(&self, spec: &MethodSpec, args: &[Value]) -> Outcome {
        let request = self.encode(self.rpc.next_id(), spec, args);
        self.rpc.call(spec.name, &request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::catalog::Catalog;
    use crate::protocols::{CallResult, client_for};
    use crate::transport::TransportError;
    use crate::transport::testing::ScriptedTransport;

    fn spec(name: &str) -> &'static MethodSpec {
        Catalog::load()
            .expect("catalog")
            .spec_for(Protocol::Ethereum, name)
            .expect("known method")
    }

    #[test]
    fn envelope_is_positional() {
        let client = EthereumClient::new(RpcChannel::new(
            "http://node",
            Arc::new(ScriptedTransport::default()),
            Duration::from_secs(1),
        ));
        let args = vec![json!("0x00"), json!("latest")];
        let req = client.encode(9, spec("eth_getBalance"), &args);
        assert_eq!(
            req,
            json!({"jsonrpc":"2.0","method":"eth_getBalance","params":["0x00","latest"],"id":9})
        );
    }

    #[test]
    fn no_args_is_empty_array() {
        let client = EthereumClient::new(RpcChannel::new(
            "http://node",
            Arc::new(ScriptedTransport::default()),
            Duration::from_secs(1),
        ));
        let req = client.encode(1, spec("eth_blockNumber"), &[]);
        assert_eq!(req["params"], json!([]));
    }

    #[tokio::test]
    async fn ids_increase_per_call() {
        let transport = Arc::new(ScriptedTransport::answering(
            r#"{"jsonrpc":"2.0","id":1,"result":"0x1"}"#,
        ));
        let client = client_for(
            Protocol::Ethereum,
            "http://node",
            transport.clone(),
            Duration::from_secs(1),
        );
        for _ in 0..3 {
            let out = client.invoke(spec("eth_blockNumber"), &[]).await;
            assert_eq!(out.result, CallResult::Success(json!("0x1")));
            assert_eq!(out.method, "eth_blockNumber");
        }
        let ids: Vec<_> = transport.sent().iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn classifies_each_failure_mode() {
        let transport = Arc::new(ScriptedTransport::new([
            Ok(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"the method eth_foo does not exist"}}"#),
            Err(TransportError::Timeout(Duration::from_secs(1))),
            Err(TransportError::Connect("connection refused".into())),
            Ok("not json"),
        ]));
        let client = client_for(
            Protocol::Ethereum,
            "http://node",
            transport,
            Duration::from_secs(1),
        );
        let spec = spec("eth_chainId");

        let first = client.invoke(spec, &[]).await.result;
        assert_eq!(
            first,
            CallResult::ProtocolError {
                code: -32601,
                message: "the method eth_foo does not exist".into()
            }
        );
        assert_eq!(client.invoke(spec, &[]).await.result, CallResult::Timeout);
        assert!(matches!(
            client.invoke(spec, &[]).await.result,
            CallResult::TransportError(msg) if msg.contains("connection refused")
        ));
        assert!(matches!(
            client.invoke(spec, &[]).await.result,
            CallResult::TransportError(_)
        ));
    }
}
