use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{Outcome, ProtocolClient, RpcChannel};
use crate::catalog::{MethodSpec, Protocol};

/// CometBFT JSON-RPC. The single envelope argument becomes the named `params`
/// object; messages without fields send `{}`.
#[derive(Debug)]
pub struct AbciClient {
    rpc: RpcChannel,
}

impl AbciClient {
    pub fn new(rpc: RpcChannel) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl ProtocolClient for AbciClient {
    fn protocol(&self) -> Protocol {
        Protocol::Abci
    }

    fn encode(&self, id: u64, spec: &MethodSpec, args: &[Value]) -> Value {
        let params = match args.first() {
            Some(Value::Object(fields)) => Value::Object(fields.clone()),
            // catalog validation guarantees an object, keep whatever we got
            Some(other) => other.clone(),
            None => Value::Object(Map::new()),
        };
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": spec.name,
            "params": params,
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
    use crate::fuzzer::{FuzzBounds, ParamFuzzer};
    use crate::protocols::CallResult;
    use crate::transport::testing::ScriptedTransport;

    fn spec(name: &str) -> &'static MethodSpec {
        Catalog::load()
            .expect("catalog")
            .spec_for(Protocol::Abci, name)
            .expect("known method")
    }

    fn client(transport: Arc<ScriptedTransport>) -> AbciClient {
        AbciClient::new(RpcChannel::new(
            "http://validator:26657",
            transport,
            Duration::from_secs(1),
        ))
    }

    #[test]
    fn envelope_becomes_named_params() {
        let client = client(Arc::default());
        let req = client.encode(3, spec("echo"), &[json!({"message": "hi"})]);
        assert_eq!(
            req,
            json!({"jsonrpc":"2.0","id":3,"method":"echo","params":{"message":"hi"}})
        );
    }

    #[test]
    fn empty_message_sends_empty_object() {
        let client = client(Arc::default());
        let req = client.encode(1, spec("commit"), &[]);
        assert_eq!(req["params"], json!({}));
    }

    #[test]
    fn fuzzed_envelopes_encode_as_objects() {
        let client = client(Arc::default());
        let catalog = Catalog::load().expect("catalog");
        let mut fuzzer = ParamFuzzer::seeded(7, 0, FuzzBounds::default());
        for spec in catalog.specs(Protocol::Abci) {
            let args = fuzzer.generate(spec);
            let req = client.encode(1, spec, &args);
            assert!(req["params"].is_object(), "{} params not an object", spec.name);
        }
    }

    #[tokio::test]
    async fn empty_result_is_success() {
        let transport = Arc::new(ScriptedTransport::answering(
            r#"{"jsonrpc":"2.0","id":1,"result":{}}"#,
        ));
        let client = client(transport.clone());
        let out = client.invoke(spec("flush"), &[]).await;
        assert_eq!(out.result, CallResult::Success(json!({})));
        assert_eq!(transport.sent()[0]["method"], json!("flush"));
    }

    #[tokio::test]
    async fn cometbft_error_is_protocol_error() {
        let transport = Arc::new(ScriptedTransport::answering(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32603,"message":"Internal error","data":"height 99999999 must be less than or equal to the current blockchain height 12"}}"#,
        ));
        let client = client(transport);
        let out = client
            .invoke(spec("block"), &[json!({"height": "99999999"})])
            .await;
        assert_eq!(
            out.result,
            CallResult::ProtocolError {
                code: -32603,
                message: "Internal error".into()
            }
        );
    }
}
