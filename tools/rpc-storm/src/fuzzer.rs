//! Randomized, structurally valid arguments for a [`MethodSpec`].
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, SecondsFormat};
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::catalog::ethereum::{BLOCK_TAGS, SAMPLE_ADDRESSES, SAMPLE_HASHES};
use crate::catalog::{Field, FieldKind, MethodSpec, ParamKind};

pub const DEFAULT_MAX_QUANTITY: u64 = 0xffff_ffff;
pub const DEFAULT_MAX_BLOCK_NUMBER: u64 = 20_000_000;
pub const DEFAULT_MIN_BYTES: usize = 1;
pub const DEFAULT_MAX_BYTES: usize = 256;
pub const DEFAULT_MAX_TEXT: usize = 32;
pub const DEFAULT_MAX_LIST: usize = 4;
/// one in `SAMPLE_ODDS` addresses and hashes is a well known value
const SAMPLE_ODDS: u32 = 8;
/// earliest and latest timestamps handed out, 2020-01-01 .. 2030-01-01
const TIMESTAMP_RANGE: std::ops::Range<i64> = 1_577_836_800..1_893_456_000;

/// Size limits for generated values. Keeps payloads large enough to be
/// interesting without tripping body-size limits before the node is stressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzBounds {
    pub max_quantity: u64,
    pub max_block_number: u64,
    pub min_bytes: usize,
    pub max_bytes: usize,
    pub max_text: usize,
    pub max_list: usize,
}

impl Default for FuzzBounds {
    fn default() -> Self {
        Self {
            max_quantity: DEFAULT_MAX_QUANTITY,
            max_block_number: DEFAULT_MAX_BLOCK_NUMBER,
            min_bytes: DEFAULT_MIN_BYTES,
            max_bytes: DEFAULT_MAX_BYTES,
            max_text: DEFAULT_MAX_TEXT,
            max_list: DEFAULT_MAX_LIST,
        }
    }
}

/// One generated call, owned by the worker that dispatches it.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzedCall {
    pub method: &'static MethodSpec,
    pub args: Vec<Value>,
}

#[derive(Debug)]
pub struct ParamFuzzer<R = StdRng> {
    rng: R,
    bounds: FuzzBounds,
}

impl ParamFuzzer<StdRng> {
    /// Deterministic fuzzer for `(seed, stream)`. Each worker gets its own stream.
    pub fn seeded(seed: u64, stream: u64, bounds: FuzzBounds) -> Self {
        let mixed = seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        Self::new(StdRng::seed_from_u64(mixed), bounds)
    }
}

impl<R: Rng> ParamFuzzer<R> {
    pub fn new(rng: R, bounds: FuzzBounds) -> Self {
        Self { rng, bounds }
    }

    pub fn rng(&mut self) -> &mut R {
        &mut self.rng
    }

    pub fn call(&mut self, method: &'static MethodSpec) -> FuzzedCall {
        FuzzedCall {
            method,
            args: self.generate(method),
        }
    }

    /// One value per declared parameter, in order.
    pub fn generate(&mut self, spec: &MethodSpec) -> Vec<Value> {
        spec.params.iter().map(|kind| self.param(kind)).collect()
    }

    fn param(&mut self, kind: &ParamKind) -> Value {
        match kind {
            ParamKind::Hex20 => Value::String(self.address()),
            ParamKind::Hex32 => Value::String(self.hash()),
            ParamKind::QuantityHex => Value::String(self.quantity(self.bounds.max_quantity)),
            ParamKind::BlockTag => Value::String(self.block_tag()),
            ParamKind::Bytes => Value::String(self.hex_data()),
            ParamKind::Bool => Value::Bool(self.rng.gen_bool(0.5)),
            ParamKind::CallObject => self.call_object(),
            ParamKind::FilterObject => self.filter_object(),
            ParamKind::ProtoBufEnvelope(fields) => self.envelope(fields),
        }
    }

    fn address(&mut self) -> String {
        if self.rng.gen_ratio(1, SAMPLE_ODDS) {
            if let Some(sample) = SAMPLE_ADDRESSES.choose(&mut self.rng) {
                return (*sample).to_string();
            }
        }
        prefixed_hex(&self.bytes(20))
    }

    fn hash(&mut self) -> String {
        if self.rng.gen_ratio(1, SAMPLE_ODDS) {
            if let Some(sample) = SAMPLE_HASHES.choose(&mut self.rng) {
                return (*sample).to_string();
            }
        }
        prefixed_hex(&self.bytes(32))
    }

    fn quantity(&mut self, max: u64) -> String {
        format!("{:#x}", self.rng.gen_range(0..=max))
    }

    fn block_tag(&mut self) -> String {
        // each named tag and "explicit number" are equally likely
        let pick = self.rng.gen_range(0..=BLOCK_TAGS.len());
        match BLOCK_TAGS.get(pick) {
            Some(tag) => (*tag).to_string(),
            None => self.quantity(self.bounds.max_block_number),
        }
    }

    fn hex_data(&mut self) -> String {
        let len = self.byte_len();
        prefixed_hex(&self.bytes(len))
    }

    fn call_object(&mut self) -> Value {
        let mut obj = Map::new();
        obj.insert("from".into(), Value::String(self.address()));
        obj.insert("to".into(), Value::String(self.address()));
        if self.rng.gen_bool(0.5) {
            obj.insert("data".into(), Value::String(self.hex_data()));
        }
        if self.rng.gen_bool(0.3) {
            let gas = self.rng.gen_range(21_000u64..=1_000_000);
            obj.insert("gas".into(), Value::String(format!("{gas:#x}")));
        }
        if self.rng.gen_bool(0.3) {
            let gwei = self.rng.gen_range(1u64..=100) * 1_000_000_000;
            obj.insert("gasPrice".into(), Value::String(format!("{gwei:#x}")));
        }
        if self.rng.gen_bool(0.3) {
            let wei = u128::from(self.rng.gen_range(0u64..=10)) * 10u128.pow(18);
            obj.insert("value".into(), Value::String(format!("{wei:#x}")));
        }
        Value::Object(obj)
    }

    fn filter_object(&mut self) -> Value {
        let mut obj = Map::new();
        if self.rng.gen_bool(0.7) {
            obj.insert("fromBlock".into(), Value::String(self.block_tag()));
        }
        if self.rng.gen_bool(0.7) {
            obj.insert("toBlock".into(), Value::String(self.block_tag()));
        }
        if self.rng.gen_bool(0.7) {
            let address = if self.rng.gen_bool(0.5) {
                Value::String(self.address())
            } else {
                let count = self.rng.gen_range(1..=3);
                Value::Array((0..count).map(|_| Value::String(self.address())).collect())
            };
            obj.insert("address".into(), address);
        }
        if self.rng.gen_bool(0.5) {
            let count = self.rng.gen_range(1..=4);
            let topics = (0..count)
                .map(|_| Value::String(prefixed_hex(&self.bytes(32))))
                .collect();
            obj.insert("topics".into(), Value::Array(topics));
        }
        Value::Object(obj)
    }

    fn envelope(&mut self, fields: &[Field]) -> Value {
        let mut obj = Map::with_capacity(fields.len());
        for field in fields {
            let value = self.field(&field.kind);
            obj.insert(field.name.to_string(), value);
        }
        Value::Object(obj)
    }

    fn field(&mut self, kind: &FieldKind) -> Value {
        match kind {
            FieldKind::Text => {
                let len = self.rng.gen_range(1..=self.bounds.max_text.max(1));
                let text: String = (&mut self.rng)
                    .sample_iter(&Alphanumeric)
                    .take(len)
                    .map(char::from)
                    .collect();
                Value::String(text)
            }
            FieldKind::OneOf(choices) => choices
                .choose(&mut self.rng)
                .map_or(Value::Null, |choice| Value::String((*choice).to_string())),
            FieldKind::Bytes => {
                let len = self.byte_len();
                Value::String(BASE64.encode(self.bytes(len)))
            }
            FieldKind::Address => Value::String(BASE64.encode(self.bytes(20))),
            FieldKind::Hash => Value::String(BASE64.encode(self.bytes(32))),
            FieldKind::Height => {
                let height = self.rng.gen_range(1..=self.bounds.max_block_number.max(1));
                Value::String(height.to_string())
            }
            FieldKind::Uint64 => {
                Value::String(self.rng.gen_range(0..=self.bounds.max_quantity).to_string())
            }
            FieldKind::Uint32 => json!(self.rng.gen_range(0u32..=16)),
            FieldKind::Enum(values) => values.choose(&mut self.rng).map_or(Value::Null, |v| json!(v)),
            FieldKind::Bool => Value::Bool(self.rng.gen_bool(0.5)),
            FieldKind::Timestamp => Value::String(self.timestamp()),
            FieldKind::Message(fields) => self.envelope(fields),
            FieldKind::BytesList => {
                let count = self.rng.gen_range(0..=self.bounds.max_list);
                let items = (0..count)
                    .map(|_| {
                        let len = self.byte_len();
                        Value::String(BASE64.encode(self.bytes(len)))
                    })
                    .collect();
                Value::Array(items)
            }
            FieldKind::EmptyList => Value::Array(Vec::new()),
        }
    }

    fn timestamp(&mut self) -> String {
        let secs = self.rng.gen_range(TIMESTAMP_RANGE);
        let nanos = self.rng.gen_range(0..1_000_000_000);
        DateTime::from_timestamp(secs, nanos)
            .unwrap_or_default()
            .to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    fn byte_len(&mut self) -> usize {
        let min = self.bounds.min_bytes.min(self.bounds.max_bytes);
        self.rng.gen_range(min..=self.bounds.max_bytes)
    }

    fn bytes(&mut self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.rng.fill(&mut buf[..]);
        buf
    }
}

fn prefixed_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use serde_json::Value;

    use super::*;
    use crate::catalog::{Catalog, Protocol};

    fn fuzzer(seed: u64) -> ParamFuzzer {
        ParamFuzzer::seeded(seed, 0, FuzzBounds::default())
    }

    fn hex_len(value: &Value) -> usize {
        let s = value.as_str().expect("hex string");
        let digits = s.strip_prefix("0x").expect("0x prefix");
        hex::decode(digits).expect("valid hex").len()
    }

    #[test]
    fn hex20_and_hex32_are_exact_length() {
        let spec = MethodSpec::eth("eth_getStorageAt", &[ParamKind::Hex20, ParamKind::Hex32]);
        let mut fuzzer = fuzzer(3);
        for _ in 0..500 {
            let args = fuzzer.generate(&spec);
            assert_eq!(hex_len(&args[0]), 20);
            assert_eq!(hex_len(&args[1]), 32);
        }
    }

    #[test]
    fn quantity_stays_within_bound() {
        let bounds = FuzzBounds {
            max_quantity: 1000,
            ..FuzzBounds::default()
        };
        let spec = MethodSpec::eth("eth_uninstallFilter", &[ParamKind::QuantityHex]);
        let mut fuzzer = ParamFuzzer::seeded(9, 1, bounds);
        for _ in 0..500 {
            let args = fuzzer.generate(&spec);
            let raw = args[0].as_str().expect("quantity string");
            let value = u64::from_str_radix(raw.trim_start_matches("0x"), 16).expect("hex");
            assert!(value <= 1000);
            // quantities carry no leading zeros
            assert!(raw == "0x0" || !raw.starts_with("0x0"));
        }
    }

    #[test]
    fn block_tag_is_named_or_number() {
        let spec = MethodSpec::eth("eth_getBlockByNumber", &[ParamKind::BlockTag]);
        let mut fuzzer = fuzzer(5);
        let mut saw_number = false;
        let mut saw_tag = false;
        for _ in 0..500 {
            let args = fuzzer.generate(&spec);
            let tag = args[0].as_str().expect("block tag");
            if BLOCK_TAGS.contains(&tag) {
                saw_tag = true;
            } else {
                let n = u64::from_str_radix(tag.trim_start_matches("0x"), 16).expect("number");
                assert!(n <= DEFAULT_MAX_BLOCK_NUMBER);
                saw_number = true;
            }
        }
        assert!(saw_tag && saw_number);
    }

    #[test]
    fn bytes_respect_configured_range() {
        let bounds = FuzzBounds {
            min_bytes: 4,
            max_bytes: 8,
            ..FuzzBounds::default()
        };
        let spec = MethodSpec::eth("eth_sendRawTransaction", &[ParamKind::Bytes]);
        let mut fuzzer = ParamFuzzer::seeded(1, 2, bounds);
        for _ in 0..200 {
            let len = hex_len(&fuzzer.generate(&spec)[0]);
            assert!((4..=8).contains(&len), "length {len}");
        }
    }

    #[test]
    fn every_catalog_method_matches_its_arity() {
        let catalog = Catalog::load().expect("catalog");
        let mut fuzzer = fuzzer(11);
        for protocol in [Protocol::Ethereum, Protocol::Abci] {
            for spec in catalog.specs(protocol) {
                for _ in 0..20 {
                    let args = fuzzer.generate(spec);
                    assert_eq!(args.len(), spec.arity(), "{}", spec.name);
                    for (kind, value) in spec.params.iter().zip(&args) {
                        match kind {
                            ParamKind::Bool => assert!(value.is_boolean()),
                            ParamKind::CallObject
                            | ParamKind::FilterObject
                            | ParamKind::ProtoBufEnvelope(_) => assert!(value.is_object()),
                            _ => assert!(value.is_string()),
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn envelope_fields_follow_protobuf_json() {
        let catalog = Catalog::load().expect("catalog");
        let spec = catalog
            .spec_for(Protocol::Abci, "offerSnapshot")
            .expect("offerSnapshot");
        let mut fuzzer = fuzzer(21);
        let args = fuzzer.generate(spec);
        let obj = args[0].as_object().expect("envelope object");

        let snapshot = obj["snapshot"].as_object().expect("nested message");
        assert!(snapshot["height"].is_string(), "uint64 as string");
        assert!(snapshot["format"].is_u64(), "uint32 as number");
        let hash = BASE64
            .decode(snapshot["hash"].as_str().expect("base64"))
            .expect("decodes");
        assert_eq!(hash.len(), 32);
        let app_hash = BASE64
            .decode(obj["app_hash"].as_str().expect("base64"))
            .expect("decodes");
        assert_eq!(app_hash.len(), 32);
    }

    #[test]
    fn check_tx_type_is_a_known_enum_value() {
        let catalog = Catalog::load().expect("catalog");
        let spec = catalog.spec_for(Protocol::Abci, "checkTx").expect("checkTx");
        let mut fuzzer = fuzzer(4);
        for _ in 0..100 {
            let args = fuzzer.generate(spec);
            let ty = args[0]["type"].as_i64().expect("enum number");
            assert!(ty == 0 || ty == 1);
        }
    }

    #[test]
    fn timestamps_are_rfc3339() {
        let catalog = Catalog::load().expect("catalog");
        let spec = catalog
            .spec_for(Protocol::Abci, "finalizeBlock")
            .expect("finalizeBlock");
        let mut fuzzer = fuzzer(8);
        let args = fuzzer.generate(spec);
        let time = args[0]["time"].as_str().expect("timestamp");
        DateTime::parse_from_rfc3339(time).expect("rfc3339");
        assert!(args[0]["misbehavior"].as_array().expect("list").is_empty());
    }

    #[test]
    fn same_seed_same_stream_is_reproducible() {
        let catalog = Catalog::load().expect("catalog");
        let spec = catalog
            .spec_for(Protocol::Ethereum, "eth_call")
            .expect("eth_call");
        let mut a = ParamFuzzer::seeded(42, 3, FuzzBounds::default());
        let mut b = ParamFuzzer::seeded(42, 3, FuzzBounds::default());
        for _ in 0..10 {
            assert_eq!(a.generate(spec), b.generate(spec));
        }
    }
}
