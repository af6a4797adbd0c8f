//! Static method tables for every protocol storm can flood.
//!
//! A [`MethodSpec`] fixes the arity and kind of each positional argument for
//! one RPC method. The tables are `const` data and are checked once by
//! [`Catalog::load`]; nothing about them changes after that.
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod abci;
pub mod ethereum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Ethereum,
    Abci,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Abci => "abci",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of one positional argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// 20 byte address, `0x` prefixed hex
    Hex20,
    /// 32 byte hash or storage slot, `0x` prefixed hex
    Hex32,
    /// unsigned integer as a `0x` quantity
    QuantityHex,
    /// `latest`, `earliest`, `pending`, `safe`, `finalized` or an explicit number
    BlockTag,
    /// arbitrary length data, `0x` prefixed hex
    Bytes,
    Bool,
    /// transaction call object used by `eth_call` and `eth_estimateGas`
    CallObject,
    /// log filter object used by `eth_newFilter` and `eth_getLogs`
    FilterObject,
    /// named fields of an ABCI message, sent as a protobuf-JSON object
    ProtoBufEnvelope(&'static [Field]),
}

impl ParamKind {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Hex20 => "hex20",
            Self::Hex32 => "hex32",
            Self::QuantityHex => "quantity",
            Self::BlockTag => "block_tag",
            Self::Bytes => "bytes",
            Self::Bool => "bool",
            Self::CallObject => "call_object",
            Self::FilterObject => "filter_object",
            Self::ProtoBufEnvelope(_) => "envelope",
        }
    }
}

/// One field of a [`ParamKind::ProtoBufEnvelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl Field {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Protobuf-JSON scalar and composite encodings. 64 bit integers are strings,
/// `bytes` are base64, timestamps are RFC 3339.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// short random ascii string
    Text,
    /// one of a fixed set of strings
    OneOf(&'static [&'static str]),
    /// random length bytes
    Bytes,
    /// 20 bytes, the size of a validator address
    Address,
    /// 32 bytes
    Hash,
    /// block height, int64 encoded as a string
    Height,
    /// uint64 encoded as a string
    Uint64,
    /// small uint32 encoded as a number
    Uint32,
    /// protobuf enum, sent as its numeric value
    Enum(&'static [i32]),
    Bool,
    Timestamp,
    Message(&'static [Field]),
    /// a few random byte strings
    BytesList,
    /// repeated field that is always sent empty
    EmptyList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSpec {
    pub name: &'static str,
    pub protocol: Protocol,
    /// namespace shown in reports, e.g. `eth`, `abci++`, `cometbft-rpc`
    pub family: &'static str,
    pub params: &'static [ParamKind],
}

impl MethodSpec {
    pub const fn eth(name: &'static str, params: &'static [ParamKind]) -> Self {
        let family = eth_family(name);
        Self {
            name,
            protocol: Protocol::Ethereum,
            family,
            params,
        }
    }

    pub const fn abci(name: &'static str, family: &'static str, params: &'static [ParamKind]) -> Self {
        Self {
            name,
            protocol: Protocol::Abci,
            family,
            params,
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

const fn eth_family(name: &str) -> &'static str {
    let bytes = name.as_bytes();
    if bytes.len() > 4 && bytes[0] == b'w' && bytes[3] == b'3' {
        "web3"
    } else if bytes.len() > 3 && bytes[0] == b'n' && bytes[1] == b'e' && bytes[2] == b't' {
        "net"
    } else {
        "eth"
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("duplicate {protocol} method `{method}`")]
    DuplicateMethod { protocol: Protocol, method: &'static str },
    #[error("{protocol} method `{method}` is listed under the wrong protocol table")]
    ProtocolMismatch { protocol: Protocol, method: &'static str },
    #[error("{protocol} method `{method}`: parameter {index} has unsupported kind `{kind}`")]
    UnsupportedKind {
        protocol: Protocol,
        method: &'static str,
        index: usize,
        kind: &'static str,
    },
    #[error("abci method `{method}` must take at most one envelope argument, found {arity}")]
    EnvelopeArity { method: &'static str, arity: usize },
    #[error("method `{method}`: field `{field}` {reason}")]
    InvalidField {
        method: &'static str,
        field: &'static str,
        reason: &'static str,
    },
}

/// Read-only view over the static method tables.
#[derive(Debug, Clone)]
pub struct Catalog {
    methods: BTreeMap<Protocol, BTreeMap<&'static str, &'static MethodSpec>>,
}

impl Catalog {
    /// Validate the built-in tables and index them by protocol and name.
    pub fn load() -> Result<Self, CatalogError> {
        Self::from_tables(&[
            (Protocol::Ethereum, ethereum::METHODS),
            (Protocol::Abci, abci::METHODS),
        ])
    }

    pub(crate) fn from_tables(
        tables: &[(Protocol, &'static [MethodSpec])],
    ) -> Result<Self, CatalogError> {
        let mut methods: BTreeMap<_, BTreeMap<_, _>> = BTreeMap::new();
        for (protocol, table) in tables {
            let by_name = methods.entry(*protocol).or_default();
            for spec in table.iter() {
                validate(*protocol, spec)?;
                if by_name.insert(spec.name, spec).is_some() {
                    return Err(CatalogError::DuplicateMethod {
                        protocol: *protocol,
                        method: spec.name,
                    });
                }
            }
        }
        Ok(Self { methods })
    }

    pub fn spec_for(&self, protocol: Protocol, name: &str) -> Option<&'static MethodSpec> {
        self.methods.get(&protocol)?.get(name).copied()
    }

    pub fn all_methods(&self, protocol: Protocol) -> BTreeSet<&'static str> {
        self.specs(protocol).map(|spec| spec.name).collect()
    }

    pub fn specs(&self, protocol: Protocol) -> impl Iterator<Item = &'static MethodSpec> + '_ {
        self.methods
            .get(&protocol)
            .into_iter()
            .flat_map(|by_name| by_name.values().copied())
    }

    pub fn len(&self) -> usize {
        self.methods.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate(protocol: Protocol, spec: &'static MethodSpec) -> Result<(), CatalogError> {
    if spec.protocol != protocol {
        return Err(CatalogError::ProtocolMismatch {
            protocol,
            method: spec.name,
        });
    }

    match protocol {
        Protocol::Ethereum => {
            for (index, kind) in spec.params.iter().enumerate() {
                if let ParamKind::ProtoBufEnvelope(_) = kind {
                    return Err(CatalogError::UnsupportedKind {
                        protocol,
                        method: spec.name,
                        index,
                        kind: kind.name(),
                    });
                }
            }
        }
        Protocol::Abci => {
            if spec.arity() > 1 {
                return Err(CatalogError::EnvelopeArity {
                    method: spec.name,
                    arity: spec.arity(),
                });
            }
            if let Some(kind) = spec.params.first() {
                let ParamKind::ProtoBufEnvelope(fields) = kind else {
                    return Err(CatalogError::UnsupportedKind {
                        protocol,
                        method: spec.name,
                        index: 0,
                        kind: kind.name(),
                    });
                };
                validate_fields(spec.name, fields)?;
            }
        }
    }
    Ok(())
}

fn validate_fields(method: &'static str, fields: &'static [Field]) -> Result<(), CatalogError> {
    let mut seen = HashSet::new();
    for field in fields {
        if !seen.insert(field.name) {
            return Err(CatalogError::InvalidField {
                method,
                field: field.name,
                reason: "is declared twice",
            });
        }
        match field.kind {
            FieldKind::OneOf(&[]) => {
                return Err(CatalogError::InvalidField {
                    method,
                    field: field.name,
                    reason: "has no choices",
                });
            }
            FieldKind::Enum(&[]) => {
                return Err(CatalogError::InvalidField {
                    method,
                    field: field.name,
                    reason: "has no enum values",
                });
            }
            FieldKind::Message(nested) => validate_fields(method, nested)?,
            _ => {}
        }
    }
    Ok(())
}
