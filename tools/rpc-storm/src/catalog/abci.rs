//! CometBFT methods.
//!
//! Two families share the `abci` protocol: the ABCI++ request messages, named
//! after the `Request*` types of the CometBFT ABCI spec, and the CometBFT RPC
//! routes that expose the application over HTTP. Every method takes a single
//! named-parameter object.
use super::FieldKind::*;
use super::{Field, MethodSpec, ParamKind};

const ABCI: &str = "abci++";
const RPC: &str = "cometbft-rpc";

/// Messages without fields are sent as an empty params object.
const EMPTY: &[ParamKind] = &[];

/// Shorthand for a one-envelope parameter list.
macro_rules! msg {
    ($($name:literal => $kind:expr),* $(,)?) => {
        &[ParamKind::ProtoBufEnvelope(&[$(Field::new($name, $kind)),*])]
    };
}

const COMMIT_INFO: &[Field] = &[
    Field::new("round", Uint32),
    Field::new("votes", EmptyList),
];

const HEADER: &[Field] = &[
    Field::new("chain_id", OneOf(CHAIN_IDS)),
    Field::new("height", Height),
    Field::new("time", Timestamp),
    Field::new("last_commit_hash", Hash),
    Field::new("data_hash", Hash),
    Field::new("validators_hash", Hash),
    Field::new("next_validators_hash", Hash),
    Field::new("app_hash", Hash),
    Field::new("proposer_address", Address),
];

const SNAPSHOT: &[Field] = &[
    Field::new("height", Uint64),
    Field::new("format", Uint32),
    Field::new("chunks", Uint32),
    Field::new("hash", Hash),
    Field::new("metadata", Bytes),
];

const CONSENSUS_PARAMS: &[Field] = &[
    Field::new("block", Message(&[
        Field::new("max_bytes", Uint64),
        Field::new("max_gas", Uint64),
    ])),
    Field::new("evidence", Message(&[Field::new("max_bytes", Uint64)])),
    Field::new("validator", Message(&[Field::new("pub_key_types", EmptyList)])),
];

pub const CHAIN_IDS: &[&str] = &["storm-testnet", "cosmoshub-4", "test-chain"];

/// `RequestCheckTx.type`: NEW or RECHECK
const CHECK_TX_TYPES: &[i32] = &[0, 1];

/// Cosmos SDK store and gRPC query paths routed through `Query`.
pub const QUERY_PATHS: &[&str] = &[
    "/store/acc/key",
    "/store/bank/key",
    "/store/staking/key",
    "/app/version",
    "/p2p/filter/addr/127.0.0.1:26656",
    "/cosmos.bank.v1beta1.Query/AllBalances",
    "/cosmos.bank.v1beta1.Query/Balance",
    "/cosmos.bank.v1beta1.Query/TotalSupply",
    "/cosmos.bank.v1beta1.Query/SupplyOf",
    "/cosmos.bank.v1beta1.Query/Params",
    "/cosmos.staking.v1beta1.Query/Validators",
    "/cosmos.staking.v1beta1.Query/Validator",
    "/cosmos.staking.v1beta1.Query/Delegation",
    "/cosmos.staking.v1beta1.Query/Pool",
    "/cosmos.staking.v1beta1.Query/Params",
    "/cosmos.gov.v1beta1.Query/Proposal",
    "/cosmos.gov.v1beta1.Query/Proposals",
    "/cosmos.gov.v1beta1.Query/TallyResult",
    "/cosmos.auth.v1beta1.Query/Account",
    "/cosmos.auth.v1beta1.Query/Params",
    "/cosmos.distribution.v1beta1.Query/CommunityPool",
    "/cosmos.slashing.v1beta1.Query/SigningInfos",
];

const TX_QUERIES: &[&str] = &[
    "tx.height=1",
    "tx.height>100",
    "message.action='send'",
    "transfer.recipient='cosmos1jxv0u20scum4trha72c7ltfgfqef6nscwf8dg8'",
];

const ORDER: &[&str] = &["asc", "desc"];

const PER_PAGE: &[&str] = &["10", "30", "100"];

pub static METHODS: &[MethodSpec] = &[
    // ABCI++ connection and info
    MethodSpec::abci("echo", ABCI, msg!["message" => Text]),
    MethodSpec::abci("flush", ABCI, EMPTY),
    MethodSpec::abci(
        "info",
        ABCI,
        msg![
            "version" => OneOf(&["0.38.0", "0.37.2", "1.0.0"]),
            "block_version" => Uint64,
            "p2p_version" => Uint64,
            "abci_version" => OneOf(&["2.0.0", "1.0.0"]),
        ],
    ),
    MethodSpec::abci(
        "initChain",
        ABCI,
        msg![
            "time" => Timestamp,
            "chain_id" => OneOf(CHAIN_IDS),
            "consensus_params" => Message(CONSENSUS_PARAMS),
            "validators" => EmptyList,
            "app_state_bytes" => Bytes,
            "initial_height" => Height,
        ],
    ),
    MethodSpec::abci(
        "query",
        ABCI,
        msg![
            "data" => Bytes,
            "path" => OneOf(QUERY_PATHS),
            "height" => Height,
            "prove" => Bool,
        ],
    ),
    // mempool
    MethodSpec::abci(
        "checkTx",
        ABCI,
        msg!["tx" => Bytes, "type" => Enum(CHECK_TX_TYPES)],
    ),
    // consensus, pre ABCI 2.0 block execution
    MethodSpec::abci(
        "beginBlock",
        ABCI,
        msg![
            "hash" => Hash,
            "header" => Message(HEADER),
            "last_commit_info" => Message(COMMIT_INFO),
            "byzantine_validators" => EmptyList,
        ],
    ),
    MethodSpec::abci("deliverTx", ABCI, msg!["tx" => Bytes]),
    MethodSpec::abci("endBlock", ABCI, msg!["height" => Height]),
    MethodSpec::abci("commit", ABCI, EMPTY),
    // state sync
    MethodSpec::abci("listSnapshots", ABCI, EMPTY),
    MethodSpec::abci(
        "loadSnapshotChunk",
        ABCI,
        msg!["height" => Uint64, "format" => Uint32, "chunk" => Uint32],
    ),
    MethodSpec::abci(
        "offerSnapshot",
        ABCI,
        msg!["snapshot" => Message(SNAPSHOT), "app_hash" => Hash],
    ),
    MethodSpec::abci(
        "applySnapshotChunk",
        ABCI,
        msg!["index" => Uint32, "chunk" => Bytes, "sender" => Text],
    ),
    // ABCI++ proposal handling
    MethodSpec::abci(
        "prepareProposal",
        ABCI,
        msg![
            "max_tx_bytes" => Height,
            "txs" => BytesList,
            "local_last_commit" => Message(COMMIT_INFO),
            "misbehavior" => EmptyList,
            "height" => Height,
            "time" => Timestamp,
            "next_validators_hash" => Hash,
            "proposer_address" => Address,
        ],
    ),
    MethodSpec::abci(
        "processProposal",
        ABCI,
        msg![
            "txs" => BytesList,
            "proposed_last_commit" => Message(COMMIT_INFO),
            "misbehavior" => EmptyList,
            "hash" => Hash,
            "height" => Height,
            "time" => Timestamp,
            "next_validators_hash" => Hash,
            "proposer_address" => Address,
        ],
    ),
    // ABCI 2.0 vote extensions and block finalization
    MethodSpec::abci(
        "extendVote",
        ABCI,
        msg![
            "hash" => Hash,
            "height" => Height,
            "time" => Timestamp,
            "txs" => BytesList,
            "proposed_last_commit" => Message(COMMIT_INFO),
            "misbehavior" => EmptyList,
            "next_validators_hash" => Hash,
            "proposer_address" => Address,
        ],
    ),
    MethodSpec::abci(
        "verifyVoteExtension",
        ABCI,
        msg![
            "hash" => Hash,
            "validator_address" => Address,
            "height" => Height,
            "vote_extension" => Bytes,
        ],
    ),
    MethodSpec::abci(
        "finalizeBlock",
        ABCI,
        msg![
            "txs" => BytesList,
            "decided_last_commit" => Message(COMMIT_INFO),
            "misbehavior" => EmptyList,
            "hash" => Hash,
            "height" => Height,
            "time" => Timestamp,
            "next_validators_hash" => Hash,
            "proposer_address" => Address,
        ],
    ),
    // CometBFT RPC routes
    MethodSpec::abci("abci_info", RPC, EMPTY),
    MethodSpec::abci(
        "abci_query",
        RPC,
        msg![
            "path" => OneOf(QUERY_PATHS),
            "data" => Bytes,
            "height" => Height,
            "prove" => Bool,
        ],
    ),
    MethodSpec::abci("broadcast_tx_sync", RPC, msg!["tx" => Bytes]),
    MethodSpec::abci("broadcast_tx_async", RPC, msg!["tx" => Bytes]),
    MethodSpec::abci("broadcast_tx_commit", RPC, msg!["tx" => Bytes]),
    MethodSpec::abci("block", RPC, msg!["height" => Height]),
    MethodSpec::abci("block_results", RPC, msg!["height" => Height]),
    MethodSpec::abci(
        "blockchain",
        RPC,
        msg!["minHeight" => Height, "maxHeight" => Height],
    ),
    MethodSpec::abci("consensus_state", RPC, EMPTY),
    MethodSpec::abci("status", RPC, EMPTY),
    MethodSpec::abci("net_info", RPC, EMPTY),
    MethodSpec::abci(
        "validators",
        RPC,
        msg![
            "height" => Height,
            "page" => OneOf(&["1", "2", "3", "4", "5"]),
            "per_page" => OneOf(PER_PAGE),
        ],
    ),
    MethodSpec::abci("tx", RPC, msg!["hash" => Hash, "prove" => Bool]),
    MethodSpec::abci(
        "tx_search",
        RPC,
        msg![
            "query" => OneOf(TX_QUERIES),
            "prove" => Bool,
            "page" => OneOf(&["1", "2", "3"]),
            "per_page" => OneOf(PER_PAGE),
            "order_by" => OneOf(ORDER),
        ],
    ),
    MethodSpec::abci("health", RPC, EMPTY),
    MethodSpec::abci("genesis", RPC, EMPTY),
    MethodSpec::abci("num_unconfirmed_txs", RPC, EMPTY),
    MethodSpec::abci(
        "unconfirmed_txs",
        RPC,
        msg!["limit" => OneOf(PER_PAGE)],
    ),
];
