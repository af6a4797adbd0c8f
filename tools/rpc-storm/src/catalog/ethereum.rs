//! Ethereum JSON-RPC methods. Parameters are positional.
use super::MethodSpec;
use super::ParamKind::*;

pub static METHODS: &[MethodSpec] = &[
    // web3 / net
    MethodSpec::eth("web3_clientVersion", &[]),
    MethodSpec::eth("web3_sha3", &[Bytes]),
    MethodSpec::eth("net_version", &[]),
    MethodSpec::eth("net_peerCount", &[]),
    MethodSpec::eth("net_listening", &[]),
    // node state
    MethodSpec::eth("eth_protocolVersion", &[]),
    MethodSpec::eth("eth_chainId", &[]),
    MethodSpec::eth("eth_syncing", &[]),
    MethodSpec::eth("eth_coinbase", &[]),
    MethodSpec::eth("eth_mining", &[]),
    MethodSpec::eth("eth_hashrate", &[]),
    MethodSpec::eth("eth_gasPrice", &[]),
    MethodSpec::eth("eth_accounts", &[]),
    MethodSpec::eth("eth_blockNumber", &[]),
    // account state
    MethodSpec::eth("eth_getBalance", &[Hex20, BlockTag]),
    MethodSpec::eth("eth_getStorageAt", &[Hex20, Hex32, BlockTag]),
    MethodSpec::eth("eth_getTransactionCount", &[Hex20, BlockTag]),
    MethodSpec::eth("eth_getCode", &[Hex20, BlockTag]),
    // blocks
    MethodSpec::eth("eth_getBlockTransactionCountByHash", &[Hex32]),
    MethodSpec::eth("eth_getBlockTransactionCountByNumber", &[BlockTag]),
    MethodSpec::eth("eth_getUncleCountByBlockHash", &[Hex32]),
    MethodSpec::eth("eth_getUncleCountByBlockNumber", &[BlockTag]),
    MethodSpec::eth("eth_getBlockByHash", &[Hex32, Bool]),
    MethodSpec::eth("eth_getBlockByNumber", &[BlockTag, Bool]),
    MethodSpec::eth("eth_getUncleByBlockHashAndIndex", &[Hex32, QuantityHex]),
    MethodSpec::eth("eth_getUncleByBlockNumberAndIndex", &[BlockTag, QuantityHex]),
    // transactions
    MethodSpec::eth("eth_call", &[CallObject, BlockTag]),
    MethodSpec::eth("eth_estimateGas", &[CallObject]),
    MethodSpec::eth("eth_sendRawTransaction", &[Bytes]),
    MethodSpec::eth("eth_getTransactionByHash", &[Hex32]),
    MethodSpec::eth("eth_getTransactionByBlockHashAndIndex", &[Hex32, QuantityHex]),
    MethodSpec::eth("eth_getTransactionByBlockNumberAndIndex", &[BlockTag, QuantityHex]),
    MethodSpec::eth("eth_getTransactionReceipt", &[Hex32]),
    // filters and logs
    MethodSpec::eth("eth_newFilter", &[FilterObject]),
    MethodSpec::eth("eth_newBlockFilter", &[]),
    MethodSpec::eth("eth_newPendingTransactionFilter", &[]),
    MethodSpec::eth("eth_uninstallFilter", &[QuantityHex]),
    MethodSpec::eth("eth_getFilterChanges", &[QuantityHex]),
    MethodSpec::eth("eth_getFilterLogs", &[QuantityHex]),
    MethodSpec::eth("eth_getLogs", &[FilterObject]),
];

/// Well known addresses mixed into generated `Hex20` values so that some calls
/// touch accounts with real state on mainnet-like chains.
pub const SAMPLE_ADDRESSES: &[&str] = &[
    "0x0000000000000000000000000000000000000000",
    "0x742d35Cc6634C0532925a3b844Bc454e4438f44e",
    "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045",
    "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2",
    "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48",
];

/// Genesis hash, a couple of real block hashes and the zero hash.
pub const SAMPLE_HASHES: &[&str] = &[
    "0xd4e56740f876aef8c010b86a40d5f56745a118d0906a34e69aec8c0db1cb8fa3",
    "0x88e96d4537bea4d9c05d12549907b32561d3bf31f45aae734cdc119f13406cb6",
    "0x5c504ed432cb51138bcf09aa5e8a410dd4a1e204ef84bfed1be16dfba1b22060",
    "0x0000000000000000000000000000000000000000000000000000000000000000",
];

pub const BLOCK_TAGS: &[&str] = &["latest", "earliest", "pending", "safe", "finalized"];
