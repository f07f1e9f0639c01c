//! RPC method names understood by the external node

/// List all connected peers with their connection statistics
pub const LIST_PEERS: &str = "getpeerinfo";
/// Ban a network address: params `[ip, "add", duration_seconds]`
pub const BAN_ADDRESS: &str = "setban";
/// Disconnect a peer: params `[address_with_port]`
pub const DISCONNECT_PEER: &str = "disconnectnode";
/// Current best block height
pub const BLOCK_COUNT: &str = "getblockcount";
/// Fetch a block by hash
pub const GET_BLOCK: &str = "getblock";
/// Fetch a raw transaction by txid
pub const GET_TRANSACTION: &str = "getrawtransaction";
/// Mempool statistics
pub const MEMPOOL_INFO: &str = "getmempoolinfo";
/// Wallet balance summary
pub const WALLET_INFO: &str = "getwalletinfo";
