use std::path::PathBuf;

use bitcoin::Network;
use blockscope_core::SupplySource;
use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReadinessMode {
    /// Answer 503 until the node has been reached once.
    Fail,
    /// Hold requests until the node is reached or the wait times out.
    Wait,
}

/// Blockscope: cached explorer API over a full node and a local index.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Node RPC URL.
    #[arg(long, default_value = "http://127.0.0.1:8332", env = "BLOCKSCOPE_RPC_URL")]
    pub rpc_url: String,

    /// RPC username (optional; not needed for token-in-URL providers).
    #[arg(long, env = "BLOCKSCOPE_RPC_USER")]
    pub rpc_user: Option<String>,

    /// RPC password (optional; not needed for token-in-URL providers).
    #[arg(long, env = "BLOCKSCOPE_RPC_PASS")]
    pub rpc_pass: Option<String>,

    /// Node cookie file, used when no user/password is given.
    #[arg(long, env = "BLOCKSCOPE_RPC_COOKIE_FILE")]
    pub rpc_cookie_file: Option<PathBuf>,

    /// Cap on outbound RPC requests per second. Unlimited when omitted.
    #[arg(long, env = "BLOCKSCOPE_RPC_REQUESTS_PER_SECOND")]
    pub rpc_requests_per_second: Option<u32>,

    /// Calls per JSON-RPC batch request.
    #[arg(long, default_value = "50", env = "BLOCKSCOPE_RPC_BATCH_CHUNK_SIZE")]
    pub rpc_batch_chunk_size: usize,

    /// RPC request timeout in seconds.
    #[arg(long, default_value = "30", env = "BLOCKSCOPE_RPC_TIMEOUT_SECS")]
    pub rpc_timeout_secs: u64,

    /// Address to bind the web server to.
    #[arg(long, default_value = "127.0.0.1", env = "BLOCKSCOPE_BIND")]
    pub bind: String,

    /// Port to listen on.
    #[arg(long, default_value = "3001", env = "BLOCKSCOPE_PORT")]
    pub port: u16,

    /// Allowed CORS origin, or `*` for any.
    #[arg(long, default_value = "*", env = "BLOCKSCOPE_CORS_ORIGIN")]
    pub cors_origin: String,

    /// Coin name keying the index's stats and rich-list records.
    #[arg(long, default_value = "BTC", env = "BLOCKSCOPE_COIN")]
    pub coin: String,

    /// Network addresses are validated against (bitcoin, testnet, signet, regtest).
    #[arg(long, default_value = "bitcoin", env = "BLOCKSCOPE_NETWORK")]
    pub network: Network,

    /// JSON Lines index snapshot. Without one only node-backed data is served.
    #[arg(long, env = "BLOCKSCOPE_INDEX_SNAPSHOT")]
    pub index_snapshot: Option<PathBuf>,

    /// TTL in seconds for frequently changing responses.
    #[arg(long, default_value = "5", env = "BLOCKSCOPE_CACHE_SHORT_TTL_SECS")]
    pub cache_short_ttl_secs: u64,

    /// TTL in seconds for slow-moving aggregates.
    #[arg(long, default_value = "60", env = "BLOCKSCOPE_CACHE_LONG_TTL_SECS")]
    pub cache_long_ttl_secs: u64,

    /// Maximum cached responses.
    #[arg(long, default_value = "10000", env = "BLOCKSCOPE_CACHE_MAX_ENTRIES")]
    pub cache_max_entries: usize,

    /// Interval in seconds between expired-entry sweeps.
    #[arg(long, default_value = "30", env = "BLOCKSCOPE_CACHE_SWEEP_SECS")]
    pub cache_sweep_secs: u64,

    /// Behaviour of height-dependent requests before the node is reached.
    #[arg(long, value_enum, default_value = "fail", env = "BLOCKSCOPE_READINESS")]
    pub readiness: ReadinessMode,

    /// Longest a request waits for readiness in `wait` mode, in seconds.
    #[arg(long, default_value = "10", env = "BLOCKSCOPE_READINESS_WAIT_SECS")]
    pub readiness_wait_secs: u64,

    /// Default page size for paged listings.
    #[arg(long, default_value = "10", env = "BLOCKSCOPE_PAGE_SIZE")]
    pub page_size: usize,

    /// Transactions returned by the recent-transactions views.
    #[arg(long, default_value = "100", env = "BLOCKSCOPE_LAST_TXS")]
    pub last_txs: usize,

    /// Supply figure source: `index` or `txoutset`.
    #[arg(long, default_value = "index", env = "BLOCKSCOPE_SUPPLY_SOURCE")]
    pub supply_source: SupplySource,

    /// Expose the extended RPC method set on `/api/{method}`.
    #[arg(long, env = "BLOCKSCOPE_HEAVY")]
    pub heavy: bool,
}
