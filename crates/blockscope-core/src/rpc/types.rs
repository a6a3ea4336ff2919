//! Shapes returned by the node RPC layer.
//!
//! These stay close to what the node reports. The hybrid node reshapes
//! [`RawTransaction`] into the canonical indexed
//! [`Transaction`](crate::types::Transaction).

use bitcoin::{Amount, BlockHash, OutPoint, ScriptBuf, Txid};
use serde::Deserialize;

use crate::types::BlockHeight;

// ==============================================================================
// Chain Info
// ==============================================================================

/// Basic chain information from `getblockchaininfo`, plus the peer count.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainInfo {
    pub chain: String,
    pub blocks: u64,
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: BlockHash,
    #[serde(default)]
    pub difficulty: Option<f64>,
    #[serde(default)]
    pub pruned: bool,
    #[serde(default)]
    pub connections: Option<u32>,
}

/// Aggregate UTXO-set figures from `gettxoutsetinfo`.
#[derive(Debug, Clone, PartialEq)]
pub struct TxOutSetInfo {
    pub height: BlockHeight,
    pub txouts: u64,
    pub total_amount: Amount,
}

// ==============================================================================
// Raw Transactions
// ==============================================================================

/// A decoded transaction as returned by `getrawtransaction` (verbose).
#[derive(Debug, Clone)]
pub struct RawTransaction {
    pub txid: Txid,
    pub block_hash: Option<BlockHash>,
    /// Resolved from the block header when the node omits it.
    pub block_height: Option<BlockHeight>,
    pub block_time: Option<u64>,
    pub confirmations: Option<u64>,
    pub inputs: Vec<RawInput>,
    pub outputs: Vec<RawOutput>,
}

impl RawTransaction {
    /// A coinbase transaction has exactly one input without a prevout.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_none()
    }
}

/// A raw input. `value` and `script_pub_key` are only present when the
/// node reported the spent output inline (verbosity 2).
#[derive(Debug, Clone)]
pub struct RawInput {
    pub prevout: Option<OutPoint>,
    pub value: Option<Amount>,
    pub script_pub_key: Option<ScriptBuf>,
}

#[derive(Debug, Clone)]
pub struct RawOutput {
    pub value: Amount,
    pub script_pub_key: ScriptBuf,
}
