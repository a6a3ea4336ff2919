//! Full-node RPC abstraction layer.
//!
//! Defines the [`NodeRpc`] trait and provides an HTTP JSON-RPC
//! implementation ([`HttpRpcClient`]) plus a test mock (`mock::MockNode`).

mod http_adapter;
#[cfg(test)]
pub mod mock;
pub mod types;

pub use http_adapter::{HttpRpcClient, RpcSettings};
pub use types::{ChainInfo, RawInput, RawOutput, RawTransaction, TxOutSetInfo};

use async_trait::async_trait;
use bitcoin::Txid;

use crate::error::CoreError;
use crate::types::{BlockHeight, PeerInfo};

/// The node RPC methods the gateway needs.
///
/// Implementations own authentication, connection management and response
/// decoding. Transport failures surface as
/// [`CoreError::UpstreamUnavailable`]; errors reported by the node itself are
/// preserved, never collapsed into a generic failure.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Chain name, tip, difficulty and peer count.
    async fn get_info(&self) -> Result<ChainInfo, CoreError>;

    async fn get_block_count(&self) -> Result<BlockHeight, CoreError>;

    /// Fetch a decoded transaction. Unknown txids map to
    /// [`CoreError::NotFound`].
    async fn get_raw_transaction(&self, txid: &Txid) -> Result<RawTransaction, CoreError>;

    /// Fetch many decoded transactions. Implementations may batch these
    /// into one or more RPC calls.
    async fn get_raw_transactions(&self, txids: &[Txid]) -> Result<Vec<RawTransaction>, CoreError> {
        let mut results = Vec::with_capacity(txids.len());
        for txid in txids {
            results.push(self.get_raw_transaction(txid).await?);
        }
        Ok(results)
    }

    /// Fee per kilobyte, in display units, for confirmation within
    /// `blocks`. `None` when the node has no estimate yet.
    async fn estimate_fee(&self, blocks: u32) -> Result<Option<f64>, CoreError>;

    /// Submit a hex-encoded transaction. A refusal by the node maps to
    /// [`CoreError::BroadcastRejected`] carrying the node's reason.
    async fn send_raw_transaction(&self, raw_hex: &str) -> Result<Txid, CoreError>;

    async fn get_peer_info(&self) -> Result<Vec<PeerInfo>, CoreError>;

    async fn get_tx_out_set_info(&self) -> Result<TxOutSetInfo, CoreError>;

    /// Untyped passthrough, used for whitelisted raw method access.
    async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, CoreError>;
}
