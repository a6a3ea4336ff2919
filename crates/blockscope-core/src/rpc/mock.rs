use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{Amount, BlockHash, Txid};

use crate::error::{CoreError, Entity};
use crate::types::{BlockHeight, PeerInfo};

use super::types::{ChainInfo, RawTransaction, TxOutSetInfo};
use super::NodeRpc;

/// A canned node for tests. Serves transactions and chain data from maps
/// populated via the builder. `set_offline(true)` makes every call fail as an
/// unreachable node would.
pub struct MockNode {
    chain_info: ChainInfo,
    transactions: HashMap<Txid, RawTransaction>,
    fees: HashMap<u32, f64>,
    peers: Vec<PeerInfo>,
    tx_out_set: TxOutSetInfo,
    broadcast: Result<Txid, (i64, String)>,
    raw_results: HashMap<String, serde_json::Value>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl MockNode {
    pub fn builder() -> MockNodeBuilder {
        MockNodeBuilder {
            chain_info: ChainInfo {
                chain: "regtest".into(),
                blocks: 100,
                best_block_hash: BlockHash::all_zeros(),
                difficulty: Some(1.0),
                pruned: false,
                connections: Some(2),
            },
            transactions: HashMap::new(),
            fees: HashMap::new(),
            peers: Vec::new(),
            tx_out_set: TxOutSetInfo {
                height: BlockHeight(100),
                txouts: 0,
                total_amount: Amount::ZERO,
            },
            broadcast: Ok(Txid::all_zeros()),
            raw_results: HashMap::new(),
            offline: false,
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of trait calls answered so far, offline ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<(), CoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(CoreError::UpstreamUnavailable(
                "connection refused".to_owned(),
            ));
        }
        Ok(())
    }
}

pub struct MockNodeBuilder {
    chain_info: ChainInfo,
    transactions: HashMap<Txid, RawTransaction>,
    fees: HashMap<u32, f64>,
    peers: Vec<PeerInfo>,
    tx_out_set: TxOutSetInfo,
    broadcast: Result<Txid, (i64, String)>,
    raw_results: HashMap<String, serde_json::Value>,
    offline: bool,
}

impl MockNodeBuilder {
    pub fn with_height(mut self, height: u32) -> Self {
        self.chain_info.blocks = u64::from(height);
        self.tx_out_set.height = BlockHeight(height);
        self
    }

    pub fn with_chain_info(mut self, info: ChainInfo) -> Self {
        self.chain_info = info;
        self
    }

    pub fn with_tx(mut self, tx: RawTransaction) -> Self {
        self.transactions.insert(tx.txid, tx);
        self
    }

    pub fn with_fee(mut self, blocks: u32, fee_per_kb: f64) -> Self {
        self.fees.insert(blocks, fee_per_kb);
        self
    }

    pub fn with_peer(mut self, peer: PeerInfo) -> Self {
        self.peers.push(peer);
        self
    }

    pub fn with_total_amount(mut self, total: Amount) -> Self {
        self.tx_out_set.total_amount = total;
        self
    }

    pub fn accepting_broadcast(mut self, txid: Txid) -> Self {
        self.broadcast = Ok(txid);
        self
    }

    pub fn rejecting_broadcast(mut self, code: i64, reason: &str) -> Self {
        self.broadcast = Err((code, reason.to_owned()));
        self
    }

    pub fn with_raw_result(mut self, method: &str, result: serde_json::Value) -> Self {
        self.raw_results.insert(method.to_owned(), result);
        self
    }

    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    pub fn build(self) -> MockNode {
        MockNode {
            chain_info: self.chain_info,
            transactions: self.transactions,
            fees: self.fees,
            peers: self.peers,
            tx_out_set: self.tx_out_set,
            broadcast: self.broadcast,
            raw_results: self.raw_results,
            offline: AtomicBool::new(self.offline),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl NodeRpc for MockNode {
    async fn get_info(&self) -> Result<ChainInfo, CoreError> {
        self.enter()?;
        Ok(self.chain_info.clone())
    }

    async fn get_block_count(&self) -> Result<BlockHeight, CoreError> {
        self.enter()?;
        let blocks = u32::try_from(self.chain_info.blocks)
            .map_err(|_| CoreError::Internal("mock height out of range".into()))?;
        Ok(BlockHeight(blocks))
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> Result<RawTransaction, CoreError> {
        self.enter()?;
        self.transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| CoreError::not_found(Entity::Tx, txid.to_string()))
    }

    async fn estimate_fee(&self, blocks: u32) -> Result<Option<f64>, CoreError> {
        self.enter()?;
        Ok(self.fees.get(&blocks).copied())
    }

    async fn send_raw_transaction(&self, _raw_hex: &str) -> Result<Txid, CoreError> {
        self.enter()?;
        self.broadcast
            .clone()
            .map_err(|(code, reason)| CoreError::BroadcastRejected { code, reason })
    }

    async fn get_peer_info(&self) -> Result<Vec<PeerInfo>, CoreError> {
        self.enter()?;
        Ok(self.peers.clone())
    }

    async fn get_tx_out_set_info(&self) -> Result<TxOutSetInfo, CoreError> {
        self.enter()?;
        Ok(self.tx_out_set.clone())
    }

    async fn call(
        &self,
        method: &str,
        _params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, CoreError> {
        self.enter()?;
        self.raw_results.get(method).cloned().ok_or_else(|| {
            crate::error::RpcError::ServerError {
                code: -32601,
                message: "Method not found".to_owned(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;

    #[tokio::test]
    async fn with_height_sets_block_count() {
        let rpc = MockNode::builder().with_height(800_000).build();
        let height = rpc.get_block_count().await.expect("online");
        assert_eq!(height, BlockHeight(800_000));
    }

    #[tokio::test]
    async fn unknown_tx_is_not_found() {
        let rpc = MockNode::builder().build();
        let err = rpc
            .get_raw_transaction(&txid_from_byte(9))
            .await
            .expect_err("unknown tx");
        assert!(matches!(err, CoreError::NotFound { entity: Entity::Tx, .. }));
    }

    #[tokio::test]
    async fn offline_node_reports_upstream_unavailable_and_counts_calls() {
        let rpc = MockNode::builder().offline().build();
        let err = rpc.get_info().await.expect_err("offline");
        assert!(matches!(err, CoreError::UpstreamUnavailable(_)));
        assert_eq!(rpc.calls(), 1);

        rpc.set_offline(false);
        assert!(rpc.get_info().await.is_ok());
        assert_eq!(rpc.calls(), 2);
    }

    #[tokio::test]
    async fn default_batch_fetch_preserves_order() {
        let a = raw_tx(txid_from_byte(1), vec![coinbase_input()], vec![p2wpkh_output(10, 1)]);
        let b = raw_tx(txid_from_byte(2), vec![coinbase_input()], vec![p2wpkh_output(20, 2)]);
        let rpc = MockNode::builder().with_tx(a).with_tx(b).build();

        let txs = rpc
            .get_raw_transactions(&[txid_from_byte(2), txid_from_byte(1)])
            .await
            .expect("both known");
        assert_eq!(txs[0].txid, txid_from_byte(2));
        assert_eq!(txs[1].txid, txid_from_byte(1));
    }
}
