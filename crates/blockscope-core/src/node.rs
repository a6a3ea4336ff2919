//! The hybrid node: one view over the remote node RPC and the local index.
//!
//! Field sources, in fallback order:
//!
//! | field        | first            | then                               |
//! |--------------|------------------|------------------------------------|
//! | height/info  | node             | last known height, then index stats (`stale`) |
//! | transaction  | index            | node, inputs resolved via funding txs |
//! | fee, send    | node             | none; node errors pass through     |
//! | money supply | per [`SupplySource`] | none                           |
//! | peers        | index            | node `getpeerinfo`                 |

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bitcoin::{Network, ScriptBuf, Txid};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{CoreError, RpcError};
use crate::rpc::{NodeRpc, RawTransaction};
use crate::store::IndexStore;
use crate::types::{BlockHeight, HeightReport, NodeStatus, PeerInfo, Transaction, TxIo};

/// Marker for inputs that create new coins.
pub const COINBASE_MARKER: &str = "coinbase";
/// Marker for outputs whose script has no address form.
pub const NONSTANDARD_MARKER: &str = "nonstandard";

const UNKNOWN_HEIGHT: u64 = u64::MAX;
const START_BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const START_BACKOFF_MAX: Duration = Duration::from_secs(30);

// ==============================================================================
// Configuration
// ==============================================================================

/// What height-dependent operations do before the node has been reached once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessPolicy {
    /// Answer `NotReady` immediately.
    Fail,
    /// Wait for readiness, up to the given timeout, then answer `NotReady`.
    Wait(Duration),
}

/// Where circulating supply figures come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupplySource {
    /// The indexer's stats record.
    #[default]
    Index,
    /// The node's `gettxoutsetinfo` total. Slow on large chains.
    TxOutSet,
}

impl FromStr for SupplySource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "index" => Ok(Self::Index),
            "txoutset" | "gettxoutsetinfo" => Ok(Self::TxOutSet),
            other => Err(CoreError::Config(format!(
                "unknown supply source `{other}`; expected index or txoutset"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Coin name keying the index's aggregate records.
    pub coin: String,
    pub network: Network,
    pub readiness: ReadinessPolicy,
    pub supply_source: SupplySource,
}

// ==============================================================================
// Hybrid Node
// ==============================================================================

pub struct HybridNode {
    rpc: Arc<dyn NodeRpc>,
    store: Arc<dyn IndexStore>,
    config: NodeConfig,
    ready: watch::Sender<bool>,
    last_height: AtomicU64,
}

impl HybridNode {
    pub fn new(rpc: Arc<dyn NodeRpc>, store: Arc<dyn IndexStore>, config: NodeConfig) -> Self {
        Self {
            rpc,
            store,
            config,
            ready: watch::Sender::new(false),
            last_height: AtomicU64::new(UNKNOWN_HEIGHT),
        }
    }

    pub fn rpc(&self) -> &Arc<dyn NodeRpc> {
        &self.rpc
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn network(&self) -> Network {
        self.config.network
    }

    // ==========================================================================
    // Readiness
    // ==========================================================================

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Reach the node once and record its height. Readiness flips on the
    /// first success and never flips back.
    pub async fn start(&self) -> Result<BlockHeight, CoreError> {
        let height = self.rpc.get_block_count().await?;
        self.record_height(height);
        let was_ready = self.ready.send_replace(true);
        if !was_ready {
            info!(height = %height, "node ready");
        }
        Ok(height)
    }

    /// Run [`HybridNode::start`] in the background, retrying with capped
    /// exponential backoff until the node answers.
    pub fn spawn_start(self: &Arc<Self>) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let mut backoff = START_BACKOFF_INITIAL;
            loop {
                match node.start().await {
                    Ok(_) => return,
                    Err(err) => {
                        warn!(error = %err, retry_in = ?backoff, "node not reachable yet");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(START_BACKOFF_MAX);
                    }
                }
            }
        })
    }

    /// Gate for height-dependent operations, applying the readiness policy.
    pub async fn ensure_ready(&self) -> Result<(), CoreError> {
        if self.is_ready() {
            return Ok(());
        }
        match self.config.readiness {
            ReadinessPolicy::Fail => Err(CoreError::NotReady),
            ReadinessPolicy::Wait(timeout) => {
                let mut rx = self.ready.subscribe();
                let reached = tokio::time::timeout(timeout, rx.wait_for(|ready| *ready))
                    .await
                    .is_ok_and(|changed| changed.is_ok());
                if reached {
                    Ok(())
                } else {
                    Err(CoreError::NotReady)
                }
            }
        }
    }

    fn record_height(&self, height: BlockHeight) {
        self.last_height.store(u64::from(height.0), Ordering::Relaxed);
    }

    fn last_known_height(&self) -> Option<BlockHeight> {
        let raw = self.last_height.load(Ordering::Relaxed);
        (raw != UNKNOWN_HEIGHT)
            .then(|| u32::try_from(raw).ok().map(BlockHeight))
            .flatten()
    }

    /// Last known height, else the index's last indexed block.
    async fn fallback_height(&self, cause: CoreError) -> Result<BlockHeight, CoreError> {
        if let Some(height) = self.last_known_height() {
            return Ok(height);
        }
        match self.store.get_stats(&self.config.coin).await? {
            Some(stats) => Ok(stats.last),
            None => Err(cause),
        }
    }

    // ==========================================================================
    // Chain State
    // ==========================================================================

    pub async fn get_height(&self) -> Result<HeightReport, CoreError> {
        self.ensure_ready().await?;
        match self.rpc.get_block_count().await {
            Ok(height) => {
                self.record_height(height);
                Ok(HeightReport {
                    height,
                    stale: false,
                })
            }
            Err(err @ CoreError::UpstreamUnavailable(_)) => {
                warn!(error = %err, "node unreachable; serving last known height");
                let height = self.fallback_height(err).await?;
                Ok(HeightReport {
                    height,
                    stale: true,
                })
            }
            Err(err) => Err(err),
        }
    }

    pub async fn get_info(&self) -> Result<NodeStatus, CoreError> {
        self.ensure_ready().await?;
        match self.rpc.get_info().await {
            Ok(info) => {
                let blocks = BlockHeight(u32::try_from(info.blocks).map_err(|_| {
                    CoreError::Internal(format!("node height out of range: {}", info.blocks))
                })?);
                self.record_height(blocks);
                Ok(NodeStatus {
                    chain: Some(info.chain),
                    blocks,
                    difficulty: info.difficulty,
                    connections: info.connections,
                    stale: false,
                })
            }
            Err(err @ CoreError::UpstreamUnavailable(_)) => {
                warn!(error = %err, "node unreachable; serving stale status");
                let connections = self
                    .store
                    .get_stats(&self.config.coin)
                    .await?
                    .map(|stats| stats.connections);
                let blocks = self.fallback_height(err).await?;
                Ok(NodeStatus {
                    chain: None,
                    blocks,
                    difficulty: None,
                    connections,
                    stale: true,
                })
            }
            Err(err) => Err(err),
        }
    }

    // ==========================================================================
    // Transactions
    // ==========================================================================

    /// Index first; otherwise fetched from the node and shaped exactly like
    /// an indexed record.
    pub async fn get_transaction(&self, txid: &Txid) -> Result<Transaction, CoreError> {
        let key = txid.to_string();
        if let Some(tx) = self.store.get_tx(&key).await? {
            return Ok(tx);
        }
        debug!(%txid, "tx not indexed; asking node");
        let raw = self.rpc.get_raw_transaction(txid).await?;
        self.shape_transaction(raw).await
    }

    async fn shape_transaction(&self, raw: RawTransaction) -> Result<Transaction, CoreError> {
        let outputs: Vec<TxIo> = raw
            .outputs
            .iter()
            .map(|output| TxIo {
                addresses: self.address_label(&output.script_pub_key),
                amount: output.value.to_sat(),
            })
            .collect();
        let total = outputs.iter().map(|io| io.amount).sum();

        let inputs = if raw.is_coinbase() {
            vec![TxIo {
                addresses: COINBASE_MARKER.to_owned(),
                amount: total,
            }]
        } else {
            self.resolve_inputs(&raw).await?
        };

        Ok(Transaction {
            txid: raw.txid.to_string(),
            blockindex: raw.block_height,
            // Mempool transactions carry no block time.
            timestamp: raw.block_time.unwrap_or_default(),
            total,
            vin: merge_by_address(inputs),
            vout: merge_by_address(outputs),
        })
    }

    /// Resolve every input to its funding output. Inputs the node already
    /// annotated are used as-is; the rest are fetched in one batch.
    async fn resolve_inputs(&self, raw: &RawTransaction) -> Result<Vec<TxIo>, CoreError> {
        let mut missing: Vec<Txid> = raw
            .inputs
            .iter()
            .filter(|input| input.value.is_none() || input.script_pub_key.is_none())
            .filter_map(|input| input.prevout.map(|prevout| prevout.txid))
            .collect();
        missing.sort_unstable();
        missing.dedup();

        let funding: HashMap<Txid, RawTransaction> = self
            .rpc
            .get_raw_transactions(&missing)
            .await
            .map_err(|err| match err {
                CoreError::NotFound { id, .. } => missing_funding(&raw.txid, &id),
                other => other,
            })?
            .into_iter()
            .map(|tx| (tx.txid, tx))
            .collect();

        raw.inputs
            .iter()
            .filter_map(|input| input.prevout.map(|prevout| (input, prevout)))
            .map(|(input, prevout)| {
                if let (Some(value), Some(script)) = (input.value, &input.script_pub_key) {
                    return Ok(TxIo {
                        addresses: self.address_label(script),
                        amount: value.to_sat(),
                    });
                }
                let output = funding
                    .get(&prevout.txid)
                    .and_then(|tx| tx.outputs.get(prevout.vout as usize))
                    .ok_or_else(|| missing_funding(&raw.txid, &prevout.txid))?;
                Ok(TxIo {
                    addresses: self.address_label(&output.script_pub_key),
                    amount: output.value.to_sat(),
                })
            })
            .collect()
    }

    fn address_label(&self, script: &ScriptBuf) -> String {
        bitcoin::Address::from_script(script, self.config.network)
            .map(|address| address.to_string())
            .unwrap_or_else(|_| NONSTANDARD_MARKER.to_owned())
    }

    // ==========================================================================
    // Node Passthrough
    // ==========================================================================

    pub async fn estimate_fee(&self, blocks: u32) -> Result<Option<f64>, CoreError> {
        self.rpc.estimate_fee(blocks).await
    }

    pub async fn broadcast(&self, raw_hex: &str) -> Result<Txid, CoreError> {
        let txid = self.rpc.send_raw_transaction(raw_hex).await?;
        info!(%txid, "transaction broadcast");
        Ok(txid)
    }

    pub async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, CoreError> {
        self.rpc.call(method, params).await
    }

    // ==========================================================================
    // Aggregate Sources
    // ==========================================================================

    /// Circulating supply in smallest units.
    pub async fn money_supply(&self) -> Result<u64, CoreError> {
        match self.config.supply_source {
            SupplySource::Index => self
                .store
                .get_stats(&self.config.coin)
                .await?
                .map(|stats| stats.supply)
                .ok_or_else(|| {
                    CoreError::Store(format!("no stats record for coin {}", self.config.coin))
                }),
            SupplySource::TxOutSet => {
                Ok(self.rpc.get_tx_out_set_info().await?.total_amount.to_sat())
            }
        }
    }

    pub async fn peers(&self) -> Result<Vec<PeerInfo>, CoreError> {
        let peers = self.store.get_peers().await?;
        if !peers.is_empty() {
            return Ok(peers);
        }
        self.rpc.get_peer_info().await
    }
}

/// A spending transaction whose funding output the node cannot produce is a
/// node-side fault, not a lookup miss for the transaction asked about.
fn missing_funding(txid: &Txid, funding: &dyn std::fmt::Display) -> CoreError {
    CoreError::Rpc(RpcError::InvalidResponse(format!(
        "funding transaction {funding} of {txid} is unavailable; is txindex enabled?"
    )))
}

/// Fold entries paying the same address into one, keeping first-seen order.
fn merge_by_address(entries: Vec<TxIo>) -> Vec<TxIo> {
    let mut merged: Vec<TxIo> = Vec::with_capacity(entries.len());
    for entry in entries {
        match merged.iter_mut().find(|m| m.addresses == entry.addresses) {
            Some(existing) => existing.amount += entry.amount,
            None => merged.push(entry),
        }
    }
    merged
}
