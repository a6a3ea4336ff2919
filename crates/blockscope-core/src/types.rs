//! Domain types for the explorer read gateway.
//!
//! Indexed records (`Address`, `Transaction`, aggregate snapshots) are kept
//! in smallest units exactly as the index stores them. The `*View` types are
//! the presented shapes, with monetary fields converted to display units.

use bitcoin::{Amount, SignedAmount};
use serde::{Deserialize, Serialize};

// ==============================================================================
// Amount Conversion
// ==============================================================================

/// Smallest units per display unit.
pub const COIN: u64 = 100_000_000;

/// Convert a smallest-unit amount to display units.
#[must_use]
pub fn to_display(sats: u64) -> f64 {
    Amount::from_sat(sats).to_btc()
}

/// Display form of a stored balance. The index may transiently hold
/// `received - sent` below zero; the sign is dropped for display only.
#[must_use]
pub fn display_balance(balance: i64) -> f64 {
    SignedAmount::from_sat(balance).unsigned_abs().to_btc()
}

/// Scale a caller-supplied display-unit threshold to smallest units,
/// rounding to the nearest unit. `None` for negative, non-finite or
/// out-of-range input.
pub fn from_display(amount: f64) -> Option<u64> {
    if !amount.is_finite() || amount < 0.0 {
        return None;
    }
    let scaled = (amount * COIN as f64).round();
    (scaled < u64::MAX as f64).then_some(scaled as u64)
}

// ==============================================================================
// Block Height
// ==============================================================================

/// A block height, wrapped for type safety.
///
/// `#[serde(transparent)]` keeps the JSON form a bare integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHeight(pub u32);

impl From<u32> for BlockHeight {
    fn from(h: u32) -> Self {
        Self(h)
    }
}

impl std::ops::Deref for BlockHeight {
    type Target = u32;
    fn deref(&self) -> &u32 {
        &self.0
    }
}

impl std::fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl BlockHeight {
    /// Confirmations of something mined at `self` with the chain tip at `tip`.
    #[must_use]
    pub fn confirmations_at(self, tip: BlockHeight) -> u64 {
        u64::from(tip.saturating_sub(self.0)) + 1
    }
}

// ==============================================================================
// Indexed Records
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxDirection {
    Vin,
    Vout,
}

/// A transaction reference in an address's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressTxRef {
    pub txid: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<TxDirection>,
}

/// An unspent output as kept on the address record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub txid: String,
    pub index: u32,
    /// Hex-encoded scriptPubKey.
    pub script: String,
    pub amount: u64,
    /// Height of the funding block, when the indexer recorded it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<BlockHeight>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub a_id: String,
    pub sent: i64,
    pub received: i64,
    pub balance: i64,
    /// Newest first.
    #[serde(default)]
    pub txs: Vec<AddressTxRef>,
    #[serde(default)]
    pub unspent: Vec<UnspentOutput>,
}

/// One side of a transaction as the index records it: a resolved address
/// (or a marker such as `coinbase` / `nonstandard`) and an amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIo {
    pub addresses: String,
    pub amount: u64,
}

/// Canonical transaction shape. Produced identically by the index and by
/// the node fallback path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    /// `None` while the transaction is still in the mempool.
    pub blockindex: Option<BlockHeight>,
    pub timestamp: u64,
    pub total: u64,
    pub vin: Vec<TxIo>,
    pub vout: Vec<TxIo>,
}

impl Transaction {
    /// Sort key for newest-first ordering: unconfirmed before confirmed,
    /// then higher blocks, then later timestamps.
    #[must_use]
    pub fn recency(&self) -> (bool, u32, u64) {
        (
            self.blockindex.is_none(),
            self.blockindex.map_or(0, |h| h.0),
            self.timestamp,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichListEntry {
    pub address: String,
    pub balance: i64,
}

/// Top-address snapshot maintained by the indexer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichList {
    pub coin: String,
    #[serde(default)]
    pub balance: Vec<RichListEntry>,
    #[serde(default)]
    pub received: Vec<RichListEntry>,
}

/// Global network statistics maintained by the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub coin: String,
    /// Transactions indexed so far.
    pub count: u64,
    /// Last indexed block.
    pub last: BlockHeight,
    /// Circulating supply in smallest units.
    pub supply: u64,
    #[serde(default)]
    pub connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub address: String,
    #[serde(default)]
    pub protocol: Option<u32>,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

// ==============================================================================
// Presented Shapes
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressView {
    pub address: String,
    pub sent: f64,
    pub received: f64,
    pub balance: f64,
    pub last_txs: Vec<AddressTxRef>,
    /// Present only when full transactions were requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txs: Option<Vec<TxView>>,
}

impl AddressView {
    pub fn from_address(address: &Address) -> Self {
        Self {
            address: address.a_id.clone(),
            sent: display_balance(address.sent),
            received: display_balance(address.received),
            balance: display_balance(address.balance),
            last_txs: address.txs.clone(),
            txs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxIoView {
    pub addresses: String,
    pub amount: f64,
}

impl From<&TxIo> for TxIoView {
    fn from(io: &TxIo) -> Self {
        Self {
            addresses: io.addresses.clone(),
            amount: to_display(io.amount),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxView {
    pub txid: String,
    pub blockindex: Option<BlockHeight>,
    pub timestamp: u64,
    pub total: f64,
    pub inputs: Vec<TxIoView>,
    pub outputs: Vec<TxIoView>,
}

impl From<&Transaction> for TxView {
    fn from(tx: &Transaction) -> Self {
        Self {
            txid: tx.txid.clone(),
            blockindex: tx.blockindex,
            timestamp: tx.timestamp,
            total: to_display(tx.total),
            inputs: tx.vin.iter().map(TxIoView::from).collect(),
            outputs: tx.vout.iter().map(TxIoView::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub txid: String,
    pub blockindex: Option<BlockHeight>,
    pub timestamp: u64,
    pub total: f64,
}

impl From<&Transaction> for TransactionSummary {
    fn from(tx: &Transaction) -> Self {
        Self {
            txid: tx.txid.clone(),
            blockindex: tx.blockindex,
            timestamp: tx.timestamp,
            total: to_display(tx.total),
        }
    }
}

/// A page of results with the window that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(rename = "totalItems")]
    pub total_items: usize,
    pub from: usize,
    pub to: usize,
    pub items: Vec<T>,
}

/// Presented UTXO. `confirmations` stays `None` until the gateway can
/// resolve it against a trustworthy chain height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtxoRecord {
    pub txid: String,
    pub vout: u32,
    pub address: String,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: String,
    pub amount: f64,
    pub satoshis: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<BlockHeight>,
    pub confirmations: Option<u64>,
}

impl UtxoRecord {
    pub fn from_unspent(address: &str, unspent: &UnspentOutput) -> Self {
        Self {
            txid: unspent.txid.clone(),
            vout: unspent.index,
            address: address.to_owned(),
            script_pub_key: unspent.script.clone(),
            amount: to_display(unspent.amount),
            satoshis: unspent.amount,
            height: unspent.height,
            confirmations: None,
        }
    }
}

/// A balance band in the rich-list distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub label: String,
    /// Inclusive lower bound, display units.
    pub min: f64,
    /// Exclusive upper bound, display units; `None` for the open top band.
    pub max: Option<f64>,
    pub count: usize,
    pub total: f64,
    /// Share of circulating supply held by the band, in percent.
    pub percent: f64,
}

/// Chain height with an explicit freshness flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightReport {
    pub height: BlockHeight,
    /// `true` when the node was unreachable and the last known height was
    /// served instead.
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub chain: Option<String>,
    pub blocks: BlockHeight,
    pub difficulty: Option<f64>,
    pub connections: Option<u32>,
    pub stale: bool,
}
