use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::types::{Address, Page, PeerInfo, RichList, Stats, Transaction};

use super::IndexStore;

/// One line of an index snapshot file.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum SnapshotRecord {
    Address(Address),
    Tx(Transaction),
    Richlist(RichList),
    Stats(Stats),
    Peer(PeerInfo),
}

#[derive(Debug, Default)]
struct Snapshot {
    addresses: HashMap<String, Address>,
    txs: HashMap<String, Transaction>,
    richlists: HashMap<String, RichList>,
    stats: HashMap<String, Stats>,
    peers: Vec<PeerInfo>,
}

impl Snapshot {
    fn insert(&mut self, record: SnapshotRecord, line: usize) {
        match record {
            SnapshotRecord::Address(address) => {
                if self.addresses.contains_key(&address.a_id) {
                    warn!(
                        line,
                        address = %address.a_id,
                        "duplicate address record overwrites previous value"
                    );
                }
                self.addresses.insert(address.a_id.clone(), address);
            }
            SnapshotRecord::Tx(mut tx) => {
                tx.txid.make_ascii_lowercase();
                if self.txs.contains_key(&tx.txid) {
                    warn!(line, txid = %tx.txid, "duplicate tx record overwrites previous value");
                }
                self.txs.insert(tx.txid.clone(), tx);
            }
            SnapshotRecord::Richlist(richlist) => {
                if self.richlists.contains_key(&richlist.coin) {
                    warn!(
                        line,
                        coin = %richlist.coin,
                        "duplicate richlist record overwrites previous value"
                    );
                }
                self.richlists.insert(richlist.coin.clone(), richlist);
            }
            SnapshotRecord::Stats(stats) => {
                if self.stats.contains_key(&stats.coin) {
                    warn!(
                        line,
                        coin = %stats.coin,
                        "duplicate stats record overwrites previous value"
                    );
                }
                self.stats.insert(stats.coin.clone(), stats);
            }
            SnapshotRecord::Peer(peer) => {
                if let Some(existing) = self.peers.iter_mut().find(|p| p.address == peer.address) {
                    warn!(
                        line,
                        peer = %peer.address,
                        "duplicate peer record overwrites previous value"
                    );
                    *existing = peer;
                } else {
                    self.peers.push(peer);
                }
            }
        }
    }

    /// Newest first; txid breaks ties so paging is stable.
    fn txs_by_recency(&self) -> Vec<&Transaction> {
        let mut txs: Vec<&Transaction> = self.txs.values().collect();
        txs.sort_by(|a, b| {
            b.recency()
                .cmp(&a.recency())
                .then_with(|| a.txid.cmp(&b.txid))
        });
        txs
    }
}

/// Parse JSON Lines snapshot content, skipping blank lines. Duplicate
/// records are accepted but logged; the later line wins.
fn parse_snapshot(content: &str) -> Result<Snapshot, CoreError> {
    content
        .lines()
        .enumerate()
        .try_fold(Snapshot::default(), |mut snapshot, (line_num, line)| {
            let line = line.trim();
            if line.is_empty() {
                return Ok(snapshot);
            }

            let record: SnapshotRecord =
                serde_json::from_str(line).map_err(|e| CoreError::SnapshotParse {
                    line: line_num + 1,
                    message: e.to_string(),
                })?;
            snapshot.insert(record, line_num + 1);
            Ok(snapshot)
        })
}

/// In-memory [`IndexStore`].
///
/// Built empty and filled through the `insert_*` methods, or loaded from a
/// snapshot file. [`MemoryStore::reload`] swaps in a fresh snapshot while
/// the store is shared.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Snapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_jsonl(path: &Path) -> Result<Self, CoreError> {
        let snapshot = read_snapshot(path)?;
        Ok(Self {
            inner: RwLock::new(snapshot),
        })
    }

    pub fn from_jsonl_str(content: &str) -> Result<Self, CoreError> {
        Ok(Self {
            inner: RwLock::new(parse_snapshot(content)?),
        })
    }

    /// Replace the whole snapshot. On a parse failure the current data is
    /// kept.
    pub async fn reload(&self, path: &Path) -> Result<(), CoreError> {
        let snapshot = read_snapshot(path)?;
        *self.inner.write().await = snapshot;
        Ok(())
    }

    pub fn insert_address(&mut self, address: Address) {
        self.inner
            .get_mut()
            .insert(SnapshotRecord::Address(address), 0);
    }

    pub fn insert_tx(&mut self, tx: Transaction) {
        self.inner.get_mut().insert(SnapshotRecord::Tx(tx), 0);
    }

    pub fn insert_richlist(&mut self, richlist: RichList) {
        self.inner
            .get_mut()
            .insert(SnapshotRecord::Richlist(richlist), 0);
    }

    pub fn insert_stats(&mut self, stats: Stats) {
        self.inner.get_mut().insert(SnapshotRecord::Stats(stats), 0);
    }

    pub fn insert_peer(&mut self, peer: PeerInfo) {
        self.inner.get_mut().insert(SnapshotRecord::Peer(peer), 0);
    }
}

fn read_snapshot(path: &Path) -> Result<Snapshot, CoreError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CoreError::Store(format!("read index snapshot {}: {e}", path.display())))?;
    let snapshot = parse_snapshot(&content)?;
    info!(
        path = %path.display(),
        addresses = snapshot.addresses.len(),
        txs = snapshot.txs.len(),
        peers = snapshot.peers.len(),
        "loaded index snapshot"
    );
    Ok(snapshot)
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn get_address(&self, a_id: &str) -> Result<Option<Address>, CoreError> {
        Ok(self.inner.read().await.addresses.get(a_id).cloned())
    }

    async fn get_tx(&self, txid: &str) -> Result<Option<Transaction>, CoreError> {
        Ok(self.inner.read().await.txs.get(txid).cloned())
    }

    async fn get_txs(&self, offset: usize, limit: usize) -> Result<Page<Transaction>, CoreError> {
        let snapshot = self.inner.read().await;
        let ordered = snapshot.txs_by_recency();
        let total_items = ordered.len();
        let items: Vec<Transaction> = ordered
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok(Page {
            total_items,
            from: offset,
            to: offset + items.len(),
            items,
        })
    }

    async fn get_last_txs(
        &self,
        limit: usize,
        min_value: u64,
    ) -> Result<Vec<Transaction>, CoreError> {
        let snapshot = self.inner.read().await;
        Ok(snapshot
            .txs_by_recency()
            .into_iter()
            .filter(|tx| tx.total >= min_value)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_richlist(&self, coin: &str) -> Result<Option<RichList>, CoreError> {
        Ok(self.inner.read().await.richlists.get(coin).cloned())
    }

    async fn get_stats(&self, coin: &str) -> Result<Option<Stats>, CoreError> {
        Ok(self.inner.read().await.stats.get(coin).cloned())
    }

    async fn get_peers(&self) -> Result<Vec<PeerInfo>, CoreError> {
        Ok(self.inner.read().await.peers.clone())
    }
}
