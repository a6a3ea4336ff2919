//! Read contract over the explorer's persistent index.
//!
//! The indexer that writes these records runs elsewhere; this layer only
//! performs point lookups and list scans. [`MemoryStore`] is the in-process
//! implementation, loadable from a JSON Lines snapshot.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::aggregate::partition_by_balance;
use crate::error::CoreError;
use crate::types::{Address, Bucket, Page, PeerInfo, RichList, Stats, Transaction};

#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Look up an address by its canonical string form.
    async fn get_address(&self, a_id: &str) -> Result<Option<Address>, CoreError>;

    /// Look up a transaction by lowercase hex txid.
    async fn get_tx(&self, txid: &str) -> Result<Option<Transaction>, CoreError>;

    /// Indexed transactions, most recent first.
    async fn get_txs(&self, offset: usize, limit: usize) -> Result<Page<Transaction>, CoreError>;

    /// At most `limit` most recent transactions whose total is at least
    /// `min_value` smallest units.
    async fn get_last_txs(&self, limit: usize, min_value: u64)
        -> Result<Vec<Transaction>, CoreError>;

    async fn get_richlist(&self, coin: &str) -> Result<Option<RichList>, CoreError>;

    async fn get_stats(&self, coin: &str) -> Result<Option<Stats>, CoreError>;

    /// Balance bands over a rich-list snapshot. Stores that keep a
    /// precomputed distribution may override this.
    fn get_distribution(&self, richlist: &RichList, stats: &Stats) -> Vec<Bucket> {
        partition_by_balance(&richlist.balance, stats.supply)
    }

    async fn get_peers(&self) -> Result<Vec<PeerInfo>, CoreError>;
}
