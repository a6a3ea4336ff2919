//! Aggregates over the index and node: supply, balance distribution, recent
//! transactions and peers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::node::HybridNode;
use crate::types::{
    from_display, to_display, Bucket, PeerInfo, RichListEntry, TransactionSummary, COIN,
};

/// Lower band edges in display units; each band runs up to the next edge.
const BAND_EDGES: [u64; 7] = [0, 1, 10, 100, 1_000, 10_000, 100_000];
const BAND_LABELS: [&str; 7] = [
    "0-1", "1-10", "10-100", "100-1k", "1k-10k", "10k-100k", "100k+",
];

/// Partition balances into the fixed bands. Every entry lands in exactly
/// one band, using its absolute balance.
pub fn partition_by_balance(entries: &[RichListEntry], supply: u64) -> Vec<Bucket> {
    let mut counts = [0usize; BAND_EDGES.len()];
    let mut totals = [0u64; BAND_EDGES.len()];

    for entry in entries {
        let balance = entry.balance.unsigned_abs();
        let band = BAND_EDGES
            .iter()
            .rposition(|edge| balance >= edge * COIN)
            .unwrap_or(0);
        counts[band] += 1;
        totals[band] = totals[band].saturating_add(balance);
    }

    (0..BAND_EDGES.len())
        .map(|band| Bucket {
            label: BAND_LABELS[band].to_owned(),
            min: BAND_EDGES[band] as f64,
            max: BAND_EDGES.get(band + 1).map(|edge| *edge as f64),
            count: counts[band],
            total: to_display(totals[band]),
            percent: share_of(totals[band], supply),
        })
        .collect()
}

fn share_of(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

/// Rich-list distribution as presented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    /// Circulating supply the percentages refer to, display units.
    pub supply: f64,
    /// Addresses in the rich-list snapshot.
    pub addresses: usize,
    pub buckets: Vec<Bucket>,
}

// ==============================================================================
// Aggregation Service
// ==============================================================================

pub struct AggregationService {
    node: Arc<HybridNode>,
    last_txs_limit: usize,
}

impl AggregationService {
    pub fn new(node: Arc<HybridNode>, last_txs_limit: usize) -> Self {
        Self {
            node,
            last_txs_limit,
        }
    }

    /// Circulating supply in display units.
    pub async fn money_supply(&self) -> Result<f64, CoreError> {
        Ok(to_display(self.node.money_supply().await?))
    }

    pub async fn rich_list_distribution(&self) -> Result<Distribution, CoreError> {
        let coin = &self.node.config().coin;
        let store = self.node.store();
        let richlist = store
            .get_richlist(coin)
            .await?
            .ok_or_else(|| CoreError::Store(format!("no richlist record for coin {coin}")))?;
        let stats = store
            .get_stats(coin)
            .await?
            .ok_or_else(|| CoreError::Store(format!("no stats record for coin {coin}")))?;

        Ok(Distribution {
            supply: to_display(stats.supply),
            addresses: richlist.balance.len(),
            buckets: store.get_distribution(&richlist, &stats),
        })
    }

    /// Most recent transactions whose total is at or above `min_display`.
    pub async fn recent_transactions(
        &self,
        min_display: f64,
    ) -> Result<Vec<TransactionSummary>, CoreError> {
        let min_value = from_display(min_display).ok_or_else(|| {
            CoreError::invalid(
                "min",
                min_display.to_string(),
                "min must be a non-negative amount",
            )
        })?;
        let txs = self
            .node
            .store()
            .get_last_txs(self.last_txs_limit, min_value)
            .await?;
        Ok(txs.iter().map(TransactionSummary::from).collect())
    }

    pub async fn peers(&self) -> Result<Vec<PeerInfo>, CoreError> {
        self.node.peers().await
    }
}
