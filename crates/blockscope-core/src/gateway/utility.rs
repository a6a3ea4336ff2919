use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::try_join_all;

use crate::aggregate::{AggregationService, Distribution};
use crate::cache::{CacheKey, TtlClass};
use crate::error::CoreError;
use crate::node::HybridNode;
use crate::types::{HeightReport, NodeStatus, PeerInfo, TransactionSummary};

use super::{cached, SharedCache};

/// Largest confirmation target accepted for fee estimation.
pub const MAX_FEE_BLOCKS: u32 = 1008;
const DEFAULT_FEE_BLOCKS: u32 = 2;

/// Fee per kilobyte, display units, keyed by confirmation target. `-1`
/// marks targets the node has no estimate for.
pub type FeeEstimates = BTreeMap<u32, f64>;

fn parse_fee_targets(csv: Option<&str>) -> Result<Vec<u32>, CoreError> {
    let Some(csv) = csv.filter(|csv| !csv.trim().is_empty()) else {
        return Ok(vec![DEFAULT_FEE_BLOCKS]);
    };
    let mut targets = csv
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| match item.parse::<u32>() {
            Ok(n) if (1..=MAX_FEE_BLOCKS).contains(&n) => Ok(n),
            _ => Err(CoreError::invalid(
                "nbBlocks",
                csv,
                format!("nbBlocks must be integers between 1 and {MAX_FEE_BLOCKS}"),
            )),
        })
        .collect::<Result<Vec<_>, _>>()?;
    targets.sort_unstable();
    targets.dedup();
    Ok(targets)
}

/// Node status, fees, and the cached aggregate views.
#[derive(Clone)]
pub struct UtilityGateway {
    node: Arc<HybridNode>,
    aggregates: Arc<AggregationService>,
    cache: SharedCache,
}

impl UtilityGateway {
    pub fn new(
        node: Arc<HybridNode>,
        aggregates: Arc<AggregationService>,
        cache: SharedCache,
    ) -> Self {
        Self {
            node,
            aggregates,
            cache,
        }
    }

    pub async fn estimate_fee(&self, nb_blocks: Option<&str>) -> Result<FeeEstimates, CoreError> {
        let targets = parse_fee_targets(nb_blocks)?;
        let key = CacheKey::builder("estimatefee")
            .list(
                "nbBlocks",
                &targets.iter().map(u32::to_string).collect::<Vec<_>>(),
            )
            .build();
        let node = Arc::clone(&self.node);
        cached(&self.cache, key, TtlClass::Short, async move {
            let estimates =
                try_join_all(targets.iter().map(|blocks| node.estimate_fee(*blocks))).await?;
            Ok(targets
                .iter()
                .zip(estimates)
                .map(|(blocks, fee)| (*blocks, fee.unwrap_or(-1.0)))
                .collect::<FeeEstimates>())
        })
        .await
    }

    pub async fn status(&self) -> Result<NodeStatus, CoreError> {
        let node = Arc::clone(&self.node);
        cached(
            &self.cache,
            CacheKey::builder("status").build(),
            TtlClass::Short,
            async move { node.get_info().await },
        )
        .await
    }

    pub async fn height(&self) -> Result<HeightReport, CoreError> {
        let node = Arc::clone(&self.node);
        cached(
            &self.cache,
            CacheKey::builder("height").build(),
            TtlClass::Short,
            async move { node.get_height().await },
        )
        .await
    }

    pub async fn money_supply(&self) -> Result<f64, CoreError> {
        let aggregates = Arc::clone(&self.aggregates);
        cached(
            &self.cache,
            CacheKey::builder("supply").build(),
            TtlClass::Long,
            async move { aggregates.money_supply().await },
        )
        .await
    }

    pub async fn distribution(&self) -> Result<Distribution, CoreError> {
        let aggregates = Arc::clone(&self.aggregates);
        cached(
            &self.cache,
            CacheKey::builder("distribution").build(),
            TtlClass::Long,
            async move { aggregates.rich_list_distribution().await },
        )
        .await
    }

    pub async fn recent_transactions(
        &self,
        min_display: f64,
    ) -> Result<Vec<TransactionSummary>, CoreError> {
        // Validate outside the cache so bad input never claims a slot.
        if !min_display.is_finite() || min_display < 0.0 {
            return Err(CoreError::invalid(
                "min",
                min_display.to_string(),
                "min must be a non-negative amount",
            ));
        }
        let aggregates = Arc::clone(&self.aggregates);
        cached(
            &self.cache,
            CacheKey::builder("lasttxs")
                .param("min", min_display)
                .build(),
            TtlClass::Short,
            async move { aggregates.recent_transactions(min_display).await },
        )
        .await
    }

    pub async fn peers(&self) -> Result<Vec<PeerInfo>, CoreError> {
        let aggregates = Arc::clone(&self.aggregates);
        cached(
            &self.cache,
            CacheKey::builder("peers").build(),
            TtlClass::Long,
            async move { aggregates.peers().await },
        )
        .await
    }

    /// Raw node call, uncached. Callers gate `method` first.
    pub async fn rpc_call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, CoreError> {
        self.node.call(method, params).await
    }
}
