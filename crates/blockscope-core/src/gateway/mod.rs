//! Request-shaped operations: validate input, consult the response cache,
//! then ask the hybrid node, the index or the aggregation service.
//!
//! Every gateway validates before touching the cache, so malformed input
//! never occupies a cache slot.

mod address;
mod transaction;
mod utility;

pub use address::{validate_address, validate_addresses, AddressGateway};
pub use transaction::{parse_txid, SentTx, TransactionGateway};
pub use utility::{FeeEstimates, UtilityGateway, MAX_FEE_BLOCKS};

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::aggregate::AggregationService;
use crate::cache::{CacheKey, ResponseCache, TtlClass};
use crate::error::{CoreError, Entity};
use crate::node::HybridNode;

/// Largest `to - from` span a paged request may ask for.
pub const MAX_PAGE_SPAN: usize = 50;

/// Cached payloads are stored as JSON so one cache serves every route.
pub type SharedCache = Arc<ResponseCache<serde_json::Value>>;

/// The three gateways, wired to one node and one cache.
#[derive(Clone)]
pub struct Gateways {
    pub address: AddressGateway,
    pub transaction: TransactionGateway,
    pub utility: UtilityGateway,
}

impl Gateways {
    pub fn new(
        node: Arc<HybridNode>,
        aggregates: Arc<AggregationService>,
        cache: SharedCache,
        page_size: usize,
    ) -> Self {
        Self {
            address: AddressGateway::new(Arc::clone(&node), Arc::clone(&cache), page_size),
            transaction: TransactionGateway::new(Arc::clone(&node), Arc::clone(&cache), page_size),
            utility: UtilityGateway::new(node, aggregates, cache),
        }
    }
}

/// A `{from, to}` window over an ordered result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageWindow {
    pub from: usize,
    pub to: usize,
}

impl PageWindow {
    /// Fill defaults (`from = 0`, `to = from + page_size`) and enforce
    /// `from < to` and the maximum span.
    pub fn resolve(
        from: Option<usize>,
        to: Option<usize>,
        page_size: usize,
    ) -> Result<Self, CoreError> {
        let from = from.unwrap_or(0);
        let to = to.unwrap_or(from + page_size.min(MAX_PAGE_SPAN));
        if to <= from {
            return Err(CoreError::invalid(
                "to",
                to.to_string(),
                "\"to\" must be greater than \"from\"",
            ));
        }
        if to - from > MAX_PAGE_SPAN {
            return Err(CoreError::invalid(
                "to",
                to.to_string(),
                format!("\"from\" ({from}) and \"to\" ({to}) range should be less than or equal to {MAX_PAGE_SPAN}"),
            ));
        }
        Ok(Self { from, to })
    }

    pub fn len(&self) -> usize {
        self.to - self.from
    }

    pub fn is_empty(&self) -> bool {
        self.to == self.from
    }
}

/// Run `compute` through the response cache, storing its output as JSON.
pub(crate) async fn cached<T, F>(
    cache: &ResponseCache<serde_json::Value>,
    key: CacheKey,
    ttl: TtlClass,
    compute: F,
) -> Result<T, CoreError>
where
    T: Serialize + DeserializeOwned,
    F: Future<Output = Result<T, CoreError>> + Send + 'static,
{
    let value = cache
        .get_or_compute(key, ttl, async move {
            let value = compute.await?;
            serde_json::to_value(value)
                .map_err(|e| CoreError::Internal(format!("encode cached response: {e}")))
        })
        .await?;
    serde_json::from_value(value)
        .map_err(|e| CoreError::Internal(format!("decode cached response: {e}")))
}

/// Not-found errors for `entity` echo the identifier as the caller sent it,
/// not the canonical form used for lookups and cache keys.
pub(crate) fn echo_requested(err: CoreError, entity: Entity, raw: &str) -> CoreError {
    match err {
        CoreError::NotFound { entity: found, .. } if found == entity => {
            CoreError::not_found(entity, raw)
        }
        other => other,
    }
}
