use std::str::FromStr;
use std::sync::Arc;

use bitcoin::Txid;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheKey, TtlClass};
use crate::error::{CoreError, Entity};
use crate::node::HybridNode;
use crate::types::{Page, Transaction, TransactionSummary, TxView};

use super::{cached, echo_requested, PageWindow, SharedCache};

/// Parse a 64-character hex txid. Case is ignored.
pub fn parse_txid(input: &str) -> Result<Txid, CoreError> {
    let trimmed = input.trim();
    if trimmed.len() != 64 || !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CoreError::invalid(
            "hash",
            input,
            "transaction id must be 64 hex characters",
        ));
    }
    Txid::from_str(&trimmed.to_ascii_lowercase())
        .map_err(|e| CoreError::invalid("hash", input, format!("invalid transaction id: {e}")))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentTx {
    pub txid: String,
}

#[derive(Clone)]
pub struct TransactionGateway {
    node: Arc<HybridNode>,
    cache: SharedCache,
    page_size: usize,
}

impl TransactionGateway {
    pub fn new(node: Arc<HybridNode>, cache: SharedCache, page_size: usize) -> Self {
        Self {
            node,
            cache,
            page_size,
        }
    }

    /// Validate and fetch a transaction in its stored units.
    pub async fn resolve(&self, input: &str) -> Result<Transaction, CoreError> {
        let txid = parse_txid(input)?;
        let key = CacheKey::builder("tx").param("hash", txid).build();
        let node = Arc::clone(&self.node);
        cached(&self.cache, key, TtlClass::Short, async move {
            node.get_transaction(&txid).await
        })
        .await
        .map_err(|err| echo_requested(err, Entity::Tx, input.trim()))
    }

    pub async fn show(&self, input: &str) -> Result<TxView, CoreError> {
        let tx = self.resolve(input).await?;
        Ok(TxView::from(&tx))
    }

    /// Indexed transactions, most recent first.
    pub async fn list(
        &self,
        from: Option<usize>,
        to: Option<usize>,
    ) -> Result<Page<TransactionSummary>, CoreError> {
        let window = PageWindow::resolve(from, to, self.page_size)?;
        let key = CacheKey::builder("txs")
            .param("from", window.from)
            .param("to", window.to)
            .build();
        let node = Arc::clone(&self.node);
        cached(&self.cache, key, TtlClass::Short, async move {
            let page = node.store().get_txs(window.from, window.len()).await?;
            Ok(Page {
                total_items: page.total_items,
                from: page.from,
                to: page.to,
                items: page.items.iter().map(TransactionSummary::from).collect(),
            })
        })
        .await
    }

    /// Submit a hex-encoded transaction. Never cached and never retried.
    pub async fn send(&self, raw_hex: &str) -> Result<SentTx, CoreError> {
        let raw = raw_hex.trim();
        if raw.is_empty() || raw.len() % 2 != 0 || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CoreError::invalid(
                "rawtx",
                raw_hex,
                "rawtx must be a non-empty hex string",
            ));
        }
        let txid = self.node.broadcast(raw).await?;
        Ok(SentTx {
            txid: txid.to_string(),
        })
    }
}
