use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Network, Txid};
use futures::future::try_join_all;
use tracing::{debug, warn};

use crate::cache::{CacheKey, TtlClass};
use crate::error::{CoreError, Entity};
use crate::node::HybridNode;
use crate::types::{
    display_balance, Address, AddressView, Page, Transaction, TxView, UnspentOutput, UtxoRecord,
};

use super::{cached, echo_requested, PageWindow, SharedCache};

// ==============================================================================
// Validation
// ==============================================================================

/// Check an address against `network` and return its canonical form.
/// Bech32 addresses come back lowercase; base58 keeps its case.
pub fn validate_address(input: &str, network: Network) -> Result<String, CoreError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CoreError::invalid("hash", input, "address is required"));
    }
    let unchecked = bitcoin::Address::<NetworkUnchecked>::from_str(trimmed)
        .map_err(|e| CoreError::invalid("hash", input, format!("invalid address: {e}")))?;
    let checked = unchecked.require_network(network).map_err(|_| {
        CoreError::invalid("hash", input, format!("address is not valid on {network}"))
    })?;
    Ok(checked.to_string())
}

/// Split a comma-separated list, drop empty items, and validate each.
/// Order is preserved; repeats are removed.
pub fn validate_addresses(csv: &str, network: Network) -> Result<Vec<String>, CoreError> {
    let mut seen = HashSet::new();
    let mut addresses = Vec::new();
    for item in csv.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        let address = validate_address(item, network)?;
        if seen.insert(address.clone()) {
            addresses.push(address);
        }
    }
    if addresses.is_empty() {
        return Err(CoreError::invalid(
            "addrs",
            csv,
            "at least one address is required",
        ));
    }
    Ok(addresses)
}

// ==============================================================================
// Address Gateway
// ==============================================================================

#[derive(Clone)]
pub struct AddressGateway {
    node: Arc<HybridNode>,
    cache: SharedCache,
    page_size: usize,
}

impl AddressGateway {
    pub fn new(node: Arc<HybridNode>, cache: SharedCache, page_size: usize) -> Self {
        Self {
            node,
            cache,
            page_size,
        }
    }

    /// Single-address endpoints given a list use the first entry.
    fn first_address(&self, input: &str) -> Result<Requested, CoreError> {
        let mut addresses = validate_addresses(input, self.node.network())?;
        let canonical = addresses.swap_remove(0);
        if !addresses.is_empty() {
            warn!(
                using = %canonical,
                ignored = addresses.len(),
                "several addresses given to a single-address endpoint; using the first"
            );
        }
        let raw = input
            .split(',')
            .map(str::trim)
            .find(|item| !item.is_empty())
            .unwrap_or(canonical.as_str())
            .to_owned();
        Ok(Requested { canonical, raw })
    }

    pub async fn lookup(&self, input: &str) -> Result<AddressView, CoreError> {
        let Requested { canonical, raw } = self.first_address(input)?;
        let key = CacheKey::builder("address")
            .param("hash", &canonical)
            .build();
        let node = Arc::clone(&self.node);
        cached(&self.cache, key, TtlClass::Short, async move {
            let record = load_address(&node, &canonical).await?;
            Ok(AddressView::from_address(&record))
        })
        .await
        .map_err(|err| echo_requested(err, Entity::Address, &raw))
    }

    /// [`AddressGateway::lookup`] plus every referenced transaction. The
    /// whole batch resolves before anything is returned.
    pub async fn lookup_full(&self, input: &str) -> Result<AddressView, CoreError> {
        let Requested { canonical, raw } = self.first_address(input)?;
        let key = CacheKey::builder("address")
            .param("hash", &canonical)
            .param("fulltx", true)
            .build();
        let node = Arc::clone(&self.node);
        cached(&self.cache, key, TtlClass::Short, async move {
            let record = load_address(&node, &canonical).await?;
            let txids = record
                .txs
                .iter()
                .map(|tx_ref| parse_stored_txid(&tx_ref.txid))
                .collect::<Result<Vec<_>, _>>()?;
            let txs = try_join_all(txids.iter().map(|txid| load_referenced_tx(&node, txid))).await?;

            let mut view = AddressView::from_address(&record);
            view.txs = Some(txs.iter().map(TxView::from).collect());
            Ok(view)
        })
        .await
        .map_err(|err| echo_requested(err, Entity::Address, &raw))
    }

    pub async fn balance(&self, input: &str) -> Result<f64, CoreError> {
        let Requested { canonical, raw } = self.first_address(input)?;
        let key = CacheKey::builder("balance")
            .param("hash", &canonical)
            .build();
        let node = Arc::clone(&self.node);
        cached(&self.cache, key, TtlClass::Short, async move {
            let record = load_address(&node, &canonical).await?;
            Ok(display_balance(record.balance))
        })
        .await
        .map_err(|err| echo_requested(err, Entity::Address, &raw))
    }

    pub async fn unspent(&self, input: &str) -> Result<Vec<UnspentOutput>, CoreError> {
        let Requested { canonical, raw } = self.first_address(input)?;
        let key = CacheKey::builder("unspent")
            .param("hash", &canonical)
            .build();
        let node = Arc::clone(&self.node);
        cached(&self.cache, key, TtlClass::Short, async move {
            Ok(load_address(&node, &canonical).await?.unspent)
        })
        .await
        .map_err(|err| echo_requested(err, Entity::Address, &raw))
    }

    pub async fn utxo(&self, input: &str) -> Result<Vec<UtxoRecord>, CoreError> {
        let Requested { canonical, .. } = self.first_address(input)?;
        self.collect_utxos(vec![canonical]).await
    }

    /// Union of every listed address's UTXOs, each `(txid, vout)` once.
    pub async fn multiutxo(&self, csv: &str) -> Result<Vec<UtxoRecord>, CoreError> {
        let addresses = validate_addresses(csv, self.node.network())?;
        self.collect_utxos(addresses).await
    }

    async fn collect_utxos(
        &self,
        mut addresses: Vec<String>,
    ) -> Result<Vec<UtxoRecord>, CoreError> {
        // Key order and result order both follow the sorted address list.
        addresses.sort_unstable();
        let key = CacheKey::builder("utxo").list("addrs", &addresses).build();
        let node = Arc::clone(&self.node);
        cached(&self.cache, key, TtlClass::Short, async move {
            let records = try_join_all(
                addresses
                    .iter()
                    .map(|address| node.store().get_address(address)),
            )
            .await?;

            let mut seen = HashSet::new();
            let mut utxos: Vec<UtxoRecord> = addresses
                .iter()
                .zip(&records)
                .filter_map(|(address, record)| record.as_ref().map(|r| (address, r)))
                .flat_map(|(address, record)| {
                    record
                        .unspent
                        .iter()
                        .map(move |unspent| UtxoRecord::from_unspent(address, unspent))
                })
                .filter(|utxo| seen.insert((utxo.txid.clone(), utxo.vout)))
                .collect();

            fill_confirmations(&node, &mut utxos).await?;
            Ok(utxos)
        })
        .await
    }

    /// Transactions touching any listed address, each txid once, newest
    /// first, sliced to `window`.
    pub async fn multitxs(
        &self,
        csv: &str,
        from: Option<usize>,
        to: Option<usize>,
    ) -> Result<Page<TxView>, CoreError> {
        let addresses = validate_addresses(csv, self.node.network())?;
        let window = PageWindow::resolve(from, to, self.page_size)?;
        let key = CacheKey::builder("txs")
            .list("addrs", &addresses)
            .param("from", window.from)
            .param("to", window.to)
            .build();
        let node = Arc::clone(&self.node);
        cached(&self.cache, key, TtlClass::Short, async move {
            let records = try_join_all(
                addresses
                    .iter()
                    .map(|address| node.store().get_address(address)),
            )
            .await?;

            let mut seen = HashSet::new();
            let txids = records
                .iter()
                .flatten()
                .flat_map(|record| record.txs.iter())
                .filter(|tx_ref| seen.insert(tx_ref.txid.clone()))
                .map(|tx_ref| parse_stored_txid(&tx_ref.txid))
                .collect::<Result<Vec<_>, _>>()?;

            let mut txs =
                try_join_all(txids.iter().map(|txid| load_referenced_tx(&node, txid))).await?;
            sort_newest_first(&mut txs);

            let total_items = txs.len();
            let items: Vec<TxView> = txs
                .iter()
                .skip(window.from)
                .take(window.len())
                .map(TxView::from)
                .collect();
            Ok(Page {
                total_items,
                from: window.from,
                to: window.from + items.len(),
                items,
            })
        })
        .await
    }
}

/// The first address of a request: canonical form for lookups and cache
/// keys, the caller's own spelling for error echoes.
struct Requested {
    canonical: String,
    raw: String,
}

async fn load_address(node: &HybridNode, address: &str) -> Result<Address, CoreError> {
    node.store()
        .get_address(address)
        .await?
        .ok_or_else(|| CoreError::not_found(Entity::Address, address))
}

/// A transaction an address record points at must resolve. A miss means the
/// index and node disagree, which is not the caller's missing address.
async fn load_referenced_tx(node: &HybridNode, txid: &Txid) -> Result<Transaction, CoreError> {
    node.get_transaction(txid).await.map_err(|err| match err {
        CoreError::NotFound { .. } => {
            CoreError::Store(format!("indexed transaction {txid} is unknown to index and node"))
        }
        other => other,
    })
}

fn parse_stored_txid(txid: &str) -> Result<Txid, CoreError> {
    Txid::from_str(txid)
        .map_err(|e| CoreError::Store(format!("invalid txid `{txid}` in address record: {e}")))
}

/// Block index, then timestamp, then txid as the final tiebreak.
fn sort_newest_first(txs: &mut [Transaction]) {
    txs.sort_by(|a, b| {
        b.recency()
            .cmp(&a.recency())
            .then_with(|| a.txid.cmp(&b.txid))
    });
}

/// Fill confirmations from a fresh chain height. A stale or unavailable
/// height leaves them `None` rather than reporting wrong numbers.
async fn fill_confirmations(node: &HybridNode, utxos: &mut [UtxoRecord]) -> Result<(), CoreError> {
    if utxos.is_empty() {
        return Ok(());
    }
    let tip = match node.get_height().await {
        Ok(report) if !report.stale => report.height,
        Ok(_) => {
            debug!("chain height is stale; utxo confirmations left empty");
            return Ok(());
        }
        Err(err @ (CoreError::NotReady | CoreError::UpstreamUnavailable(_))) => {
            debug!(error = %err, "chain height unavailable; utxo confirmations left empty");
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    // Outputs recorded without a height borrow it from their indexed tx.
    let missing: Vec<usize> = utxos
        .iter()
        .enumerate()
        .filter(|(_, utxo)| utxo.height.is_none())
        .map(|(idx, _)| idx)
        .collect();
    let funding = try_join_all(
        missing
            .iter()
            .map(|&idx| node.store().get_tx(&utxos[idx].txid)),
    )
    .await?;
    for (idx, tx) in missing.into_iter().zip(funding) {
        utxos[idx].height = tx.and_then(|tx| tx.blockindex);
    }

    for utxo in utxos.iter_mut() {
        utxo.confirmations = utxo.height.map(|height| height.confirmations_at(tip));
    }
    Ok(())
}
