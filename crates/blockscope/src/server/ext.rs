//! The explorer's long-standing `/ext/*` routes. Shapes differ from the
//! `/api` routes and are kept as existing consumers expect them; errors use
//! the same envelope and status mapping as everything else.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use blockscope_core::aggregate::Distribution;
use blockscope_core::types::{
    AddressView, BlockHeight, PeerInfo, TransactionSummary, TxIoView, UnspentOutput,
};
use blockscope_core::CoreError;

use super::error::AppError;
use super::SharedState;

// ==============================================================================
// DTOs
// ==============================================================================

#[derive(Deserialize)]
pub(super) struct FullTxQuery {
    #[serde(default)]
    fulltx: bool,
}

#[derive(Serialize)]
pub(super) struct TxInfo {
    hash: String,
    block: Option<BlockHeight>,
    timestamp: u64,
    total: f64,
    inputs: Vec<TxIoView>,
    outputs: Vec<TxIoView>,
}

#[derive(Serialize)]
pub(super) struct UnspentList {
    unspent_outputs: Vec<UnspentOutput>,
}

#[derive(Serialize)]
pub(super) struct DataList<T> {
    data: Vec<T>,
}

// ==============================================================================
// Handlers
// ==============================================================================

pub(super) async fn get_money_supply(State(state): State<SharedState>) -> Result<String, AppError> {
    Ok(state.gateways.utility.money_supply().await?.to_string())
}

pub(super) async fn get_tx_info(
    State(state): State<SharedState>,
    Path(hash): Path<String>,
) -> Result<Json<TxInfo>, AppError> {
    let view = state.gateways.transaction.show(&hash).await?;
    Ok(Json(TxInfo {
        hash: view.txid,
        block: view.blockindex,
        timestamp: view.timestamp,
        total: view.total,
        inputs: view.inputs,
        outputs: view.outputs,
    }))
}

pub(super) async fn get_address(
    State(state): State<SharedState>,
    Path(hash): Path<String>,
    query: Result<Query<FullTxQuery>, QueryRejection>,
) -> Result<Json<AddressView>, AppError> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.to_string()))?;
    let gateway = &state.gateways.address;
    let view = if query.fulltx {
        gateway.lookup_full(&hash).await?
    } else {
        gateway.lookup(&hash).await?
    };
    Ok(Json(view))
}

pub(super) async fn list_unspent(
    State(state): State<SharedState>,
    Path(hash): Path<String>,
) -> Result<Json<UnspentList>, AppError> {
    let unspent_outputs = state.gateways.address.unspent(&hash).await?;
    Ok(Json(UnspentList { unspent_outputs }))
}

pub(super) async fn get_balance(
    State(state): State<SharedState>,
    Path(hash): Path<String>,
) -> Result<String, AppError> {
    Ok(state.gateways.address.balance(&hash).await?.to_string())
}

pub(super) async fn get_distribution(
    State(state): State<SharedState>,
) -> Result<Json<Distribution>, AppError> {
    Ok(Json(state.gateways.utility.distribution().await?))
}

pub(super) async fn get_last_txs(
    State(state): State<SharedState>,
    Path(min): Path<String>,
) -> Result<Json<DataList<TransactionSummary>>, AppError> {
    let min = min
        .trim()
        .parse::<f64>()
        .map_err(|_| CoreError::invalid("min", min.as_str(), "min must be a number"))?;
    let data = state.gateways.utility.recent_transactions(min).await?;
    Ok(Json(DataList { data }))
}

pub(super) async fn connections(
    State(state): State<SharedState>,
) -> Result<Json<DataList<PeerInfo>>, AppError> {
    let data = state.gateways.utility.peers().await?;
    Ok(Json(DataList { data }))
}
