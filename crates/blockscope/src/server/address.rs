use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use blockscope_core::types::{AddressView, Page, TxView, UtxoRecord};

use super::error::AppError;
use super::SharedState;

// ==============================================================================
// DTOs
// ==============================================================================

#[derive(Deserialize)]
pub(super) struct LookupQuery {
    #[serde(default)]
    fulltx: bool,
}

#[derive(Deserialize)]
pub(super) struct WindowQuery {
    pub(super) from: Option<usize>,
    pub(super) to: Option<usize>,
}

/// POST body for the multi-address routes: `addrs` is comma-separated.
#[derive(Deserialize)]
pub(super) struct AddrsBody {
    addrs: String,
    from: Option<usize>,
    to: Option<usize>,
}

// ==============================================================================
// Handlers
// ==============================================================================

pub(super) async fn get_address(
    State(state): State<SharedState>,
    Path(addr): Path<String>,
    query: Result<Query<LookupQuery>, QueryRejection>,
) -> Result<Json<AddressView>, AppError> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.to_string()))?;
    let gateway = &state.gateways.address;
    let view = if query.fulltx {
        gateway.lookup_full(&addr).await?
    } else {
        gateway.lookup(&addr).await?
    };
    Ok(Json(view))
}

pub(super) async fn get_balance(
    State(state): State<SharedState>,
    Path(addr): Path<String>,
) -> Result<Json<f64>, AppError> {
    Ok(Json(state.gateways.address.balance(&addr).await?))
}

pub(super) async fn get_utxo(
    State(state): State<SharedState>,
    Path(addr): Path<String>,
) -> Result<Json<Vec<UtxoRecord>>, AppError> {
    Ok(Json(state.gateways.address.utxo(&addr).await?))
}

pub(super) async fn get_multi_utxo(
    State(state): State<SharedState>,
    Path(addrs): Path<String>,
) -> Result<Json<Vec<UtxoRecord>>, AppError> {
    Ok(Json(state.gateways.address.multiutxo(&addrs).await?))
}

pub(super) async fn post_multi_utxo(
    State(state): State<SharedState>,
    body: Result<Json<AddrsBody>, JsonRejection>,
) -> Result<Json<Vec<UtxoRecord>>, AppError> {
    let Json(body) = body.map_err(|e| AppError::BadRequest(e.to_string()))?;
    Ok(Json(state.gateways.address.multiutxo(&body.addrs).await?))
}

pub(super) async fn get_multi_txs(
    State(state): State<SharedState>,
    Path(addrs): Path<String>,
    window: Result<Query<WindowQuery>, QueryRejection>,
) -> Result<Json<Page<TxView>>, AppError> {
    let Query(window) = window.map_err(|e| AppError::BadRequest(e.to_string()))?;
    let page = state
        .gateways
        .address
        .multitxs(&addrs, window.from, window.to)
        .await?;
    Ok(Json(page))
}

pub(super) async fn post_multi_txs(
    State(state): State<SharedState>,
    body: Result<Json<AddrsBody>, JsonRejection>,
) -> Result<Json<Page<TxView>>, AppError> {
    let Json(body) = body.map_err(|e| AppError::BadRequest(e.to_string()))?;
    let page = state
        .gateways
        .address
        .multitxs(&body.addrs, body.from, body.to)
        .await?;
    Ok(Json(page))
}
