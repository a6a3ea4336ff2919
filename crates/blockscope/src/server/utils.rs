use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use blockscope_core::aggregate::Distribution;
use blockscope_core::gateway::FeeEstimates;
use blockscope_core::types::{NodeStatus, PeerInfo, TransactionSummary};

use super::error::AppError;
use super::SharedState;

// ==============================================================================
// DTOs
// ==============================================================================

#[derive(Deserialize)]
pub(super) struct FeeQuery {
    #[serde(rename = "nbBlocks")]
    nb_blocks: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct LastTxsQuery {
    #[serde(default)]
    min: f64,
}

#[derive(Serialize)]
pub(super) struct SupplyResponse {
    supply: f64,
}

// ==============================================================================
// Handlers
// ==============================================================================

pub(super) async fn estimate_fee(
    State(state): State<SharedState>,
    query: Result<Query<FeeQuery>, QueryRejection>,
) -> Result<Json<FeeEstimates>, AppError> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.to_string()))?;
    let fees = state
        .gateways
        .utility
        .estimate_fee(query.nb_blocks.as_deref())
        .await?;
    Ok(Json(fees))
}

pub(super) async fn status(
    State(state): State<SharedState>,
) -> Result<Json<NodeStatus>, AppError> {
    Ok(Json(state.gateways.utility.status().await?))
}

pub(super) async fn supply(
    State(state): State<SharedState>,
) -> Result<Json<SupplyResponse>, AppError> {
    let supply = state.gateways.utility.money_supply().await?;
    Ok(Json(SupplyResponse { supply }))
}

pub(super) async fn distribution(
    State(state): State<SharedState>,
) -> Result<Json<Distribution>, AppError> {
    Ok(Json(state.gateways.utility.distribution().await?))
}

pub(super) async fn last_txs(
    State(state): State<SharedState>,
    query: Result<Query<LastTxsQuery>, QueryRejection>,
) -> Result<Json<Vec<TransactionSummary>>, AppError> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.to_string()))?;
    let txs = state
        .gateways
        .utility
        .recent_transactions(query.min)
        .await?;
    Ok(Json(txs))
}

pub(super) async fn peers(
    State(state): State<SharedState>,
) -> Result<Json<Vec<PeerInfo>>, AppError> {
    Ok(Json(state.gateways.utility.peers().await?))
}
