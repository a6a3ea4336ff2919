use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use blockscope_core::gateway::SentTx;
use blockscope_core::types::{Page, TransactionSummary, TxView};

use super::address::WindowQuery;
use super::error::AppError;
use super::SharedState;

#[derive(Deserialize)]
pub(super) struct SendBody {
    rawtx: String,
}

pub(super) async fn get_tx(
    State(state): State<SharedState>,
    Path(txid): Path<String>,
) -> Result<Json<TxView>, AppError> {
    Ok(Json(state.gateways.transaction.show(&txid).await?))
}

pub(super) async fn list_txs(
    State(state): State<SharedState>,
    window: Result<Query<WindowQuery>, QueryRejection>,
) -> Result<Json<Page<TransactionSummary>>, AppError> {
    let Query(window) = window.map_err(|e| AppError::BadRequest(e.to_string()))?;
    let page = state
        .gateways
        .transaction
        .list(window.from, window.to)
        .await?;
    Ok(Json(page))
}

pub(super) async fn send_tx(
    State(state): State<SharedState>,
    body: Result<Json<SendBody>, JsonRejection>,
) -> Result<Json<SentTx>, AppError> {
    let Json(body) = body.map_err(|e| AppError::BadRequest(e.to_string()))?;
    Ok(Json(state.gateways.transaction.send(&body.rawtx).await?))
}
