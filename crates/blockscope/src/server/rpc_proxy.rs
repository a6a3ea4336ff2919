use std::collections::HashSet;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde_json::Value;
use tracing::debug;

use super::error::AppError;
use super::SharedState;

// ==============================================================================
// Method Whitelist
// ==============================================================================

const STANDARD_METHODS: &[&str] = &[
    "getinfo",
    "getnetworkghps",
    "getmininginfo",
    "getdifficulty",
    "getconnectioncount",
    "getblockcount",
    "getblockhash",
    "getblock",
    "getrawtransaction",
    "getpeerinfo",
    "gettxoutsetinfo",
    "sendrawtransaction",
];

/// Extra methods exposed by chains with on-chain voting and reward phases.
const HEAVY_EXTRA_METHODS: &[&str] = &[
    "getstakinginfo",
    "getmaxmoney",
    "getvote",
    "getmaxvote",
    "getphase",
    "getreward",
    "getnextrewardestimate",
    "getnextrewardwhenstr",
    "getnextrewardwhensec",
    "getsupply",
];

/// Node methods reachable through `/api/{method}`.
#[derive(Debug, Clone)]
pub struct RpcWhitelist {
    methods: HashSet<&'static str>,
}

impl RpcWhitelist {
    pub fn standard() -> Self {
        Self {
            methods: STANDARD_METHODS.iter().copied().collect(),
        }
    }

    pub fn heavy() -> Self {
        Self {
            methods: STANDARD_METHODS
                .iter()
                .chain(HEAVY_EXTRA_METHODS)
                .copied()
                .collect(),
        }
    }

    pub fn allows(&self, method: &str) -> bool {
        self.methods.contains(method)
    }
}

/// Query values become positional params in the order given. Values that
/// parse as JSON (numbers, booleans) are passed typed, anything else as a
/// string.
fn positional_params(query: Vec<(String, String)>) -> Vec<Value> {
    query
        .into_iter()
        .map(|(_, raw)| serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
        .collect()
}

// ==============================================================================
// Handler
// ==============================================================================

pub(super) async fn call_method(
    State(state): State<SharedState>,
    Path(method): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, AppError> {
    if !state.rpc_whitelist.allows(&method) {
        return Err(AppError::MethodNotAllowed(method));
    }
    let params = positional_params(query);
    debug!(method = %method, params = params.len(), "forwarding raw rpc call");
    let result = state.gateways.utility.rpc_call(&method, params).await?;
    Ok(Json(result))
}
