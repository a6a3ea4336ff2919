mod address;
mod error;
mod ext;
mod rpc_proxy;
mod tx;
mod utils;

pub use rpc_proxy::RpcWhitelist;

use std::sync::Arc;

use axum::extract::State;
use axum::http::header::InvalidHeaderValue;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use blockscope_core::cache::CacheStats;
use blockscope_core::gateway::{Gateways, SharedCache};
use blockscope_core::types::BlockHeight;
use blockscope_core::HybridNode;

// ==============================================================================
// Application State
// ==============================================================================

pub struct AppState {
    pub gateways: Gateways,
    pub node: Arc<HybridNode>,
    pub cache: SharedCache,
    pub rpc_whitelist: RpcWhitelist,
}

type SharedState = Arc<AppState>;

// ==============================================================================
// Router
// ==============================================================================

/// `*` allows every origin; anything else must match the request's
/// `Origin` header exactly.
pub fn parse_cors_origin(origin: &str) -> Result<AllowOrigin, InvalidHeaderValue> {
    if origin.trim() == "*" {
        return Ok(AllowOrigin::from(Any));
    }
    let allowed: HeaderValue = origin.parse()?;
    Ok(AllowOrigin::predicate(
        move |request_origin: &HeaderValue, _| *request_origin == allowed,
    ))
}

pub fn build_router(state: AppState, allow_origin: AllowOrigin) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    let shared = Arc::new(state);

    let address_routes = Router::new()
        .route("/api/addr/{addr}", get(address::get_address))
        .route("/api/addr/{addr}/balance", get(address::get_balance))
        .route("/api/addr/{addr}/utxo", get(address::get_utxo))
        .route("/api/addrs/{addrs}/utxo", get(address::get_multi_utxo))
        .route("/api/addrs/utxo", post(address::post_multi_utxo))
        .route("/api/addrs/{addrs}/txs", get(address::get_multi_txs))
        .route("/api/addrs/txs", post(address::post_multi_txs));

    let tx_routes = Router::new()
        .route("/api/tx/send", post(tx::send_tx))
        .route("/api/tx/{txid}", get(tx::get_tx))
        .route("/api/txs", get(tx::list_txs));

    let utility_routes = Router::new()
        .route("/api/utils/estimatefee", get(utils::estimate_fee))
        .route("/api/status", get(utils::status))
        .route("/api/supply", get(utils::supply))
        .route("/api/distribution", get(utils::distribution))
        .route("/api/lasttxs", get(utils::last_txs))
        .route("/api/peers", get(utils::peers))
        .route("/api/{method}", get(rpc_proxy::call_method));

    let ext_routes = Router::new()
        .route("/ext/getmoneysupply", get(ext::get_money_supply))
        .route("/ext/txinfo/{hash}", get(ext::get_tx_info))
        .route("/ext/getaddress/{hash}", get(ext::get_address))
        .route("/ext/listunspent/{hash}", get(ext::list_unspent))
        .route("/ext/getbalance/{hash}", get(ext::get_balance))
        .route("/ext/getdistribution", get(ext::get_distribution))
        .route("/ext/getlasttxs/{min}", get(ext::get_last_txs))
        .route("/ext/connections", get(ext::connections));

    Router::new()
        .route("/health", get(health))
        .merge(address_routes)
        .merge(tx_routes)
        .merge(utility_routes)
        .merge(ext_routes)
        .fallback(route_not_found)
        .layer(cors)
        .with_state(shared)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    ready: bool,
    height: Option<BlockHeight>,
    stale: bool,
    cache: CacheStats,
}

/// Never fails: an unreachable node shows up as `stale` or a missing height.
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let ready = state.node.is_ready();
    let (height, stale) = if ready {
        match state.node.get_height().await {
            Ok(report) => (Some(report.height), report.stale),
            Err(_) => (None, true),
        }
    } else {
        (None, false)
    };

    Json(HealthResponse {
        status: "ok",
        ready,
        height,
        stale,
        cache: state.cache.stats().await,
    })
}

async fn route_not_found() -> error::AppError {
    error::AppError::NotFound("route not found".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use bitcoin::hashes::Hash;
    use bitcoin::{Amount, BlockHash, Network, ScriptBuf, Txid};
    use blockscope_core::aggregate::AggregationService;
    use blockscope_core::cache::{CacheConfig, ResponseCache};
    use blockscope_core::error::{CoreError, Entity};
    use blockscope_core::rpc::{ChainInfo, NodeRpc, RawTransaction, TxOutSetInfo};
    use blockscope_core::store::MemoryStore;
    use blockscope_core::types::{
        Address, AddressTxRef, PeerInfo, RichList, RichListEntry, Stats, Transaction, TxIo,
        UnspentOutput, COIN,
    };
    use blockscope_core::{NodeConfig, ReadinessPolicy, SupplySource};
    use tower::ServiceExt;

    const TIP: u32 = 110;

    #[derive(Clone, Copy, PartialEq)]
    enum FakeNodeMode {
        Online,
        Offline,
        RejectBroadcast,
    }

    struct FakeNode {
        mode: FakeNodeMode,
    }

    impl FakeNode {
        fn check_online(&self) -> Result<(), CoreError> {
            match self.mode {
                FakeNodeMode::Offline => Err(CoreError::UpstreamUnavailable(
                    "connection refused".to_string(),
                )),
                _ => Ok(()),
            }
        }
    }

    #[async_trait]
    impl NodeRpc for FakeNode {
        async fn get_info(&self) -> Result<ChainInfo, CoreError> {
            self.check_online()?;
            Ok(ChainInfo {
                chain: "regtest".to_string(),
                blocks: u64::from(TIP),
                best_block_hash: BlockHash::all_zeros(),
                difficulty: Some(1.0),
                pruned: false,
                connections: Some(3),
            })
        }

        async fn get_block_count(&self) -> Result<BlockHeight, CoreError> {
            self.check_online()?;
            Ok(BlockHeight(TIP))
        }

        async fn get_raw_transaction(&self, txid: &Txid) -> Result<RawTransaction, CoreError> {
            self.check_online()?;
            Err(CoreError::not_found(Entity::Tx, txid.to_string()))
        }

        async fn estimate_fee(&self, blocks: u32) -> Result<Option<f64>, CoreError> {
            self.check_online()?;
            Ok((blocks <= 6).then_some(0.0002))
        }

        async fn send_raw_transaction(&self, _raw_hex: &str) -> Result<Txid, CoreError> {
            self.check_online()?;
            if self.mode == FakeNodeMode::RejectBroadcast {
                return Err(CoreError::BroadcastRejected {
                    code: -26,
                    reason: "min relay fee not met".to_string(),
                });
            }
            Ok(Txid::from_byte_array([7; 32]))
        }

        async fn get_peer_info(&self) -> Result<Vec<PeerInfo>, CoreError> {
            self.check_online()?;
            Ok(Vec::new())
        }

        async fn get_tx_out_set_info(&self) -> Result<TxOutSetInfo, CoreError> {
            self.check_online()?;
            Ok(TxOutSetInfo {
                height: BlockHeight(TIP),
                txouts: 1,
                total_amount: Amount::from_sat(50 * COIN),
            })
        }

        async fn call(
            &self,
            method: &str,
            params: Vec<serde_json::Value>,
        ) -> Result<serde_json::Value, CoreError> {
            self.check_online()?;
            Ok(serde_json::json!({ "method": method, "params": params }))
        }
    }

    fn regtest_address(tag: u8) -> String {
        let mut script = vec![0x00, 0x14];
        script.extend_from_slice(&[tag; 20]);
        bitcoin::Address::from_script(&ScriptBuf::from_bytes(script), Network::Regtest)
            .expect("p2wpkh script must have an address")
            .to_string()
    }

    fn txid_str(byte: u8) -> String {
        Txid::from_byte_array([byte; 32]).to_string()
    }

    fn sample_store() -> MemoryStore {
        let mut store = MemoryStore::new();
        for tag in [1u8, 2] {
            let txid = txid_str(tag);
            store.insert_address(Address {
                a_id: regtest_address(tag),
                sent: i64::from(tag) * COIN as i64,
                received: 3 * i64::from(tag) * COIN as i64,
                balance: 2 * i64::from(tag) * COIN as i64,
                txs: vec![AddressTxRef {
                    txid: txid.clone(),
                    direction: None,
                }],
                unspent: vec![UnspentOutput {
                    txid: txid.clone(),
                    index: 0,
                    script: "0014".to_string(),
                    amount: 2 * u64::from(tag) * COIN,
                    height: Some(BlockHeight(100)),
                }],
            });
            store.insert_tx(Transaction {
                txid,
                blockindex: Some(BlockHeight(100 + u32::from(tag))),
                timestamp: 1_700_000_000 + u64::from(tag),
                total: 2 * u64::from(tag) * COIN,
                vin: vec![TxIo {
                    addresses: "coinbase".to_string(),
                    amount: 0,
                }],
                vout: vec![TxIo {
                    addresses: regtest_address(tag),
                    amount: 2 * u64::from(tag) * COIN,
                }],
            });
        }
        store.insert_stats(Stats {
            coin: "BTC".to_string(),
            count: 2,
            last: BlockHeight(102),
            supply: 100 * COIN,
            connections: 2,
        });
        store.insert_richlist(RichList {
            coin: "BTC".to_string(),
            balance: vec![
                RichListEntry {
                    address: regtest_address(1),
                    balance: 2 * COIN as i64,
                },
                RichListEntry {
                    address: regtest_address(2),
                    balance: 4 * COIN as i64,
                },
            ],
            received: Vec::new(),
        });
        store
    }

    async fn test_router(mode: FakeNodeMode, ready: bool) -> Router {
        let node = Arc::new(HybridNode::new(
            Arc::new(FakeNode { mode }),
            Arc::new(sample_store()),
            NodeConfig {
                coin: "BTC".to_string(),
                network: Network::Regtest,
                readiness: ReadinessPolicy::Fail,
                supply_source: SupplySource::Index,
            },
        ));
        if ready {
            node.start().await.expect("fake node must start");
        }
        let cache: SharedCache = Arc::new(ResponseCache::new(CacheConfig::default()));
        let aggregates = Arc::new(AggregationService::new(Arc::clone(&node), 10));
        let state = AppState {
            gateways: Gateways::new(Arc::clone(&node), aggregates, Arc::clone(&cache), 10),
            node,
            cache,
            rpc_whitelist: RpcWhitelist::standard(),
        };
        build_router(state, AllowOrigin::from(Any))
    }

    async fn send(router: Router, request: Request<Body>) -> axum::response::Response {
        router
            .oneshot(request)
            .await
            .expect("router should serve request")
    }

    async fn get(router: Router, uri: &str) -> axum::response::Response {
        send(
            router,
            Request::builder()
                .uri(uri)
                .body(Body::empty())
                .expect("request must build"),
        )
        .await
    }

    async fn post_json(
        router: Router,
        uri: &str,
        body: serde_json::Value,
    ) -> axum::response::Response {
        send(
            router,
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request must build"),
        )
        .await
    }

    async fn response_body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .expect("response body must be readable");
        serde_json::from_slice(&bytes).expect("response body must be valid JSON")
    }

    async fn response_body_text(resp: axum::response::Response) -> String {
        let bytes = to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .expect("response body must be readable");
        String::from_utf8(bytes.to_vec()).expect("response body must be UTF-8")
    }

    #[tokio::test]
    async fn unknown_route_returns_json_404() {
        let router = test_router(FakeNodeMode::Online, true).await;
        let response = get(router, "/does/not/exist").await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = response_body_json(response).await;
        assert_eq!(
            json.get("error").and_then(serde_json::Value::as_str),
            Some("route not found")
        );
    }

    #[tokio::test]
    async fn address_lookup_presents_display_units() {
        let router = test_router(FakeNodeMode::Online, true).await;
        let address = regtest_address(2);
        let response = get(router, &format!("/api/addr/{address}")).await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_body_json(response).await;
        assert_eq!(json["address"], address);
        assert_eq!(json["balance"], 4.0);
        assert_eq!(json["received"], 6.0);
        assert_eq!(json["last_txs"][0]["txid"], txid_str(2));
        assert!(json.get("txs").is_none());
    }

    #[tokio::test]
    async fn address_lookup_with_fulltx_includes_transactions() {
        let router = test_router(FakeNodeMode::Online, true).await;
        let response = get(router, &format!("/api/addr/{}?fulltx=true", regtest_address(1))).await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_body_json(response).await;
        assert_eq!(json["txs"][0]["txid"], txid_str(1));
        assert_eq!(json["txs"][0]["total"], 2.0);
    }

    #[tokio::test]
    async fn unknown_address_returns_not_found_envelope() {
        let router = test_router(FakeNodeMode::Online, true).await;
        let address = regtest_address(9);
        let response = get(router, &format!("/api/addr/{address}")).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = response_body_json(response).await;
        assert_eq!(
            json,
            serde_json::json!({ "error": "address not found.", "hash": address })
        );
    }

    #[tokio::test]
    async fn malformed_address_is_rejected_with_echo() {
        let router = test_router(FakeNodeMode::Online, true).await;
        let response = get(router, "/api/addr/not-an-address/utxo").await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_body_json(response).await;
        assert_eq!(json["hash"], "not-an-address");
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn multi_address_utxo_via_post_unions_both_addresses() {
        let router = test_router(FakeNodeMode::Online, true).await;
        let addrs = format!("{},{}", regtest_address(1), regtest_address(2));
        let response =
            post_json(router, "/api/addrs/utxo", serde_json::json!({ "addrs": addrs })).await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_body_json(response).await;
        let utxos = json.as_array().expect("utxo list");
        assert_eq!(utxos.len(), 2);
        assert!(utxos
            .iter()
            .all(|utxo| utxo["confirmations"] == serde_json::json!(TIP - 100 + 1)));
    }

    #[tokio::test]
    async fn multi_address_txs_pages_over_get_path() {
        let router = test_router(FakeNodeMode::Online, true).await;
        let addrs = format!("{},{}", regtest_address(1), regtest_address(2));
        let response = get(router, &format!("/api/addrs/{addrs}/txs?from=0&to=1")).await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_body_json(response).await;
        assert_eq!(json["totalItems"], 2);
        assert_eq!(json["items"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["items"][0]["txid"], txid_str(2));
    }

    #[tokio::test]
    async fn oversized_page_window_is_rejected() {
        let router = test_router(FakeNodeMode::Online, true).await;
        let response = get(router, "/api/txs?from=0&to=500").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rejected_broadcast_carries_node_reason_and_code() {
        let router = test_router(FakeNodeMode::RejectBroadcast, true).await;
        let response =
            post_json(router, "/api/tx/send", serde_json::json!({ "rawtx": "0200" })).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = response_body_json(response).await;
        assert_eq!(
            json,
            serde_json::json!({ "error": "min relay fee not met", "code": -26 })
        );
    }

    #[tokio::test]
    async fn undecodable_body_or_query_still_uses_error_envelope() {
        let router = test_router(FakeNodeMode::Online, true).await;

        let missing_field = post_json(router.clone(), "/api/tx/send", serde_json::json!({})).await;
        assert_eq!(missing_field.status(), StatusCode::BAD_REQUEST);
        let json = response_body_json(missing_field).await;
        assert!(json["error"].as_str().is_some_and(|msg| msg.contains("rawtx")));

        let not_json = send(
            router.clone(),
            Request::builder()
                .method("POST")
                .uri("/api/addrs/utxo")
                .header("content-type", "application/json")
                .body(Body::from("addrs=abc"))
                .expect("request must build"),
        )
        .await;
        assert_eq!(not_json.status(), StatusCode::BAD_REQUEST);
        assert!(response_body_json(not_json).await["error"].is_string());

        for uri in ["/api/txs?from=abc", "/api/lasttxs?min=lots"] {
            let response = get(router.clone(), uri).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert!(response_body_json(response).await["error"].is_string(), "{uri}");
        }
    }

    #[tokio::test]
    async fn not_found_echoes_address_as_sent() {
        let router = test_router(FakeNodeMode::Online, true).await;
        let requested = regtest_address(9).to_uppercase();
        let response = get(router, &format!("/api/addr/{requested}")).await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = response_body_json(response).await;
        assert_eq!(json["hash"], requested);
    }

    #[tokio::test]
    async fn accepted_broadcast_returns_txid() {
        let router = test_router(FakeNodeMode::Online, true).await;
        let response =
            post_json(router, "/api/tx/send", serde_json::json!({ "rawtx": "0200" })).await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_body_json(response).await;
        assert_eq!(json["txid"], txid_str(7));
    }

    #[tokio::test]
    async fn fee_estimate_marks_missing_targets() {
        let router = test_router(FakeNodeMode::Online, true).await;
        let response = get(router, "/api/utils/estimatefee?nbBlocks=2,12").await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_body_json(response).await;
        assert_eq!(json, serde_json::json!({ "2": 0.0002, "12": -1.0 }));
    }

    #[tokio::test]
    async fn status_before_first_contact_is_service_unavailable() {
        let router = test_router(FakeNodeMode::Offline, false).await;
        let response = get(router, "/api/status").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_reports_readiness_and_cache_counters() {
        let router = test_router(FakeNodeMode::Online, true).await;
        let response = get(router, "/health").await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["ready"], true);
        assert_eq!(json["height"], TIP);
        assert_eq!(json["stale"], false);
        assert!(json["cache"]["entries"].is_u64());
    }

    #[tokio::test]
    async fn whitelisted_rpc_method_forwards_positional_params() {
        let router = test_router(FakeNodeMode::Online, true).await;
        let response = get(router, "/api/getblockhash?index=5").await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_body_json(response).await;
        assert_eq!(
            json,
            serde_json::json!({ "method": "getblockhash", "params": [5] })
        );
    }

    #[tokio::test]
    async fn non_whitelisted_rpc_method_is_forbidden() {
        let router = test_router(FakeNodeMode::Online, true).await;
        let response = get(router, "/api/stop").await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let json = response_body_json(response).await;
        assert_eq!(
            json,
            serde_json::json!({ "error": "method not allowed.", "method": "stop" })
        );
    }

    #[tokio::test]
    async fn ext_routes_keep_legacy_shapes() {
        let router = test_router(FakeNodeMode::Online, true).await;

        let response = get(router.clone(), "/ext/getlasttxs/3").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_body_json(response).await;
        let data = json["data"].as_array().expect("data list");
        assert_eq!(data.len(), 1);
        assert_eq!(data[0]["txid"], txid_str(2));

        let uri = format!("/ext/getbalance/{}", regtest_address(2));
        let response = get(router.clone(), &uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response_body_text(response).await, "4");

        let response = get(router.clone(), &format!("/ext/txinfo/{}", txid_str(1))).await;
        let json = response_body_json(response).await;
        assert_eq!(json["hash"], txid_str(1));
        assert_eq!(json["block"], 101);

        let uri = format!("/ext/listunspent/{}", regtest_address(1));
        let response = get(router.clone(), &uri).await;
        let json = response_body_json(response).await;
        assert_eq!(json["unspent_outputs"][0]["amount"], 2 * COIN);

        let response = get(router, "/ext/getmoneysupply").await;
        assert_eq!(response_body_text(response).await, "100");
    }

    #[tokio::test]
    async fn distribution_counts_every_rich_list_entry() {
        let router = test_router(FakeNodeMode::Online, true).await;
        let response = get(router, "/api/distribution").await;

        assert_eq!(response.status(), StatusCode::OK);
        let json = response_body_json(response).await;
        assert_eq!(json["addresses"], 2);
        let total: u64 = json["buckets"]
            .as_array()
            .expect("bucket list")
            .iter()
            .filter_map(|bucket| bucket["count"].as_u64())
            .sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn cors_origin_accepts_wildcard_and_exact_values() {
        assert!(parse_cors_origin("*").is_ok());
        assert!(parse_cors_origin("http://127.0.0.1:3001").is_ok());
        assert!(parse_cors_origin("bad\norigin").is_err());
    }
}
