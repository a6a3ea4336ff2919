use std::collections::HashMap;
use std::num::{NonZeroU32, NonZeroUsize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};
use futures::future::try_join_all;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use lru::LruCache;
use reqwest::header;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use crate::error::{CoreError, Entity, RpcError};
use crate::types::{BlockHeight, PeerInfo};

use super::super::types::{ChainInfo, RawTransaction, TxOutSetInfo};
use super::super::NodeRpc;
use super::connection::{parse_endpoint, resolve_auth};
use super::parsing::{
    parse_chain_info, parse_fee_estimate, parse_integer_optional, parse_opt_block_hash,
    parse_peer_info, parse_tx_out_set_info, parse_txid, parse_vin, parse_vout,
};
use super::protocol::{parse_batch_id, JsonRpcRequest, JsonRpcResponse};

/// Maximum number of block-hash → height entries cached in memory.
const BLOCK_HEIGHT_CACHE_CAP: usize = 10_000;

/// `getrawtransaction` verbosity that includes spent prevouts where supported.
const TX_VERBOSITY: u8 = 2;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;
type Call = (&'static str, Vec<serde_json::Value>);

/// Connection settings for [`HttpRpcClient`].
#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub endpoint: String,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub cookie_file: Option<PathBuf>,
    /// Outbound HTTP requests per second; batched calls count as one.
    pub requests_per_second: Option<u32>,
    pub batch_chunk_size: usize,
    pub timeout: Duration,
}

impl RpcSettings {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            user: None,
            pass: None,
            cookie_file: None,
            requests_per_second: None,
            batch_chunk_size: 50,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Node JSON-RPC client over HTTP(S).
///
/// Supports both single and batched RPC calls. Keeps an LRU cache of
/// block-hash-to-height mappings so confirmed transactions don't cost an
/// extra `getblockheader` round trip each time.
pub struct HttpRpcClient {
    client: reqwest::Client,
    url: String,
    auth: Option<(String, String)>,
    limiter: Option<DirectRateLimiter>,
    batch_chunk_size: usize,
    next_id: AtomicU64,
    /// Confirmed block heights never change, so entries are only evicted,
    /// never invalidated.
    block_height_cache: RwLock<LruCache<BlockHash, BlockHeight>>,
}

impl HttpRpcClient {
    /// Authentication precedence:
    /// 1. explicit `user` + `pass`
    /// 2. cookie file (`username:password`)
    /// 3. no auth
    pub fn new(settings: &RpcSettings) -> Result<Self, CoreError> {
        if settings.batch_chunk_size == 0 {
            return Err(CoreError::Config(
                "rpc batch chunk size must be at least 1".to_owned(),
            ));
        }
        let auth = resolve_auth(
            settings.user.as_deref(),
            settings.pass.as_deref(),
            settings.cookie_file.as_deref(),
        )?;
        let url = parse_endpoint(&settings.endpoint)?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(settings.timeout)
            .pool_max_idle_per_host(32)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| CoreError::Config(format!("build rpc http client: {e}")))?;

        let limiter = match settings.requests_per_second {
            None => None,
            Some(limit) => {
                let limit = NonZeroU32::new(limit).ok_or_else(|| {
                    CoreError::Config("requests_per_second must be at least 1".to_owned())
                })?;
                Some(RateLimiter::direct(Quota::per_second(limit)))
            }
        };

        Ok(Self {
            client,
            url,
            auth,
            limiter,
            batch_chunk_size: settings.batch_chunk_size,
            next_id: AtomicU64::new(initial_request_id()),
            block_height_cache: RwLock::new(LruCache::new(
                NonZeroUsize::new(BLOCK_HEIGHT_CACHE_CAP)
                    .expect("BLOCK_HEIGHT_CACHE_CAP is non-zero"),
            )),
        })
    }

    /// Atomically reserve `count` consecutive request IDs for batch calls.
    fn reserve_request_ids(&self, count: u64) -> u64 {
        self.next_id.fetch_add(count, Ordering::Relaxed)
    }

    async fn wait_for_rate_limit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    async fn post<T: serde::Serialize + ?Sized>(&self, payload: &T) -> Result<String, CoreError> {
        let mut builder = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(payload);
        if let Some((ref user, ref pass)) = self.auth {
            builder = builder.basic_auth(user, Some(pass));
        }

        let response = builder.send().await.map_err(RpcError::from)?;
        let status = response.status();
        let body = response.text().await.map_err(RpcError::from)?;
        debug!(%status, body_len = body.len(), "rpc response");
        trace!(body = %body, "rpc response body");
        Ok(body)
    }

    async fn rpc_call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, CoreError> {
        self.wait_for_rate_limit().await;
        let id = self.reserve_request_ids(1);
        debug!(
            rpc.id = id,
            rpc.method = method,
            rpc.params = params.len(),
            "rpc call"
        );
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params: &params,
        };

        let body = self.post(&req).await?;
        let decoded: JsonRpcResponse = serde_json::from_str(&body).map_err(|e| {
            RpcError::InvalidResponse(format!("decode JSON-RPC response: {e}; body={body}"))
        })?;
        decoded.into_result()
    }

    async fn rpc_batch(&self, calls: &[Call]) -> Result<Vec<serde_json::Value>, CoreError> {
        self.wait_for_rate_limit().await;
        let start_id = self.reserve_request_ids(calls.len() as u64);
        debug!(
            rpc.batch_start_id = start_id,
            rpc.batch_size = calls.len(),
            "rpc batch call"
        );
        let requests: Vec<JsonRpcRequest<'_>> = calls
            .iter()
            .enumerate()
            .map(|(offset, (method, params))| JsonRpcRequest {
                jsonrpc: "2.0",
                id: start_id + offset as u64,
                method: *method,
                params: params.as_slice(),
            })
            .collect();

        let body = self.post(&requests).await?;
        let decoded: Vec<JsonRpcResponse> = serde_json::from_str(&body).map_err(|e| {
            RpcError::InvalidResponse(format!("decode JSON-RPC batch response: {e}; body={body}"))
        })?;

        let mut by_id: HashMap<u64, JsonRpcResponse> = HashMap::with_capacity(decoded.len());
        for item in decoded {
            let id = parse_batch_id(&item.id)?;
            by_id.insert(id, item);
        }

        let mut ordered = Vec::with_capacity(calls.len());
        for id in start_id..(start_id + calls.len() as u64) {
            let item = by_id.remove(&id).ok_or(RpcError::MissingBatchItem { id })?;
            ordered.push(item.into_result()?);
        }

        Ok(ordered)
    }

    async fn rpc_batch_chunked(&self, calls: &[Call]) -> Result<Vec<serde_json::Value>, CoreError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        // Keep each payload small enough for node/proxy limits while still
        // issuing chunks concurrently.
        let chunk_futures: Vec<_> = calls
            .chunks(self.batch_chunk_size)
            .map(|chunk| self.rpc_batch(chunk))
            .collect();
        let chunked = try_join_all(chunk_futures).await?;
        Ok(chunked.into_iter().flatten().collect())
    }

    async fn parse_raw_transaction(
        &self,
        raw: serde_json::Value,
    ) -> Result<RawTransaction, CoreError> {
        let txid = parse_txid(raw.get("txid"), "txid")?;
        let block_hash = parse_opt_block_hash(raw.get("blockhash"))?;
        let mut block_height =
            parse_integer_optional::<u32, false>(raw.get("blockheight")).map(BlockHeight);
        let confirmations = parse_integer_optional::<u64, false>(raw.get("confirmations"));
        let block_time = parse_integer_optional::<u64, false>(raw.get("blocktime"))
            .or_else(|| parse_integer_optional::<u64, false>(raw.get("time")));

        if block_height.is_none() && confirmations.unwrap_or(0) > 0 {
            if let Some(block_hash) = block_hash {
                block_height = self.get_block_height(block_hash).await?;
            }
        }

        let vin = raw
            .get("vin")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| RpcError::InvalidResponse("missing vin array".into()))?;
        let vout = raw
            .get("vout")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| RpcError::InvalidResponse("missing vout array".into()))?;

        Ok(RawTransaction {
            txid,
            block_hash,
            block_height,
            block_time,
            confirmations,
            inputs: parse_vin(vin)?,
            outputs: parse_vout(vout)?,
        })
    }

    async fn get_block_height(
        &self,
        block_hash: BlockHash,
    ) -> Result<Option<BlockHeight>, CoreError> {
        // `LruCache::get` updates recency, so even lookups need the write lock.
        if let Some(height) = self
            .block_height_cache
            .write()
            .await
            .get(&block_hash)
            .copied()
        {
            return Ok(Some(height));
        }

        let raw = self
            .rpc_call(
                "getblockheader",
                vec![
                    serde_json::json!(block_hash.to_string()),
                    serde_json::json!(true),
                ],
            )
            .await?;
        let height = parse_integer_optional::<u32, false>(raw.get("height")).map(BlockHeight);
        if let Some(height) = height {
            self.block_height_cache
                .write()
                .await
                .put(block_hash, height);
        }
        Ok(height)
    }
}

#[async_trait]
impl NodeRpc for HttpRpcClient {
    async fn get_info(&self) -> Result<ChainInfo, CoreError> {
        let calls: [Call; 2] = [
            ("getblockchaininfo", Vec::new()),
            ("getconnectioncount", Vec::new()),
        ];
        let mut results = self.rpc_batch(&calls).await?.into_iter();
        let info = results.next().unwrap_or_default();
        let connections = parse_integer_optional::<u32, false>(results.next().as_ref());
        parse_chain_info(info, connections)
    }

    async fn get_block_count(&self) -> Result<BlockHeight, CoreError> {
        let raw = self.rpc_call("getblockcount", Vec::new()).await?;
        let height = parse_integer_optional::<u32, false>(Some(&raw)).ok_or_else(|| {
            RpcError::InvalidResponse(format!("invalid getblockcount result: {raw}"))
        })?;
        Ok(BlockHeight(height))
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> Result<RawTransaction, CoreError> {
        let raw = self
            .rpc_call(
                "getrawtransaction",
                vec![
                    serde_json::json!(txid.to_string()),
                    serde_json::json!(TX_VERBOSITY),
                ],
            )
            .await
            .map_err(|err| normalize_getrawtransaction_error(txid, err))?;
        self.parse_raw_transaction(raw).await
    }

    async fn get_raw_transactions(&self, txids: &[Txid]) -> Result<Vec<RawTransaction>, CoreError> {
        if txids.is_empty() {
            return Ok(Vec::new());
        }

        let calls: Vec<Call> = txids
            .iter()
            .map(|txid| {
                (
                    "getrawtransaction",
                    vec![
                        serde_json::json!(txid.to_string()),
                        serde_json::json!(TX_VERBOSITY),
                    ],
                )
            })
            .collect();

        let raw_results = match self.rpc_batch_chunked(&calls).await {
            Ok(results) => results,
            Err(CoreError::UpstreamUnavailable(reason)) => {
                return Err(CoreError::UpstreamUnavailable(reason));
            }
            Err(batch_error) => {
                // A single unknown txid fails the whole batch; retry one by
                // one so the caller gets a typed not-found for that txid.
                warn!(
                    tx_count = txids.len(),
                    error = %batch_error,
                    "batch getrawtransaction failed; falling back to sequential requests"
                );

                let mut sequential = Vec::with_capacity(txids.len());
                for txid in txids {
                    sequential.push(self.get_raw_transaction(txid).await?);
                }
                return Ok(sequential);
            }
        };

        let parse_futures: Vec<_> = raw_results
            .into_iter()
            .map(|raw| self.parse_raw_transaction(raw))
            .collect();
        try_join_all(parse_futures).await
    }

    async fn estimate_fee(&self, blocks: u32) -> Result<Option<f64>, CoreError> {
        let raw = self
            .rpc_call("estimatesmartfee", vec![serde_json::json!(blocks)])
            .await?;
        parse_fee_estimate(&raw)
    }

    async fn send_raw_transaction(&self, raw_hex: &str) -> Result<Txid, CoreError> {
        let raw = self
            .rpc_call("sendrawtransaction", vec![serde_json::json!(raw_hex)])
            .await
            .map_err(normalize_broadcast_error)?;
        parse_txid(Some(&raw), "sendrawtransaction result")
    }

    async fn get_peer_info(&self) -> Result<Vec<PeerInfo>, CoreError> {
        let raw = self.rpc_call("getpeerinfo", Vec::new()).await?;
        parse_peer_info(&raw)
    }

    async fn get_tx_out_set_info(&self) -> Result<TxOutSetInfo, CoreError> {
        let raw = self.rpc_call("gettxoutsetinfo", Vec::new()).await?;
        parse_tx_out_set_info(&raw)
    }

    async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, CoreError> {
        self.rpc_call(method, params).await
    }
}

fn initial_request_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}

// ==============================================================================
// RPC Error Normalization
// ==============================================================================

/// Convert "missing tx" JSON-RPC responses into a typed not-found so the HTTP
/// layer can answer 404 instead of a generic upstream failure.
fn normalize_getrawtransaction_error(txid: &Txid, err: CoreError) -> CoreError {
    match err {
        CoreError::Rpc(RpcError::ServerError { code, message })
            if is_tx_not_found_server_error(code, &message) =>
        {
            CoreError::not_found(Entity::Tx, txid.to_string())
        }
        other => other,
    }
}

fn is_tx_not_found_server_error(code: i64, message: &str) -> bool {
    if code != -5 {
        return false;
    }

    let msg = message.to_ascii_lowercase();
    msg.contains("not found") || msg.contains("no such mempool or blockchain transaction")
}

/// Any error the node itself reports for `sendrawtransaction` is a refusal of
/// the transaction; transport failures stay as they are.
fn normalize_broadcast_error(err: CoreError) -> CoreError {
    match err {
        CoreError::Rpc(RpcError::ServerError { code, message }) => CoreError::BroadcastRejected {
            code,
            reason: message,
        },
        other => other,
    }
}
