mod cli;
mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::Network;
use clap::Parser;
use eyre::{eyre, WrapErr};

use blockscope_core::aggregate::AggregationService;
use blockscope_core::cache::{CacheConfig, ResponseCache};
use blockscope_core::gateway::Gateways;
use blockscope_core::rpc::{HttpRpcClient, NodeRpc, RpcSettings};
use blockscope_core::store::MemoryStore;
use blockscope_core::{HybridNode, NodeConfig, ReadinessPolicy};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    let settings = RpcSettings {
        endpoint: args.rpc_url.clone(),
        user: args.rpc_user.clone(),
        pass: args.rpc_pass.clone(),
        cookie_file: args.rpc_cookie_file.clone(),
        requests_per_second: args.rpc_requests_per_second,
        batch_chunk_size: args.rpc_batch_chunk_size,
        timeout: Duration::from_secs(args.rpc_timeout_secs),
    };
    let rpc: Arc<dyn NodeRpc> =
        Arc::new(HttpRpcClient::new(&settings).wrap_err("configure node RPC client")?);

    // The node may still be starting; only a wrong chain is fatal here.
    match rpc.get_info().await {
        Ok(info) => {
            tracing::info!(chain = %info.chain, blocks = info.blocks, "connected to node");
            let chain = map_chain_to_network(&info.chain)?;
            if chain != args.network {
                return Err(eyre!(
                    "node reports chain `{}` but --network is `{}`",
                    info.chain,
                    args.network
                ));
            }
            if info.pruned {
                tracing::warn!(
                    "node is pruned; transactions missing from the index may not resolve"
                );
            }
        }
        Err(err) => {
            let message = format_rpc_connect_error(&args.rpc_url, &err.to_string());
            tracing::warn!(
                "{message}\nserving index data while the node is retried in the background"
            );
        }
    }

    let store = Arc::new(match &args.index_snapshot {
        Some(path) => MemoryStore::load_jsonl(path).wrap_err("load index snapshot")?,
        None => {
            tracing::warn!("no index snapshot given; address and aggregate routes will be empty");
            MemoryStore::new()
        }
    });
    if let Some(path) = &args.index_snapshot {
        spawn_snapshot_reloader(Arc::clone(&store), path.clone());
    }

    let readiness = match args.readiness {
        cli::ReadinessMode::Fail => ReadinessPolicy::Fail,
        cli::ReadinessMode::Wait => {
            ReadinessPolicy::Wait(Duration::from_secs(args.readiness_wait_secs))
        }
    };
    let node = Arc::new(HybridNode::new(
        rpc,
        store,
        NodeConfig {
            coin: args.coin.clone(),
            network: args.network,
            readiness,
            supply_source: args.supply_source,
        },
    ));
    node.spawn_start();

    let cache = Arc::new(ResponseCache::new(CacheConfig {
        short_ttl: Duration::from_secs(args.cache_short_ttl_secs),
        long_ttl: Duration::from_secs(args.cache_long_ttl_secs),
        max_entries: args.cache_max_entries,
    }));
    cache.spawn_sweeper(Duration::from_secs(args.cache_sweep_secs));

    let aggregates = Arc::new(AggregationService::new(Arc::clone(&node), args.last_txs));
    let state = server::AppState {
        gateways: Gateways::new(
            Arc::clone(&node),
            aggregates,
            Arc::clone(&cache),
            args.page_size,
        ),
        node,
        cache,
        rpc_whitelist: if args.heavy {
            server::RpcWhitelist::heavy()
        } else {
            server::RpcWhitelist::standard()
        },
    };

    let allow_origin =
        server::parse_cors_origin(&args.cors_origin).wrap_err("parse --cors-origin")?;
    let router = server::build_router(state, allow_origin);

    let bind_addr = format!("{}:{}", args.bind, args.port);
    if args.bind == "0.0.0.0" {
        tracing::warn!("server is bound to 0.0.0.0; it is accessible from the network");
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .context("bind TCP listener")?;

    tracing::info!("listening on {bind_addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("run HTTP server")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

/// Reload the index snapshot on SIGHUP. A snapshot that fails to parse is
/// logged and the previous data keeps serving.
#[cfg(unix)]
fn spawn_snapshot_reloader(store: Arc<MemoryStore>, path: PathBuf) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::warn!(error = %err, "snapshot reload on SIGHUP unavailable");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            // A successful reload is logged by the store itself.
            if let Err(err) = store.reload(&path).await {
                tracing::warn!(error = %err, "snapshot reload failed; keeping previous data");
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_snapshot_reloader(_store: Arc<MemoryStore>, _path: PathBuf) {}

fn format_rpc_connect_error(rpc_url: &str, source_error: &str) -> String {
    let mut lines = vec![
        format!("could not reach node RPC endpoint `{rpc_url}`"),
        format!("RPC error: {source_error}"),
    ];

    if source_error.contains("Could not resolve host") || source_error.contains("dns error") {
        lines.push(
            "hint: hostname resolution failed; verify the endpoint hostname and your DNS/network"
                .into(),
        );
    } else if source_error.contains("401") || source_error.contains("403") {
        lines.push(
            "hint: authentication failed; verify --rpc-user/--rpc-pass or --rpc-cookie-file"
                .into(),
        );
    } else if source_error.contains("Connection refused") || source_error.contains("connect") {
        lines.push(
            "hint: nothing is listening there yet; is the node running with -server=1?".into(),
        );
    }

    lines.join("\n")
}

fn map_chain_to_network(chain: &str) -> eyre::Result<Network> {
    match chain {
        "main" => Ok(Network::Bitcoin),
        "test" => Ok(Network::Testnet),
        "signet" => Ok(Network::Signet),
        "regtest" => Ok(Network::Regtest),
        _ => Err(eyre!("unrecognized chain name `{chain}` from getblockchaininfo")),
    }
}
