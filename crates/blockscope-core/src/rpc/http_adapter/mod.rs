//! Native JSON-RPC client for full-node endpoints.
//!
//! Implements [`NodeRpc`](super::NodeRpc) over JSON-RPC using `reqwest`,
//! with optional request rate limiting, single and batched calls, basic or
//! cookie auth, and an LRU block-height cache.

mod client;
mod connection;
mod parsing;
mod protocol;

pub use client::{HttpRpcClient, RpcSettings};
