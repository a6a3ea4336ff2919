//! Read-serving core of a blockchain explorer.
//!
//! A [`HybridNode`](node::HybridNode) reconciles a full node's JSON-RPC
//! interface with a local index; gateways put validation and a coalescing
//! [`ResponseCache`](cache::ResponseCache) in front of it.

pub mod aggregate;
pub mod cache;
pub mod error;
pub mod gateway;
pub mod node;
pub mod rpc;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_util;

pub use error::CoreError;
pub use node::{HybridNode, NodeConfig, ReadinessPolicy, SupplySource};
