//! Ethereum JSON-RPC access for the mesh node.
//!
//! This crate provides the [`EthRpcClient`] interface the watcher and the
//! block watcher read chain state through, an alloy-backed implementation,
//! and [`RateLimitedClient`], which enforces the per-second and per-day
//! request budgets in front of any client.

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use mesh_types::{EthLog, MiniHeader};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod rate_limit;

/// Re-export implementations
pub mod implementations {
	pub mod alloy;
}

pub use implementations::alloy::AlloyEthClient;
pub use rate_limit::RateLimitedClient;

/// Errors returned by RPC clients.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EthRpcError {
	#[error("Transport error: {0}")]
	Transport(String),
	#[error("Request timed out")]
	Timeout,
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Invalid response: {0}")]
	InvalidResponse(String),
	#[error("Daily RPC request budget exhausted")]
	RequestBudgetExhausted,
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Read-only contract call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
	pub from: Address,
	pub to: Address,
	pub data: Bytes,
}

/// Log query. Either a single block hash or a block-number range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
	pub addresses: Vec<Address>,
	pub block_hash: Option<B256>,
	pub from_block: Option<u64>,
	pub to_block: Option<u64>,
}

impl LogFilter {
	/// Logs emitted by `addresses` in the block with `hash`.
	pub fn at_block_hash(hash: B256, addresses: Vec<Address>) -> Self {
		Self {
			addresses,
			block_hash: Some(hash),
			..Default::default()
		}
	}
}

/// Trait defining the chain reads the node performs.
///
/// Block numbers of `None` mean the latest block.
#[async_trait]
pub trait EthRpcClient: Send + Sync {
	async fn header_by_hash(&self, hash: B256) -> Result<MiniHeader, EthRpcError>;

	async fn header_by_number(&self, number: Option<u64>) -> Result<MiniHeader, EthRpcError>;

	async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<EthLog>, EthRpcError>;

	/// `eth_call` pinned to `block_number`.
	async fn call_contract(
		&self,
		call: CallRequest,
		block_number: Option<u64>,
	) -> Result<Bytes, EthRpcError>;

	async fn code_at(&self, address: Address, block_number: Option<u64>)
		-> Result<Bytes, EthRpcError>;

	/// Arbitrary JSON-RPC method with JSON params and result.
	async fn call_context(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Result<serde_json::Value, EthRpcError>;
}
