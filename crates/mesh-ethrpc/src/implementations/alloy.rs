//! Alloy-backed JSON-RPC client.

use crate::{CallRequest, EthRpcClient, EthRpcError, LogFilter};
use alloy::eips::{BlockId, BlockNumberOrTag};
use alloy::primitives::{Address, Bytes, TxKind, B256};
use alloy::providers::{Provider, RootProvider};
use alloy::rpc::types::{Block, Filter, Log, TransactionInput, TransactionRequest};
use alloy::transports::TransportResult;
use async_trait::async_trait;
use mesh_types::{EthLog, MiniHeader};
use std::future::IntoFuture;
use std::time::Duration;
use tracing::debug;

/// HTTP JSON-RPC client with a per-request deadline.
pub struct AlloyEthClient {
	provider: RootProvider,
	request_timeout: Duration,
}

impl AlloyEthClient {
	pub fn new(rpc_url: &str, request_timeout: Duration) -> Result<Self, EthRpcError> {
		let provider = RootProvider::new_http(
			rpc_url
				.parse()
				.map_err(|e| EthRpcError::Configuration(format!("Invalid RPC URL: {}", e)))?,
		);

		Ok(Self {
			provider,
			request_timeout,
		})
	}

	async fn bounded<T, F>(&self, request: F) -> Result<T, EthRpcError>
	where
		F: IntoFuture<Output = TransportResult<T>>,
	{
		match tokio::time::timeout(self.request_timeout, request).await {
			Ok(result) => result.map_err(|e| EthRpcError::Transport(e.to_string())),
			Err(_) => Err(EthRpcError::Timeout),
		}
	}
}

fn block_id(number: Option<u64>) -> BlockId {
	match number {
		Some(n) => BlockId::number(n),
		None => BlockId::latest(),
	}
}

pub(crate) fn to_mini_header(block: Block) -> MiniHeader {
	MiniHeader {
		number: block.header.number,
		hash: block.header.hash,
		parent: block.header.parent_hash,
		timestamp: block.header.timestamp,
		logs: Vec::new(),
	}
}

pub(crate) fn to_eth_log(log: Log) -> Result<EthLog, EthRpcError> {
	let missing = |field: &str| EthRpcError::InvalidResponse(format!("log without {}", field));
	Ok(EthLog {
		address: log.address(),
		topics: log.topics().to_vec(),
		data: log.data().data.clone(),
		block_number: log.block_number.ok_or_else(|| missing("block number"))?,
		block_hash: log.block_hash.ok_or_else(|| missing("block hash"))?,
		tx_hash: log.transaction_hash.ok_or_else(|| missing("transaction hash"))?,
		tx_index: log.transaction_index.unwrap_or_default(),
		log_index: log.log_index.ok_or_else(|| missing("log index"))?,
		removed: log.removed,
	})
}

#[async_trait]
impl EthRpcClient for AlloyEthClient {
	async fn header_by_hash(&self, hash: B256) -> Result<MiniHeader, EthRpcError> {
		let block = self
			.bounded(self.provider.get_block_by_hash(hash))
			.await?
			.ok_or_else(|| EthRpcError::NotFound(format!("block {}", hash)))?;
		Ok(to_mini_header(block))
	}

	async fn header_by_number(&self, number: Option<u64>) -> Result<MiniHeader, EthRpcError> {
		let tag = match number {
			Some(n) => BlockNumberOrTag::Number(n),
			None => BlockNumberOrTag::Latest,
		};
		let block = self
			.bounded(self.provider.get_block_by_number(tag))
			.await?
			.ok_or_else(|| EthRpcError::NotFound(format!("block {}", tag)))?;
		Ok(to_mini_header(block))
	}

	async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<EthLog>, EthRpcError> {
		let mut query = Filter::new().address(filter.addresses.clone());
		if let Some(hash) = filter.block_hash {
			query = query.at_block_hash(hash);
		} else {
			if let Some(from) = filter.from_block {
				query = query.from_block(from);
			}
			if let Some(to) = filter.to_block {
				query = query.to_block(to);
			}
		}

		let logs = self.bounded(self.provider.get_logs(&query)).await?;
		debug!(count = logs.len(), "Fetched logs");
		logs.into_iter().map(to_eth_log).collect()
	}

	async fn call_contract(
		&self,
		call: CallRequest,
		block_number: Option<u64>,
	) -> Result<Bytes, EthRpcError> {
		let tx = TransactionRequest {
			from: Some(call.from),
			to: Some(TxKind::Call(call.to)),
			input: TransactionInput::new(call.data),
			..Default::default()
		};
		self.bounded(self.provider.call(tx).block(block_id(block_number)))
			.await
	}

	async fn code_at(
		&self,
		address: Address,
		block_number: Option<u64>,
	) -> Result<Bytes, EthRpcError> {
		self.bounded(
			self.provider
				.get_code_at(address)
				.block_id(block_id(block_number)),
		)
		.await
	}

	async fn call_context(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Result<serde_json::Value, EthRpcError> {
		self.bounded(
			self.provider
				.raw_request::<_, serde_json::Value>(method.to_string().into(), params),
		)
		.await
	}
}
