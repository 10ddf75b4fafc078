//! Order store for the mesh node.
//!
//! This module provides the transactional document store the order watcher
//! persists into: orders with secondary indexes (maker, maker+salt,
//! maker+token, expiry), a bounded ring of recent mini-headers and a single
//! metadata document. Backends share the same indexing logic in
//! [`state::StoreState`] and differ only in how they persist it.

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mesh_config::{StorageBackend, StorageConfig};
use mesh_types::{MiniHeader, OrderStatusInfo, OrderWithMetadata};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub mod state;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

pub use state::StoreState;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found: {0}")]
	NotFound(String),
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error in the storage configuration.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Node-wide metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
	/// Orders expiring at or after this time are not admitted unless pinned.
	pub max_expiration_time: U256,
	/// UTC midnight opening the current RPC budget day.
	pub eth_rpc_request_day_start: DateTime<Utc>,
	/// RPC requests spent since `eth_rpc_request_day_start`.
	pub eth_rpc_requests_used: u64,
}

impl Default for Metadata {
	fn default() -> Self {
		Self {
			max_expiration_time: U256::MAX,
			eth_rpc_request_day_start: DateTime::<Utc>::default(),
			eth_rpc_requests_used: 0,
		}
	}
}

/// Result of an atomic batch insert.
#[derive(Debug, Clone, Default)]
pub struct AddOrdersOutcome {
	/// Incoming orders that were already stored and not removed.
	pub already_stored: Vec<B256>,
	/// Incoming orders that were inserted and survived eviction.
	pub added: Vec<OrderWithMetadata>,
	/// Orders evicted to respect capacity. Incoming orders listed here were
	/// never persisted; stored orders listed here are now soft-removed.
	pub removed: Vec<OrderWithMetadata>,
}

/// Filter for [`OrderStore::find_orders`]. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct OrderQuery {
	pub is_removed: Option<bool>,
	pub is_pinned: Option<bool>,
	pub is_expired: Option<bool>,
	pub last_updated_before: Option<DateTime<Utc>>,
	pub last_validated_before: Option<u64>,
	pub limit: Option<usize>,
}

impl OrderQuery {
	pub fn matches(&self, order: &OrderWithMetadata) -> bool {
		self.is_removed.map_or(true, |v| order.is_removed == v)
			&& self.is_pinned.map_or(true, |v| order.is_pinned == v)
			&& self.is_expired.map_or(true, |v| order.is_expired == v)
			&& self
				.last_updated_before
				.map_or(true, |t| order.last_updated < t)
			&& self
				.last_validated_before
				.map_or(true, |n| order.last_validated_block.number < n)
	}
}

/// Number of stored orders by category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderCounts {
	/// Orders that are not soft-removed.
	pub live: usize,
	/// Live orders that are pinned.
	pub live_pinned: usize,
	/// All records including soft-removed ones.
	pub total: usize,
}

/// Writes applied together by [`OrderStore::commit`].
#[derive(Debug, Clone, Default)]
pub struct StoreTransaction {
	pub upsert_orders: Vec<OrderWithMetadata>,
	pub add_headers: Vec<MiniHeader>,
	pub remove_headers: Vec<B256>,
}

impl StoreTransaction {
	pub fn is_empty(&self) -> bool {
		self.upsert_orders.is_empty() && self.add_headers.is_empty() && self.remove_headers.is_empty()
	}
}

/// Read-modify-write closure applied under the store lock.
pub type OrderUpdate = Box<dyn FnOnce(&mut OrderWithMetadata) + Send>;

/// Read-modify-write closure for the metadata document.
pub type MetadataUpdate = Box<dyn FnOnce(&mut Metadata) + Send>;

/// Trait defining the interface for order store backends.
///
/// Every method is atomic with respect to every other method on the same
/// store.
#[async_trait]
pub trait OrderStore: Send + Sync {
	/// Inserts new orders, enforces `max_orders` by evicting the
	/// farthest-expiring non-pinned orders (incoming ones included) and
	/// lowers the max-expiration cutoff to the smallest evicted expiry.
	async fn add_orders(
		&self,
		orders: Vec<OrderWithMetadata>,
		max_orders: usize,
		now: DateTime<Utc>,
	) -> Result<AddOrdersOutcome, StorageError>;

	async fn get_order(&self, hash: &B256) -> Result<Option<OrderWithMetadata>, StorageError>;

	/// Applies `update` to a stored order and returns the new value.
	async fn update_order(
		&self,
		hash: &B256,
		update: OrderUpdate,
	) -> Result<OrderWithMetadata, StorageError>;

	/// Orders matching `query`, sorted by (expiry, hash).
	async fn find_orders(&self, query: &OrderQuery) -> Result<Vec<OrderWithMetadata>, StorageError>;

	/// Orders by `maker` with a salt strictly below `max_salt`.
	async fn find_orders_by_maker_and_max_salt(
		&self,
		maker: Address,
		max_salt: U256,
	) -> Result<Vec<OrderWithMetadata>, StorageError>;

	/// Orders by `maker` referencing `token` on the maker side. When
	/// `token_id` is set only orders for that id (or any id) match.
	async fn find_orders_by_maker_and_token_and_id(
		&self,
		maker: Address,
		token: Address,
		token_id: Option<U256>,
	) -> Result<Vec<OrderWithMetadata>, StorageError>;

	async fn order_counts(&self) -> Result<OrderCounts, StorageError>;

	/// Physically deletes orders and returns the deleted records.
	async fn delete_orders(&self, hashes: &[B256]) -> Result<Vec<OrderWithMetadata>, StorageError>;

	/// Applies order upserts and header changes in one step.
	async fn commit(&self, tx: StoreTransaction) -> Result<(), StorageError>;

	/// Adds a header, evicting the oldest beyond the retention limit.
	async fn add_mini_header(&self, header: MiniHeader) -> Result<(), StorageError>;

	async fn delete_mini_header(&self, hash: &B256) -> Result<(), StorageError>;

	async fn get_latest_mini_header(&self) -> Result<Option<MiniHeader>, StorageError>;

	/// All retained headers in ascending block order.
	async fn get_mini_headers(&self) -> Result<Vec<MiniHeader>, StorageError>;

	async fn get_metadata(&self) -> Result<Metadata, StorageError>;

	async fn update_metadata(&self, update: MetadataUpdate) -> Result<Metadata, StorageError>;

	/// Status summary per hash, in input order.
	async fn get_order_statuses(
		&self,
		hashes: &[B256],
	) -> Result<Vec<OrderStatusInfo>, StorageError> {
		let mut statuses = Vec::with_capacity(hashes.len());
		for hash in hashes {
			let status = match self.get_order(hash).await? {
				Some(order) => OrderStatusInfo::from(&order),
				None => OrderStatusInfo::default(),
			};
			statuses.push(status);
		}
		Ok(statuses)
	}

	async fn get_current_max_expiration_time(&self) -> Result<U256, StorageError> {
		Ok(self.get_metadata().await?.max_expiration_time)
	}
}

/// Factory function to create a store from configuration.
pub async fn create_storage(
	config: &StorageConfig,
	mini_header_retention: usize,
) -> Result<Arc<dyn OrderStore>, StorageError> {
	match config.backend {
		StorageBackend::Memory => Ok(Arc::new(implementations::memory::MemoryStorage::new(
			mini_header_retention,
		))),
		StorageBackend::File => {
			let path = config.path.clone().ok_or_else(|| {
				StorageError::Configuration("file backend requires a path".to_string())
			})?;
			let storage =
				implementations::file::FileStorage::open(path, mini_header_retention).await?;
			Ok(Arc::new(storage))
		}
	}
}
