//! In-memory order store.

use crate::state::StoreState;
use crate::{
	AddOrdersOutcome, Metadata, MetadataUpdate, OrderCounts, OrderQuery, OrderStore, OrderUpdate,
	StorageError, StoreTransaction,
};
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mesh_types::{MiniHeader, OrderWithMetadata};
use tokio::sync::RwLock;

/// Store kept entirely in process memory. Contents are lost on restart.
pub struct MemoryStorage {
	state: RwLock<StoreState>,
}

impl MemoryStorage {
	pub fn new(mini_header_retention: usize) -> Self {
		Self::from_state(StoreState::new(mini_header_retention))
	}

	pub fn from_state(state: StoreState) -> Self {
		Self {
			state: RwLock::new(state),
		}
	}

	pub(crate) fn state(&self) -> &RwLock<StoreState> {
		&self.state
	}
}

#[async_trait]
impl OrderStore for MemoryStorage {
	async fn add_orders(
		&self,
		orders: Vec<OrderWithMetadata>,
		max_orders: usize,
		now: DateTime<Utc>,
	) -> Result<AddOrdersOutcome, StorageError> {
		Ok(self.state.write().await.add_orders(orders, max_orders, now))
	}

	async fn get_order(&self, hash: &B256) -> Result<Option<OrderWithMetadata>, StorageError> {
		Ok(self.state.read().await.get(hash).cloned())
	}

	async fn update_order(
		&self,
		hash: &B256,
		update: OrderUpdate,
	) -> Result<OrderWithMetadata, StorageError> {
		self.state
			.write()
			.await
			.update_order(hash, update)
			.ok_or_else(|| StorageError::NotFound(hash.to_string()))
	}

	async fn find_orders(&self, query: &OrderQuery) -> Result<Vec<OrderWithMetadata>, StorageError> {
		Ok(self.state.read().await.find_orders(query))
	}

	async fn find_orders_by_maker_and_max_salt(
		&self,
		maker: Address,
		max_salt: U256,
	) -> Result<Vec<OrderWithMetadata>, StorageError> {
		Ok(self
			.state
			.read()
			.await
			.find_orders_by_maker_and_max_salt(maker, max_salt))
	}

	async fn find_orders_by_maker_and_token_and_id(
		&self,
		maker: Address,
		token: Address,
		token_id: Option<U256>,
	) -> Result<Vec<OrderWithMetadata>, StorageError> {
		Ok(self
			.state
			.read()
			.await
			.find_orders_by_maker_and_token_and_id(maker, token, token_id))
	}

	async fn order_counts(&self) -> Result<OrderCounts, StorageError> {
		Ok(self.state.read().await.order_counts())
	}

	async fn delete_orders(&self, hashes: &[B256]) -> Result<Vec<OrderWithMetadata>, StorageError> {
		Ok(self.state.write().await.delete_orders(hashes))
	}

	async fn commit(&self, tx: StoreTransaction) -> Result<(), StorageError> {
		self.state.write().await.commit(tx);
		Ok(())
	}

	async fn add_mini_header(&self, header: MiniHeader) -> Result<(), StorageError> {
		self.state.write().await.add_mini_header(header);
		Ok(())
	}

	async fn delete_mini_header(&self, hash: &B256) -> Result<(), StorageError> {
		self.state.write().await.delete_mini_header(hash);
		Ok(())
	}

	async fn get_latest_mini_header(&self) -> Result<Option<MiniHeader>, StorageError> {
		Ok(self.state.read().await.latest_mini_header())
	}

	async fn get_mini_headers(&self) -> Result<Vec<MiniHeader>, StorageError> {
		Ok(self.state.read().await.mini_headers())
	}

	async fn get_metadata(&self) -> Result<Metadata, StorageError> {
		Ok(self.state.read().await.metadata().clone())
	}

	async fn update_metadata(&self, update: MetadataUpdate) -> Result<Metadata, StorageError> {
		let mut state = self.state.write().await;
		update(state.metadata_mut());
		Ok(state.metadata().clone())
	}
}
