//! File-backed order store.
//!
//! The full store is kept in memory and written out as a JSON snapshot after
//! every mutating call, so a restarted node resumes with the same orders,
//! headers and RPC budget.

use super::memory::MemoryStorage;
use crate::state::{Snapshot, StoreState};
use crate::{
	AddOrdersOutcome, Metadata, MetadataUpdate, OrderCounts, OrderQuery, OrderStore, OrderUpdate,
	StorageError, StoreTransaction,
};
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mesh_types::{MiniHeader, OrderWithMetadata};
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Snapshot-file storage implementation.
pub struct FileStorage {
	/// Snapshot file path.
	path: PathBuf,
	inner: MemoryStorage,
	/// Serializes mutations with their snapshot writes.
	write_lock: Mutex<()>,
}

impl FileStorage {
	/// Opens the store at `path`, loading an existing snapshot if present.
	pub async fn open(path: PathBuf, mini_header_retention: usize) -> Result<Self, StorageError> {
		let state = match fs::read(&path).await {
			Ok(bytes) => {
				let snapshot: Snapshot = serde_json::from_slice(&bytes)
					.map_err(|e| StorageError::Serialization(e.to_string()))?;
				info!(
					path = %path.display(),
					orders = snapshot.orders.len(),
					headers = snapshot.headers.len(),
					"Loaded order store snapshot"
				);
				StoreState::from_snapshot(snapshot, mini_header_retention)
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				StoreState::new(mini_header_retention)
			}
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		Ok(Self {
			path,
			inner: MemoryStorage::from_state(state),
			write_lock: Mutex::new(()),
		})
	}

	async fn persist(&self) -> Result<(), StorageError> {
		let snapshot = self.inner.state().read().await.to_snapshot();
		let bytes =
			serde_json::to_vec(&snapshot).map_err(|e| StorageError::Serialization(e.to_string()))?;

		// Create parent directory if it doesn't exist
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		// Write atomically by writing to temp file then renaming
		let temp_path = self.path.with_extension("tmp");
		fs::write(&temp_path, bytes)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, &self.path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		debug!(path = %self.path.display(), "Persisted order store snapshot");
		Ok(())
	}
}

#[async_trait]
impl OrderStore for FileStorage {
	async fn add_orders(
		&self,
		orders: Vec<OrderWithMetadata>,
		max_orders: usize,
		now: DateTime<Utc>,
	) -> Result<AddOrdersOutcome, StorageError> {
		let _guard = self.write_lock.lock().await;
		let outcome = self.inner.add_orders(orders, max_orders, now).await?;
		self.persist().await?;
		Ok(outcome)
	}

	async fn get_order(&self, hash: &B256) -> Result<Option<OrderWithMetadata>, StorageError> {
		self.inner.get_order(hash).await
	}

	async fn update_order(
		&self,
		hash: &B256,
		update: OrderUpdate,
	) -> Result<OrderWithMetadata, StorageError> {
		let _guard = self.write_lock.lock().await;
		let order = self.inner.update_order(hash, update).await?;
		self.persist().await?;
		Ok(order)
	}

	async fn find_orders(&self, query: &OrderQuery) -> Result<Vec<OrderWithMetadata>, StorageError> {
		self.inner.find_orders(query).await
	}

	async fn find_orders_by_maker_and_max_salt(
		&self,
		maker: Address,
		max_salt: U256,
	) -> Result<Vec<OrderWithMetadata>, StorageError> {
		self.inner
			.find_orders_by_maker_and_max_salt(maker, max_salt)
			.await
	}

	async fn find_orders_by_maker_and_token_and_id(
		&self,
		maker: Address,
		token: Address,
		token_id: Option<U256>,
	) -> Result<Vec<OrderWithMetadata>, StorageError> {
		self.inner
			.find_orders_by_maker_and_token_and_id(maker, token, token_id)
			.await
	}

	async fn order_counts(&self) -> Result<OrderCounts, StorageError> {
		self.inner.order_counts().await
	}

	async fn delete_orders(&self, hashes: &[B256]) -> Result<Vec<OrderWithMetadata>, StorageError> {
		let _guard = self.write_lock.lock().await;
		let deleted = self.inner.delete_orders(hashes).await?;
		if !deleted.is_empty() {
			self.persist().await?;
		}
		Ok(deleted)
	}

	async fn commit(&self, tx: StoreTransaction) -> Result<(), StorageError> {
		if tx.is_empty() {
			return Ok(());
		}
		let _guard = self.write_lock.lock().await;
		self.inner.commit(tx).await?;
		self.persist().await
	}

	async fn add_mini_header(&self, header: MiniHeader) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		self.inner.add_mini_header(header).await?;
		self.persist().await
	}

	async fn delete_mini_header(&self, hash: &B256) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;
		self.inner.delete_mini_header(hash).await?;
		self.persist().await
	}

	async fn get_latest_mini_header(&self) -> Result<Option<MiniHeader>, StorageError> {
		self.inner.get_latest_mini_header().await
	}

	async fn get_mini_headers(&self) -> Result<Vec<MiniHeader>, StorageError> {
		self.inner.get_mini_headers().await
	}

	async fn get_metadata(&self) -> Result<Metadata, StorageError> {
		self.inner.get_metadata().await
	}

	async fn update_metadata(&self, update: MetadataUpdate) -> Result<Metadata, StorageError> {
		let _guard = self.write_lock.lock().await;
		let metadata = self.inner.update_metadata(update).await?;
		self.persist().await?;
		Ok(metadata)
	}
}
