//! Order watcher core for the mesh node.
//!
//! The watcher keeps every stored order's fillability in step with the
//! chain. Block events are decoded into candidate orders, re-validated at
//! the newest block and the resulting transitions are committed in one
//! store transaction before being published on the event feed.

use mesh_ethrpc::EthRpcError;
use mesh_storage::StorageError;
use mesh_validator::ValidatorError;
use thiserror::Error;

pub mod block_events;
pub mod cleanup;
pub mod expiration;
pub mod feed;
pub mod transitions;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use expiration::ExpirationIndex;
pub use feed::{EventFeed, Subscription};
pub use transitions::{Transition, Verdict};
pub use watcher::OrderWatcher;

/// Errors raised by the order watcher.
#[derive(Debug, Error)]
pub enum WatcherError {
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
	#[error("ETH-RPC error: {0}")]
	EthRpc(#[from] EthRpcError),
	#[error("Validator error: {0}")]
	Validator(#[from] ValidatorError),
	/// A block batch kept failing to persist.
	#[error("Block batch failed after {attempts} attempts: {source}")]
	BatchFailed {
		attempts: u32,
		#[source]
		source: Box<WatcherError>,
	},
	#[error("Shutdown error: {0}")]
	Shutdown(String),
}
