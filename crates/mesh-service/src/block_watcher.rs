//! Polling block watcher.
//!
//! Keeps a bounded stack of recent headers, polls the node for its latest
//! block and turns every change into an ordered batch of block events:
//! removals of abandoned headers (newest first) followed by additions of
//! the new segment (oldest first). Each added header carries the logs
//! emitted by the contracts the order watcher currently tracks.

use alloy::primitives::Address;
use mesh_core::OrderWatcher;
use mesh_ethrpc::{EthRpcClient, EthRpcError, LogFilter};
use mesh_storage::StorageError;
use mesh_types::{BlockEvent, MiniHeader};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BlockWatchError {
	#[error("ETH-RPC error: {0}")]
	EthRpc(#[from] EthRpcError),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

pub struct BlockWatcher {
	client: Arc<dyn EthRpcClient>,
	watcher: Arc<OrderWatcher>,
	/// Recent canonical headers in ascending order.
	stack: Vec<MiniHeader>,
	retention: usize,
	polling_interval: Duration,
}

impl BlockWatcher {
	/// Builds a watcher resuming from the headers persisted in the store.
	pub async fn new(
		client: Arc<dyn EthRpcClient>,
		watcher: Arc<OrderWatcher>,
		polling_interval: Duration,
		retention: usize,
	) -> Result<Self, BlockWatchError> {
		let stack = watcher.store().get_mini_headers().await?;
		if let Some(head) = stack.last() {
			info!(block = head.number, "Resuming block watcher");
		}
		Ok(Self {
			client,
			watcher,
			stack,
			retention: retention.max(1),
			polling_interval,
		})
	}

	async fn with_logs(
		&self,
		mut header: MiniHeader,
		addresses: &[Address],
	) -> Result<MiniHeader, BlockWatchError> {
		if !addresses.is_empty() {
			let filter = LogFilter::at_block_hash(header.hash, addresses.to_vec());
			header.logs = self.client.filter_logs(&filter).await?;
		}
		Ok(header)
	}

	/// Fetches the latest block and returns the events that bring the stack
	/// up to it. The stack only changes when the whole poll succeeds.
	pub async fn poll(&mut self) -> Result<Vec<BlockEvent>, BlockWatchError> {
		let latest = self.client.header_by_number(None).await?;
		if self.stack.last().is_some_and(|head| head.hash == latest.hash) {
			return Ok(Vec::new());
		}

		// The chain was rewound onto a header we already hold.
		if let Some(pos) = self.stack.iter().position(|h| h.hash == latest.hash) {
			let removed = self.stack.split_off(pos + 1);
			warn!(block = latest.number, removed = removed.len(), "Chain rewound");
			return Ok(removed.into_iter().rev().map(BlockEvent::removed).collect());
		}

		// Walk back from the new head until it joins the stack.
		let mut segment = vec![latest];
		let mut ancestor = None;
		loop {
			let Some(current) = segment.last() else {
				break;
			};
			if let Some(pos) = self.stack.iter().position(|h| h.hash == current.parent) {
				ancestor = Some(pos);
				break;
			}
			if self.stack.is_empty() || segment.len() >= self.retention || current.number == 0 {
				break;
			}
			let parent = self.client.header_by_hash(current.parent).await?;
			segment.push(parent);
		}
		if ancestor.is_none() && !self.stack.is_empty() {
			warn!(
				depth = segment.len(),
				"New head does not join any retained header, replacing all"
			);
		}

		let addresses = self.watcher.decoder().tracked_addresses();
		let mut added = Vec::with_capacity(segment.len());
		for header in segment.into_iter().rev() {
			added.push(self.with_logs(header, &addresses).await?);
		}

		let keep = ancestor.map_or(0, |pos| pos + 1);
		let removed = self.stack.split_off(keep);
		if !removed.is_empty() {
			info!(
				removed = removed.len(),
				added = added.len(),
				"Reorg detected"
			);
		}

		let mut events: Vec<BlockEvent> = removed.into_iter().rev().map(BlockEvent::removed).collect();
		events.extend(added.iter().cloned().map(BlockEvent::added));
		self.stack.extend(added);
		if self.stack.len() > self.retention {
			let excess = self.stack.len() - self.retention;
			self.stack.drain(..excess);
		}
		Ok(events)
	}

	/// Polls until shutdown or until the order watcher stops listening.
	pub async fn run(
		mut self,
		sender: mpsc::Sender<Vec<BlockEvent>>,
		mut shutdown: broadcast::Receiver<()>,
	) {
		let mut interval =
			tokio::time::interval(self.polling_interval.max(Duration::from_millis(100)));
		interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = interval.tick() => {
					match self.poll().await {
						Ok(events) if events.is_empty() => {}
						Ok(events) => {
							debug!(events = events.len(), "Forwarding block events");
							if sender.send(events).await.is_err() {
								info!("Order watcher stopped, stopping block watcher");
								break;
							}
						}
						Err(e) => warn!("Block poll failed: {}", e),
					}
				}
				_ = shutdown.recv() => {
					debug!("Block watcher received shutdown signal");
					break;
				}
			}
		}
	}
}
