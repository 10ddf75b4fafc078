//! The order watcher: submission path, shared state and helpers used by
//! block-event processing and cleanup.

use crate::expiration::ExpirationIndex;
use crate::feed::{EventFeed, Subscription};
use crate::transitions::{order_event, Evidence};
use crate::WatcherError;
use alloy::primitives::{B256, U256};
use mesh_config::WatcherConfig;
use mesh_decoder::EventDecoder;
use mesh_ethrpc::EthRpcClient;
use mesh_storage::{OrderQuery, OrderStore};
use mesh_types::{
	short_hash, Clock, ContractKind, EndState, KeepOptions, MiniHeader, Order, OrderStatusInfo,
	OrderWithMetadata, RejectedOrderInfo, RejectedOrderKind, RejectedOrderStatus, SignedOrder,
};
use mesh_validator::{AcceptedOrderInfo, OrderValidator, ValidationResults};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Keeps the fillability of stored orders in step with the chain.
pub struct OrderWatcher {
	pub(crate) store: Arc<dyn OrderStore>,
	pub(crate) client: Arc<dyn EthRpcClient>,
	pub(crate) validator: OrderValidator,
	pub(crate) decoder: EventDecoder,
	pub(crate) expiration: ExpirationIndex,
	pub(crate) feed: EventFeed,
	pub(crate) clock: Arc<dyn Clock>,
	pub(crate) config: WatcherConfig,
	/// Serializes every pass that validates stored or incoming orders.
	pub(crate) validation_lock: tokio::sync::Mutex<()>,
	/// Orders whose last re-validation failed on RPC errors.
	pub(crate) pending: Mutex<HashSet<B256>>,
	/// Orders validated since the last cleanup.
	pub(crate) recently_validated: Mutex<HashSet<B256>>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl OrderWatcher {
	/// Builds a watcher and rebuilds its in-memory indexes from `store`.
	pub async fn new(
		store: Arc<dyn OrderStore>,
		client: Arc<dyn EthRpcClient>,
		validator: OrderValidator,
		config: WatcherConfig,
		clock: Arc<dyn Clock>,
	) -> Result<Self, WatcherError> {
		let watcher = Self {
			feed: EventFeed::new(config.subscriber_buffer, config.slow_subscriber_timeout()),
			store,
			client,
			validator,
			decoder: EventDecoder::new(),
			expiration: ExpirationIndex::new(),
			clock,
			config,
			validation_lock: tokio::sync::Mutex::new(()),
			pending: Mutex::new(HashSet::new()),
			recently_validated: Mutex::new(HashSet::new()),
		};

		let stored = watcher.store.find_orders(&OrderQuery::default()).await?;
		for order in &stored {
			watcher.register_order(order);
			watcher.expiration.sync(order);
		}
		info!(
			orders = stored.len(),
			tracked_contracts = watcher.decoder.tracked_addresses().len(),
			"Order watcher loaded"
		);
		Ok(watcher)
	}

	pub fn subscribe(&self) -> Subscription {
		self.feed.subscribe()
	}

	pub fn feed(&self) -> &EventFeed {
		&self.feed
	}

	pub fn decoder(&self) -> &EventDecoder {
		&self.decoder
	}

	pub fn expiration_index(&self) -> &ExpirationIndex {
		&self.expiration
	}

	pub fn store(&self) -> &Arc<dyn OrderStore> {
		&self.store
	}

	pub async fn get_order_statuses(
		&self,
		hashes: &[B256],
	) -> Result<Vec<OrderStatusInfo>, WatcherError> {
		Ok(self.store.get_order_statuses(hashes).await?)
	}

	/// Counts the contracts a stored record makes relevant.
	pub(crate) fn register_order(&self, order: &OrderWithMetadata) {
		self.decoder
			.register(ContractKind::Exchange, order.order.verifying_contract());
		for token in &order.token_refs {
			self.decoder.register(token.kind, token.address);
		}
	}

	pub(crate) fn unregister_order(&self, order: &OrderWithMetadata) {
		self.decoder
			.unregister(ContractKind::Exchange, order.order.verifying_contract());
		for token in &order.token_refs {
			self.decoder.unregister(token.kind, token.address);
		}
	}

	/// Latest known header, asking the chain when none is stored yet.
	pub(crate) async fn latest_header(&self) -> Result<MiniHeader, WatcherError> {
		match self.store.get_latest_mini_header().await? {
			Some(header) => Ok(header),
			None => Ok(self.client.header_by_number(None).await?),
		}
	}

	/// Expiration bound for incoming non-pinned orders at `latest`.
	async fn max_expiration(&self, latest: &MiniHeader) -> Result<U256, WatcherError> {
		let cutoff = self.store.get_current_max_expiration_time().await?;
		Ok(match self.config.max_expiration_secs {
			Some(secs) => {
				cutoff.min(U256::from(latest.timestamp).saturating_add(U256::from(secs)))
			}
			None => cutoff,
		})
	}

	pub(crate) fn mark_recently_validated(&self, hashes: impl IntoIterator<Item = B256>) {
		lock(&self.recently_validated).extend(hashes);
	}

	/// Validates `orders` and stores those that pass. Accepted orders that
	/// were not stored yet emit `Added`; stored orders displaced by capacity
	/// emit `StoppedWatching`. Rejected orders selected by `keep` are stored
	/// as unfillable without an event.
	pub async fn validate_and_store(
		&self,
		orders: Vec<Order>,
		pinned: bool,
		keep: KeepOptions,
	) -> Result<ValidationResults, WatcherError> {
		let _guard = self.validation_lock.lock().await;
		let now = self.clock.now();
		let latest = self.latest_header().await?;
		let mut results = ValidationResults::default();

		// Drop in-call duplicates and answer already-stored orders from the store.
		let mut seen = HashSet::new();
		let mut unique = Vec::with_capacity(orders.len());
		for order in orders {
			let hash = order.hash();
			if seen.insert(hash) {
				unique.push((hash, order));
			}
		}
		let hashes: Vec<B256> = unique.iter().map(|(hash, _)| *hash).collect();
		let statuses = self.store.get_order_statuses(&hashes).await?;
		let previously_stored: HashSet<B256> = hashes
			.iter()
			.zip(&statuses)
			.filter(|(_, status)| status.is_stored)
			.map(|(hash, _)| *hash)
			.collect();

		let counts = self.store.order_counts().await?;
		let mut candidates = Vec::new();
		for ((hash, order), status) in unique.into_iter().zip(statuses) {
			if status.is_stored && !status.is_marked_removed && !status.is_marked_unfillable {
				results.accepted.push(AcceptedOrderInfo {
					hash,
					order,
					fillable_taker_amount: status.fillable_taker_amount,
					is_new: false,
				});
			} else if status.is_stored && !status.is_marked_removed {
				results.rejected.push(RejectedOrderInfo::new(
					hash,
					order,
					RejectedOrderStatus::OrderAlreadyStoredAndUnfillable,
				));
			} else if order.expiry() <= U256::from(latest.timestamp) {
				results.rejected.push(RejectedOrderInfo::new(
					hash,
					order,
					RejectedOrderStatus::Expired,
				));
			} else if !pinned && counts.live_pinned >= self.config.max_orders {
				results.rejected.push(RejectedOrderInfo::new(
					hash,
					order,
					RejectedOrderStatus::DatabaseFullOfOrders,
				));
			} else {
				candidates.push(order);
			}
		}

		let max_expiration = if pinned {
			U256::MAX
		} else {
			self.max_expiration(&latest).await?
		};
		let validated = self
			.validator
			.batch_validate(candidates, max_expiration, latest.number)
			.await;

		let block = latest.block_ref();
		let mut to_store: Vec<OrderWithMetadata> = validated
			.accepted
			.iter()
			.map(|accepted| {
				OrderWithMetadata::new(
					accepted.order.clone(),
					accepted.fillable_taker_amount,
					block,
					pinned,
					keep,
					now,
				)
			})
			.collect();

		// Rejections selected by `keep` are stored as unfillable.
		for rejected in results.rejected.iter().chain(validated.rejected.iter()) {
			if rejected.kind == RejectedOrderKind::OnchainValidation && keep.keeps(rejected.status) {
				let mut record = OrderWithMetadata::new(
					rejected.order.clone(),
					U256::ZERO,
					block,
					pinned,
					keep,
					now,
				);
				record.mark_unfillable(rejected.status, block, now);
				to_store.push(record);
			}
		}
		results.rejected.extend(validated.rejected);

		let outcome = self
			.store
			.add_orders(to_store, self.config.max_orders, now)
			.await?;

		let mut events = Vec::new();
		let added: HashMap<B256, &OrderWithMetadata> =
			outcome.added.iter().map(|o| (o.hash, o)).collect();
		for order in &outcome.added {
			// Soft-removed records being replaced are already counted.
			if !previously_stored.contains(&order.hash) {
				self.register_order(order);
			}
			self.expiration.sync(order);
		}
		for accepted in validated.accepted {
			match added.get(&accepted.hash) {
				Some(order) => {
					events.push(order_event(
						order,
						U256::ZERO,
						EndState::Added,
						&Evidence::default(),
						now,
					));
					results.accepted.push(AcceptedOrderInfo {
						is_new: true,
						..accepted
					});
				}
				None if outcome.already_stored.contains(&accepted.hash) => {
					results.accepted.push(accepted);
				}
				None => {
					debug!(
						order_hash = %short_hash(&accepted.hash),
						"Order displaced by capacity on admission"
					);
					results.rejected.push(RejectedOrderInfo::new(
						accepted.hash,
						accepted.order,
						RejectedOrderStatus::MaxExpirationExceeded,
					));
				}
			}
		}
		for evicted in outcome.removed.iter().filter(|o| !o.is_removed) {
			// The soft-removed record this order replaced is gone too.
			if previously_stored.contains(&evicted.hash) {
				self.unregister_order(evicted);
			}
		}
		for evicted in outcome.removed.iter().filter(|o| o.is_removed) {
			self.expiration.sync(evicted);
			events.push(order_event(
				evicted,
				U256::ZERO,
				EndState::StoppedWatching,
				&Evidence::default(),
				now,
			));
		}

		info!(
			accepted = results.accepted.len(),
			rejected = results.rejected.len(),
			evicted = outcome.removed.len(),
			"Validated submitted orders"
		);
		self.feed.publish(events).await;
		Ok(results)
	}
}
