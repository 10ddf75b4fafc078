//! Block-event processing.
//!
//! Each batch of block events is handled under the validation lock:
//! header changes and order transitions are committed together, then the
//! resulting events are published. A batch either commits completely or
//! leaves the store untouched, so a failed batch can be replayed.

use crate::transitions::{apply_verdict, expire, stopped_watching, superseded, Evidence, Verdict};
use crate::watcher::{lock, OrderWatcher};
use crate::WatcherError;
use alloy::primitives::{B256, U256};
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use mesh_decoder::{contract_event, DecodeError};
use mesh_storage::{OrderQuery, StoreTransaction};
use mesh_types::{
	short_hash, BlockEvent, BlockEventKind, DecodedLog, EthLog, MiniHeader, Order,
	OrderWithMetadata, RejectedOrderStatus, SignedOrder,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Attempts at persisting one batch before the watcher gives up.
const BATCH_MAX_ATTEMPTS: u32 = 5;
const BATCH_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const BATCH_MAX_BACKOFF: Duration = Duration::from_secs(10);

/// A stored order to re-validate plus the logs that made it one.
struct Candidate {
	order: OrderWithMetadata,
	evidence: Evidence,
}

type Candidates = BTreeMap<B256, Candidate>;

fn add_candidate(candidates: &mut Candidates, order: OrderWithMetadata) -> &mut Candidate {
	candidates.entry(order.hash).or_insert_with(|| Candidate {
		order,
		evidence: Evidence::default(),
	})
}

/// Header writes for a batch plus the header chain as it will look after
/// them.
struct HeaderChanges {
	tx: StoreTransaction,
	added_logs: Vec<EthLog>,
	removed_logs: Vec<EthLog>,
	/// Hashes of the retained headers after the batch.
	canonical: HashSet<B256>,
	latest: Option<MiniHeader>,
}

fn header_changes(stored: Vec<MiniHeader>, events: Vec<BlockEvent>) -> HeaderChanges {
	let mut chain: BTreeMap<u64, MiniHeader> =
		stored.into_iter().map(|h| (h.number, h)).collect();
	let mut tx = StoreTransaction::default();
	let mut added_logs = Vec::new();
	let mut removed_logs = Vec::new();

	for event in events {
		let MiniHeader {
			number,
			hash,
			parent,
			timestamp,
			logs,
		} = event.header;
		match event.kind {
			BlockEventKind::Removed => {
				chain.retain(|_, h| h.hash != hash);
				tx.add_headers.retain(|h| h.hash != hash);
				tx.remove_headers.push(hash);
				removed_logs.extend(logs.into_iter().map(|mut log| {
					log.removed = true;
					log
				}));
			}
			BlockEventKind::Added => {
				added_logs.extend(logs.iter().cloned());
				let header = MiniHeader {
					number,
					hash,
					parent,
					timestamp,
					logs,
				};
				chain.insert(number, header.clone());
				tx.add_headers.push(header);
			}
		}
	}

	HeaderChanges {
		tx,
		added_logs,
		removed_logs,
		canonical: chain.values().map(|h| h.hash).collect(),
		latest: chain.into_values().next_back(),
	}
}

/// Logs whose effect survives the batch. A removed log matching an added
/// log at the same position cancels it; unmatched logs of either kind
/// remain.
fn net_logs(added: Vec<EthLog>, removed: Vec<EthLog>) -> Vec<EthLog> {
	let added_positions: HashSet<(B256, u64)> = added.iter().map(EthLog::position).collect();
	let removed_positions: HashSet<(B256, u64)> = removed.iter().map(EthLog::position).collect();
	added
		.into_iter()
		.filter(|log| !removed_positions.contains(&log.position()))
		.chain(
			removed
				.into_iter()
				.filter(|log| !added_positions.contains(&log.position())),
		)
		.collect()
}

impl OrderWatcher {
	/// Stored orders a decoded log may affect.
	async fn orders_for_log(
		&self,
		decoded: &DecodedLog,
	) -> Result<Vec<OrderWithMetadata>, WatcherError> {
		let store = &self.store;
		let orders = match decoded {
			DecodedLog::Erc20Transfer {
				token, from, to, ..
			} => {
				let mut orders = store
					.find_orders_by_maker_and_token_and_id(*from, *token, None)
					.await?;
				orders.extend(
					store
						.find_orders_by_maker_and_token_and_id(*to, *token, None)
						.await?,
				);
				orders
			}
			DecodedLog::Erc721Transfer {
				token,
				from,
				to,
				token_id,
			} => {
				let mut orders = store
					.find_orders_by_maker_and_token_and_id(*from, *token, Some(*token_id))
					.await?;
				orders.extend(
					store
						.find_orders_by_maker_and_token_and_id(*to, *token, Some(*token_id))
						.await?,
				);
				orders
			}
			DecodedLog::Erc20Approval { token, owner, .. }
			| DecodedLog::Erc721ApprovalForAll { token, owner, .. }
			| DecodedLog::WethDeposit { token, owner, .. }
			| DecodedLog::WethWithdrawal { token, owner, .. } => {
				store
					.find_orders_by_maker_and_token_and_id(*owner, *token, None)
					.await?
			}
			DecodedLog::Erc721Approval {
				token,
				owner,
				token_id,
				..
			} => {
				store
					.find_orders_by_maker_and_token_and_id(*owner, *token, Some(*token_id))
					.await?
			}
			DecodedLog::ExchangeFill { order_hash, .. }
			| DecodedLog::ExchangeCancel { order_hash, .. } => {
				store.get_order(order_hash).await?.into_iter().collect()
			}
			DecodedLog::ExchangeCancelUpTo {
				exchange,
				maker,
				min_valid_salt,
				pair,
			} => store
				.find_orders_by_maker_and_max_salt(*maker, *min_valid_salt)
				.await?
				.into_iter()
				.filter(|o| o.order.verifying_contract() == *exchange)
				.filter(|o| match (pair, &o.order) {
					(None, _) => true,
					(Some((maker_token, taker_token)), Order::V4(v4)) => {
						v4.maker_token == *maker_token && v4.taker_token == *taker_token
					}
					(Some(_), Order::V3(_)) => false,
				})
				.collect(),
		};
		Ok(orders)
	}

	/// Processes one batch of block events: commits the header changes and
	/// the order transitions they cause, then publishes the events.
	pub async fn handle_block_events(&self, events: Vec<BlockEvent>) -> Result<(), WatcherError> {
		if events.is_empty() {
			return Ok(());
		}
		let _guard = self.validation_lock.lock().await;
		let now = self.clock.now();

		let previous = self.store.get_latest_mini_header().await?;
		let changes = header_changes(self.store.get_mini_headers().await?, events);
		let mut tx = changes.tx;
		let Some(latest) = changes.latest else {
			self.store.commit(tx).await?;
			return Ok(());
		};
		let block = latest.block_ref();
		let t_new = U256::from(latest.timestamp);

		// Orders touched by this batch's logs.
		let mut candidates = Candidates::new();
		for log in net_logs(changes.added_logs, changes.removed_logs) {
			let decoded = match self.decoder.decode_log(&log) {
				Ok(decoded) => decoded,
				Err(DecodeError::Untracked(_)) | Err(DecodeError::Unsupported { .. }) => continue,
				Err(e) => {
					warn!(tx_hash = %log.tx_hash, log_index = log.log_index, "Skipping log: {}", e);
					continue;
				}
			};
			let mut seen = HashSet::new();
			for order in self.orders_for_log(&decoded).await? {
				if !seen.insert(order.hash) {
					continue;
				}
				add_candidate(&mut candidates, order)
					.evidence
					.push(contract_event(&log, decoded.clone()));
			}
		}

		// Orders whose last re-validation failed.
		let pending: Vec<B256> = lock(&self.pending).iter().copied().collect();
		for hash in pending {
			if let Some(order) = self.store.get_order(&hash).await? {
				add_candidate(&mut candidates, order);
			}
		}

		// Expiry by block time needs no RPC call.
		let mut updates = Vec::new();
		let mut expired_events = Vec::new();
		for (expiry, hash) in self.expiration.expired_orders_as_of(latest.timestamp) {
			candidates.remove(&hash);
			let Some(old) = self.store.get_order(&hash).await? else {
				self.expiration.remove(expiry, hash);
				continue;
			};
			if let Some(transition) = expire(&old, block, now) {
				expired_events.extend(transition.events);
				updates.push(transition.order);
			}
		}

		// Block time went backwards: expired orders may be live again.
		let mut unexpire = Vec::new();
		for (_, hash) in self.expiration.orders_to_possibly_unexpire(latest.timestamp) {
			if let Some(order) = self.store.get_order(&hash).await? {
				unexpire.push(order);
			}
		}
		if previous.is_some_and(|p| latest.timestamp < p.timestamp) {
			let query = OrderQuery {
				is_expired: Some(true),
				is_removed: Some(true),
				..Default::default()
			};
			unexpire.extend(
				self.store
					.find_orders(&query)
					.await?
					.into_iter()
					.filter(|o| o.expiry() > t_new),
			);
		}
		for order in unexpire {
			add_candidate(&mut candidates, order);
		}
		candidates.retain(|_, c| c.order.expiry() > t_new && !stopped_watching(&c.order));

		// Re-validate at the newest block.
		let orders: Vec<Order> = candidates.values().map(|c| c.order.order.clone()).collect();
		let results = self
			.validator
			.batch_onchain_validation(orders, latest.number)
			.await;
		let mut verdicts: HashMap<B256, Verdict> = HashMap::new();
		for accepted in results.accepted {
			verdicts.insert(accepted.hash, Verdict::Fillable(accepted.fillable_taker_amount));
		}
		let mut failed = HashSet::new();
		for rejected in results.rejected {
			match rejected.status {
				status if status.is_transient() => {
					debug!(
						order_hash = %short_hash(&rejected.hash),
						status = rejected.status.code(),
						"Re-validation failed, retrying next block"
					);
					failed.insert(rejected.hash);
				}
				status => {
					verdicts.insert(rejected.hash, Verdict::Unfillable(status));
				}
			}
		}

		let mut order_events = Vec::new();
		for (hash, candidate) in &candidates {
			let Some(verdict) = verdicts.get(hash) else {
				continue;
			};
			if superseded(&candidate.order, block, &changes.canonical) {
				continue;
			}
			if let Some(transition) =
				apply_verdict(&candidate.order, *verdict, block, &candidate.evidence, now)
			{
				order_events.extend(transition.events);
				updates.push(transition.order);
			}
		}

		tx.upsert_orders = updates.clone();
		self.store.commit(tx).await?;

		for order in &updates {
			self.expiration.sync(order);
		}
		*lock(&self.pending) = failed;
		self.mark_recently_validated(verdicts.into_keys());

		let mut events = expired_events;
		events.extend(order_events);
		if !events.is_empty() || !candidates.is_empty() {
			info!(
				block = latest.number,
				candidates = candidates.len(),
				updated = updates.len(),
				events = events.len(),
				"Processed block events"
			);
		}
		self.feed.publish(events).await;
		Ok(())
	}

	fn batch_backoff() -> ExponentialBackoff {
		let mut backoff = ExponentialBackoff {
			initial_interval: BATCH_INITIAL_BACKOFF,
			current_interval: BATCH_INITIAL_BACKOFF,
			randomization_factor: 0.0,
			multiplier: 2.0,
			max_interval: BATCH_MAX_BACKOFF,
			max_elapsed_time: None,
			..Default::default()
		};
		backoff.reset();
		backoff
	}

	/// Handles a batch, replaying it after failures. A shutdown signal
	/// during a backoff wait abandons the batch.
	async fn handle_with_retry(
		&self,
		events: Vec<BlockEvent>,
		shutdown: &mut broadcast::Receiver<()>,
	) -> Result<(), WatcherError> {
		let mut backoff = Self::batch_backoff();
		let mut attempts = 0;

		loop {
			match self.handle_block_events(events.clone()).await {
				Ok(()) => return Ok(()),
				Err(e) => {
					attempts += 1;
					if attempts >= BATCH_MAX_ATTEMPTS {
						error!("Block batch failed after {} attempts: {}", attempts, e);
						return Err(WatcherError::BatchFailed {
							attempts,
							source: Box::new(e),
						});
					}
					let delay = backoff.next_backoff().unwrap_or(BATCH_MAX_BACKOFF);
					warn!(
						"Block batch failed, attempt {}/{}, retrying in {:?}: {}",
						attempts, BATCH_MAX_ATTEMPTS, delay, e
					);
					tokio::select! {
						_ = tokio::time::sleep(delay) => {}
						_ = shutdown.recv() => {
							return Err(WatcherError::Shutdown(format!(
								"block batch abandoned after {} attempts",
								attempts
							)));
						}
					}
				}
			}
		}
	}

	/// Consumes block-event batches until the stream ends or shutdown is
	/// signalled. A batch in progress is finished before stopping. The feed
	/// is closed on exit.
	pub async fn run(
		self: Arc<Self>,
		mut block_events: mpsc::Receiver<Vec<BlockEvent>>,
		mut shutdown: broadcast::Receiver<()>,
	) -> Result<(), WatcherError> {
		info!("Order watcher started");
		let result = loop {
			tokio::select! {
				batch = block_events.recv() => {
					match batch {
						Some(batch) => {
							match self.handle_with_retry(batch, &mut shutdown).await {
								Ok(()) => {}
								Err(WatcherError::Shutdown(reason)) => {
									info!("Order watcher received shutdown signal: {}", reason);
									break Ok(());
								}
								Err(e) => break Err(e),
							}
						}
						None => {
							info!("Block event stream closed");
							break Ok(());
						}
					}
				}
				_ = shutdown.recv() => {
					info!("Order watcher received shutdown signal");
					break Ok(());
				}
			}
		};
		self.feed.close();
		result
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{
		header, log, v3_order, v4_order, watcher_config, ChainState, FlakyStore, Harness,
		EXCHANGE_V3, EXCHANGE_V4, MAKER, TAKER, TOKEN,
	};
	use alloy::primitives::Address;
	use mesh_decoder::abi::{IERC20, IWETH9};
	use mesh_types::abi::{v3, v4};
	use mesh_types::{EndState, KeepOptions};
	use std::sync::atomic::Ordering;

	fn fill_log(order: &Order, filled: u128, tx: u8) -> EthLog {
		let event = v4::INativeOrdersFeature::LimitOrderFilled {
			orderHash: order.hash(),
			maker: MAKER,
			taker: TAKER,
			feeRecipient: Address::ZERO,
			makerToken: TOKEN,
			takerToken: crate::testing::OTHER_TOKEN,
			takerTokenFilledAmount: filled,
			makerTokenFilledAmount: filled / 2,
			takerTokenFeeFilledAmount: 0,
			protocolFeePaid: U256::ZERO,
			pool: B256::ZERO,
		};
		log(EXCHANGE_V4, &event, tx, 0)
	}

	async fn harness_at(max_orders: usize, timestamp: u64) -> Harness {
		let h = Harness::with_max_orders(max_orders).await;
		h.watcher
			.handle_block_events(vec![BlockEvent::added(header(1, timestamp, 0, Vec::new()))])
			.await
			.unwrap();
		h
	}

	async fn add(h: &Harness, orders: Vec<Order>, keep: KeepOptions) {
		let results = h.watcher.validate_and_store(orders, false, keep).await.unwrap();
		assert!(results.rejected.is_empty(), "{:?}", results.rejected);
	}

	fn states(events: &[mesh_types::OrderEvent]) -> Vec<EndState> {
		events.iter().map(|e| e.end_state).collect()
	}

	#[tokio::test]
	async fn test_fill_to_zero() {
		let h = harness_at(10, 10).await;
		let plain: Order = v4_order(1, 1000).into();
		let kept: Order = v4_order(2, 1000).into();
		add(&h, vec![plain.clone()], KeepOptions::default()).await;
		add(
			&h,
			vec![kept.clone()],
			KeepOptions {
				keep_fully_filled: true,
				..Default::default()
			},
		)
		.await;
		let mut sub = h.watcher.subscribe();

		h.client.set(1, ChainState::FullyFilled);
		h.client.set(2, ChainState::FullyFilled);
		let logs = vec![fill_log(&plain, 2000, 7), fill_log(&kept, 2000, 8)];
		h.watcher
			.handle_block_events(vec![BlockEvent::added(header(2, 20, 0, logs))])
			.await
			.unwrap();

		let events = sub.recv().await.unwrap();
		assert_eq!(states(&events), vec![EndState::FullyFilled, EndState::FullyFilled]);
		let plain_event = events.iter().find(|e| e.order_hash == plain.hash()).unwrap();
		assert!(plain_event.fillable_taker_amount.is_zero());
		assert_eq!(plain_event.previous_fillable_taker_amount, U256::from(2000));
		assert_eq!(plain_event.transaction_hashes, vec![B256::repeat_byte(7)]);
		assert_eq!(plain_event.contract_events[0].kind, "ExchangeFillEvent");

		let stored = h.store.get_order(&plain.hash()).await.unwrap().unwrap();
		assert!(stored.is_removed && stored.is_unfillable);
		assert!(!h.watcher.expiration_index().contains(&plain.hash()));
		let stored = h.store.get_order(&kept.hash()).await.unwrap().unwrap();
		assert!(!stored.is_removed && stored.is_unfillable);
	}

	#[tokio::test]
	async fn test_cancel_up_to() {
		let h = harness_at(10, 10).await;
		let orders: Vec<Order> = [100, 200, 300]
			.into_iter()
			.map(|salt| v3_order(salt, 1000).into())
			.collect();
		add(&h, orders.clone(), KeepOptions::default()).await;
		let mut sub = h.watcher.subscribe();

		h.client.set(100, ChainState::Cancelled);
		h.client.set(200, ChainState::Cancelled);
		let cancel = v3::IExchange::CancelUpTo {
			makerAddress: MAKER,
			orderSenderAddress: Address::ZERO,
			orderEpoch: U256::from(250),
		};
		h.watcher
			.handle_block_events(vec![BlockEvent::added(header(
				2,
				20,
				0,
				vec![log(EXCHANGE_V3, &cancel, 9, 0)],
			))])
			.await
			.unwrap();

		let events = sub.recv().await.unwrap();
		assert_eq!(states(&events), vec![EndState::Cancelled, EndState::Cancelled]);
		let mut salts: Vec<U256> = events.iter().map(|e| e.order.salt()).collect();
		salts.sort();
		assert_eq!(salts, vec![U256::from(100), U256::from(200)]);

		let untouched = h.store.get_order(&orders[2].hash()).await.unwrap().unwrap();
		assert!(untouched.is_fillable());
	}

	#[tokio::test]
	async fn test_unfunded_then_added_again() {
		let h = harness_at(10, 10).await;
		let order: Order = v4_order(1, 1000).into();
		add(&h, vec![order.clone()], KeepOptions::default()).await;
		let mut sub = h.watcher.subscribe();

		h.client.set(
			1,
			ChainState::Fillable {
				filled: 0,
				fillable: 0,
			},
		);
		let revoke = IERC20::Approval {
			owner: MAKER,
			spender: EXCHANGE_V4,
			value: U256::ZERO,
		};
		h.watcher
			.handle_block_events(vec![BlockEvent::added(header(
				2,
				20,
				0,
				vec![log(TOKEN, &revoke, 1, 0)],
			))])
			.await
			.unwrap();
		let events = sub.recv().await.unwrap();
		assert_eq!(states(&events), vec![EndState::BecameUnfunded]);

		h.client.set(
			1,
			ChainState::Fillable {
				filled: 0,
				fillable: 2000,
			},
		);
		let deposit = IWETH9::Deposit {
			dst: MAKER,
			wad: U256::from(5000),
		};
		h.watcher
			.handle_block_events(vec![BlockEvent::added(header(
				3,
				30,
				0,
				vec![log(TOKEN, &deposit, 2, 0)],
			))])
			.await
			.unwrap();
		let events = sub.recv().await.unwrap();
		assert_eq!(states(&events), vec![EndState::Added]);
		assert_eq!(events[0].fillable_taker_amount, U256::from(2000));
		assert!(h.watcher.expiration_index().contains(&order.hash()));
	}

	#[tokio::test]
	async fn test_expire_then_unexpire_on_reorg() {
		let h = harness_at(10, 900).await;
		let order: Order = v4_order(1, 1000).into();
		add(&h, vec![order.clone()], KeepOptions::default()).await;
		let mut sub = h.watcher.subscribe();

		let expiring = header(2, 1001, 0, Vec::new());
		h.watcher
			.handle_block_events(vec![BlockEvent::added(expiring.clone())])
			.await
			.unwrap();
		let events = sub.recv().await.unwrap();
		assert_eq!(states(&events), vec![EndState::Expired]);
		assert_eq!(h.client.calls.load(Ordering::SeqCst), 1);

		h.client.set(
			1,
			ChainState::Fillable {
				filled: 500,
				fillable: 1500,
			},
		);
		let replacement = header(2, 999, 1, vec![fill_log(&order, 500, 3)]);
		h.watcher
			.handle_block_events(vec![
				BlockEvent::removed(expiring),
				BlockEvent::added(replacement.clone()),
			])
			.await
			.unwrap();
		let events = sub.recv().await.unwrap();
		assert_eq!(states(&events), vec![EndState::Unexpired, EndState::Filled]);
		assert_eq!(events[1].fillable_taker_amount, U256::from(1500));

		let stored = h.store.get_order(&order.hash()).await.unwrap().unwrap();
		assert!(stored.is_fillable());
		assert_eq!(stored.last_validated_block, replacement.block_ref());
		let latest = h.store.get_latest_mini_header().await.unwrap().unwrap();
		assert_eq!(latest.hash, replacement.hash);
	}

	#[tokio::test]
	async fn test_admission_eviction() {
		let h = harness_at(10, 10).await;
		let orders: Vec<Order> = (1..=10).map(|i| v4_order(i, i * 100).into()).collect();
		add(&h, orders.clone(), KeepOptions::default()).await;
		let mut sub = h.watcher.subscribe();

		let late = h
			.watcher
			.validate_and_store(vec![v4_order(11, 1100).into()], false, KeepOptions::default())
			.await
			.unwrap();
		assert_eq!(
			late.rejected[0].status,
			RejectedOrderStatus::MaxExpirationExceeded
		);
		assert!(sub.try_recv().is_none());

		let early: Order = v4_order(12, 150).into();
		let admitted = h
			.watcher
			.validate_and_store(vec![early.clone()], false, KeepOptions::default())
			.await
			.unwrap();
		assert!(admitted.accepted[0].is_new);

		let events = sub.recv().await.unwrap();
		assert_eq!(states(&events), vec![EndState::Added, EndState::StoppedWatching]);
		assert_eq!(events[0].order_hash, early.hash());
		assert_eq!(events[1].order_hash, orders[9].hash());
		assert!(!h.watcher.expiration_index().contains(&orders[9].hash()));
		assert_eq!(
			h.store.get_current_max_expiration_time().await.unwrap(),
			U256::from(1000)
		);

		// Evicted orders ignore later fills.
		h.watcher
			.handle_block_events(vec![BlockEvent::added(header(
				2,
				20,
				0,
				vec![fill_log(&orders[9], 100, 4)],
			))])
			.await
			.unwrap();
		assert!(sub.try_recv().is_none());
	}

	#[tokio::test]
	async fn test_budget_exhaustion_defers_orders() {
		let h = harness_at(10, 10).await;
		let order: Order = v4_order(1, 1000).into();
		add(&h, vec![order.clone()], KeepOptions::default()).await;
		let mut sub = h.watcher.subscribe();

		h.client.set(1, ChainState::FullyFilled);
		h.client.budget_exhausted.store(true, Ordering::SeqCst);
		h.watcher
			.handle_block_events(vec![BlockEvent::added(header(
				2,
				20,
				0,
				vec![fill_log(&order, 2000, 5)],
			))])
			.await
			.unwrap();
		assert!(sub.try_recv().is_none());
		assert!(h.store.get_order(&order.hash()).await.unwrap().unwrap().is_fillable());
		assert!(lock(&h.watcher.pending).contains(&order.hash()));

		h.client.budget_exhausted.store(false, Ordering::SeqCst);
		h.watcher
			.handle_block_events(vec![BlockEvent::added(header(3, 30, 0, Vec::new()))])
			.await
			.unwrap();
		let events = sub.recv().await.unwrap();
		assert_eq!(states(&events), vec![EndState::FullyFilled]);
		assert!(lock(&h.watcher.pending).is_empty());
	}

	#[tokio::test]
	async fn test_reorg_to_identical_block_is_silent() {
		let h = harness_at(10, 10).await;
		let order: Order = v4_order(1, 1000).into();
		add(&h, vec![order.clone()], KeepOptions::default()).await;
		let mut sub = h.watcher.subscribe();

		h.client.set(
			1,
			ChainState::Fillable {
				filled: 500,
				fillable: 1500,
			},
		);
		let block = header(2, 20, 0, vec![fill_log(&order, 500, 6)]);
		h.watcher
			.handle_block_events(vec![BlockEvent::added(block.clone())])
			.await
			.unwrap();
		assert_eq!(states(&sub.recv().await.unwrap()), vec![EndState::Filled]);
		let calls = h.client.calls.load(Ordering::SeqCst);

		h.watcher
			.handle_block_events(vec![BlockEvent::removed(block.clone()), BlockEvent::added(block)])
			.await
			.unwrap();
		assert!(sub.try_recv().is_none());
		assert_eq!(h.client.calls.load(Ordering::SeqCst), calls);
	}

	#[tokio::test]
	async fn test_untracked_logs_are_ignored() {
		let h = harness_at(10, 10).await;
		add(&h, vec![v4_order(1, 1000).into()], KeepOptions::default()).await;
		let transfer = IERC20::Transfer {
			from: MAKER,
			to: TAKER,
			value: U256::from(1),
		};
		let stranger = alloy::primitives::address!("0x00000000000000000000000000000000000000aa");
		h.watcher
			.handle_block_events(vec![BlockEvent::added(header(
				2,
				20,
				0,
				vec![log(stranger, &transfer, 1, 0)],
			))])
			.await
			.unwrap();
		assert_eq!(h.client.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_run_stops_on_shutdown_and_closes_feed() {
		let h = harness_at(10, 10).await;
		let mut sub = h.watcher.subscribe();
		let (events_tx, events_rx) = mpsc::channel(4);
		let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
		let task = tokio::spawn(h.watcher.clone().run(events_rx, shutdown_rx));

		events_tx
			.send(vec![BlockEvent::added(header(2, 20, 0, Vec::new()))])
			.await
			.unwrap();
		shutdown_tx.send(()).unwrap();
		task.await.unwrap().unwrap();

		assert!(sub.recv().await.is_none());
		assert_eq!(h.watcher.feed().subscriber_count(), 0);
	}

	#[tokio::test]
	async fn test_reorg_onto_shorter_chain_reverts_fill() {
		let h = harness_at(10, 10).await;
		let order: Order = v4_order(1, 1000).into();
		add(&h, vec![order.clone()], KeepOptions::default()).await;
		let mut sub = h.watcher.subscribe();

		let second = header(2, 20, 0, Vec::new());
		h.watcher
			.handle_block_events(vec![BlockEvent::added(second.clone())])
			.await
			.unwrap();
		h.client.set(
			1,
			ChainState::Fillable {
				filled: 500,
				fillable: 1500,
			},
		);
		let third = header(3, 30, 0, vec![fill_log(&order, 500, 3)]);
		h.watcher
			.handle_block_events(vec![BlockEvent::added(third.clone())])
			.await
			.unwrap();
		assert_eq!(states(&sub.recv().await.unwrap()), vec![EndState::Filled]);

		// The new chain is one block shorter and never saw the fill.
		h.client.set(
			1,
			ChainState::Fillable {
				filled: 0,
				fillable: 2000,
			},
		);
		let replacement = header(2, 25, 1, Vec::new());
		h.watcher
			.handle_block_events(vec![
				BlockEvent::removed(third),
				BlockEvent::removed(second),
				BlockEvent::added(replacement.clone()),
			])
			.await
			.unwrap();
		let events = sub.recv().await.unwrap();
		assert_eq!(states(&events), vec![EndState::FillabilityIncreased]);
		assert_eq!(events[0].previous_fillable_taker_amount, U256::from(1500));
		assert_eq!(events[0].fillable_taker_amount, U256::from(2000));

		let stored = h.store.get_order(&order.hash()).await.unwrap().unwrap();
		assert_eq!(stored.fillable_taker_amount, U256::from(2000));
		assert_eq!(stored.last_validated_block, replacement.block_ref());
		let latest = h.store.get_latest_mini_header().await.unwrap().unwrap();
		assert_eq!(latest.hash, replacement.hash);
	}

	#[tokio::test]
	async fn test_removed_only_batch_deletes_headers() {
		let h = Harness::with_max_orders(10).await;
		let only = header(1, 10, 0, Vec::new());
		h.watcher
			.handle_block_events(vec![BlockEvent::added(only.clone())])
			.await
			.unwrap();
		let mut sub = h.watcher.subscribe();

		h.watcher
			.handle_block_events(vec![BlockEvent::removed(only)])
			.await
			.unwrap();
		assert!(h.store.get_latest_mini_header().await.unwrap().is_none());
		assert!(h.store.get_mini_headers().await.unwrap().is_empty());
		assert!(sub.try_recv().is_none());
		assert_eq!(h.client.calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn test_evicted_kept_order_ignores_later_fills() {
		let h = harness_at(2, 10).await;
		let kept: Order = v4_order(1, 900).into();
		add(
			&h,
			vec![kept.clone()],
			KeepOptions {
				keep_cancelled: true,
				..Default::default()
			},
		)
		.await;
		let mut sub = h.watcher.subscribe();

		h.client.set(1, ChainState::Cancelled);
		h.watcher
			.handle_block_events(vec![BlockEvent::added(header(
				2,
				20,
				0,
				vec![fill_log(&kept, 1, 2)],
			))])
			.await
			.unwrap();
		assert_eq!(states(&sub.recv().await.unwrap()), vec![EndState::Cancelled]);
		let stored = h.store.get_order(&kept.hash()).await.unwrap().unwrap();
		assert!(!stored.is_removed && stored.is_unfillable);

		add(&h, vec![v4_order(2, 100).into()], KeepOptions::default()).await;
		assert_eq!(states(&sub.recv().await.unwrap()), vec![EndState::Added]);
		add(&h, vec![v4_order(3, 200).into()], KeepOptions::default()).await;
		let events = sub.recv().await.unwrap();
		assert_eq!(states(&events), vec![EndState::Added, EndState::StoppedWatching]);
		assert_eq!(events[1].order_hash, kept.hash());

		h.client.set(
			1,
			ChainState::Fillable {
				filled: 0,
				fillable: 2000,
			},
		);
		h.watcher
			.handle_block_events(vec![BlockEvent::added(header(
				3,
				30,
				0,
				vec![fill_log(&kept, 1, 3)],
			))])
			.await
			.unwrap();
		assert!(sub.try_recv().is_none());
		let stored = h.store.get_order(&kept.hash()).await.unwrap().unwrap();
		assert!(stored.is_removed && stored.is_evicted);
		assert!(stored.fillable_taker_amount.is_zero());
	}

	#[tokio::test]
	async fn test_weth_withdrawal_then_deposit() {
		let h = harness_at(10, 10).await;
		let order: Order = v4_order(1, 1000).into();
		add(&h, vec![order.clone()], KeepOptions::default()).await;
		let mut sub = h.watcher.subscribe();

		h.client.set(
			1,
			ChainState::Fillable {
				filled: 0,
				fillable: 0,
			},
		);
		let withdrawal = IWETH9::Withdrawal {
			src: MAKER,
			wad: U256::from(5000),
		};
		h.watcher
			.handle_block_events(vec![BlockEvent::added(header(
				2,
				20,
				0,
				vec![log(TOKEN, &withdrawal, 1, 0)],
			))])
			.await
			.unwrap();
		let events = sub.recv().await.unwrap();
		assert_eq!(states(&events), vec![EndState::BecameUnfunded]);
		assert_eq!(events[0].contract_events[0].kind, "WethWithdrawalEvent");
		assert_eq!(events[0].transaction_hashes, vec![B256::repeat_byte(1)]);

		h.client.set(
			1,
			ChainState::Fillable {
				filled: 0,
				fillable: 2000,
			},
		);
		let deposit = IWETH9::Deposit {
			dst: MAKER,
			wad: U256::from(5000),
		};
		h.watcher
			.handle_block_events(vec![BlockEvent::added(header(
				3,
				30,
				0,
				vec![log(TOKEN, &deposit, 2, 0)],
			))])
			.await
			.unwrap();
		let events = sub.recv().await.unwrap();
		assert_eq!(states(&events), vec![EndState::Added]);
		assert_eq!(events[0].contract_events[0].kind, "WethDepositEvent");
	}

	#[tokio::test]
	async fn test_kept_expired_order_unexpires_on_reorg() {
		let h = harness_at(10, 900).await;
		let order: Order = v4_order(1, 1000).into();
		add(
			&h,
			vec![order.clone()],
			KeepOptions {
				keep_expired: true,
				..Default::default()
			},
		)
		.await;
		let mut sub = h.watcher.subscribe();

		let expiring = header(2, 1001, 0, Vec::new());
		h.watcher
			.handle_block_events(vec![BlockEvent::added(expiring.clone())])
			.await
			.unwrap();
		assert_eq!(states(&sub.recv().await.unwrap()), vec![EndState::Expired]);
		let stored = h.store.get_order(&order.hash()).await.unwrap().unwrap();
		assert!(!stored.is_removed && stored.is_expired);
		assert!(h.watcher.expiration_index().contains(&order.hash()));

		let replacement = header(2, 999, 1, Vec::new());
		h.watcher
			.handle_block_events(vec![
				BlockEvent::removed(expiring),
				BlockEvent::added(replacement.clone()),
			])
			.await
			.unwrap();
		let events = sub.recv().await.unwrap();
		assert_eq!(states(&events), vec![EndState::Unexpired]);
		assert_eq!(events[0].fillable_taker_amount, U256::from(2000));

		let stored = h.store.get_order(&order.hash()).await.unwrap().unwrap();
		assert!(stored.is_fillable() && !stored.is_expired);
		assert_eq!(stored.last_validated_block, replacement.block_ref());
	}

	#[tokio::test(start_paused = true)]
	async fn test_shutdown_interrupts_batch_backoff() {
		let store = Arc::new(FlakyStore::default());
		let h = Harness::with_store(store.clone(), watcher_config(10)).await;
		store.fail_commits.store(true, Ordering::SeqCst);
		let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
		shutdown_tx.send(()).unwrap();

		let started = tokio::time::Instant::now();
		let result = h
			.watcher
			.handle_with_retry(
				vec![BlockEvent::added(header(1, 10, 0, Vec::new()))],
				&mut shutdown_rx,
			)
			.await;
		assert!(matches!(result, Err(WatcherError::Shutdown(_))));
		assert_eq!(store.commits.load(Ordering::SeqCst), 1);
		assert!(started.elapsed() < BATCH_INITIAL_BACKOFF);
		assert!(h.store.get_latest_mini_header().await.unwrap().is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn test_run_exits_cleanly_when_shutdown_during_retry() {
		let store = Arc::new(FlakyStore::default());
		let h = Harness::with_store(store.clone(), watcher_config(10)).await;
		store.fail_commits.store(true, Ordering::SeqCst);
		let (events_tx, events_rx) = mpsc::channel(4);
		let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
		let task = tokio::spawn(h.watcher.clone().run(events_rx, shutdown_rx));

		let started = tokio::time::Instant::now();
		events_tx
			.send(vec![BlockEvent::added(header(1, 10, 0, Vec::new()))])
			.await
			.unwrap();
		while store.commits.load(Ordering::SeqCst) == 0 {
			tokio::task::yield_now().await;
		}
		shutdown_tx.send(()).unwrap();
		task.await.unwrap().unwrap();

		assert_eq!(store.commits.load(Ordering::SeqCst), 1);
		assert!(started.elapsed() < BATCH_INITIAL_BACKOFF);
	}

	#[test]
	fn test_net_logs_cancel_by_position() {
		let transfer = IERC20::Transfer {
			from: MAKER,
			to: TAKER,
			value: U256::from(1),
		};
		let kept = log(TOKEN, &transfer, 1, 0);
		let reverted = log(TOKEN, &transfer, 2, 0);
		let mut orphan = log(TOKEN, &transfer, 3, 1);
		orphan.removed = true;
		let mut reverted_removed = reverted.clone();
		reverted_removed.removed = true;

		let net = net_logs(vec![kept.clone(), reverted], vec![reverted_removed, orphan.clone()]);
		assert_eq!(net, vec![kept, orphan]);
	}
}
