//! Periodic store maintenance.

use crate::transitions::{apply_verdict, superseded, Evidence, Verdict};
use crate::watcher::{lock, OrderWatcher};
use crate::WatcherError;
use alloy::primitives::{B256, U256};
use chrono::{DateTime, TimeDelta, Utc};
use mesh_storage::{OrderQuery, StoreTransaction};
use mesh_types::{Order, RejectedOrderStatus};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// What one cleanup pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
	/// Soft-removed orders physically deleted.
	pub deleted: usize,
	/// Idle orders re-validated.
	pub revalidated: usize,
	/// Events published for re-validated orders.
	pub events: usize,
	/// Whether the max-expiration cutoff was lifted.
	pub cutoff_reset: bool,
}

fn before(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
	TimeDelta::from_std(age)
		.ok()
		.and_then(|age| now.checked_sub_signed(age))
		.unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl OrderWatcher {
	/// Deletes long-removed orders, re-validates idle ones and lifts the
	/// max-expiration cutoff once the store has room again.
	pub async fn cleanup(&self) -> Result<CleanupReport, WatcherError> {
		let _guard = self.validation_lock.lock().await;
		let now = self.clock.now();
		let mut report = CleanupReport::default();

		let removed = self
			.store
			.find_orders(&OrderQuery {
				is_removed: Some(true),
				last_updated_before: Some(before(now, self.config.removed_grace_period())),
				..Default::default()
			})
			.await?;
		let hashes: Vec<B256> = removed.iter().map(|o| o.hash).collect();
		for order in self.store.delete_orders(&hashes).await? {
			self.unregister_order(&order);
			self.expiration.remove(order.expiry(), order.hash);
			report.deleted += 1;
		}

		let recent = std::mem::take(&mut *lock(&self.recently_validated));
		let idle: Vec<_> = self
			.store
			.find_orders(&OrderQuery {
				is_removed: Some(false),
				is_expired: Some(false),
				last_updated_before: Some(before(now, self.config.revalidate_after())),
				..Default::default()
			})
			.await?
			.into_iter()
			.filter(|o| !recent.contains(&o.hash))
			.collect();

		if !idle.is_empty() {
			let latest = self.latest_header().await?;
			let block = latest.block_ref();
			let canonical: HashSet<B256> = self
				.store
				.get_mini_headers()
				.await?
				.iter()
				.map(|h| h.hash)
				.collect();
			let orders: Vec<Order> = idle.iter().map(|o| o.order.clone()).collect();
			let results = self
				.validator
				.batch_onchain_validation(orders, latest.number)
				.await;

			let mut verdicts: HashMap<B256, Verdict> = HashMap::new();
			for accepted in results.accepted {
				verdicts.insert(accepted.hash, Verdict::Fillable(accepted.fillable_taker_amount));
			}
			for rejected in results.rejected {
				match rejected.status {
					status if status.is_transient() => {
						lock(&self.pending).insert(rejected.hash);
					}
					status => {
						verdicts.insert(rejected.hash, Verdict::Unfillable(status));
					}
				}
			}

			let mut updates = Vec::new();
			let mut events = Vec::new();
			for order in &idle {
				let Some(verdict) = verdicts.get(&order.hash) else {
					continue;
				};
				report.revalidated += 1;
				if superseded(order, block, &canonical) {
					continue;
				}
				if let Some(transition) =
					apply_verdict(order, *verdict, block, &Evidence::default(), now)
				{
					events.extend(transition.events);
					updates.push(transition.order);
				}
			}

			self.store
				.commit(StoreTransaction {
					upsert_orders: updates.clone(),
					..Default::default()
				})
				.await?;
			for order in &updates {
				self.expiration.sync(order);
			}
			report.events = events.len();
			self.feed.publish(events).await;
		}

		let counts = self.store.order_counts().await?;
		if counts.live < self.config.max_orders
			&& self.store.get_current_max_expiration_time().await? != U256::MAX
		{
			self.store
				.update_metadata(Box::new(|metadata| {
					metadata.max_expiration_time = U256::MAX;
				}))
				.await?;
			report.cutoff_reset = true;
		}

		info!(
			deleted = report.deleted,
			revalidated = report.revalidated,
			events = report.events,
			cutoff_reset = report.cutoff_reset,
			"Cleanup complete"
		);
		Ok(report)
	}

	/// Runs [`OrderWatcher::cleanup`] every cleanup interval until shutdown.
	pub async fn run_cleanup(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
		let period = self.config.cleanup_interval().max(Duration::from_secs(1));
		let mut interval = tokio::time::interval(period);
		// The first tick completes immediately.
		interval.tick().await;

		loop {
			tokio::select! {
				_ = interval.tick() => {
					if let Err(e) = self.cleanup().await {
						warn!("Cleanup failed: {}", e);
					}
				}
				_ = shutdown.recv() => {
					debug!("Cleanup task received shutdown signal");
					break;
				}
			}
		}
	}
}
