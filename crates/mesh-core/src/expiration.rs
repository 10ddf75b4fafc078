//! Ordered index of order expirations.

use alloy::primitives::{B256, U256};
use mesh_types::OrderWithMetadata;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Non-removed orders keyed by `(expiry, hash)`, each flagged with whether it
/// is currently considered expired.
#[derive(Debug, Default)]
pub struct ExpirationIndex {
	entries: Mutex<BTreeMap<(U256, B256), bool>>,
}

impl ExpirationIndex {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, BTreeMap<(U256, B256), bool>> {
		self.entries.lock().unwrap_or_else(|e| e.into_inner())
	}

	pub fn add(&self, expiry: U256, hash: B256, is_expired: bool) {
		self.lock().insert((expiry, hash), is_expired);
	}

	pub fn remove(&self, expiry: U256, hash: B256) {
		self.lock().remove(&(expiry, hash));
	}

	/// Mirrors a stored record: removed orders leave the index, others are
	/// (re)inserted with their expired flag.
	pub fn sync(&self, order: &OrderWithMetadata) {
		if order.is_removed {
			self.remove(order.expiry(), order.hash);
		} else {
			self.add(order.expiry(), order.hash, order.is_expired);
		}
	}

	/// Orders not yet flagged expired whose expiry is at or before `timestamp`.
	pub fn expired_orders_as_of(&self, timestamp: u64) -> Vec<(U256, B256)> {
		let bound = U256::from(timestamp);
		self.lock()
			.iter()
			.take_while(|((expiry, _), _)| *expiry <= bound)
			.filter(|(_, expired)| !**expired)
			.map(|(key, _)| *key)
			.collect()
	}

	/// Orders flagged expired whose expiry lies after `timestamp`.
	pub fn orders_to_possibly_unexpire(&self, timestamp: u64) -> Vec<(U256, B256)> {
		let bound = U256::from(timestamp);
		self.lock()
			.range((bound, B256::repeat_byte(0xff))..)
			.filter(|((expiry, _), expired)| **expired && *expiry > bound)
			.map(|(key, _)| *key)
			.collect()
	}

	pub fn contains(&self, hash: &B256) -> bool {
		self.lock().keys().any(|(_, h)| h == hash)
	}

	pub fn len(&self) -> usize {
		self.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.lock().is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn hash(n: u8) -> B256 {
		B256::with_last_byte(n)
	}

	#[test]
	fn test_expired_as_of_is_inclusive() {
		let index = ExpirationIndex::new();
		index.add(U256::from(100), hash(1), false);
		index.add(U256::from(200), hash(2), false);
		index.add(U256::from(300), hash(3), false);

		assert!(index.expired_orders_as_of(99).is_empty());
		assert_eq!(
			index.expired_orders_as_of(200),
			vec![(U256::from(100), hash(1)), (U256::from(200), hash(2))]
		);

		index.add(U256::from(100), hash(1), true);
		assert_eq!(
			index.expired_orders_as_of(200),
			vec![(U256::from(200), hash(2))]
		);
		assert_eq!(index.len(), 3);
	}

	#[test]
	fn test_unexpire_candidates() {
		let index = ExpirationIndex::new();
		index.add(U256::from(1000), hash(1), true);
		index.add(U256::from(900), hash(2), true);
		index.add(U256::from(1200), hash(3), false);

		assert_eq!(
			index.orders_to_possibly_unexpire(999),
			vec![(U256::from(1000), hash(1))]
		);
		assert!(index.orders_to_possibly_unexpire(1000).is_empty());

		index.remove(U256::from(1000), hash(1));
		assert!(!index.contains(&hash(1)));
		assert!(index.orders_to_possibly_unexpire(999).is_empty());
	}
}
