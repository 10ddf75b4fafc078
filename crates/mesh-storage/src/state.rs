//! In-memory store state and its secondary indexes.

use crate::{AddOrdersOutcome, Metadata, OrderCounts, OrderQuery, StoreTransaction};
use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use mesh_types::{MiniHeader, OrderWithMetadata};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Serialized form of a whole store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
	pub orders: Vec<OrderWithMetadata>,
	pub headers: Vec<MiniHeader>,
	pub metadata: Metadata,
}

/// Orders, headers and metadata with the indexes the watcher queries by.
#[derive(Debug, Default)]
pub struct StoreState {
	orders: HashMap<B256, OrderWithMetadata>,
	/// maker -> (salt, hash)
	by_maker: HashMap<Address, BTreeSet<(U256, B256)>>,
	/// (maker, token) -> hashes
	by_maker_token: HashMap<(Address, Address), HashSet<B256>>,
	/// (expiry, hash) of every order that is not soft-removed
	live: BTreeSet<(U256, B256)>,
	live_pinned: usize,
	headers: BTreeMap<u64, MiniHeader>,
	header_retention: usize,
	metadata: Metadata,
}

impl StoreState {
	pub fn new(header_retention: usize) -> Self {
		Self {
			header_retention,
			..Default::default()
		}
	}

	pub fn from_snapshot(snapshot: Snapshot, header_retention: usize) -> Self {
		let mut state = Self::new(header_retention);
		for order in snapshot.orders {
			state.put(order);
		}
		for header in snapshot.headers {
			state.add_mini_header(header);
		}
		state.metadata = snapshot.metadata;
		state
	}

	pub fn to_snapshot(&self) -> Snapshot {
		let mut orders: Vec<_> = self.orders.values().cloned().collect();
		orders.sort_by_key(|o| o.hash);
		Snapshot {
			orders,
			headers: self.headers.values().cloned().collect(),
			metadata: self.metadata.clone(),
		}
	}

	fn index(&mut self, order: &OrderWithMetadata) {
		let maker = order.maker();
		self.by_maker
			.entry(maker)
			.or_default()
			.insert((order.salt(), order.hash));
		for token in &order.token_refs {
			self.by_maker_token
				.entry((maker, token.address))
				.or_default()
				.insert(order.hash);
		}
		if !order.is_removed {
			self.live.insert((order.expiry(), order.hash));
			if order.is_pinned {
				self.live_pinned += 1;
			}
		}
	}

	fn unindex(&mut self, order: &OrderWithMetadata) {
		let maker = order.maker();
		if let Some(set) = self.by_maker.get_mut(&maker) {
			set.remove(&(order.salt(), order.hash));
			if set.is_empty() {
				self.by_maker.remove(&maker);
			}
		}
		for token in &order.token_refs {
			let key = (maker, token.address);
			if let Some(set) = self.by_maker_token.get_mut(&key) {
				set.remove(&order.hash);
				if set.is_empty() {
					self.by_maker_token.remove(&key);
				}
			}
		}
		if self.live.remove(&(order.expiry(), order.hash)) && order.is_pinned {
			self.live_pinned -= 1;
		}
	}

	/// Inserts or replaces an order, keeping every index in sync.
	pub fn put(&mut self, order: OrderWithMetadata) {
		if let Some(old) = self.orders.remove(&order.hash) {
			self.unindex(&old);
		}
		self.index(&order);
		self.orders.insert(order.hash, order);
	}

	fn take(&mut self, hash: &B256) -> Option<OrderWithMetadata> {
		let old = self.orders.remove(hash)?;
		self.unindex(&old);
		Some(old)
	}

	pub fn get(&self, hash: &B256) -> Option<&OrderWithMetadata> {
		self.orders.get(hash)
	}

	pub fn add_orders(
		&mut self,
		orders: Vec<OrderWithMetadata>,
		max_orders: usize,
		now: DateTime<Utc>,
	) -> AddOrdersOutcome {
		let mut outcome = AddOrdersOutcome::default();
		let mut incoming = HashSet::new();

		for order in orders {
			let stored_live = self.orders.get(&order.hash).is_some_and(|o| !o.is_removed);
			if stored_live || !incoming.insert(order.hash) {
				outcome.already_stored.push(order.hash);
				continue;
			}
			// A soft-removed record is replaced by the freshly validated one.
			self.put(order.clone());
			outcome.added.push(order);
		}

		if self.live.len() <= max_orders {
			return outcome;
		}

		let excess = self.live.len() - max_orders;
		let victims: Vec<(U256, B256)> = self
			.live
			.iter()
			.rev()
			.filter(|(_, hash)| self.orders.get(hash).is_some_and(|o| !o.is_pinned))
			.take(excess)
			.copied()
			.collect();

		let mut cutoff = self.metadata.max_expiration_time;
		for (expiry, hash) in victims {
			cutoff = cutoff.min(expiry);
			if incoming.contains(&hash) {
				if let Some(order) = self.take(&hash) {
					outcome.added.retain(|o| o.hash != hash);
					outcome.removed.push(order);
				}
			} else if let Some(mut order) = self.orders.get(&hash).cloned() {
				order.is_removed = true;
				order.is_evicted = true;
				order.fillable_taker_amount = U256::ZERO;
				order.last_updated = now;
				self.put(order.clone());
				outcome.removed.push(order);
			}
		}
		self.metadata.max_expiration_time = cutoff;

		outcome
	}

	pub fn update_order<F>(&mut self, hash: &B256, update: F) -> Option<OrderWithMetadata>
	where
		F: FnOnce(&mut OrderWithMetadata),
	{
		let mut order = self.orders.get(hash)?.clone();
		update(&mut order);
		order.hash = *hash;
		self.put(order.clone());
		Some(order)
	}

	pub fn find_orders(&self, query: &OrderQuery) -> Vec<OrderWithMetadata> {
		let mut found: Vec<_> = self
			.orders
			.values()
			.filter(|o| query.matches(o))
			.cloned()
			.collect();
		found.sort_by(|a, b| (a.expiry(), a.hash).cmp(&(b.expiry(), b.hash)));
		if let Some(limit) = query.limit {
			found.truncate(limit);
		}
		found
	}

	pub fn find_orders_by_maker_and_max_salt(
		&self,
		maker: Address,
		max_salt: U256,
	) -> Vec<OrderWithMetadata> {
		let Some(set) = self.by_maker.get(&maker) else {
			return Vec::new();
		};
		set.range(..(max_salt, B256::ZERO))
			.filter_map(|(_, hash)| self.orders.get(hash).cloned())
			.collect()
	}

	pub fn find_orders_by_maker_and_token_and_id(
		&self,
		maker: Address,
		token: Address,
		token_id: Option<U256>,
	) -> Vec<OrderWithMetadata> {
		let Some(set) = self.by_maker_token.get(&(maker, token)) else {
			return Vec::new();
		};
		let mut found: Vec<_> = set
			.iter()
			.filter_map(|hash| self.orders.get(hash))
			.filter(|o| o.references_token(token, token_id))
			.cloned()
			.collect();
		found.sort_by_key(|o| o.hash);
		found
	}

	pub fn order_counts(&self) -> OrderCounts {
		OrderCounts {
			live: self.live.len(),
			live_pinned: self.live_pinned,
			total: self.orders.len(),
		}
	}

	pub fn delete_orders(&mut self, hashes: &[B256]) -> Vec<OrderWithMetadata> {
		hashes.iter().filter_map(|hash| self.take(hash)).collect()
	}

	pub fn commit(&mut self, tx: StoreTransaction) {
		for hash in &tx.remove_headers {
			self.delete_mini_header(hash);
		}
		for header in tx.add_headers {
			self.add_mini_header(header);
		}
		for order in tx.upsert_orders {
			self.put(order);
		}
	}

	pub fn add_mini_header(&mut self, header: MiniHeader) {
		self.headers.insert(header.number, header);
		while self.headers.len() > self.header_retention.max(1) {
			self.headers.pop_first();
		}
	}

	pub fn delete_mini_header(&mut self, hash: &B256) {
		self.headers.retain(|_, h| h.hash != *hash);
	}

	pub fn latest_mini_header(&self) -> Option<MiniHeader> {
		self.headers.last_key_value().map(|(_, h)| h.clone())
	}

	pub fn mini_headers(&self) -> Vec<MiniHeader> {
		self.headers.values().cloned().collect()
	}

	pub fn metadata(&self) -> &Metadata {
		&self.metadata
	}

	pub fn metadata_mut(&mut self) -> &mut Metadata {
		&mut self.metadata
	}
}
