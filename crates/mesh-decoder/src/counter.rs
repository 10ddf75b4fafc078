//! Reference-counted contract registries.

use alloy::primitives::Address;
use dashmap::DashMap;
use mesh_types::ContractKind;

/// Per-category `address -> count` of stored orders referencing the address.
///
/// An address is tracked while its count is non-zero.
#[derive(Debug, Default)]
pub struct ContractAddressCounter {
	fungible: DashMap<Address, usize>,
	non_fungible: DashMap<Address, usize>,
	exchange: DashMap<Address, usize>,
}

impl ContractAddressCounter {
	pub fn new() -> Self {
		Self::default()
	}

	fn registry(&self, kind: ContractKind) -> &DashMap<Address, usize> {
		match kind {
			ContractKind::Fungible => &self.fungible,
			ContractKind::NonFungible => &self.non_fungible,
			ContractKind::Exchange => &self.exchange,
		}
	}

	/// Increments the count and returns the new value.
	pub fn increment(&self, kind: ContractKind, address: Address) -> usize {
		let mut count = self.registry(kind).entry(address).or_insert(0);
		*count += 1;
		*count
	}

	/// Decrements the count, dropping the entry at zero. Returns the new value.
	pub fn decrement(&self, kind: ContractKind, address: Address) -> usize {
		let registry = self.registry(kind);
		let remaining = match registry.get_mut(&address) {
			Some(mut count) => {
				*count = count.saturating_sub(1);
				*count
			}
			None => return 0,
		};
		if remaining == 0 {
			registry.remove_if(&address, |_, count| *count == 0);
		}
		remaining
	}

	pub fn count(&self, kind: ContractKind, address: Address) -> usize {
		self.registry(kind).get(&address).map_or(0, |c| *c)
	}

	pub fn contains(&self, kind: ContractKind, address: Address) -> bool {
		self.count(kind, address) > 0
	}

	/// Registries containing `address`, highest precedence first.
	pub fn kinds_of(&self, address: Address) -> Vec<ContractKind> {
		[
			ContractKind::Exchange,
			ContractKind::NonFungible,
			ContractKind::Fungible,
		]
		.into_iter()
		.filter(|kind| self.contains(*kind, address))
		.collect()
	}

	/// Every tracked address across all registries, sorted and deduplicated.
	pub fn addresses(&self) -> Vec<Address> {
		let mut all: Vec<Address> = self
			.fungible
			.iter()
			.chain(self.non_fungible.iter())
			.chain(self.exchange.iter())
			.map(|entry| *entry.key())
			.collect();
		all.sort();
		all.dedup();
		all
	}
}
