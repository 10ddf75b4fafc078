//! Order state transitions and the events they emit.

use alloy::primitives::{B256, U256};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use mesh_types::{
	BlockRef, ContractEvent, DecodedLog, EndState, OrderEvent, OrderWithMetadata,
	RejectedOrderStatus,
};

/// Logs that made an order a re-validation candidate.
#[derive(Debug, Clone, Default)]
pub struct Evidence {
	pub contract_events: Vec<ContractEvent>,
	pub tx_hashes: Vec<B256>,
}

impl Evidence {
	pub fn push(&mut self, event: ContractEvent) {
		if !self.tx_hashes.contains(&event.tx_hash) {
			self.tx_hashes.push(event.tx_hash);
		}
		self.contract_events.push(event);
	}

	pub fn has_fill(&self) -> bool {
		self.contract_events
			.iter()
			.any(|e| matches!(e.parameters, DecodedLog::ExchangeFill { .. }))
	}
}

/// Outcome of validating a stored order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
	Fillable(U256),
	Unfillable(RejectedOrderStatus),
}

/// New state of an order plus the events describing the change.
#[derive(Debug, Clone)]
pub struct Transition {
	pub order: OrderWithMetadata,
	pub events: Vec<OrderEvent>,
}

pub fn end_state_for(status: RejectedOrderStatus) -> EndState {
	match status {
		RejectedOrderStatus::FullyFilled => EndState::FullyFilled,
		RejectedOrderStatus::Cancelled => EndState::Cancelled,
		RejectedOrderStatus::Expired => EndState::Expired,
		RejectedOrderStatus::Unfunded => EndState::BecameUnfunded,
		_ => EndState::Invalid,
	}
}

pub fn order_event(
	order: &OrderWithMetadata,
	previous: U256,
	end_state: EndState,
	evidence: &Evidence,
	now: DateTime<Utc>,
) -> OrderEvent {
	OrderEvent {
		timestamp: now,
		order_hash: order.hash,
		order: order.order.clone(),
		previous_fillable_taker_amount: previous,
		fillable_taker_amount: order.fillable_taker_amount,
		end_state,
		contract_events: evidence.contract_events.clone(),
		transaction_hashes: evidence.tx_hashes.clone(),
	}
}

/// Records evicted by the capacity policy are no longer watched, whatever
/// state they were kept in.
pub fn stopped_watching(order: &OrderWithMetadata) -> bool {
	order.is_evicted
}

/// True when `old` was validated at a newer block that is still part of
/// the canonical chain, so a verdict taken at `at` must not overwrite it.
/// A validation block that a reorg abandoned never supersedes anything.
pub fn superseded(old: &OrderWithMetadata, at: BlockRef, canonical: &HashSet<B256>) -> bool {
	old.last_validated_block.number > at.number && canonical.contains(&old.last_validated_block.hash)
}

/// Applies a re-validation verdict obtained at `at`. Returns `None` when
/// nothing changes.
pub fn apply_verdict(
	old: &OrderWithMetadata,
	verdict: Verdict,
	at: BlockRef,
	evidence: &Evidence,
	now: DateTime<Utc>,
) -> Option<Transition> {
	if stopped_watching(old) {
		return None;
	}
	let previous = old.fillable_taker_amount;

	match verdict {
		Verdict::Fillable(amount) => {
			let mut order = old.clone();
			order.mark_fillable(amount, at, now);

			let mut events = Vec::new();
			if old.is_expired {
				events.push(order_event(&order, previous, EndState::Unexpired, &Evidence::default(), now));
				if evidence.has_fill() {
					events.push(order_event(&order, amount, EndState::Filled, evidence, now));
				}
			} else if old.is_removed || old.is_unfillable {
				events.push(order_event(&order, previous, EndState::Added, evidence, now));
			} else if amount < previous {
				events.push(order_event(&order, previous, EndState::Filled, evidence, now));
			} else if amount > previous {
				events.push(order_event(
					&order,
					previous,
					EndState::FillabilityIncreased,
					evidence,
					now,
				));
			} else {
				order.last_updated = old.last_updated;
			}
			Some(Transition { order, events })
		}
		Verdict::Unfillable(status) => {
			if old.is_expired {
				// Still unfillable after an unexpire check; record the new
				// reason so the order stops being an unexpire candidate.
				if status == RejectedOrderStatus::Expired {
					return None;
				}
				let mut order = old.clone();
				order.mark_unfillable(status, at, now);
				return Some(Transition {
					order,
					events: Vec::new(),
				});
			}
			if old.is_removed || old.is_unfillable {
				return None;
			}
			let mut order = old.clone();
			order.mark_unfillable(status, at, now);
			let events = vec![order_event(&order, previous, end_state_for(status), evidence, now)];
			Some(Transition { order, events })
		}
	}
}

/// Marks an order expired by block time. Orders that were already
/// unfillable change silently.
pub fn expire(old: &OrderWithMetadata, at: BlockRef, now: DateTime<Utc>) -> Option<Transition> {
	if old.is_expired || stopped_watching(old) {
		return None;
	}
	let was_fillable = !old.is_removed && !old.is_unfillable;
	let mut order = old.clone();
	order.mark_unfillable(RejectedOrderStatus::Expired, at, now);

	let events = if was_fillable {
		vec![order_event(
			&order,
			old.fillable_taker_amount,
			EndState::Expired,
			&Evidence::default(),
			now,
		)]
	} else {
		Vec::new()
	};
	Some(Transition { order, events })
}
