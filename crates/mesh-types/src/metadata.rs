//! Stored order state.

use crate::asset_data::TokenRef;
use crate::header::BlockRef;
use crate::order::{Order, SignedOrder};
use crate::status::RejectedOrderStatus;
use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-order policy selecting which unfillable end states keep the order in
/// the store instead of soft-removing it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeepOptions {
	pub keep_cancelled: bool,
	pub keep_expired: bool,
	pub keep_fully_filled: bool,
	pub keep_unfunded: bool,
}

impl KeepOptions {
	/// Keep every unfillable order.
	pub fn all() -> Self {
		Self {
			keep_cancelled: true,
			keep_expired: true,
			keep_fully_filled: true,
			keep_unfunded: true,
		}
	}

	/// Whether an order rejected with `status` should stay in the store.
	pub fn keeps(&self, status: RejectedOrderStatus) -> bool {
		match status {
			RejectedOrderStatus::Cancelled => self.keep_cancelled,
			RejectedOrderStatus::Expired => self.keep_expired,
			RejectedOrderStatus::FullyFilled => self.keep_fully_filled,
			RejectedOrderStatus::Unfunded => self.keep_unfunded,
			_ => false,
		}
	}

	pub fn any(&self) -> bool {
		self.keep_cancelled || self.keep_expired || self.keep_fully_filled || self.keep_unfunded
	}
}

/// An order together with the state the watcher tracks for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderWithMetadata {
	pub hash: B256,
	pub order: Order,
	/// Remaining fillable amount as of `last_validated_block`.
	pub fillable_taker_amount: U256,
	pub is_removed: bool,
	/// Removed by the capacity policy. Evicted records are never revived.
	#[serde(default)]
	pub is_evicted: bool,
	pub is_pinned: bool,
	pub is_unfillable: bool,
	pub is_expired: bool,
	/// Wall clock of the last state change. Only used by cleanup.
	pub last_updated: DateTime<Utc>,
	pub last_validated_block: BlockRef,
	pub keep: KeepOptions,
	/// Maker-side token contracts, cached for indexing.
	pub token_refs: Vec<TokenRef>,
}

impl OrderWithMetadata {
	/// Metadata for a freshly validated, fillable order.
	pub fn new(
		order: Order,
		fillable_taker_amount: U256,
		validated_at: BlockRef,
		is_pinned: bool,
		keep: KeepOptions,
		now: DateTime<Utc>,
	) -> Self {
		Self {
			hash: order.hash(),
			token_refs: order.maker_token_refs(),
			order,
			fillable_taker_amount,
			is_removed: false,
			is_evicted: false,
			is_pinned,
			is_unfillable: false,
			is_expired: false,
			last_updated: now,
			last_validated_block: validated_at,
			keep,
		}
	}

	pub fn maker(&self) -> Address {
		self.order.maker()
	}

	pub fn salt(&self) -> U256 {
		self.order.salt()
	}

	pub fn expiry(&self) -> U256 {
		self.order.expiry()
	}

	/// True when the order can currently be filled.
	pub fn is_fillable(&self) -> bool {
		!self.is_removed && !self.is_unfillable && !self.is_expired && !self.fillable_taker_amount.is_zero()
	}

	/// True when the order references `token` (and `token_id`, if given) on
	/// its maker side. Token refs without an id (ERC1155) match any id.
	pub fn references_token(&self, token: Address, token_id: Option<U256>) -> bool {
		self.token_refs.iter().any(|r| {
			r.address == token
				&& match (token_id, r.token_id) {
					(Some(wanted), Some(held)) => wanted == held,
					_ => true,
				}
		})
	}

	/// Marks the order unfillable, soft-removing it unless `keep` selects
	/// the given reason.
	pub fn mark_unfillable(
		&mut self,
		status: RejectedOrderStatus,
		validated_at: BlockRef,
		now: DateTime<Utc>,
	) {
		self.fillable_taker_amount = U256::ZERO;
		self.is_unfillable = true;
		self.is_expired = status == RejectedOrderStatus::Expired;
		if !self.keep.keeps(status) {
			self.is_removed = true;
		}
		self.last_validated_block = validated_at;
		self.last_updated = now;
	}

	/// Marks the order fillable with `amount`, clearing removal flags.
	pub fn mark_fillable(&mut self, amount: U256, validated_at: BlockRef, now: DateTime<Utc>) {
		self.fillable_taker_amount = amount;
		self.is_unfillable = false;
		self.is_expired = false;
		self.is_removed = false;
		self.last_validated_block = validated_at;
		self.last_updated = now;
	}
}

/// Status summary returned by order-status lookups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderStatusInfo {
	pub is_stored: bool,
	pub is_marked_removed: bool,
	pub is_marked_unfillable: bool,
	pub fillable_taker_amount: U256,
}

impl From<&OrderWithMetadata> for OrderStatusInfo {
	fn from(order: &OrderWithMetadata) -> Self {
		Self {
			is_stored: true,
			is_marked_removed: order.is_removed,
			is_marked_unfillable: order.is_unfillable,
			fillable_taker_amount: order.fillable_taker_amount,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keep_options_select_reasons() {
		let keep = KeepOptions {
			keep_fully_filled: true,
			..Default::default()
		};
		assert!(keep.keeps(RejectedOrderStatus::FullyFilled));
		assert!(!keep.keeps(RejectedOrderStatus::Cancelled));
		assert!(!KeepOptions::all().keeps(RejectedOrderStatus::InvalidSignature));
	}
}
