use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::order::Order;

/// State an order ended up in after a watcher transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndState {
	Added,
	Filled,
	FullyFilled,
	Cancelled,
	Expired,
	Unexpired,
	BecameUnfunded,
	FillabilityIncreased,
	StoppedWatching,
	Invalid,
}

/// Typed view of a log emitted by a tracked contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodedLog {
	Erc20Transfer {
		token: Address,
		from: Address,
		to: Address,
		value: U256,
	},
	Erc20Approval {
		token: Address,
		owner: Address,
		spender: Address,
		value: U256,
	},
	Erc721Transfer {
		token: Address,
		from: Address,
		to: Address,
		token_id: U256,
	},
	Erc721Approval {
		token: Address,
		owner: Address,
		approved: Address,
		token_id: U256,
	},
	Erc721ApprovalForAll {
		token: Address,
		owner: Address,
		operator: Address,
		approved: bool,
	},
	WethDeposit {
		token: Address,
		owner: Address,
		value: U256,
	},
	WethWithdrawal {
		token: Address,
		owner: Address,
		value: U256,
	},
	ExchangeFill {
		exchange: Address,
		order_hash: B256,
		maker: Address,
		taker: Address,
		taker_filled_amount: U256,
	},
	ExchangeCancel {
		exchange: Address,
		order_hash: B256,
		maker: Address,
	},
	/// Cancels every order by `maker` with a salt below `min_valid_salt`.
	/// v4 pair cancellations restrict the range to one token pair.
	ExchangeCancelUpTo {
		exchange: Address,
		maker: Address,
		min_valid_salt: U256,
		pair: Option<(Address, Address)>,
	},
}

impl DecodedLog {
	/// Event name surfaced to subscribers.
	pub fn kind(&self) -> &'static str {
		match self {
			DecodedLog::Erc20Transfer { .. } => "ERC20TransferEvent",
			DecodedLog::Erc20Approval { .. } => "ERC20ApprovalEvent",
			DecodedLog::Erc721Transfer { .. } => "ERC721TransferEvent",
			DecodedLog::Erc721Approval { .. } => "ERC721ApprovalEvent",
			DecodedLog::Erc721ApprovalForAll { .. } => "ERC721ApprovalForAllEvent",
			DecodedLog::WethDeposit { .. } => "WethDepositEvent",
			DecodedLog::WethWithdrawal { .. } => "WethWithdrawalEvent",
			DecodedLog::ExchangeFill { .. } => "ExchangeFillEvent",
			DecodedLog::ExchangeCancel { .. } => "ExchangeCancelEvent",
			DecodedLog::ExchangeCancelUpTo { .. } => "ExchangeCancelUpToEvent",
		}
	}

	/// The specific order an exchange fill or cancel refers to.
	pub fn order_hash(&self) -> Option<B256> {
		match self {
			DecodedLog::ExchangeFill { order_hash, .. }
			| DecodedLog::ExchangeCancel { order_hash, .. } => Some(*order_hash),
			_ => None,
		}
	}
}

/// A decoded log attached to an order event as evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractEvent {
	pub block_hash: B256,
	pub tx_hash: B256,
	pub tx_index: u64,
	pub log_index: u64,
	pub is_removed: bool,
	pub address: Address,
	pub kind: String,
	pub parameters: DecodedLog,
}

/// A change in an order's fillability, published on the event feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
	pub timestamp: DateTime<Utc>,
	pub order_hash: B256,
	pub order: Order,
	pub previous_fillable_taker_amount: U256,
	pub fillable_taker_amount: U256,
	pub end_state: EndState,
	pub contract_events: Vec<ContractEvent>,
	pub transaction_hashes: Vec<B256>,
}
