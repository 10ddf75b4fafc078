//! Contract log decoder.
//!
//! Maps raw logs from tracked contracts onto the closed set of
//! [`DecodedLog`] events the watcher reacts to. Which ABI a log is decoded
//! with depends on the registry its address is counted in: exchange first,
//! then non-fungible, then fungible.

use alloy::primitives::{Address, B256};
use alloy::sol_types::SolEvent;
use mesh_types::abi::{v3, v4};
use mesh_types::{ContractEvent, ContractKind, DecodedLog, EthLog};
use thiserror::Error;
use tracing::trace;

pub mod abi;
pub mod counter;

pub use counter::ContractAddressCounter;

use abi::{IERC20, IERC721, IWETH9};

/// Errors produced while classifying or decoding a log.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
	/// The log's address is in no registry.
	#[error("Untracked contract {0}")]
	Untracked(Address),
	/// The address is tracked but the event is not one we decode.
	#[error("Unsupported event {topic:?} from {address}")]
	Unsupported { address: Address, topic: Option<B256> },
	/// The topic matched but the payload did not.
	#[error("Malformed {kind:?} log: {reason}")]
	Malformed { kind: EventKind, reason: String },
}

/// Event types the decoder recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
	Erc20Transfer,
	Erc20Approval,
	Erc721Transfer,
	Erc721Approval,
	Erc721ApprovalForAll,
	WethDeposit,
	WethWithdrawal,
	ExchangeV3Fill,
	ExchangeV3Cancel,
	ExchangeV3CancelUpTo,
	ExchangeV4Fill,
	ExchangeV4Cancel,
	ExchangeV4PairCancel,
}

fn kind_for(registry: ContractKind, topic: B256) -> Option<EventKind> {
	match registry {
		ContractKind::Fungible => {
			if topic == IERC20::Transfer::SIGNATURE_HASH {
				Some(EventKind::Erc20Transfer)
			} else if topic == IERC20::Approval::SIGNATURE_HASH {
				Some(EventKind::Erc20Approval)
			} else if topic == IWETH9::Deposit::SIGNATURE_HASH {
				Some(EventKind::WethDeposit)
			} else if topic == IWETH9::Withdrawal::SIGNATURE_HASH {
				Some(EventKind::WethWithdrawal)
			} else {
				None
			}
		}
		ContractKind::NonFungible => {
			if topic == IERC721::Transfer::SIGNATURE_HASH {
				Some(EventKind::Erc721Transfer)
			} else if topic == IERC721::Approval::SIGNATURE_HASH {
				Some(EventKind::Erc721Approval)
			} else if topic == IERC721::ApprovalForAll::SIGNATURE_HASH {
				Some(EventKind::Erc721ApprovalForAll)
			} else {
				None
			}
		}
		ContractKind::Exchange => {
			if topic == v3::IExchange::Fill::SIGNATURE_HASH {
				Some(EventKind::ExchangeV3Fill)
			} else if topic == v3::IExchange::Cancel::SIGNATURE_HASH {
				Some(EventKind::ExchangeV3Cancel)
			} else if topic == v3::IExchange::CancelUpTo::SIGNATURE_HASH {
				Some(EventKind::ExchangeV3CancelUpTo)
			} else if topic == v4::INativeOrdersFeature::LimitOrderFilled::SIGNATURE_HASH {
				Some(EventKind::ExchangeV4Fill)
			} else if topic == v4::INativeOrdersFeature::OrderCancelled::SIGNATURE_HASH {
				Some(EventKind::ExchangeV4Cancel)
			} else if topic == v4::INativeOrdersFeature::PairCancelledLimitOrders::SIGNATURE_HASH {
				Some(EventKind::ExchangeV4PairCancel)
			} else {
				None
			}
		}
	}
}

fn decode_as<E: SolEvent>(log: &EthLog, kind: EventKind) -> Result<E, DecodeError> {
	E::decode_raw_log(log.topics.iter().copied(), &log.data).map_err(|e| DecodeError::Malformed {
		kind,
		reason: e.to_string(),
	})
}

/// Log decoder over a shared set of contract registries.
#[derive(Debug, Default)]
pub struct EventDecoder {
	counter: ContractAddressCounter,
}

impl EventDecoder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registries backing this decoder.
	pub fn counter(&self) -> &ContractAddressCounter {
		&self.counter
	}

	pub fn register(&self, kind: ContractKind, address: Address) {
		self.counter.increment(kind, address);
	}

	pub fn unregister(&self, kind: ContractKind, address: Address) {
		self.counter.decrement(kind, address);
	}

	/// Addresses whose logs are worth fetching.
	pub fn tracked_addresses(&self) -> Vec<Address> {
		self.counter.addresses()
	}

	/// Determines which event a log carries without decoding its payload.
	pub fn classify(&self, log: &EthLog) -> Result<EventKind, DecodeError> {
		let kinds = self.counter.kinds_of(log.address);
		if kinds.is_empty() {
			return Err(DecodeError::Untracked(log.address));
		}
		let unsupported = DecodeError::Unsupported {
			address: log.address,
			topic: log.topics.first().copied(),
		};
		let Some(topic) = log.topics.first().copied() else {
			return Err(unsupported);
		};
		let kind = kinds
			.into_iter()
			.find_map(|registry| kind_for(registry, topic));
		if kind.is_none() {
			trace!(address = %log.address, topic = %topic, "Ignoring unsupported event");
		}
		kind.ok_or(unsupported)
	}

	/// Decodes `log` as `kind`.
	pub fn decode(&self, log: &EthLog, kind: EventKind) -> Result<DecodedLog, DecodeError> {
		let address = log.address;
		let decoded = match kind {
			EventKind::Erc20Transfer => {
				let e: IERC20::Transfer = decode_as(log, kind)?;
				DecodedLog::Erc20Transfer {
					token: address,
					from: e.from,
					to: e.to,
					value: e.value,
				}
			}
			EventKind::Erc20Approval => {
				let e: IERC20::Approval = decode_as(log, kind)?;
				DecodedLog::Erc20Approval {
					token: address,
					owner: e.owner,
					spender: e.spender,
					value: e.value,
				}
			}
			EventKind::Erc721Transfer => {
				let e: IERC721::Transfer = decode_as(log, kind)?;
				DecodedLog::Erc721Transfer {
					token: address,
					from: e.from,
					to: e.to,
					token_id: e.tokenId,
				}
			}
			EventKind::Erc721Approval => {
				let e: IERC721::Approval = decode_as(log, kind)?;
				DecodedLog::Erc721Approval {
					token: address,
					owner: e.owner,
					approved: e.approved,
					token_id: e.tokenId,
				}
			}
			EventKind::Erc721ApprovalForAll => {
				let e: IERC721::ApprovalForAll = decode_as(log, kind)?;
				DecodedLog::Erc721ApprovalForAll {
					token: address,
					owner: e.owner,
					operator: e.operator,
					approved: e.approved,
				}
			}
			EventKind::WethDeposit => {
				let e: IWETH9::Deposit = decode_as(log, kind)?;
				DecodedLog::WethDeposit {
					token: address,
					owner: e.dst,
					value: e.wad,
				}
			}
			EventKind::WethWithdrawal => {
				let e: IWETH9::Withdrawal = decode_as(log, kind)?;
				DecodedLog::WethWithdrawal {
					token: address,
					owner: e.src,
					value: e.wad,
				}
			}
			EventKind::ExchangeV3Fill => {
				let e: v3::IExchange::Fill = decode_as(log, kind)?;
				DecodedLog::ExchangeFill {
					exchange: address,
					order_hash: e.orderHash,
					maker: e.makerAddress,
					taker: e.takerAddress,
					taker_filled_amount: e.takerAssetFilledAmount,
				}
			}
			EventKind::ExchangeV3Cancel => {
				let e: v3::IExchange::Cancel = decode_as(log, kind)?;
				DecodedLog::ExchangeCancel {
					exchange: address,
					order_hash: e.orderHash,
					maker: e.makerAddress,
				}
			}
			EventKind::ExchangeV3CancelUpTo => {
				let e: v3::IExchange::CancelUpTo = decode_as(log, kind)?;
				DecodedLog::ExchangeCancelUpTo {
					exchange: address,
					maker: e.makerAddress,
					min_valid_salt: e.orderEpoch,
					pair: None,
				}
			}
			EventKind::ExchangeV4Fill => {
				let e: v4::INativeOrdersFeature::LimitOrderFilled = decode_as(log, kind)?;
				DecodedLog::ExchangeFill {
					exchange: address,
					order_hash: e.orderHash,
					maker: e.maker,
					taker: e.taker,
					taker_filled_amount: alloy::primitives::U256::from(e.takerTokenFilledAmount),
				}
			}
			EventKind::ExchangeV4Cancel => {
				let e: v4::INativeOrdersFeature::OrderCancelled = decode_as(log, kind)?;
				DecodedLog::ExchangeCancel {
					exchange: address,
					order_hash: e.orderHash,
					maker: e.maker,
				}
			}
			EventKind::ExchangeV4PairCancel => {
				let e: v4::INativeOrdersFeature::PairCancelledLimitOrders = decode_as(log, kind)?;
				DecodedLog::ExchangeCancelUpTo {
					exchange: address,
					maker: e.maker,
					min_valid_salt: e.minValidSalt,
					pair: Some((e.makerToken, e.takerToken)),
				}
			}
		};
		Ok(decoded)
	}

	/// Classifies and decodes in one step.
	pub fn decode_log(&self, log: &EthLog) -> Result<DecodedLog, DecodeError> {
		let kind = self.classify(log)?;
		self.decode(log, kind)
	}
}

/// Wraps a decoded log with its position for inclusion in order events.
pub fn contract_event(log: &EthLog, decoded: DecodedLog) -> ContractEvent {
	ContractEvent {
		block_hash: log.block_hash,
		tx_hash: log.tx_hash,
		tx_index: log.tx_index,
		log_index: log.log_index,
		is_removed: log.removed,
		address: log.address,
		kind: decoded.kind().to_string(),
		parameters: decoded,
	}
}
