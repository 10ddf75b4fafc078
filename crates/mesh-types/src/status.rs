//! Order rejection reasons.
//!
//! Every order submitted to the watcher comes back either accepted or with a
//! [`RejectedOrderInfo`] naming one of these reasons. The codes are stable and
//! are surfaced to peers and API clients verbatim.

use crate::order::Order;
use alloy::primitives::B256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which stage of validation produced a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RejectedOrderKind {
	/// Structural checks that need no chain access.
	OffchainValidation,
	/// Checks against contract state at a pinned block.
	OnchainValidation,
	/// Node policy (capacity, allowed senders and takers, size limits).
	MeshValidation,
	/// Transient node failures; the order may be valid.
	MeshError,
}

/// Reason an order was rejected or became unfillable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum RejectedOrderStatus {
	#[error("network request to Ethereum RPC endpoint failed")]
	EthRPCRequestFailed,
	#[error("order makerAssetAmount cannot be 0")]
	InvalidMakerAssetAmount,
	#[error("order takerAssetAmount cannot be 0")]
	InvalidTakerAssetAmount,
	#[error("order expired according to latest block timestamp")]
	Expired,
	#[error("order already fully filled")]
	FullyFilled,
	#[error("order cancelled")]
	Cancelled,
	#[error("maker has insufficient balance or allowance for this order to be filled")]
	Unfunded,
	#[error("order makerAssetData must encode a supported assetData type")]
	InvalidMakerAssetData,
	#[error("order makerFeeAssetData must encode a supported assetData type")]
	InvalidMakerFeeAssetData,
	#[error("order takerAssetData must encode a supported assetData type")]
	InvalidTakerAssetData,
	#[error("order takerFeeAssetData must encode a supported assetData type")]
	InvalidTakerFeeAssetData,
	#[error("order signature must be valid")]
	InvalidSignature,
	#[error("order is invalid according to the exchange contract")]
	InvalidOrder,
	#[error("order expiration too far in the future")]
	MaxExpirationExceeded,
	#[error("unexpected internal error")]
	InternalError,
	#[error("order exceeds the maximum encoded size")]
	MaxOrderSizeExceeded,
	#[error("order is already stored and is unfillable")]
	OrderAlreadyStoredAndUnfillable,
	#[error("order was created for a different chain than the one this node is configured for")]
	IncorrectChain,
	#[error("order exchange address does not match the exchange configured for this chain")]
	IncorrectExchangeAddress,
	#[error("orders with a senderAddress are not currently supported")]
	SenderAddressNotAllowed,
	#[error("database is full of pinned orders and no orders can be deleted to make space")]
	DatabaseFullOfOrders,
	#[error("order taker address is not allowed")]
	TakerAddressNotAllowed,
	#[error("order did not pass JSON-schema validation")]
	InvalidSchema,
}

impl RejectedOrderStatus {
	/// Stable machine-readable code.
	pub fn code(&self) -> &'static str {
		match self {
			Self::EthRPCRequestFailed => "EthRPCRequestFailed",
			Self::InvalidMakerAssetAmount => "OrderHasInvalidMakerAssetAmount",
			Self::InvalidTakerAssetAmount => "OrderHasInvalidTakerAssetAmount",
			Self::Expired => "OrderExpired",
			Self::FullyFilled => "OrderFullyFilled",
			Self::Cancelled => "OrderCancelled",
			Self::Unfunded => "OrderUnfunded",
			Self::InvalidMakerAssetData => "OrderHasInvalidMakerAssetData",
			Self::InvalidMakerFeeAssetData => "OrderHasInvalidMakerFeeAssetData",
			Self::InvalidTakerAssetData => "OrderHasInvalidTakerAssetData",
			Self::InvalidTakerFeeAssetData => "OrderHasInvalidTakerFeeAssetData",
			Self::InvalidSignature => "OrderHasInvalidSignature",
			Self::InvalidOrder => "OrderInvalid",
			Self::MaxExpirationExceeded => "OrderMaxExpirationExceeded",
			Self::InternalError => "InternalError",
			Self::MaxOrderSizeExceeded => "MaxOrderSizeExceeded",
			Self::OrderAlreadyStoredAndUnfillable => "OrderAlreadyStoredAndUnfillable",
			Self::IncorrectChain => "OrderForIncorrectChain",
			Self::IncorrectExchangeAddress => "IncorrectExchangeAddress",
			Self::SenderAddressNotAllowed => "SenderAddressNotAllowed",
			Self::DatabaseFullOfOrders => "DatabaseFullOfOrders",
			Self::TakerAddressNotAllowed => "TakerAddressNotAllowed",
			Self::InvalidSchema => "InvalidSchema",
		}
	}

	/// True for failures of the node rather than of the order. Such
	/// rejections say nothing about the order and are retried.
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::EthRPCRequestFailed | Self::InternalError)
	}

	/// Kind reported when this status is produced outside on-chain validation.
	pub fn default_kind(&self) -> RejectedOrderKind {
		match self {
			Self::EthRPCRequestFailed | Self::InternalError => RejectedOrderKind::MeshError,
			Self::Expired
			| Self::FullyFilled
			| Self::Cancelled
			| Self::Unfunded
			| Self::InvalidOrder => RejectedOrderKind::OnchainValidation,
			Self::InvalidMakerAssetAmount
			| Self::InvalidTakerAssetAmount
			| Self::InvalidMakerAssetData
			| Self::InvalidMakerFeeAssetData
			| Self::InvalidTakerAssetData
			| Self::InvalidTakerFeeAssetData
			| Self::InvalidSignature => RejectedOrderKind::OffchainValidation,
			Self::MaxExpirationExceeded
			| Self::MaxOrderSizeExceeded
			| Self::OrderAlreadyStoredAndUnfillable
			| Self::IncorrectChain
			| Self::IncorrectExchangeAddress
			| Self::SenderAddressNotAllowed
			| Self::DatabaseFullOfOrders
			| Self::TakerAddressNotAllowed
			| Self::InvalidSchema => RejectedOrderKind::MeshValidation,
		}
	}
}

/// An order that did not pass validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedOrderInfo {
	pub hash: B256,
	pub order: Order,
	pub kind: RejectedOrderKind,
	pub status: RejectedOrderStatus,
}

impl RejectedOrderInfo {
	/// Rejection using the status' default kind.
	pub fn new(hash: B256, order: Order, status: RejectedOrderStatus) -> Self {
		Self {
			hash,
			order,
			kind: status.default_kind(),
			status,
		}
	}

	pub fn with_kind(mut self, kind: RejectedOrderKind) -> Self {
		self.kind = kind;
		self
	}
}
