//! Signed order formats.
//!
//! Two wire formats coexist: v3 orders (asset-data based, verified by the v3
//! exchange) and v4 limit orders (token based, verified by the v4 exchange
//! proxy). Everything the watcher needs from an order goes through the
//! [`SignedOrder`] trait so the rest of the system is version agnostic.

use crate::abi::{v3, v4};
use crate::asset_data::{AssetData, TokenRef};
use crate::status::RejectedOrderStatus;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::{Eip712Domain, SolStruct, SolValue};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// v3 signature type byte, stored as the last byte of the signature.
pub mod v3_signature_type {
	pub const ILLEGAL: u8 = 0;
	pub const INVALID: u8 = 1;
	pub const EIP712: u8 = 2;
	pub const ETH_SIGN: u8 = 3;
	pub const WALLET: u8 = 4;
	pub const VALIDATOR: u8 = 5;
	pub const PRESIGNED: u8 = 6;
	pub const EIP1271_WALLET: u8 = 7;
}

/// Length of an ECDSA (EIP712 / EthSign) v3 signature: v, r, s, type.
const V3_ECDSA_SIGNATURE_LEN: usize = 66;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderVersion {
	V3,
	V4,
}

impl fmt::Display for OrderVersion {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			OrderVersion::V3 => write!(f, "v3"),
			OrderVersion::V4 => write!(f, "v4"),
		}
	}
}

/// Operations shared by both order formats.
pub trait SignedOrder {
	fn version(&self) -> OrderVersion;
	/// EIP-712 hash; the canonical identity of the order.
	fn hash(&self) -> B256;
	fn maker(&self) -> Address;
	fn taker(&self) -> Address;
	fn sender(&self) -> Address;
	fn salt(&self) -> U256;
	/// Expiration timestamp in seconds.
	fn expiry(&self) -> U256;
	fn maker_amount(&self) -> U256;
	fn taker_amount(&self) -> U256;
	fn chain_id(&self) -> u64;
	/// Exchange contract the order is signed for.
	fn verifying_contract(&self) -> Address;
	/// Token contracts whose maker-side state can change fillability.
	fn maker_token_refs(&self) -> Vec<TokenRef>;
	/// Structural checks that need neither configuration nor chain access.
	fn validate_fields(&self) -> Result<(), RejectedOrderStatus>;
	/// ABI encoding of the order and its signature as sent to the chain.
	fn encode_for_rpc(&self) -> Bytes;
}

/// A v3 order with its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderV3 {
	pub chain_id: u64,
	pub exchange_address: Address,
	pub maker_address: Address,
	pub taker_address: Address,
	pub fee_recipient_address: Address,
	pub sender_address: Address,
	pub maker_asset_amount: U256,
	pub taker_asset_amount: U256,
	pub maker_fee: U256,
	pub taker_fee: U256,
	pub expiration_time_seconds: U256,
	pub salt: U256,
	pub maker_asset_data: Bytes,
	pub taker_asset_data: Bytes,
	pub maker_fee_asset_data: Bytes,
	pub taker_fee_asset_data: Bytes,
	pub signature: Bytes,
}

impl OrderV3 {
	pub fn to_abi(&self) -> v3::Order {
		v3::Order {
			makerAddress: self.maker_address,
			takerAddress: self.taker_address,
			feeRecipientAddress: self.fee_recipient_address,
			senderAddress: self.sender_address,
			makerAssetAmount: self.maker_asset_amount,
			takerAssetAmount: self.taker_asset_amount,
			makerFee: self.maker_fee,
			takerFee: self.taker_fee,
			expirationTimeSeconds: self.expiration_time_seconds,
			salt: self.salt,
			makerAssetData: self.maker_asset_data.clone(),
			takerAssetData: self.taker_asset_data.clone(),
			makerFeeAssetData: self.maker_fee_asset_data.clone(),
			takerFeeAssetData: self.taker_fee_asset_data.clone(),
		}
	}

	pub fn domain(&self) -> Eip712Domain {
		Eip712Domain::new(
			Some(Cow::Borrowed("0x Protocol")),
			Some(Cow::Borrowed("3.0.0")),
			Some(U256::from(self.chain_id)),
			Some(self.exchange_address),
			None,
		)
	}

	fn validate_signature(&self) -> Result<(), RejectedOrderStatus> {
		let Some(&signature_type) = self.signature.last() else {
			return Err(RejectedOrderStatus::InvalidSignature);
		};
		match signature_type {
			v3_signature_type::EIP712 | v3_signature_type::ETH_SIGN => {
				if self.signature.len() != V3_ECDSA_SIGNATURE_LEN {
					return Err(RejectedOrderStatus::InvalidSignature);
				}
				Ok(())
			}
			v3_signature_type::WALLET
			| v3_signature_type::VALIDATOR
			| v3_signature_type::PRESIGNED
			| v3_signature_type::EIP1271_WALLET => Ok(()),
			_ => Err(RejectedOrderStatus::InvalidSignature),
		}
	}
}

fn check_asset_data(data: &[u8], status: RejectedOrderStatus) -> Result<(), RejectedOrderStatus> {
	AssetData::decode(data).map(|_| ()).map_err(|_| status)
}

impl SignedOrder for OrderV3 {
	fn version(&self) -> OrderVersion {
		OrderVersion::V3
	}

	fn hash(&self) -> B256 {
		self.to_abi().eip712_signing_hash(&self.domain())
	}

	fn maker(&self) -> Address {
		self.maker_address
	}

	fn taker(&self) -> Address {
		self.taker_address
	}

	fn sender(&self) -> Address {
		self.sender_address
	}

	fn salt(&self) -> U256 {
		self.salt
	}

	fn expiry(&self) -> U256 {
		self.expiration_time_seconds
	}

	fn maker_amount(&self) -> U256 {
		self.maker_asset_amount
	}

	fn taker_amount(&self) -> U256 {
		self.taker_asset_amount
	}

	fn chain_id(&self) -> u64 {
		self.chain_id
	}

	fn verifying_contract(&self) -> Address {
		self.exchange_address
	}

	fn maker_token_refs(&self) -> Vec<TokenRef> {
		let mut refs = Vec::new();
		for data in [&self.maker_asset_data, &self.maker_fee_asset_data] {
			if let Ok(decoded) = AssetData::decode(data) {
				for token in decoded.token_refs() {
					if !refs.contains(&token) {
						refs.push(token);
					}
				}
			}
		}
		refs
	}

	fn validate_fields(&self) -> Result<(), RejectedOrderStatus> {
		if self.maker_asset_amount.is_zero() {
			return Err(RejectedOrderStatus::InvalidMakerAssetAmount);
		}
		if self.taker_asset_amount.is_zero() {
			return Err(RejectedOrderStatus::InvalidTakerAssetAmount);
		}
		check_asset_data(
			&self.maker_asset_data,
			RejectedOrderStatus::InvalidMakerAssetData,
		)?;
		check_asset_data(
			&self.taker_asset_data,
			RejectedOrderStatus::InvalidTakerAssetData,
		)?;
		// Fee asset data may be omitted when the corresponding fee is zero.
		if !self.maker_fee_asset_data.is_empty() || !self.maker_fee.is_zero() {
			check_asset_data(
				&self.maker_fee_asset_data,
				RejectedOrderStatus::InvalidMakerFeeAssetData,
			)?;
		}
		if !self.taker_fee_asset_data.is_empty() || !self.taker_fee.is_zero() {
			check_asset_data(
				&self.taker_fee_asset_data,
				RejectedOrderStatus::InvalidTakerFeeAssetData,
			)?;
		}
		self.validate_signature()
	}

	fn encode_for_rpc(&self) -> Bytes {
		(self.to_abi(), self.signature.clone()).abi_encode().into()
	}
}

/// Signature attached to a v4 limit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureV4 {
	pub signature_type: u8,
	pub v: u8,
	pub r: B256,
	pub s: B256,
}

impl SignatureV4 {
	pub fn to_abi(&self) -> v4::Signature {
		v4::Signature {
			signatureType: self.signature_type,
			v: self.v,
			r: self.r,
			s: self.s,
		}
	}
}

/// 128-bit amounts as decimal strings.
mod u128_string {
	use serde::{de::Error, Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(value)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
		let raw = String::deserialize(deserializer)?;
		raw.parse().map_err(D::Error::custom)
	}
}

/// A v4 limit order with its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderV4 {
	pub chain_id: u64,
	pub verifying_contract: Address,
	pub maker_token: Address,
	pub taker_token: Address,
	#[serde(with = "u128_string")]
	pub maker_amount: u128,
	#[serde(with = "u128_string")]
	pub taker_amount: u128,
	#[serde(with = "u128_string")]
	pub taker_token_fee_amount: u128,
	pub maker: Address,
	pub taker: Address,
	pub sender: Address,
	pub fee_recipient: Address,
	pub pool: B256,
	pub expiry: u64,
	pub salt: U256,
	pub signature: SignatureV4,
}

impl OrderV4 {
	pub fn to_abi(&self) -> v4::LimitOrder {
		v4::LimitOrder {
			makerToken: self.maker_token,
			takerToken: self.taker_token,
			makerAmount: self.maker_amount,
			takerAmount: self.taker_amount,
			takerTokenFeeAmount: self.taker_token_fee_amount,
			maker: self.maker,
			taker: self.taker,
			sender: self.sender,
			feeRecipient: self.fee_recipient,
			pool: self.pool,
			expiry: self.expiry,
			salt: self.salt,
		}
	}

	pub fn domain(&self) -> Eip712Domain {
		Eip712Domain::new(
			Some(Cow::Borrowed("ZeroEx")),
			Some(Cow::Borrowed("1.0.0")),
			Some(U256::from(self.chain_id)),
			Some(self.verifying_contract),
			None,
		)
	}
}

impl SignedOrder for OrderV4 {
	fn version(&self) -> OrderVersion {
		OrderVersion::V4
	}

	fn hash(&self) -> B256 {
		self.to_abi().eip712_signing_hash(&self.domain())
	}

	fn maker(&self) -> Address {
		self.maker
	}

	fn taker(&self) -> Address {
		self.taker
	}

	fn sender(&self) -> Address {
		self.sender
	}

	fn salt(&self) -> U256 {
		self.salt
	}

	fn expiry(&self) -> U256 {
		U256::from(self.expiry)
	}

	fn maker_amount(&self) -> U256 {
		U256::from(self.maker_amount)
	}

	fn taker_amount(&self) -> U256 {
		U256::from(self.taker_amount)
	}

	fn chain_id(&self) -> u64 {
		self.chain_id
	}

	fn verifying_contract(&self) -> Address {
		self.verifying_contract
	}

	fn maker_token_refs(&self) -> Vec<TokenRef> {
		vec![TokenRef::fungible(self.maker_token)]
	}

	fn validate_fields(&self) -> Result<(), RejectedOrderStatus> {
		if self.maker_amount == 0 {
			return Err(RejectedOrderStatus::InvalidMakerAssetAmount);
		}
		if self.taker_amount == 0 {
			return Err(RejectedOrderStatus::InvalidTakerAssetAmount);
		}
		if self.maker_token.is_zero() {
			return Err(RejectedOrderStatus::InvalidMakerAssetData);
		}
		if self.taker_token.is_zero() {
			return Err(RejectedOrderStatus::InvalidTakerAssetData);
		}
		match self.signature.signature_type {
			v4::signature_type::EIP712 | v4::signature_type::ETH_SIGN => {
				if !matches!(self.signature.v, 27 | 28) {
					return Err(RejectedOrderStatus::InvalidSignature);
				}
				Ok(())
			}
			v4::signature_type::PRESIGNED => Ok(()),
			_ => Err(RejectedOrderStatus::InvalidSignature),
		}
	}

	fn encode_for_rpc(&self) -> Bytes {
		(self.to_abi(), self.signature.to_abi()).abi_encode().into()
	}
}

/// A signed order of either version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "version", rename_all = "lowercase")]
pub enum Order {
	V3(OrderV3),
	V4(OrderV4),
}

macro_rules! dispatch {
	($self:ident, $order:ident => $body:expr) => {
		match $self {
			Order::V3($order) => $body,
			Order::V4($order) => $body,
		}
	};
}

impl SignedOrder for Order {
	fn version(&self) -> OrderVersion {
		dispatch!(self, o => o.version())
	}

	fn hash(&self) -> B256 {
		dispatch!(self, o => o.hash())
	}

	fn maker(&self) -> Address {
		dispatch!(self, o => o.maker())
	}

	fn taker(&self) -> Address {
		dispatch!(self, o => o.taker())
	}

	fn sender(&self) -> Address {
		dispatch!(self, o => o.sender())
	}

	fn salt(&self) -> U256 {
		dispatch!(self, o => o.salt())
	}

	fn expiry(&self) -> U256 {
		dispatch!(self, o => o.expiry())
	}

	fn maker_amount(&self) -> U256 {
		dispatch!(self, o => o.maker_amount())
	}

	fn taker_amount(&self) -> U256 {
		dispatch!(self, o => o.taker_amount())
	}

	fn chain_id(&self) -> u64 {
		dispatch!(self, o => o.chain_id())
	}

	fn verifying_contract(&self) -> Address {
		dispatch!(self, o => o.verifying_contract())
	}

	fn maker_token_refs(&self) -> Vec<TokenRef> {
		dispatch!(self, o => o.maker_token_refs())
	}

	fn validate_fields(&self) -> Result<(), RejectedOrderStatus> {
		dispatch!(self, o => o.validate_fields())
	}

	fn encode_for_rpc(&self) -> Bytes {
		dispatch!(self, o => o.encode_for_rpc())
	}
}

impl From<OrderV3> for Order {
	fn from(order: OrderV3) -> Self {
		Order::V3(order)
	}
}

impl From<OrderV4> for Order {
	fn from(order: OrderV4) -> Self {
		Order::V4(order)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::address;

	fn v3_order() -> OrderV3 {
		let token = address!("0x0b1ba0af832d7c05fd64161e0db78e85978e8082");
		let mut signature = vec![0x1b; 65];
		signature.push(v3_signature_type::EIP712);
		OrderV3 {
			chain_id: 1337,
			exchange_address: address!("0x48bacb9266a570d521063ef5dd96e61686dbe788"),
			maker_address: address!("0x6ecbe1db9ef729cbe972c83fb886247691fb6beb"),
			taker_address: Address::ZERO,
			fee_recipient_address: Address::ZERO,
			sender_address: Address::ZERO,
			maker_asset_amount: U256::from(1000),
			taker_asset_amount: U256::from(2000),
			maker_fee: U256::ZERO,
			taker_fee: U256::ZERO,
			expiration_time_seconds: U256::from(1_700_000_000u64),
			salt: U256::from(42),
			maker_asset_data: AssetData::encode_erc20(token),
			taker_asset_data: AssetData::encode_erc20(token),
			maker_fee_asset_data: Bytes::new(),
			taker_fee_asset_data: Bytes::new(),
			signature: signature.into(),
		}
	}

	#[test]
	fn hash_depends_only_on_signed_fields() {
		let a = v3_order();
		let mut b = a.clone();
		b.signature = Bytes::from(vec![v3_signature_type::PRESIGNED]);
		assert_eq!(a.hash(), b.hash());

		b.salt = U256::from(43);
		assert_ne!(a.hash(), b.hash());

		let mut c = a.clone();
		c.chain_id = 1;
		assert_ne!(a.hash(), c.hash());
	}

	#[test]
	fn validate_fields_reports_first_failure() {
		let mut order = v3_order();
		assert_eq!(order.validate_fields(), Ok(()));

		order.maker_asset_amount = U256::ZERO;
		assert_eq!(
			order.validate_fields(),
			Err(RejectedOrderStatus::InvalidMakerAssetAmount)
		);

		let mut order = v3_order();
		order.taker_asset_data = Bytes::from(vec![1, 2, 3, 4, 5]);
		assert_eq!(
			order.validate_fields(),
			Err(RejectedOrderStatus::InvalidTakerAssetData)
		);

		let mut order = v3_order();
		order.signature = Bytes::from(vec![0x1b; 10]);
		assert_eq!(
			order.validate_fields(),
			Err(RejectedOrderStatus::InvalidSignature)
		);
	}

	#[test]
	fn serializes_with_version_tag() {
		let order: Order = v3_order().into();
		let json = serde_json::to_value(&order).unwrap();
		assert_eq!(json["version"], "v3");
		let back: Order = serde_json::from_value(json).unwrap();
		assert_eq!(back, order);
	}
}
