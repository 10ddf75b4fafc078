//! Checks that need no chain access.

use crate::{OrderValidator, ValidatorConfig};
use alloy::primitives::{Address, Bytes, U256};
use mesh_types::{
	AssetData, Order, OrderVersion, RejectedOrderInfo, RejectedOrderStatus, SignedOrder,
};
use tracing::debug;

impl OrderValidator {
	/// Splits `orders` into survivors and rejections. Survivors keep their
	/// input order.
	pub fn batch_offchain_validation(
		&self,
		orders: Vec<Order>,
		max_expiration: U256,
	) -> (Vec<Order>, Vec<RejectedOrderInfo>) {
		let mut survivors = Vec::with_capacity(orders.len());
		let mut rejected = Vec::new();

		for order in orders {
			let hash = order.hash();
			match check_order(&self.config, &order, max_expiration) {
				Ok(()) => survivors.push(order),
				Err(status) => {
					debug!(
						order_hash = %mesh_types::short_hash(&hash),
						status = status.code(),
						"Order failed off-chain validation"
					);
					rejected.push(RejectedOrderInfo::new(hash, order, status));
				}
			}
		}
		(survivors, rejected)
	}
}

/// Encoded size used for the size limit.
pub fn encoded_order_size(order: &Order) -> usize {
	serde_json::to_vec(order).map_or(usize::MAX, |bytes| bytes.len())
}

pub(crate) fn check_order(
	config: &ValidatorConfig,
	order: &Order,
	max_expiration: U256,
) -> Result<(), RejectedOrderStatus> {
	if encoded_order_size(order) > config.max_order_size_bytes {
		return Err(RejectedOrderStatus::MaxOrderSizeExceeded);
	}
	if order.chain_id() != config.chain_id {
		return Err(RejectedOrderStatus::IncorrectChain);
	}
	let exchange = match order.version() {
		OrderVersion::V3 => config.exchange_v3,
		OrderVersion::V4 => config.exchange_v4,
	};
	if order.verifying_contract() != exchange {
		return Err(RejectedOrderStatus::IncorrectExchangeAddress);
	}
	if !order.sender().is_zero() {
		return Err(RejectedOrderStatus::SenderAddressNotAllowed);
	}
	let taker = order.taker();
	if !taker.is_zero() && !config.whitelisted_takers.contains(&taker) {
		return Err(RejectedOrderStatus::TakerAddressNotAllowed);
	}
	if order.expiry() >= max_expiration {
		return Err(RejectedOrderStatus::MaxExpirationExceeded);
	}
	order.validate_fields()?;

	if let Order::V3(v3) = order {
		check_asset_data_policy(
			config,
			&v3.maker_asset_data,
			RejectedOrderStatus::InvalidMakerAssetData,
		)?;
		check_asset_data_policy(
			config,
			&v3.taker_asset_data,
			RejectedOrderStatus::InvalidTakerAssetData,
		)?;
		check_asset_data_policy(
			config,
			&v3.maker_fee_asset_data,
			RejectedOrderStatus::InvalidMakerFeeAssetData,
		)?;
		check_asset_data_policy(
			config,
			&v3.taker_fee_asset_data,
			RejectedOrderStatus::InvalidTakerFeeAssetData,
		)?;
	}
	Ok(())
}

/// Bridge and static-call payloads are only accepted against the configured
/// contracts.
fn check_asset_data_policy(
	config: &ValidatorConfig,
	data: &Bytes,
	status: RejectedOrderStatus,
) -> Result<(), RejectedOrderStatus> {
	if data.is_empty() {
		return Ok(());
	}
	let decoded = AssetData::decode(data).map_err(|_| status)?;
	let allowed = |target: &Address, configured: Option<Address>| configured == Some(*target);

	let mut ok = true;
	decoded.for_each(&mut |asset| match asset {
		AssetData::StaticCall { target, .. } => {
			ok &= allowed(target, config.gas_price_checker);
		}
		AssetData::Erc20Bridge { bridge, .. } => {
			ok &= allowed(bridge, config.erc20_bridge);
		}
		_ => {}
	});
	if ok {
		Ok(())
	} else {
		Err(status)
	}
}
