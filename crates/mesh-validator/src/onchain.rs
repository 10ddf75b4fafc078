//! Batched on-chain validation.
//!
//! v3 orders are checked through `DevUtils.getOrderRelevantStates`, v4 limit
//! orders through `batchGetLimitOrderRelevantStates` on the exchange proxy.
//! Each chunk is one `eth_call`, retried with exponential backoff. A chunk
//! that keeps failing rejects its orders with `EthRPCRequestFailed` without
//! affecting other chunks.

use crate::chunk::chunk_orders;
use crate::{AcceptedOrderInfo, OrderValidator, ValidationResults};
use alloy::primitives::{Bytes, U256};
use alloy::sol_types::SolCall;
use backoff::{backoff::Backoff, ExponentialBackoff};
use futures::future::join_all;
use mesh_ethrpc::{CallRequest, EthRpcError};
use mesh_types::abi::{v3, v4};
use mesh_types::{
	short_hash, Order, OrderVersion, RejectedOrderInfo, RejectedOrderKind, RejectedOrderStatus,
	SignedOrder,
};
use tracing::{debug, warn};

/// Contract-reported state of one order, normalized across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnchainStatus {
	Fillable,
	Expired,
	FullyFilled,
	Cancelled,
	InvalidMakerAmount,
	InvalidTakerAmount,
	Invalid,
}

impl OnchainStatus {
	fn from_v3(code: u8) -> Self {
		match code {
			v3::status::FILLABLE => Self::Fillable,
			v3::status::EXPIRED => Self::Expired,
			v3::status::FULLY_FILLED => Self::FullyFilled,
			v3::status::CANCELLED => Self::Cancelled,
			v3::status::INVALID_MAKER_ASSET_AMOUNT => Self::InvalidMakerAmount,
			v3::status::INVALID_TAKER_ASSET_AMOUNT => Self::InvalidTakerAmount,
			_ => Self::Invalid,
		}
	}

	fn from_v4(code: u8) -> Self {
		match code {
			v4::status::FILLABLE => Self::Fillable,
			v4::status::EXPIRED => Self::Expired,
			v4::status::FILLED => Self::FullyFilled,
			v4::status::CANCELLED => Self::Cancelled,
			_ => Self::Invalid,
		}
	}
}

/// Per-order result row of a batch call.
#[derive(Debug, Clone, Copy)]
struct OnchainState {
	status: OnchainStatus,
	filled_taker_amount: U256,
	fillable_taker_amount: U256,
	signature_valid: bool,
}

/// Turns a contract result row into a verdict. A fillable order that cannot
/// be filled for its whole remaining amount is treated as unfunded.
fn verdict(state: OnchainState, taker_amount: U256) -> Result<U256, RejectedOrderStatus> {
	match state.status {
		OnchainStatus::Fillable => {
			if !state.signature_valid {
				return Err(RejectedOrderStatus::InvalidSignature);
			}
			let remaining = taker_amount.saturating_sub(state.filled_taker_amount);
			if state.fillable_taker_amount < remaining {
				return Err(RejectedOrderStatus::Unfunded);
			}
			Ok(state.fillable_taker_amount)
		}
		OnchainStatus::Expired => Err(RejectedOrderStatus::Expired),
		OnchainStatus::FullyFilled => Err(RejectedOrderStatus::FullyFilled),
		OnchainStatus::Cancelled => Err(RejectedOrderStatus::Cancelled),
		OnchainStatus::InvalidMakerAmount => Err(RejectedOrderStatus::InvalidMakerAssetAmount),
		OnchainStatus::InvalidTakerAmount => Err(RejectedOrderStatus::InvalidTakerAssetAmount),
		OnchainStatus::Invalid if !state.signature_valid => {
			Err(RejectedOrderStatus::InvalidSignature)
		}
		OnchainStatus::Invalid => Err(RejectedOrderStatus::InvalidOrder),
	}
}

fn encode_v3_call(chunk: &[Order]) -> Bytes {
	let (orders, signatures): (Vec<_>, Vec<_>) = chunk
		.iter()
		.filter_map(|order| match order {
			Order::V3(o) => Some((o.to_abi(), o.signature.clone())),
			Order::V4(_) => None,
		})
		.unzip();
	v3::IDevUtils::getOrderRelevantStatesCall { orders, signatures }
		.abi_encode()
		.into()
}

fn encode_v4_call(chunk: &[Order]) -> Bytes {
	let (orders, signatures): (Vec<_>, Vec<_>) = chunk
		.iter()
		.filter_map(|order| match order {
			Order::V4(o) => Some((o.to_abi(), o.signature.to_abi())),
			Order::V3(_) => None,
		})
		.unzip();
	v4::INativeOrdersFeature::batchGetLimitOrderRelevantStatesCall { orders, signatures }
		.abi_encode()
		.into()
}

fn decode_v3_states(data: &[u8], expected: usize) -> Result<Vec<OnchainState>, String> {
	let ret = v3::IDevUtils::getOrderRelevantStatesCall::abi_decode_returns(data)
		.map_err(|e| e.to_string())?;
	if ret.ordersInfo.len() != expected
		|| ret.fillableTakerAssetAmounts.len() != expected
		|| ret.isValidSignature.len() != expected
	{
		return Err(format!("expected {} results", expected));
	}
	Ok(ret
		.ordersInfo
		.iter()
		.zip(ret.fillableTakerAssetAmounts.iter())
		.zip(ret.isValidSignature.iter())
		.map(|((info, fillable), valid)| OnchainState {
			status: OnchainStatus::from_v3(info.orderStatus),
			filled_taker_amount: info.orderTakerAssetFilledAmount,
			fillable_taker_amount: *fillable,
			signature_valid: *valid,
		})
		.collect())
}

fn decode_v4_states(data: &[u8], expected: usize) -> Result<Vec<OnchainState>, String> {
	let ret =
		v4::INativeOrdersFeature::batchGetLimitOrderRelevantStatesCall::abi_decode_returns(data)
			.map_err(|e| e.to_string())?;
	if ret.orderInfos.len() != expected
		|| ret.actualFillableTakerTokenAmounts.len() != expected
		|| ret.isSignatureValids.len() != expected
	{
		return Err(format!("expected {} results", expected));
	}
	Ok(ret
		.orderInfos
		.iter()
		.zip(ret.actualFillableTakerTokenAmounts.iter())
		.zip(ret.isSignatureValids.iter())
		.map(|((info, fillable), valid)| OnchainState {
			status: OnchainStatus::from_v4(info.status),
			filled_taker_amount: U256::from(info.takerTokenFilledAmount),
			fillable_taker_amount: U256::from(*fillable),
			signature_valid: *valid,
		})
		.collect())
}

fn reject_all(chunk: Vec<Order>, status: RejectedOrderStatus) -> ValidationResults {
	ValidationResults {
		accepted: Vec::new(),
		rejected: chunk
			.into_iter()
			.map(|order| RejectedOrderInfo::new(order.hash(), order, status))
			.collect(),
	}
}

impl OrderValidator {
	/// Validates `orders` against contract state at `block_number`.
	pub async fn batch_onchain_validation(
		&self,
		orders: Vec<Order>,
		block_number: u64,
	) -> ValidationResults {
		let mut results = ValidationResults::default();
		if orders.is_empty() {
			return results;
		}

		let (v3_orders, v4_orders): (Vec<Order>, Vec<Order>) = orders
			.into_iter()
			.partition(|order| order.version() == OrderVersion::V3);

		let mut jobs = Vec::new();
		for (version, batch) in [(OrderVersion::V3, v3_orders), (OrderVersion::V4, v4_orders)] {
			if batch.is_empty() {
				continue;
			}
			let packed = chunk_orders(
				batch,
				self.base_request_size,
				self.config.max_request_content_length,
			);
			for order in packed.oversized {
				results.rejected.push(RejectedOrderInfo::new(
					order.hash(),
					order,
					RejectedOrderStatus::MaxOrderSizeExceeded,
				));
			}
			debug!(
				%version,
				chunks = packed.chunks.len(),
				block = block_number,
				"Dispatching validation chunks"
			);
			for chunk in packed.chunks {
				jobs.push(self.validate_chunk(version, chunk, block_number));
			}
		}

		for chunk_results in join_all(jobs).await {
			results.extend(chunk_results);
		}
		results
	}

	async fn validate_chunk(
		&self,
		version: OrderVersion,
		chunk: Vec<Order>,
		block_number: u64,
	) -> ValidationResults {
		let Ok(_permit) = self.semaphore.acquire().await else {
			return reject_all(chunk, RejectedOrderStatus::InternalError);
		};

		let (to, data) = match version {
			OrderVersion::V3 => (self.config.dev_utils, encode_v3_call(&chunk)),
			OrderVersion::V4 => (self.config.exchange_v4, encode_v4_call(&chunk)),
		};
		let call = CallRequest {
			from: self.config.from,
			to,
			data,
		};

		let output = match self.call_with_retry(call, block_number).await {
			Ok(output) => output,
			Err(e) => {
				warn!(
					%version,
					orders = chunk.len(),
					error = %e,
					"Validation chunk failed"
				);
				return reject_all(chunk, RejectedOrderStatus::EthRPCRequestFailed);
			}
		};

		let states = match version {
			OrderVersion::V3 => decode_v3_states(&output, chunk.len()),
			OrderVersion::V4 => decode_v4_states(&output, chunk.len()),
		};
		let states = match states {
			Ok(states) => states,
			Err(e) => {
				warn!(%version, error = %e, "Malformed validation response");
				return reject_all(chunk, RejectedOrderStatus::InternalError);
			}
		};

		let mut results = ValidationResults::default();
		for (order, state) in chunk.into_iter().zip(states) {
			let hash = order.hash();
			match verdict(state, order.taker_amount()) {
				Ok(fillable_taker_amount) => results.accepted.push(AcceptedOrderInfo {
					hash,
					order,
					fillable_taker_amount,
					is_new: false,
				}),
				Err(status) => {
					debug!(
						order_hash = %short_hash(&hash),
						status = status.code(),
						"Order failed on-chain validation"
					);
					results.rejected.push(
						RejectedOrderInfo::new(hash, order, status)
							.with_kind(RejectedOrderKind::OnchainValidation),
					);
				}
			}
		}
		results
	}

	fn backoff(&self) -> ExponentialBackoff {
		let mut backoff = ExponentialBackoff {
			initial_interval: self.config.initial_backoff,
			current_interval: self.config.initial_backoff,
			randomization_factor: 0.0,
			multiplier: 2.0,
			max_interval: self.config.max_backoff,
			max_elapsed_time: None,
			..Default::default()
		};
		backoff.reset();
		backoff
	}

	/// Issues `call` with a per-attempt deadline, retrying transient failures.
	/// An exhausted request budget is not retried.
	async fn call_with_retry(
		&self,
		call: CallRequest,
		block_number: u64,
	) -> Result<Bytes, EthRpcError> {
		let mut backoff = self.backoff();
		let mut attempts = 0;

		loop {
			let attempt = tokio::time::timeout(
				self.config.request_timeout,
				self.client.call_contract(call.clone(), Some(block_number)),
			)
			.await
			.unwrap_or(Err(EthRpcError::Timeout));

			match attempt {
				Ok(output) => return Ok(output),
				Err(EthRpcError::RequestBudgetExhausted) => {
					return Err(EthRpcError::RequestBudgetExhausted)
				}
				Err(e) => {
					attempts += 1;
					if attempts >= self.config.max_attempts {
						warn!(
							"Validation call failed after {} attempts, giving up: {}",
							attempts, e
						);
						return Err(e);
					}
					match backoff.next_backoff() {
						Some(delay) => {
							warn!(
								"Validation call failed, attempt {}/{}, retrying in {:?}: {}",
								attempts, self.config.max_attempts, delay, e
							);
							tokio::time::sleep(delay).await;
						}
						None => return Err(e),
					}
				}
			}
		}
	}
}
