//! Order validation for the mesh node.
//!
//! Validation runs in two passes. The off-chain pass applies structural and
//! node-policy checks that need no chain access. The on-chain pass packs the
//! survivors into size-bounded chunks and asks the exchange contracts for
//! each order's status and fillable amount at a pinned block.
//!
//! Verdicts are data: every order comes back either in
//! [`ValidationResults::accepted`] or in [`ValidationResults::rejected`].

use alloy::primitives::{Address, B256, U256};
use mesh_config::MeshConfig;
use mesh_ethrpc::EthRpcClient;
use mesh_types::{Order, RejectedOrderInfo};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

pub mod chunk;
pub mod offchain;
pub mod onchain;

/// Errors that make a validator unusable.
#[derive(Debug, Error)]
pub enum ValidatorError {
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// An order that passed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedOrderInfo {
	pub hash: B256,
	pub order: Order,
	pub fillable_taker_amount: U256,
	/// Whether the order was newly stored. Set by the watcher.
	pub is_new: bool,
}

/// Outcome of validating a batch of orders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResults {
	pub accepted: Vec<AcceptedOrderInfo>,
	pub rejected: Vec<RejectedOrderInfo>,
}

impl ValidationResults {
	pub fn extend(&mut self, other: ValidationResults) {
		self.accepted.extend(other.accepted);
		self.rejected.extend(other.rejected);
	}
}

/// Settings the validator is built from.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
	pub chain_id: u64,
	pub exchange_v3: Address,
	pub exchange_v4: Address,
	pub dev_utils: Address,
	/// Bridge allowed in ERC20Bridge asset data.
	pub erc20_bridge: Option<Address>,
	/// Target allowed in StaticCall asset data.
	pub gas_price_checker: Option<Address>,
	pub whitelisted_takers: Vec<Address>,
	/// `from` address of validation calls.
	pub from: Address,
	pub max_request_content_length: usize,
	pub max_order_size_bytes: usize,
	pub concurrency: usize,
	pub request_timeout: Duration,
	pub max_attempts: u32,
	pub initial_backoff: Duration,
	pub max_backoff: Duration,
}

impl ValidatorConfig {
	pub fn from_config(config: &MeshConfig) -> Self {
		Self {
			chain_id: config.ethereum.chain_id,
			exchange_v3: config.contracts.exchange_v3,
			exchange_v4: config.contracts.exchange_v4,
			dev_utils: config.contracts.dev_utils,
			erc20_bridge: config.contracts.erc20_bridge_proxy,
			gas_price_checker: config.contracts.gas_price_checker,
			whitelisted_takers: config.contracts.whitelisted_takers.clone(),
			from: config.contracts.validator_from,
			max_request_content_length: config.ethereum.max_request_content_length,
			max_order_size_bytes: config.watcher.max_order_size_bytes,
			concurrency: config.watcher.validation_concurrency,
			request_timeout: config.ethereum.request_timeout(),
			max_attempts: 4,
			initial_backoff: Duration::from_millis(250),
			max_backoff: Duration::from_secs(2),
		}
	}
}

/// Batched order validator.
pub struct OrderValidator {
	client: Arc<dyn EthRpcClient>,
	config: ValidatorConfig,
	semaphore: Arc<Semaphore>,
	/// Size of a validation request carrying no orders.
	base_request_size: usize,
}

impl OrderValidator {
	/// Builds a validator. Fails when a single order of the maximum accepted
	/// size could not fit in one RPC request.
	pub fn new(
		client: Arc<dyn EthRpcClient>,
		config: ValidatorConfig,
	) -> Result<Self, ValidatorError> {
		if config.concurrency == 0 {
			return Err(ValidatorError::Configuration(
				"validation_concurrency must be non-zero".to_string(),
			));
		}
		if config.max_attempts == 0 {
			return Err(ValidatorError::Configuration(
				"max_attempts must be non-zero".to_string(),
			));
		}

		let base_request_size = chunk::base_request_size(&config);
		let largest = base_request_size + chunk::encoded_size_for(config.max_order_size_bytes);
		if largest >= config.max_request_content_length {
			return Err(ValidatorError::Configuration(format!(
				"an order of {} bytes encodes to a {} byte request, exceeding max_request_content_length {}",
				config.max_order_size_bytes, largest, config.max_request_content_length
			)));
		}

		Ok(Self {
			client,
			semaphore: Arc::new(Semaphore::new(config.concurrency)),
			config,
			base_request_size,
		})
	}

	pub fn config(&self) -> &ValidatorConfig {
		&self.config
	}

	/// Runs both passes. Orders expiring at or after `max_expiration` are
	/// rejected without an RPC call.
	pub async fn batch_validate(
		&self,
		orders: Vec<Order>,
		max_expiration: U256,
		block_number: u64,
	) -> ValidationResults {
		let (survivors, rejected) = self.batch_offchain_validation(orders, max_expiration);
		let mut results = self.batch_onchain_validation(survivors, block_number).await;
		results.rejected.extend(rejected);
		results
	}
}

#[cfg(test)]
pub(crate) mod testing {
	use super::*;
	use alloy::primitives::{address, Bytes};
	use mesh_types::{v3_signature_type, AssetData, OrderV3, OrderV4, SignatureV4};

	pub const EXCHANGE_V3: Address = address!("0x48bacb9266a570d521063ef5dd96e61686dbe788");
	pub const EXCHANGE_V4: Address = address!("0x5315e44798395d4a952530d131249fe00f554565");
	pub const DEV_UTILS: Address = address!("0x38ef19fdf8e8415f18c307ed71967e19aac28ba1");
	pub const MAKER: Address = address!("0x6ecbe1db9ef729cbe972c83fb886247691fb6beb");
	pub const TOKEN: Address = address!("0x0b1ba0af832d7c05fd64161e0db78e85978e8082");
	pub const OTHER_TOKEN: Address = address!("0x871dd7c2b4b25e1aa18728e9d5f2af4c4e431f5c");
	pub const CHAIN_ID: u64 = 1337;

	pub fn config() -> ValidatorConfig {
		ValidatorConfig {
			chain_id: CHAIN_ID,
			exchange_v3: EXCHANGE_V3,
			exchange_v4: EXCHANGE_V4,
			dev_utils: DEV_UTILS,
			erc20_bridge: None,
			gas_price_checker: None,
			whitelisted_takers: Vec::new(),
			from: address!("0x0000000000000000000000000000000000000001"),
			max_request_content_length: 524_288,
			max_order_size_bytes: 16_000,
			concurrency: 5,
			request_timeout: Duration::from_secs(60),
			max_attempts: 4,
			initial_backoff: Duration::from_millis(250),
			max_backoff: Duration::from_secs(2),
		}
	}

	pub fn v3_order(salt: u64) -> OrderV3 {
		let mut signature = vec![0x1b; 65];
		signature.push(v3_signature_type::EIP712);
		OrderV3 {
			chain_id: CHAIN_ID,
			exchange_address: EXCHANGE_V3,
			maker_address: MAKER,
			taker_address: Address::ZERO,
			fee_recipient_address: Address::ZERO,
			sender_address: Address::ZERO,
			maker_asset_amount: U256::from(1000),
			taker_asset_amount: U256::from(2000),
			maker_fee: U256::ZERO,
			taker_fee: U256::ZERO,
			expiration_time_seconds: U256::from(1_000_000u64),
			salt: U256::from(salt),
			maker_asset_data: AssetData::encode_erc20(TOKEN),
			taker_asset_data: AssetData::encode_erc20(OTHER_TOKEN),
			maker_fee_asset_data: Bytes::new(),
			taker_fee_asset_data: Bytes::new(),
			signature: signature.into(),
		}
	}

	pub fn v4_order(salt: u64) -> OrderV4 {
		OrderV4 {
			chain_id: CHAIN_ID,
			verifying_contract: EXCHANGE_V4,
			maker_token: TOKEN,
			taker_token: OTHER_TOKEN,
			maker_amount: 1000,
			taker_amount: 2000,
			taker_token_fee_amount: 0,
			maker: MAKER,
			taker: Address::ZERO,
			sender: Address::ZERO,
			fee_recipient: Address::ZERO,
			pool: B256::ZERO,
			expiry: 1_000_000,
			salt: U256::from(salt),
			signature: SignatureV4 {
				signature_type: mesh_types::abi::v4::signature_type::EIP712,
				v: 27,
				r: B256::repeat_byte(1),
				s: B256::repeat_byte(2),
			},
		}
	}
}
