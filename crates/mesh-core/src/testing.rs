//! Test fixtures: a scripted chain, order builders and a watcher harness.

use crate::OrderWatcher;
use alloy::primitives::{address, Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use mesh_config::WatcherConfig;
use mesh_ethrpc::{CallRequest, EthRpcClient, EthRpcError, LogFilter};
use mesh_storage::implementations::memory::MemoryStorage;
use mesh_storage::{
	AddOrdersOutcome, Metadata, MetadataUpdate, OrderCounts, OrderQuery, OrderStore, OrderUpdate,
	StorageError, StoreTransaction,
};
use mesh_types::abi::{v3, v4};
use mesh_types::{
	v3_signature_type, AssetData, BlockRef, EthLog, KeepOptions, ManualClock, MiniHeader,
	OrderV3, OrderV4, OrderWithMetadata, SignatureV4,
};
use mesh_validator::{OrderValidator, ValidatorConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CHAIN_ID: u64 = 1337;
pub const EXCHANGE_V3: Address = address!("0x48bacb9266a570d521063ef5dd96e61686dbe788");
pub const EXCHANGE_V4: Address = address!("0x5315e44798395d4a952530d131249fe00f554565");
pub const DEV_UTILS: Address = address!("0x38ef19fdf8e8415f18c307ed71967e19aac28ba1");
pub const MAKER: Address = address!("0x6ecbe1db9ef729cbe972c83fb886247691fb6beb");
pub const TAKER: Address = address!("0xe36ea790bc9d7ab70c55260c66d52b1eca985f84");
pub const TOKEN: Address = address!("0x0b1ba0af832d7c05fd64161e0db78e85978e8082");
pub const OTHER_TOKEN: Address = address!("0x871dd7c2b4b25e1aa18728e9d5f2af4c4e431f5c");

/// Taker amount of every built order.
pub const TAKER_AMOUNT: u64 = 2000;

pub fn v4_order(salt: u64, expiry: u64) -> OrderV4 {
	OrderV4 {
		chain_id: CHAIN_ID,
		verifying_contract: EXCHANGE_V4,
		maker_token: TOKEN,
		taker_token: OTHER_TOKEN,
		maker_amount: 1000,
		taker_amount: TAKER_AMOUNT as u128,
		taker_token_fee_amount: 0,
		maker: MAKER,
		taker: Address::ZERO,
		sender: Address::ZERO,
		fee_recipient: Address::ZERO,
		pool: B256::ZERO,
		expiry,
		salt: U256::from(salt),
		signature: SignatureV4 {
			signature_type: v4::signature_type::EIP712,
			v: 27,
			r: B256::repeat_byte(1),
			s: B256::repeat_byte(2),
		},
	}
}

pub fn v3_order(salt: u64, expiry: u64) -> OrderV3 {
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
		taker_asset_amount: U256::from(TAKER_AMOUNT),
		maker_fee: U256::ZERO,
		taker_fee: U256::ZERO,
		expiration_time_seconds: U256::from(expiry),
		salt: U256::from(salt),
		maker_asset_data: AssetData::encode_erc20(TOKEN),
		taker_asset_data: AssetData::encode_erc20(OTHER_TOKEN),
		maker_fee_asset_data: Bytes::new(),
		taker_fee_asset_data: Bytes::new(),
		signature: signature.into(),
	}
}

/// A fillable stored v4 order validated at block 1.
pub fn stored(salt: u64, expiry: u64) -> OrderWithMetadata {
	OrderWithMetadata::new(
		v4_order(salt, expiry).into(),
		U256::from(TAKER_AMOUNT),
		BlockRef {
			number: 1,
			hash: B256::with_last_byte(1),
		},
		false,
		KeepOptions::default(),
		Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
	)
}

pub fn header(number: u64, timestamp: u64, fork: u8, logs: Vec<EthLog>) -> MiniHeader {
	let hash = B256::from(U256::from(number) | (U256::from(fork) << 128));
	let parent = B256::from(U256::from(number.saturating_sub(1)) | (U256::from(fork) << 128));
	let logs = logs
		.into_iter()
		.map(|mut log| {
			log.block_number = number;
			log.block_hash = hash;
			log
		})
		.collect();
	MiniHeader {
		number,
		hash,
		parent,
		timestamp,
		logs,
	}
}

pub fn log<E: SolEvent>(address: Address, event: &E, tx: u8, log_index: u64) -> EthLog {
	let data = event.encode_log_data();
	EthLog {
		address,
		topics: data.topics().to_vec(),
		data: data.data.clone(),
		block_number: 0,
		block_hash: B256::ZERO,
		tx_hash: B256::repeat_byte(tx),
		tx_index: 0,
		log_index,
		removed: false,
	}
}

/// On-chain state of one order, keyed by salt in [`MockEthClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
	Fillable { filled: u64, fillable: u64 },
	FullyFilled,
	Cancelled,
	Expired,
}

/// Scripted chain answering batch validation calls from per-salt state.
/// Salts without an entry are fully fillable.
#[derive(Default)]
pub struct MockEthClient {
	states: Mutex<HashMap<U256, ChainState>>,
	pub latest: Mutex<Option<MiniHeader>>,
	pub fail_calls: AtomicBool,
	pub budget_exhausted: AtomicBool,
	pub calls: AtomicU32,
}

impl MockEthClient {
	pub fn set(&self, salt: u64, state: ChainState) {
		self.states.lock().unwrap().insert(U256::from(salt), state);
	}

	fn state(&self, salt: U256) -> ChainState {
		self.states
			.lock()
			.unwrap()
			.get(&salt)
			.copied()
			.unwrap_or(ChainState::Fillable {
				filled: 0,
				fillable: TAKER_AMOUNT,
			})
	}

	fn answer_v3(&self, data: &[u8]) -> Bytes {
		let call = v3::IDevUtils::getOrderRelevantStatesCall::abi_decode(data).unwrap();
		let mut ret = v3::IDevUtils::getOrderRelevantStatesReturn {
			ordersInfo: Vec::new(),
			fillableTakerAssetAmounts: Vec::new(),
			isValidSignature: Vec::new(),
		};
		for order in call.orders {
			let (status, filled, fillable) = match self.state(order.salt) {
				ChainState::Fillable { filled, fillable } => (v3::status::FILLABLE, filled, fillable),
				ChainState::FullyFilled => (v3::status::FULLY_FILLED, TAKER_AMOUNT, 0),
				ChainState::Cancelled => (v3::status::CANCELLED, 0, 0),
				ChainState::Expired => (v3::status::EXPIRED, 0, 0),
			};
			ret.ordersInfo.push(v3::OrderInfo {
				orderStatus: status,
				orderHash: B256::ZERO,
				orderTakerAssetFilledAmount: U256::from(filled),
			});
			ret.fillableTakerAssetAmounts.push(U256::from(fillable));
			ret.isValidSignature.push(true);
		}
		v3::IDevUtils::getOrderRelevantStatesCall::abi_encode_returns(&ret).into()
	}

	fn answer_v4(&self, data: &[u8]) -> Bytes {
		let call =
			v4::INativeOrdersFeature::batchGetLimitOrderRelevantStatesCall::abi_decode(data).unwrap();
		let mut ret = v4::INativeOrdersFeature::batchGetLimitOrderRelevantStatesReturn {
			orderInfos: Vec::new(),
			actualFillableTakerTokenAmounts: Vec::new(),
			isSignatureValids: Vec::new(),
		};
		for order in call.orders {
			let (status, filled, fillable) = match self.state(order.salt) {
				ChainState::Fillable { filled, fillable } => (v4::status::FILLABLE, filled, fillable),
				ChainState::FullyFilled => (v4::status::FILLED, TAKER_AMOUNT, 0),
				ChainState::Cancelled => (v4::status::CANCELLED, 0, 0),
				ChainState::Expired => (v4::status::EXPIRED, 0, 0),
			};
			ret.orderInfos.push(v4::OrderInfo {
				orderHash: B256::ZERO,
				status,
				takerTokenFilledAmount: filled as u128,
			});
			ret.actualFillableTakerTokenAmounts.push(fillable as u128);
			ret.isSignatureValids.push(true);
		}
		v4::INativeOrdersFeature::batchGetLimitOrderRelevantStatesCall::abi_encode_returns(&ret)
			.into()
	}
}

#[async_trait]
impl EthRpcClient for MockEthClient {
	async fn header_by_hash(&self, hash: B256) -> Result<MiniHeader, EthRpcError> {
		Err(EthRpcError::NotFound(format!("block {}", hash)))
	}

	async fn header_by_number(&self, _: Option<u64>) -> Result<MiniHeader, EthRpcError> {
		self.latest
			.lock()
			.unwrap()
			.clone()
			.ok_or_else(|| EthRpcError::NotFound("latest block".to_string()))
	}

	async fn filter_logs(&self, _: &LogFilter) -> Result<Vec<EthLog>, EthRpcError> {
		Ok(Vec::new())
	}

	async fn call_contract(&self, call: CallRequest, _: Option<u64>) -> Result<Bytes, EthRpcError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		if self.budget_exhausted.load(Ordering::SeqCst) {
			return Err(EthRpcError::RequestBudgetExhausted);
		}
		if self.fail_calls.load(Ordering::SeqCst) {
			return Err(EthRpcError::Transport("connection refused".to_string()));
		}
		if call.to == DEV_UTILS {
			Ok(self.answer_v3(&call.data))
		} else {
			Ok(self.answer_v4(&call.data))
		}
	}

	async fn code_at(&self, _: Address, _: Option<u64>) -> Result<Bytes, EthRpcError> {
		Ok(Bytes::new())
	}

	async fn call_context(
		&self,
		_: &str,
		_: serde_json::Value,
	) -> Result<serde_json::Value, EthRpcError> {
		Ok(serde_json::Value::Null)
	}
}

pub fn validator_config() -> ValidatorConfig {
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

pub fn watcher_config(max_orders: usize) -> WatcherConfig {
	WatcherConfig {
		max_orders,
		..Default::default()
	}
}

/// A watcher over an in-memory store and the scripted chain.
pub struct Harness {
	pub watcher: Arc<OrderWatcher>,
	pub store: Arc<dyn OrderStore>,
	pub client: Arc<MockEthClient>,
	pub clock: Arc<ManualClock>,
}

impl Harness {
	pub async fn new(config: WatcherConfig) -> Self {
		let store = Arc::new(MemoryStorage::new(config.mini_header_retention));
		Self::with_store(store, config).await
	}

	pub async fn with_store(store: Arc<dyn OrderStore>, config: WatcherConfig) -> Self {
		let client = Arc::new(MockEthClient::default());
		let clock = Arc::new(ManualClock::new(
			Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
		));
		let validator = OrderValidator::new(client.clone(), validator_config()).unwrap();
		let watcher = OrderWatcher::new(
			store.clone(),
			client.clone(),
			validator,
			config,
			clock.clone(),
		)
		.await
		.unwrap();
		Self {
			watcher: Arc::new(watcher),
			store,
			client,
			clock,
		}
	}

	pub async fn with_max_orders(max_orders: usize) -> Self {
		Self::new(watcher_config(max_orders)).await
	}
}

/// In-memory store whose commits can be made to fail.
pub struct FlakyStore {
	inner: MemoryStorage,
	pub fail_commits: AtomicBool,
	pub commits: AtomicU32,
}

impl Default for FlakyStore {
	fn default() -> Self {
		Self {
			inner: MemoryStorage::new(20),
			fail_commits: AtomicBool::new(false),
			commits: AtomicU32::new(0),
		}
	}
}

#[async_trait]
impl OrderStore for FlakyStore {
	async fn add_orders(
		&self,
		orders: Vec<OrderWithMetadata>,
		max_orders: usize,
		now: DateTime<Utc>,
	) -> Result<AddOrdersOutcome, StorageError> {
		self.inner.add_orders(orders, max_orders, now).await
	}

	async fn get_order(&self, hash: &B256) -> Result<Option<OrderWithMetadata>, StorageError> {
		self.inner.get_order(hash).await
	}

	async fn update_order(
		&self,
		hash: &B256,
		update: OrderUpdate,
	) -> Result<OrderWithMetadata, StorageError> {
		self.inner.update_order(hash, update).await
	}

	async fn find_orders(&self, query: &OrderQuery) -> Result<Vec<OrderWithMetadata>, StorageError> {
		self.inner.find_orders(query).await
	}

	async fn find_orders_by_maker_and_max_salt(
		&self,
		maker: Address,
		max_salt: U256,
	) -> Result<Vec<OrderWithMetadata>, StorageError> {
		self.inner.find_orders_by_maker_and_max_salt(maker, max_salt).await
	}

	async fn find_orders_by_maker_and_token_and_id(
		&self,
		maker: Address,
		token: Address,
		token_id: Option<U256>,
	) -> Result<Vec<OrderWithMetadata>, StorageError> {
		self.inner
			.find_orders_by_maker_and_token_and_id(maker, token, token_id)
			.await
	}

	async fn order_counts(&self) -> Result<OrderCounts, StorageError> {
		self.inner.order_counts().await
	}

	async fn delete_orders(&self, hashes: &[B256]) -> Result<Vec<OrderWithMetadata>, StorageError> {
		self.inner.delete_orders(hashes).await
	}

	async fn commit(&self, tx: StoreTransaction) -> Result<(), StorageError> {
		self.commits.fetch_add(1, Ordering::SeqCst);
		if self.fail_commits.load(Ordering::SeqCst) {
			return Err(StorageError::Backend("disk full".to_string()));
		}
		self.inner.commit(tx).await
	}

	async fn add_mini_header(&self, header: MiniHeader) -> Result<(), StorageError> {
		self.inner.add_mini_header(header).await
	}

	async fn delete_mini_header(&self, hash: &B256) -> Result<(), StorageError> {
		self.inner.delete_mini_header(hash).await
	}

	async fn get_latest_mini_header(&self) -> Result<Option<MiniHeader>, StorageError> {
		self.inner.get_latest_mini_header().await
	}

	async fn get_mini_headers(&self) -> Result<Vec<MiniHeader>, StorageError> {
		self.inner.get_mini_headers().await
	}

	async fn get_metadata(&self) -> Result<Metadata, StorageError> {
		self.inner.get_metadata().await
	}

	async fn update_metadata(&self, update: MetadataUpdate) -> Result<Metadata, StorageError> {
		self.inner.update_metadata(update).await
	}
}
