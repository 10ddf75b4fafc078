//! Configuration types for the mesh node.

use alloy::primitives::{address, Address};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Complete node configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MeshConfig {
	/// Chain connection and RPC budget
	pub ethereum: EthereumConfig,
	/// Contract addresses for the configured chain
	pub contracts: ContractsConfig,
	/// Order watcher tuning
	#[serde(default)]
	pub watcher: WatcherConfig,
	/// Persistence backend
	#[serde(default)]
	pub storage: StorageConfig,
	/// Log output
	#[serde(default)]
	pub logging: LoggingConfig,
}

/// Chain connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EthereumConfig {
	pub chain_id: u64,
	pub rpc_url: String,
	#[serde(default = "default_request_timeout_secs")]
	pub request_timeout_secs: u64,
	/// Maximum JSON-RPC request body in bytes
	#[serde(default = "default_max_request_content_length")]
	pub max_request_content_length: usize,
	#[serde(default = "default_max_requests_per_24h")]
	pub max_requests_per_24h: u64,
	#[serde(default = "default_max_requests_per_second")]
	pub max_requests_per_second: u32,
	#[serde(default = "default_block_polling_interval_ms")]
	pub block_polling_interval_ms: u64,
}

impl EthereumConfig {
	pub fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}

	pub fn block_polling_interval(&self) -> Duration {
		Duration::from_millis(self.block_polling_interval_ms)
	}
}

/// Contract addresses
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContractsConfig {
	pub exchange_v3: Address,
	pub exchange_v4: Address,
	pub dev_utils: Address,
	pub weth: Address,
	/// Only bridge accepted in ERC20Bridge asset data
	pub erc20_bridge_proxy: Option<Address>,
	/// Only target accepted in StaticCall asset data
	pub gas_price_checker: Option<Address>,
	/// Non-null takers allowed on submitted orders
	#[serde(default)]
	pub whitelisted_takers: Vec<Address>,
	/// `from` address used for validation calls
	#[serde(default = "default_validator_from")]
	pub validator_from: Address,
}

/// Order watcher settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatcherConfig {
	#[serde(default = "default_max_orders")]
	pub max_orders: usize,
	/// Reject orders expiring more than this many seconds after the latest block
	pub max_expiration_secs: Option<u64>,
	#[serde(default = "default_max_order_size_bytes")]
	pub max_order_size_bytes: usize,
	#[serde(default = "default_slow_subscriber_timeout_ms")]
	pub slow_subscriber_timeout_ms: u64,
	#[serde(default = "default_subscriber_buffer")]
	pub subscriber_buffer: usize,
	#[serde(default = "default_cleanup_interval_secs")]
	pub cleanup_interval_secs: u64,
	/// How long a removed order is kept before physical deletion
	#[serde(default = "default_removed_grace_period_secs")]
	pub removed_grace_period_secs: u64,
	/// Idle time after which cleanup re-validates an order
	#[serde(default = "default_revalidate_after_secs")]
	pub revalidate_after_secs: u64,
	#[serde(default = "default_mini_header_retention")]
	pub mini_header_retention: usize,
	#[serde(default = "default_validation_concurrency")]
	pub validation_concurrency: usize,
	/// Carried for the gossip layer
	#[serde(default)]
	pub bootstrap_peers: Vec<String>,
}

impl WatcherConfig {
	pub fn slow_subscriber_timeout(&self) -> Duration {
		Duration::from_millis(self.slow_subscriber_timeout_ms)
	}

	pub fn cleanup_interval(&self) -> Duration {
		Duration::from_secs(self.cleanup_interval_secs)
	}

	pub fn removed_grace_period(&self) -> Duration {
		Duration::from_secs(self.removed_grace_period_secs)
	}

	pub fn revalidate_after(&self) -> Duration {
		Duration::from_secs(self.revalidate_after_secs)
	}
}

impl Default for WatcherConfig {
	fn default() -> Self {
		Self {
			max_orders: default_max_orders(),
			max_expiration_secs: None,
			max_order_size_bytes: default_max_order_size_bytes(),
			slow_subscriber_timeout_ms: default_slow_subscriber_timeout_ms(),
			subscriber_buffer: default_subscriber_buffer(),
			cleanup_interval_secs: default_cleanup_interval_secs(),
			removed_grace_period_secs: default_removed_grace_period_secs(),
			revalidate_after_secs: default_revalidate_after_secs(),
			mini_header_retention: default_mini_header_retention(),
			validation_concurrency: default_validation_concurrency(),
			bootstrap_peers: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
	#[default]
	Memory,
	File,
}

/// Persistence settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
	#[serde(default)]
	pub backend: StorageBackend,
	/// Snapshot file for the file backend
	pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
	#[default]
	Text,
	Json,
}

/// Logging settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
	#[serde(default = "default_log_level")]
	pub level: String,
	#[serde(default)]
	pub format: LogFormat,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		Self {
			level: default_log_level(),
			format: LogFormat::default(),
		}
	}
}

fn default_request_timeout_secs() -> u64 {
	60
}

fn default_max_request_content_length() -> usize {
	524_288
}

fn default_max_requests_per_24h() -> u64 {
	200_000
}

fn default_max_requests_per_second() -> u32 {
	30
}

fn default_block_polling_interval_ms() -> u64 {
	5_000
}

fn default_validator_from() -> Address {
	address!("0x0000000000000000000000000000000000000001")
}

fn default_max_orders() -> usize {
	100_000
}

fn default_max_order_size_bytes() -> usize {
	16_000
}

fn default_slow_subscriber_timeout_ms() -> u64 {
	2_000
}

fn default_subscriber_buffer() -> usize {
	100
}

fn default_cleanup_interval_secs() -> u64 {
	3_600
}

fn default_removed_grace_period_secs() -> u64 {
	600
}

fn default_revalidate_after_secs() -> u64 {
	3_600
}

fn default_mini_header_retention() -> usize {
	20
}

fn default_validation_concurrency() -> usize {
	5
}

fn default_log_level() -> String {
	"info".to_string()
}
