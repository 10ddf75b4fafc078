//! Configuration loading for the mesh node.
//!
//! Configuration is read from a TOML, JSON or YAML file (chosen by
//! extension), `${VAR}` references are substituted from the environment,
//! `MESH_*` variables override individual settings, and the result is
//! validated before use.

use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

pub mod types;

pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

/// File format of a configuration source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
	Toml,
	Json,
	Yaml,
}

impl ConfigFormat {
	fn from_path(path: &Path) -> Result<Self, ConfigError> {
		match path.extension().and_then(|s| s.to_str()) {
			Some("toml") => Ok(ConfigFormat::Toml),
			Some("json") => Ok(ConfigFormat::Json),
			Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
			_ => Err(ConfigError::ParseError(format!(
				"Unsupported config format: {:?}",
				path
			))),
		}
	}
}

/// Configuration loader with environment variable substitution
pub struct ConfigLoader {
	file_path: Option<String>,
	env_prefix: String,
}

impl Default for ConfigLoader {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "MESH_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<MeshConfig, ConfigError> {
		let Some(file_path) = &self.file_path else {
			return Err(ConfigError::FileNotFound(
				"No configuration file specified".to_string(),
			));
		};
		let path = Path::new(file_path);
		if !path.exists() {
			return Err(ConfigError::FileNotFound(file_path.clone()));
		}

		let content = tokio::fs::read_to_string(path).await?;
		self.load_from_str(&content, ConfigFormat::from_path(path)?)
	}

	/// Parses, overrides and validates configuration from an in-memory source.
	pub fn load_from_str(
		&self,
		content: &str,
		format: ConfigFormat,
	) -> Result<MeshConfig, ConfigError> {
		let substituted = self.substitute_env_vars(content)?;
		let mut config = parse(&substituted, format)?;

		self.apply_env_overrides(&mut config)?;
		validate_config(&config)?;

		Ok(config)
	}

	fn substitute_env_vars(&self, content: &str) -> Result<String, ConfigError> {
		let mut result = content.to_string();

		// Find and replace ${VAR_NAME} patterns
		let re = regex::Regex::new(r"\$\{([^}]+)\}")
			.map_err(|e| ConfigError::ParseError(e.to_string()))?;

		for cap in re.captures_iter(content) {
			let full_match = &cap[0];
			let var_name = &cap[1];

			let env_value = env::var(var_name)
				.map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;

			result = result.replace(full_match, &env_value);
		}

		Ok(result)
	}

	fn var(&self, name: &str) -> Option<String> {
		env::var(format!("{}{}", self.env_prefix, name)).ok()
	}

	fn parsed_var<T>(&self, name: &str) -> Result<Option<T>, ConfigError>
	where
		T: std::str::FromStr,
		T::Err: std::fmt::Display,
	{
		match self.var(name) {
			Some(raw) => raw.trim().parse().map(Some).map_err(|e| {
				ConfigError::ValidationError(format!("Invalid {}{}: {}", self.env_prefix, name, e))
			}),
			None => Ok(None),
		}
	}

	fn apply_env_overrides(&self, config: &mut MeshConfig) -> Result<(), ConfigError> {
		if let Some(chain_id) = self.parsed_var("CHAIN_ID")? {
			debug!("Overriding chain id from environment");
			config.ethereum.chain_id = chain_id;
		}

		if let Some(url) = self.var("ETH_RPC_URL") {
			debug!("Overriding RPC URL from environment");
			config.ethereum.rpc_url = url;
		}

		if let Some(max_orders) = self.parsed_var("MAX_ORDERS")? {
			config.watcher.max_orders = max_orders;
		}

		if let Some(max_expiration) = self.parsed_var("MAX_EXPIRATION_SECS")? {
			config.watcher.max_expiration_secs = Some(max_expiration);
		}

		if let Some(limit) = self.parsed_var("MAX_REQUESTS_PER_24H")? {
			config.ethereum.max_requests_per_24h = limit;
		}

		if let Some(limit) = self.parsed_var("MAX_REQUESTS_PER_SECOND")? {
			config.ethereum.max_requests_per_second = limit;
		}

		if let Some(length) = self.parsed_var("MAX_REQUEST_CONTENT_LENGTH")? {
			config.ethereum.max_request_content_length = length;
		}

		if let Some(interval) = self.parsed_var("BLOCK_POLLING_INTERVAL_MS")? {
			config.ethereum.block_polling_interval_ms = interval;
		}

		if let Some(peers) = self.var("BOOTSTRAP_PEERS") {
			config.watcher.bootstrap_peers = peers
				.split(',')
				.map(str::trim)
				.filter(|p| !p.is_empty())
				.map(str::to_string)
				.collect();
		}

		if let Some(level) = self.var("LOG_LEVEL") {
			config.logging.level = level;
		}

		Ok(())
	}
}

fn parse(content: &str, format: ConfigFormat) -> Result<MeshConfig, ConfigError> {
	match format {
		ConfigFormat::Toml => {
			toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
		}
		ConfigFormat::Json => {
			serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
		}
		ConfigFormat::Yaml => {
			serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
		}
	}
}

/// Checks cross-field constraints that serde cannot express.
pub fn validate_config(config: &MeshConfig) -> Result<(), ConfigError> {
	if config.ethereum.rpc_url.is_empty() {
		return Err(ConfigError::ValidationError(
			"ethereum.rpc_url must be set".to_string(),
		));
	}

	if config.ethereum.max_requests_per_second == 0 {
		return Err(ConfigError::ValidationError(
			"ethereum.max_requests_per_second must be greater than 0".to_string(),
		));
	}

	if config.ethereum.max_request_content_length == 0 {
		return Err(ConfigError::ValidationError(
			"ethereum.max_request_content_length must be greater than 0".to_string(),
		));
	}

	if config.watcher.max_orders == 0 {
		return Err(ConfigError::ValidationError(
			"watcher.max_orders must be greater than 0".to_string(),
		));
	}

	if config.watcher.validation_concurrency == 0 {
		return Err(ConfigError::ValidationError(
			"watcher.validation_concurrency must be greater than 0".to_string(),
		));
	}

	if config.watcher.subscriber_buffer == 0 {
		return Err(ConfigError::ValidationError(
			"watcher.subscriber_buffer must be greater than 0".to_string(),
		));
	}

	if config.storage.backend == StorageBackend::File && config.storage.path.is_none() {
		return Err(ConfigError::ValidationError(
			"storage.path is required for the file backend".to_string(),
		));
	}

	Ok(())
}
