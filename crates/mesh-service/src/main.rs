use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mesh_config::{ConfigLoader, LogFormat, MeshConfig};
use mesh_core::OrderWatcher;
use mesh_ethrpc::{AlloyEthClient, EthRpcClient, RateLimitedClient};
use mesh_service::BlockWatcher;
use mesh_storage::create_storage;
use mesh_types::{short_hash, Clock, SystemClock};
use mesh_validator::{OrderValidator, ValidatorConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Block batches buffered between the block watcher and the order watcher.
const BLOCK_EVENT_BUFFER: usize = 16;

#[derive(Parser)]
#[command(name = "mesh-node")]
#[command(about = "0x Mesh order watcher node", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,

	#[arg(short, long, value_name = "FILE", default_value = "config/mesh.toml")]
	config: PathBuf,

	/// Overrides `logging.level` from the configuration file
	#[arg(long, env = "MESH_LOG_LEVEL")]
	log_level: Option<String>,

	/// Overrides `logging.format` from the configuration file
	#[arg(long, value_enum)]
	log_format: Option<CliLogFormat>,
}

#[derive(Subcommand)]
enum Commands {
	/// Start the order watcher
	Start,
	/// Validate the configuration file
	Validate,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliLogFormat {
	Text,
	Json,
}

impl From<CliLogFormat> for LogFormat {
	fn from(format: CliLogFormat) -> Self {
		match format {
			CliLogFormat::Text => LogFormat::Text,
			CliLogFormat::Json => LogFormat::Json,
		}
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();

	let config = ConfigLoader::new()
		.with_file(&cli.config)
		.load()
		.await
		.with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;

	let level = cli
		.log_level
		.clone()
		.unwrap_or_else(|| config.logging.level.clone());
	let format = cli
		.log_format
		.map(LogFormat::from)
		.unwrap_or(config.logging.format);
	setup_tracing(&level, format)?;

	match cli.command {
		Some(Commands::Start) | None => start_node(config).await,
		Some(Commands::Validate) => {
			print_config(&config);
			Ok(())
		}
	}
}

async fn start_node(config: MeshConfig) -> Result<()> {
	info!("Starting mesh node");
	print_config(&config);

	let retention = config.watcher.mini_header_retention;
	let store = create_storage(&config.storage, retention)
		.await
		.context("Failed to open order store")?;
	let clock: Arc<dyn Clock> = Arc::new(SystemClock);

	let transport = AlloyEthClient::new(&config.ethereum.rpc_url, config.ethereum.request_timeout())
		.context("Failed to create ETH-RPC client")?;
	let client = Arc::new(
		RateLimitedClient::new(
			transport,
			config.ethereum.max_requests_per_second,
			config.ethereum.max_requests_per_24h,
			config.ethereum.request_timeout(),
			store.clone(),
			clock.clone(),
		)
		.await
		.context("Failed to create rate limiter")?,
	);
	let rpc: Arc<dyn EthRpcClient> = client.clone();

	let validator = OrderValidator::new(rpc.clone(), ValidatorConfig::from_config(&config))
		.context("Failed to create order validator")?;
	let watcher = Arc::new(
		OrderWatcher::new(store, rpc.clone(), validator, config.watcher.clone(), clock)
			.await
			.context("Failed to create order watcher")?,
	);
	let block_watcher = BlockWatcher::new(
		rpc,
		watcher.clone(),
		config.ethereum.block_polling_interval(),
		retention,
	)
	.await
	.context("Failed to create block watcher")?;

	let (shutdown_tx, _) = broadcast::channel(1);
	let (block_tx, block_rx) = mpsc::channel(BLOCK_EVENT_BUFFER);

	let mut watcher_handle = tokio::spawn(
		watcher
			.clone()
			.run(block_rx, shutdown_tx.subscribe()),
	);
	let cleanup_handle = tokio::spawn(watcher.clone().run_cleanup(shutdown_tx.subscribe()));
	let block_handle = tokio::spawn(block_watcher.run(block_tx, shutdown_tx.subscribe()));
	let log_handle = tokio::spawn(log_order_events(watcher.clone()));

	info!("Mesh node started");

	let outcome = tokio::select! {
		_ = shutdown_signal() => {
			info!("Shutdown signal received, stopping services...");
			None
		}
		result = &mut watcher_handle => Some(result),
	};

	let _ = shutdown_tx.send(());
	let watcher_result = match outcome {
		Some(result) => result,
		None => watcher_handle.await,
	};
	if let Err(e) = cleanup_handle.await {
		warn!("Cleanup task ended abnormally: {}", e);
	}
	if let Err(e) = block_handle.await {
		warn!("Block watcher ended abnormally: {}", e);
	}
	// The feed is closed once the watcher stops, which ends the logger.
	if let Err(e) = log_handle.await {
		warn!("Event logger ended abnormally: {}", e);
	}

	if let Err(e) = client.flush().await {
		warn!("Failed to persist RPC request counter: {}", e);
	}

	watcher_result
		.context("Order watcher task panicked")?
		.context("Order watcher stopped")?;
	info!("Mesh node stopped");
	Ok(())
}

async fn log_order_events(watcher: Arc<OrderWatcher>) {
	let mut subscription = watcher.subscribe();
	while let Some(events) = subscription.recv().await {
		for event in events {
			info!(
				order_hash = %short_hash(&event.order_hash),
				end_state = ?event.end_state,
				fillable = %event.fillable_taker_amount,
				"Order event"
			);
		}
	}
	debug!("Event feed closed");
}

fn print_config(config: &MeshConfig) {
	info!("Chain id: {}", config.ethereum.chain_id);
	info!("RPC URL: {}", config.ethereum.rpc_url);
	info!(
		"RPC budget: {}/s, {}/24h",
		config.ethereum.max_requests_per_second, config.ethereum.max_requests_per_24h
	);
	info!("Max orders: {}", config.watcher.max_orders);
	info!("Storage backend: {:?}", config.storage.backend);
}

fn setup_tracing(log_level: &str, format: LogFormat) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))
		.context("Invalid log level")?;

	let registry = tracing_subscriber::registry().with(env_filter);
	match format {
		LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
	}

	Ok(())
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = signal::ctrl_c().await {
			error!("Failed to listen for Ctrl+C: {}", e);
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match signal::unix::signal(signal::unix::SignalKind::terminate()) {
			Ok(mut stream) => {
				stream.recv().await;
			}
			Err(e) => {
				error!("Failed to install SIGTERM handler: {}", e);
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}
}
