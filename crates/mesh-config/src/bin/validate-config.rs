//! Configuration validation utility
//!
//! Usage: cargo run --bin validate-config config/mesh.toml

use std::env;
use std::process;

use mesh_config::ConfigLoader;

#[tokio::main]
async fn main() {
	let args: Vec<String> = env::args().collect();

	if args.len() != 2 {
		eprintln!("Usage: {} <config-file>", args[0]);
		process::exit(1);
	}

	let config_path = &args[1];

	println!("Validating configuration file: {}", config_path);

	match ConfigLoader::new().with_file(config_path).load().await {
		Ok(config) => {
			println!("Configuration is valid");
			println!("Chain id: {}", config.ethereum.chain_id);
			println!("RPC URL: {}", config.ethereum.rpc_url);
			println!("Max orders: {}", config.watcher.max_orders);
			println!(
				"RPC budget: {}/s, {}/24h",
				config.ethereum.max_requests_per_second, config.ethereum.max_requests_per_24h
			);
			println!("Storage backend: {:?}", config.storage.backend);
		}
		Err(e) => {
			eprintln!("Configuration validation failed:");
			eprintln!("{}", e);
			process::exit(1);
		}
	}
}
