//! Shared types for the order watcher: order formats, stored metadata,
//! block views, rejection reasons and the order event model.

pub mod abi;
pub mod asset_data;
pub mod clock;
pub mod events;
pub mod header;
pub mod metadata;
pub mod order;
pub mod status;

pub use asset_data::{AssetData, AssetDataError, ContractKind, TokenRef};
pub use clock::{Clock, ManualClock, SystemClock};
pub use events::*;
pub use header::*;
pub use metadata::*;
pub use order::*;
pub use status::*;

use alloy::primitives::B256;

/// Shortened hash for log lines.
pub fn short_hash(hash: &B256) -> String {
	let hash_str = hash.to_string();
	format!("{}..", &hash_str[..10])
}
