//! Block views consumed from the block watcher.

use alloy::primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

/// A (number, hash) pair identifying the block a result was computed at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
	pub number: u64,
	pub hash: B256,
}

/// A raw log entry as returned by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthLog {
	pub address: Address,
	pub topics: Vec<B256>,
	pub data: Bytes,
	pub block_number: u64,
	pub block_hash: B256,
	pub tx_hash: B256,
	pub tx_index: u64,
	pub log_index: u64,
	pub removed: bool,
}

impl EthLog {
	/// Identity used to match a removed log with the log it reverts.
	pub fn position(&self) -> (B256, u64) {
		(self.tx_hash, self.log_index)
	}
}

/// Minimal block header plus the logs the node cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiniHeader {
	pub number: u64,
	pub hash: B256,
	pub parent: B256,
	/// Block timestamp in seconds.
	pub timestamp: u64,
	#[serde(default)]
	pub logs: Vec<EthLog>,
}

impl MiniHeader {
	pub fn block_ref(&self) -> BlockRef {
		BlockRef {
			number: self.number,
			hash: self.hash,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockEventKind {
	Added,
	Removed,
}

/// A block joining or leaving the canonical chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEvent {
	pub kind: BlockEventKind,
	pub header: MiniHeader,
}

impl BlockEvent {
	pub fn added(header: MiniHeader) -> Self {
		Self {
			kind: BlockEventKind::Added,
			header,
		}
	}

	pub fn removed(header: MiniHeader) -> Self {
		Self {
			kind: BlockEventKind::Removed,
			header,
		}
	}
}
