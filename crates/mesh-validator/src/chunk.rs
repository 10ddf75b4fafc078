//! Size-bounded packing of orders into validation requests.

use crate::ValidatorConfig;
use alloy::sol_types::SolCall;
use mesh_types::abi::v3::IDevUtils;
use mesh_types::{Order, SignedOrder};

/// ABI words added per order by the two array offsets of a batch call.
const PER_ORDER_OFFSET_BYTES: usize = 2 * 32;

/// JSON size of an `eth_call` request carrying a batch call with no orders.
pub fn base_request_size(config: &ValidatorConfig) -> usize {
	let empty_call = IDevUtils::getOrderRelevantStatesCall {
		orders: Vec::new(),
		signatures: Vec::new(),
	}
	.abi_encode();
	let request = serde_json::json!({
		"jsonrpc": "2.0",
		"id": u64::MAX,
		"method": "eth_call",
		"params": [
			{
				"from": config.from,
				"to": config.dev_utils,
				"data": format!("0x{}", hex::encode(&empty_call)),
			},
			format!("0x{:x}", u64::MAX),
		],
	});
	request.to_string().len()
}

/// Request bytes added by an order whose ABI encoding is `abi_len` bytes.
/// Call data travels hex encoded, two characters per byte.
pub fn encoded_size_for(abi_len: usize) -> usize {
	2 * (abi_len + PER_ORDER_OFFSET_BYTES)
}

pub fn order_request_size(order: &Order) -> usize {
	encoded_size_for(order.encode_for_rpc().len())
}

/// Orders packed for dispatch.
#[derive(Debug, Default)]
pub struct Chunks {
	pub chunks: Vec<Vec<Order>>,
	/// Orders that do not fit a request even on their own.
	pub oversized: Vec<Order>,
}

/// Greedy packing: an order joins the current chunk while the request stays
/// strictly below `max_request_size`, otherwise it starts the next chunk.
pub fn chunk_orders(orders: Vec<Order>, base_size: usize, max_request_size: usize) -> Chunks {
	let mut result = Chunks::default();
	let mut current = Vec::new();
	let mut payload = base_size;

	for order in orders {
		let size = order_request_size(&order);
		if base_size + size >= max_request_size {
			result.oversized.push(order);
			continue;
		}
		if payload + size < max_request_size {
			current.push(order);
			payload += size;
		} else {
			result.chunks.push(std::mem::take(&mut current));
			current.push(order);
			payload = base_size + size;
		}
	}
	if !current.is_empty() {
		result.chunks.push(current);
	}
	result
}
