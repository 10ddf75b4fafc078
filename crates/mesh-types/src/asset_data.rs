//! Asset data codec.
//!
//! v3 orders reference the assets they trade through ABI-encoded "asset data"
//! byte strings whose 4-byte prefix selects the proxy (token standard). This
//! module decodes them and extracts the token contracts they touch, which the
//! watcher uses to decide which contract logs can affect an order.

use crate::abi::v3::IAssetData;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol_types::SolCall;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Nesting depth accepted for MultiAsset payloads.
const MAX_MULTI_ASSET_DEPTH: usize = 1;

/// Errors produced while decoding asset data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssetDataError {
	#[error("asset data shorter than a proxy id")]
	TooShort,
	#[error("unsupported asset proxy id 0x{0}")]
	UnsupportedProxy(String),
	#[error("malformed asset data: {0}")]
	Malformed(String),
	#[error("nested MultiAsset payloads are not supported")]
	NestedMultiAsset,
}

/// Category of contract whose logs the decoder tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
	Fungible,
	NonFungible,
	Exchange,
}

/// A token contract (and optionally one token id) referenced by an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TokenRef {
	pub kind: ContractKind,
	pub address: Address,
	pub token_id: Option<U256>,
}

impl TokenRef {
	pub fn fungible(address: Address) -> Self {
		Self {
			kind: ContractKind::Fungible,
			address,
			token_id: None,
		}
	}

	pub fn non_fungible(address: Address, token_id: Option<U256>) -> Self {
		Self {
			kind: ContractKind::NonFungible,
			address,
			token_id,
		}
	}
}

/// Decoded v3 asset data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetData {
	Erc20 {
		token: Address,
	},
	Erc721 {
		token: Address,
		token_id: U256,
	},
	Erc1155 {
		token: Address,
		token_ids: Vec<U256>,
		token_values: Vec<U256>,
		callback_data: Bytes,
	},
	MultiAsset {
		amounts: Vec<U256>,
		nested: Vec<AssetData>,
	},
	StaticCall {
		target: Address,
		call_data: Bytes,
		expected_return_hash: B256,
	},
	Erc20Bridge {
		token: Address,
		bridge: Address,
		bridge_data: Bytes,
	},
}

impl AssetData {
	/// Decodes an asset data byte string.
	pub fn decode(data: &[u8]) -> Result<Self, AssetDataError> {
		Self::decode_at_depth(data, 0)
	}

	fn decode_at_depth(data: &[u8], depth: usize) -> Result<Self, AssetDataError> {
		if data.len() < 4 {
			return Err(AssetDataError::TooShort);
		}
		let selector: [u8; 4] = [data[0], data[1], data[2], data[3]];
		let malformed = |e: alloy::sol_types::Error| AssetDataError::Malformed(e.to_string());

		if selector == IAssetData::ERC20TokenCall::SELECTOR {
			let call = IAssetData::ERC20TokenCall::abi_decode(data).map_err(malformed)?;
			Ok(AssetData::Erc20 {
				token: call.tokenAddress,
			})
		} else if selector == IAssetData::ERC721TokenCall::SELECTOR {
			let call = IAssetData::ERC721TokenCall::abi_decode(data).map_err(malformed)?;
			Ok(AssetData::Erc721 {
				token: call.tokenAddress,
				token_id: call.tokenId,
			})
		} else if selector == IAssetData::ERC1155AssetsCall::SELECTOR {
			let call = IAssetData::ERC1155AssetsCall::abi_decode(data).map_err(malformed)?;
			if call.tokenIds.len() != call.tokenValues.len() {
				return Err(AssetDataError::Malformed(
					"ERC1155 id and value arrays differ in length".to_string(),
				));
			}
			Ok(AssetData::Erc1155 {
				token: call.tokenAddress,
				token_ids: call.tokenIds,
				token_values: call.tokenValues,
				callback_data: call.callbackData,
			})
		} else if selector == IAssetData::MultiAssetCall::SELECTOR {
			if depth >= MAX_MULTI_ASSET_DEPTH {
				return Err(AssetDataError::NestedMultiAsset);
			}
			let call = IAssetData::MultiAssetCall::abi_decode(data).map_err(malformed)?;
			if call.values.len() != call.nestedAssetData.len() {
				return Err(AssetDataError::Malformed(
					"MultiAsset amounts and nested data differ in length".to_string(),
				));
			}
			let nested = call
				.nestedAssetData
				.iter()
				.map(|inner| Self::decode_at_depth(inner, depth + 1))
				.collect::<Result<Vec<_>, _>>()?;
			Ok(AssetData::MultiAsset {
				amounts: call.values,
				nested,
			})
		} else if selector == IAssetData::StaticCallCall::SELECTOR {
			let call = IAssetData::StaticCallCall::abi_decode(data).map_err(malformed)?;
			Ok(AssetData::StaticCall {
				target: call.staticCallTargetAddress,
				call_data: call.staticCallData,
				expected_return_hash: call.expectedReturnDataHash,
			})
		} else if selector == IAssetData::ERC20BridgeCall::SELECTOR {
			let call = IAssetData::ERC20BridgeCall::abi_decode(data).map_err(malformed)?;
			Ok(AssetData::Erc20Bridge {
				token: call.tokenAddress,
				bridge: call.bridgeAddress,
				bridge_data: call.bridgeData,
			})
		} else {
			Err(AssetDataError::UnsupportedProxy(hex::encode(selector)))
		}
	}

	/// Token contracts whose state can change the fillability of an order
	/// that carries this asset data on its maker side.
	pub fn token_refs(&self) -> Vec<TokenRef> {
		let mut refs = Vec::new();
		self.collect_token_refs(&mut refs);
		refs
	}

	fn collect_token_refs(&self, refs: &mut Vec<TokenRef>) {
		match self {
			AssetData::Erc20 { token } => refs.push(TokenRef::fungible(*token)),
			AssetData::Erc721 { token, token_id } => {
				refs.push(TokenRef::non_fungible(*token, Some(*token_id)))
			}
			AssetData::Erc1155 { token, .. } => refs.push(TokenRef::non_fungible(*token, None)),
			AssetData::MultiAsset { nested, .. } => {
				for inner in nested {
					inner.collect_token_refs(refs);
				}
			}
			AssetData::Erc20Bridge { token, .. } => refs.push(TokenRef::fungible(*token)),
			AssetData::StaticCall { .. } => {}
		}
	}

	/// Visits this asset data and every nested payload.
	pub fn for_each(&self, f: &mut impl FnMut(&AssetData)) {
		f(self);
		if let AssetData::MultiAsset { nested, .. } = self {
			for inner in nested {
				inner.for_each(f);
			}
		}
	}

	/// Encodes ERC20 asset data for `token`.
	pub fn encode_erc20(token: Address) -> Bytes {
		IAssetData::ERC20TokenCall {
			tokenAddress: token,
		}
		.abi_encode()
		.into()
	}

	/// Encodes ERC721 asset data for `token` / `token_id`.
	pub fn encode_erc721(token: Address, token_id: U256) -> Bytes {
		IAssetData::ERC721TokenCall {
			tokenAddress: token,
			tokenId: token_id,
		}
		.abi_encode()
		.into()
	}
}
