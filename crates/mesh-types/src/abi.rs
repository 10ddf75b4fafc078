//! Contract ABIs shared by the order model and the validator.
//!
//! The v3 and v4 exchanges define structs with clashing names (`OrderInfo`),
//! so each version lives in its own module.

/// 0x v3 exchange, DevUtils and asset proxy ABIs.
pub mod v3 {
	alloy::sol! {
		/// EIP-712 `Order` struct as hashed by the v3 exchange.
		#[derive(Debug, PartialEq, Eq)]
		struct Order {
			address makerAddress;
			address takerAddress;
			address feeRecipientAddress;
			address senderAddress;
			uint256 makerAssetAmount;
			uint256 takerAssetAmount;
			uint256 makerFee;
			uint256 takerFee;
			uint256 expirationTimeSeconds;
			uint256 salt;
			bytes makerAssetData;
			bytes takerAssetData;
			bytes makerFeeAssetData;
			bytes takerFeeAssetData;
		}

		#[derive(Debug, PartialEq, Eq)]
		struct OrderInfo {
			uint8 orderStatus;
			bytes32 orderHash;
			uint256 orderTakerAssetFilledAmount;
		}

		interface IDevUtils {
			function getOrderRelevantStates(Order[] memory orders, bytes[] memory signatures)
				external
				returns (
					OrderInfo[] memory ordersInfo,
					uint256[] memory fillableTakerAssetAmounts,
					bool[] memory isValidSignature
				);
		}

		interface IExchange {
			event Fill(
				address indexed makerAddress,
				address indexed feeRecipientAddress,
				bytes makerAssetData,
				bytes takerAssetData,
				bytes makerFeeAssetData,
				bytes takerFeeAssetData,
				bytes32 indexed orderHash,
				address takerAddress,
				address senderAddress,
				uint256 makerAssetFilledAmount,
				uint256 takerAssetFilledAmount,
				uint256 makerFeePaid,
				uint256 takerFeePaid,
				uint256 protocolFeePaid
			);

			event Cancel(
				address indexed makerAddress,
				address indexed feeRecipientAddress,
				bytes makerAssetData,
				bytes takerAssetData,
				address senderAddress,
				bytes32 indexed orderHash
			);

			event CancelUpTo(
				address indexed makerAddress,
				address indexed orderSenderAddress,
				uint256 orderEpoch
			);
		}

		interface IAssetData {
			function ERC20Token(address tokenAddress) external;
			function ERC721Token(address tokenAddress, uint256 tokenId) external;
			function ERC1155Assets(
				address tokenAddress,
				uint256[] calldata tokenIds,
				uint256[] calldata tokenValues,
				bytes calldata callbackData
			) external;
			function MultiAsset(uint256[] calldata values, bytes[] calldata nestedAssetData) external;
			function StaticCall(
				address staticCallTargetAddress,
				bytes calldata staticCallData,
				bytes32 expectedReturnDataHash
			) external;
			function ERC20Bridge(address tokenAddress, address bridgeAddress, bytes calldata bridgeData) external;
		}
	}

	/// Order status codes returned by `getOrderRelevantStates`.
	pub mod status {
		pub const INVALID: u8 = 0;
		pub const INVALID_MAKER_ASSET_AMOUNT: u8 = 1;
		pub const INVALID_TAKER_ASSET_AMOUNT: u8 = 2;
		pub const FILLABLE: u8 = 3;
		pub const EXPIRED: u8 = 4;
		pub const FULLY_FILLED: u8 = 5;
		pub const CANCELLED: u8 = 6;
	}
}

/// 0x v4 exchange proxy (native orders feature) ABIs.
pub mod v4 {
	alloy::sol! {
		/// EIP-712 `LimitOrder` struct as hashed by the v4 exchange proxy.
		#[derive(Debug, PartialEq, Eq)]
		struct LimitOrder {
			address makerToken;
			address takerToken;
			uint128 makerAmount;
			uint128 takerAmount;
			uint128 takerTokenFeeAmount;
			address maker;
			address taker;
			address sender;
			address feeRecipient;
			bytes32 pool;
			uint64 expiry;
			uint256 salt;
		}

		#[derive(Debug, PartialEq, Eq)]
		struct Signature {
			uint8 signatureType;
			uint8 v;
			bytes32 r;
			bytes32 s;
		}

		#[derive(Debug, PartialEq, Eq)]
		struct OrderInfo {
			bytes32 orderHash;
			uint8 status;
			uint128 takerTokenFilledAmount;
		}

		interface INativeOrdersFeature {
			function batchGetLimitOrderRelevantStates(
				LimitOrder[] calldata orders,
				Signature[] calldata signatures
			)
				external
				view
				returns (
					OrderInfo[] memory orderInfos,
					uint128[] memory actualFillableTakerTokenAmounts,
					bool[] memory isSignatureValids
				);

			event LimitOrderFilled(
				bytes32 orderHash,
				address maker,
				address taker,
				address feeRecipient,
				address makerToken,
				address takerToken,
				uint128 takerTokenFilledAmount,
				uint128 makerTokenFilledAmount,
				uint128 takerTokenFeeFilledAmount,
				uint256 protocolFeePaid,
				bytes32 pool
			);

			event OrderCancelled(bytes32 orderHash, address maker);

			event PairCancelledLimitOrders(
				address maker,
				address makerToken,
				address takerToken,
				uint256 minValidSalt
			);
		}
	}

	/// Order status codes returned by `batchGetLimitOrderRelevantStates`.
	pub mod status {
		pub const INVALID: u8 = 0;
		pub const FILLABLE: u8 = 1;
		pub const FILLED: u8 = 2;
		pub const CANCELLED: u8 = 3;
		pub const EXPIRED: u8 = 4;
	}

	/// Signature schemes accepted by the v4 exchange proxy.
	pub mod signature_type {
		pub const EIP712: u8 = 2;
		pub const ETH_SIGN: u8 = 3;
		pub const PRESIGNED: u8 = 4;
	}
}
