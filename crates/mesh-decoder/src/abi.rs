//! Token contract events.
//!
//! ERC20 and ERC721 `Transfer`/`Approval` share a signature and differ only
//! in which arguments are indexed, so the registry an address sits in decides
//! which ABI a log is decoded with.

alloy::sol! {
	interface IERC20 {
		event Transfer(address indexed from, address indexed to, uint256 value);
		event Approval(address indexed owner, address indexed spender, uint256 value);
	}

	interface IERC721 {
		event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);
		event Approval(address indexed owner, address indexed approved, uint256 indexed tokenId);
		event ApprovalForAll(address indexed owner, address indexed operator, bool approved);
	}

	interface IWETH9 {
		event Deposit(address indexed dst, uint256 wad);
		event Withdrawal(address indexed src, uint256 wad);
	}
}
