use serde::{Deserialize, Serialize};

/// On-chain description of a token type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintAccount {
	pub address: String,
	pub supply: u64,
	pub decimals: u8,
	pub is_nft: bool,
	pub name: Option<String>,
	pub symbol: Option<String>,
	pub uri: Option<String>,
	/// Only set when the metadata source marks the collection as verified.
	pub collection_address: Option<String>,
}

impl MintAccount {
	pub fn new(address: impl Into<String>, supply: u64, decimals: u8) -> Self {
		Self {
			address: address.into(),
			supply,
			decimals,
			is_nft: false,
			name: None,
			symbol: None,
			uri: None,
			collection_address: None,
		}
	}
}

/// A token account owned by the tracked address.
///
/// `balance` is always the last amount observed on chain, never derived from transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAccount {
	pub address: String,
	pub mint_address: String,
	pub balance: u64,
	pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullTokenAccount {
	pub token_account: TokenAccount,
	pub mint_account: MintAccount,
}
