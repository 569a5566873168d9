//! Solana RPC integration.
//!
//! The sync engine talks to the chain only through the [`RpcClient`] trait. [`HttpRpcClient`] is the
//! JSON-RPC 2.0 implementation over HTTP; account layouts for SPL mints, token accounts and token
//! metadata are decoded in [`layout`]; NFT metadata discovery lives in [`nft`].

/// JSON-RPC client over HTTP
mod client;
/// Borsh layouts of the on-chain accounts the engine reads
pub mod layout;
/// Token metadata lookup
pub mod nft;

pub use client::HttpRpcClient;
pub use nft::{NftClient, RpcNftClient};

use async_trait::async_trait;

/// SPL Token program.
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
/// SPL Token-2022 program; mints and accounts share the classic base layout.
pub const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";
/// Metaplex token metadata program.
pub const METADATA_PROGRAM_ID: &str = "metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s";

pub fn is_token_program(owner: &str) -> bool {
	owner == TOKEN_PROGRAM_ID || owner == TOKEN_2022_PROGRAM_ID
}

/// An account as returned by `getMultipleAccounts`, with its data already base64-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
	pub lamports: u64,
	pub owner: String,
	pub data: Vec<u8>,
	pub executable: bool,
}

/// One entry of `getSignaturesForAddress`, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInfo {
	pub signature: String,
	pub block_time: Option<i64>,
	/// Rendered transaction error, when the transaction failed.
	pub err: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestBlockhash {
	pub blockhash: String,
	pub last_valid_block_height: u64,
}

/// Confirmation metadata of a landed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionStatus {
	pub err: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("RPC error {code}: {message}")]
	Rpc { code: i64, message: String },

	#[error("Account decode error: {0}")]
	Decode(String),

	#[error("No data returned")]
	NoData,
}

/// Asynchronous view of a Solana RPC node.
#[async_trait]
pub trait RpcClient: Send + Sync {
	async fn get_block_height(&self) -> Result<u64, RpcError>;

	/// Native balance in lamports.
	async fn get_balance(&self, address: &str) -> Result<u64, RpcError>;

	/// Batched account lookup. The result has one entry per address, in input order, and `None`
	/// for accounts that do not exist.
	async fn get_multiple_accounts(
		&self,
		addresses: &[String],
	) -> Result<Vec<Option<AccountInfo>>, RpcError>;

	/// Signatures for `address`, newest first, strictly older than `before` and newer than `until`.
	async fn get_signatures_for_address(
		&self,
		address: &str,
		before: Option<&str>,
		until: Option<&str>,
		limit: usize,
	) -> Result<Vec<SignatureInfo>, RpcError>;

	async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, RpcError>;

	/// Submits a signed, base64 encoded transaction and returns its signature.
	async fn send_transaction(&self, encoded: &str) -> Result<String, RpcError>;

	/// `None` while the transaction is unknown to the cluster or not yet confirmed.
	async fn get_transaction_status(
		&self,
		signature: &str,
	) -> Result<Option<TransactionStatus>, RpcError>;

	/// Accounts of `program` whose data contains the base58 `bytes` at `offset`.
	async fn get_program_accounts_by_memcmp(
		&self,
		program: &str,
		offset: usize,
		bytes: &str,
	) -> Result<Vec<(String, AccountInfo)>, RpcError>;
}
