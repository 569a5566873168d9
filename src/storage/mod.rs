//! Local store contracts and their implementations.
//!
//! Each syncer owns the writes to its own records: the balance syncer writes the balance, the
//! poller writes the block height, the token account syncer writes token accounts, and the
//! transaction side writes transactions, transfers, mint accounts and watermarks. Store access is
//! synchronous; implementations are expected to be fast and local.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::models::{
	FullTokenAccount, FullTransaction, MintAccount, SyncedBlockTime, TokenAccount, Transaction,
	TransactionQuery,
};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Snapshot encoding error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("Store lock poisoned")]
	Poisoned,
}

/// Account-level values: native balance and chain height.
pub trait MainStorage: Send + Sync {
	fn balance(&self) -> Result<Option<u64>, StorageError>;
	fn save_balance(&self, balance: u64) -> Result<(), StorageError>;
	fn last_block_height(&self) -> Result<Option<u64>, StorageError>;
	fn save_last_block_height(&self, height: u64) -> Result<(), StorageError>;
}

/// Transaction history, token metadata and ingestion watermarks.
pub trait TransactionStorage: Send + Sync {
	fn synced_block_time(&self, source: &str) -> Result<Option<SyncedBlockTime>, StorageError>;
	fn save_synced_block_time(&self, synced: SyncedBlockTime) -> Result<(), StorageError>;

	/// Newest transaction that landed on chain (confirmed or failed), by block time.
	///
	/// Expired sends never landed and are skipped.
	fn last_non_pending_transaction(&self) -> Result<Option<Transaction>, StorageError>;
	fn pending_transactions(&self) -> Result<Vec<Transaction>, StorageError>;
	fn full_transactions(&self, hashes: &[String]) -> Result<Vec<FullTransaction>, StorageError>;
	/// Upserts headers and replaces the transfers stored for each hash.
	fn save_transactions(&self, transactions: &[FullTransaction]) -> Result<(), StorageError>;
	/// Updates headers only; transfers are left as they are. Unknown hashes are ignored.
	fn update_transactions(&self, transactions: &[Transaction]) -> Result<(), StorageError>;
	fn transactions(&self, query: &TransactionQuery) -> Result<Vec<FullTransaction>, StorageError>;

	fn mint_account(&self, address: &str) -> Result<Option<MintAccount>, StorageError>;
	fn save_mint_accounts(&self, accounts: &[MintAccount]) -> Result<(), StorageError>;

	fn token_accounts(&self) -> Result<Vec<TokenAccount>, StorageError>;
	fn token_accounts_by_mints(&self, mints: &[String]) -> Result<Vec<TokenAccount>, StorageError>;
	fn save_token_accounts(&self, accounts: &[TokenAccount]) -> Result<(), StorageError>;
	fn full_token_account(&self, mint_address: &str)
	-> Result<Option<FullTokenAccount>, StorageError>;
	fn full_token_accounts(&self) -> Result<Vec<FullTokenAccount>, StorageError>;
}
