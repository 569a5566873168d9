use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::memory::{MemoryStorage, StoreSnapshot};
use super::{MainStorage, StorageError, TransactionStorage};
use crate::models::{
	FullTokenAccount, FullTransaction, MintAccount, SyncedBlockTime, TokenAccount, Transaction,
	TransactionQuery,
};

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
	address: String,
	saved_at: String,
	state: StoreSnapshot,
}

/// File-backed store: an in-memory store mirrored to one pretty-printed JSON file.
///
/// The whole snapshot is rewritten after every write and loaded again on [`FileStorage::open`].
pub struct FileStorage {
	inner: MemoryStorage,
	address: String,
	path: PathBuf,
	write_lock: Mutex<()>,
}

impl FileStorage {
	pub fn open(data_dir: &Path, address: &str) -> Result<Self, StorageError> {
		std::fs::create_dir_all(data_dir)?;
		let path = data_dir.join(format!("solana_kit_{}.json", address));

		let state = if path.exists() {
			let content = std::fs::read_to_string(&path)?;
			let file: SnapshotFile = serde_json::from_str(&content)?;
			info!("Loaded wallet snapshot saved at {} from {:?}", file.saved_at, path);
			file.state
		} else {
			StoreSnapshot::default()
		};

		Ok(Self {
			inner: MemoryStorage::from_snapshot(address, state),
			address: address.to_string(),
			path,
			write_lock: Mutex::new(()),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn persist(&self) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().map_err(|_| StorageError::Poisoned)?;
		let file = SnapshotFile {
			address: self.address.clone(),
			saved_at: chrono::Utc::now().to_rfc3339(),
			state: self.inner.snapshot()?,
		};

		let tmp = self.path.with_extension("json.tmp");
		std::fs::write(&tmp, serde_json::to_string_pretty(&file)?)?;
		std::fs::rename(&tmp, &self.path)?;
		debug!("Saved wallet snapshot to {:?}", self.path);
		Ok(())
	}
}

impl MainStorage for FileStorage {
	fn balance(&self) -> Result<Option<u64>, StorageError> {
		self.inner.balance()
	}

	fn save_balance(&self, balance: u64) -> Result<(), StorageError> {
		self.inner.save_balance(balance)?;
		self.persist()
	}

	fn last_block_height(&self) -> Result<Option<u64>, StorageError> {
		self.inner.last_block_height()
	}

	fn save_last_block_height(&self, height: u64) -> Result<(), StorageError> {
		self.inner.save_last_block_height(height)?;
		self.persist()
	}
}

impl TransactionStorage for FileStorage {
	fn synced_block_time(&self, source: &str) -> Result<Option<SyncedBlockTime>, StorageError> {
		self.inner.synced_block_time(source)
	}

	fn save_synced_block_time(&self, synced: SyncedBlockTime) -> Result<(), StorageError> {
		self.inner.save_synced_block_time(synced)?;
		self.persist()
	}

	fn last_non_pending_transaction(&self) -> Result<Option<Transaction>, StorageError> {
		self.inner.last_non_pending_transaction()
	}

	fn pending_transactions(&self) -> Result<Vec<Transaction>, StorageError> {
		self.inner.pending_transactions()
	}

	fn full_transactions(&self, hashes: &[String]) -> Result<Vec<FullTransaction>, StorageError> {
		self.inner.full_transactions(hashes)
	}

	fn save_transactions(&self, transactions: &[FullTransaction]) -> Result<(), StorageError> {
		self.inner.save_transactions(transactions)?;
		self.persist()
	}

	fn update_transactions(&self, transactions: &[Transaction]) -> Result<(), StorageError> {
		self.inner.update_transactions(transactions)?;
		self.persist()
	}

	fn transactions(&self, query: &TransactionQuery) -> Result<Vec<FullTransaction>, StorageError> {
		self.inner.transactions(query)
	}

	fn mint_account(&self, address: &str) -> Result<Option<MintAccount>, StorageError> {
		self.inner.mint_account(address)
	}

	fn save_mint_accounts(&self, accounts: &[MintAccount]) -> Result<(), StorageError> {
		self.inner.save_mint_accounts(accounts)?;
		self.persist()
	}

	fn token_accounts(&self) -> Result<Vec<TokenAccount>, StorageError> {
		self.inner.token_accounts()
	}

	fn token_accounts_by_mints(&self, mints: &[String]) -> Result<Vec<TokenAccount>, StorageError> {
		self.inner.token_accounts_by_mints(mints)
	}

	fn save_token_accounts(&self, accounts: &[TokenAccount]) -> Result<(), StorageError> {
		self.inner.save_token_accounts(accounts)?;
		self.persist()
	}

	fn full_token_account(
		&self,
		mint_address: &str,
	) -> Result<Option<FullTokenAccount>, StorageError> {
		self.inner.full_token_account(mint_address)
	}

	fn full_token_accounts(&self) -> Result<Vec<FullTokenAccount>, StorageError> {
		self.inner.full_token_accounts()
	}
}
