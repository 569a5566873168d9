use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::{MainStorage, StorageError, TransactionStorage};
use crate::models::{
	FullTokenAccount, FullTokenTransfer, FullTransaction, MintAccount, SyncedBlockTime,
	TokenAccount, TokenTransfer, Transaction, TransactionQuery,
};

/// Everything the store holds; also the on-disk snapshot format of [`super::FileStorage`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoreSnapshot {
	balance: Option<u64>,
	last_block_height: Option<u64>,
	synced_block_times: BTreeMap<String, SyncedBlockTime>,
	transactions: BTreeMap<String, Transaction>,
	token_transfers: BTreeMap<String, Vec<TokenTransfer>>,
	mint_accounts: BTreeMap<String, MintAccount>,
	token_accounts: BTreeMap<String, TokenAccount>,
}

impl StoreSnapshot {
	fn full_transaction(&self, transaction: &Transaction) -> FullTransaction {
		let token_transfers = self
			.token_transfers
			.get(&transaction.hash)
			.into_iter()
			.flatten()
			.filter_map(|transfer| {
				let mint_account = self.mint_accounts.get(&transfer.mint_address)?;
				Some(FullTokenTransfer {
					token_transfer: transfer.clone(),
					mint_account: mint_account.clone(),
				})
			})
			.collect();

		FullTransaction::new(transaction.clone(), token_transfers)
	}

	fn full_token_account(&self, account: &TokenAccount) -> Option<FullTokenAccount> {
		let mint_account = self.mint_accounts.get(&account.mint_address)?;
		Some(FullTokenAccount {
			token_account: account.clone(),
			mint_account: mint_account.clone(),
		})
	}
}

/// Newest first: block time descending, then hash descending.
fn history_order(a: &Transaction, b: &Transaction) -> Ordering {
	b.block_time
		.cmp(&a.block_time)
		.then_with(|| b.hash.cmp(&a.hash))
}

/// In-memory store for one tracked address.
pub struct MemoryStorage {
	address: String,
	state: Mutex<StoreSnapshot>,
}

impl MemoryStorage {
	pub fn new(address: impl Into<String>) -> Self {
		Self::from_snapshot(address, StoreSnapshot::default())
	}

	pub(crate) fn from_snapshot(address: impl Into<String>, snapshot: StoreSnapshot) -> Self {
		Self {
			address: address.into(),
			state: Mutex::new(snapshot),
		}
	}

	pub(crate) fn snapshot(&self) -> Result<StoreSnapshot, StorageError> {
		Ok(self.lock()?.clone())
	}

	fn lock(&self) -> Result<MutexGuard<'_, StoreSnapshot>, StorageError> {
		self.state.lock().map_err(|_| StorageError::Poisoned)
	}
}

impl MainStorage for MemoryStorage {
	fn balance(&self) -> Result<Option<u64>, StorageError> {
		Ok(self.lock()?.balance)
	}

	fn save_balance(&self, balance: u64) -> Result<(), StorageError> {
		self.lock()?.balance = Some(balance);
		Ok(())
	}

	fn last_block_height(&self) -> Result<Option<u64>, StorageError> {
		Ok(self.lock()?.last_block_height)
	}

	fn save_last_block_height(&self, height: u64) -> Result<(), StorageError> {
		self.lock()?.last_block_height = Some(height);
		Ok(())
	}
}

impl TransactionStorage for MemoryStorage {
	fn synced_block_time(&self, source: &str) -> Result<Option<SyncedBlockTime>, StorageError> {
		Ok(self.lock()?.synced_block_times.get(source).cloned())
	}

	fn save_synced_block_time(&self, synced: SyncedBlockTime) -> Result<(), StorageError> {
		self.lock()?
			.synced_block_times
			.insert(synced.source.clone(), synced);
		Ok(())
	}

	fn last_non_pending_transaction(&self) -> Result<Option<Transaction>, StorageError> {
		let state = self.lock()?;
		Ok(state
			.transactions
			.values()
			.filter(|tx| !tx.pending && !tx.is_expired())
			.min_by(|a, b| history_order(a, b))
			.cloned())
	}

	fn pending_transactions(&self) -> Result<Vec<Transaction>, StorageError> {
		let state = self.lock()?;
		Ok(state
			.transactions
			.values()
			.filter(|tx| tx.pending)
			.cloned()
			.collect())
	}

	fn full_transactions(&self, hashes: &[String]) -> Result<Vec<FullTransaction>, StorageError> {
		let state = self.lock()?;
		Ok(hashes
			.iter()
			.filter_map(|hash| state.transactions.get(hash))
			.map(|tx| state.full_transaction(tx))
			.collect())
	}

	fn save_transactions(&self, transactions: &[FullTransaction]) -> Result<(), StorageError> {
		let mut state = self.lock()?;
		for full in transactions {
			let hash = full.transaction.hash.clone();
			for transfer in &full.token_transfers {
				state
					.mint_accounts
					.entry(transfer.mint_account.address.clone())
					.or_insert_with(|| transfer.mint_account.clone());
			}
			state.token_transfers.insert(
				hash.clone(),
				full.token_transfers
					.iter()
					.map(|transfer| transfer.token_transfer.clone())
					.collect(),
			);
			state.transactions.insert(hash, full.transaction.clone());
		}
		Ok(())
	}

	fn update_transactions(&self, transactions: &[Transaction]) -> Result<(), StorageError> {
		let mut state = self.lock()?;
		for tx in transactions {
			if let Some(stored) = state.transactions.get_mut(&tx.hash) {
				*stored = tx.clone();
			}
		}
		Ok(())
	}

	fn transactions(&self, query: &TransactionQuery) -> Result<Vec<FullTransaction>, StorageError> {
		let state = self.lock()?;
		let cursor = query
			.from_hash
			.as_ref()
			.and_then(|hash| state.transactions.get(hash))
			.cloned();

		let mut headers: Vec<&Transaction> = state
			.transactions
			.values()
			.filter(|tx| {
				cursor
					.as_ref()
					.is_none_or(|from| history_order(from, tx) == Ordering::Less)
			})
			.collect();
		headers.sort_by(|a, b| history_order(a, b));

		let matching = headers
			.into_iter()
			.map(|tx| state.full_transaction(tx))
			.filter(|full| query.filter.matches(full, &self.address, query.incoming));

		Ok(match query.limit {
			Some(limit) => matching.take(limit).collect(),
			None => matching.collect(),
		})
	}

	fn mint_account(&self, address: &str) -> Result<Option<MintAccount>, StorageError> {
		Ok(self.lock()?.mint_accounts.get(address).cloned())
	}

	fn save_mint_accounts(&self, accounts: &[MintAccount]) -> Result<(), StorageError> {
		let mut state = self.lock()?;
		for account in accounts {
			state
				.mint_accounts
				.insert(account.address.clone(), account.clone());
		}
		Ok(())
	}

	fn token_accounts(&self) -> Result<Vec<TokenAccount>, StorageError> {
		Ok(self.lock()?.token_accounts.values().cloned().collect())
	}

	fn token_accounts_by_mints(&self, mints: &[String]) -> Result<Vec<TokenAccount>, StorageError> {
		let state = self.lock()?;
		Ok(state
			.token_accounts
			.values()
			.filter(|account| mints.contains(&account.mint_address))
			.cloned()
			.collect())
	}

	fn save_token_accounts(&self, accounts: &[TokenAccount]) -> Result<(), StorageError> {
		let mut state = self.lock()?;
		for account in accounts {
			state
				.token_accounts
				.insert(account.address.clone(), account.clone());
		}
		Ok(())
	}

	fn full_token_account(
		&self,
		mint_address: &str,
	) -> Result<Option<FullTokenAccount>, StorageError> {
		let state = self.lock()?;
		Ok(state
			.token_accounts
			.values()
			.find(|account| account.mint_address == mint_address)
			.and_then(|account| state.full_token_account(account)))
	}

	fn full_token_accounts(&self) -> Result<Vec<FullTokenAccount>, StorageError> {
		let state = self.lock()?;
		Ok(state
			.token_accounts
			.values()
			.filter_map(|account| state.full_token_account(account))
			.collect())
	}
}
