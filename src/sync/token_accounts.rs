use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use itertools::Itertools;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::SyncError;
use super::events::{EventBus, SyncEvent};
use super::state::{SyncDomain, SyncState, SyncStateCell};
use crate::models::{FullTokenAccount, MintAccount, TokenAccount};
use crate::rpc::layout::decode_token_account;
use crate::rpc::{AccountInfo, RpcClient, is_token_program};
use crate::storage::{StorageError, TransactionStorage};

/// Refreshes token account balances with one batched account lookup per sync.
///
/// A balance is only ever replaced by an amount read from chain. Accounts missing from the
/// response, or whose data does not decode as a token account, keep their previous balance.
/// Accounts handed in while a sync runs are queued and synced by that run before it finishes.
pub struct TokenAccountSyncer {
	rpc: Arc<dyn RpcClient>,
	storage: Arc<dyn TransactionStorage>,
	events: EventBus,
	state: SyncStateCell,
	accounts: watch::Sender<Vec<FullTokenAccount>>,
	queued: Mutex<Vec<TokenAccount>>,
}

impl TokenAccountSyncer {
	pub fn new(
		rpc: Arc<dyn RpcClient>,
		storage: Arc<dyn TransactionStorage>,
		events: EventBus,
	) -> Self {
		let cached = storage.full_token_accounts().unwrap_or_else(|e| {
			warn!("Failed to read cached token accounts: {}", e);
			Vec::new()
		});
		let (accounts, _) = watch::channel(cached);

		Self {
			rpc,
			storage,
			state: SyncStateCell::new(SyncDomain::TokenAccounts, events.clone()),
			events,
			accounts,
			queued: Mutex::new(Vec::new()),
		}
	}

	pub fn state(&self) -> SyncState {
		self.state.get()
	}

	pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
		self.state.subscribe()
	}

	/// Latest full token account set, refreshed after every successful sync.
	pub fn subscribe(&self) -> watch::Receiver<Vec<FullTokenAccount>> {
		self.accounts.subscribe()
	}

	pub fn full_token_account(&self, mint_address: &str) -> Result<Option<FullTokenAccount>, StorageError> {
		self.storage.full_token_account(mint_address)
	}

	pub fn full_token_accounts(&self) -> Result<Vec<FullTokenAccount>, StorageError> {
		self.storage.full_token_accounts()
	}

	/// Re-reads the balances of `accounts`, or of every stored account when `None`.
	///
	/// An explicit list passed while another sync runs is queued for that sync instead.
	pub async fn sync(&self, accounts: Option<Vec<TokenAccount>>) {
		if !self.begin_or_queue(accounts.as_deref()) {
			return;
		}

		let mut next = accounts;
		loop {
			let result = self.fetch_balances(next).await;
			if let Err(e) = &result {
				warn!("Token account sync failed: {}", e);
			}
			match self.finish_or_take_queued(result) {
				Some(queued) => {
					debug!("Syncing {} token accounts queued meanwhile", queued.len());
					next = Some(queued);
				}
				None => return,
			}
		}
	}

	fn lock_queued(&self) -> MutexGuard<'_, Vec<TokenAccount>> {
		self.queued
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	/// Begins a sync, or queues `accounts` for the one already running.
	fn begin_or_queue(&self, accounts: Option<&[TokenAccount]>) -> bool {
		let mut queued = self.lock_queued();
		if self.state.try_begin() {
			return true;
		}
		if let Some(accounts) = accounts {
			queued.extend(accounts.iter().cloned());
		}
		false
	}

	/// Settles the state with `result` unless accounts were queued during the fetch.
	fn finish_or_take_queued(&self, result: Result<(), SyncError>) -> Option<Vec<TokenAccount>> {
		let mut queued = self.lock_queued();
		if queued.is_empty() {
			self.state.set(match result {
				Ok(()) => SyncState::Synced,
				Err(e) => SyncState::not_synced(e),
			});
			return None;
		}

		let addresses: HashSet<String> = queued.drain(..).map(|account| account.address).collect();
		drop(queued);

		// Queued copies may predate the fetch that just finished.
		match self.storage.token_accounts() {
			Ok(stored) => Some(
				stored
					.into_iter()
					.filter(|account| addresses.contains(&account.address))
					.collect(),
			),
			Err(e) => {
				warn!("Failed to read queued token accounts: {}", e);
				self.state.set(SyncState::not_synced(e.into()));
				None
			}
		}
	}

	async fn fetch_balances(&self, accounts: Option<Vec<TokenAccount>>) -> Result<(), SyncError> {
		let accounts = match accounts {
			Some(accounts) => accounts,
			None => self.storage.token_accounts()?,
		};
		if accounts.is_empty() {
			return Ok(());
		}

		let addresses: Vec<String> = accounts.iter().map(|a| a.address.clone()).collect();
		let infos = self.rpc.get_multiple_accounts(&addresses).await?;

		let updated: Vec<TokenAccount> = accounts
			.into_iter()
			.zip(infos.into_iter().chain(std::iter::repeat(None)))
			.map(|(account, info)| refreshed(account, info.as_ref()))
			.collect();

		self.storage.save_token_accounts(&updated)?;
		let full = self.storage.full_token_accounts()?;
		debug!("Refreshed {} token accounts", updated.len());

		self.accounts.send_replace(full.clone());
		self.events
			.publish(SyncEvent::TokenAccountsUpdated { accounts: full });
		Ok(())
	}

	/// Tracks accounts discovered elsewhere and syncs them right away.
	///
	/// Known addresses are never overwritten, so a placeholder cannot reset a real balance.
	/// Stored accounts of `existing_mints` are re-synced together with the received ones, and
	/// accounts that were not known before are announced as [`SyncEvent::NewTokenAccounts`].
	pub async fn add_accounts(&self, received: Vec<TokenAccount>, existing_mints: Vec<String>) {
		let known: HashSet<String> = match self.storage.token_accounts() {
			Ok(accounts) => accounts.into_iter().map(|a| a.address).collect(),
			Err(e) => {
				warn!("Failed to read token accounts: {}", e);
				self.state.set(SyncState::not_synced(e.into()));
				return;
			}
		};

		let new_accounts: Vec<TokenAccount> = received
			.iter()
			.filter(|account| !known.contains(&account.address))
			.unique_by(|account| account.address.clone())
			.cloned()
			.collect();
		if let Err(e) = self.storage.save_token_accounts(&new_accounts) {
			warn!("Failed to save discovered token accounts: {}", e);
			self.state.set(SyncState::not_synced(e.into()));
			return;
		}

		let existing = self
			.storage
			.token_accounts_by_mints(&existing_mints)
			.unwrap_or_else(|e| {
				warn!("Failed to read token accounts by mint: {}", e);
				Vec::new()
			});
		let received_addresses: HashSet<&String> = received.iter().map(|a| &a.address).collect();
		let stored_received = self
			.storage
			.token_accounts()
			.unwrap_or_default()
			.into_iter()
			.filter(|account| received_addresses.contains(&account.address));

		let union: Vec<TokenAccount> = existing
			.into_iter()
			.chain(stored_received)
			.unique_by(|account| account.address.clone())
			.collect();
		self.sync(Some(union)).await;

		self.announce_new(&new_accounts);
	}

	/// Starts tracking a token account the user added by hand.
	pub fn add_token_account(
		&self,
		address: &str,
		mint_address: &str,
		decimals: u8,
	) -> Result<(), StorageError> {
		if self.storage.full_token_account(mint_address)?.is_some() {
			return Ok(());
		}

		if self.storage.mint_account(mint_address)?.is_none() {
			self.storage
				.save_mint_accounts(&[MintAccount::new(mint_address, 0, decimals)])?;
		}
		self.storage.save_token_accounts(&[TokenAccount {
			address: address.to_string(),
			mint_address: mint_address.to_string(),
			balance: 0,
			decimals,
		}])?;
		info!("Tracking token account {} for mint {}", address, mint_address);
		Ok(())
	}

	/// Moves to `NotSynced` with `error`, or `NotStarted` when none is given.
	pub fn stop(&self, error: Option<Arc<SyncError>>) {
		let error = error.unwrap_or_else(|| Arc::new(SyncError::NotStarted));
		self.state.set(SyncState::NotSynced(error));
	}

	fn announce_new(&self, accounts: &[TokenAccount]) {
		let full: Vec<FullTokenAccount> = accounts
			.iter()
			.filter_map(|account| match self.storage.full_token_account(&account.mint_address) {
				Ok(full) => full,
				Err(e) => {
					warn!("Failed to read token account {}: {}", account.address, e);
					None
				}
			})
			.collect();

		if !full.is_empty() {
			info!("Discovered {} new token accounts", full.len());
			self.events
				.publish(SyncEvent::NewTokenAccounts { accounts: full });
		}
	}
}

fn refreshed(account: TokenAccount, info: Option<&AccountInfo>) -> TokenAccount {
	let Some(info) = info else {
		return account;
	};
	if !is_token_program(&info.owner) {
		return account;
	}

	match decode_token_account(&info.data) {
		Ok(layout) => TokenAccount {
			balance: layout.amount,
			..account
		},
		Err(e) => {
			debug!("Keeping cached balance of {}: {}", account.address, e);
			account
		}
	}
}
