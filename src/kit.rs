//! Public entry point: one [`SolanaKit`] tracks one address.
//!
//! The kit owns the sync components and their orchestrator, exposes cached values and live
//! receivers for balance, token accounts, block height and per-domain sync state, serves the
//! stored transaction history, and sends transfers through a caller-supplied signer.

use std::fmt;
use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::config::KitConfig;
use crate::indexer::{IndexerError, SolscanClient, TransferIndexer};
use crate::models::{FullTokenAccount, FullTransaction, TransactionFilter, TransactionQuery};
use crate::rpc::{HttpRpcClient, NftClient, RpcClient, RpcError, RpcNftClient};
use crate::signer::TransactionSigner;
use crate::storage::{FileStorage, MainStorage, MemoryStorage, StorageError, TransactionStorage};
use crate::sync::orchestrator::SyncComponents;
use crate::sync::{
	BalanceSyncer, BlockHeightPoller, ConnectivityMonitor, EventBus, PendingTransactionTracker,
	PollerState, SyncEvent, SyncOrchestrator, SyncState, TokenAccountSyncer, TransactionManager,
	TransactionSyncer,
};

#[derive(Debug, thiserror::Error)]
pub enum KitError {
	#[error("Kit not started")]
	NotStarted,

	#[error("No token account for mint {0}")]
	TokenAccountNotFound(String),

	#[error("Signing failed: {0}")]
	Signer(String),

	#[error("RPC error: {0}")]
	Rpc(#[from] RpcError),

	#[error("Indexer error: {0}")]
	Indexer(#[from] IndexerError),

	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

/// Snapshot of the kit's sync status.
#[derive(Debug, Clone)]
pub struct StatusInfo {
	pub address: String,
	pub last_block_height: Option<u64>,
	pub poller: PollerState,
	pub balance: SyncState,
	pub token_accounts: SyncState,
	pub transactions: SyncState,
}

impl fmt::Display for StatusInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "Address: {}", self.address)?;
		match self.last_block_height {
			Some(height) => writeln!(f, "Last block height: {}", height)?,
			None => writeln!(f, "Last block height: unknown")?,
		}
		match &self.poller {
			PollerState::Ready => writeln!(f, "Poller: Ready")?,
			PollerState::NotReady(error) => writeln!(f, "Poller: NotReady: {}", error)?,
		}
		writeln!(f, "Balance: {}", self.balance)?;
		writeln!(f, "Token accounts: {}", self.token_accounts)?;
		write!(f, "Transactions: {}", self.transactions)
	}
}

/// Client-side sync engine for one Solana address.
pub struct SolanaKit {
	address: String,
	events: EventBus,
	connectivity: Arc<ConnectivityMonitor>,
	components: SyncComponents,
	manager: Arc<TransactionManager>,
	orchestrator: SyncOrchestrator,
}

impl SolanaKit {
	/// Wires the kit from explicit collaborators.
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		address: impl Into<String>,
		config: &KitConfig,
		rpc: Arc<dyn RpcClient>,
		indexer: Arc<dyn TransferIndexer>,
		nft: Arc<dyn NftClient>,
		main_storage: Arc<dyn MainStorage>,
		transaction_storage: Arc<dyn TransactionStorage>,
		connectivity: Arc<ConnectivityMonitor>,
	) -> Self {
		let address = address.into();
		let events = EventBus::new(config.event_capacity);

		let manager = Arc::new(TransactionManager::new(
			address.clone(),
			rpc.clone(),
			transaction_storage.clone(),
			events.clone(),
		));
		let components = SyncComponents {
			poller: Arc::new(BlockHeightPoller::new(
				rpc.clone(),
				main_storage.clone(),
				connectivity.clone(),
				config.sync_interval(),
				events.clone(),
			)),
			balance: Arc::new(BalanceSyncer::new(
				address.clone(),
				rpc.clone(),
				main_storage,
				events.clone(),
			)),
			tokens: Arc::new(TokenAccountSyncer::new(
				rpc.clone(),
				transaction_storage.clone(),
				events.clone(),
			)),
			transactions: Arc::new(TransactionSyncer::new(
				address.clone(),
				rpc.clone(),
				indexer,
				nft,
				transaction_storage.clone(),
				manager.clone(),
				events.clone(),
				config,
			)),
			pending: Arc::new(PendingTransactionTracker::new(
				rpc,
				transaction_storage,
				manager.clone(),
				config.confirmation_timeout(),
			)),
		};
		let orchestrator = SyncOrchestrator::new(components.clone(), events.clone());

		Self {
			address,
			events,
			connectivity,
			components,
			manager,
			orchestrator,
		}
	}

	/// Builds the HTTP clients and the store described by `config`.
	///
	/// With `data_dir` set, state survives restarts in a JSON snapshot; otherwise it lives in
	/// memory only.
	pub fn from_config(address: &str, config: &KitConfig) -> Result<Self, KitError> {
		let rpc: Arc<dyn RpcClient> = Arc::new(HttpRpcClient::new(
			config.rpc_url.clone(),
			config.http_timeout(),
		)?);
		let indexer = Arc::new(SolscanClient::new(
			config.indexer_url.clone(),
			config.indexer_api_key.clone(),
			config.http_timeout(),
		)?);
		let nft = Arc::new(RpcNftClient::new(rpc.clone()));

		let (main_storage, transaction_storage) = match &config.data_dir {
			Some(dir) => {
				let storage = Arc::new(FileStorage::open(dir, address)?);
				info!("Persisting wallet state to {:?}", storage.path());
				(
					storage.clone() as Arc<dyn MainStorage>,
					storage as Arc<dyn TransactionStorage>,
				)
			}
			None => {
				let storage = Arc::new(MemoryStorage::new(address));
				(
					storage.clone() as Arc<dyn MainStorage>,
					storage as Arc<dyn TransactionStorage>,
				)
			}
		};

		Ok(Self::new(
			address,
			config,
			rpc,
			indexer,
			nft,
			main_storage,
			transaction_storage,
			Arc::new(ConnectivityMonitor::default()),
		))
	}

	pub fn start(&self) {
		self.orchestrator.start();
	}

	pub async fn stop(&self) {
		self.orchestrator.stop().await;
	}

	pub fn refresh(&self) {
		self.orchestrator.refresh();
	}

	pub fn is_started(&self) -> bool {
		self.orchestrator.is_started()
	}

	pub fn receive_address(&self) -> &str {
		&self.address
	}

	/// Where the platform reports network reachability.
	pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
		&self.connectivity
	}

	/// Every event published by the sync components.
	pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
		self.events.subscribe()
	}

	pub fn last_block_height(&self) -> Option<u64> {
		self.components.poller.last_block_height()
	}

	pub fn block_height_receiver(&self) -> watch::Receiver<Option<u64>> {
		self.components.poller.subscribe_block_height()
	}

	/// Native balance in lamports, as last observed.
	pub fn balance(&self) -> Option<u64> {
		self.components.balance.balance()
	}

	pub fn balance_receiver(&self) -> watch::Receiver<Option<u64>> {
		self.components.balance.subscribe()
	}

	pub fn balance_sync_state(&self) -> SyncState {
		self.components.balance.state()
	}

	pub fn balance_sync_state_receiver(&self) -> watch::Receiver<SyncState> {
		self.components.balance.subscribe_state()
	}

	pub fn token_balance_sync_state(&self) -> SyncState {
		self.components.tokens.state()
	}

	pub fn token_balance_sync_state_receiver(&self) -> watch::Receiver<SyncState> {
		self.components.tokens.subscribe_state()
	}

	pub fn transactions_sync_state(&self) -> SyncState {
		self.components.transactions.state()
	}

	pub fn transactions_sync_state_receiver(&self) -> watch::Receiver<SyncState> {
		self.components.transactions.subscribe_state()
	}

	pub fn token_account(&self, mint_address: &str) -> Result<Option<FullTokenAccount>, KitError> {
		Ok(self.components.tokens.full_token_account(mint_address)?)
	}

	pub fn token_accounts(&self) -> Result<Vec<FullTokenAccount>, KitError> {
		Ok(self.components.tokens.full_token_accounts()?)
	}

	pub fn fungible_token_accounts(&self) -> Result<Vec<FullTokenAccount>, KitError> {
		Ok(self
			.token_accounts()?
			.into_iter()
			.filter(|account| !account.mint_account.is_nft)
			.collect())
	}

	pub fn non_fungible_token_accounts(&self) -> Result<Vec<FullTokenAccount>, KitError> {
		Ok(self
			.token_accounts()?
			.into_iter()
			.filter(|account| account.mint_account.is_nft)
			.collect())
	}

	/// The token account of `mint_address` each time token balances are refreshed.
	pub fn token_account_stream(
		&self,
		mint_address: &str,
	) -> impl Stream<Item = FullTokenAccount> + Send + 'static {
		let mut receiver = self.events.subscribe();
		let mint_address = mint_address.to_string();

		stream! {
			loop {
				match receiver.recv().await {
					Ok(SyncEvent::TokenAccountsUpdated { accounts }) => {
						if let Some(account) = accounts
							.into_iter()
							.find(|account| account.mint_account.address == mint_address)
						{
							yield account;
						}
					}
					Ok(_) => {}
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						warn!("Token account stream lagged, {} events skipped", skipped);
					}
					Err(broadcast::error::RecvError::Closed) => break,
				}
			}
		}
	}

	/// Token accounts discovered by the transaction syncer.
	pub fn new_token_accounts_stream(&self) -> impl Stream<Item = Vec<FullTokenAccount>> + Send + 'static {
		let mut receiver = self.events.subscribe();

		stream! {
			loop {
				match receiver.recv().await {
					Ok(SyncEvent::NewTokenAccounts { accounts }) => yield accounts,
					Ok(_) => {}
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						warn!("New token account stream lagged, {} events skipped", skipped);
					}
					Err(broadcast::error::RecvError::Closed) => break,
				}
			}
		}
	}

	/// Stored history, newest first.
	pub fn transactions(&self, query: &TransactionQuery) -> Result<Vec<FullTransaction>, KitError> {
		Ok(self.manager.transactions(query)?)
	}

	pub fn transactions_stream(
		&self,
		filter: TransactionFilter,
		incoming: Option<bool>,
	) -> impl Stream<Item = Vec<FullTransaction>> + Send + 'static {
		self.manager.transactions_stream(filter, incoming)
	}

	/// Sends lamports to `to` and returns the pending transaction.
	pub async fn send_native(
		&self,
		signer: &dyn TransactionSigner,
		to: &str,
		amount: u64,
	) -> Result<FullTransaction, KitError> {
		self.ensure_started()?;
		self.manager.send_native(signer, to, amount).await
	}

	/// Sends `amount` of `mint_address` from the tracked token account of that mint.
	pub async fn send_token(
		&self,
		signer: &dyn TransactionSigner,
		mint_address: &str,
		to: &str,
		amount: u64,
	) -> Result<FullTransaction, KitError> {
		self.ensure_started()?;
		self.manager
			.send_token(signer, mint_address, to, amount)
			.await
	}

	pub async fn send_raw_transaction(
		&self,
		encoded: &str,
		last_valid_block_height: Option<u64>,
	) -> Result<FullTransaction, KitError> {
		self.ensure_started()?;
		self.manager.send_raw(encoded, last_valid_block_height).await
	}

	/// Tracks a token account before any transfer to it has been seen.
	pub fn add_token_account(
		&self,
		token_account_address: &str,
		mint_address: &str,
		decimals: u8,
	) -> Result<(), KitError> {
		self.components
			.tokens
			.add_token_account(token_account_address, mint_address, decimals)?;
		Ok(())
	}

	pub fn status_info(&self) -> StatusInfo {
		StatusInfo {
			address: self.address.clone(),
			last_block_height: self.last_block_height(),
			poller: self.components.poller.state(),
			balance: self.balance_sync_state(),
			token_accounts: self.token_balance_sync_state(),
			transactions: self.transactions_sync_state(),
		}
	}

	fn ensure_started(&self) -> Result<(), KitError> {
		if self.is_started() {
			Ok(())
		} else {
			Err(KitError::NotStarted)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	use futures::StreamExt;

	use crate::models::{MintAccount, TokenAccount};
	use crate::rpc::layout::tests::token_account_bytes;
	use crate::rpc::{AccountInfo, TOKEN_PROGRAM_ID};
	use crate::testing::{FakeIndexer, FakeNft, FakeRpc, FakeSigner, key};

	const OWNER: &str = "Owner111";

	fn kit() -> (SolanaKit, Arc<FakeRpc>, Arc<MemoryStorage>) {
		let rpc = Arc::new(FakeRpc::default());
		let storage = Arc::new(MemoryStorage::new(OWNER));
		let kit = SolanaKit::new(
			OWNER,
			&KitConfig::default(),
			rpc.clone(),
			Arc::new(FakeIndexer::default()),
			Arc::new(FakeNft::default()),
			storage.clone(),
			storage.clone(),
			Arc::new(ConnectivityMonitor::new(true)),
		);
		(kit, rpc, storage)
	}

	fn seed_token(storage: &MemoryStorage, address: &str, mint: &str, is_nft: bool) {
		let mut mint_account = MintAccount::new(mint, if is_nft { 1 } else { 1_000_000 }, 0);
		mint_account.is_nft = is_nft;
		storage.save_mint_accounts(&[mint_account]).unwrap();
		storage
			.save_token_accounts(&[TokenAccount {
				address: address.to_string(),
				mint_address: mint.to_string(),
				balance: 1,
				decimals: 0,
			}])
			.unwrap();
	}

	#[tokio::test]
	async fn sending_requires_started_kit() {
		let (kit, rpc, _storage) = kit();

		let result = kit.send_native(&FakeSigner, "Recipient", 1).await;
		assert!(matches!(result, Err(KitError::NotStarted)));
		let result = kit.send_raw_transaction("AQID", None).await;
		assert!(matches!(result, Err(KitError::NotStarted)));
		assert!(rpc.sent().is_empty());
	}

	#[test]
	fn token_accounts_split_by_kind() {
		let (kit, _rpc, storage) = kit();
		seed_token(&storage, &key(10), &key(1), false);
		seed_token(&storage, &key(11), &key(2), true);

		let fungible = kit.fungible_token_accounts().unwrap();
		let nfts = kit.non_fungible_token_accounts().unwrap();
		assert_eq!(fungible.len(), 1);
		assert_eq!(fungible[0].mint_account.address, key(1));
		assert_eq!(nfts.len(), 1);
		assert_eq!(nfts[0].token_account.address, key(11));
		assert!(kit.token_account(&key(3)).unwrap().is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn running_kit_syncs_and_sends() {
		let (kit, rpc, storage) = kit();
		rpc.push_block_heights(&[100]);
		rpc.set_balance(Some(2_000_000_000));
		seed_token(&storage, &key(10), &key(1), false);
		rpc.set_account(
			&key(10),
			AccountInfo {
				lamports: 2_039_280,
				owner: TOKEN_PROGRAM_ID.to_string(),
				data: token_account_bytes([1; 32], [2; 32], 77),
				executable: false,
			},
		);
		let balances = kit.token_account_stream(&key(1));
		futures::pin_mut!(balances);

		kit.start();
		tokio::time::sleep(Duration::from_secs(1)).await;

		assert_eq!(kit.balance(), Some(2_000_000_000));
		assert_eq!(kit.last_block_height(), Some(100));
		assert_eq!(balances.next().await.unwrap().token_account.balance, 77);
		let status = kit.status_info().to_string();
		assert!(status.contains("Last block height: 100"));
		assert!(status.contains("Balance: Synced"));

		let sent = kit.send_native(&FakeSigner, "Recipient", 5).await.unwrap();
		let history = kit.transactions(&TransactionQuery::default()).unwrap();
		assert_eq!(history[0].hash(), sent.hash());
		assert!(history[0].transaction.pending);

		kit.stop().await;
		assert!(!kit.is_started());
	}
}
