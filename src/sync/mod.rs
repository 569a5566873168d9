//! Synchronization engine.
//!
//! Components, leaves first: the connectivity monitor feeds the block height poller; new heights
//! trigger the transaction syncer and then the pending transaction sweep; new transactions
//! trigger a balance re-sync, and discovered token accounts are handed to the token account
//! syncer. Components never call each other directly: they publish [`SyncEvent`]s on a shared
//! [`EventBus`] and the [`SyncOrchestrator`] reacts to them inside one cancellable [`Session`].

pub mod balance;
pub mod block_height;
pub mod connectivity;
pub mod events;
pub mod mint_resolver;
pub mod orchestrator;
pub mod pending;
pub mod session;
pub mod state;
pub mod token_accounts;
pub mod transaction_manager;
pub mod transaction_syncer;

pub use balance::BalanceSyncer;
pub use block_height::{BlockHeightPoller, PollerState};
pub use connectivity::ConnectivityMonitor;
pub use events::{EventBus, EventDispatcher, SyncEvent, SyncEventHandler};
pub use mint_resolver::MintResolver;
pub use orchestrator::SyncOrchestrator;
pub use pending::PendingTransactionTracker;
pub use session::Session;
pub use state::{SyncDomain, SyncState, SyncStateCell};
pub use token_accounts::TokenAccountSyncer;
pub use transaction_manager::TransactionManager;
pub use transaction_syncer::TransactionSyncer;

use crate::indexer::IndexerError;
use crate::rpc::RpcError;
use crate::storage::StorageError;

/// Why a domain is not synced.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("Sync not started")]
	NotStarted,

	#[error("No network connection")]
	NoNetworkConnection,

	#[error("RPC error: {0}")]
	Rpc(#[from] RpcError),

	#[error("Indexer error: {0}")]
	Indexer(#[from] IndexerError),

	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}
