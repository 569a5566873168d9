use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use super::SyncError;
use super::events::{EventBus, SyncEvent};
use super::state::{SyncDomain, SyncState, SyncStateCell};
use crate::rpc::RpcClient;
use crate::storage::MainStorage;

/// Keeps the native balance of the tracked address current.
///
/// At most one fetch runs at a time; a `sync` issued while another is in flight returns
/// immediately.
pub struct BalanceSyncer {
	address: String,
	rpc: Arc<dyn RpcClient>,
	storage: Arc<dyn MainStorage>,
	events: EventBus,
	state: SyncStateCell,
	balance: watch::Sender<Option<u64>>,
}

impl BalanceSyncer {
	pub fn new(
		address: impl Into<String>,
		rpc: Arc<dyn RpcClient>,
		storage: Arc<dyn MainStorage>,
		events: EventBus,
	) -> Self {
		let cached = storage.balance().unwrap_or_else(|e| {
			warn!("Failed to read cached balance: {}", e);
			None
		});
		let (balance, _) = watch::channel(cached);

		Self {
			address: address.into(),
			rpc,
			storage,
			state: SyncStateCell::new(SyncDomain::Balance, events.clone()),
			events,
			balance,
		}
	}

	pub fn balance(&self) -> Option<u64> {
		*self.balance.borrow()
	}

	pub fn subscribe(&self) -> watch::Receiver<Option<u64>> {
		self.balance.subscribe()
	}

	pub fn state(&self) -> SyncState {
		self.state.get()
	}

	pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
		self.state.subscribe()
	}

	pub async fn sync(&self) {
		if !self.state.try_begin() {
			return;
		}

		match self.rpc.get_balance(&self.address).await {
			Ok(balance) => {
				self.handle_balance(balance);
				self.state.set(SyncState::Synced);
			}
			Err(e) => {
				warn!("Balance sync failed: {}", e);
				self.state.set(SyncState::not_synced(e.into()));
			}
		}
	}

	/// Moves to `NotSynced` with `error`, or `NotStarted` when none is given.
	pub fn stop(&self, error: Option<Arc<SyncError>>) {
		let error = error.unwrap_or_else(|| Arc::new(SyncError::NotStarted));
		self.state.set(SyncState::NotSynced(error));
	}

	fn handle_balance(&self, balance: u64) {
		if self.balance() == Some(balance) {
			return;
		}

		if let Err(e) = self.storage.save_balance(balance) {
			warn!("Failed to persist balance: {}", e);
		}
		self.balance.send_replace(Some(balance));
		debug!("Balance updated to {}", balance);
		self.events.publish(SyncEvent::BalanceUpdated { balance });
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	use crate::storage::MemoryStorage;
	use crate::testing::FakeRpc;

	fn syncer(rpc: Arc<FakeRpc>, storage: Arc<MemoryStorage>) -> (BalanceSyncer, EventBus) {
		let events = EventBus::new(64);
		let syncer = BalanceSyncer::new("Owner111", rpc, storage, events.clone());
		(syncer, events)
	}

	fn balance_events(receiver: &mut tokio::sync::broadcast::Receiver<SyncEvent>) -> Vec<u64> {
		let mut balances = Vec::new();
		while let Ok(event) = receiver.try_recv() {
			if let SyncEvent::BalanceUpdated { balance } = event {
				balances.push(balance);
			}
		}
		balances
	}

	#[tokio::test(start_paused = true)]
	async fn concurrent_syncs_issue_one_fetch() {
		let rpc = Arc::new(FakeRpc::default());
		rpc.set_balance(Some(1_500_000_000));
		rpc.set_balance_delay(Duration::from_secs(5));
		let (syncer, _events) = syncer(rpc.clone(), Arc::new(MemoryStorage::new("Owner111")));

		tokio::join!(syncer.sync(), syncer.sync(), syncer.sync());

		assert_eq!(rpc.balance_calls(), 1);
		assert_eq!(rpc.balance_max_in_flight(), 1);
		assert_eq!(syncer.balance(), Some(1_500_000_000));
		assert!(syncer.state().is_synced());
	}

	#[tokio::test]
	async fn unchanged_balance_is_not_republished() {
		let rpc = Arc::new(FakeRpc::default());
		rpc.set_balance(Some(42));
		let storage = Arc::new(MemoryStorage::new("Owner111"));
		let (syncer, events) = syncer(rpc.clone(), storage.clone());
		let mut receiver = events.subscribe();

		syncer.sync().await;
		syncer.sync().await;
		rpc.set_balance(Some(43));
		syncer.sync().await;

		assert_eq!(rpc.balance_calls(), 3);
		assert_eq!(balance_events(&mut receiver), vec![42, 43]);
		assert_eq!(storage.balance().unwrap(), Some(43));
	}

	#[tokio::test]
	async fn failure_keeps_cached_balance() {
		let rpc = Arc::new(FakeRpc::default());
		let storage = Arc::new(MemoryStorage::new("Owner111"));
		storage.save_balance(7).unwrap();
		let (syncer, _events) = syncer(rpc, storage);

		assert_eq!(syncer.balance(), Some(7));
		syncer.sync().await;

		assert!(matches!(syncer.state().error(), Some(SyncError::Rpc(_))));
		assert_eq!(syncer.balance(), Some(7));
	}

	#[tokio::test]
	async fn stop_reports_given_error() {
		let rpc = Arc::new(FakeRpc::default());
		rpc.set_balance(Some(1));
		let (syncer, _events) = syncer(rpc, Arc::new(MemoryStorage::new("Owner111")));
		syncer.sync().await;

		syncer.stop(Some(Arc::new(SyncError::NoNetworkConnection)));
		assert!(matches!(
			syncer.state().error(),
			Some(SyncError::NoNetworkConnection)
		));

		syncer.stop(None);
		assert!(!syncer.state().is_synced());
	}
}
