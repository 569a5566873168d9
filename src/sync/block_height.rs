use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SyncError;
use super::connectivity::ConnectivityMonitor;
use super::events::{EventBus, SyncEvent};
use super::session::Session;
use crate::rpc::RpcClient;
use crate::storage::MainStorage;

/// Readiness of the block height poller. Equality ignores the error.
#[derive(Debug, Clone)]
pub enum PollerState {
	Ready,
	NotReady(Arc<SyncError>),
}

impl PartialEq for PollerState {
	fn eq(&self, other: &Self) -> bool {
		matches!(
			(self, other),
			(PollerState::Ready, PollerState::Ready)
				| (PollerState::NotReady(_), PollerState::NotReady(_))
		)
	}
}

impl PollerState {
	pub fn not_ready(error: SyncError) -> Self {
		PollerState::NotReady(Arc::new(error))
	}

	pub fn is_ready(&self) -> bool {
		matches!(self, PollerState::Ready)
	}
}

/// Polls the chain height on a fixed interval while the network is reachable.
///
/// Connectivity loss stops the timer and reports `NotReady(NoNetworkConnection)`; regaining it
/// reports `Ready` and restarts the timer, whose first tick fires immediately. A failed fetch
/// reports `NotReady` with the error but keeps the timer running, and the next successful fetch
/// reports `Ready` again.
pub struct BlockHeightPoller {
	rpc: Arc<dyn RpcClient>,
	storage: Arc<dyn MainStorage>,
	connectivity: Arc<ConnectivityMonitor>,
	interval: Duration,
	events: EventBus,
	state: watch::Sender<PollerState>,
	height: watch::Sender<Option<u64>>,
	started: AtomicBool,
	timer: Mutex<Option<CancellationToken>>,
}

impl BlockHeightPoller {
	pub fn new(
		rpc: Arc<dyn RpcClient>,
		storage: Arc<dyn MainStorage>,
		connectivity: Arc<ConnectivityMonitor>,
		interval: Duration,
		events: EventBus,
	) -> Self {
		let last_height = storage.last_block_height().unwrap_or_else(|e| {
			warn!("Failed to read cached block height: {}", e);
			None
		});
		let (state, _) = watch::channel(PollerState::not_ready(SyncError::NotStarted));
		let (height, _) = watch::channel(last_height);

		Self {
			rpc,
			storage,
			connectivity,
			interval,
			events,
			state,
			height,
			started: AtomicBool::new(false),
			timer: Mutex::new(None),
		}
	}

	pub fn state(&self) -> PollerState {
		self.state.borrow().clone()
	}

	pub fn subscribe_state(&self) -> watch::Receiver<PollerState> {
		self.state.subscribe()
	}

	pub fn last_block_height(&self) -> Option<u64> {
		*self.height.borrow()
	}

	pub fn subscribe_block_height(&self) -> watch::Receiver<Option<u64>> {
		self.height.subscribe()
	}

	/// Starts following connectivity inside `session`.
	///
	/// The current connectivity is applied before this returns, so the state is already `Ready`
	/// or `NotReady(NoNetworkConnection)` afterwards. Calling it again while started only
	/// re-applies the current connectivity.
	pub fn start(self: &Arc<Self>, session: &Session) {
		let already_started = self.started.swap(true, Ordering::SeqCst);

		let mut connectivity = self.connectivity.subscribe();
		let connected = *connectivity.borrow_and_update();
		self.handle_connectivity(connected, session);
		if already_started {
			return;
		}

		let poller = self.clone();
		let scope = session.clone();
		session.spawn(async move {
			while connectivity.changed().await.is_ok() {
				let connected = *connectivity.borrow_and_update();
				poller.handle_connectivity(connected, &scope);
			}
		});
	}

	pub fn stop(&self) {
		self.started.store(false, Ordering::SeqCst);
		self.stop_timer();
		self.set_state(PollerState::not_ready(SyncError::NotStarted));
	}

	fn handle_connectivity(self: &Arc<Self>, connected: bool, session: &Session) {
		if !self.started.load(Ordering::SeqCst) {
			return;
		}

		if connected {
			self.set_state(PollerState::Ready);
			self.start_timer(session);
		} else {
			self.stop_timer();
			self.set_state(PollerState::not_ready(SyncError::NoNetworkConnection));
		}
	}

	fn start_timer(self: &Arc<Self>, session: &Session) {
		let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
		if timer.as_ref().is_some_and(|token| !token.is_cancelled()) {
			debug!("Block height timer already running");
			return;
		}

		let token = session.child_token();
		*timer = Some(token.clone());
		drop(timer);

		debug!("Starting block height timer every {:?}", self.interval);
		let poller = self.clone();
		session.spawn(async move {
			let mut ticker = tokio::time::interval(poller.interval);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			loop {
				tokio::select! {
					_ = token.cancelled() => break,
					_ = ticker.tick() => {}
				}
				tokio::select! {
					_ = token.cancelled() => break,
					_ = poller.poll() => {}
				}
			}
			debug!("Block height timer stopped");
		});
	}

	fn stop_timer(&self) {
		let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
		if let Some(token) = timer.take() {
			token.cancel();
		}
	}

	/// Fetches the chain height once.
	pub async fn poll(&self) {
		match self.rpc.get_block_height().await {
			Ok(height) => {
				self.set_state(PollerState::Ready);
				self.handle_block_height(height);
			}
			Err(e) => {
				warn!("Failed to fetch block height: {}", e);
				self.set_state(PollerState::not_ready(e.into()));
			}
		}
	}

	fn handle_block_height(&self, height: u64) {
		let changed = self.height.send_if_modified(|current| {
			if *current == Some(height) {
				false
			} else {
				*current = Some(height);
				true
			}
		});
		if !changed {
			return;
		}

		if let Err(e) = self.storage.save_last_block_height(height) {
			warn!("Failed to persist block height {}: {}", height, e);
		}
		debug!("Block height updated to {}", height);
		self.events.publish(SyncEvent::BlockHeightUpdated { height });
	}

	fn set_state(&self, new_state: PollerState) {
		// The stored error is always replaced; only a variant change notifies.
		let changed = self.state.send_if_modified(|state| {
			let changed = *state != new_state;
			*state = new_state.clone();
			changed
		});

		if changed {
			match &new_state {
				PollerState::Ready => info!("Block height poller ready"),
				PollerState::NotReady(e) => info!("Block height poller not ready: {}", e),
			}
			self.events
				.publish(SyncEvent::PollerStateChanged { state: new_state });
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::storage::MemoryStorage;
	use crate::testing::FakeRpc;

	const INTERVAL: Duration = Duration::from_secs(30);

	struct Fixture {
		rpc: Arc<FakeRpc>,
		storage: Arc<MemoryStorage>,
		connectivity: Arc<ConnectivityMonitor>,
		events: EventBus,
		poller: Arc<BlockHeightPoller>,
	}

	fn fixture(connected: bool) -> Fixture {
		let rpc = Arc::new(FakeRpc::default());
		let storage = Arc::new(MemoryStorage::new("Owner111"));
		let connectivity = Arc::new(ConnectivityMonitor::new(connected));
		let events = EventBus::new(64);
		let poller = Arc::new(BlockHeightPoller::new(
			rpc.clone(),
			storage.clone(),
			connectivity.clone(),
			INTERVAL,
			events.clone(),
		));
		Fixture {
			rpc,
			storage,
			connectivity,
			events,
			poller,
		}
	}

	fn heights(receiver: &mut tokio::sync::broadcast::Receiver<SyncEvent>) -> Vec<u64> {
		let mut heights = Vec::new();
		while let Ok(event) = receiver.try_recv() {
			if let SyncEvent::BlockHeightUpdated { height } = event {
				heights.push(height);
			}
		}
		heights
	}

	#[tokio::test(start_paused = true)]
	async fn emits_only_changed_heights() {
		let f = fixture(true);
		f.rpc.push_block_heights(&[100, 100, 101]);
		let mut receiver = f.events.subscribe();
		let session = Session::new();

		f.poller.start(&session);
		assert!(f.poller.state().is_ready());
		tokio::time::sleep(INTERVAL * 2 + Duration::from_secs(1)).await;

		assert_eq!(f.rpc.block_height_calls(), 3);
		assert_eq!(heights(&mut receiver), vec![100, 101]);
		assert_eq!(f.storage.last_block_height().unwrap(), Some(101));
		assert_eq!(f.poller.last_block_height(), Some(101));

		session.shutdown().await;
	}

	#[tokio::test(start_paused = true)]
	async fn connectivity_loss_stops_the_timer() {
		let f = fixture(true);
		f.rpc.push_block_heights(&[100]);
		let session = Session::new();

		f.poller.start(&session);
		tokio::time::sleep(Duration::from_secs(1)).await;
		assert_eq!(f.rpc.block_height_calls(), 1);

		f.connectivity.set_connected(false);
		tokio::time::sleep(INTERVAL * 4).await;
		assert_eq!(f.rpc.block_height_calls(), 1);
		assert!(matches!(
			f.poller.state(),
			PollerState::NotReady(ref e) if matches!(**e, SyncError::NoNetworkConnection)
		));

		f.connectivity.set_connected(true);
		tokio::time::sleep(Duration::from_secs(1)).await;
		assert!(f.poller.state().is_ready());
		assert_eq!(f.rpc.block_height_calls(), 2);

		session.shutdown().await;
	}

	#[tokio::test(start_paused = true)]
	async fn fetch_error_recovers_on_next_tick() {
		let f = fixture(true);
		f.rpc.push_block_height_error();
		f.rpc.push_block_heights(&[120]);
		let session = Session::new();

		f.poller.start(&session);
		tokio::time::sleep(Duration::from_secs(1)).await;
		assert!(matches!(
			f.poller.state(),
			PollerState::NotReady(ref e) if matches!(**e, SyncError::Rpc(_))
		));

		tokio::time::sleep(INTERVAL).await;
		assert!(f.poller.state().is_ready());
		assert_eq!(f.poller.last_block_height(), Some(120));

		session.shutdown().await;
	}

	#[tokio::test(start_paused = true)]
	async fn stop_cancels_the_timer() {
		let f = fixture(true);
		f.rpc.push_block_heights(&[100]);
		let session = Session::new();

		f.poller.start(&session);
		f.poller.start(&session);
		tokio::time::sleep(Duration::from_secs(1)).await;
		assert_eq!(f.rpc.block_height_calls(), 1);

		f.poller.stop();
		tokio::time::sleep(INTERVAL * 3).await;
		assert_eq!(f.rpc.block_height_calls(), 1);
		assert!(!f.poller.state().is_ready());

		session.shutdown().await;
	}
}
