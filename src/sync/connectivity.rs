use tokio::sync::watch;
use tracing::info;

/// Whether the network is currently reachable.
///
/// The monitor does no I/O itself; a platform adapter reports transitions through
/// [`ConnectivityMonitor::set_connected`] and dependents observe them via [`subscribe`].
///
/// [`subscribe`]: ConnectivityMonitor::subscribe
pub struct ConnectivityMonitor {
	connected: watch::Sender<bool>,
}

impl Default for ConnectivityMonitor {
	fn default() -> Self {
		Self::new(true)
	}
}

impl ConnectivityMonitor {
	pub fn new(connected: bool) -> Self {
		let (connected, _) = watch::channel(connected);
		Self { connected }
	}

	pub fn is_connected(&self) -> bool {
		*self.connected.borrow()
	}

	/// Records the current connectivity; subscribers are notified only on transitions.
	pub fn set_connected(&self, connected: bool) {
		let changed = self.connected.send_if_modified(|current| {
			if *current == connected {
				false
			} else {
				*current = connected;
				true
			}
		});

		if changed {
			info!(
				"Network connectivity {}",
				if connected { "restored" } else { "lost" }
			);
		}
	}

	pub fn subscribe(&self) -> watch::Receiver<bool> {
		self.connected.subscribe()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn notifies_only_on_transition() {
		let monitor = ConnectivityMonitor::new(true);
		let mut receiver = monitor.subscribe();

		monitor.set_connected(true);
		assert!(!receiver.has_changed().unwrap());

		monitor.set_connected(false);
		receiver.changed().await.unwrap();
		assert!(!*receiver.borrow_and_update());
		assert!(!monitor.is_connected());
	}
}
