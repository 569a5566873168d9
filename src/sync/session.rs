use std::future::Future;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Cancellation scope owning every background task of one started kit.
///
/// Tasks spawned through [`Session::spawn`] end as soon as the session is cancelled; after
/// [`Session::shutdown`] returns none of them is still running.
#[derive(Clone)]
pub struct Session {
	token: CancellationToken,
	tracker: TaskTracker,
}

impl Default for Session {
	fn default() -> Self {
		Self::new()
	}
}

impl Session {
	pub fn new() -> Self {
		Self {
			token: CancellationToken::new(),
			tracker: TaskTracker::new(),
		}
	}

	/// A token cancelled together with this session; it can also be cancelled on its own.
	pub fn child_token(&self) -> CancellationToken {
		self.token.child_token()
	}

	pub fn token(&self) -> CancellationToken {
		self.token.clone()
	}

	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	pub fn spawn<F>(&self, future: F)
	where
		F: Future<Output = ()> + Send + 'static,
	{
		if self.is_cancelled() {
			return;
		}
		let token = self.token.clone();
		self.tracker.spawn(async move {
			tokio::select! {
				_ = token.cancelled() => {}
				_ = future => {}
			}
		});
	}

	/// Cancel every task and wait until all of them have finished.
	pub async fn shutdown(&self) {
		self.token.cancel();
		self.tracker.close();
		self.tracker.wait().await;
		debug!("Session shut down");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::sync::atomic::{AtomicBool, Ordering};
	use std::time::Duration;

	#[tokio::test(start_paused = true)]
	async fn shutdown_cancels_pending_work() {
		let session = Session::new();
		let finished = Arc::new(AtomicBool::new(false));

		let flag = finished.clone();
		session.spawn(async move {
			tokio::time::sleep(Duration::from_secs(3600)).await;
			flag.store(true, Ordering::SeqCst);
		});

		session.shutdown().await;
		assert!(!finished.load(Ordering::SeqCst));

		session.spawn(async {});
		assert!(session.is_cancelled());
	}
}
