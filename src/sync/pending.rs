use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::SyncError;
use super::transaction_manager::TransactionManager;
use crate::models::{EXPIRED_ERROR, Transaction};
use crate::rpc::{RpcClient, TransactionStatus};
use crate::storage::TransactionStorage;

/// Outcome of checking one pending transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Resolution {
	Confirmed(Option<String>),
	Expired,
	Resubmit,
	Unchanged,
}

/// Sweeps pending transactions at each new block height.
///
/// A confirmed transaction takes the network's error (or none); one that is still unknown after
/// its blockhash expired fails with [`EXPIRED_ERROR`]; anything else with a stored payload is
/// resubmitted. Every lookup is bounded by the confirmation timeout, and a failed lookup only
/// affects its own transaction.
pub struct PendingTransactionTracker {
	rpc: Arc<dyn RpcClient>,
	storage: Arc<dyn TransactionStorage>,
	manager: Arc<TransactionManager>,
	confirmation_timeout: Duration,
	running: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::SeqCst);
	}
}

impl PendingTransactionTracker {
	pub fn new(
		rpc: Arc<dyn RpcClient>,
		storage: Arc<dyn TransactionStorage>,
		manager: Arc<TransactionManager>,
		confirmation_timeout: Duration,
	) -> Self {
		Self {
			rpc,
			storage,
			manager,
			confirmation_timeout,
			running: AtomicBool::new(false),
		}
	}

	/// Checks every pending transaction against `current_height`.
	///
	/// A sweep requested while another runs is skipped.
	pub async fn sync(&self, current_height: u64) {
		if self.running.swap(true, Ordering::SeqCst) {
			debug!("Pending transaction sweep already running");
			return;
		}
		let _guard = RunningGuard(&self.running);

		if let Err(e) = self.sweep(current_height).await {
			warn!("Pending transaction sweep failed: {}", e);
		}
	}

	async fn sweep(&self, current_height: u64) -> Result<(), SyncError> {
		let pending = self.storage.pending_transactions()?;
		if pending.is_empty() {
			return Ok(());
		}
		debug!(
			"Checking {} pending transactions at height {}",
			pending.len(),
			current_height
		);

		let mut updates: Vec<Transaction> = Vec::new();
		for transaction in pending {
			let status = self.lookup(&transaction.hash).await;
			match resolve(&transaction, status, current_height) {
				Resolution::Confirmed(error) => {
					info!("Transaction {} confirmed", transaction.hash);
					updates.push(Transaction {
						pending: false,
						error,
						..transaction
					});
				}
				Resolution::Expired => {
					info!("Transaction {} expired", transaction.hash);
					updates.push(Transaction {
						pending: false,
						error: Some(EXPIRED_ERROR.to_string()),
						..transaction
					});
				}
				Resolution::Resubmit => {
					self.resubmit(&transaction).await;
					updates.push(Transaction {
						retry_count: transaction.retry_count + 1,
						..transaction
					});
				}
				Resolution::Unchanged => {}
			}
		}
		if updates.is_empty() {
			return Ok(());
		}

		// A sync cycle may have settled some of these during the sweep.
		let still_pending: HashSet<String> = self
			.storage
			.pending_transactions()?
			.into_iter()
			.map(|tx| tx.hash)
			.collect();
		updates.retain(|tx| still_pending.contains(&tx.hash));

		self.storage.update_transactions(&updates)?;
		let hashes: Vec<String> = updates.into_iter().map(|tx| tx.hash).collect();
		self.manager.notify_updated(&hashes)?;
		Ok(())
	}

	/// Status of `signature`; failures and timeouts count as not found.
	async fn lookup(&self, signature: &str) -> Option<TransactionStatus> {
		match tokio::time::timeout(
			self.confirmation_timeout,
			self.rpc.get_transaction_status(signature),
		)
		.await
		{
			Ok(Ok(status)) => status,
			Ok(Err(e)) => {
				warn!("Status lookup for {} failed: {}", signature, e);
				None
			}
			Err(_) => {
				warn!("Status lookup for {} timed out", signature);
				None
			}
		}
	}

	async fn resubmit(&self, transaction: &Transaction) {
		let Some(encoded) = transaction.encoded.as_deref() else {
			return;
		};

		info!(
			"Resubmitting transaction {} (retry {})",
			transaction.hash,
			transaction.retry_count + 1
		);
		if let Err(e) = self.rpc.send_transaction(encoded).await {
			warn!("Resubmission of {} failed: {}", transaction.hash, e);
		}
	}
}

fn resolve(transaction: &Transaction, status: Option<TransactionStatus>, current_height: u64) -> Resolution {
	if let Some(status) = status {
		return Resolution::Confirmed(status.err);
	}

	match transaction.last_valid_block_height {
		Some(last_valid) if current_height > last_valid => Resolution::Expired,
		_ if transaction.encoded.is_some() => Resolution::Resubmit,
		_ => Resolution::Unchanged,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::models::FullTransaction;
	use crate::storage::MemoryStorage;
	use crate::sync::events::{EventBus, SyncEvent};
	use crate::testing::FakeRpc;

	const OWNER: &str = "Owner111";

	struct Fixture {
		rpc: Arc<FakeRpc>,
		storage: Arc<MemoryStorage>,
		events: EventBus,
		tracker: PendingTransactionTracker,
	}

	fn fixture() -> Fixture {
		let rpc = Arc::new(FakeRpc::default());
		let storage = Arc::new(MemoryStorage::new(OWNER));
		let events = EventBus::new(64);
		let manager = Arc::new(TransactionManager::new(
			OWNER,
			rpc.clone(),
			storage.clone(),
			events.clone(),
		));
		let tracker = PendingTransactionTracker::new(
			rpc.clone(),
			storage.clone(),
			manager,
			Duration::from_secs(2),
		);
		Fixture {
			rpc,
			storage,
			events,
			tracker,
		}
	}

	fn pending(hash: &str, last_valid: Option<u64>, encoded: Option<&str>) -> FullTransaction {
		let mut tx = Transaction::new(hash, 1000);
		tx.pending = true;
		tx.last_valid_block_height = last_valid;
		tx.encoded = encoded.map(str::to_string);
		FullTransaction::new(tx, vec![])
	}

	fn stored(storage: &MemoryStorage, hash: &str) -> Transaction {
		storage
			.full_transactions(&[hash.to_string()])
			.unwrap()
			.remove(0)
			.transaction
	}

	#[tokio::test]
	async fn unconfirmed_transaction_expires_once_past_last_valid_height() {
		let f = fixture();
		f.storage
			.save_transactions(&[pending("TX1", Some(100), Some("AQID"))])
			.unwrap();
		let mut receiver = f.events.subscribe();

		f.tracker.sync(90).await;
		let tx1 = stored(&f.storage, "TX1");
		assert!(tx1.pending);
		assert_eq!(tx1.retry_count, 1);
		assert_eq!(f.rpc.sent(), vec!["AQID".to_string()]);

		f.tracker.sync(101).await;
		let tx1 = stored(&f.storage, "TX1");
		assert!(!tx1.pending);
		assert_eq!(tx1.error.as_deref(), Some(EXPIRED_ERROR));
		assert!(tx1.is_expired());

		f.tracker.sync(102).await;
		assert_eq!(f.rpc.sent().len(), 1);

		let mut expirations = 0;
		while let Ok(event) = receiver.try_recv() {
			if let SyncEvent::TransactionsUpdated { transactions } = event {
				expirations += transactions
					.iter()
					.filter(|tx| tx.transaction.is_expired())
					.count();
			}
		}
		assert_eq!(expirations, 1);
	}

	#[tokio::test]
	async fn confirmation_copies_network_error() {
		let f = fixture();
		f.storage
			.save_transactions(&[
				pending("OK", Some(100), Some("AA")),
				pending("FAIL", Some(100), Some("BB")),
			])
			.unwrap();
		f.rpc.set_status("OK", TransactionStatus { err: None });
		f.rpc.set_status(
			"FAIL",
			TransactionStatus {
				err: Some("InsufficientFundsForFee".to_string()),
			},
		);

		f.tracker.sync(150).await;

		let ok = stored(&f.storage, "OK");
		assert!(!ok.pending);
		assert_eq!(ok.error, None);
		let failed = stored(&f.storage, "FAIL");
		assert!(!failed.pending);
		assert_eq!(failed.error.as_deref(), Some("InsufficientFundsForFee"));
		assert!(f.rpc.sent().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn stalled_lookup_counts_as_not_found() {
		let f = fixture();
		f.storage
			.save_transactions(&[pending("SLOW", Some(100), Some("CC"))])
			.unwrap();
		f.rpc.set_status("SLOW", TransactionStatus { err: None });
		f.rpc.set_status_delay(Duration::from_secs(30));

		f.tracker.sync(50).await;

		let slow = stored(&f.storage, "SLOW");
		assert!(slow.pending);
		assert_eq!(slow.retry_count, 1);
	}

	#[tokio::test]
	async fn without_last_valid_height_never_expires() {
		let f = fixture();
		f.storage
			.save_transactions(&[pending("RAW", None, Some("DD")), pending("BARE", None, None)])
			.unwrap();

		f.tracker.sync(1_000_000).await;

		let raw = stored(&f.storage, "RAW");
		assert!(raw.pending);
		assert_eq!(raw.retry_count, 1);
		let bare = stored(&f.storage, "BARE");
		assert!(bare.pending);
		assert_eq!(bare.retry_count, 0);
	}

	#[test]
	fn resolution_rules() {
		let tx = pending("T", Some(100), Some("EE")).transaction;
		assert_eq!(resolve(&tx, None, 100), Resolution::Resubmit);
		assert_eq!(resolve(&tx, None, 101), Resolution::Expired);
		assert_eq!(
			resolve(&tx, Some(TransactionStatus { err: None }), 500),
			Resolution::Confirmed(None)
		);
	}
}
