use std::collections::HashMap;
use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::events::{EventBus, SyncEvent};
use crate::kit::KitError;
use crate::models::{
	FullTokenTransfer, FullTransaction, TokenAccount, TokenTransfer, Transaction,
	TransactionFilter, TransactionQuery,
};
use crate::rpc::RpcClient;
use crate::signer::{SignedTransaction, TransactionSigner};
use crate::storage::{StorageError, TransactionStorage};

/// Owns transaction writes and reads: merges synced transactions into the store, serves history
/// queries and live streams, and records locally sent transactions as pending.
pub struct TransactionManager {
	address: String,
	rpc: Arc<dyn RpcClient>,
	storage: Arc<dyn TransactionStorage>,
	events: EventBus,
}

impl TransactionManager {
	pub fn new(
		address: impl Into<String>,
		rpc: Arc<dyn RpcClient>,
		storage: Arc<dyn TransactionStorage>,
		events: EventBus,
	) -> Self {
		Self {
			address: address.into(),
			rpc,
			storage,
			events,
		}
	}

	pub fn address(&self) -> &str {
		&self.address
	}

	pub fn transactions(&self, query: &TransactionQuery) -> Result<Vec<FullTransaction>, StorageError> {
		self.storage.transactions(query)
	}

	/// Live batches of inserted or updated transactions matching `filter` and `incoming`.
	///
	/// Batches left empty by the filter are not yielded. The stream ends when the bus closes.
	pub fn transactions_stream(
		&self,
		filter: TransactionFilter,
		incoming: Option<bool>,
	) -> impl Stream<Item = Vec<FullTransaction>> + Send + 'static {
		let mut receiver = self.events.subscribe();
		let address = self.address.clone();

		stream! {
			loop {
				let transactions = match receiver.recv().await {
					Ok(SyncEvent::TransactionsUpdated { transactions }) => transactions,
					Ok(_) => continue,
					Err(broadcast::error::RecvError::Lagged(skipped)) => {
						warn!("Transaction stream lagged, {} events skipped", skipped);
						continue;
					}
					Err(broadcast::error::RecvError::Closed) => break,
				};

				let matching: Vec<FullTransaction> = transactions
					.into_iter()
					.filter(|tx| filter.matches(tx, &address, incoming))
					.collect();
				if !matching.is_empty() {
					yield matching;
				}
			}
		}
	}

	/// Merges synced transactions into the store.
	///
	/// A transaction already stored keeps every field the new copy leaves empty, including its
	/// token transfers, and always leaves the pending state. Mints of preserved transfers are
	/// handed on with `candidates` so their accounts get re-checked.
	pub fn handle(
		&self,
		transactions: Vec<FullTransaction>,
		candidates: Vec<TokenAccount>,
	) -> Result<(), StorageError> {
		if transactions.is_empty() {
			return Ok(());
		}

		let hashes: Vec<String> = transactions.iter().map(|tx| tx.hash().to_string()).collect();
		let mut existing: HashMap<String, FullTransaction> = self
			.storage
			.full_transactions(&hashes)?
			.into_iter()
			.map(|tx| (tx.hash().to_string(), tx))
			.collect();

		let mut existing_mints: Vec<String> = Vec::new();
		let merged: Vec<FullTransaction> = transactions
			.into_iter()
			.map(|incoming| match existing.remove(incoming.hash()) {
				Some(stored) => fill_forward(stored, incoming, &mut existing_mints),
				None => incoming,
			})
			.collect();

		self.storage.save_transactions(&merged)?;
		debug!("Saved {} synced transactions", merged.len());
		self.events.publish(SyncEvent::TransactionsUpdated {
			transactions: merged,
		});

		existing_mints.sort();
		existing_mints.dedup();
		if !candidates.is_empty() || !existing_mints.is_empty() {
			self.events.publish(SyncEvent::TokenAccountCandidates {
				accounts: candidates,
				existing_mints,
			});
		}
		Ok(())
	}

	/// Re-announces stored transactions whose headers changed outside [`Self::handle`].
	pub fn notify_updated(&self, hashes: &[String]) -> Result<(), StorageError> {
		if hashes.is_empty() {
			return Ok(());
		}
		let transactions = self.storage.full_transactions(hashes)?;
		if !transactions.is_empty() {
			self.events
				.publish(SyncEvent::TransactionsUpdated { transactions });
		}
		Ok(())
	}

	pub async fn send_native(
		&self,
		signer: &dyn TransactionSigner,
		to: &str,
		amount: u64,
	) -> Result<FullTransaction, KitError> {
		let blockhash = self.rpc.get_latest_blockhash().await?;
		let signed = signer
			.sign_native_transfer(&self.address, to, amount, &blockhash.blockhash)
			.await?;

		let mut transaction = self
			.submit(&signed, blockhash.last_valid_block_height)
			.await?;
		transaction.to = Some(to.to_string());
		transaction.amount = Some(amount);

		self.record_sent(FullTransaction::new(transaction, vec![]))
	}

	pub async fn send_token(
		&self,
		signer: &dyn TransactionSigner,
		mint_address: &str,
		to: &str,
		amount: u64,
	) -> Result<FullTransaction, KitError> {
		let account = self
			.storage
			.full_token_account(mint_address)?
			.ok_or_else(|| KitError::TokenAccountNotFound(mint_address.to_string()))?;

		let blockhash = self.rpc.get_latest_blockhash().await?;
		let signed = signer
			.sign_token_transfer(
				mint_address,
				&account.token_account.address,
				to,
				amount,
				&blockhash.blockhash,
			)
			.await?;

		let mut transaction = self
			.submit(&signed, blockhash.last_valid_block_height)
			.await?;
		transaction.to = Some(to.to_string());

		let transfer = FullTokenTransfer {
			token_transfer: TokenTransfer {
				transaction_hash: transaction.hash.clone(),
				mint_address: mint_address.to_string(),
				incoming: false,
				amount,
			},
			mint_account: account.mint_account,
		};
		self.record_sent(FullTransaction::new(transaction, vec![transfer]))
	}

	/// Submits an externally signed payload and tracks it as pending.
	///
	/// Without `last_valid_block_height` the transaction is resubmitted until it confirms and is
	/// never expired.
	pub async fn send_raw(
		&self,
		encoded: &str,
		last_valid_block_height: Option<u64>,
	) -> Result<FullTransaction, KitError> {
		let hash = self.rpc.send_transaction(encoded).await?;
		let mut transaction = Transaction::new(hash, chrono::Utc::now().timestamp());
		transaction.from = Some(self.address.clone());
		transaction.pending = true;
		transaction.last_valid_block_height = last_valid_block_height;
		transaction.encoded = Some(encoded.to_string());

		self.record_sent(FullTransaction::new(transaction, vec![]))
	}

	async fn submit(
		&self,
		signed: &SignedTransaction,
		last_valid_block_height: u64,
	) -> Result<Transaction, KitError> {
		let hash = self.rpc.send_transaction(&signed.encoded).await?;
		if hash != signed.signature {
			debug!("Node returned signature {} for {}", hash, signed.signature);
		}

		let mut transaction = Transaction::new(hash, chrono::Utc::now().timestamp());
		transaction.fee = Some(signed.fee);
		transaction.from = Some(self.address.clone());
		transaction.pending = true;
		transaction.last_valid_block_height = Some(last_valid_block_height);
		transaction.encoded = Some(signed.encoded.clone());
		Ok(transaction)
	}

	fn record_sent(&self, transaction: FullTransaction) -> Result<FullTransaction, KitError> {
		self.storage.save_transactions(std::slice::from_ref(&transaction))?;
		info!("Sent transaction {}", transaction.hash());
		self.events.publish(SyncEvent::TransactionsUpdated {
			transactions: vec![transaction.clone()],
		});
		Ok(transaction)
	}
}

fn fill_forward(
	stored: FullTransaction,
	incoming: FullTransaction,
	existing_mints: &mut Vec<String>,
) -> FullTransaction {
	let old = stored.transaction;
	let new = incoming.transaction;

	let transaction = Transaction {
		hash: new.hash,
		block_time: new.block_time,
		fee: new.fee.or(old.fee),
		from: new.from.or(old.from),
		to: new.to.or(old.to),
		amount: new.amount.or(old.amount),
		error: new.error.or(old.error),
		pending: false,
		last_valid_block_height: old.last_valid_block_height,
		retry_count: old.retry_count,
		encoded: old.encoded,
	};

	let token_transfers = if incoming.token_transfers.is_empty() {
		existing_mints.extend(
			stored
				.token_transfers
				.iter()
				.map(|transfer| transfer.token_transfer.mint_address.clone()),
		);
		stored.token_transfers
	} else {
		incoming.token_transfers
	};

	FullTransaction::new(transaction, token_transfers)
}
