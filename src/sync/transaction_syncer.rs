use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use itertools::Itertools;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::SyncError;
use super::events::EventBus;
use super::mint_resolver::MintResolver;
use super::state::{SyncDomain, SyncState, SyncStateCell};
use super::transaction_manager::TransactionManager;
use crate::config::KitConfig;
use crate::indexer::{
	SOL_TRANSFERS_SOURCE, SPL_TRANSFERS_SOURCE, TransferIndexer, TransferKind, TransferRecord,
};
use crate::models::{
	FullTokenTransfer, FullTransaction, MintAccount, SyncedBlockTime, TokenAccount, TokenTransfer,
	Transaction,
};
use crate::rpc::{NftClient, RpcClient, SignatureInfo};
use crate::storage::TransactionStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransferStream {
	Native,
	Token,
}

impl TransferStream {
	fn source(self) -> &'static str {
		match self {
			TransferStream::Native => SOL_TRANSFERS_SOURCE,
			TransferStream::Token => SPL_TRANSFERS_SOURCE,
		}
	}
}

/// Reconciles the RPC signature list with the indexer's transfer history.
///
/// Each cycle walks the signatures back to the newest non-pending stored transaction and both
/// indexer streams back to their watermarks, merges everything by hash, and hands the result to
/// the [`TransactionManager`]. Watermarks advance only after the merged batch is persisted, so a
/// failed cycle is retried from the same point.
pub struct TransactionSyncer {
	address: String,
	rpc: Arc<dyn RpcClient>,
	indexer: Arc<dyn TransferIndexer>,
	resolver: MintResolver,
	storage: Arc<dyn TransactionStorage>,
	manager: Arc<TransactionManager>,
	state: SyncStateCell,
	signatures_page_size: usize,
	indexer_page_size: usize,
	indexer_max_pages: usize,
}

impl TransactionSyncer {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		address: impl Into<String>,
		rpc: Arc<dyn RpcClient>,
		indexer: Arc<dyn TransferIndexer>,
		nft: Arc<dyn NftClient>,
		storage: Arc<dyn TransactionStorage>,
		manager: Arc<TransactionManager>,
		events: EventBus,
		config: &KitConfig,
	) -> Self {
		Self {
			address: address.into(),
			resolver: MintResolver::new(rpc.clone(), nft),
			rpc,
			indexer,
			storage,
			manager,
			state: SyncStateCell::new(SyncDomain::Transactions, events),
			signatures_page_size: config.signatures_page_size.max(1),
			indexer_page_size: config.indexer_page_size.max(1),
			indexer_max_pages: config.indexer_max_pages.max(1),
		}
	}

	pub fn state(&self) -> SyncState {
		self.state.get()
	}

	pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
		self.state.subscribe()
	}

	/// Runs one reconciliation cycle unless one is already running.
	pub async fn sync(&self) {
		if !self.state.try_begin() {
			return;
		}

		match self.run().await {
			Ok(count) => {
				if count > 0 {
					info!("Synced {} transactions", count);
				}
				self.state.set(SyncState::Synced);
			}
			Err(e) => {
				warn!("Transaction sync failed: {}", e);
				self.state.set(SyncState::not_synced(e));
			}
		}
	}

	/// Forgets the running cycle after its session was cancelled.
	pub fn reset(&self) {
		self.state.set(SyncState::not_synced(SyncError::NotStarted));
	}

	async fn run(&self) -> Result<usize, SyncError> {
		let until = self
			.storage
			.last_non_pending_transaction()?
			.map(|tx| tx.hash);
		let signatures = self.fetch_signatures(until.as_deref()).await?;

		let (native, token) = futures::try_join!(
			self.fetch_transfers(TransferStream::Native),
			self.fetch_transfers(TransferStream::Token),
		)?;
		debug!(
			"Fetched {} signatures, {} native and {} token transfers",
			signatures.len(),
			native.len(),
			token.len()
		);

		let mints: Vec<String> = token
			.iter()
			.filter_map(|record| record.mint())
			.unique()
			.map(str::to_string)
			.collect();
		let mint_accounts = self.resolver.resolve(&mints).await?;
		let resolved: Vec<MintAccount> = mint_accounts.values().cloned().collect();
		self.storage.save_mint_accounts(&resolved)?;

		let records: Vec<TransferRecord> = native.iter().chain(token.iter()).cloned().collect();
		let transactions = merge(&signatures, &records, &mint_accounts);
		let candidates = build_token_accounts(&token, &mint_accounts);
		let count = transactions.len();

		self.manager.handle(transactions, candidates)?;
		self.advance_watermark(TransferStream::Native, &native)?;
		self.advance_watermark(TransferStream::Token, &token)?;
		Ok(count)
	}

	/// Signatures newer than `until`, newest first, paged with `before`.
	async fn fetch_signatures(&self, until: Option<&str>) -> Result<Vec<SignatureInfo>, SyncError> {
		let mut signatures: Vec<SignatureInfo> = Vec::new();
		let mut before: Option<String> = None;

		loop {
			let page = self
				.rpc
				.get_signatures_for_address(
					&self.address,
					before.as_deref(),
					until,
					self.signatures_page_size,
				)
				.await?;
			let short = page.len() < self.signatures_page_size;
			before = page.last().map(|sig| sig.signature.clone());

			let mut reached_until = false;
			for sig in page {
				if Some(sig.signature.as_str()) == until {
					reached_until = true;
					break;
				}
				signatures.push(sig);
			}

			if short || reached_until || before.is_none() {
				break;
			}
		}

		Ok(signatures)
	}

	/// Records of one indexer stream newer than its watermark.
	async fn fetch_transfers(&self, stream: TransferStream) -> Result<Vec<TransferRecord>, SyncError> {
		let watermark = self.storage.synced_block_time(stream.source())?;
		let mut records: Vec<TransferRecord> = Vec::new();

		for page_index in 0..self.indexer_max_pages {
			let offset = page_index * self.indexer_page_size;
			let page = match stream {
				TransferStream::Native => {
					self.indexer
						.native_transfers(&self.address, self.indexer_page_size, offset)
						.await?
				}
				TransferStream::Token => {
					self.indexer
						.token_transfers(&self.address, self.indexer_page_size, offset)
						.await?
				}
			};
			let short = page.len() < self.indexer_page_size;

			let mut reached_watermark = false;
			for record in page {
				if watermark.as_ref().is_some_and(|w| {
					record.hash == w.hash || record.block_time < w.block_time
				}) {
					reached_watermark = true;
					break;
				}
				records.push(record);
			}

			if reached_watermark || short {
				return Ok(records.into_iter().unique().collect());
			}
		}

		debug!(
			"Stopped {} paging after {} pages",
			stream.source(),
			self.indexer_max_pages
		);
		Ok(records.into_iter().unique().collect())
	}

	/// Moves the stream's watermark to the newest record seen, never backwards.
	fn advance_watermark(&self, stream: TransferStream, records: &[TransferRecord]) -> Result<(), SyncError> {
		let Some(newest) = records.iter().rev().max_by_key(|record| record.block_time) else {
			return Ok(());
		};

		let current = self.storage.synced_block_time(stream.source())?;
		let advances = current.is_none_or(|current| {
			newest.block_time >= current.block_time && newest.hash != current.hash
		});
		if advances {
			debug!(
				"Advancing {} watermark to {} at {}",
				stream.source(),
				newest.hash,
				newest.block_time
			);
			self.storage.save_synced_block_time(SyncedBlockTime {
				source: stream.source().to_string(),
				block_time: newest.block_time,
				hash: newest.hash.clone(),
			})?;
		}
		Ok(())
	}
}

/// Merges signatures and transfer records into one transaction per hash.
///
/// Signatures seed the map with their block time and error, which win over the indexer's.
/// Native amounts come from the first native record of a hash; token transfers are kept only
/// for mints in `mint_accounts`.
pub fn merge(
	signatures: &[SignatureInfo],
	records: &[TransferRecord],
	mint_accounts: &HashMap<String, MintAccount>,
) -> Vec<FullTransaction> {
	let mut merged: BTreeMap<String, FullTransaction> = BTreeMap::new();

	for sig in signatures {
		let Some(block_time) = sig.block_time else {
			continue;
		};
		let mut transaction = Transaction::new(sig.signature.clone(), block_time);
		transaction.error = sig.err.clone();
		merged.insert(sig.signature.clone(), FullTransaction::new(transaction, vec![]));
	}

	let groups = records.iter().into_group_map_by(|record| record.hash.clone());
	for (hash, group) in groups {
		let seeded = merged.get(&hash).map(|full| &full.transaction);
		let block_time = seeded.map_or(group[0].block_time, |tx| tx.block_time);
		let error = seeded.and_then(|tx| tx.error.clone());

		let mut transaction = Transaction::new(hash.clone(), block_time);
		transaction.error = error;
		transaction.fee = group.iter().find_map(|record| record.fee);
		if let Some((from, to, amount)) = group.iter().find_map(|record| match &record.kind {
			TransferKind::Native { from, to, amount } => Some((from, to, *amount)),
			TransferKind::Token { .. } => None,
		}) {
			transaction.from = Some(from.clone());
			transaction.to = Some(to.clone());
			transaction.amount = Some(amount);
		}

		let token_transfers = group
			.iter()
			.filter_map(|record| match &record.kind {
				TransferKind::Token {
					mint,
					amount,
					incoming,
					..
				} => mint_accounts.get(mint).map(|mint_account| FullTokenTransfer {
					token_transfer: TokenTransfer {
						transaction_hash: hash.clone(),
						mint_address: mint.clone(),
						incoming: *incoming,
						amount: *amount,
					},
					mint_account: mint_account.clone(),
				}),
				TransferKind::Native { .. } => None,
			})
			.collect();

		merged.insert(hash, FullTransaction::new(transaction, token_transfers));
	}

	merged.into_values().collect()
}

/// Placeholder token accounts for every resolved mint seen in `records`, unique by address.
pub fn build_token_accounts(
	records: &[TransferRecord],
	mint_accounts: &HashMap<String, MintAccount>,
) -> Vec<TokenAccount> {
	records
		.iter()
		.filter_map(|record| match &record.kind {
			TransferKind::Token {
				token_account,
				mint,
				..
			} => mint_accounts.get(mint).map(|mint_account| TokenAccount {
				address: token_account.clone(),
				mint_address: mint.clone(),
				balance: 0,
				decimals: mint_account.decimals,
			}),
			TransferKind::Native { .. } => None,
		})
		.unique_by(|account| account.address.clone())
		.collect()
}
