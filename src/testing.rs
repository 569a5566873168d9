//! In-crate fakes for the collaborator traits.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::indexer::{IndexerError, TransferIndexer, TransferKind, TransferRecord};
use crate::kit::KitError;
use crate::rpc::layout::MetadataAccount;
use crate::signer::{SignedTransaction, TransactionSigner};
use crate::rpc::{
	AccountInfo, LatestBlockhash, NftClient, RpcClient, RpcError, SignatureInfo, TransactionStatus,
};

pub fn key(seed: u8) -> String {
	bs58::encode([seed; 32]).into_string()
}

fn rpc_failure(message: &str) -> RpcError {
	RpcError::Rpc {
		code: -32000,
		message: message.to_string(),
	}
}

#[derive(Default)]
struct RpcState {
	block_heights: VecDeque<Option<u64>>,
	balance: Option<u64>,
	accounts: HashMap<String, AccountInfo>,
	fail_multiple_accounts: bool,
	signatures: Vec<SignatureInfo>,
	statuses: HashMap<String, TransactionStatus>,
	sent: Vec<String>,
	program_accounts: HashMap<String, Vec<(String, AccountInfo)>>,
}

/// Scriptable RPC node. Block heights are consumed in order and the last one repeats.
#[derive(Default)]
pub struct FakeRpc {
	state: Mutex<RpcState>,
	balance_delay: Mutex<Option<Duration>>,
	status_delay: Mutex<Option<Duration>>,
	accounts_delay: Mutex<Option<Duration>>,
	block_height_calls: AtomicUsize,
	balance_calls: AtomicUsize,
	balance_in_flight: AtomicUsize,
	balance_max_in_flight: AtomicUsize,
	multiple_accounts_calls: AtomicUsize,
	signature_calls: AtomicUsize,
}

impl FakeRpc {
	pub fn push_block_heights(&self, heights: &[u64]) {
		let mut state = self.state.lock().unwrap();
		state.block_heights.extend(heights.iter().map(|h| Some(*h)));
	}

	pub fn push_block_height_error(&self) {
		self.state.lock().unwrap().block_heights.push_back(None);
	}

	pub fn block_height_calls(&self) -> usize {
		self.block_height_calls.load(Ordering::SeqCst)
	}

	pub fn set_balance(&self, balance: Option<u64>) {
		self.state.lock().unwrap().balance = balance;
	}

	pub fn set_balance_delay(&self, delay: Duration) {
		*self.balance_delay.lock().unwrap() = Some(delay);
	}

	pub fn balance_calls(&self) -> usize {
		self.balance_calls.load(Ordering::SeqCst)
	}

	pub fn balance_max_in_flight(&self) -> usize {
		self.balance_max_in_flight.load(Ordering::SeqCst)
	}

	pub fn set_account(&self, address: &str, account: AccountInfo) {
		self.state
			.lock()
			.unwrap()
			.accounts
			.insert(address.to_string(), account);
	}

	pub fn remove_account(&self, address: &str) {
		self.state.lock().unwrap().accounts.remove(address);
	}

	pub fn set_accounts_delay(&self, delay: Duration) {
		*self.accounts_delay.lock().unwrap() = Some(delay);
	}

	pub fn fail_multiple_accounts(&self, fail: bool) {
		self.state.lock().unwrap().fail_multiple_accounts = fail;
	}

	pub fn multiple_accounts_calls(&self) -> usize {
		self.multiple_accounts_calls.load(Ordering::SeqCst)
	}

	/// Signatures, newest first.
	pub fn set_signatures(&self, signatures: Vec<SignatureInfo>) {
		self.state.lock().unwrap().signatures = signatures;
	}

	pub fn signature_calls(&self) -> usize {
		self.signature_calls.load(Ordering::SeqCst)
	}

	pub fn set_status(&self, signature: &str, status: TransactionStatus) {
		self.state
			.lock()
			.unwrap()
			.statuses
			.insert(signature.to_string(), status);
	}

	pub fn set_status_delay(&self, delay: Duration) {
		*self.status_delay.lock().unwrap() = Some(delay);
	}

	pub fn sent(&self) -> Vec<String> {
		self.state.lock().unwrap().sent.clone()
	}

	pub fn set_program_accounts(&self, mint: &str, accounts: Vec<(String, AccountInfo)>) {
		self.state
			.lock()
			.unwrap()
			.program_accounts
			.insert(mint.to_string(), accounts);
	}
}

#[async_trait]
impl RpcClient for FakeRpc {
	async fn get_block_height(&self) -> Result<u64, RpcError> {
		self.block_height_calls.fetch_add(1, Ordering::SeqCst);
		let mut state = self.state.lock().unwrap();
		let next = if state.block_heights.len() > 1 {
			state.block_heights.pop_front().flatten()
		} else {
			state.block_heights.front().copied().flatten()
		};
		next.ok_or_else(|| rpc_failure("block height unavailable"))
	}

	async fn get_balance(&self, _address: &str) -> Result<u64, RpcError> {
		self.balance_calls.fetch_add(1, Ordering::SeqCst);
		let in_flight = self.balance_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.balance_max_in_flight
			.fetch_max(in_flight, Ordering::SeqCst);

		let delay = *self.balance_delay.lock().unwrap();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}

		self.balance_in_flight.fetch_sub(1, Ordering::SeqCst);
		let balance = self.state.lock().unwrap().balance;
		balance.ok_or_else(|| rpc_failure("balance unavailable"))
	}

	async fn get_multiple_accounts(
		&self,
		addresses: &[String],
	) -> Result<Vec<Option<AccountInfo>>, RpcError> {
		self.multiple_accounts_calls.fetch_add(1, Ordering::SeqCst);
		let delay = *self.accounts_delay.lock().unwrap();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}

		let state = self.state.lock().unwrap();
		if state.fail_multiple_accounts {
			return Err(rpc_failure("getMultipleAccounts failed"));
		}
		Ok(addresses
			.iter()
			.map(|address| state.accounts.get(address).cloned())
			.collect())
	}

	async fn get_signatures_for_address(
		&self,
		_address: &str,
		before: Option<&str>,
		until: Option<&str>,
		limit: usize,
	) -> Result<Vec<SignatureInfo>, RpcError> {
		self.signature_calls.fetch_add(1, Ordering::SeqCst);
		let state = self.state.lock().unwrap();
		let start = match before {
			Some(before) => state
				.signatures
				.iter()
				.position(|sig| sig.signature == before)
				.map_or(state.signatures.len(), |index| index + 1),
			None => 0,
		};
		Ok(state.signatures[start..]
			.iter()
			.take_while(|sig| Some(sig.signature.as_str()) != until)
			.take(limit)
			.cloned()
			.collect())
	}

	async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, RpcError> {
		Ok(LatestBlockhash {
			blockhash: key(42),
			last_valid_block_height: 250,
		})
	}

	async fn send_transaction(&self, encoded: &str) -> Result<String, RpcError> {
		let mut state = self.state.lock().unwrap();
		state.sent.push(encoded.to_string());
		Ok(format!("sig-{}", state.sent.len()))
	}

	async fn get_transaction_status(
		&self,
		signature: &str,
	) -> Result<Option<TransactionStatus>, RpcError> {
		let delay = *self.status_delay.lock().unwrap();
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}
		Ok(self.state.lock().unwrap().statuses.get(signature).cloned())
	}

	async fn get_program_accounts_by_memcmp(
		&self,
		_program: &str,
		_offset: usize,
		bytes: &str,
	) -> Result<Vec<(String, AccountInfo)>, RpcError> {
		let state = self.state.lock().unwrap();
		match state.program_accounts.get(bytes) {
			Some(accounts) => Ok(accounts.clone()),
			None => Err(rpc_failure("no program accounts")),
		}
	}
}

/// Indexer serving fixed newest-first lists with limit/offset paging.
#[derive(Default)]
pub struct FakeIndexer {
	native: Mutex<Vec<TransferRecord>>,
	token: Mutex<Vec<TransferRecord>>,
	calls: AtomicUsize,
	on_native_records: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl FakeIndexer {
	pub fn set_native(&self, records: Vec<TransferRecord>) {
		*self.native.lock().unwrap() = records;
	}

	pub fn set_token(&self, records: Vec<TransferRecord>) {
		*self.token.lock().unwrap() = records;
	}

	pub fn calls(&self) -> usize {
		self.calls.load(Ordering::SeqCst)
	}

	/// Runs `hook` whenever a non-empty page of native records is served.
	pub fn on_native_records(&self, hook: impl Fn() + Send + Sync + 'static) {
		*self.on_native_records.lock().unwrap() = Some(Box::new(hook));
	}

	fn page(records: &[TransferRecord], limit: usize, offset: usize) -> Vec<TransferRecord> {
		records.iter().skip(offset).take(limit).cloned().collect()
	}
}

#[async_trait]
impl TransferIndexer for FakeIndexer {
	async fn native_transfers(
		&self,
		_address: &str,
		limit: usize,
		offset: usize,
	) -> Result<Vec<TransferRecord>, IndexerError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		let page = Self::page(&self.native.lock().unwrap(), limit, offset);
		if !page.is_empty() {
			if let Some(hook) = self.on_native_records.lock().unwrap().as_ref() {
				hook();
			}
		}
		Ok(page)
	}

	async fn token_transfers(
		&self,
		_address: &str,
		limit: usize,
		offset: usize,
	) -> Result<Vec<TransferRecord>, IndexerError> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		Ok(Self::page(&self.token.lock().unwrap(), limit, offset))
	}
}

#[derive(Default)]
pub struct FakeNft {
	metadata: Mutex<HashMap<String, MetadataAccount>>,
}

impl FakeNft {
	pub fn insert(&self, metadata: MetadataAccount) {
		self.metadata
			.lock()
			.unwrap()
			.insert(metadata.mint.clone(), metadata);
	}
}

#[async_trait]
impl NftClient for FakeNft {
	async fn find_metadata(&self, mints: &[String]) -> HashMap<String, MetadataAccount> {
		let metadata = self.metadata.lock().unwrap();
		mints
			.iter()
			.filter_map(|mint| metadata.get(mint).map(|m| (mint.clone(), m.clone())))
			.collect()
	}
}

/// Signer producing deterministic payloads.
pub struct FakeSigner;

#[async_trait]
impl TransactionSigner for FakeSigner {
	async fn sign_native_transfer(
		&self,
		from: &str,
		to: &str,
		amount: u64,
		blockhash: &str,
	) -> Result<SignedTransaction, KitError> {
		Ok(SignedTransaction {
			signature: format!("native-{}-{}", to, amount),
			encoded: format!("{}:{}:{}:{}", from, to, amount, blockhash),
			fee: 5000,
		})
	}

	async fn sign_token_transfer(
		&self,
		mint: &str,
		source_token_account: &str,
		to: &str,
		amount: u64,
		blockhash: &str,
	) -> Result<SignedTransaction, KitError> {
		Ok(SignedTransaction {
			signature: format!("token-{}-{}", mint, amount),
			encoded: format!("{}:{}:{}:{}:{}", mint, source_token_account, to, amount, blockhash),
			fee: 5000,
		})
	}
}

pub fn native_record(hash: &str, block_time: i64, from: &str, to: &str, amount: u64) -> TransferRecord {
	TransferRecord {
		hash: hash.to_string(),
		block_time,
		fee: Some(5000),
		kind: TransferKind::Native {
			from: from.to_string(),
			to: to.to_string(),
			amount,
		},
	}
}

pub fn token_record(
	hash: &str,
	block_time: i64,
	token_account: &str,
	mint: &str,
	amount: u64,
	incoming: bool,
) -> TransferRecord {
	TransferRecord {
		hash: hash.to_string(),
		block_time,
		fee: Some(5000),
		kind: TransferKind::Token {
			token_account: token_account.to_string(),
			mint: mint.to_string(),
			amount,
			incoming,
		},
	}
}

pub fn signature(signature: &str, block_time: Option<i64>) -> SignatureInfo {
	SignatureInfo {
		signature: signature.to_string(),
		block_time,
		err: None,
	}
}
