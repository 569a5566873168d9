use serde::{Deserialize, Serialize};

use super::MintAccount;

/// Error text recorded on a pending transaction whose blockhash validity window passed.
pub const EXPIRED_ERROR: &str = "expired";

/// A transaction touching the tracked address.
///
/// `hash` is the primary key. A transaction leaves the pending state exactly once, either
/// confirmed (`error == None`) or failed (`error` set), and after that only `error` may change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
	pub hash: String,
	/// Seconds since the unix epoch.
	pub block_time: i64,
	/// Fee in lamports.
	pub fee: Option<u64>,
	pub from: Option<String>,
	pub to: Option<String>,
	/// Native amount in lamports.
	pub amount: Option<u64>,
	pub error: Option<String>,
	#[serde(default)]
	pub pending: bool,
	pub last_valid_block_height: Option<u64>,
	#[serde(default)]
	pub retry_count: u32,
	/// Signed payload (base64) kept for resubmission while pending.
	pub encoded: Option<String>,
}

impl Transaction {
	/// A confirmed transaction header with only the identifying fields set.
	pub fn new(hash: impl Into<String>, block_time: i64) -> Self {
		Self {
			hash: hash.into(),
			block_time,
			fee: None,
			from: None,
			to: None,
			amount: None,
			error: None,
			pending: false,
			last_valid_block_height: None,
			retry_count: 0,
			encoded: None,
		}
	}

	pub fn is_expired(&self) -> bool {
		!self.pending && self.error.as_deref() == Some(EXPIRED_ERROR)
	}
}

/// One token leg of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
	pub transaction_hash: String,
	pub mint_address: String,
	pub incoming: bool,
	/// Magnitude in the mint's smallest unit.
	pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullTokenTransfer {
	pub token_transfer: TokenTransfer,
	pub mint_account: MintAccount,
}

/// A transaction together with all of its token transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullTransaction {
	pub transaction: Transaction,
	pub token_transfers: Vec<FullTokenTransfer>,
}

impl FullTransaction {
	pub fn new(transaction: Transaction, token_transfers: Vec<FullTokenTransfer>) -> Self {
		Self {
			transaction,
			token_transfers,
		}
	}

	pub fn hash(&self) -> &str {
		&self.transaction.hash
	}

	/// Whether this transaction moved native tokens to or from `address`.
	///
	/// With `incoming == None` any native amount matches.
	pub fn has_native_transfer(&self, address: &str, incoming: Option<bool>) -> bool {
		let tx = &self.transaction;
		if tx.amount.is_none() {
			return false;
		}
		match incoming {
			None => true,
			Some(true) => tx.to.as_deref() == Some(address),
			Some(false) => tx.from.as_deref() == Some(address),
		}
	}

	pub fn has_token_transfer(&self, mint_address: Option<&str>, incoming: Option<bool>) -> bool {
		self.token_transfers.iter().any(|transfer| {
			let transfer = &transfer.token_transfer;
			mint_address.is_none_or(|mint| transfer.mint_address == mint)
				&& incoming.is_none_or(|incoming| transfer.incoming == incoming)
		})
	}
}

/// Per-source ingestion watermark.
///
/// Records older than `block_time`, or the record whose hash equals `hash`, have already been
/// ingested from `source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedBlockTime {
	pub source: String,
	pub block_time: i64,
	pub hash: String,
}

/// Which slice of the history a query or stream selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionFilter {
	All,
	Native,
	Token { mint_address: String },
}

impl TransactionFilter {
	pub fn matches(&self, tx: &FullTransaction, address: &str, incoming: Option<bool>) -> bool {
		match self {
			TransactionFilter::All => {
				incoming.is_none()
					|| tx.has_native_transfer(address, incoming)
					|| tx.has_token_transfer(None, incoming)
			}
			TransactionFilter::Native => tx.has_native_transfer(address, incoming),
			TransactionFilter::Token { mint_address } => {
				tx.has_token_transfer(Some(mint_address), incoming)
			}
		}
	}
}

/// Cursor-paginated history query, ordered by (block_time desc, hash desc).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionQuery {
	pub filter: TransactionFilter,
	pub incoming: Option<bool>,
	/// Return only transactions strictly after this one in the ordering.
	pub from_hash: Option<String>,
	pub limit: Option<usize>,
}

impl Default for TransactionQuery {
	fn default() -> Self {
		Self {
			filter: TransactionFilter::All,
			incoming: None,
			from_hash: None,
			limit: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn mint(address: &str) -> MintAccount {
		MintAccount::new(address, 1_000_000, 6)
	}

	fn token_tx(hash: &str, mint_address: &str, incoming: bool) -> FullTransaction {
		FullTransaction::new(
			Transaction::new(hash, 10),
			vec![FullTokenTransfer {
				token_transfer: TokenTransfer {
					transaction_hash: hash.to_string(),
					mint_address: mint_address.to_string(),
					incoming,
					amount: 5,
				},
				mint_account: mint(mint_address),
			}],
		)
	}

	#[test]
	fn native_direction_follows_tracked_address() {
		let mut tx = Transaction::new("A", 1);
		tx.from = Some("me".into());
		tx.to = Some("you".into());
		tx.amount = Some(10);
		let full = FullTransaction::new(tx, vec![]);

		assert!(full.has_native_transfer("me", Some(false)));
		assert!(!full.has_native_transfer("me", Some(true)));
		assert!(full.has_native_transfer("me", None));
	}

	#[test]
	fn token_filter_checks_mint_and_direction() {
		let tx = token_tx("B", "M1", true);
		let filter = TransactionFilter::Token {
			mint_address: "M1".into(),
		};

		assert!(filter.matches(&tx, "me", Some(true)));
		assert!(!filter.matches(&tx, "me", Some(false)));
		assert!(!TransactionFilter::Native.matches(&tx, "me", None));
		assert!(TransactionFilter::All.matches(&tx, "me", Some(true)));
	}
}
