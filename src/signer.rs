//! Transaction signing seam.
//!
//! The kit never holds keys. Callers hand a [`TransactionSigner`] to the send operations, which
//! fetch a recent blockhash, let the signer build and sign the transaction, and submit the
//! returned payload.

use async_trait::async_trait;

use crate::kit::KitError;

/// A signed transaction ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
	/// First signature, base58.
	pub signature: String,
	/// Serialized transaction, base64.
	pub encoded: String,
	/// Fee in lamports.
	pub fee: u64,
}

#[async_trait]
pub trait TransactionSigner: Send + Sync {
	async fn sign_native_transfer(
		&self,
		from: &str,
		to: &str,
		amount: u64,
		blockhash: &str,
	) -> Result<SignedTransaction, KitError>;

	async fn sign_token_transfer(
		&self,
		mint: &str,
		source_token_account: &str,
		to: &str,
		amount: u64,
		blockhash: &str,
	) -> Result<SignedTransaction, KitError>;
}
