//! Transfer-history indexer integration
//!
//! This module provides the client and types for the third-party indexer that reports native and
//! SPL token transfers for an address. Both streams are paginated with limit/offset and ordered
//! newest first; the caller walks them back to its per-stream watermark.

/// HTTP client for the Solscan account API
mod client;
/// Type definitions for indexer records
mod types;

pub use client::SolscanClient;
pub use types::*;

/// Paginated, newest-first transfer history of an address.
#[async_trait::async_trait]
pub trait TransferIndexer: Send + Sync {
	async fn native_transfers(
		&self,
		address: &str,
		limit: usize,
		offset: usize,
	) -> Result<Vec<TransferRecord>, IndexerError>;

	async fn token_transfers(
		&self,
		address: &str,
		limit: usize,
		offset: usize,
	) -> Result<Vec<TransferRecord>, IndexerError>;
}
