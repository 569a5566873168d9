use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use super::layout::{METADATA_MINT_OFFSET, MetadataAccount, decode_metadata};
use super::{METADATA_PROGRAM_ID, RpcClient};

/// Source of token metadata used to classify mints.
#[async_trait]
pub trait NftClient: Send + Sync {
	/// Metadata for every mint that has one. Mints without metadata, or whose lookup failed, are
	/// absent from the result.
	async fn find_metadata(&self, mints: &[String]) -> HashMap<String, MetadataAccount>;
}

/// Looks up metadata accounts through `getProgramAccounts`, filtering on the mint field.
pub struct RpcNftClient {
	rpc: Arc<dyn RpcClient>,
}

impl RpcNftClient {
	pub fn new(rpc: Arc<dyn RpcClient>) -> Self {
		Self { rpc }
	}

	async fn metadata_for(&self, mint: &str) -> Option<MetadataAccount> {
		let accounts = match self
			.rpc
			.get_program_accounts_by_memcmp(METADATA_PROGRAM_ID, METADATA_MINT_OFFSET, mint)
			.await
		{
			Ok(accounts) => accounts,
			Err(e) => {
				warn!("Metadata lookup for mint {} failed: {}", mint, e);
				return None;
			}
		};

		accounts.into_iter().find_map(|(pubkey, account)| {
			match decode_metadata(&account.data) {
				Ok(metadata) if metadata.mint == mint => Some(metadata),
				Ok(_) => None,
				Err(e) => {
					debug!("Skipping metadata account {}: {}", pubkey, e);
					None
				}
			}
		})
	}
}

#[async_trait]
impl NftClient for RpcNftClient {
	async fn find_metadata(&self, mints: &[String]) -> HashMap<String, MetadataAccount> {
		let lookups = mints.iter().map(|mint| async move {
			self.metadata_for(mint)
				.await
				.map(|metadata| (mint.clone(), metadata))
		});

		join_all(lookups).await.into_iter().flatten().collect()
	}
}
