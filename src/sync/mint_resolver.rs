use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::models::MintAccount;
use crate::rpc::layout::{MetadataAccount, MintLayout, decode_mint};
use crate::rpc::{NftClient, RpcClient, RpcError, is_token_program};

/// Resolves mint addresses to classified [`MintAccount`]s.
///
/// Mints that are missing, not owned by a token program, or do not decode are left out of the
/// result. A failed account lookup fails the whole resolution.
pub struct MintResolver {
	rpc: Arc<dyn RpcClient>,
	nft: Arc<dyn NftClient>,
}

impl MintResolver {
	pub fn new(rpc: Arc<dyn RpcClient>, nft: Arc<dyn NftClient>) -> Self {
		Self { rpc, nft }
	}

	pub async fn resolve(&self, mints: &[String]) -> Result<HashMap<String, MintAccount>, RpcError> {
		if mints.is_empty() {
			return Ok(HashMap::new());
		}

		let infos = self.rpc.get_multiple_accounts(mints).await?;

		let candidates: Vec<(String, MintLayout)> = mints
			.iter()
			.zip(infos)
			.filter_map(|(mint, info)| {
				let info = info?;
				if !is_token_program(&info.owner) {
					debug!("Mint {} is not owned by a token program", mint);
					return None;
				}
				match decode_mint(&info.data) {
					Ok(layout) => Some((mint.clone(), layout)),
					Err(e) => {
						debug!("Skipping mint {}: {}", mint, e);
						None
					}
				}
			})
			.collect();
		if candidates.is_empty() {
			return Ok(HashMap::new());
		}

		let addresses: Vec<String> = candidates.iter().map(|(mint, _)| mint.clone()).collect();
		let metadata = self.nft.find_metadata(&addresses).await;

		Ok(candidates
			.into_iter()
			.map(|(mint, layout)| {
				let account = mint_account(&mint, &layout, metadata.get(&mint));
				(mint, account)
			})
			.collect())
	}
}

fn is_nft(layout: &MintLayout, metadata: Option<&MetadataAccount>) -> bool {
	if layout.decimals != 0 {
		return false;
	}
	if layout.supply == 1 && layout.mint_authority.is_none() {
		return true;
	}
	metadata
		.and_then(|metadata| metadata.token_standard)
		.is_some_and(|standard| standard.is_nft())
}

fn mint_account(address: &str, layout: &MintLayout, metadata: Option<&MetadataAccount>) -> MintAccount {
	let mut account = MintAccount::new(address, layout.supply, layout.decimals);
	account.is_nft = is_nft(layout, metadata);
	if let Some(metadata) = metadata {
		account.name = Some(metadata.name.clone());
		account.symbol = Some(metadata.symbol.clone());
		account.uri = Some(metadata.uri.clone());
		account.collection_address = metadata.verified_collection().map(str::to_string);
	}
	account
}
