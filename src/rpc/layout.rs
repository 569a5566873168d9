use borsh::BorshDeserialize;

use super::RpcError;

/// Size of the base mint layout shared by Token and Token-2022.
pub const MINT_LEN: usize = 82;
/// Offset of the mint field inside a metadata account.
pub const METADATA_MINT_OFFSET: usize = 33;
const TOKEN_ACCOUNT_PREFIX_LEN: usize = 72;

#[derive(BorshDeserialize)]
struct RawMint {
	mint_authority_tag: u32,
	mint_authority: [u8; 32],
	supply: u64,
	decimals: u8,
	is_initialized: bool,
	freeze_authority_tag: u32,
	freeze_authority: [u8; 32],
}

#[derive(BorshDeserialize)]
struct RawTokenAccountPrefix {
	mint: [u8; 32],
	owner: [u8; 32],
	amount: u64,
}

#[derive(BorshDeserialize)]
struct RawCreator {
	_address: [u8; 32],
	_verified: bool,
	_share: u8,
}

#[derive(BorshDeserialize)]
struct RawMetadataHead {
	_key: u8,
	_update_authority: [u8; 32],
	mint: [u8; 32],
	name: String,
	symbol: String,
	uri: String,
	_seller_fee_basis_points: u16,
	_creators: Option<Vec<RawCreator>>,
	_primary_sale_happened: bool,
	_is_mutable: bool,
}

#[derive(BorshDeserialize)]
struct RawCollection {
	verified: bool,
	key: [u8; 32],
}

fn encode_key(bytes: &[u8; 32]) -> String {
	bs58::encode(bytes).into_string()
}

fn coption(tag: u32, key: &[u8; 32]) -> Option<String> {
	(tag == 1).then(|| encode_key(key))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintLayout {
	pub mint_authority: Option<String>,
	pub supply: u64,
	pub decimals: u8,
	pub is_initialized: bool,
	pub freeze_authority: Option<String>,
}

pub fn decode_mint(data: &[u8]) -> Result<MintLayout, RpcError> {
	if data.len() < MINT_LEN {
		return Err(RpcError::Decode(format!(
			"Mint account too short: {} bytes",
			data.len()
		)));
	}
	let raw = RawMint::deserialize(&mut &data[..MINT_LEN])
		.map_err(|e| RpcError::Decode(format!("Invalid mint layout: {}", e)))?;

	Ok(MintLayout {
		mint_authority: coption(raw.mint_authority_tag, &raw.mint_authority),
		supply: raw.supply,
		decimals: raw.decimals,
		is_initialized: raw.is_initialized,
		freeze_authority: coption(raw.freeze_authority_tag, &raw.freeze_authority),
	})
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAccountLayout {
	pub mint: String,
	pub owner: String,
	pub amount: u64,
}

pub fn decode_token_account(data: &[u8]) -> Result<TokenAccountLayout, RpcError> {
	if data.len() < TOKEN_ACCOUNT_PREFIX_LEN {
		return Err(RpcError::Decode(format!(
			"Token account too short: {} bytes",
			data.len()
		)));
	}
	let raw = RawTokenAccountPrefix::deserialize(&mut &data[..TOKEN_ACCOUNT_PREFIX_LEN])
		.map_err(|e| RpcError::Decode(format!("Invalid token account layout: {}", e)))?;

	Ok(TokenAccountLayout {
		mint: encode_key(&raw.mint),
		owner: encode_key(&raw.owner),
		amount: raw.amount,
	})
}

/// Token standard recorded in a metadata account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStandard {
	NonFungible,
	FungibleAsset,
	Fungible,
	NonFungibleEdition,
	ProgrammableNonFungible,
	ProgrammableNonFungibleEdition,
}

impl TokenStandard {
	fn from_tag(tag: u8) -> Option<Self> {
		match tag {
			0 => Some(Self::NonFungible),
			1 => Some(Self::FungibleAsset),
			2 => Some(Self::Fungible),
			3 => Some(Self::NonFungibleEdition),
			4 => Some(Self::ProgrammableNonFungible),
			5 => Some(Self::ProgrammableNonFungibleEdition),
			_ => None,
		}
	}

	/// Standards that mark a mint as an NFT.
	pub fn is_nft(self) -> bool {
		matches!(
			self,
			Self::NonFungible | Self::FungibleAsset | Self::NonFungibleEdition
		)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
	pub verified: bool,
	pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataAccount {
	pub mint: String,
	pub name: String,
	pub symbol: String,
	pub uri: String,
	pub token_standard: Option<TokenStandard>,
	pub collection: Option<Collection>,
}

impl MetadataAccount {
	pub fn verified_collection(&self) -> Option<&str> {
		self.collection
			.as_ref()
			.filter(|collection| collection.verified)
			.map(|collection| collection.key.as_str())
	}
}

fn trim_padding(value: String) -> String {
	value.trim_end_matches('\0').to_string()
}

/// Decodes a token metadata account.
///
/// Older accounts end after `is_mutable`; the edition nonce, token standard and collection are
/// read only when bytes remain and are treated as absent when they do not parse.
pub fn decode_metadata(data: &[u8]) -> Result<MetadataAccount, RpcError> {
	let mut reader = data;
	let head = RawMetadataHead::deserialize(&mut reader)
		.map_err(|e| RpcError::Decode(format!("Invalid metadata layout: {}", e)))?;

	let mut token_standard = None;
	let mut collection = None;
	if !reader.is_empty() {
		let tail = (|| -> borsh::io::Result<(Option<u8>, Option<RawCollection>)> {
			let _edition_nonce = Option::<u8>::deserialize(&mut reader)?;
			let standard = Option::<u8>::deserialize(&mut reader)?;
			let collection = Option::<RawCollection>::deserialize(&mut reader)?;
			Ok((standard, collection))
		})();
		if let Ok((standard, raw_collection)) = tail {
			token_standard = standard.and_then(TokenStandard::from_tag);
			collection = raw_collection.map(|raw| Collection {
				verified: raw.verified,
				key: encode_key(&raw.key),
			});
		}
	}

	Ok(MetadataAccount {
		mint: encode_key(&head.mint),
		name: trim_padding(head.name),
		symbol: trim_padding(head.symbol),
		uri: trim_padding(head.uri),
		token_standard,
		collection,
	})
}
