//! Types for transfer-history indexer integration

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Watermark source of the native transfer stream.
pub const SOL_TRANSFERS_SOURCE: &str = "solscan.sol";
/// Watermark source of the SPL token transfer stream.
pub const SPL_TRANSFERS_SOURCE: &str = "solscan.spl";

/// One transfer reported by the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransferRecord {
    pub hash: String,
    pub block_time: i64,
    /// Fee in lamports, when reported.
    pub fee: Option<u64>,
    pub kind: TransferKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransferKind {
    /// Native transfer between two addresses, amount in lamports.
    Native { from: String, to: String, amount: u64 },
    /// Balance change of one token account, in the mint's smallest unit.
    Token {
        token_account: String,
        mint: String,
        amount: u64,
        incoming: bool,
    },
}

impl TransferRecord {
    pub fn mint(&self) -> Option<&str> {
        match &self.kind {
            TransferKind::Token { mint, .. } => Some(mint),
            TransferKind::Native { .. } => None,
        }
    }
}

/// Page envelope shared by the Solscan account endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct Page<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// Entry of `account/solTransfers`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SolTransfer {
    pub tx_hash: String,
    pub block_time: i64,
    pub src: String,
    pub dst: String,
    pub lamport: u64,
    #[serde(default)]
    pub fee: Option<u64>,
}

/// Entry of `account/splTransfers`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SplTransfer {
    pub signature: Vec<String>,
    pub block_time: i64,
    /// Token account whose balance changed.
    pub address: String,
    pub token_address: String,
    pub change_type: Option<String>,
    #[serde(deserialize_with = "signed_amount")]
    pub change_amount: i128,
    #[serde(default)]
    pub fee: Option<u64>,
}

/// Accepts both JSON numbers and numeric strings.
fn signed_amount<'de, D>(deserializer: D) -> Result<i128, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let parsed = match &value {
        Value::Number(number) => number
            .as_i64()
            .map(i128::from)
            .or_else(|| number.as_u64().map(i128::from)),
        Value::String(text) => text.trim().parse::<i128>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| serde::de::Error::custom(format!("invalid amount: {}", value)))
}

impl From<SolTransfer> for TransferRecord {
    fn from(transfer: SolTransfer) -> Self {
        TransferRecord {
            hash: transfer.tx_hash,
            block_time: transfer.block_time,
            fee: transfer.fee,
            kind: TransferKind::Native {
                from: transfer.src,
                to: transfer.dst,
                amount: transfer.lamport,
            },
        }
    }
}

impl TryFrom<SplTransfer> for TransferRecord {
    type Error = IndexerError;

    fn try_from(transfer: SplTransfer) -> Result<Self, Self::Error> {
        let hash = transfer
            .signature
            .into_iter()
            .next()
            .ok_or_else(|| IndexerError::Api("SPL transfer without signature".to_string()))?;
        let incoming = match transfer.change_type.as_deref() {
            Some("inc") => true,
            Some("dec") => false,
            _ => transfer.change_amount > 0,
        };
        let amount = u64::try_from(transfer.change_amount.unsigned_abs())
            .map_err(|_| IndexerError::Api(format!("SPL amount out of range in {}", hash)))?;

        Ok(TransferRecord {
            hash,
            block_time: transfer.block_time,
            fee: transfer.fee,
            kind: TransferKind::Token {
                token_account: transfer.address,
                mint: transfer.token_address,
                amount,
                incoming,
            },
        })
    }
}

/// Error types for indexer operations
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Indexer API error: {0}")]
    Api(String),
}
