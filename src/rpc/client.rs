//! JSON-RPC 2.0 client for a Solana node.
//!
//! Every call goes through [`HttpRpcClient::call`], which wraps the method and params in a request
//! envelope, posts it and unwraps either the `result` or the `error` object. Account data is always
//! requested base64 encoded and decoded here, so callers only ever see raw bytes.

use super::*;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// `getMultipleAccounts` accepts at most this many keys per request.
const MAX_MULTIPLE_ACCOUNTS: usize = 100;

#[derive(Deserialize)]
struct RpcResponse<T> {
	result: Option<T>,
	error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
	code: i64,
	message: String,
}

#[derive(Deserialize)]
struct WithContext<T> {
	value: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UiAccount {
	lamports: u64,
	owner: String,
	/// `[payload, "base64"]`
	data: (String, String),
	executable: bool,
}

#[derive(Deserialize)]
struct KeyedUiAccount {
	pubkey: String,
	account: UiAccount,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UiSignature {
	signature: String,
	block_time: Option<i64>,
	err: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UiBlockhash {
	blockhash: String,
	last_valid_block_height: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UiSignatureStatus {
	err: Option<Value>,
	confirmation_status: Option<String>,
}

impl UiAccount {
	fn decode(self) -> Result<AccountInfo, RpcError> {
		let data = STANDARD
			.decode(self.data.0.as_bytes())
			.map_err(|e| RpcError::Decode(format!("Invalid base64 account data: {}", e)))?;
		Ok(AccountInfo {
			lamports: self.lamports,
			owner: self.owner,
			data,
			executable: self.executable,
		})
	}
}

fn render_err(err: Option<Value>) -> Option<String> {
	err.filter(|value| !value.is_null()).map(|value| value.to_string())
}

/// Solana JSON-RPC client over HTTP
#[derive(Clone)]
pub struct HttpRpcClient {
	http_client: Client,
	rpc_url: String,
}

impl HttpRpcClient {
	/// Create a new RPC client.
	///
	/// # Arguments
	/// * `rpc_url` - The HTTP endpoint of the node.
	/// * `timeout` - Per-request timeout.
	pub fn new(rpc_url: String, timeout: Duration) -> Result<Self, RpcError> {
		let http_client = Client::builder().timeout(timeout).build()?;
		Ok(Self {
			http_client,
			rpc_url,
		})
	}

	/// Execute one JSON-RPC call and deserialize its `result`.
	///
	/// # Errors
	/// Returns `RpcError::Rpc` when the node answers with an error object and `RpcError::NoData`
	/// when the response carries neither a result nor an error.
	pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
		let request_body = json!({
			"jsonrpc": "2.0",
			"id": rand::random::<u32>(),
			"method": method,
			"params": params,
		});

		debug!("RPC request {}", method);
		let response = self
			.http_client
			.post(&self.rpc_url)
			.header("Content-Type", "application/json")
			.json(&request_body)
			.send()
			.await?
			.error_for_status()?;

		let response: RpcResponse<T> = response.json().await?;
		if let Some(error) = response.error {
			return Err(RpcError::Rpc {
				code: error.code,
				message: error.message,
			});
		}
		response.result.ok_or(RpcError::NoData)
	}
}

#[async_trait]
impl RpcClient for HttpRpcClient {
	async fn get_block_height(&self) -> Result<u64, RpcError> {
		self.call("getBlockHeight", json!([])).await
	}

	async fn get_balance(&self, address: &str) -> Result<u64, RpcError> {
		let balance: WithContext<u64> = self.call("getBalance", json!([address])).await?;
		Ok(balance.value)
	}

	async fn get_multiple_accounts(
		&self,
		addresses: &[String],
	) -> Result<Vec<Option<AccountInfo>>, RpcError> {
		let mut accounts = Vec::with_capacity(addresses.len());
		for chunk in addresses.chunks(MAX_MULTIPLE_ACCOUNTS) {
			let page: WithContext<Vec<Option<UiAccount>>> = self
				.call(
					"getMultipleAccounts",
					json!([chunk, { "encoding": "base64" }]),
				)
				.await?;
			if page.value.len() != chunk.len() {
				return Err(RpcError::Decode(format!(
					"Expected {} accounts, got {}",
					chunk.len(),
					page.value.len()
				)));
			}
			for account in page.value {
				accounts.push(account.map(UiAccount::decode).transpose()?);
			}
		}
		Ok(accounts)
	}

	async fn get_signatures_for_address(
		&self,
		address: &str,
		before: Option<&str>,
		until: Option<&str>,
		limit: usize,
	) -> Result<Vec<SignatureInfo>, RpcError> {
		let mut config = json!({ "limit": limit });
		if let Some(before) = before {
			config["before"] = json!(before);
		}
		if let Some(until) = until {
			config["until"] = json!(until);
		}

		let signatures: Vec<UiSignature> = self
			.call("getSignaturesForAddress", json!([address, config]))
			.await?;
		Ok(signatures
			.into_iter()
			.map(|sig| SignatureInfo {
				signature: sig.signature,
				block_time: sig.block_time,
				err: render_err(sig.err),
			})
			.collect())
	}

	async fn get_latest_blockhash(&self) -> Result<LatestBlockhash, RpcError> {
		let blockhash: WithContext<UiBlockhash> = self
			.call("getLatestBlockhash", json!([{ "commitment": "confirmed" }]))
			.await?;
		Ok(LatestBlockhash {
			blockhash: blockhash.value.blockhash,
			last_valid_block_height: blockhash.value.last_valid_block_height,
		})
	}

	async fn send_transaction(&self, encoded: &str) -> Result<String, RpcError> {
		self.call(
			"sendTransaction",
			json!([encoded, {
				"encoding": "base64",
				"preflightCommitment": "confirmed",
				"maxRetries": 0,
			}]),
		)
		.await
	}

	async fn get_transaction_status(
		&self,
		signature: &str,
	) -> Result<Option<TransactionStatus>, RpcError> {
		let statuses: WithContext<Vec<Option<UiSignatureStatus>>> = self
			.call(
				"getSignatureStatuses",
				json!([[signature], { "searchTransactionHistory": true }]),
			)
			.await?;

		let status = statuses.value.into_iter().next().flatten();
		Ok(status
			.filter(|status| status.confirmation_status.as_deref() != Some("processed"))
			.map(|status| TransactionStatus {
				err: render_err(status.err),
			}))
	}

	async fn get_program_accounts_by_memcmp(
		&self,
		program: &str,
		offset: usize,
		bytes: &str,
	) -> Result<Vec<(String, AccountInfo)>, RpcError> {
		let accounts: Vec<KeyedUiAccount> = self
			.call(
				"getProgramAccounts",
				json!([program, {
					"encoding": "base64",
					"filters": [{ "memcmp": { "offset": offset, "bytes": bytes } }],
				}]),
			)
			.await?;

		accounts
			.into_iter()
			.map(|keyed| Ok((keyed.pubkey, keyed.account.decode()?)))
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn decodes_base64_account_payload() {
		let raw = json!({
			"lamports": 2039280,
			"owner": TOKEN_PROGRAM_ID,
			"data": ["AQID", "base64"],
			"executable": false,
			"rentEpoch": 361
		});
		let account: UiAccount = serde_json::from_value(raw).unwrap();
		let account = account.decode().unwrap();
		assert_eq!(account.data, vec![1, 2, 3]);
		assert_eq!(account.owner, TOKEN_PROGRAM_ID);
	}

	#[test]
	fn error_object_is_surfaced() {
		let raw = json!({
			"jsonrpc": "2.0",
			"id": 1,
			"error": { "code": -32602, "message": "Invalid param" }
		});
		let response: RpcResponse<u64> = serde_json::from_value(raw).unwrap();
		let error = response.error.unwrap();
		assert_eq!(error.code, -32602);
		assert!(response.result.is_none());
	}

	#[test]
	fn null_error_is_success() {
		assert_eq!(render_err(Some(Value::Null)), None);
		assert_eq!(
			render_err(Some(json!({ "InstructionError": [0, "Custom"] }))).as_deref(),
			Some(r#"{"InstructionError":[0,"Custom"]}"#)
		);
	}
}
