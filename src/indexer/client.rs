//! HTTP client for the Solscan public account API.
//!
//! This module provides an async client for the transfer-history endpoints the transaction syncer
//! consumes. Requests are retried with exponential backoff on rate limiting, server errors and
//! transport failures; any other failure is returned immediately.

use super::TransferIndexer;
use super::types::*;
use async_trait::async_trait;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder, future::retry};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Solscan transfer-history client
#[derive(Clone)]
pub struct SolscanClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// Base URL of the public API, without a trailing slash.
	base_url: String,
	/// Optional API token sent as the `token` header.
	api_key: Option<String>,
	/// Upper bound on the time spent retrying one request.
	max_retry_elapsed: Duration,
}

impl SolscanClient {
	/// Create a new Solscan client.
	///
	/// # Arguments
	/// * `base_url` - The API root, e.g. `https://public-api.solscan.io`.
	/// * `api_key` - Optional API token.
	/// * `timeout` - Per-request timeout; also bounds the total retry time.
	///
	/// # Returns
	/// A new `SolscanClient`, or an `IndexerError` if the HTTP client cannot be built.
	pub fn new(
		base_url: String,
		api_key: Option<String>,
		timeout: Duration,
	) -> Result<Self, IndexerError> {
		let http_client = Client::builder().timeout(timeout).build()?;

		Ok(Self {
			http_client,
			base_url: base_url.trim_end_matches('/').to_string(),
			api_key,
			max_retry_elapsed: timeout,
		})
	}

	fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoffBuilder::new()
			.with_initial_interval(Duration::from_millis(500))
			.with_max_elapsed_time(Some(self.max_retry_elapsed))
			.build()
	}

	/// Fetch one page from an account endpoint.
	///
	/// # Errors
	/// Returns `IndexerError::HttpError` once retries are exhausted or the failure is permanent,
	/// and `IndexerError::JsonError` when the body does not match the expected page shape.
	async fn get_page<T: DeserializeOwned>(
		&self,
		endpoint: &str,
		address: &str,
		limit: usize,
		offset: usize,
	) -> Result<Vec<T>, IndexerError> {
		let url = format!("{}/account/{}", self.base_url, endpoint);
		let query = [
			("account", address.to_string()),
			("limit", limit.to_string()),
			("offset", offset.to_string()),
		];

		let body = retry(self.backoff(), || async {
			let mut request = self.http_client.get(&url).query(&query);
			if let Some(api_key) = &self.api_key {
				request = request.header("token", api_key);
			}

			let response = request.send().await.map_err(|e| {
				warn!("Indexer request to {} failed: {}", endpoint, e);
				if e.is_timeout() || e.is_connect() {
					backoff::Error::transient(e)
				} else {
					backoff::Error::permanent(e)
				}
			})?;

			let status = response.status();
			if let Err(e) = response.error_for_status_ref() {
				warn!("Indexer responded {} for {}", status, endpoint);
				return Err(
					if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
						backoff::Error::transient(e)
					} else {
						backoff::Error::permanent(e)
					},
				);
			}

			response
				.text()
				.await
				.map_err(backoff::Error::transient)
		})
		.await?;

		let page: Page<T> = serde_json::from_str(&body)?;
		debug!(
			"Indexer {} returned {} records at offset {}",
			endpoint,
			page.data.len(),
			offset
		);
		Ok(page.data)
	}
}

#[async_trait]
impl TransferIndexer for SolscanClient {
	async fn native_transfers(
		&self,
		address: &str,
		limit: usize,
		offset: usize,
	) -> Result<Vec<TransferRecord>, IndexerError> {
		let page: Vec<SolTransfer> = self
			.get_page("solTransfers", address, limit, offset)
			.await?;
		Ok(page.into_iter().map(TransferRecord::from).collect())
	}

	async fn token_transfers(
		&self,
		address: &str,
		limit: usize,
		offset: usize,
	) -> Result<Vec<TransferRecord>, IndexerError> {
		let page: Vec<SplTransfer> = self
			.get_page("splTransfers", address, limit, offset)
			.await?;
		page.into_iter().map(TransferRecord::try_from).collect()
	}
}
