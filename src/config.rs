use std::path::PathBuf;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "SOLANA_KIT_";

/// Settings for one kit instance. Built once and passed by reference to every component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KitConfig {
	pub rpc_url: String,
	pub indexer_url: String,
	pub indexer_api_key: Option<String>,
	/// Block height polling interval.
	pub sync_interval_secs: u64,
	pub signatures_page_size: usize,
	pub indexer_page_size: usize,
	/// Upper bound on indexer pages walked per stream and sync cycle.
	pub indexer_max_pages: usize,
	pub confirmation_timeout_ms: u64,
	pub http_timeout_secs: u64,
	pub event_capacity: usize,
	/// When set, state is persisted as a JSON snapshot in this directory.
	pub data_dir: Option<PathBuf>,
}

impl Default for KitConfig {
	fn default() -> Self {
		Self {
			rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
			indexer_url: "https://public-api.solscan.io".to_string(),
			indexer_api_key: None,
			sync_interval_secs: 30,
			signatures_page_size: 1000,
			indexer_page_size: 50,
			indexer_max_pages: 20,
			confirmation_timeout_ms: 2000,
			http_timeout_secs: 30,
			event_capacity: 256,
			data_dir: None,
		}
	}
}

impl KitConfig {
	pub fn sync_interval(&self) -> Duration {
		Duration::from_secs(self.sync_interval_secs.max(1))
	}

	pub fn confirmation_timeout(&self) -> Duration {
		Duration::from_millis(self.confirmation_timeout_ms)
	}

	pub fn http_timeout(&self) -> Duration {
		Duration::from_secs(self.http_timeout_secs)
	}
}

/// Defaults, then an optional JSON file, then `SOLANA_KIT_*` environment variables.
pub fn load_config(json_file: Option<PathBuf>) -> Result<KitConfig, figment::Error> {
	let mut figment = Figment::from(Serialized::defaults(KitConfig::default()));
	if let Some(path) = json_file {
		figment = figment.merge(Json::file(path));
	}
	figment.merge(Env::prefixed(ENV_PREFIX)).extract()
}
