use std::path::PathBuf;

use solana_wallet_sync::sync::SyncEvent;
use solana_wallet_sync::{SolanaKit, load_config};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

const CONFIG_FILE_VAR: &str = "SOLANA_KIT_CONFIG";

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let Some(address) = std::env::args().nth(1) else {
		error!("Usage: solana-wallet-sync <address>");
		return;
	};

	let config = match load_config(std::env::var(CONFIG_FILE_VAR).ok().map(PathBuf::from)) {
		Ok(config) => config,
		Err(e) => {
			error!("Invalid configuration: {}", e);
			return;
		}
	};

	let kit = match SolanaKit::from_config(&address, &config) {
		Ok(kit) => kit,
		Err(e) => {
			error!("Failed to create wallet kit: {}", e);
			return;
		}
	};

	info!("Starting wallet sync for {} via {}", address, config.rpc_url);
	let mut events = kit.events();
	kit.start();

	loop {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => break,
			event = events.recv() => match event {
				Ok(SyncEvent::BlockHeightUpdated { height }) => info!("Block height {}", height),
				Ok(SyncEvent::BalanceUpdated { balance }) => {
					info!("Balance {} SOL", format_sol(balance));
				}
				Ok(SyncEvent::SyncStateChanged { domain, state }) => info!("{}: {}", domain, state),
				Ok(SyncEvent::TransactionsUpdated { transactions }) => {
					for tx in &transactions {
						info!(
							"Transaction {} pending={} error={:?}",
							tx.hash(),
							tx.transaction.pending,
							tx.transaction.error
						);
					}
				}
				Ok(SyncEvent::TokenAccountsUpdated { accounts }) => {
					for account in &accounts {
						info!(
							"Token {} balance {}",
							account.mint_account.address, account.token_account.balance
						);
					}
				}
				Ok(_) => {}
				Err(RecvError::Lagged(skipped)) => warn!("Skipped {} events", skipped),
				Err(RecvError::Closed) => break,
			},
		}
	}

	info!("Shutting down");
	kit.stop().await;
	println!("{}", kit.status_info());
}

fn format_sol(lamports: u64) -> String {
	format!("{}.{:09}", lamports / 1_000_000_000, lamports % 1_000_000_000)
}
