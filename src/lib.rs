//! Client-side sync engine for a single Solana address.
//!
//! [`SolanaKit`] keeps the native balance, SPL token accounts and transaction history of one
//! address in sync with the chain, tracks transactions it sends until they settle, and publishes
//! every change as a [`SyncEvent`](sync::SyncEvent).

pub mod config;
pub mod indexer;
pub mod kit;
pub mod models;
pub mod rpc;
pub mod signer;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod testing;

pub use config::{KitConfig, load_config};
pub use kit::{KitError, SolanaKit, StatusInfo};
