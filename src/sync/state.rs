use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use super::SyncError;
use super::events::{EventBus, SyncEvent};

/// The three independently synced domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncDomain {
	Balance,
	TokenAccounts,
	Transactions,
}

impl fmt::Display for SyncDomain {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncDomain::Balance => write!(f, "balance"),
			SyncDomain::TokenAccounts => write!(f, "token accounts"),
			SyncDomain::Transactions => write!(f, "transactions"),
		}
	}
}

/// Observable sync state of one domain. Never persisted.
///
/// Equality compares the variant and, for `Syncing`, the progress. The error carried by
/// `NotSynced` is ignored, so replacing one error with another is not a state change.
#[derive(Debug, Clone)]
pub enum SyncState {
	Syncing { progress: Option<f64> },
	Synced,
	NotSynced(Arc<SyncError>),
}

impl PartialEq for SyncState {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(SyncState::Syncing { progress: a }, SyncState::Syncing { progress: b }) => a == b,
			(SyncState::Synced, SyncState::Synced) => true,
			(SyncState::NotSynced(_), SyncState::NotSynced(_)) => true,
			_ => false,
		}
	}
}

impl SyncState {
	pub fn not_synced(error: SyncError) -> Self {
		SyncState::NotSynced(Arc::new(error))
	}

	pub fn is_syncing(&self) -> bool {
		matches!(self, SyncState::Syncing { .. })
	}

	pub fn is_synced(&self) -> bool {
		matches!(self, SyncState::Synced)
	}

	pub fn error(&self) -> Option<&SyncError> {
		match self {
			SyncState::NotSynced(error) => Some(error.as_ref()),
			_ => None,
		}
	}
}

impl fmt::Display for SyncState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncState::Syncing {
				progress: Some(progress),
			} => write!(f, "Syncing {:.0}%", progress * 100.0),
			SyncState::Syncing { progress: None } => write!(f, "Syncing"),
			SyncState::Synced => write!(f, "Synced"),
			SyncState::NotSynced(error) => write!(f, "NotSynced: {}", error),
		}
	}
}

/// Current sync state of one domain plus its change notifications.
///
/// Every change is pushed to watch subscribers and published on the event bus as
/// [`SyncEvent::SyncStateChanged`]. Setting an equal state publishes nothing.
pub struct SyncStateCell {
	domain: SyncDomain,
	state: watch::Sender<SyncState>,
	events: EventBus,
}

impl SyncStateCell {
	pub fn new(domain: SyncDomain, events: EventBus) -> Self {
		let (state, _) = watch::channel(SyncState::not_synced(SyncError::NotStarted));
		Self {
			domain,
			state,
			events,
		}
	}

	pub fn get(&self) -> SyncState {
		self.state.borrow().clone()
	}

	pub fn subscribe(&self) -> watch::Receiver<SyncState> {
		self.state.subscribe()
	}

	/// Atomically moves to `Syncing` unless a sync is already running.
	///
	/// Returns `false` when the caller must not start another fetch.
	pub fn try_begin(&self) -> bool {
		let begun = self.state.send_if_modified(|state| {
			if state.is_syncing() {
				false
			} else {
				*state = SyncState::Syncing { progress: None };
				true
			}
		});

		if begun {
			self.publish(SyncState::Syncing { progress: None });
		} else {
			debug!("{} sync already running", self.domain);
		}
		begun
	}

	/// Stores `new_state`. Only a change by equality is published, so a new error replaces the
	/// old one silently.
	pub fn set(&self, new_state: SyncState) {
		let changed = self.state.send_if_modified(|state| {
			let changed = *state != new_state;
			*state = new_state.clone();
			changed
		});

		if changed {
			self.publish(new_state);
		}
	}

	fn publish(&self, state: SyncState) {
		debug!("{} sync state: {}", self.domain, state);
		self.events.publish(SyncEvent::SyncStateChanged {
			domain: self.domain,
			state,
		});
	}
}
