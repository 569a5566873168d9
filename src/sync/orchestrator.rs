//! Sync orchestrator and integration point for all sync components.
//!
//! This module defines the `SyncOrchestrator`, which owns the session of a started kit and wires
//! the components together through the event bus. Components never call one another; the
//! `OrchestratorEventHandler` turns their events into the next step:
//! - A new block height runs a transaction sync, then a pending transaction sweep at that height
//! - The poller becoming ready syncs balance and token accounts; becoming not ready pushes its
//!   error into both domains without touching cached values
//! - Inserted or updated transactions re-sync the balance
//! - Token accounts discovered by the transaction syncer are handed to the token account syncer
//! - Domain state changes end a forced refresh once every domain it waits on has run and settled
//!
//! All background work runs inside one [`Session`]; stopping cancels it and waits for every task.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::sync::SyncError;
use crate::sync::balance::BalanceSyncer;
use crate::sync::block_height::{BlockHeightPoller, PollerState};
use crate::sync::events::{EventBus, EventDispatcher, SyncEvent, SyncEventHandler};
use crate::sync::pending::PendingTransactionTracker;
use crate::sync::session::Session;
use crate::sync::state::{SyncDomain, SyncState};
use crate::sync::token_accounts::TokenAccountSyncer;
use crate::sync::transaction_syncer::TransactionSyncer;

/// The components driven by the orchestrator.
#[derive(Clone)]
pub struct SyncComponents {
    pub poller: Arc<BlockHeightPoller>,
    pub balance: Arc<BalanceSyncer>,
    pub tokens: Arc<TokenAccountSyncer>,
    pub transactions: Arc<TransactionSyncer>,
    pub pending: Arc<PendingTransactionTracker>,
}

impl SyncComponents {
    fn sync_all(&self, session: &Session) {
        let balance = self.balance.clone();
        session.spawn(async move { balance.sync().await });

        let tokens = self.tokens.clone();
        session.spawn(async move { tokens.sync(None).await });

        let transactions = self.transactions.clone();
        let pending = self.pending.clone();
        let height = self.poller.last_block_height();
        session.spawn(async move {
            transactions.sync().await;
            if let Some(height) = height {
                pending.sync(height).await;
            }
        });
    }

    fn domain_states(&self) -> [(SyncDomain, SyncState); 3] {
        [
            (SyncDomain::Balance, self.balance.state()),
            (SyncDomain::TokenAccounts, self.tokens.state()),
            (SyncDomain::Transactions, self.transactions.state()),
        ]
    }
}

/// Domains a forced refresh still waits on.
///
/// A domain counts as settled only after it was seen syncing since the refresh began, so a
/// state left over from an earlier cycle never ends the refresh.
#[derive(Debug, Default)]
struct RefreshProgress {
    awaiting: HashSet<SyncDomain>,
    running: HashSet<SyncDomain>,
}

impl RefreshProgress {
    fn new(states: [(SyncDomain, SyncState); 3]) -> Self {
        let mut progress = Self::default();
        for (domain, state) in states {
            if state.is_syncing() {
                progress.running.insert(domain);
            } else {
                progress.awaiting.insert(domain);
            }
        }
        progress
    }

    /// Records a published state change. Returns `true` once every domain has settled.
    fn observe(&mut self, domain: SyncDomain, state: &SyncState) -> bool {
        if state.is_syncing() {
            if self.awaiting.remove(&domain) {
                self.running.insert(domain);
            }
        } else {
            self.running.remove(&domain);
        }
        self.awaiting.is_empty() && self.running.is_empty()
    }
}

type RefreshGuard = Arc<Mutex<Option<RefreshProgress>>>;

fn lock_refresh(refresh: &RefreshGuard) -> MutexGuard<'_, Option<RefreshProgress>> {
    refresh.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Main sync orchestrator that coordinates all sync components.
///
/// Starting is idempotent. At most one forced refresh runs at a time, so concurrent
/// `refresh` calls never pile up parallel full syncs.
pub struct SyncOrchestrator {
    components: SyncComponents,
    events: EventBus,
    session: Mutex<Option<Session>>,
    refresh: RefreshGuard,
}

impl SyncOrchestrator {
    pub fn new(components: SyncComponents, events: EventBus) -> Self {
        Self {
            components,
            events,
            session: Mutex::new(None),
            refresh: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_started(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Whether a forced refresh is still running.
    pub fn is_refreshing(&self) -> bool {
        lock_refresh(&self.refresh).is_some()
    }

    /// Starts the session: event handling first, then the poller.
    pub fn start(&self) {
        let mut current = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if current.is_some() {
            debug!("Sync already started");
            return;
        }

        let session = Session::new();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register_handler(Box::new(OrchestratorEventHandler {
            components: self.components.clone(),
            session: session.clone(),
            refresh: self.refresh.clone(),
        }));
        session.spawn(dispatcher.run(self.events.subscribe(), session.token()));

        info!("Starting sync");
        self.components.poller.start(&session);
        if let PollerState::NotReady(error) = self.components.poller.state() {
            self.components.balance.stop(Some(error.clone()));
            self.components.tokens.stop(Some(error));
        }

        *current = Some(session);
    }

    /// Forces a sync of every domain.
    ///
    /// Starts the kit when it is not started. When the poller is not ready the poller is
    /// restarted instead, which re-reads connectivity.
    pub fn refresh(&self) {
        let Some(session) = self.current_session() else {
            self.start();
            return;
        };

        let mut refresh = lock_refresh(&self.refresh);
        if refresh.is_some() {
            debug!("Refresh already running");
            return;
        }

        match self.components.poller.state() {
            PollerState::Ready => {
                info!("Refreshing all domains");
                *refresh = Some(RefreshProgress::new(self.components.domain_states()));
                drop(refresh);
                self.components.sync_all(&session);
            }
            PollerState::NotReady(error) => {
                info!("Refresh while not ready ({}), restarting poller", error);
                drop(refresh);
                self.components.poller.start(&session);
            }
        }
    }

    /// Cancels the session and waits for its tasks. Persisted data is kept.
    pub async fn stop(&self) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(session) = session else {
            return;
        };

        session.shutdown().await;
        lock_refresh(&self.refresh).take();
        self.components.poller.stop();
        self.components.balance.stop(None);
        self.components.tokens.stop(None);
        self.components.transactions.reset();
        info!("Sync stopped");
    }

    fn current_session(&self) -> Option<Session> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Event handler that turns component events into follow-up work.
struct OrchestratorEventHandler {
    components: SyncComponents,
    session: Session,
    refresh: RefreshGuard,
}

impl OrchestratorEventHandler {
    fn settle_refresh(&self, domain: SyncDomain, state: &SyncState) {
        let mut refresh = lock_refresh(&self.refresh);
        let finished = refresh
            .as_mut()
            .is_some_and(|progress| progress.observe(domain, state));
        if finished {
            debug!("Forced refresh finished");
            *refresh = None;
        }
    }

    fn abandon_refresh(&self) {
        if lock_refresh(&self.refresh).take().is_some() {
            debug!("Forced refresh abandoned, poller not ready");
        }
    }
}

#[async_trait::async_trait]
impl SyncEventHandler for OrchestratorEventHandler {
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), SyncError> {
        match event {
            SyncEvent::BlockHeightUpdated { height } => {
                let transactions = self.components.transactions.clone();
                let pending = self.components.pending.clone();
                let height = *height;
                self.session.spawn(async move {
                    transactions.sync().await;
                    pending.sync(height).await;
                });
            }
            SyncEvent::PollerStateChanged { state } => match state {
                PollerState::Ready => {
                    let balance = self.components.balance.clone();
                    self.session.spawn(async move { balance.sync().await });
                    let tokens = self.components.tokens.clone();
                    self.session.spawn(async move { tokens.sync(None).await });
                }
                PollerState::NotReady(error) => {
                    self.abandon_refresh();
                    self.components.balance.stop(Some(error.clone()));
                    self.components.tokens.stop(Some(error.clone()));
                }
            },
            SyncEvent::TransactionsUpdated { .. } => {
                let balance = self.components.balance.clone();
                self.session.spawn(async move { balance.sync().await });
            }
            SyncEvent::TokenAccountCandidates {
                accounts,
                existing_mints,
            } => {
                let tokens = self.components.tokens.clone();
                let accounts = accounts.clone();
                let existing_mints = existing_mints.clone();
                self.session
                    .spawn(async move { tokens.add_accounts(accounts, existing_mints).await });
            }
            SyncEvent::SyncStateChanged { domain, state } => self.settle_refresh(*domain, state),
            SyncEvent::BalanceUpdated { .. }
            | SyncEvent::TokenAccountsUpdated { .. }
            | SyncEvent::NewTokenAccounts { .. } => {}
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "OrchestratorEventHandler"
    }
}
