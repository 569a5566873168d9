//! Event system for wallet synchronization.
//!
//! This module defines the event types every sync component publishes, the broadcast bus that
//! carries them, the handler trait, and the dispatcher that feeds bus events to registered
//! handlers. Components never hold references to one another: the poller announces heights, the
//! syncers announce state changes and data updates, and the orchestrator's handler decides what
//! runs next. Application code can subscribe to the same bus to observe every change.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::models::{FullTokenAccount, FullTransaction, TokenAccount};
use crate::sync::SyncError;
use crate::sync::block_height::PollerState;
use crate::sync::state::{SyncDomain, SyncState};

/// Events that occur during wallet synchronization
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// The chain height changed
    BlockHeightUpdated { height: u64 },
    /// The block height poller became ready or not ready
    PollerStateChanged { state: PollerState },
    /// A domain's sync state changed
    SyncStateChanged {
        domain: SyncDomain,
        state: SyncState,
    },
    /// The native balance changed
    BalanceUpdated { balance: u64 },
    /// Token account balances were refreshed; carries the full set
    TokenAccountsUpdated { accounts: Vec<FullTokenAccount> },
    /// Token accounts seen for the first time
    NewTokenAccounts { accounts: Vec<FullTokenAccount> },
    /// Transactions were inserted or updated
    TransactionsUpdated { transactions: Vec<FullTransaction> },
    /// Token accounts surfaced by the transaction syncer, plus mints whose stored accounts should
    /// be re-checked
    TokenAccountCandidates {
        accounts: Vec<TokenAccount>,
        existing_mints: Vec<String>,
    },
}

/// Broadcast channel shared by all components of one kit.
///
/// Publishing never blocks and never fails; events published while nobody subscribes are dropped.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }
}

/// Trait for handling sync events.
///
/// Implementors receive all sync events and can perform side effects or state updates.
#[async_trait::async_trait]
pub trait SyncEventHandler: Send + Sync {
    /// Handle a sync event.
    ///
    /// This method is called for every event taken off the bus, in publication order.
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), SyncError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that manages multiple event handlers.
///
/// The dispatcher allows multiple handlers to be registered and ensures all are called for each event.
pub struct EventDispatcher {
    handlers: Vec<Box<dyn SyncEventHandler>>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    /// Create a new, empty event dispatcher.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register a new event handler.
    ///
    /// Handlers are called in the order they are registered.
    pub fn register_handler(&mut self, handler: Box<dyn SyncEventHandler>) {
        self.handlers.push(handler);
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from running.
    pub async fn dispatch(&mut self, event: &SyncEvent) {
        for handler in &mut self.handlers {
            if let Err(e) = handler.handle(event).await {
                error!("Handler {} failed to process event: {}", handler.name(), e);
            }
        }
    }

    /// Pump events from `receiver` into the handlers until cancelled or the bus closes.
    ///
    /// A lagging receiver skips the overwritten events and keeps going.
    pub async fn run(
        mut self,
        mut receiver: broadcast::Receiver<SyncEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = receiver.recv() => event,
            };

            match event {
                Ok(event) => self.dispatch(&event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event dispatcher lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        debug!("Event dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Failing;

    #[async_trait::async_trait]
    impl SyncEventHandler for Failing {
        async fn handle(&mut self, _event: &SyncEvent) -> Result<(), SyncError> {
            Err(SyncError::NotStarted)
        }

        fn name(&self) -> &'static str {
            "Failing"
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl SyncEventHandler for Counting {
        async fn handle(&mut self, _event: &SyncEvent) -> Result<(), SyncError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Counting"
        }
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_others() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register_handler(Box::new(Failing));
        dispatcher.register_handler(Box::new(Counting(count.clone())));

        dispatcher
            .dispatch(&SyncEvent::BlockHeightUpdated { height: 1 })
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let bus = EventBus::new(8);
        let count = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register_handler(Box::new(Counting(count.clone())));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(dispatcher.run(bus.subscribe(), cancel.clone()));

        bus.publish(SyncEvent::BalanceUpdated { balance: 10 });
        bus.publish(SyncEvent::BalanceUpdated { balance: 20 });
        while count.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
