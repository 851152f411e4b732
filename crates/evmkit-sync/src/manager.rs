//! Transaction sync manager: fans out to every registered syncer, merges their
//! batches by hash, persists them and publishes the result.
//!
//! The aggregate [`SyncState`] is never set directly. It is recomputed from the
//! syncers' states (plus the manager's own persistence step) whenever one changes.

use alloy::primitives::B256;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use evmkit_data::state::{StateChannel, SyncError, SyncState};
use evmkit_data::store::Store;
use evmkit_data::types::Transaction;

use crate::syncers::{FlightGuard, TransactionResolver, TransactionSyncer};

const SYNCED_CHANNEL_CAPACITY: usize = 64;

/// One persisted batch, as stored after the merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionsSynced {
    pub transactions: Vec<Transaction>,
    /// Every contributing syncer was on its first (history) round.
    pub initial: bool,
}

pub struct TransactionSyncManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    store: Arc<Store>,
    syncers: RwLock<Vec<Arc<dyn TransactionSyncer>>>,
    resolver: RwLock<Option<Arc<TransactionResolver>>>,
    state: StateChannel<SyncState>,
    /// State of the manager's own persist step, folded into the aggregate.
    persist_state: Mutex<SyncState>,
    in_flight: AtomicBool,
    synced: broadcast::Sender<TransactionsSynced>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl TransactionSyncManager {
    pub fn new(store: Arc<Store>) -> Self {
        let (synced, _) = broadcast::channel(SYNCED_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ManagerInner {
                store,
                syncers: RwLock::new(Vec::new()),
                resolver: RwLock::new(None),
                state: StateChannel::default(),
                persist_state: Mutex::new(SyncState::Synced),
                in_flight: AtomicBool::new(false),
                synced,
                watchers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Registers a syncer and starts following its state. A second syncer with an
    /// id already registered is ignored. Must be called inside a tokio runtime.
    pub fn add_syncer(&self, syncer: Arc<dyn TransactionSyncer>) {
        {
            let mut syncers = self
                .inner
                .syncers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if syncers.iter().any(|s| s.id() == syncer.id()) {
                debug!(syncer = syncer.id(), "syncer already registered");
                return;
            }
            syncers.push(Arc::clone(&syncer));
        }

        let receiver = syncer.subscribe_state();
        let handle = tokio::spawn(watch_state(Arc::downgrade(&self.inner), receiver));
        self.inner
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);

        self.inner.recompute();
    }

    /// Registers the resolver both as a regular syncer (re-checking pending
    /// transactions every round) and as the target of [`resolve_pending`](Self::resolve_pending).
    pub fn add_resolver(&self, resolver: Arc<TransactionResolver>) {
        *self
            .inner
            .resolver
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&resolver));
        self.add_syncer(resolver);
    }

    pub fn syncer_ids(&self) -> Vec<String> {
        self.inner
            .syncers()
            .iter()
            .map(|s| s.id().to_string())
            .collect()
    }

    /// State of each registered syncer, in registration order.
    pub fn syncer_states(&self) -> Vec<(String, SyncState)> {
        self.inner
            .syncers()
            .iter()
            .map(|s| (s.id().to_string(), s.state()))
            .collect()
    }

    pub fn sync_state(&self) -> SyncState {
        self.inner.state.get()
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    /// Every persisted batch, including initial ones.
    pub fn subscribe(&self) -> broadcast::Receiver<TransactionsSynced> {
        self.inner.synced.subscribe()
    }

    /// One round over every syncer. A round already in flight absorbs this call.
    #[tracing::instrument(skip(self))]
    pub async fn sync(&self) {
        let Some(_guard) = FlightGuard::try_begin(&self.inner.in_flight) else {
            debug!("sync already in progress");
            return;
        };

        let syncers = self.inner.syncers();
        let results = join_all(syncers.iter().map(|s| s.transactions())).await;

        // A syncer with nothing to report does not veto the initial flag.
        let contributing: Vec<&(Vec<Transaction>, bool)> =
            results.iter().filter(|(txs, _)| !txs.is_empty()).collect();
        let initial = !contributing.is_empty() && contributing.iter().all(|(_, i)| *i);

        let merged = merge(results.into_iter().flat_map(|(txs, _)| txs));
        info!(syncers = syncers.len(), merged = merged.len(), initial, "sync round merged");
        self.inner.publish(merged, initial);
    }

    /// Runs the resolver outside a regular round, for work signalled by the pool.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_pending(&self) {
        let resolver = self
            .inner
            .resolver
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(resolver) = resolver else {
            return;
        };
        let (transactions, initial) = resolver.resolve().await;
        self.inner.publish(merge(transactions), initial);
    }

    /// Stops every syncer. The aggregate returns to `NotSynced(NotStarted)`.
    ///
    /// State watchers stay subscribed, so a later round after a restart is reflected
    /// in the aggregate again.
    pub fn stop(&self) {
        for syncer in self.inner.syncers() {
            syncer.stop();
        }
        *self
            .inner
            .persist_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = SyncState::Synced;
        self.inner
            .state
            .set(SyncState::NotSynced(SyncError::NotStarted));
    }
}

impl Drop for TransactionSyncManager {
    fn drop(&mut self) {
        self.inner.abort_watchers();
    }
}

impl ManagerInner {
    fn syncers(&self) -> Vec<Arc<dyn TransactionSyncer>> {
        self.syncers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn recompute(&self) {
        let mut states: Vec<SyncState> = self.syncers().iter().map(|s| s.state()).collect();
        states.push(
            self.persist_state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        );
        let aggregate = SyncState::aggregate(&states);
        if self.state.set(aggregate.clone()) {
            debug!(state = %aggregate, "aggregate sync state changed");
        }
    }

    fn set_persist_state(&self, state: SyncState) {
        *self
            .persist_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = state;
        self.recompute();
    }

    /// Persists a merged batch, reloads the stored rows and broadcasts them.
    fn publish(&self, merged: Vec<Transaction>, initial: bool) {
        if merged.is_empty() {
            return;
        }
        let hashes: Vec<B256> = merged.iter().map(|t| t.hash).collect();
        let stored = self
            .store
            .save_transactions(&merged)
            .and_then(|_| self.store.transactions_by_hashes(&hashes));
        match stored {
            Ok(transactions) => {
                self.set_persist_state(SyncState::Synced);
                let _ = self.synced.send(TransactionsSynced {
                    transactions,
                    initial,
                });
            }
            Err(err) => {
                warn!(error = %err, "failed to persist synced transactions");
                self.set_persist_state(SyncState::NotSynced(SyncError::storage(&err)));
            }
        }
    }

    fn abort_watchers(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for handle in handles {
            handle.abort();
        }
    }
}

async fn watch_state(inner: Weak<ManagerInner>, mut receiver: broadcast::Receiver<SyncState>) {
    loop {
        match receiver.recv().await {
            Ok(_) | Err(RecvError::Lagged(_)) => match inner.upgrade() {
                Some(inner) => inner.recompute(),
                None => break,
            },
            Err(RecvError::Closed) => break,
        }
    }
}

/// Null-coalescing merge by hash, keeping first-seen order.
///
/// Earlier records win conflicts, so the outcome follows syncer registration order
/// and never depends on which syncer finished first.
pub fn merge(transactions: impl IntoIterator<Item = Transaction>) -> Vec<Transaction> {
    let mut order: Vec<B256> = Vec::new();
    let mut by_hash: HashMap<B256, Transaction> = HashMap::new();
    for transaction in transactions {
        let hash = transaction.hash;
        match by_hash.remove(&hash) {
            Some(existing) => {
                by_hash.insert(hash, existing.merge(transaction));
            }
            None => {
                order.push(hash);
                by_hash.insert(hash, transaction);
            }
        }
    }
    order
        .into_iter()
        .filter_map(|hash| by_hash.remove(&hash))
        .collect()
}
