//! Pluggable transaction syncers.
//!
//! Every syncer owns a persisted block cursor and its own [`SyncState`]. One call to
//! [`TransactionSyncer::transactions`] fetches everything after the cursor, persists
//! what it needs, advances the cursor and returns the batch together with an
//! "initial sync" flag.

pub mod explorer;
pub mod resolver;

pub use explorer::{ExplorerFeed, ExplorerTransactionSyncer};
pub use resolver::TransactionResolver;

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use evmkit_data::state::{StateChannel, SyncError, SyncState};
use evmkit_data::store::Store;
use evmkit_data::types::{Transaction, TransactionSyncerState};

#[async_trait]
pub trait TransactionSyncer: Send + Sync {
    /// Stable identifier, also the key of the persisted cursor.
    fn id(&self) -> &str;

    fn state(&self) -> SyncState;

    fn subscribe_state(&self) -> broadcast::Receiver<SyncState>;

    /// Runs one sync round and returns the transactions it found.
    ///
    /// The flag is `true` when the round started from an empty cursor, that is when
    /// the batch is history rather than news. Failures are reported through
    /// [`state`](Self::state) and yield an empty batch.
    async fn transactions(&self) -> (Vec<Transaction>, bool);

    fn stop(&self);
}

/// Clears a single-flight flag when dropped.
pub(crate) struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    /// `None` when the flag is already set.
    pub(crate) fn try_begin(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::SeqCst) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Result of one fetch: the transactions plus the highest block they cover.
pub(crate) struct Batch {
    pub(crate) transactions: Vec<Transaction>,
    pub(crate) last_block: Option<u64>,
}

/// Cursor, state and single-flight bookkeeping shared by cursor-driven syncers.
pub(crate) struct SyncerCore {
    id: String,
    store: Arc<Store>,
    state: StateChannel<SyncState>,
    in_flight: AtomicBool,
}

impl SyncerCore {
    pub(crate) fn new(id: impl Into<String>, store: Arc<Store>) -> Self {
        Self {
            id: id.into(),
            store,
            state: StateChannel::default(),
            in_flight: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn state(&self) -> SyncState {
        self.state.get()
    }

    pub(crate) fn subscribe_state(&self) -> broadcast::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub(crate) fn stop(&self) {
        self.state.set(SyncState::NotSynced(SyncError::NotStarted));
    }

    /// Runs `fetch` from the block after the cursor.
    ///
    /// `fetch` persists whatever its batch depends on; the cursor moves only after it
    /// returns successfully, so a crash in between replays an idempotent fetch.
    pub(crate) async fn run<F, Fut>(&self, fetch: F) -> (Vec<Transaction>, bool)
    where
        F: FnOnce(u64, bool) -> Fut,
        Fut: Future<Output = Result<Batch, SyncError>>,
    {
        let Some(_guard) = FlightGuard::try_begin(&self.in_flight) else {
            debug!(syncer = %self.id, "sync already in flight");
            return (Vec::new(), false);
        };

        let cursor = match self.store.syncer_state(&self.id) {
            Ok(state) => state.map(|s| s.last_block_number).unwrap_or_default(),
            Err(err) => {
                warn!(syncer = %self.id, error = %err, "failed to read syncer cursor");
                self.state.set(SyncState::NotSynced(SyncError::storage(&err)));
                return (Vec::new(), false);
            }
        };
        let initial = cursor == 0;
        let start_block = if initial { 0 } else { cursor + 1 };

        self.state.set(SyncState::Syncing);
        let batch = match fetch(start_block, initial).await {
            Ok(batch) => batch,
            Err(err) => {
                warn!(syncer = %self.id, error = %err, "sync failed");
                self.state.set(SyncState::NotSynced(err));
                return (Vec::new(), initial);
            }
        };

        if let Some(last_block) = batch.last_block.filter(|b| *b > cursor) {
            let state = TransactionSyncerState {
                syncer_id: self.id.clone(),
                last_block_number: last_block,
            };
            if let Err(err) = self.store.save_syncer_state(&state) {
                warn!(syncer = %self.id, error = %err, "failed to advance syncer cursor");
                self.state.set(SyncState::NotSynced(SyncError::storage(&err)));
                return (Vec::new(), initial);
            }
        }

        info!(
            syncer = %self.id,
            start_block,
            count = batch.transactions.len(),
            last_block = ?batch.last_block,
            "sync round complete"
        );
        self.state.set(SyncState::Synced);
        (batch.transactions, initial)
    }
}
