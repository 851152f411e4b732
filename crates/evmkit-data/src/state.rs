//! Sync state shared by every component that tracks progress against a remote source.
//!
//! Each owner (RPC syncer, account tracker, transaction syncer, sync manager) holds its
//! state in a [`StateChannel`], which compares before it emits: subscribers only ever
//! observe real transitions.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// Capacity of every state broadcast channel. Lagging receivers skip to the newest state.
const STATE_CHANNEL_CAPACITY: usize = 64;

/// Reason a component is not synced.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The component has not been started (or was stopped).
    #[error("not started")]
    NotStarted,
    /// The remote endpoint could not be reached.
    #[error("no network connection")]
    NoNetworkConnection,
    /// An established connection was lost.
    #[error("connection lost: {0}")]
    Disconnected(String),
    /// The node answered with an error for a request the component depends on.
    #[error("rpc error: {0}")]
    Rpc(String),
    /// A block-explorer or other transaction provider failed.
    #[error("provider error: {0}")]
    Provider(String),
    /// A storage read or write failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl SyncError {
    /// Wraps a storage failure, keeping the full error chain in the message.
    pub fn storage(err: &eyre::Report) -> Self {
        Self::Storage(format!("{err:#}"))
    }

    /// Wraps a provider failure, keeping the full error chain in the message.
    pub fn provider(err: &eyre::Report) -> Self {
        Self::Provider(format!("{err:#}"))
    }
}

/// Tri-state progress of a syncing component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncState {
    NotSynced(SyncError),
    Syncing,
    Synced,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::NotSynced(SyncError::NotStarted)
    }
}

impl SyncState {
    pub fn is_syncing(&self) -> bool {
        matches!(self, Self::Syncing)
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced)
    }

    pub fn is_not_synced(&self) -> bool {
        matches!(self, Self::NotSynced(_))
    }

    /// Folds constituent states into one.
    ///
    /// NotSynced if any constituent is NotSynced (the first one's error wins), else
    /// Syncing if any is Syncing, else Synced. An empty set is Synced.
    pub fn aggregate<'a, I>(states: I) -> SyncState
    where
        I: IntoIterator<Item = &'a SyncState>,
    {
        let mut syncing = false;
        for state in states {
            match state {
                SyncState::NotSynced(error) => return SyncState::NotSynced(error.clone()),
                SyncState::Syncing => syncing = true,
                SyncState::Synced => {}
            }
        }

        if syncing {
            SyncState::Syncing
        } else {
            SyncState::Synced
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::NotSynced(error) => write!(f, "not synced ({error})"),
            SyncState::Syncing => f.write_str("syncing"),
            SyncState::Synced => f.write_str("synced"),
        }
    }
}

/// Current value plus a broadcast of its changes.
///
/// `set` is the only way to mutate the value and it emits only when the new value
/// differs from the current one. Late subscribers see future changes, never history.
pub struct StateChannel<T> {
    current: Mutex<T>,
    tx: broadcast::Sender<T>,
}

impl<T: Clone + PartialEq> StateChannel<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            current: Mutex::new(initial),
            tx,
        }
    }

    pub fn get(&self) -> T {
        self.lock().clone()
    }

    /// Stores `value` and emits it if it differs from the current value.
    ///
    /// Returns `true` when a transition happened.
    pub fn set(&self, value: T) -> bool {
        let mut current = self.lock();
        if *current == value {
            return false;
        }
        *current = value.clone();
        // No receivers is fine: nobody is listening yet.
        let _ = self.tx.send(value);
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + PartialEq + Default> Default for StateChannel<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
