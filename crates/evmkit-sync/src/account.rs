//! Balance and nonce of the tracked address.

use eyre::Context;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use evmkit_data::rpc::{BlockTag, RpcBlockchain};
use evmkit_data::state::{StateChannel, SyncError, SyncState};
use evmkit_data::store::Store;
use evmkit_data::types::AccountState;

use crate::syncers::FlightGuard;

/// Polls `(balance, nonce)` and emits only when the pair changes.
///
/// A nonce change means an outgoing transaction exists, a balance change usually an
/// incoming one; either is the cue for the transaction syncers to run.
pub struct AccountStateTracker {
    blockchain: Arc<RpcBlockchain>,
    store: Arc<Store>,
    state: StateChannel<SyncState>,
    account: StateChannel<Option<AccountState>>,
    in_flight: AtomicBool,
}

impl AccountStateTracker {
    /// Starts from the last persisted account state, if any.
    ///
    /// # Errors
    /// Returns error if the stored account state cannot be read.
    pub fn new(blockchain: Arc<RpcBlockchain>, store: Arc<Store>) -> eyre::Result<Self> {
        let account = store
            .account_state()
            .wrap_err("failed to load account state")?;
        Ok(Self {
            blockchain,
            store,
            state: StateChannel::default(),
            account: StateChannel::new(account),
            in_flight: AtomicBool::new(false),
        })
    }

    pub fn account_state(&self) -> Option<AccountState> {
        self.account.get()
    }

    /// Every change of `(balance, nonce)`.
    pub fn subscribe(&self) -> broadcast::Receiver<Option<AccountState>> {
        self.account.subscribe()
    }

    pub fn sync_state(&self) -> SyncState {
        self.state.get()
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Fetches balance and nonce together. A refresh already in flight absorbs this one.
    #[tracing::instrument(skip(self), fields(address = %self.blockchain.address()))]
    pub async fn refresh(&self) {
        let Some(_guard) = FlightGuard::try_begin(&self.in_flight) else {
            debug!("account refresh already in flight");
            return;
        };
        self.state.set(SyncState::Syncing);

        let fetched = tokio::try_join!(
            self.blockchain.balance(),
            self.blockchain.nonce(BlockTag::Latest)
        );
        let (balance, nonce) = match fetched {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "account state fetch failed");
                self.state.set(SyncState::NotSynced(SyncError::from(err)));
                return;
            }
        };

        let account = AccountState { balance, nonce };
        if self.account.get().as_ref() != Some(&account) {
            if let Err(err) = self.store.save_account_state(&account) {
                warn!(error = %err, "failed to persist account state");
                self.state.set(SyncState::NotSynced(SyncError::storage(&err)));
                return;
            }
            info!(%balance, nonce, "account state changed");
            self.account.set(Some(account));
        }
        self.state.set(SyncState::Synced);
    }

    pub fn stop(&self) {
        self.state.set(SyncState::NotSynced(SyncError::NotStarted));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{store, ScriptedSyncer};
    use alloy::primitives::U256;
    use evmkit_data::rpc::RpcError;
    use serde_json::json;
    use tokio::sync::broadcast::error::TryRecvError;

    fn tracker(syncer: &Arc<ScriptedSyncer>, store: Arc<Store>) -> AccountStateTracker {
        AccountStateTracker::new(syncer.blockchain(), store).unwrap()
    }

    #[tokio::test]
    async fn emits_and_persists_only_on_change() {
        let syncer = ScriptedSyncer::new();
        syncer.answer("eth_getBalance", json!("0x64"));
        syncer.answer("eth_getTransactionCount", json!("0x2"));
        let store = store();
        let tracker = tracker(&syncer, Arc::clone(&store));
        let mut changes = tracker.subscribe();

        tracker.refresh().await;
        tracker.refresh().await;

        let expected = AccountState {
            balance: U256::from(100u64),
            nonce: 2,
        };
        assert_eq!(changes.try_recv(), Ok(Some(expected.clone())));
        assert_eq!(changes.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(store.account_state().unwrap(), Some(expected));
        assert_eq!(tracker.sync_state(), SyncState::Synced);
    }

    #[tokio::test]
    async fn persisted_state_suppresses_first_emit_after_restart() {
        let syncer = ScriptedSyncer::new();
        syncer.answer("eth_getBalance", json!("0x64"));
        syncer.answer("eth_getTransactionCount", json!("0x2"));
        let store = store();
        store
            .save_account_state(&AccountState {
                balance: U256::from(100u64),
                nonce: 2,
            })
            .unwrap();
        let tracker = tracker(&syncer, store);
        let mut changes = tracker.subscribe();

        tracker.refresh().await;

        assert_eq!(changes.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test]
    async fn connectivity_failure_is_not_synced() {
        let syncer = ScriptedSyncer::new();
        syncer.fail_with(Some(RpcError::Timeout));
        let tracker = tracker(&syncer, store());

        tracker.refresh().await;

        assert_eq!(
            tracker.sync_state(),
            SyncState::NotSynced(SyncError::NoNetworkConnection)
        );
        assert_eq!(tracker.account_state(), None);
    }
}
