//! Composition root: builds every component for one address and drives them from
//! node events.

use eyre::{Context, Result};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use evmkit_data::explorer::{EtherscanTransactionProvider, TransactionProvider};
use evmkit_data::rpc::{RpcBlockchain, RpcSyncer, RpcSyncerEvent, RpcSyncerState};
use evmkit_data::state::SyncState;
use evmkit_data::store::Store;
use evmkit_data::types::AccountState;
use evmkit_decoration::{DecorationManager, FullTransaction};

use crate::account::AccountStateTracker;
use crate::config::KitConfig;
use crate::manager::{TransactionSyncManager, TransactionsSynced};
use crate::pool::NotSyncedPool;
use crate::registry::RpcProviderRegistry;
use crate::syncers::{ExplorerFeed, ExplorerTransactionSyncer, TransactionResolver};
use crate::transaction_manager::{TransactionManager, TransactionSigner};

/// Wallet kit for one address: account state, synced history and the send path.
pub struct EvmKit {
    config: KitConfig,
    parts: Arc<Parts>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

struct Parts {
    rpc: Arc<dyn RpcSyncer>,
    store: Arc<Store>,
    pool: Arc<NotSyncedPool>,
    account: Arc<AccountStateTracker>,
    sync_manager: Arc<TransactionSyncManager>,
    transaction_manager: Arc<TransactionManager>,
}

impl EvmKit {
    /// Opens storage and wires every component. Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns error if storage cannot be opened, or an RPC or explorer client cannot
    /// be built.
    #[tracing::instrument(skip_all, fields(address = %config.address, rpc = config.rpc.url()))]
    pub fn build(
        config: KitConfig,
        registry: &RpcProviderRegistry,
        signer: Option<Arc<dyn TransactionSigner>>,
    ) -> Result<Self> {
        if let Some(parent) = Path::new(&config.db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).wrap_err_with(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }
        let store = Arc::new(Store::new(&config.db_path)?);
        let rpc = registry
            .syncer(&config.rpc, config.request_timeout)
            .wrap_err("failed to create rpc syncer")?;
        Self::assemble(config, rpc, store, signer)
    }

    /// Wires components over an existing RPC syncer and store.
    ///
    /// # Errors
    /// Returns error if the stored account state cannot be read or the explorer client
    /// cannot be built.
    pub fn assemble(
        config: KitConfig,
        rpc: Arc<dyn RpcSyncer>,
        store: Arc<Store>,
        signer: Option<Arc<dyn TransactionSigner>>,
    ) -> Result<Self> {
        let blockchain = Arc::new(RpcBlockchain::new(Arc::clone(&rpc), config.address));
        let pool = Arc::new(NotSyncedPool::new(Arc::clone(&store)));
        let account = Arc::new(AccountStateTracker::new(
            Arc::clone(&blockchain),
            Arc::clone(&store),
        )?);
        let sync_manager = Arc::new(TransactionSyncManager::new(Arc::clone(&store)));

        if let Some(explorer) = &config.explorer {
            let provider: Arc<dyn TransactionProvider> = Arc::new(
                EtherscanTransactionProvider::new(
                    &explorer.url,
                    explorer.api_key.clone(),
                    config.address,
                    config.request_timeout,
                )
                .wrap_err("failed to create explorer provider")?,
            );
            for feed in ExplorerFeed::ALL {
                sync_manager.add_syncer(Arc::new(ExplorerTransactionSyncer::new(
                    feed,
                    Arc::clone(&provider),
                    Arc::clone(&pool),
                    Arc::clone(&store),
                )));
            }
        } else {
            info!("no explorer configured, history comes from the node only");
        }
        sync_manager.add_resolver(Arc::new(
            TransactionResolver::new(Arc::clone(&blockchain), Arc::clone(&pool), Arc::clone(&store))
                .with_batch_size(config.resolver_batch_size),
        ));

        let transaction_manager = Arc::new(TransactionManager::new(
            blockchain,
            Arc::clone(&store),
            Arc::clone(&pool),
            Arc::new(DecorationManager::with_defaults(config.address)),
            signer,
            config.chain_id,
        ));

        Ok(Self {
            config,
            parts: Arc::new(Parts {
                rpc,
                store,
                pool,
                account,
                sync_manager,
                transaction_manager,
            }),
            driver: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &KitConfig {
        &self.config
    }

    /// Connects to the node and starts reacting to its events. Idempotent.
    pub async fn start(&self) {
        {
            let mut driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
            if driver.is_some() {
                debug!("kit already started");
                return;
            }
            // Subscribe before starting the transport so the first Ready is not missed.
            let events = Events {
                rpc: self.parts.rpc.subscribe(),
                account: self.parts.account.subscribe(),
                pool: self.parts.pool.subscribe(),
                synced: self.parts.sync_manager.subscribe(),
            };
            *driver = Some(tokio::spawn(drive(Arc::clone(&self.parts), events)));
        }

        self.parts.rpc.start().await;
        info!(address = %self.config.address, source = %self.parts.rpc.source(), "kit started");
        if self.parts.rpc.state().is_ready() {
            self.parts.on_ready().await;
        }
    }

    /// Stops the driver and the node connection; every state returns to
    /// `NotSynced(NotStarted)`.
    pub async fn stop(&self) {
        if let Some(handle) = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.parts.rpc.stop().await;
        self.parts.account.stop();
        self.parts.sync_manager.stop();
        info!(address = %self.config.address, "kit stopped");
    }

    /// Re-polls the node, the account and every syncer.
    pub async fn refresh(&self) {
        self.parts.rpc.refresh().await;
        if self.parts.rpc.state().is_ready() {
            self.parts.on_ready().await;
        }
    }

    pub fn rpc_state(&self) -> RpcSyncerState {
        self.parts.rpc.state()
    }

    pub fn account_state(&self) -> Option<AccountState> {
        self.parts.account.account_state()
    }

    pub fn subscribe_account(&self) -> broadcast::Receiver<Option<AccountState>> {
        self.parts.account.subscribe()
    }

    pub fn account_sync_state(&self) -> SyncState {
        self.parts.account.sync_state()
    }

    pub fn transactions_sync_state(&self) -> SyncState {
        self.parts.sync_manager.sync_state()
    }

    pub fn subscribe_transactions_sync_state(&self) -> broadcast::Receiver<SyncState> {
        self.parts.sync_manager.subscribe_state()
    }

    pub fn last_block_height(&self) -> Result<Option<u64>> {
        self.parts.store.last_block_height()
    }

    /// Decorated batches of new transactions relevant to the address.
    pub fn subscribe_transactions(&self) -> broadcast::Receiver<Vec<FullTransaction>> {
        self.parts.transaction_manager.subscribe()
    }

    pub fn transaction_manager(&self) -> &Arc<TransactionManager> {
        &self.parts.transaction_manager
    }

    pub fn sync_manager(&self) -> &Arc<TransactionSyncManager> {
        &self.parts.sync_manager
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.parts.store
    }
}

impl Drop for EvmKit {
    fn drop(&mut self) {
        if let Some(handle) = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

struct Events {
    rpc: broadcast::Receiver<RpcSyncerEvent>,
    account: broadcast::Receiver<Option<AccountState>>,
    pool: broadcast::Receiver<()>,
    synced: broadcast::Receiver<TransactionsSynced>,
}

impl Parts {
    async fn on_ready(&self) {
        self.account.refresh().await;
        self.sync_manager.sync().await;
    }

    /// Persists a new block height. Returns whether it differs from the stored one.
    fn record_block_height(&self, height: u64) -> bool {
        match self.store.last_block_height() {
            Ok(Some(stored)) if stored == height => false,
            Ok(_) => {
                if let Err(err) = self.store.save_last_block_height(height) {
                    warn!(height, error = %err, "failed to save last block height");
                }
                true
            }
            Err(err) => {
                warn!(height, error = %err, "failed to read last block height");
                true
            }
        }
    }

    fn handle_synced(&self, batch: &TransactionsSynced) {
        if batch.transactions.is_empty() {
            return;
        }
        if let Err(err) = self.transaction_manager.handle_synced(batch) {
            warn!(error = %err, "failed to process synced transactions");
        }
    }
}

/// `None` when the channel is closed. A lagged receive is logged and yields `Some(None)`.
fn received<T>(result: Result<T, RecvError>, channel: &str) -> Option<Option<T>> {
    match result {
        Ok(value) => Some(Some(value)),
        Err(RecvError::Lagged(skipped)) => {
            warn!(channel, skipped, "event receiver lagged");
            Some(None)
        }
        Err(RecvError::Closed) => None,
    }
}

async fn drive(parts: Arc<Parts>, mut events: Events) {
    loop {
        tokio::select! {
            event = events.rpc.recv() => {
                let Some(event) = received(event, "rpc") else { break };
                match event {
                    Some(RpcSyncerEvent::StateChanged(state)) => {
                        debug!(?state, "rpc state changed");
                        if state.is_ready() {
                            parts.on_ready().await;
                        }
                    }
                    Some(RpcSyncerEvent::LastBlockHeight(height)) => {
                        if parts.record_block_height(height) {
                            debug!(height, "new block");
                            parts.on_ready().await;
                        }
                    }
                    None => {}
                }
            }
            change = events.account.recv() => {
                let Some(change) = received(change, "account") else { break };
                if change.is_some() {
                    parts.sync_manager.sync().await;
                }
            }
            signal = events.pool.recv() => {
                let Some(signal) = received(signal, "pool") else { break };
                if signal.is_some() {
                    parts.sync_manager.resolve_pending().await;
                }
            }
            batch = events.synced.recv() => {
                let Some(batch) = received(batch, "synced") else { break };
                if let Some(batch) = batch {
                    parts.handle_synced(&batch);
                }
            }
        }
    }
    debug!("kit driver finished");
}
