//! Pending/full transaction resolver.
//!
//! Walks the not-synced pool in bounded batches. For every hash it fetches the body,
//! then (once mined) the receipt and the block timestamp, and promotes the entry to a
//! stored [`Transaction`]. A mined transaction drops every other pending transaction
//! of the same sender with the same nonce.

use alloy::primitives::B256;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use evmkit_data::rpc::models::{RpcTransaction, RpcTransactionReceipt};
use evmkit_data::rpc::RpcBlockchain;
use evmkit_data::state::{StateChannel, SyncError, SyncState};
use evmkit_data::store::Store;
use evmkit_data::types::{
    DroppedTransaction, NotSyncedTransaction, Transaction, TransactionLog, TransactionReceipt,
};

use super::{FlightGuard, TransactionSyncer};
use crate::config::DEFAULT_RESOLVER_BATCH_SIZE;
use crate::pool::NotSyncedPool;

pub const RESOLVER_SYNCER_ID: &str = "pending_transaction_syncer";

fn storage(err: eyre::Report) -> SyncError {
    SyncError::storage(&err)
}

/// What one resolved pool entry produced.
struct Resolved {
    transactions: Vec<Transaction>,
    initial: bool,
}

pub struct TransactionResolver {
    blockchain: Arc<RpcBlockchain>,
    pool: Arc<NotSyncedPool>,
    store: Arc<Store>,
    batch_size: usize,
    state: StateChannel<SyncState>,
    in_flight: AtomicBool,
}

impl TransactionResolver {
    pub fn new(blockchain: Arc<RpcBlockchain>, pool: Arc<NotSyncedPool>, store: Arc<Store>) -> Self {
        Self {
            blockchain,
            pool,
            store,
            batch_size: DEFAULT_RESOLVER_BATCH_SIZE,
            state: StateChannel::default(),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Resolves pooled entries until the pool is empty or every remaining entry has
    /// been tried once without progress.
    ///
    /// Returns the promoted transactions plus those they dropped, and whether all of
    /// them were discovered by an initial sync. A round already in flight absorbs
    /// this call.
    #[tracing::instrument(skip(self))]
    pub async fn resolve(&self) -> (Vec<Transaction>, bool) {
        let Some(_guard) = FlightGuard::try_begin(&self.in_flight) else {
            debug!("resolver already in flight");
            return (Vec::new(), false);
        };
        self.state.set(SyncState::Syncing);

        let mut resolved = Vec::new();
        let mut initial = true;
        let result = self.drain(&mut resolved, &mut initial).await;

        match result {
            Ok(()) => {
                info!(count = resolved.len(), "resolver round complete");
                self.state.set(SyncState::Synced);
            }
            Err(err) => {
                warn!(error = %err, resolved = resolved.len(), "resolver round failed");
                self.state.set(SyncState::NotSynced(err));
            }
        }
        let initial = initial && !resolved.is_empty();
        (resolved, initial)
    }

    async fn drain(&self, out: &mut Vec<Transaction>, initial: &mut bool) -> Result<(), SyncError> {
        let mut budget = self.pool.count().map_err(storage)?;

        while budget > 0 {
            let batch = self.pool.get(self.batch_size).map_err(storage)?;
            if batch.is_empty() {
                break;
            }

            let results = join_all(batch.into_iter().map(|entry| self.resolve_one(entry))).await;

            // Keep what succeeded before reporting the first failure.
            let mut failure = None;
            for result in results {
                match result {
                    Ok(Some(done)) => {
                        *initial &= done.initial;
                        out.extend(done.transactions);
                    }
                    Ok(None) => budget = budget.saturating_sub(1),
                    Err(err) => {
                        failure.get_or_insert(err);
                    }
                }
            }
            if let Some(err) = failure {
                return Err(err);
            }
        }
        Ok(())
    }

    /// `Ok(None)` when the entry cannot be completed yet; its retry count is bumped.
    async fn resolve_one(&self, mut entry: NotSyncedTransaction) -> Result<Option<Resolved>, SyncError> {
        if self.store.has_receipt(&entry.hash).map_err(storage)? {
            self.pool.remove(&entry.hash).map_err(storage)?;
            return Ok(Some(Resolved {
                transactions: Vec::new(),
                initial: self.pool.take_initial(&entry.hash),
            }));
        }

        let body = match entry.transaction.clone() {
            Some(body) => body,
            None => match self.blockchain.transaction(entry.hash).await? {
                Some(body) => {
                    entry.transaction = Some(body.clone());
                    self.pool.update(&entry).map_err(storage)?;
                    body
                }
                None => return self.defer(entry),
            },
        };

        if body.block_number().is_none() {
            return self.finalize_pending(&entry, &body).map(Some);
        }

        let Some(receipt) = self.blockchain.transaction_receipt(entry.hash).await? else {
            return self.defer(entry);
        };

        let timestamp = match entry.timestamp {
            Some(timestamp) => timestamp,
            None => match self.blockchain.block(receipt.block_number()).await? {
                Some(block) => block.timestamp(),
                None => return self.defer(entry),
            },
        };

        self.finalize_mined(&entry, &body, &receipt, timestamp).map(Some)
    }

    fn defer(&self, mut entry: NotSyncedTransaction) -> Result<Option<Resolved>, SyncError> {
        entry.retry_count += 1;
        debug!(hash = %entry.hash, retry_count = entry.retry_count, "not resolvable yet");
        self.pool.update(&entry).map_err(storage)?;
        Ok(None)
    }

    /// Stores a mempool transaction, keeping its first-seen time across re-checks.
    fn finalize_pending(
        &self,
        entry: &NotSyncedTransaction,
        body: &RpcTransaction,
    ) -> Result<Resolved, SyncError> {
        let timestamp = match entry.timestamp {
            Some(timestamp) => timestamp,
            None => self
                .store
                .transaction(&entry.hash)
                .map_err(storage)?
                .map(|t| t.timestamp)
                .unwrap_or_else(|| chrono::Utc::now().timestamp().max(0) as u64),
        };
        let transaction = Transaction::from_rpc(body, timestamp, None);
        self.store
            .save_transactions(std::slice::from_ref(&transaction))
            .map_err(storage)?;
        self.pool.remove(&entry.hash).map_err(storage)?;

        Ok(Resolved {
            transactions: vec![transaction],
            initial: self.pool.take_initial(&entry.hash),
        })
    }

    fn finalize_mined(
        &self,
        entry: &NotSyncedTransaction,
        body: &RpcTransaction,
        receipt: &RpcTransactionReceipt,
        timestamp: u64,
    ) -> Result<Resolved, SyncError> {
        let hash = entry.hash;
        let transaction = Transaction::from_rpc(body, timestamp, Some(receipt));

        let dropped: Vec<DroppedTransaction> = self
            .store
            .pending_transactions_with_nonce(&body.from, body.nonce())
            .map_err(storage)?
            .into_iter()
            .filter(|t| t.hash != hash)
            .map(|t| DroppedTransaction {
                hash: t.hash,
                replaced_with: hash,
            })
            .collect();

        let logs: Vec<TransactionLog> = receipt
            .logs
            .iter()
            .enumerate()
            .map(|(position, log)| TransactionLog::from_rpc(log, receipt, position))
            .collect();

        self.store
            .save_transactions(std::slice::from_ref(&transaction))
            .map_err(storage)?;
        self.store
            .save_receipts(&[TransactionReceipt::from(receipt)])
            .map_err(storage)?;
        self.store.save_logs(&logs).map_err(storage)?;

        let mut transactions = vec![transaction];
        if !dropped.is_empty() {
            self.store.mark_dropped(&dropped).map_err(storage)?;
            let hashes: Vec<B256> = dropped.iter().map(|d| d.hash).collect();
            for dropped_hash in &hashes {
                self.pool.remove(dropped_hash).map_err(storage)?;
                self.pool.take_initial(dropped_hash);
            }
            info!(%hash, dropped = hashes.len(), "nonce reused, pending transactions dropped");
            transactions.extend(self.store.transactions_by_hashes(&hashes).map_err(storage)?);
        }
        self.pool.remove(&hash).map_err(storage)?;

        Ok(Resolved {
            transactions,
            initial: self.pool.take_initial(&hash),
        })
    }

    /// Re-pools every stored pending transaction without waking anyone, so each
    /// round re-checks whether it was mined or replaced.
    fn requeue_pending(&self) -> Result<usize, SyncError> {
        let pending = self.store.pending_transactions().map_err(storage)?;
        let entries = pending
            .into_iter()
            .map(|t| NotSyncedTransaction::new(t.hash))
            .collect();
        self.pool.requeue(entries).map_err(storage)
    }
}

#[async_trait]
impl TransactionSyncer for TransactionResolver {
    fn id(&self) -> &str {
        RESOLVER_SYNCER_ID
    }

    fn state(&self) -> SyncState {
        self.state.get()
    }

    fn subscribe_state(&self) -> broadcast::Receiver<SyncState> {
        self.state.subscribe()
    }

    async fn transactions(&self) -> (Vec<Transaction>, bool) {
        if let Err(err) = self.requeue_pending() {
            warn!(error = %err, "failed to re-check pending transactions");
            self.state.set(SyncState::NotSynced(err));
            return (Vec::new(), false);
        }
        self.resolve().await
    }

    fn stop(&self) {
        self.state.set(SyncState::NotSynced(SyncError::NotStarted));
    }
}
