//! Block-explorer backed syncers, one per transaction list.
//!
//! Explorer rows are partial: they carry the hash, block and timestamp, and sometimes
//! more. Every discovered hash goes into the not-synced pool so the resolver later
//! completes it from the node (body, receipt with logs, block timestamp).

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;

use evmkit_data::explorer::TransactionProvider;
use evmkit_data::state::{SyncError, SyncState};
use evmkit_data::store::Store;
use evmkit_data::types::{InternalTransaction, NotSyncedTransaction, Transaction};

use super::{Batch, SyncerCore, TransactionSyncer};
use crate::pool::NotSyncedPool;

/// Which explorer list a syncer follows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExplorerFeed {
    /// Plain transactions sent or received by the address.
    Transactions,
    /// Value transfers made by contracts to or from the address.
    Internal,
    Eip20,
    Eip721,
    Eip1155,
}

impl ExplorerFeed {
    pub const ALL: [ExplorerFeed; 5] = [
        ExplorerFeed::Transactions,
        ExplorerFeed::Internal,
        ExplorerFeed::Eip20,
        ExplorerFeed::Eip721,
        ExplorerFeed::Eip1155,
    ];

    pub fn syncer_id(self) -> &'static str {
        match self {
            ExplorerFeed::Transactions => "ethereum_transaction_syncer",
            ExplorerFeed::Internal => "internal_transaction_syncer",
            ExplorerFeed::Eip20 => "eip20_transaction_syncer",
            ExplorerFeed::Eip721 => "eip721_transaction_syncer",
            ExplorerFeed::Eip1155 => "eip1155_transaction_syncer",
        }
    }
}

pub struct ExplorerTransactionSyncer {
    feed: ExplorerFeed,
    provider: Arc<dyn TransactionProvider>,
    pool: Arc<NotSyncedPool>,
    store: Arc<Store>,
    core: SyncerCore,
}

impl ExplorerTransactionSyncer {
    pub fn new(
        feed: ExplorerFeed,
        provider: Arc<dyn TransactionProvider>,
        pool: Arc<NotSyncedPool>,
        store: Arc<Store>,
    ) -> Self {
        Self {
            feed,
            provider,
            pool,
            core: SyncerCore::new(feed.syncer_id(), Arc::clone(&store)),
            store,
        }
    }

    pub fn feed(&self) -> ExplorerFeed {
        self.feed
    }

    async fn fetch(&self, start_block: u64, initial: bool) -> Result<Batch, SyncError> {
        let provider_error = |err: eyre::Report| SyncError::provider(&err);
        let transactions: Vec<Transaction> = match self.feed {
            ExplorerFeed::Transactions => self
                .provider
                .transactions(start_block)
                .await
                .map_err(provider_error)?
                .into_iter()
                .map(|row| Transaction {
                    is_failed: row.is_error,
                    block_number: Some(row.block_number),
                    transaction_index: row.transaction_index,
                    from: Some(row.from),
                    to: row.to,
                    value: Some(row.value),
                    input: row.input,
                    nonce: row.nonce,
                    gas_price: row.gas_price,
                    gas_limit: row.gas_limit,
                    gas_used: row.gas_used,
                    ..Transaction::new(row.hash, row.timestamp)
                })
                .collect(),
            ExplorerFeed::Internal => {
                let rows = self
                    .provider
                    .internal_transactions(start_block)
                    .await
                    .map_err(provider_error)?;
                let internals: Vec<InternalTransaction> = rows
                    .iter()
                    .map(|row| InternalTransaction {
                        hash: row.hash,
                        block_number: row.block_number,
                        from: row.from,
                        to: row.to,
                        value: row.value,
                        trace_id: row.trace_id.clone(),
                    })
                    .collect();
                self.store
                    .save_internal_transactions(&internals)
                    .map_err(|err| SyncError::storage(&err))?;
                rows.into_iter()
                    .map(|row| located(row.hash, row.timestamp, row.block_number))
                    .collect()
            }
            ExplorerFeed::Eip20 => self
                .provider
                .token_transactions(start_block)
                .await
                .map_err(provider_error)?
                .into_iter()
                .map(|row| Transaction {
                    nonce: row.nonce,
                    transaction_index: row.transaction_index,
                    ..located(row.hash, row.timestamp, row.block_number)
                })
                .collect(),
            ExplorerFeed::Eip721 => self
                .provider
                .eip721_transactions(start_block)
                .await
                .map_err(provider_error)?
                .into_iter()
                .map(|row| located(row.hash, row.timestamp, row.block_number))
                .collect(),
            ExplorerFeed::Eip1155 => self
                .provider
                .eip1155_transactions(start_block)
                .await
                .map_err(provider_error)?
                .into_iter()
                .map(|row| located(row.hash, row.timestamp, row.block_number))
                .collect(),
        };

        let last_block = transactions.iter().filter_map(|t| t.block_number).max();

        let mut seen = HashSet::new();
        let discovered: Vec<NotSyncedTransaction> = transactions
            .iter()
            .filter(|t| seen.insert(t.hash))
            .map(|t| NotSyncedTransaction::with_timestamp(t.hash, t.timestamp))
            .collect();
        self.pool
            .add(discovered, initial)
            .map_err(|err| SyncError::storage(&err))?;

        Ok(Batch {
            transactions,
            last_block,
        })
    }
}

/// Record carrying only identity, timestamp and block.
fn located(hash: alloy::primitives::B256, timestamp: u64, block_number: u64) -> Transaction {
    Transaction {
        block_number: Some(block_number),
        ..Transaction::new(hash, timestamp)
    }
}

#[async_trait]
impl TransactionSyncer for ExplorerTransactionSyncer {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn state(&self) -> SyncState {
        self.core.state()
    }

    fn subscribe_state(&self) -> broadcast::Receiver<SyncState> {
        self.core.subscribe_state()
    }

    #[tracing::instrument(skip(self), fields(syncer = self.feed.syncer_id()))]
    async fn transactions(&self) -> (Vec<Transaction>, bool) {
        self.core
            .run(|start_block, initial| self.fetch(start_block, initial))
            .await
    }

    fn stop(&self) {
        self.core.stop();
    }
}
