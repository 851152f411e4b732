//! Not-synced transaction pool.
//!
//! Holds hashes that some source reported but whose body, receipt and timestamp are
//! not yet known. Backed by the store, so pooled work survives restarts.
//!
//! Hashes discovered by an initial (full history) sync are remembered in memory, so
//! the resolver can report them as initial too and they are not announced as new.

use alloy::primitives::B256;
use dashmap::DashSet;
use eyre::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use evmkit_data::store::Store;
use evmkit_data::types::NotSyncedTransaction;

const SIGNAL_CHANNEL_CAPACITY: usize = 16;

pub struct NotSyncedPool {
    store: Arc<Store>,
    signal: broadcast::Sender<()>,
    initial: DashSet<B256>,
}

impl NotSyncedPool {
    pub fn new(store: Arc<Store>) -> Self {
        let (signal, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        Self {
            store,
            signal,
            initial: DashSet::new(),
        }
    }

    /// Pools every entry whose hash is not finalized yet and wakes the resolver once
    /// if anything new was inserted.
    ///
    /// A hash is finalized when the store holds its receipt. Hashes already pooled are
    /// left untouched. `initial` marks hashes found by a first full-history sync.
    /// Returns how many entries were inserted.
    ///
    /// # Errors
    /// Returns error if a storage read or write fails.
    pub fn add(&self, entries: Vec<NotSyncedTransaction>, initial: bool) -> Result<usize> {
        let fresh = self.unfinalized(entries)?;
        // Only hashes that end up pooled are marked, so every mark is taken later.
        let marked: Vec<B256> = if initial {
            fresh.iter().map(|entry| entry.hash).collect()
        } else {
            Vec::new()
        };
        for hash in &marked {
            self.initial.insert(*hash);
        }
        let inserted = match self.store_fresh(fresh) {
            Ok(inserted) => inserted,
            Err(err) => {
                for hash in &marked {
                    self.initial.remove(hash);
                }
                return Err(err);
            }
        };
        if inserted > 0 {
            debug!(inserted, "new not-synced transactions");
            let _ = self.signal.send(());
        }
        Ok(inserted)
    }

    /// Like [`add`](Self::add) but without waking the resolver. Used by the resolver
    /// itself when it re-checks stored pending transactions.
    pub fn requeue(&self, entries: Vec<NotSyncedTransaction>) -> Result<usize> {
        let fresh = self.unfinalized(entries)?;
        self.store_fresh(fresh)
    }

    fn unfinalized(&self, entries: Vec<NotSyncedTransaction>) -> Result<Vec<NotSyncedTransaction>> {
        let mut fresh = Vec::with_capacity(entries.len());
        for entry in entries {
            let finalized = self
                .store
                .has_receipt(&entry.hash)
                .wrap_err("failed to check receipt before pooling")?;
            if !finalized {
                fresh.push(entry);
            }
        }
        Ok(fresh)
    }

    fn store_fresh(&self, fresh: Vec<NotSyncedTransaction>) -> Result<usize> {
        if fresh.is_empty() {
            return Ok(0);
        }
        self.store
            .add_not_synced(&fresh)
            .wrap_err("failed to pool not-synced transactions")
    }

    pub fn update(&self, entry: &NotSyncedTransaction) -> Result<()> {
        self.store
            .update_not_synced(entry)
            .wrap_err_with(|| format!("failed to update pooled transaction {}", entry.hash))
    }

    pub fn remove(&self, hash: &B256) -> Result<()> {
        self.store
            .remove_not_synced(hash)
            .wrap_err_with(|| format!("failed to remove pooled transaction {hash}"))
    }

    /// Next batch for the resolver, least-retried first.
    pub fn get(&self, limit: usize) -> Result<Vec<NotSyncedTransaction>> {
        self.store
            .not_synced_transactions(limit)
            .wrap_err("failed to read not-synced pool")
    }

    /// Whether `hash` was discovered by an initial sync. Clears the mark.
    pub fn take_initial(&self, hash: &B256) -> bool {
        self.initial.remove(hash).is_some()
    }

    pub fn count(&self) -> Result<usize> {
        self.store
            .not_synced_count()
            .wrap_err("failed to count not-synced pool")
    }

    /// One `()` per `add` call that inserted at least one entry.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.signal.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, Bytes, U256};
    use evmkit_data::types::TransactionReceipt;
    use tokio::sync::broadcast::error::TryRecvError;

    fn hash(i: u64) -> B256 {
        B256::from(U256::from(i))
    }

    fn pool() -> (Arc<Store>, NotSyncedPool) {
        let store = Arc::new(Store::new(":memory:").unwrap());
        (Arc::clone(&store), NotSyncedPool::new(store))
    }

    fn receipt(hash: B256) -> TransactionReceipt {
        TransactionReceipt {
            transaction_hash: hash,
            transaction_index: 0,
            block_hash: B256::ZERO,
            block_number: 1,
            from: Address::ZERO,
            to: None,
            cumulative_gas_used: 21_000,
            gas_used: 21_000,
            effective_gas_price: None,
            contract_address: None,
            logs_bloom: Bytes::new(),
            status: Some(true),
        }
    }

    #[test]
    fn add_is_idempotent_and_signals_once() {
        let (_, pool) = pool();
        let mut signals = pool.subscribe();

        let entries = vec![NotSyncedTransaction::new(hash(1)), NotSyncedTransaction::new(hash(2))];
        assert_eq!(pool.add(entries.clone(), false).unwrap(), 2);
        assert_eq!(pool.add(entries, false).unwrap(), 0);

        assert_eq!(pool.count().unwrap(), 2);
        assert_eq!(signals.try_recv(), Ok(()));
        assert_eq!(signals.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn finalized_hashes_are_skipped() {
        let (store, pool) = pool();
        store.save_receipts(&[receipt(hash(1))]).unwrap();
        let mut signals = pool.subscribe();

        assert_eq!(pool.add(vec![NotSyncedTransaction::new(hash(1))], false).unwrap(), 0);
        assert_eq!(pool.count().unwrap(), 0);
        assert_eq!(signals.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn requeue_does_not_signal() {
        let (_, pool) = pool();
        let mut signals = pool.subscribe();

        assert_eq!(pool.requeue(vec![NotSyncedTransaction::new(hash(3))]).unwrap(), 1);
        assert_eq!(signals.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn initial_marks_are_taken_once() {
        let (_, pool) = pool();
        pool.add(vec![NotSyncedTransaction::new(hash(7))], true).unwrap();

        assert!(pool.take_initial(&hash(7)));
        assert!(!pool.take_initial(&hash(7)));
        assert!(!pool.take_initial(&hash(8)));
    }

    #[test]
    fn finalized_hashes_are_not_marked_initial() {
        let (store, pool) = pool();
        store.save_receipts(&[receipt(hash(1))]).unwrap();

        pool.add(
            vec![NotSyncedTransaction::new(hash(1)), NotSyncedTransaction::new(hash(2))],
            true,
        )
        .unwrap();

        assert_eq!(pool.initial.len(), 1);
        assert!(!pool.take_initial(&hash(1)));
        assert!(pool.take_initial(&hash(2)));
        assert!(pool.initial.is_empty());
    }

    #[test]
    fn update_and_remove_touch_one_entry() {
        let (_, pool) = pool();
        pool.add(
            vec![NotSyncedTransaction::new(hash(1)), NotSyncedTransaction::new(hash(2))],
            false,
        )
        .unwrap();

        let mut first = NotSyncedTransaction::new(hash(1));
        first.retry_count = 3;
        pool.update(&first).unwrap();
        pool.remove(&hash(2)).unwrap();

        assert_eq!(pool.get(10).unwrap(), vec![first]);
    }
}
