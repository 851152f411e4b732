//! Public transaction API: decorated history, the live stream of new transactions,
//! and the write path (estimate, sign, send).

use alloy::primitives::{keccak256, Address, Bytes, B256, U128, U256};
use async_trait::async_trait;
use eyre::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use evmkit_data::rpc::{BlockTag, CallRequest, RpcBlockchain, RpcError};
use evmkit_data::store::{Store, TransactionQuery};
use evmkit_data::types::{InternalTransaction, NotSyncedTransaction, Transaction, TransactionLog};
use evmkit_decoration::{DecorationManager, FullTransaction, TagGenerator};

use crate::manager::TransactionsSynced;
use crate::pool::NotSyncedPool;

const STREAM_CHANNEL_CAPACITY: usize = 64;

/// What to send: recipient (`None` deploys a contract), value and calldata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionData {
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
}

/// Fee model of an outgoing transaction, in wei.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GasPrice {
    Legacy(u128),
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
    },
}

/// A fully specified, unsigned transaction handed to the signer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: GasPrice,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub input: Bytes,
}

/// Signing capability. Keys never enter this crate.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Returns the encoded signed transaction, ready for `eth_sendRawTransaction`.
    async fn sign(&self, transaction: &RawTransaction) -> Result<Bytes>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionStatus {
    Success,
    Failed,
    /// Known to the node but not mined.
    Pending,
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("no signer configured")]
    NoSigner,
    #[error("signing failed: {0:#}")]
    Signer(eyre::Report),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("failed to record sent transaction: {0:#}")]
    Storage(eyre::Report),
}

pub struct TransactionManager {
    address: Address,
    blockchain: Arc<RpcBlockchain>,
    store: Arc<Store>,
    pool: Arc<NotSyncedPool>,
    decoration: Arc<DecorationManager>,
    tags: TagGenerator,
    signer: Option<Arc<dyn TransactionSigner>>,
    chain_id: u64,
    stream: broadcast::Sender<Vec<FullTransaction>>,
}

impl TransactionManager {
    pub fn new(
        blockchain: Arc<RpcBlockchain>,
        store: Arc<Store>,
        pool: Arc<NotSyncedPool>,
        decoration: Arc<DecorationManager>,
        signer: Option<Arc<dyn TransactionSigner>>,
        chain_id: u64,
    ) -> Self {
        let address = blockchain.address();
        let (stream, _) = broadcast::channel(STREAM_CHANNEL_CAPACITY);
        Self {
            address,
            blockchain,
            store,
            pool,
            decoration,
            tags: TagGenerator::new(address),
            signer,
            chain_id,
            stream,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn decoration(&self) -> &Arc<DecorationManager> {
        &self.decoration
    }

    /// Decorated batches of new transactions relevant to the address. Batches from an
    /// initial sync are not published.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<FullTransaction>> {
        self.stream.subscribe()
    }

    /// History relevant to the address, newest first.
    ///
    /// `tags` is AND-of-OR: every inner list must match at least one tag. Paging
    /// continues strictly after `from_hash` in (timestamp, index, sync order) order.
    ///
    /// # Errors
    /// Returns error if a storage read fails.
    pub fn transactions(
        &self,
        tags: Vec<Vec<String>>,
        from_hash: Option<B256>,
        limit: Option<usize>,
    ) -> Result<Vec<FullTransaction>> {
        let transactions = self
            .store
            .transactions(&TransactionQuery {
                address: Some(self.address),
                tags,
                from_hash,
                limit,
                pending_only: false,
            })
            .wrap_err("failed to query transaction history")?;
        self.decorate(transactions)
    }

    /// Pending, not dropped transactions relevant to the address.
    pub fn pending_transactions(&self, tags: Vec<Vec<String>>) -> Result<Vec<FullTransaction>> {
        let transactions = self
            .store
            .transactions(&TransactionQuery {
                address: Some(self.address),
                tags,
                pending_only: true,
                ..Default::default()
            })
            .wrap_err("failed to query pending transactions")?;
        self.decorate(transactions)
    }

    pub fn full_transactions(&self, hashes: &[B256]) -> Result<Vec<FullTransaction>> {
        let transactions = self
            .store
            .transactions_by_hashes(hashes)
            .wrap_err("failed to load transactions by hash")?;
        self.decorate(transactions)
    }

    fn decorate(&self, transactions: Vec<Transaction>) -> Result<Vec<FullTransaction>> {
        let (internals, logs) = self.context(&transactions)?;
        Ok(self
            .decoration
            .decorate_transactions(transactions, &internals, &logs))
    }

    fn context(
        &self,
        transactions: &[Transaction],
    ) -> Result<(Vec<InternalTransaction>, Vec<TransactionLog>)> {
        let hashes: Vec<B256> = transactions.iter().map(|t| t.hash).collect();
        let internals = self
            .store
            .internal_transactions(&hashes)
            .wrap_err("failed to load internal transactions")?;
        let logs = self.store.logs(&hashes).wrap_err("failed to load logs")?;
        Ok((internals, logs))
    }

    /// Decorates and tags a persisted batch, then publishes the part relevant to the
    /// address unless the batch came from an initial sync.
    ///
    /// # Errors
    /// Returns error if loading context or saving tags fails.
    #[tracing::instrument(skip_all, fields(count = batch.transactions.len(), initial = batch.initial))]
    pub fn handle_synced(&self, batch: &TransactionsSynced) -> Result<Vec<FullTransaction>> {
        let (internals, logs) = self.context(&batch.transactions)?;
        let full =
            self.decoration
                .decorate_transactions(batch.transactions.clone(), &internals, &logs);

        self.store
            .save_tags(&self.tags.generate(&full))
            .wrap_err("failed to save transaction tags")?;

        let relevant_hashes: HashSet<B256> = batch
            .transactions
            .iter()
            .filter(|t| is_relevant(&self.address, t, &internals, &logs))
            .map(|t| t.hash)
            .collect();
        let relevant: Vec<FullTransaction> = full
            .into_iter()
            .filter(|f| relevant_hashes.contains(&f.hash()))
            .collect();

        if !batch.initial && !relevant.is_empty() {
            debug!(count = relevant.len(), "publishing new transactions");
            let _ = self.stream.send(relevant.clone());
        }
        Ok(relevant)
    }

    /// Node gas estimate for `data` sent from the address.
    pub async fn estimate_gas(
        &self,
        data: &TransactionData,
        gas_price: Option<GasPrice>,
    ) -> Result<u64, RpcError> {
        let mut request = CallRequest {
            from: Some(self.address),
            to: data.to,
            value: Some(data.value),
            data: Some(data.input.clone()),
            ..Default::default()
        };
        match gas_price {
            Some(GasPrice::Legacy(price)) => request.gas_price = Some(U128::from(price)),
            Some(GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            }) => {
                request.max_fee_per_gas = Some(U128::from(max_fee_per_gas));
                request.max_priority_fee_per_gas = Some(U128::from(max_priority_fee_per_gas));
            }
            None => {}
        }
        self.blockchain.estimate_gas(request).await
    }

    /// Current node gas price in wei.
    pub async fn gas_price(&self) -> Result<u128, RpcError> {
        self.blockchain.gas_price().await
    }

    /// Read-only call against the latest block.
    pub async fn call(&self, to: Address, input: Bytes) -> Result<Bytes, RpcError> {
        let request = CallRequest {
            to: Some(to),
            data: Some(input),
            ..Default::default()
        };
        self.blockchain.call(request, BlockTag::Latest).await
    }

    /// Signs, broadcasts and records a transaction.
    ///
    /// Without an explicit `nonce` the node's pending nonce is used. The recorded
    /// transaction is pending and pooled, so the resolver promotes it once mined.
    ///
    /// # Errors
    /// Returns [`SendError`] when no signer is configured, signing fails, the node
    /// rejects the transaction, or recording it fails.
    #[tracing::instrument(skip(self, data), fields(to = ?data.to, value = %data.value))]
    pub async fn send_transaction(
        &self,
        data: TransactionData,
        gas_price: GasPrice,
        gas_limit: u64,
        nonce: Option<u64>,
    ) -> Result<FullTransaction, SendError> {
        let signer = self.signer.as_ref().ok_or(SendError::NoSigner)?;
        let nonce = match nonce {
            Some(nonce) => nonce,
            None => self.blockchain.nonce(BlockTag::Pending).await?,
        };

        let raw = RawTransaction {
            chain_id: self.chain_id,
            nonce,
            gas_price,
            gas_limit,
            to: data.to,
            value: data.value,
            input: data.input.clone(),
        };
        let signed = signer.sign(&raw).await.map_err(SendError::Signer)?;
        let local_hash = keccak256(&signed);
        let hash = self.blockchain.send_raw_transaction(signed).await?;
        if hash != local_hash {
            warn!(%hash, %local_hash, "node reported a different transaction hash");
        }
        info!(%hash, nonce, "transaction sent");

        let (legacy, max_fee, max_priority) = match gas_price {
            GasPrice::Legacy(price) => (Some(price), None, None),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => (None, Some(max_fee_per_gas), Some(max_priority_fee_per_gas)),
        };
        let transaction = Transaction {
            from: Some(self.address),
            to: data.to,
            value: Some(data.value),
            input: Some(data.input.clone()),
            nonce: Some(nonce),
            gas_price: legacy,
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: max_priority,
            gas_limit: Some(gas_limit),
            ..Transaction::new(hash, chrono::Utc::now().timestamp().max(0) as u64)
        };

        let decoration =
            self.decoration
                .decorate_call(self.address, data.to, data.value, &data.input);
        let full = FullTransaction::new(transaction, decoration);
        self.record_sent(&full).map_err(SendError::Storage)?;

        let _ = self.stream.send(vec![full.clone()]);
        Ok(full)
    }

    fn record_sent(&self, full: &FullTransaction) -> Result<()> {
        self.store
            .save_transactions(std::slice::from_ref(&full.transaction))
            .wrap_err("failed to save sent transaction")?;
        self.store
            .save_tags(&[(full.hash(), self.tags.tags(full))])
            .wrap_err("failed to save sent transaction tags")?;
        self.pool
            .add(vec![NotSyncedTransaction::new(full.hash())], false)?;
        Ok(())
    }

    /// Mined status from the receipt, falling back to whether the node knows the hash.
    pub async fn transaction_receipt_status(&self, hash: B256) -> Result<TransactionStatus, RpcError> {
        if let Some(receipt) = self.blockchain.transaction_receipt(hash).await? {
            return Ok(match receipt.succeeded() {
                Some(false) => TransactionStatus::Failed,
                _ => TransactionStatus::Success,
            });
        }
        Ok(match self.blockchain.transaction(hash).await? {
            Some(_) => TransactionStatus::Pending,
            None => TransactionStatus::NotFound,
        })
    }
}

/// Sent or received directly, took part in an internal transfer, or appears as an
/// indexed topic of one of the transaction's logs.
fn is_relevant(
    address: &Address,
    transaction: &Transaction,
    internals: &[InternalTransaction],
    logs: &[TransactionLog],
) -> bool {
    if transaction.involves(address) {
        return true;
    }
    let word = address.into_word();
    internals
        .iter()
        .filter(|itx| itx.hash == transaction.hash)
        .any(|itx| itx.from == *address || itx.to == *address)
        || logs
            .iter()
            .filter(|log| log.transaction_hash == transaction.hash)
            .any(|log| log.topics.iter().skip(1).any(|topic| *topic == word))
}
