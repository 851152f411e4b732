//! Domain types persisted by [`Store`](crate::store::Store) and passed between sync stages.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

use crate::rpc::models::{RpcLog, RpcTransaction, RpcTransactionReceipt};

/// A transaction as known to the wallet.
///
/// Different syncers know different slices of a transaction (an explorer feed may know
/// only the hash and timestamp, the node knows the full body), so most fields are
/// optional. Records for the same hash are combined with [`Transaction::merge`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction hash, the identity of the record.
    pub hash: B256,
    /// Block timestamp in unix seconds, or first-seen time while pending.
    pub timestamp: u64,
    /// Execution reverted.
    pub is_failed: bool,
    /// Containing block (None while pending).
    pub block_number: Option<u64>,
    /// Index within the block, taken from the receipt.
    pub transaction_index: Option<u64>,
    /// Sender.
    pub from: Option<Address>,
    /// Recipient (None for contract creation or when unknown).
    pub to: Option<Address>,
    /// Native value in wei.
    pub value: Option<U256>,
    /// Calldata.
    pub input: Option<Bytes>,
    /// Sender nonce.
    pub nonce: Option<u64>,
    /// Legacy gas price in wei.
    pub gas_price: Option<u128>,
    /// EIP-1559 fee cap in wei.
    pub max_fee_per_gas: Option<u128>,
    /// EIP-1559 priority fee in wei.
    pub max_priority_fee_per_gas: Option<u128>,
    /// Gas limit.
    pub gas_limit: Option<u64>,
    /// Gas consumed, from the receipt.
    pub gas_used: Option<u64>,
    /// Set when a different transaction with the same sender and nonce was mined.
    pub replaced_with: Option<B256>,
    /// Insertion order assigned by the store; breaks ties in history ordering.
    pub sync_order: Option<u64>,
}

impl Transaction {
    /// Minimal record carrying only the identity and a timestamp.
    pub fn new(hash: B256, timestamp: u64) -> Self {
        Self {
            hash,
            timestamp,
            ..Default::default()
        }
    }

    /// Builds a full record from a node body, optionally completed by its receipt.
    pub fn from_rpc(
        tx: &RpcTransaction,
        timestamp: u64,
        receipt: Option<&RpcTransactionReceipt>,
    ) -> Self {
        let mut transaction = Self {
            hash: tx.hash,
            timestamp,
            is_failed: false,
            block_number: tx.block_number(),
            transaction_index: tx.transaction_index.map(|i| i.to::<u64>()),
            from: Some(tx.from),
            to: tx.to,
            value: Some(tx.value),
            input: Some(tx.input.clone()),
            nonce: Some(tx.nonce()),
            gas_price: tx.gas_price.map(|p| p.to::<u128>()),
            max_fee_per_gas: tx.max_fee_per_gas.map(|p| p.to::<u128>()),
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas.map(|p| p.to::<u128>()),
            gas_limit: Some(tx.gas.to::<u64>()),
            gas_used: None,
            replaced_with: None,
            sync_order: None,
        };

        if let Some(receipt) = receipt {
            transaction.block_number = Some(receipt.block_number());
            transaction.transaction_index = Some(receipt.transaction_index.to::<u64>());
            transaction.gas_used = Some(receipt.gas_used.to::<u64>());
            transaction.is_failed = receipt.succeeded() == Some(false);
            if let Some(price) = receipt.effective_gas_price {
                transaction.gas_price = Some(price.to::<u128>());
            }
        }

        transaction
    }

    /// Null-coalescing merge: for each field `self` wins unless it is absent.
    ///
    /// Both records must describe the same hash. Failure is sticky across merges.
    pub fn merge(self, other: Transaction) -> Transaction {
        debug_assert_eq!(self.hash, other.hash, "merging different transactions");
        Transaction {
            hash: self.hash,
            timestamp: if self.timestamp != 0 {
                self.timestamp
            } else {
                other.timestamp
            },
            is_failed: self.is_failed || other.is_failed,
            block_number: self.block_number.or(other.block_number),
            transaction_index: self.transaction_index.or(other.transaction_index),
            from: self.from.or(other.from),
            to: self.to.or(other.to),
            value: self.value.or(other.value),
            input: self.input.or(other.input),
            nonce: self.nonce.or(other.nonce),
            gas_price: self.gas_price.or(other.gas_price),
            max_fee_per_gas: self.max_fee_per_gas.or(other.max_fee_per_gas),
            max_priority_fee_per_gas: self
                .max_priority_fee_per_gas
                .or(other.max_priority_fee_per_gas),
            gas_limit: self.gas_limit.or(other.gas_limit),
            gas_used: self.gas_used.or(other.gas_used),
            replaced_with: self.replaced_with.or(other.replaced_with),
            sync_order: self.sync_order.or(other.sync_order),
        }
    }

    /// Not yet mined and not known to be replaced.
    pub fn is_pending(&self) -> bool {
        self.block_number.is_none() && self.replaced_with.is_none()
    }

    /// Whether `address` sent or directly received this transaction.
    pub fn involves(&self, address: &Address) -> bool {
        self.from.as_ref() == Some(address) || self.to.as_ref() == Some(address)
    }
}

/// A hash discovered by some syncer whose full record has not been fetched yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotSyncedTransaction {
    pub hash: B256,
    /// Body already fetched in an earlier attempt.
    pub transaction: Option<RpcTransaction>,
    /// Timestamp known from the discovering source, if any.
    pub timestamp: Option<u64>,
    /// Resolution attempts that made no progress.
    pub retry_count: u32,
}

impl NotSyncedTransaction {
    pub fn new(hash: B256) -> Self {
        Self {
            hash,
            transaction: None,
            timestamp: None,
            retry_count: 0,
        }
    }

    pub fn with_timestamp(hash: B256, timestamp: u64) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..Self::new(hash)
        }
    }
}

/// Execution receipt of a mined transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub block_hash: B256,
    pub block_number: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub cumulative_gas_used: u64,
    pub gas_used: u64,
    /// Effective gas price in wei (post London).
    pub effective_gas_price: Option<u128>,
    /// Address of the contract created by this transaction.
    pub contract_address: Option<Address>,
    pub logs_bloom: Bytes,
    /// `Some(true)` success, `Some(false)` reverted, `None` unknown.
    pub status: Option<bool>,
}

impl From<&RpcTransactionReceipt> for TransactionReceipt {
    fn from(receipt: &RpcTransactionReceipt) -> Self {
        Self {
            transaction_hash: receipt.transaction_hash,
            transaction_index: receipt.transaction_index.to::<u64>(),
            block_hash: receipt.block_hash,
            block_number: receipt.block_number(),
            from: receipt.from,
            to: receipt.to,
            cumulative_gas_used: receipt.cumulative_gas_used.to::<u64>(),
            gas_used: receipt.gas_used.to::<u64>(),
            effective_gas_price: receipt.effective_gas_price.map(|p| p.to::<u128>()),
            contract_address: receipt.contract_address,
            logs_bloom: receipt.logs_bloom.clone(),
            status: receipt.succeeded(),
        }
    }
}

/// Event log emitted by a transaction.
///
/// At most four topics are kept, matching the EVM limit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLog {
    pub transaction_hash: B256,
    /// Log index within the block.
    pub log_index: u64,
    pub block_number: u64,
    pub transaction_index: u64,
    /// Emitting contract.
    pub address: Address,
    /// `topics[0]` is the event signature for non-anonymous events.
    pub topics: Vec<B256>,
    /// Non-indexed data.
    pub data: Bytes,
    pub removed: bool,
}

impl TransactionLog {
    /// Converts a receipt log, filling position fields from the receipt when the node
    /// omitted them.
    pub fn from_rpc(log: &RpcLog, receipt: &RpcTransactionReceipt, position: usize) -> Self {
        Self {
            transaction_hash: log.transaction_hash.unwrap_or(receipt.transaction_hash),
            log_index: log
                .log_index
                .map(|i| i.to::<u64>())
                .unwrap_or(position as u64),
            block_number: log
                .block_number
                .map(|n| n.to::<u64>())
                .unwrap_or_else(|| receipt.block_number()),
            transaction_index: log
                .transaction_index
                .map(|i| i.to::<u64>())
                .unwrap_or_else(|| receipt.transaction_index.to::<u64>()),
            address: log.address,
            topics: log.topics.iter().take(4).copied().collect(),
            data: log.data.clone(),
            removed: log.removed,
        }
    }

    pub fn topic(&self, index: usize) -> Option<&B256> {
        self.topics.get(index)
    }
}

/// Value transfer made by a contract during execution of a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTransaction {
    /// Hash of the outer transaction.
    pub hash: B256,
    pub block_number: u64,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    /// Position of the call in the trace, unique within the outer transaction.
    pub trace_id: String,
}

/// Persisted cursor of one transaction syncer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSyncerState {
    pub syncer_id: String,
    /// Highest block the syncer has fully processed.
    pub last_block_number: u64,
}

/// Pending transaction known to have been superseded by another with the same nonce.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedTransaction {
    pub hash: B256,
    pub replaced_with: B256,
}

/// Native balance and nonce of the wallet account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: U256,
    pub nonce: u64,
}

/// A tag attached to a transaction; used to filter history.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionTag {
    pub name: String,
    pub hash: B256,
}

impl TransactionTag {
    pub fn new(name: impl Into<String>, hash: B256) -> Self {
        Self {
            name: name.into(),
            hash,
        }
    }
}
