//! Wire shapes returned by Ethereum JSON-RPC nodes.
//!
//! Quantities arrive as `0x`-prefixed hex strings; the ruint-backed primitives
//! deserialize them directly. Unknown fields are ignored.

use alloy::primitives::{Address, Bytes, B256, U128, U256, U64};
use serde::{Deserialize, Serialize};

/// Transaction body as returned by `eth_getTransactionByHash`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: B256,
    pub nonce: U64,
    #[serde(default)]
    pub block_hash: Option<B256>,
    /// `None` while the transaction sits in the mempool.
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub transaction_index: Option<U64>,
    pub from: Address,
    /// `None` for contract creation.
    #[serde(default)]
    pub to: Option<Address>,
    pub value: U256,
    #[serde(default)]
    pub gas_price: Option<U128>,
    #[serde(default)]
    pub max_fee_per_gas: Option<U128>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<U128>,
    pub gas: U64,
    pub input: Bytes,
}

impl RpcTransaction {
    pub fn block_number(&self) -> Option<u64> {
        self.block_number.map(|n| n.to::<u64>())
    }

    pub fn nonce(&self) -> u64 {
        self.nonce.to::<u64>()
    }
}

/// Receipt as returned by `eth_getTransactionReceipt`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransactionReceipt {
    pub transaction_hash: B256,
    pub transaction_index: U64,
    pub block_hash: B256,
    pub block_number: U64,
    pub from: Address,
    #[serde(default)]
    pub to: Option<Address>,
    pub cumulative_gas_used: U64,
    pub gas_used: U64,
    #[serde(default)]
    pub effective_gas_price: Option<U128>,
    #[serde(default)]
    pub contract_address: Option<Address>,
    #[serde(default)]
    pub logs: Vec<RpcLog>,
    pub logs_bloom: Bytes,
    /// `0x1` success, `0x0` reverted. Absent on pre-Byzantium receipts.
    #[serde(default)]
    pub status: Option<U64>,
}

impl RpcTransactionReceipt {
    pub fn block_number(&self) -> u64 {
        self.block_number.to::<u64>()
    }

    /// `Some(true)` when the execution succeeded, `None` when the node did not say.
    pub fn succeeded(&self) -> Option<bool> {
        self.status.map(|s| s == U64::from(1))
    }
}

/// Event log entry, embedded in receipts and returned by `eth_getLogs`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub transaction_hash: Option<B256>,
    #[serde(default)]
    pub transaction_index: Option<U64>,
    #[serde(default)]
    pub log_index: Option<U64>,
    #[serde(default)]
    pub removed: bool,
}

/// Block header fields returned by `eth_getBlockByNumber` with `full = false`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub number: U64,
    #[serde(default)]
    pub hash: Option<B256>,
    pub timestamp: U64,
    #[serde(default)]
    pub base_fee_per_gas: Option<U128>,
}

impl RpcBlock {
    pub fn number(&self) -> u64 {
        self.number.to::<u64>()
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp.to::<u64>()
    }
}
