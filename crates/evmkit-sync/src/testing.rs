//! Fakes shared by the unit tests of this crate.

use alloy::primitives::{Address, Bytes, B256, U128, U256, U64};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use evmkit_data::rpc::models::{RpcBlock, RpcTransaction, RpcTransactionReceipt};
use evmkit_data::rpc::{RpcBlockchain, RpcCall, RpcError, RpcSyncer, RpcSyncerEvent, RpcSyncerState};
use evmkit_data::store::Store;

pub(crate) const USER: Address = alloy::primitives::address!("a7d9ddbe1f17865597fbd27ec712455208b6b76d");

pub(crate) fn hash(i: u64) -> B256 {
    B256::from(U256::from(i))
}

pub(crate) fn store() -> Arc<Store> {
    Arc::new(Store::new(":memory:").unwrap())
}

/// Node stand-in that answers by method name, or by method plus first param.
pub(crate) struct ScriptedSyncer {
    answers: Mutex<HashMap<String, Value>>,
    failure: Mutex<Option<RpcError>>,
    calls: Mutex<Vec<RpcCall>>,
    events: broadcast::Sender<RpcSyncerEvent>,
}

impl ScriptedSyncer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            events: broadcast::channel(16).0,
        })
    }

    pub(crate) fn answer(&self, method: &str, value: Value) {
        self.answers.lock().unwrap().insert(method.to_string(), value);
    }

    pub(crate) fn answer_for(&self, method: &str, param: Value, value: Value) {
        self.answers
            .lock()
            .unwrap()
            .insert(format!("{method}:{param}"), value);
    }

    pub(crate) fn fail_with(&self, error: Option<RpcError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub(crate) fn calls(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    pub(crate) fn emit(&self, event: RpcSyncerEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn blockchain(self: &Arc<Self>) -> Arc<RpcBlockchain> {
        Arc::new(RpcBlockchain::new(
            Arc::clone(self) as Arc<dyn RpcSyncer>,
            USER,
        ))
    }

    /// Scripts a transaction body, its receipt (when mined) and its block.
    pub(crate) fn script_transaction(
        &self,
        tx: &RpcTransaction,
        receipt: Option<&RpcTransactionReceipt>,
        block_timestamp: u64,
    ) {
        self.answer_for("eth_getTransactionByHash", json!(tx.hash), json!(tx));
        if let Some(receipt) = receipt {
            self.answer_for("eth_getTransactionReceipt", json!(tx.hash), json!(receipt));
            let block = RpcBlock {
                number: receipt.block_number,
                hash: Some(receipt.block_hash),
                timestamp: U64::from(block_timestamp),
                base_fee_per_gas: None,
            };
            self.answer_for("eth_getBlockByNumber", json!(receipt.block_number), json!(block));
        }
    }
}

#[async_trait]
impl RpcSyncer for ScriptedSyncer {
    fn source(&self) -> String {
        "scripted".into()
    }

    fn state(&self) -> RpcSyncerState {
        RpcSyncerState::Ready
    }

    fn subscribe(&self) -> broadcast::Receiver<RpcSyncerEvent> {
        self.events.subscribe()
    }

    async fn start(&self) {}

    async fn stop(&self) {}

    async fn refresh(&self) {}

    async fn send(&self, call: RpcCall) -> Result<Value, RpcError> {
        self.calls.lock().unwrap().push(call.clone());
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        let answers = self.answers.lock().unwrap();
        let keyed = call
            .params
            .first()
            .and_then(|param| answers.get(&format!("{}:{param}", call.method)));
        Ok(keyed
            .or_else(|| answers.get(&call.method))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

pub(crate) fn rpc_transaction(hash: B256, from: Address, nonce: u64, block: Option<u64>) -> RpcTransaction {
    RpcTransaction {
        hash,
        nonce: U64::from(nonce),
        block_hash: block.map(|_| B256::repeat_byte(0xbb)),
        block_number: block.map(U64::from),
        transaction_index: block.map(|_| U64::from(0)),
        from,
        to: Some(Address::repeat_byte(0x22)),
        value: U256::from(1_000u64),
        gas_price: Some(U128::from(20_000_000_000u64)),
        max_fee_per_gas: None,
        max_priority_fee_per_gas: None,
        gas: U64::from(21_000),
        input: Bytes::new(),
    }
}

pub(crate) fn rpc_receipt(tx: &RpcTransaction, block: u64) -> RpcTransactionReceipt {
    RpcTransactionReceipt {
        transaction_hash: tx.hash,
        transaction_index: U64::from(3),
        block_hash: B256::repeat_byte(0xbb),
        block_number: U64::from(block),
        from: tx.from,
        to: tx.to,
        cumulative_gas_used: U64::from(42_000),
        gas_used: U64::from(21_000),
        effective_gas_price: Some(U128::from(18_000_000_000u64)),
        contract_address: None,
        logs: Vec::new(),
        logs_bloom: Bytes::new(),
        status: Some(U64::from(1)),
    }
}
