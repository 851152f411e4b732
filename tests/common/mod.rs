//! Shared fakes and fixtures for the cross-crate scenario tests.

#![allow(dead_code)]

use alloy::primitives::{address, Address, Bytes, B256, U128, U256, U64};
use async_trait::async_trait;
use evmkit_data::explorer::{
    ProviderEip1155Transaction, ProviderEip721Transaction, ProviderInternalTransaction,
    ProviderTokenTransaction, ProviderTransaction, TransactionProvider,
};
use evmkit_data::rpc::models::{RpcBlock, RpcTransaction, RpcTransactionReceipt};
use evmkit_data::rpc::{
    RpcBlockchain, RpcCall, RpcError, RpcSocket, RpcSyncer, RpcSyncerEvent, RpcSyncerState,
    SocketEvent,
};
use evmkit_data::store::Store;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

pub const USER: Address = address!("a7d9ddbe1f17865597fbd27ec712455208b6b76d");
pub const OTHER: Address = address!("70997970c51812e339d9b73b0245ad59e15ebbf9");
pub const USDC: Address = address!("A0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48");

/// Creates an in-memory SQLite store with all migrations applied.
///
/// # Panics
/// Panics if the in-memory database cannot be created (should never happen).
pub fn test_store() -> Arc<Store> {
    Arc::new(Store::new(":memory:").expect("in-memory store should always open"))
}

/// Deterministic hash for fixture `i`.
pub fn tx_hash(i: u64) -> B256 {
    B256::from(U256::from(i))
}

/// Polls `condition` for up to a second.
///
/// # Panics
/// Panics if the condition never holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

/// Node stand-in. Answers by method, or by method plus first param, and is always Ready.
pub struct FakeNode {
    answers: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<RpcCall>>,
    events: broadcast::Sender<RpcSyncerEvent>,
}

impl FakeNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            events: broadcast::channel(16).0,
        })
    }

    pub fn answer(&self, method: &str, value: Value) {
        self.answers
            .lock()
            .expect("lock")
            .insert(method.to_string(), value);
    }

    pub fn answer_for(&self, method: &str, param: Value, value: Value) {
        self.answers
            .lock()
            .expect("lock")
            .insert(format!("{method}:{param}"), value);
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    pub fn blockchain(self: &Arc<Self>) -> Arc<RpcBlockchain> {
        Arc::new(RpcBlockchain::new(Arc::clone(self) as Arc<dyn RpcSyncer>, USER))
    }

    /// Scripts the body, and when mined the receipt and block, of `tx`.
    pub fn script(&self, tx: &RpcTransaction, receipt: Option<&RpcTransactionReceipt>, timestamp: u64) {
        self.answer_for("eth_getTransactionByHash", json!(tx.hash), json!(tx));
        if let Some(receipt) = receipt {
            self.answer_for("eth_getTransactionReceipt", json!(tx.hash), json!(receipt));
            let block = RpcBlock {
                number: receipt.block_number,
                hash: Some(receipt.block_hash),
                timestamp: U64::from(timestamp),
                base_fee_per_gas: None,
            };
            self.answer_for("eth_getBlockByNumber", json!(receipt.block_number), json!(block));
        }
    }
}

#[async_trait]
impl RpcSyncer for FakeNode {
    fn source(&self) -> String {
        "fake".into()
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
        self.calls.lock().expect("lock").push(call.clone());
        let answers = self.answers.lock().expect("lock");
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

/// Explorer stand-in serving fixed rows from `start_block` on, counting calls.
#[derive(Default)]
pub struct FakeTransactionProvider {
    pub transactions: Mutex<Vec<ProviderTransaction>>,
    pub token_transactions: Mutex<Vec<ProviderTokenTransaction>>,
    pub delay: Option<Duration>,
    pub fail: Mutex<Option<String>>,
    pub calls: AtomicUsize,
    pub starts: Mutex<Vec<u64>>,
}

impl FakeTransactionProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `start_block` of every call, in order.
    pub fn starts(&self) -> Vec<u64> {
        self.starts.lock().expect("lock").clone()
    }

    async fn enter(&self, start_block: u64) -> eyre::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.starts.lock().expect("lock").push(start_block);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.fail.lock().expect("lock").clone() {
            Some(reason) => Err(eyre::eyre!(reason)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TransactionProvider for FakeTransactionProvider {
    async fn transactions(&self, start_block: u64) -> eyre::Result<Vec<ProviderTransaction>> {
        self.enter(start_block).await?;
        Ok(self
            .transactions
            .lock()
            .expect("lock")
            .iter()
            .filter(|t| t.block_number >= start_block)
            .cloned()
            .collect())
    }

    async fn internal_transactions(
        &self,
        start_block: u64,
    ) -> eyre::Result<Vec<ProviderInternalTransaction>> {
        self.enter(start_block).await?;
        Ok(Vec::new())
    }

    async fn internal_transactions_by_hash(
        &self,
        _hash: B256,
    ) -> eyre::Result<Vec<ProviderInternalTransaction>> {
        Ok(Vec::new())
    }

    async fn token_transactions(
        &self,
        start_block: u64,
    ) -> eyre::Result<Vec<ProviderTokenTransaction>> {
        self.enter(start_block).await?;
        Ok(self
            .token_transactions
            .lock()
            .expect("lock")
            .iter()
            .filter(|t| t.block_number >= start_block)
            .cloned()
            .collect())
    }

    async fn eip721_transactions(
        &self,
        start_block: u64,
    ) -> eyre::Result<Vec<ProviderEip721Transaction>> {
        self.enter(start_block).await?;
        Ok(Vec::new())
    }

    async fn eip1155_transactions(
        &self,
        start_block: u64,
    ) -> eyre::Result<Vec<ProviderEip1155Transaction>> {
        self.enter(start_block).await?;
        Ok(Vec::new())
    }
}

/// Socket driven by hand: the test pushes incoming traffic and reads sent frames.
/// Requests for a method with a scripted answer are answered automatically.
pub struct FakeSocket {
    events: Mutex<Option<mpsc::Sender<SocketEvent>>>,
    sent: Mutex<Vec<Value>>,
    answers: Mutex<HashMap<String, Value>>,
}

impl FakeSocket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            answers: Mutex::new(HashMap::new()),
        })
    }

    pub fn answer(&self, method: &str, result: Value) {
        self.answers
            .lock()
            .expect("lock")
            .insert(method.to_string(), result);
    }

    pub async fn push(&self, event: SocketEvent) {
        let tx = self
            .events
            .lock()
            .expect("lock")
            .clone()
            .expect("connected");
        tx.send(event).await.expect("pump alive");
    }

    /// Request ids sent for `method`.
    pub fn sent_ids(&self, method: &str) -> Vec<u64> {
        self.sent
            .lock()
            .expect("lock")
            .iter()
            .filter(|v| v["method"] == method)
            .filter_map(|v| v["id"].as_u64())
            .collect()
    }
}

#[async_trait]
impl RpcSocket for FakeSocket {
    fn source(&self) -> String {
        "fake socket".into()
    }

    async fn connect(&self) -> mpsc::Receiver<SocketEvent> {
        let (tx, rx) = mpsc::channel(16);
        *self.events.lock().expect("lock") = Some(tx);
        rx
    }

    async fn send(&self, text: String) -> Result<(), RpcError> {
        let value: Value = serde_json::from_str(&text).expect("request is json");
        let reply = value["method"]
            .as_str()
            .and_then(|method| self.answers.lock().expect("lock").get(method).cloned())
            .map(|result| json!({"jsonrpc": "2.0", "id": value["id"], "result": result}));
        self.sent.lock().expect("lock").push(value);

        if let Some(reply) = reply {
            let tx = self.events.lock().expect("lock").clone();
            if let Some(tx) = tx {
                // The pump may be the caller; answer from another task.
                tokio::spawn(async move {
                    let _ = tx.send(SocketEvent::Message(reply.to_string())).await;
                });
            }
        }
        Ok(())
    }

    async fn close(&self) {}
}

/// Explorer row for a plain transfer from `from` to `to` mined in `block`.
pub fn sample_provider_transaction(
    hash: B256,
    block: u64,
    from: Address,
    to: Address,
) -> ProviderTransaction {
    ProviderTransaction {
        block_number: block,
        timestamp: 1_708_617_600 + block * 12,
        hash,
        nonce: Some(0),
        transaction_index: Some(0),
        from,
        to: Some(to),
        value: U256::from(10u64).pow(U256::from(18u64)),
        gas_limit: Some(21_000),
        gas_price: Some(20_000_000_000),
        gas_used: Some(21_000),
        is_error: false,
        input: Some(Bytes::new()),
    }
}

/// Node view of a plain 1000 wei transfer. `block` is `None` while pending.
pub fn sample_rpc_transaction(
    hash: B256,
    from: Address,
    to: Address,
    nonce: u64,
    block: Option<u64>,
) -> RpcTransaction {
    RpcTransaction {
        hash,
        nonce: U64::from(nonce),
        block_hash: block.map(|_| B256::repeat_byte(0xbb)),
        block_number: block.map(U64::from),
        transaction_index: block.map(|_| U64::from(0)),
        from,
        to: Some(to),
        value: U256::from(1_000u64),
        gas_price: Some(U128::from(20_000_000_000u64)),
        max_fee_per_gas: None,
        max_priority_fee_per_gas: None,
        gas: U64::from(21_000),
        input: Bytes::new(),
    }
}

/// Successful receipt for `tx` in `block`.
pub fn sample_receipt(tx: &RpcTransaction, block: u64) -> RpcTransactionReceipt {
    RpcTransactionReceipt {
        transaction_hash: tx.hash,
        transaction_index: U64::from(0),
        block_hash: B256::repeat_byte(0xbb),
        block_number: U64::from(block),
        from: tx.from,
        to: tx.to,
        cumulative_gas_used: U64::from(21_000),
        gas_used: U64::from(21_000),
        effective_gas_price: Some(U128::from(18_000_000_000u64)),
        contract_address: None,
        logs: Vec::new(),
        logs_bloom: Bytes::new(),
        status: Some(U64::from(1)),
    }
}
