//! JSON-RPC 2.0 envelopes and the typed calls the wallet issues.
//!
//! Every call implements [`JsonRpc`]: it names its method, renders its params and
//! decodes the `result` member into a typed output. Transports only ever see the
//! untyped [`RpcCall`].

use alloy::primitives::{Address, Bytes, B256, U128, U256, U64};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::error::RpcError;
use super::models::{RpcBlock, RpcLog, RpcTransaction, RpcTransactionReceipt};

/// Method name and params of a request, before an id is assigned.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcCall {
    pub method: String,
    pub params: Vec<Value>,
}

impl RpcCall {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// A typed JSON-RPC request.
pub trait JsonRpc: Send + Sync {
    type Output: DeserializeOwned + Send;

    fn method(&self) -> &'static str;

    fn params(&self) -> Vec<Value>;

    fn call(&self) -> RpcCall {
        RpcCall::new(self.method(), self.params())
    }

    /// Decodes the `result` member of a successful response.
    fn parse(&self, result: Value) -> Result<Self::Output, RpcError> {
        serde_json::from_value(result)
            .map_err(|e| RpcError::InvalidResponse(format!("{}: {e}", self.method())))
    }
}

/// Outgoing request envelope.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a [Value],
}

impl<'a> JsonRpcRequest<'a> {
    pub fn new(id: u64, call: &'a RpcCall) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: &call.method,
            params: &call.params,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
}

/// Response envelope, matched to its request by `id`.
#[derive(Clone, Debug, Deserialize)]
pub struct JsonRpcResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    /// Splits the envelope into the result or the node's error. An absent result is `null`.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(RpcError::Response {
                code: error.code,
                message: error.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct SubscriptionParams {
    pub subscription: String,
    pub result: Value,
}

/// Push message delivered for an active `eth_subscribe` subscription.
#[derive(Clone, Debug, Deserialize)]
pub struct SubscriptionNotification {
    pub method: String,
    pub params: SubscriptionParams,
}

/// Anything a WebSocket node may send.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum IncomingMessage {
    Response(JsonRpcResponse),
    Notification(SubscriptionNotification),
}

/// Block selector for state queries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlockTag {
    #[default]
    Latest,
    Pending,
    Number(u64),
}

impl BlockTag {
    fn to_value(self) -> Value {
        match self {
            BlockTag::Latest => json!("latest"),
            BlockTag::Pending => json!("pending"),
            BlockTag::Number(n) => json!(U64::from(n)),
        }
    }
}

/// `eth_blockNumber`
pub struct BlockNumber;

impl JsonRpc for BlockNumber {
    type Output = U64;

    fn method(&self) -> &'static str {
        "eth_blockNumber"
    }

    fn params(&self) -> Vec<Value> {
        Vec::new()
    }
}

/// `eth_getBalance`
pub struct GetBalance {
    pub address: Address,
    pub block: BlockTag,
}

impl JsonRpc for GetBalance {
    type Output = U256;

    fn method(&self) -> &'static str {
        "eth_getBalance"
    }

    fn params(&self) -> Vec<Value> {
        vec![json!(self.address), self.block.to_value()]
    }
}

/// `eth_getTransactionCount`
pub struct GetTransactionCount {
    pub address: Address,
    pub block: BlockTag,
}

impl JsonRpc for GetTransactionCount {
    type Output = U64;

    fn method(&self) -> &'static str {
        "eth_getTransactionCount"
    }

    fn params(&self) -> Vec<Value> {
        vec![json!(self.address), self.block.to_value()]
    }
}

/// `eth_getBlockByNumber` without transaction bodies.
pub struct GetBlockByNumber {
    pub number: u64,
}

impl JsonRpc for GetBlockByNumber {
    type Output = Option<RpcBlock>;

    fn method(&self) -> &'static str {
        "eth_getBlockByNumber"
    }

    fn params(&self) -> Vec<Value> {
        vec![BlockTag::Number(self.number).to_value(), json!(false)]
    }
}

/// `eth_getTransactionByHash`
pub struct GetTransactionByHash {
    pub hash: B256,
}

impl JsonRpc for GetTransactionByHash {
    type Output = Option<RpcTransaction>;

    fn method(&self) -> &'static str {
        "eth_getTransactionByHash"
    }

    fn params(&self) -> Vec<Value> {
        vec![json!(self.hash)]
    }
}

/// `eth_getTransactionReceipt`
pub struct GetTransactionReceipt {
    pub hash: B256,
}

impl JsonRpc for GetTransactionReceipt {
    type Output = Option<RpcTransactionReceipt>;

    fn method(&self) -> &'static str {
        "eth_getTransactionReceipt"
    }

    fn params(&self) -> Vec<Value> {
        vec![json!(self.hash)]
    }
}

/// `eth_getLogs` over an inclusive block range.
///
/// `topics[i] = None` matches any value at that position.
#[derive(Clone, Debug, Default)]
pub struct GetLogs {
    pub address: Option<Address>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub topics: Vec<Option<B256>>,
}

impl JsonRpc for GetLogs {
    type Output = Vec<RpcLog>;

    fn method(&self) -> &'static str {
        "eth_getLogs"
    }

    fn params(&self) -> Vec<Value> {
        let mut filter = serde_json::Map::new();
        if let Some(address) = self.address {
            filter.insert("address".into(), json!(address));
        }
        if let Some(from) = self.from_block {
            filter.insert("fromBlock".into(), BlockTag::Number(from).to_value());
        }
        if let Some(to) = self.to_block {
            filter.insert("toBlock".into(), BlockTag::Number(to).to_value());
        }
        if !self.topics.is_empty() {
            filter.insert("topics".into(), json!(self.topics));
        }
        vec![Value::Object(filter)]
    }
}

/// `eth_sendRawTransaction`
pub struct SendRawTransaction {
    pub raw: Bytes,
}

impl JsonRpc for SendRawTransaction {
    type Output = B256;

    fn method(&self) -> &'static str {
        "eth_sendRawTransaction"
    }

    fn params(&self) -> Vec<Value> {
        vec![json!(self.raw)]
    }
}

/// Call object shared by `eth_call` and `eth_estimateGas`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas: Option<U64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<U128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<U128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<U128>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Bytes>,
}

/// `eth_call`
pub struct Call {
    pub request: CallRequest,
    pub block: BlockTag,
}

impl JsonRpc for Call {
    type Output = Bytes;

    fn method(&self) -> &'static str {
        "eth_call"
    }

    fn params(&self) -> Vec<Value> {
        vec![json!(self.request), self.block.to_value()]
    }
}

/// `eth_estimateGas`
pub struct EstimateGas {
    pub request: CallRequest,
}

impl JsonRpc for EstimateGas {
    type Output = U64;

    fn method(&self) -> &'static str {
        "eth_estimateGas"
    }

    fn params(&self) -> Vec<Value> {
        vec![json!(self.request)]
    }
}

/// `eth_gasPrice`
pub struct GasPrice;

impl JsonRpc for GasPrice {
    type Output = U128;

    fn method(&self) -> &'static str {
        "eth_gasPrice"
    }

    fn params(&self) -> Vec<Value> {
        Vec::new()
    }
}

/// `eth_subscribe` for new block headers. Returns the subscription id.
pub struct SubscribeNewHeads;

impl JsonRpc for SubscribeNewHeads {
    type Output = String;

    fn method(&self) -> &'static str {
        "eth_subscribe"
    }

    fn params(&self) -> Vec<Value> {
        vec![json!("newHeads")]
    }
}

/// Header pushed by a `newHeads` subscription.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHead {
    pub number: U64,
    #[serde(default)]
    pub logs_bloom: Option<Bytes>,
}
