//! JSON-RPC access to an Ethereum node over HTTP polling or a WebSocket subscription.

pub mod blockchain;
pub mod error;
pub mod http;
pub mod jsonrpc;
pub mod models;
pub mod syncer;
pub mod websocket;

pub use blockchain::RpcBlockchain;
pub use error::RpcError;
pub use http::{HttpRpcSyncer, NodeApiProvider, RpcApiProvider};
pub use jsonrpc::{BlockTag, CallRequest, JsonRpc, RpcCall};
pub use syncer::{single, RpcSyncer, RpcSyncerEvent, RpcSyncerState};
pub use websocket::{NodeWebSocket, RpcSocket, SocketEvent, WebSocketRpcSyncer};
