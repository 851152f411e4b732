//! Data layer for the wallet SDK: models, SQLite storage, node RPC syncers and the
//! block-explorer transaction provider.

pub mod explorer;
pub mod rpc;
pub mod state;
pub mod store;
pub mod types;
