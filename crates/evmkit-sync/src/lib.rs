//! Sync orchestration for one wallet address.
//!
//! Wires the data layer and the decoration engine together: the account tracker and
//! the transaction syncers pull from the node and the block explorer, the resolver
//! completes pooled hashes, the sync manager merges and persists, and the
//! transaction manager serves decorated history. [`EvmKit`] is the composition root.

pub mod account;
pub mod config;
pub mod kit;
pub mod manager;
pub mod pool;
pub mod registry;
pub mod syncers;
pub mod transaction_manager;

#[cfg(test)]
mod testing;

pub use account::AccountStateTracker;
pub use config::{ConfigError, ExplorerConfig, KitConfig, RpcSource};
pub use kit::EvmKit;
pub use manager::{TransactionSyncManager, TransactionsSynced};
pub use pool::NotSyncedPool;
pub use registry::RpcProviderRegistry;
pub use syncers::{ExplorerFeed, ExplorerTransactionSyncer, TransactionResolver, TransactionSyncer};
pub use transaction_manager::{
    GasPrice, RawTransaction, TransactionData, TransactionManager, TransactionSigner,
    TransactionStatus,
};
