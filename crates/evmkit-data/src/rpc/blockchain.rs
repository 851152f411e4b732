//! Typed chain operations for one account over any [`RpcSyncer`].

use alloy::primitives::{Address, Bytes, B256, U256};
use std::sync::Arc;

use super::error::RpcError;
use super::jsonrpc::{
    BlockNumber, BlockTag, Call, CallRequest, EstimateGas, GasPrice, GetBalance,
    GetBlockByNumber, GetLogs, GetTransactionByHash, GetTransactionCount, GetTransactionReceipt,
    JsonRpc, SendRawTransaction,
};
use super::models::{RpcBlock, RpcLog, RpcTransaction, RpcTransactionReceipt};
use super::syncer::{self, RpcSyncer};

pub struct RpcBlockchain {
    syncer: Arc<dyn RpcSyncer>,
    address: Address,
}

impl RpcBlockchain {
    pub fn new(syncer: Arc<dyn RpcSyncer>, address: Address) -> Self {
        Self { syncer, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn syncer(&self) -> &Arc<dyn RpcSyncer> {
        &self.syncer
    }

    pub async fn single<R: JsonRpc>(&self, rpc: &R) -> Result<R::Output, RpcError> {
        syncer::single(self.syncer.as_ref(), rpc).await
    }

    pub async fn last_block_height(&self) -> Result<u64, RpcError> {
        Ok(self.single(&BlockNumber).await?.to::<u64>())
    }

    /// Native balance of the tracked account at the latest block.
    pub async fn balance(&self) -> Result<U256, RpcError> {
        self.single(&GetBalance {
            address: self.address,
            block: BlockTag::Latest,
        })
        .await
    }

    /// Transaction count of the tracked account; `Pending` includes mempool transactions.
    pub async fn nonce(&self, block: BlockTag) -> Result<u64, RpcError> {
        let count = self
            .single(&GetTransactionCount {
                address: self.address,
                block,
            })
            .await?;
        Ok(count.to::<u64>())
    }

    pub async fn transaction(&self, hash: B256) -> Result<Option<RpcTransaction>, RpcError> {
        self.single(&GetTransactionByHash { hash }).await
    }

    pub async fn transaction_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<RpcTransactionReceipt>, RpcError> {
        self.single(&GetTransactionReceipt { hash }).await
    }

    pub async fn block(&self, number: u64) -> Result<Option<RpcBlock>, RpcError> {
        self.single(&GetBlockByNumber { number }).await
    }

    pub async fn logs(&self, filter: GetLogs) -> Result<Vec<RpcLog>, RpcError> {
        self.single(&filter).await
    }

    pub async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, RpcError> {
        self.single(&SendRawTransaction { raw }).await
    }

    pub async fn call(&self, request: CallRequest, block: BlockTag) -> Result<Bytes, RpcError> {
        self.single(&Call { request, block }).await
    }

    pub async fn estimate_gas(&self, request: CallRequest) -> Result<u64, RpcError> {
        Ok(self.single(&EstimateGas { request }).await?.to::<u64>())
    }

    pub async fn gas_price(&self) -> Result<u128, RpcError> {
        Ok(self.single(&GasPrice).await?.to::<u128>())
    }
}
