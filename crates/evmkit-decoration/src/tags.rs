//! Tag vocabulary and the per-transaction tag generator.
//!
//! Tags are flat strings used to filter stored history (`ETH_incoming`, a token
//! contract address, `swap`, ...). They are derived from the decoration and
//! regenerated whenever it is, never edited independently.

use alloy::hex;
use alloy::primitives::{Address, B256};
use std::collections::HashSet;

use crate::decoration::FullTransaction;

pub const INCOMING: &str = "incoming";
pub const OUTGOING: &str = "outgoing";
pub const EVM_COIN: &str = "ETH";
pub const EVM_COIN_INCOMING: &str = "ETH_incoming";
pub const EVM_COIN_OUTGOING: &str = "ETH_outgoing";
pub const EIP20_TRANSFER: &str = "eip20Transfer";
pub const EIP20_APPROVE: &str = "eip20Approve";
pub const EIP721_TRANSFER: &str = "eip721Transfer";
pub const EIP1155_TRANSFER: &str = "eip1155Transfer";
pub const SWAP: &str = "swap";
pub const CONTRACT_CREATION: &str = "contractCreation";

/// Lowercase `0x` hex, the form addresses take inside tags.
pub fn address_tag(address: &Address) -> String {
    hex::encode_prefixed(address)
}

pub fn token_incoming(contract: &Address) -> String {
    format!("{}_{INCOMING}", address_tag(contract))
}

pub fn token_outgoing(contract: &Address) -> String {
    format!("{}_{OUTGOING}", address_tag(contract))
}

pub fn from_address(address: &Address) -> String {
    format!("from_{}", address_tag(address))
}

pub fn to_address(address: &Address) -> String {
    format!("to_{}", address_tag(address))
}

/// Removes repeated tags, keeping first occurrences in order.
pub fn dedup(tags: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(tags.len());
    tags.into_iter()
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

/// Derives the tag set of each decorated transaction for one tracked address.
#[derive(Clone, Debug)]
pub struct TagGenerator {
    user: Address,
}

impl TagGenerator {
    pub fn new(user: Address) -> Self {
        Self { user }
    }

    pub fn tags(&self, transaction: &FullTransaction) -> Vec<String> {
        dedup(transaction.decoration.tags(&self.user))
    }

    /// One `(hash, tags)` entry per transaction, in input order.
    pub fn generate(&self, transactions: &[FullTransaction]) -> Vec<(B256, Vec<String>)> {
        transactions
            .iter()
            .map(|full| (full.transaction.hash, self.tags(full)))
            .collect()
    }
}
