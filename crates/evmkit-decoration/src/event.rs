//! Typed event instances decoded from transaction logs.

use alloy::primitives::{Address, B256, U256};
use evmkit_data::types::TransactionLog;

use crate::tags;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractEventInstance {
    Eip20Transfer {
        contract: Address,
        from: Address,
        to: Address,
        value: U256,
    },
    Eip20Approve {
        contract: Address,
        owner: Address,
        spender: Address,
        value: U256,
    },
    Eip721Transfer {
        contract: Address,
        from: Address,
        to: Address,
        token_id: U256,
    },
    Eip1155TransferSingle {
        contract: Address,
        operator: Address,
        from: Address,
        to: Address,
        token_id: U256,
        value: U256,
    },
    UniswapV2Swap {
        pair: Address,
        sender: Address,
        to: Address,
        amount0_in: U256,
        amount1_in: U256,
        amount0_out: U256,
        amount1_out: U256,
    },
}

impl ContractEventInstance {
    /// Address of the contract that emitted the event.
    pub fn contract(&self) -> Address {
        match self {
            ContractEventInstance::Eip20Transfer { contract, .. }
            | ContractEventInstance::Eip20Approve { contract, .. }
            | ContractEventInstance::Eip721Transfer { contract, .. }
            | ContractEventInstance::Eip1155TransferSingle { contract, .. } => *contract,
            ContractEventInstance::UniswapV2Swap { pair, .. } => *pair,
        }
    }

    pub fn tags(&self, user: &Address) -> Vec<String> {
        match self {
            ContractEventInstance::Eip20Transfer {
                contract, from, to, ..
            } => transfer_tags(contract, tags::EIP20_TRANSFER, from, to, user),
            ContractEventInstance::Eip20Approve { contract, .. } => {
                vec![tags::address_tag(contract), tags::EIP20_APPROVE.to_string()]
            }
            ContractEventInstance::Eip721Transfer {
                contract, from, to, ..
            } => transfer_tags(contract, tags::EIP721_TRANSFER, from, to, user),
            ContractEventInstance::Eip1155TransferSingle {
                contract, from, to, ..
            } => transfer_tags(contract, tags::EIP1155_TRANSFER, from, to, user),
            ContractEventInstance::UniswapV2Swap { pair, .. } => {
                vec![tags::address_tag(pair), tags::SWAP.to_string()]
            }
        }
    }
}

fn transfer_tags(
    contract: &Address,
    kind: &str,
    from: &Address,
    to: &Address,
    user: &Address,
) -> Vec<String> {
    let mut out = vec![tags::address_tag(contract), kind.to_string()];
    if from == user {
        out.push(tags::token_outgoing(contract));
        out.push(tags::OUTGOING.to_string());
        out.push(tags::to_address(to));
    }
    if to == user {
        out.push(tags::token_incoming(contract));
        out.push(tags::INCOMING.to_string());
        out.push(tags::from_address(from));
    }
    out
}

/// Decodes logs into event instances relevant to one address.
///
/// Logs that do not match, or match but are malformed, are skipped.
pub trait EventDecorator: Send + Sync {
    fn contract_event_instances(&self, logs: &[TransactionLog]) -> Vec<ContractEventInstance>;
}

/// Address stored in an indexed topic (right-aligned in the 32-byte word).
pub(crate) fn topic_address(topic: &B256) -> Address {
    Address::from_word(*topic)
}

/// The `index`-th 32-byte word of non-indexed event data.
pub(crate) fn data_word(data: &[u8], index: usize) -> Option<U256> {
    let start = index.checked_mul(32)?;
    let word = data.get(start..start.checked_add(32)?)?;
    Some(U256::from_be_slice(word))
}
