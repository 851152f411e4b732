use alloy::primitives::{Address, U256};
use alloy::sol_types::SolEvent;
use evmkit_data::types::TransactionLog;

use crate::abi::erc1155::IERC1155;
use crate::abi::erc721::IERC721;
use crate::decoration::{DecorationInput, TransactionDecoration, TransactionDecorator};
use crate::event::{data_word, topic_address, ContractEventInstance, EventDecorator};
use crate::method::{decode_call, ContractMethod, MethodDecorator};

/// EIP-721 and EIP-1155 `safeTransferFrom` calls.
#[derive(Clone, Debug, Default)]
pub struct NftMethodDecorator;

impl MethodDecorator for NftMethodDecorator {
    fn contract_method(&self, input: &[u8]) -> Option<ContractMethod> {
        decode_call::<IERC721::safeTransferFrom_0Call>(input, |c| {
            ContractMethod::Eip721SafeTransferFrom {
                from: c.from,
                to: c.to,
                token_id: c.tokenId,
                data: Default::default(),
            }
        })
        .or_else(|| {
            decode_call::<IERC721::safeTransferFrom_1Call>(input, |c| {
                ContractMethod::Eip721SafeTransferFrom {
                    from: c.from,
                    to: c.to,
                    token_id: c.tokenId,
                    data: c.data,
                }
            })
        })
        .or_else(|| {
            decode_call::<IERC1155::safeTransferFromCall>(input, |c| {
                ContractMethod::Eip1155SafeTransferFrom {
                    from: c.from,
                    to: c.to,
                    token_id: c.id,
                    value: c.value,
                    data: c.data,
                }
            })
        })
    }
}

#[derive(Clone, Debug)]
pub struct NftEventDecorator {
    user: Address,
}

impl NftEventDecorator {
    pub fn new(user: Address) -> Self {
        Self { user }
    }

    fn touches_user(&self, from: &Address, to: &Address) -> bool {
        from == &self.user || to == &self.user
    }

    fn decode(&self, log: &TransactionLog) -> Option<ContractEventInstance> {
        let topic0 = *log.topic(0)?;

        if topic0 == IERC721::Transfer::SIGNATURE_HASH && log.topics.len() == 4 {
            let from = topic_address(&log.topics[1]);
            let to = topic_address(&log.topics[2]);
            let token_id = U256::from_be_bytes(log.topics[3].0);
            return self
                .touches_user(&from, &to)
                .then_some(ContractEventInstance::Eip721Transfer {
                    contract: log.address,
                    from,
                    to,
                    token_id,
                });
        }

        if topic0 == IERC1155::TransferSingle::SIGNATURE_HASH && log.topics.len() == 4 {
            let operator = topic_address(&log.topics[1]);
            let from = topic_address(&log.topics[2]);
            let to = topic_address(&log.topics[3]);
            let token_id = data_word(&log.data, 0)?;
            let value = data_word(&log.data, 1)?;
            return self
                .touches_user(&from, &to)
                .then_some(ContractEventInstance::Eip1155TransferSingle {
                    contract: log.address,
                    operator,
                    from,
                    to,
                    token_id,
                    value,
                });
        }

        None
    }
}

impl EventDecorator for NftEventDecorator {
    fn contract_event_instances(&self, logs: &[TransactionLog]) -> Vec<ContractEventInstance> {
        logs.iter().filter_map(|log| self.decode(log)).collect()
    }
}

/// NFT transfers sent by the user.
#[derive(Clone, Debug)]
pub struct NftTransactionDecorator {
    user: Address,
}

impl NftTransactionDecorator {
    pub fn new(user: Address) -> Self {
        Self { user }
    }
}

impl TransactionDecorator for NftTransactionDecorator {
    fn decoration(&self, input: &DecorationInput<'_>) -> Option<TransactionDecoration> {
        let contract = input.to?;
        if input.from != Some(self.user) {
            return None;
        }
        match input.method? {
            ContractMethod::Eip721SafeTransferFrom { to, token_id, .. } => {
                Some(TransactionDecoration::OutgoingEip721 {
                    contract,
                    to: *to,
                    token_id: *token_id,
                    sent_to_self: *to == self.user,
                })
            }
            ContractMethod::Eip1155SafeTransferFrom {
                to,
                token_id,
                value,
                ..
            } => Some(TransactionDecoration::OutgoingEip1155 {
                contract,
                to: *to,
                token_id: *token_id,
                value: *value,
                sent_to_self: *to == self.user,
            }),
            _ => None,
        }
    }
}
