use alloy::primitives::Address;
use alloy::sol_types::SolEvent;
use evmkit_data::types::TransactionLog;

use crate::abi::erc20::IERC20;
use crate::decoration::{DecorationInput, TransactionDecoration, TransactionDecorator};
use crate::event::{data_word, topic_address, ContractEventInstance, EventDecorator};
use crate::method::{decode_call, ContractMethod, MethodDecorator};

#[derive(Clone, Debug, Default)]
pub struct Eip20MethodDecorator;

impl MethodDecorator for Eip20MethodDecorator {
    fn contract_method(&self, input: &[u8]) -> Option<ContractMethod> {
        decode_call::<IERC20::transferCall>(input, |c| ContractMethod::Eip20Transfer {
            to: c.to,
            value: c.value,
        })
        .or_else(|| {
            decode_call::<IERC20::approveCall>(input, |c| ContractMethod::Eip20Approve {
                spender: c.spender,
                value: c.value,
            })
        })
    }
}

/// `Transfer` events moving tokens to or from the user, and the user's `Approval`s.
#[derive(Clone, Debug)]
pub struct Eip20EventDecorator {
    user: Address,
}

impl Eip20EventDecorator {
    pub fn new(user: Address) -> Self {
        Self { user }
    }

    fn decode(&self, log: &TransactionLog) -> Option<ContractEventInstance> {
        // Three topics: the 721 variant indexes tokenId as a fourth.
        if log.topics.len() != 3 {
            return None;
        }
        let topic0 = log.topics[0];
        let first = topic_address(&log.topics[1]);
        let second = topic_address(&log.topics[2]);
        let value = data_word(&log.data, 0)?;

        if topic0 == IERC20::Transfer::SIGNATURE_HASH {
            return (first == self.user || second == self.user).then_some(
                ContractEventInstance::Eip20Transfer {
                    contract: log.address,
                    from: first,
                    to: second,
                    value,
                },
            );
        }
        if topic0 == IERC20::Approval::SIGNATURE_HASH {
            return (first == self.user).then_some(ContractEventInstance::Eip20Approve {
                contract: log.address,
                owner: first,
                spender: second,
                value,
            });
        }
        None
    }
}

impl EventDecorator for Eip20EventDecorator {
    fn contract_event_instances(&self, logs: &[TransactionLog]) -> Vec<ContractEventInstance> {
        logs.iter().filter_map(|log| self.decode(log)).collect()
    }
}

/// Token transfers and approvals sent by the user; the transaction `to` is the token.
#[derive(Clone, Debug)]
pub struct Eip20TransactionDecorator {
    user: Address,
}

impl Eip20TransactionDecorator {
    pub fn new(user: Address) -> Self {
        Self { user }
    }
}

impl TransactionDecorator for Eip20TransactionDecorator {
    fn decoration(&self, input: &DecorationInput<'_>) -> Option<TransactionDecoration> {
        let contract = input.to?;
        match input.method? {
            ContractMethod::Eip20Transfer { to, value } if input.from == Some(self.user) => {
                Some(TransactionDecoration::OutgoingEip20 {
                    contract,
                    to: *to,
                    value: *value,
                    sent_to_self: *to == self.user,
                })
            }
            ContractMethod::Eip20Approve { spender, value } => {
                Some(TransactionDecoration::ApproveEip20 {
                    contract,
                    spender: *spender,
                    value: *value,
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, Bytes, B256, U256};
    use alloy::sol_types::SolCall;

    const USER: Address = address!("a7d9ddbe1f17865597fbd27ec712455208b6b76d");
    const OTHER: Address = address!("00000000000000000000000000000000000000bb");
    const TOKEN: Address = address!("dAC17F958D2ee523a2206206994597C13D831ec7");

    fn log(topics: Vec<B256>, value: u64) -> TransactionLog {
        TransactionLog {
            transaction_hash: B256::repeat_byte(1),
            log_index: 0,
            block_number: 1,
            transaction_index: 0,
            address: TOKEN,
            topics,
            data: Bytes::from(U256::from(value).to_be_bytes::<32>().to_vec()),
            removed: false,
        }
    }

    #[test]
    fn decodes_transfer_and_approve_calls() {
        let transfer = IERC20::transferCall {
            to: OTHER,
            value: U256::from(5u64),
        }
        .abi_encode();
        let approve = IERC20::approveCall {
            spender: OTHER,
            value: U256::MAX,
        }
        .abi_encode();

        assert_eq!(
            Eip20MethodDecorator.contract_method(&transfer),
            Some(ContractMethod::Eip20Transfer {
                to: OTHER,
                value: U256::from(5u64)
            })
        );
        assert_eq!(
            Eip20MethodDecorator.contract_method(&approve),
            Some(ContractMethod::Eip20Approve {
                spender: OTHER,
                value: U256::MAX
            })
        );
        assert_eq!(Eip20MethodDecorator.contract_method(&[1, 2, 3, 4]), None);
    }

    #[test]
    fn keeps_only_transfers_touching_user() {
        let decorator = Eip20EventDecorator::new(USER);
        let topic0 = IERC20::Transfer::SIGNATURE_HASH;
        let logs = vec![
            log(vec![topic0, OTHER.into_word(), USER.into_word()], 10),
            log(vec![topic0, OTHER.into_word(), OTHER.into_word()], 20),
            // 721-shaped transfer is not an EIP-20 event
            log(
                vec![topic0, USER.into_word(), OTHER.into_word(), B256::ZERO],
                0,
            ),
        ];

        let events = decorator.contract_event_instances(&logs);

        assert_eq!(
            events,
            vec![ContractEventInstance::Eip20Transfer {
                contract: TOKEN,
                from: OTHER,
                to: USER,
                value: U256::from(10u64)
            }]
        );
    }

    #[test]
    fn malformed_data_is_skipped() {
        let decorator = Eip20EventDecorator::new(USER);
        let mut bad = log(
            vec![
                IERC20::Transfer::SIGNATURE_HASH,
                USER.into_word(),
                OTHER.into_word(),
            ],
            1,
        );
        bad.data = Bytes::from_static(&[1, 2, 3]);
        assert!(decorator.contract_event_instances(&[bad]).is_empty());
    }

    #[test]
    fn outgoing_transfer_requires_user_sender() {
        let decorator = Eip20TransactionDecorator::new(USER);
        let method = ContractMethod::Eip20Transfer {
            to: OTHER,
            value: U256::from(3u64),
        };
        let mut input = DecorationInput {
            from: Some(USER),
            to: Some(TOKEN),
            value: Some(U256::ZERO),
            method: Some(&method),
            internal_transactions: &[],
            event_instances: &[],
        };

        assert_eq!(
            decorator.decoration(&input),
            Some(TransactionDecoration::OutgoingEip20 {
                contract: TOKEN,
                to: OTHER,
                value: U256::from(3u64),
                sent_to_self: false
            })
        );

        input.from = Some(OTHER);
        assert_eq!(decorator.decoration(&input), None);
    }
}
