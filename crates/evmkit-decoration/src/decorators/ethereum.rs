use alloy::primitives::Address;

use crate::decoration::{DecorationInput, TransactionDecoration, TransactionDecorator};
use crate::method::ContractMethod;

/// Native coin transfers to or from the user, and contract deployments.
#[derive(Clone, Debug)]
pub struct EthereumDecorator {
    user: Address,
}

impl EthereumDecorator {
    pub fn new(user: Address) -> Self {
        Self { user }
    }
}

impl TransactionDecorator for EthereumDecorator {
    fn decoration(&self, input: &DecorationInput<'_>) -> Option<TransactionDecoration> {
        let from = input.from?;
        let value = input.value?;
        let Some(to) = input.to else {
            return Some(TransactionDecoration::ContractCreation);
        };

        if input.method != Some(&ContractMethod::Empty) {
            return None;
        }

        if from == self.user {
            return Some(TransactionDecoration::Outgoing {
                to,
                value,
                sent_to_self: to == self.user,
            });
        }
        if to == self.user {
            return Some(TransactionDecoration::Incoming { from, value });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, U256};

    const USER: Address = address!("a7d9ddbe1f17865597fbd27ec712455208b6b76d");
    const OTHER: Address = address!("00000000000000000000000000000000000000bb");

    fn input(from: Address, to: Option<Address>, method: &ContractMethod) -> DecorationInput<'_> {
        DecorationInput {
            from: Some(from),
            to,
            value: Some(U256::from(1u64)),
            method: Some(method),
            internal_transactions: &[],
            event_instances: &[],
        }
    }

    #[test]
    fn classifies_direction() {
        let decorator = EthereumDecorator::new(USER);
        let empty = ContractMethod::Empty;

        assert_eq!(
            decorator.decoration(&input(USER, Some(OTHER), &empty)),
            Some(TransactionDecoration::Outgoing {
                to: OTHER,
                value: U256::from(1u64),
                sent_to_self: false
            })
        );
        assert_eq!(
            decorator.decoration(&input(OTHER, Some(USER), &empty)),
            Some(TransactionDecoration::Incoming {
                from: OTHER,
                value: U256::from(1u64)
            })
        );
        assert_eq!(decorator.decoration(&input(OTHER, Some(OTHER), &empty)), None);
    }

    #[test]
    fn missing_recipient_is_contract_creation() {
        let decorator = EthereumDecorator::new(USER);
        let method = ContractMethod::Unknown { selector: None };
        assert_eq!(
            decorator.decoration(&input(USER, None, &method)),
            Some(TransactionDecoration::ContractCreation)
        );
    }

    #[test]
    fn contract_calls_are_left_to_other_decorators() {
        let decorator = EthereumDecorator::new(USER);
        let method = ContractMethod::Unknown { selector: None };
        assert_eq!(decorator.decoration(&input(USER, Some(OTHER), &method)), None);
    }
}
