//! Protocol decorators: method decoders, event decoders and transaction classifiers.

pub mod eip20;
pub mod ethereum;
pub mod nft;
pub mod oneinch;
pub mod uniswap;

pub use eip20::{Eip20EventDecorator, Eip20MethodDecorator, Eip20TransactionDecorator};
pub use ethereum::EthereumDecorator;
pub use nft::{NftEventDecorator, NftMethodDecorator, NftTransactionDecorator};
pub use oneinch::{OneInchMethodDecorator, OneInchTransactionDecorator};
pub use uniswap::{UniswapEventDecorator, UniswapMethodDecorator, UniswapTransactionDecorator};

use alloy::primitives::{Address, U256};

use crate::decoration::DecorationInput;
use crate::event::ContractEventInstance;
use crate::method::Token;

/// Total amount of `token` the user received in this transaction, if any was observed.
///
/// ETH arrives through internal transactions, tokens through transfer events.
pub(crate) fn received(input: &DecorationInput<'_>, token: &Token, user: &Address) -> Option<U256> {
    let total = match token {
        Token::Eth => input
            .internal_transactions
            .iter()
            .filter(|itx| &itx.to == user)
            .fold(U256::ZERO, |acc, itx| acc.saturating_add(itx.value)),
        Token::Eip20(address) => eip20_transfers(input.event_instances)
            .filter(|(contract, _, to, _)| contract == address && to == user)
            .fold(U256::ZERO, |acc, (_, _, _, value)| acc.saturating_add(value)),
    };
    (!total.is_zero()).then_some(total)
}

/// Total amount of an EIP-20 `token` the user sent in this transaction.
pub(crate) fn sent(input: &DecorationInput<'_>, token: &Address, user: &Address) -> Option<U256> {
    let total = eip20_transfers(input.event_instances)
        .filter(|(contract, from, _, _)| contract == token && from == user)
        .fold(U256::ZERO, |acc, (_, _, _, value)| acc.saturating_add(value));
    (!total.is_zero()).then_some(total)
}

fn eip20_transfers(
    events: &[ContractEventInstance],
) -> impl Iterator<Item = (Address, Address, Address, U256)> + '_ {
    events.iter().filter_map(|event| match event {
        ContractEventInstance::Eip20Transfer {
            contract,
            from,
            to,
            value,
        } => Some((*contract, *from, *to, *value)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{address, B256};
    use evmkit_data::types::InternalTransaction;

    const USER: Address = address!("a7d9ddbe1f17865597fbd27ec712455208b6b76d");
    const TOKEN: Address = address!("dAC17F958D2ee523a2206206994597C13D831ec7");
    const POOL: Address = address!("00000000000000000000000000000000000000cc");

    #[test]
    fn received_sums_matching_transfers_only() {
        let events = vec![
            ContractEventInstance::Eip20Transfer {
                contract: TOKEN,
                from: POOL,
                to: USER,
                value: U256::from(4u64),
            },
            ContractEventInstance::Eip20Transfer {
                contract: TOKEN,
                from: POOL,
                to: USER,
                value: U256::from(6u64),
            },
            ContractEventInstance::Eip20Transfer {
                contract: POOL,
                from: POOL,
                to: USER,
                value: U256::from(100u64),
            },
        ];
        let input = DecorationInput {
            from: Some(USER),
            to: None,
            value: None,
            method: None,
            internal_transactions: &[],
            event_instances: &events,
        };

        assert_eq!(received(&input, &Token::Eip20(TOKEN), &USER), Some(U256::from(10u64)));
        assert_eq!(sent(&input, &TOKEN, &USER), None);
    }

    #[test]
    fn received_eth_comes_from_internal_transactions() {
        let internals = vec![InternalTransaction {
            hash: B256::ZERO,
            block_number: 1,
            from: POOL,
            to: USER,
            value: U256::from(3u64),
            trace_id: "0_1".into(),
        }];
        let input = DecorationInput {
            from: Some(USER),
            to: None,
            value: None,
            method: None,
            internal_transactions: &internals,
            event_instances: &[],
        };

        assert_eq!(received(&input, &Token::Eth, &USER), Some(U256::from(3u64)));
    }
}
