use alloy::primitives::Address;

use super::received;
use crate::abi::addresses::ONE_INCH_ETH;
use crate::abi::one_inch::AggregationRouterV5 as Router;
use crate::decoration::{DecorationInput, SwapAmount, TransactionDecoration, TransactionDecorator};
use crate::event::ContractEventInstance;
use crate::method::{decode_call, ContractMethod, MethodDecorator, Token};

/// 1inch names the native coin with a placeholder address (or zero in `unoswap`).
fn token(address: Address) -> Token {
    if address == ONE_INCH_ETH || address.is_zero() {
        Token::Eth
    } else {
        Token::Eip20(address)
    }
}

#[derive(Clone, Debug, Default)]
pub struct OneInchMethodDecorator;

impl MethodDecorator for OneInchMethodDecorator {
    fn contract_method(&self, input: &[u8]) -> Option<ContractMethod> {
        decode_call::<Router::swapCall>(input, |c| ContractMethod::OneInchSwap {
            src_token: c.desc.srcToken,
            dst_token: c.desc.dstToken,
            dst_receiver: c.desc.dstReceiver,
            amount: c.desc.amount,
            min_return_amount: c.desc.minReturnAmount,
        })
        .or_else(|| {
            decode_call::<Router::unoswapCall>(input, |c| ContractMethod::OneInchUnoswap {
                src_token: c.srcToken,
                amount: c.amount,
                min_return: c.minReturn,
                pools: c.pools,
            })
        })
    }
}

#[derive(Clone, Debug)]
pub struct OneInchTransactionDecorator {
    user: Address,
}

impl OneInchTransactionDecorator {
    pub fn new(user: Address) -> Self {
        Self { user }
    }

    /// The token the user received in a unoswap, read back from the logs.
    fn unoswap_output(&self, input: &DecorationInput<'_>, token_in: &Token) -> Option<Token> {
        let eip20 = input.event_instances.iter().find_map(|event| match event {
            ContractEventInstance::Eip20Transfer { contract, to, .. }
                if to == &self.user && Some(*contract) != token_in.address() =>
            {
                Some(Token::Eip20(*contract))
            }
            _ => None,
        });
        eip20.or_else(|| {
            (*token_in != Token::Eth && received(input, &Token::Eth, &self.user).is_some())
                .then_some(Token::Eth)
        })
    }
}

impl TransactionDecorator for OneInchTransactionDecorator {
    fn decoration(&self, input: &DecorationInput<'_>) -> Option<TransactionDecoration> {
        let contract = input.to?;
        match input.method? {
            ContractMethod::OneInchSwap {
                src_token,
                dst_token,
                dst_receiver,
                amount,
                min_return_amount,
            } => {
                let token_out = token(*dst_token);
                let amount_out = received(input, &token_out, &self.user)
                    .map_or(SwapAmount::Extremum(*min_return_amount), SwapAmount::Exact);
                Some(TransactionDecoration::OneInchSwap {
                    contract,
                    token_in: token(*src_token),
                    token_out,
                    amount_in: *amount,
                    amount_out,
                    recipient: (*dst_receiver != self.user).then_some(*dst_receiver),
                })
            }
            ContractMethod::OneInchUnoswap {
                src_token,
                amount,
                min_return,
                ..
            } => {
                let token_in = token(*src_token);
                let token_out = self.unoswap_output(input, &token_in);
                let amount_out = token_out
                    .as_ref()
                    .and_then(|out| received(input, out, &self.user))
                    .map_or(SwapAmount::Extremum(*min_return), SwapAmount::Exact);
                Some(TransactionDecoration::OneInchUnoswap {
                    contract,
                    token_in,
                    token_out,
                    amount_in: *amount,
                    amount_out,
                })
            }
            _ => None,
        }
    }
}
