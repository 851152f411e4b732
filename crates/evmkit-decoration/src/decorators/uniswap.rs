//! Uniswap V2 and V3 router swaps.
//!
//! Calls are decoded into a [`SwapMethod`] that only knows the caller's limits.
//! The decoration resolves actual amounts from the transfer events and internal
//! transactions of the mined transaction when they are available.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::{SolCall, SolEvent};
use evmkit_data::types::TransactionLog;

use super::{received, sent};
use crate::abi::addresses::WETH;
use crate::abi::uniswap_v2::{UniswapV2Pair, UniswapV2Router02 as V2};
use crate::abi::uniswap_v3::SwapRouter as V3;
use crate::decoration::{DecorationInput, SwapAmount, TransactionDecoration, TransactionDecorator};
use crate::event::{data_word, topic_address, ContractEventInstance, EventDecorator};
use crate::method::{decode_call, ContractMethod, MethodDecorator, SwapMethod, SwapTrade, Token};

/// token (20) + fee (3) per hop, then the final token.
const V3_HOP: usize = 23;
const ADDRESS_LEN: usize = 20;

fn path_ends(path: &[Address]) -> Option<(Address, Address)> {
    match path {
        [first, .., last] => Some((*first, *last)),
        _ => None,
    }
}

/// First and last token of an encoded V3 path.
fn v3_path_ends(path: &Bytes) -> Option<(Address, Address)> {
    let len = path.len();
    if len < ADDRESS_LEN + V3_HOP || (len - ADDRESS_LEN) % V3_HOP != 0 {
        return None;
    }
    let first = Address::from_slice(&path[..ADDRESS_LEN]);
    let last = Address::from_slice(&path[len - ADDRESS_LEN..]);
    Some((first, last))
}

fn swap_or_undecoded<C: SolCall>(swap: Option<SwapMethod>) -> ContractMethod {
    match swap {
        Some(swap) => ContractMethod::UniswapSwap(swap),
        None => ContractMethod::Undecoded {
            selector: C::SELECTOR.into(),
            signature: C::SIGNATURE,
        },
    }
}

#[derive(Clone, Debug, Default)]
pub struct UniswapMethodDecorator;

impl UniswapMethodDecorator {
    fn v2(&self, input: &[u8]) -> Option<ContractMethod> {
        decode_call::<V2::swapExactTokensForTokensCall>(input, |c| {
            swap_or_undecoded::<V2::swapExactTokensForTokensCall>(path_ends(&c.path).map(
                |(token_in, token_out)| SwapMethod {
                    trade: SwapTrade::ExactIn {
                        amount_in: Some(c.amountIn),
                        amount_out_min: c.amountOutMin,
                    },
                    token_in: Token::Eip20(token_in),
                    token_out: Token::Eip20(token_out),
                    recipient: c.to,
                    deadline: Some(c.deadline),
                },
            ))
        })
        .or_else(|| {
            decode_call::<V2::swapTokensForExactTokensCall>(input, |c| {
                swap_or_undecoded::<V2::swapTokensForExactTokensCall>(path_ends(&c.path).map(
                    |(token_in, token_out)| SwapMethod {
                        trade: SwapTrade::ExactOut {
                            amount_out: c.amountOut,
                            amount_in_max: Some(c.amountInMax),
                        },
                        token_in: Token::Eip20(token_in),
                        token_out: Token::Eip20(token_out),
                        recipient: c.to,
                        deadline: Some(c.deadline),
                    },
                ))
            })
        })
        .or_else(|| {
            decode_call::<V2::swapExactETHForTokensCall>(input, |c| {
                swap_or_undecoded::<V2::swapExactETHForTokensCall>(path_ends(&c.path).map(
                    |(_, token_out)| SwapMethod {
                        trade: SwapTrade::ExactIn {
                            amount_in: None,
                            amount_out_min: c.amountOutMin,
                        },
                        token_in: Token::Eth,
                        token_out: Token::Eip20(token_out),
                        recipient: c.to,
                        deadline: Some(c.deadline),
                    },
                ))
            })
        })
        .or_else(|| {
            decode_call::<V2::swapETHForExactTokensCall>(input, |c| {
                swap_or_undecoded::<V2::swapETHForExactTokensCall>(path_ends(&c.path).map(
                    |(_, token_out)| SwapMethod {
                        trade: SwapTrade::ExactOut {
                            amount_out: c.amountOut,
                            amount_in_max: None,
                        },
                        token_in: Token::Eth,
                        token_out: Token::Eip20(token_out),
                        recipient: c.to,
                        deadline: Some(c.deadline),
                    },
                ))
            })
        })
        .or_else(|| {
            decode_call::<V2::swapTokensForExactETHCall>(input, |c| {
                swap_or_undecoded::<V2::swapTokensForExactETHCall>(path_ends(&c.path).map(
                    |(token_in, _)| SwapMethod {
                        trade: SwapTrade::ExactOut {
                            amount_out: c.amountOut,
                            amount_in_max: Some(c.amountInMax),
                        },
                        token_in: Token::Eip20(token_in),
                        token_out: Token::Eth,
                        recipient: c.to,
                        deadline: Some(c.deadline),
                    },
                ))
            })
        })
        .or_else(|| {
            decode_call::<V2::swapExactTokensForETHCall>(input, |c| {
                swap_or_undecoded::<V2::swapExactTokensForETHCall>(path_ends(&c.path).map(
                    |(token_in, _)| SwapMethod {
                        trade: SwapTrade::ExactIn {
                            amount_in: Some(c.amountIn),
                            amount_out_min: c.amountOutMin,
                        },
                        token_in: Token::Eip20(token_in),
                        token_out: Token::Eth,
                        recipient: c.to,
                        deadline: Some(c.deadline),
                    },
                ))
            })
        })
    }

    fn v3(&self, input: &[u8]) -> Option<ContractMethod> {
        decode_call::<V3::exactInputSingleCall>(input, |c| {
            let p = c.params;
            ContractMethod::UniswapSwap(SwapMethod {
                trade: SwapTrade::ExactIn {
                    amount_in: Some(p.amountIn),
                    amount_out_min: p.amountOutMinimum,
                },
                token_in: Token::Eip20(p.tokenIn),
                token_out: Token::Eip20(p.tokenOut),
                recipient: p.recipient,
                deadline: Some(p.deadline),
            })
        })
        .or_else(|| {
            decode_call::<V3::exactInputCall>(input, |c| {
                let p = c.params;
                swap_or_undecoded::<V3::exactInputCall>(v3_path_ends(&p.path).map(
                    |(token_in, token_out)| SwapMethod {
                        trade: SwapTrade::ExactIn {
                            amount_in: Some(p.amountIn),
                            amount_out_min: p.amountOutMinimum,
                        },
                        token_in: Token::Eip20(token_in),
                        token_out: Token::Eip20(token_out),
                        recipient: p.recipient,
                        deadline: Some(p.deadline),
                    },
                ))
            })
        })
        .or_else(|| {
            decode_call::<V3::exactOutputSingleCall>(input, |c| {
                let p = c.params;
                ContractMethod::UniswapSwap(SwapMethod {
                    trade: SwapTrade::ExactOut {
                        amount_out: p.amountOut,
                        amount_in_max: Some(p.amountInMaximum),
                    },
                    token_in: Token::Eip20(p.tokenIn),
                    token_out: Token::Eip20(p.tokenOut),
                    recipient: p.recipient,
                    deadline: Some(p.deadline),
                })
            })
        })
        .or_else(|| {
            decode_call::<V3::exactOutputCall>(input, |c| {
                let p = c.params;
                // Exact-output paths are encoded from the output token backwards.
                swap_or_undecoded::<V3::exactOutputCall>(v3_path_ends(&p.path).map(
                    |(token_out, token_in)| SwapMethod {
                        trade: SwapTrade::ExactOut {
                            amount_out: p.amountOut,
                            amount_in_max: Some(p.amountInMaximum),
                        },
                        token_in: Token::Eip20(token_in),
                        token_out: Token::Eip20(token_out),
                        recipient: p.recipient,
                        deadline: Some(p.deadline),
                    },
                ))
            })
        })
    }
}

impl MethodDecorator for UniswapMethodDecorator {
    fn contract_method(&self, input: &[u8]) -> Option<ContractMethod> {
        self.v2(input).or_else(|| self.v3(input))
    }
}

/// V2 pair `Swap` events where the user is the sender or the recipient.
#[derive(Clone, Debug)]
pub struct UniswapEventDecorator {
    user: Address,
}

impl UniswapEventDecorator {
    pub fn new(user: Address) -> Self {
        Self { user }
    }

    fn decode(&self, log: &TransactionLog) -> Option<ContractEventInstance> {
        if log.topics.len() != 3 || log.topics[0] != UniswapV2Pair::Swap::SIGNATURE_HASH {
            return None;
        }
        let sender = topic_address(&log.topics[1]);
        let to = topic_address(&log.topics[2]);
        if sender != self.user && to != self.user {
            return None;
        }
        Some(ContractEventInstance::UniswapV2Swap {
            pair: log.address,
            sender,
            to,
            amount0_in: data_word(&log.data, 0)?,
            amount1_in: data_word(&log.data, 1)?,
            amount0_out: data_word(&log.data, 2)?,
            amount1_out: data_word(&log.data, 3)?,
        })
    }
}

impl EventDecorator for UniswapEventDecorator {
    fn contract_event_instances(&self, logs: &[TransactionLog]) -> Vec<ContractEventInstance> {
        logs.iter().filter_map(|log| self.decode(log)).collect()
    }
}

#[derive(Clone, Debug)]
pub struct UniswapTransactionDecorator {
    user: Address,
}

impl UniswapTransactionDecorator {
    pub fn new(user: Address) -> Self {
        Self { user }
    }
}

impl TransactionDecorator for UniswapTransactionDecorator {
    fn decoration(&self, input: &DecorationInput<'_>) -> Option<TransactionDecoration> {
        let contract = input.to?;
        let ContractMethod::UniswapSwap(swap) = input.method? else {
            return None;
        };
        let value = input.value.unwrap_or_default();

        // V3 takes native ETH as WETH plus call value.
        let token_in = match &swap.token_in {
            Token::Eip20(address) if *address == WETH && !value.is_zero() => Token::Eth,
            token => token.clone(),
        };

        let (amount_in, amount_out) = match &swap.trade {
            SwapTrade::ExactIn {
                amount_in,
                amount_out_min,
            } => {
                let amount_out = received(input, &swap.token_out, &self.user)
                    .map_or(SwapAmount::Extremum(*amount_out_min), SwapAmount::Exact);
                (SwapAmount::Exact(amount_in.unwrap_or(value)), amount_out)
            }
            SwapTrade::ExactOut {
                amount_out,
                amount_in_max,
            } => {
                let max = amount_in_max.unwrap_or(value);
                let spent = match &token_in {
                    // unspent ETH comes back as an internal refund
                    Token::Eth => received(input, &Token::Eth, &self.user)
                        .map(|refund| max.saturating_sub(refund)),
                    Token::Eip20(token) => sent(input, token, &self.user),
                };
                (
                    spent.map_or(SwapAmount::Extremum(max), SwapAmount::Exact),
                    SwapAmount::Exact(*amount_out),
                )
            }
        };

        Some(TransactionDecoration::Swap {
            contract,
            amount_in,
            amount_out,
            token_in,
            token_out: swap.token_out.clone(),
            recipient: (swap.recipient != self.user).then_some(swap.recipient),
            deadline: swap.deadline,
        })
    }
}
