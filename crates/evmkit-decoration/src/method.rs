//! Typed contract calls decoded from transaction input.

use alloy::primitives::{Address, Bytes, Selector, U256};
use alloy::sol_types::SolCall;
use tracing::debug;

/// Which side of a swap the caller fixed.
///
/// An amount of `None` means the router takes it from the transaction value
/// (the `...ETH...` entry points carry no explicit input amount).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SwapTrade {
    ExactIn {
        amount_in: Option<U256>,
        amount_out_min: U256,
    },
    ExactOut {
        amount_out: U256,
        amount_in_max: Option<U256>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Token {
    Eth,
    Eip20(Address),
}

impl Token {
    pub fn address(&self) -> Option<Address> {
        match self {
            Token::Eth => None,
            Token::Eip20(address) => Some(*address),
        }
    }
}

/// A router swap normalized across the Uniswap V2 and V3 entry points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwapMethod {
    pub trade: SwapTrade,
    pub token_in: Token,
    pub token_out: Token,
    pub recipient: Address,
    pub deadline: Option<U256>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractMethod {
    /// Plain value transfer, no call data.
    Empty,
    Eip20Transfer {
        to: Address,
        value: U256,
    },
    Eip20Approve {
        spender: Address,
        value: U256,
    },
    Eip721SafeTransferFrom {
        from: Address,
        to: Address,
        token_id: U256,
        data: Bytes,
    },
    Eip1155SafeTransferFrom {
        from: Address,
        to: Address,
        token_id: U256,
        value: U256,
        data: Bytes,
    },
    UniswapSwap(SwapMethod),
    OneInchSwap {
        src_token: Address,
        dst_token: Address,
        dst_receiver: Address,
        amount: U256,
        min_return_amount: U256,
    },
    OneInchUnoswap {
        src_token: Address,
        amount: U256,
        min_return: U256,
        pools: Vec<U256>,
    },
    /// A known selector whose arguments failed to decode.
    Undecoded {
        selector: Selector,
        signature: &'static str,
    },
    /// No registered decorator knows this selector.
    Unknown { selector: Option<Selector> },
}

/// Decodes call input into a [`ContractMethod`].
///
/// Returns `None` for selectors the decorator does not know. Implementations never
/// fail: malformed arguments for a known selector become [`ContractMethod::Undecoded`].
pub trait MethodDecorator: Send + Sync {
    fn contract_method(&self, input: &[u8]) -> Option<ContractMethod>;
}

pub fn selector(input: &[u8]) -> Option<Selector> {
    input.get(..4).map(Selector::from_slice)
}

/// Decodes `input` as `C` when its selector matches `C::SELECTOR`.
pub(crate) fn decode_call<C: SolCall>(
    input: &[u8],
    map: impl FnOnce(C) -> ContractMethod,
) -> Option<ContractMethod> {
    if selector(input)? != Selector::from(C::SELECTOR) {
        return None;
    }

    Some(match C::abi_decode(input, true) {
        Ok(call) => map(call),
        Err(err) => {
            debug!(signature = C::SIGNATURE, error = %err, "call data did not decode");
            ContractMethod::Undecoded {
                selector: Selector::from(C::SELECTOR),
                signature: C::SIGNATURE,
            }
        }
    })
}
