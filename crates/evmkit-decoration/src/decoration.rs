//! Transaction decorations: what a transaction means for the tracked address.

use alloy::primitives::{Address, B256, U256};
use evmkit_data::types::{InternalTransaction, Transaction};

use crate::event::ContractEventInstance;
use crate::method::{ContractMethod, Token};
use crate::tags;

/// An amount either observed on chain or bounded by the caller's slippage limit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SwapAmount {
    Exact(U256),
    Extremum(U256),
}

impl SwapAmount {
    pub fn value(&self) -> U256 {
        match self {
            SwapAmount::Exact(v) | SwapAmount::Extremum(v) => *v,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransactionDecoration {
    Incoming {
        from: Address,
        value: U256,
    },
    Outgoing {
        to: Address,
        value: U256,
        sent_to_self: bool,
    },
    ContractCreation,
    OutgoingEip20 {
        contract: Address,
        to: Address,
        value: U256,
        sent_to_self: bool,
    },
    ApproveEip20 {
        contract: Address,
        spender: Address,
        value: U256,
    },
    OutgoingEip721 {
        contract: Address,
        to: Address,
        token_id: U256,
        sent_to_self: bool,
    },
    OutgoingEip1155 {
        contract: Address,
        to: Address,
        token_id: U256,
        value: U256,
        sent_to_self: bool,
    },
    /// Uniswap V2/V3 router swap. `recipient` is `None` when the output goes to the user.
    Swap {
        contract: Address,
        amount_in: SwapAmount,
        amount_out: SwapAmount,
        token_in: Token,
        token_out: Token,
        recipient: Option<Address>,
        deadline: Option<U256>,
    },
    OneInchSwap {
        contract: Address,
        token_in: Token,
        token_out: Token,
        amount_in: U256,
        amount_out: SwapAmount,
        recipient: Option<Address>,
    },
    /// Single-pool 1inch swap; the output token is only known once logs are available.
    OneInchUnoswap {
        contract: Address,
        token_in: Token,
        token_out: Option<Token>,
        amount_in: U256,
        amount_out: SwapAmount,
    },
    /// Nothing claimed a call without input: a bare value transfer.
    PlainTransfer {
        from: Option<Address>,
        to: Option<Address>,
        value: U256,
    },
    /// Unrecognized call. Carries the internal transactions and events that touch the user.
    Unknown {
        from: Option<Address>,
        to: Option<Address>,
        value: Option<U256>,
        internal_transactions: Vec<InternalTransaction>,
        event_instances: Vec<ContractEventInstance>,
    },
}

impl TransactionDecoration {
    /// Tags for indexing; may contain repeats, see [`tags::dedup`].
    pub fn tags(&self, user: &Address) -> Vec<String> {
        match self {
            TransactionDecoration::Incoming { from, .. } => {
                let mut out = eth_tags(tags::INCOMING);
                out.push(tags::from_address(from));
                out
            }
            TransactionDecoration::Outgoing {
                to, sent_to_self, ..
            } => {
                let mut out = eth_tags(tags::OUTGOING);
                out.push(tags::to_address(to));
                if *sent_to_self {
                    out.extend(eth_tags(tags::INCOMING));
                }
                out
            }
            TransactionDecoration::ContractCreation => vec![tags::CONTRACT_CREATION.to_string()],
            TransactionDecoration::OutgoingEip20 {
                contract,
                to,
                sent_to_self,
                ..
            } => token_transfer_tags(contract, tags::EIP20_TRANSFER, to, *sent_to_self),
            TransactionDecoration::ApproveEip20 { contract, .. } => {
                vec![tags::address_tag(contract), tags::EIP20_APPROVE.to_string()]
            }
            TransactionDecoration::OutgoingEip721 {
                contract,
                to,
                sent_to_self,
                ..
            } => token_transfer_tags(contract, tags::EIP721_TRANSFER, to, *sent_to_self),
            TransactionDecoration::OutgoingEip1155 {
                contract,
                to,
                sent_to_self,
                ..
            } => token_transfer_tags(contract, tags::EIP1155_TRANSFER, to, *sent_to_self),
            TransactionDecoration::Swap {
                contract,
                token_in,
                token_out,
                recipient,
                ..
            }
            | TransactionDecoration::OneInchSwap {
                contract,
                token_in,
                token_out,
                recipient,
                ..
            } => swap_tags(contract, token_in, Some(token_out), recipient.as_ref()),
            TransactionDecoration::OneInchUnoswap {
                contract,
                token_in,
                token_out,
                ..
            } => swap_tags(contract, token_in, token_out.as_ref(), None),
            TransactionDecoration::PlainTransfer { from, to, value } => {
                let mut out = Vec::new();
                if value.is_zero() {
                    return out;
                }
                if from.as_ref() == Some(user) {
                    out.extend(eth_tags(tags::OUTGOING));
                    if let Some(to) = to {
                        out.push(tags::to_address(to));
                    }
                }
                if to.as_ref() == Some(user) {
                    out.extend(eth_tags(tags::INCOMING));
                    if let Some(from) = from {
                        out.push(tags::from_address(from));
                    }
                }
                out
            }
            TransactionDecoration::Unknown {
                from,
                to,
                value,
                internal_transactions,
                event_instances,
            } => unknown_tags(
                user,
                *from,
                *to,
                *value,
                internal_transactions,
                event_instances,
            ),
        }
    }
}

fn eth_tags(direction: &str) -> Vec<String> {
    vec![
        tags::EVM_COIN.to_string(),
        format!("{}_{direction}", tags::EVM_COIN),
        direction.to_string(),
    ]
}

fn token_transfer_tags(contract: &Address, kind: &str, to: &Address, sent_to_self: bool) -> Vec<String> {
    let mut out = vec![
        tags::address_tag(contract),
        kind.to_string(),
        tags::token_outgoing(contract),
        tags::OUTGOING.to_string(),
        tags::to_address(to),
    ];
    if sent_to_self {
        out.push(tags::token_incoming(contract));
        out.push(tags::INCOMING.to_string());
    }
    out
}

fn token_tags(token: &Token, direction: &str) -> Vec<String> {
    match token {
        Token::Eth => eth_tags(direction),
        Token::Eip20(address) => vec![
            format!("{}_{direction}", tags::address_tag(address)),
            tags::address_tag(address),
            direction.to_string(),
        ],
    }
}

fn swap_tags(
    contract: &Address,
    token_in: &Token,
    token_out: Option<&Token>,
    recipient: Option<&Address>,
) -> Vec<String> {
    let mut out = vec![tags::address_tag(contract), tags::SWAP.to_string()];
    out.extend(token_tags(token_in, tags::OUTGOING));
    match recipient {
        Some(recipient) => out.push(tags::to_address(recipient)),
        None => {
            if let Some(token_out) = token_out {
                out.extend(token_tags(token_out, tags::INCOMING));
            }
        }
    }
    out
}

fn unknown_tags(
    user: &Address,
    from: Option<Address>,
    to: Option<Address>,
    value: Option<U256>,
    internal_transactions: &[InternalTransaction],
    event_instances: &[ContractEventInstance],
) -> Vec<String> {
    let mut incoming = internal_transactions
        .iter()
        .filter(|itx| &itx.to == user)
        .fold(U256::ZERO, |acc, itx| acc.saturating_add(itx.value));
    let mut outgoing = internal_transactions
        .iter()
        .filter(|itx| &itx.from == user)
        .fold(U256::ZERO, |acc, itx| acc.saturating_add(itx.value));

    if let Some(value) = value {
        if to.as_ref() == Some(user) {
            incoming = incoming.saturating_add(value);
        } else if from.as_ref() == Some(user) {
            outgoing = outgoing.saturating_add(value);
        }
    }

    let mut out = match incoming.cmp(&outgoing) {
        std::cmp::Ordering::Greater => eth_tags(tags::INCOMING),
        std::cmp::Ordering::Less => eth_tags(tags::OUTGOING),
        std::cmp::Ordering::Equal => Vec::new(),
    };

    for itx in internal_transactions {
        if &itx.from != user {
            out.push(tags::from_address(&itx.from));
        }
        if &itx.to != user {
            out.push(tags::to_address(&itx.to));
        }
    }

    out.extend(event_instances.iter().flat_map(|event| event.tags(user)));
    out
}

/// Everything a [`TransactionDecorator`] may look at.
#[derive(Clone, Copy, Debug)]
pub struct DecorationInput<'a> {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: Option<U256>,
    /// `None` when the input data itself is unknown.
    pub method: Option<&'a ContractMethod>,
    pub internal_transactions: &'a [InternalTransaction],
    pub event_instances: &'a [ContractEventInstance],
}

/// Claims a transaction for one protocol. Non-matches return `None`; there is no error path.
pub trait TransactionDecorator: Send + Sync {
    fn decoration(&self, input: &DecorationInput<'_>) -> Option<TransactionDecoration>;
}

/// A stored transaction together with its decoration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FullTransaction {
    pub transaction: Transaction,
    pub decoration: TransactionDecoration,
}

impl FullTransaction {
    pub fn new(transaction: Transaction, decoration: TransactionDecoration) -> Self {
        Self {
            transaction,
            decoration,
        }
    }

    pub fn hash(&self) -> B256 {
        self.transaction.hash
    }

    /// Hash of the transaction that replaced this one at the same nonce, if dropped.
    pub fn replaced_with(&self) -> Option<B256> {
        self.transaction.replaced_with
    }

    pub fn is_dropped(&self) -> bool {
        self.transaction.replaced_with.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const USER: Address = address!("a7d9ddbe1f17865597fbd27ec712455208b6b76d");
    const OTHER: Address = address!("00000000000000000000000000000000000000bb");
    const ROUTER: Address = address!("7a250d5630B4cF539739dF2C5dAcb4c659F2488D");
    const TOKEN: Address = address!("dAC17F958D2ee523a2206206994597C13D831ec7");

    fn internal(from: Address, to: Address, value: u64) -> InternalTransaction {
        InternalTransaction {
            hash: B256::repeat_byte(1),
            block_number: 1,
            from,
            to,
            value: U256::from(value),
            trace_id: "0".into(),
        }
    }

    #[test]
    fn outgoing_to_self_carries_incoming_tags() {
        let tags = TransactionDecoration::Outgoing {
            to: USER,
            value: U256::from(1u64),
            sent_to_self: true,
        }
        .tags(&USER);

        assert!(tags.contains(&tags::EVM_COIN_OUTGOING.to_string()));
        assert!(tags.contains(&tags::EVM_COIN_INCOMING.to_string()));
    }

    #[test]
    fn swap_to_user_tags_output_token_incoming() {
        let tags = TransactionDecoration::Swap {
            contract: ROUTER,
            amount_in: SwapAmount::Exact(U256::from(1u64)),
            amount_out: SwapAmount::Extremum(U256::from(2u64)),
            token_in: Token::Eth,
            token_out: Token::Eip20(TOKEN),
            recipient: None,
            deadline: None,
        }
        .tags(&USER);

        assert_eq!(tags[0], tags::address_tag(&ROUTER));
        assert_eq!(tags[1], tags::SWAP);
        assert!(tags.contains(&tags::EVM_COIN_OUTGOING.to_string()));
        assert!(tags.contains(&tags::token_incoming(&TOKEN)));
    }

    #[test]
    fn swap_to_third_party_tags_recipient_only() {
        let tags = TransactionDecoration::Swap {
            contract: ROUTER,
            amount_in: SwapAmount::Exact(U256::from(1u64)),
            amount_out: SwapAmount::Extremum(U256::from(2u64)),
            token_in: Token::Eip20(TOKEN),
            token_out: Token::Eth,
            recipient: Some(OTHER),
            deadline: None,
        }
        .tags(&USER);

        assert!(tags.contains(&tags::to_address(&OTHER)));
        assert!(!tags.contains(&tags::EVM_COIN_INCOMING.to_string()));
    }

    #[test]
    fn unknown_nets_internal_value_flow() {
        let decoration = TransactionDecoration::Unknown {
            from: Some(USER),
            to: Some(ROUTER),
            value: Some(U256::from(10u64)),
            internal_transactions: vec![internal(ROUTER, USER, 25)],
            event_instances: vec![],
        };

        let tags = decoration.tags(&USER);

        assert_eq!(&tags[..3], &eth_tags(tags::INCOMING)[..]);
        assert!(tags.contains(&tags::from_address(&ROUTER)));
    }

    #[test]
    fn zero_value_plain_transfer_has_no_tags() {
        let decoration = TransactionDecoration::PlainTransfer {
            from: Some(USER),
            to: Some(OTHER),
            value: U256::ZERO,
        };
        assert!(decoration.tags(&USER).is_empty());
    }
}
