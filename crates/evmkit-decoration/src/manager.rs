//! Runs the registered decorators over transactions.

use alloy::primitives::{Address, Bytes, B256, U256};
use evmkit_data::types::{InternalTransaction, Transaction, TransactionLog};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::trace;

use crate::decoration::{
    DecorationInput, FullTransaction, TransactionDecoration, TransactionDecorator,
};
use crate::decorators::{
    Eip20EventDecorator, Eip20MethodDecorator, Eip20TransactionDecorator, EthereumDecorator,
    NftEventDecorator, NftMethodDecorator, NftTransactionDecorator, OneInchMethodDecorator,
    OneInchTransactionDecorator, UniswapEventDecorator, UniswapMethodDecorator,
    UniswapTransactionDecorator,
};
use crate::event::{ContractEventInstance, EventDecorator};
use crate::method::{selector, ContractMethod, MethodDecorator};

/// Decorator registries for one tracked address.
///
/// Decorators are tried in registration order and can be added while the manager
/// is shared; the first transaction decorator to claim a transaction wins.
pub struct DecorationManager {
    user: Address,
    method_decorators: RwLock<Vec<Arc<dyn MethodDecorator>>>,
    event_decorators: RwLock<Vec<Arc<dyn EventDecorator>>>,
    transaction_decorators: RwLock<Vec<Arc<dyn TransactionDecorator>>>,
}

impl DecorationManager {
    /// A manager with no decorators; every call decodes to `Unknown` or `PlainTransfer`.
    pub fn new(user: Address) -> Self {
        Self {
            user,
            method_decorators: RwLock::new(Vec::new()),
            event_decorators: RwLock::new(Vec::new()),
            transaction_decorators: RwLock::new(Vec::new()),
        }
    }

    /// Native transfers, EIP-20, NFTs, Uniswap and 1inch.
    pub fn with_defaults(user: Address) -> Self {
        let manager = Self::new(user);
        manager.add_transaction_decorator(Arc::new(EthereumDecorator::new(user)));

        manager.add_method_decorator(Arc::new(Eip20MethodDecorator));
        manager.add_event_decorator(Arc::new(Eip20EventDecorator::new(user)));
        manager.add_transaction_decorator(Arc::new(Eip20TransactionDecorator::new(user)));

        manager.add_method_decorator(Arc::new(NftMethodDecorator));
        manager.add_event_decorator(Arc::new(NftEventDecorator::new(user)));
        manager.add_transaction_decorator(Arc::new(NftTransactionDecorator::new(user)));

        manager.add_method_decorator(Arc::new(UniswapMethodDecorator));
        manager.add_event_decorator(Arc::new(UniswapEventDecorator::new(user)));
        manager.add_transaction_decorator(Arc::new(UniswapTransactionDecorator::new(user)));

        manager.add_method_decorator(Arc::new(OneInchMethodDecorator));
        manager.add_transaction_decorator(Arc::new(OneInchTransactionDecorator::new(user)));
        manager
    }

    pub fn user(&self) -> Address {
        self.user
    }

    pub fn add_method_decorator(&self, decorator: Arc<dyn MethodDecorator>) {
        self.method_decorators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(decorator);
    }

    pub fn add_event_decorator(&self, decorator: Arc<dyn EventDecorator>) {
        self.event_decorators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(decorator);
    }

    pub fn add_transaction_decorator(&self, decorator: Arc<dyn TransactionDecorator>) {
        self.transaction_decorators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(decorator);
    }

    /// Decodes call input. `None` input (body not known yet) stays `None`.
    pub fn contract_method(&self, input: Option<&Bytes>) -> Option<ContractMethod> {
        let input = input?;
        if input.is_empty() {
            return Some(ContractMethod::Empty);
        }

        let decorators = self
            .method_decorators
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let method = decorators
            .iter()
            .find_map(|decorator| decorator.contract_method(input))
            .unwrap_or(ContractMethod::Unknown {
                selector: selector(input),
            });
        Some(method)
    }

    pub fn event_instances(&self, logs: &[TransactionLog]) -> Vec<ContractEventInstance> {
        let decorators = self
            .event_decorators
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        decorators
            .iter()
            .flat_map(|decorator| decorator.contract_event_instances(logs))
            .collect()
    }

    /// Classifies a call that has not been sent yet (no logs or internal transactions).
    pub fn decorate_call(
        &self,
        from: Address,
        to: Option<Address>,
        value: U256,
        input: &Bytes,
    ) -> TransactionDecoration {
        let method = self.contract_method(Some(input));
        self.decoration(&DecorationInput {
            from: Some(from),
            to,
            value: Some(value),
            method: method.as_ref(),
            internal_transactions: &[],
            event_instances: &[],
        })
    }

    /// Decorates one transaction from its logs and internal transactions.
    pub fn decorate(
        &self,
        transaction: &Transaction,
        internal_transactions: &[InternalTransaction],
        logs: &[TransactionLog],
    ) -> TransactionDecoration {
        let method = self.contract_method(transaction.input.as_ref());
        let event_instances = self.event_instances(logs);
        self.decoration(&DecorationInput {
            from: transaction.from,
            to: transaction.to,
            value: transaction.value,
            method: method.as_ref(),
            internal_transactions,
            event_instances: &event_instances,
        })
    }

    /// Decorates a batch, grouping logs and internal transactions by transaction hash.
    pub fn decorate_transactions(
        &self,
        transactions: Vec<Transaction>,
        internal_transactions: &[InternalTransaction],
        logs: &[TransactionLog],
    ) -> Vec<FullTransaction> {
        let mut internals_by_hash: HashMap<B256, Vec<InternalTransaction>> = HashMap::new();
        for itx in internal_transactions {
            internals_by_hash
                .entry(itx.hash)
                .or_default()
                .push(itx.clone());
        }
        let mut logs_by_hash: HashMap<B256, Vec<TransactionLog>> = HashMap::new();
        for log in logs {
            logs_by_hash
                .entry(log.transaction_hash)
                .or_default()
                .push(log.clone());
        }

        transactions
            .into_iter()
            .map(|transaction| {
                let decoration = self.decorate(
                    &transaction,
                    internals_by_hash
                        .get(&transaction.hash)
                        .map_or(&[][..], Vec::as_slice),
                    logs_by_hash
                        .get(&transaction.hash)
                        .map_or(&[][..], Vec::as_slice),
                );
                FullTransaction::new(transaction, decoration)
            })
            .collect()
    }

    fn decoration(&self, input: &DecorationInput<'_>) -> TransactionDecoration {
        let claimed = {
            let decorators = self
                .transaction_decorators
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            decorators
                .iter()
                .find_map(|decorator| decorator.decoration(input))
        };
        if let Some(decoration) = claimed {
            return decoration;
        }

        if input.method == Some(&ContractMethod::Empty) {
            return TransactionDecoration::PlainTransfer {
                from: input.from,
                to: input.to,
                value: input.value.unwrap_or_default(),
            };
        }

        trace!(method = ?input.method, "no decorator claimed transaction");
        let involves_user = |from: &Address, to: &Address| from == &self.user || to == &self.user;
        TransactionDecoration::Unknown {
            from: input.from,
            to: input.to,
            value: input.value,
            internal_transactions: input
                .internal_transactions
                .iter()
                .filter(|itx| involves_user(&itx.from, &itx.to))
                .cloned()
                .collect(),
            event_instances: input.event_instances.to_vec(),
        }
    }
}
