//! Integration tests for decorating stored transactions and filtering history by tag.

mod common;

use alloy::primitives::{Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolEvent};
use common::{test_store, tx_hash, FakeNode, OTHER, USDC, USER};
use evmkit_data::types::{InternalTransaction, Transaction, TransactionLog};
use evmkit_decoration::abi::erc20::IERC20;
use evmkit_decoration::{tags, ContractEventInstance, DecorationManager, TransactionDecoration};
use evmkit_sync::{NotSyncedPool, TransactionManager, TransactionsSynced};
use std::sync::Arc;

fn transfer_log(tx: B256, from: alloy::primitives::Address, to: alloy::primitives::Address, value: u64) -> TransactionLog {
    TransactionLog {
        transaction_hash: tx,
        log_index: 0,
        block_number: 10,
        transaction_index: 0,
        address: USDC,
        topics: vec![IERC20::Transfer::SIGNATURE_HASH, from.into_word(), to.into_word()],
        data: Bytes::from(U256::from(value).to_be_bytes::<32>().to_vec()),
        removed: false,
    }
}

/// A call with empty input that no decorator claims is a plain value transfer.
#[test]
fn empty_input_defaults_to_plain_transfer() {
    let manager = DecorationManager::with_defaults(USER);
    let third_party = alloy::primitives::Address::repeat_byte(0x33);

    let decoration = manager.decorate_call(OTHER, Some(third_party), U256::from(7u64), &Bytes::new());

    assert_eq!(
        decoration,
        TransactionDecoration::PlainTransfer {
            from: Some(OTHER),
            to: Some(third_party),
            value: U256::from(7u64),
        }
    );
    assert!(decoration.tags(&USER).is_empty());
}

#[test]
fn outgoing_token_transfer_call_is_decoded_before_sending() {
    let manager = DecorationManager::with_defaults(USER);
    let input = IERC20::transferCall {
        to: OTHER,
        value: U256::from(250u64),
    }
    .abi_encode();

    let decoration = manager.decorate_call(USER, Some(USDC), U256::ZERO, &Bytes::from(input));

    assert_eq!(
        decoration,
        TransactionDecoration::OutgoingEip20 {
            contract: USDC,
            to: OTHER,
            value: U256::from(250u64),
            sent_to_self: false,
        }
    );
    let tags = decoration.tags(&USER);
    assert!(tags.contains(&tags::EIP20_TRANSFER.to_string()));
    assert!(tags.contains(&tags::token_outgoing(&USDC)));
}

/// Someone else's contract call that pays the user through a token transfer and an
/// internal transfer is surfaced as unknown, carrying only what touches the user.
#[test]
fn foreign_call_keeps_only_user_relevant_context() {
    let manager = DecorationManager::with_defaults(USER);
    let hash = tx_hash(1);
    let router = alloy::primitives::Address::repeat_byte(0x44);
    let tx = Transaction {
        from: Some(OTHER),
        to: Some(router),
        value: Some(U256::ZERO),
        input: Some(Bytes::from(vec![0xde, 0xad, 0xbe, 0xef])),
        ..Transaction::new(hash, 100)
    };
    let internals = vec![
        InternalTransaction {
            hash,
            block_number: 10,
            from: router,
            to: USER,
            value: U256::from(5u64),
            trace_id: "0_1".into(),
        },
        InternalTransaction {
            hash,
            block_number: 10,
            from: router,
            to: OTHER,
            value: U256::from(9u64),
            trace_id: "0_2".into(),
        },
    ];
    let logs = vec![
        transfer_log(hash, OTHER, USER, 40),
        transfer_log(hash, OTHER, router, 60),
    ];

    let TransactionDecoration::Unknown {
        internal_transactions,
        event_instances,
        ..
    } = manager.decorate(&tx, &internals, &logs)
    else {
        panic!("expected an unknown decoration");
    };

    assert_eq!(internal_transactions.len(), 1);
    assert_eq!(internal_transactions[0].to, USER);
    assert_eq!(
        event_instances,
        vec![ContractEventInstance::Eip20Transfer {
            contract: USDC,
            from: OTHER,
            to: USER,
            value: U256::from(40u64),
        }]
    );
}

/// Synced transactions are tagged once, then history can be filtered with AND-of-OR tags.
#[tokio::test]
async fn synced_history_is_filterable_by_tags() {
    let store = test_store();
    let node = FakeNode::new();
    let pool = Arc::new(NotSyncedPool::new(Arc::clone(&store)));
    let manager = TransactionManager::new(
        node.blockchain(),
        Arc::clone(&store),
        pool,
        Arc::new(DecorationManager::with_defaults(USER)),
        None,
        1,
    );

    let eth_in = Transaction {
        from: Some(OTHER),
        to: Some(USER),
        value: Some(U256::from(1u64)),
        input: Some(Bytes::new()),
        block_number: Some(10),
        ..Transaction::new(tx_hash(1), 100)
    };
    let token_in = Transaction {
        from: Some(OTHER),
        to: Some(USDC),
        value: Some(U256::ZERO),
        input: Some(Bytes::from(vec![0x12, 0x34, 0x56, 0x78])),
        block_number: Some(11),
        ..Transaction::new(tx_hash(2), 200)
    };
    let eth_out = Transaction {
        from: Some(USER),
        to: Some(OTHER),
        value: Some(U256::from(2u64)),
        input: Some(Bytes::new()),
        block_number: Some(12),
        ..Transaction::new(tx_hash(3), 300)
    };
    let batch = vec![eth_in, token_in, eth_out];
    store.save_transactions(&batch).unwrap();
    store
        .save_logs(&[transfer_log(tx_hash(2), OTHER, USER, 40)])
        .unwrap();
    manager
        .handle_synced(&TransactionsSynced {
            transactions: batch,
            initial: true,
        })
        .unwrap();

    let hashes = |filter: Vec<Vec<String>>| -> Vec<B256> {
        manager
            .transactions(filter, None, None)
            .unwrap()
            .iter()
            .map(|t| t.hash())
            .collect()
    };

    assert_eq!(hashes(Vec::new()), vec![tx_hash(3), tx_hash(2), tx_hash(1)]);
    assert_eq!(
        hashes(vec![vec![tags::INCOMING.to_string()]]),
        vec![tx_hash(2), tx_hash(1)]
    );
    assert_eq!(
        hashes(vec![
            vec![tags::INCOMING.to_string()],
            vec![tags::token_incoming(&USDC), tags::SWAP.to_string()],
        ]),
        vec![tx_hash(2)]
    );
    assert_eq!(
        hashes(vec![vec![tags::EVM_COIN_OUTGOING.to_string()]]),
        vec![tx_hash(3)]
    );

    let page = manager.transactions(Vec::new(), Some(tx_hash(3)), Some(1)).unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].hash(), tx_hash(2));
}
