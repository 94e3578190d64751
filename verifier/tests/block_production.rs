//! End-to-end block production scenarios: queue in, shards and replies
//! out.

mod common;

use std::sync::Arc;
use std::time::Duration;

use cached_mpt::{CachedMpt, Nibbles, UsedNodes};
use ethereum_types::{Address, U256};
use keccak_hash::keccak;

use common::*;
use verifier::account::EMPTY_BUFFER_HASH;
use verifier::block::Block;
use verifier::generator::{BlockGenerator, HeightOutcome};
use verifier::learner::Learner;
use verifier::queue::TxQueue;
use verifier::shards::UpdateMsg;
use verifier::txn::TransactionData;
use verifier::wire::ErrorCode;

struct Node {
    generator: BlockGenerator,
    queue: Arc<TxQueue>,
    learner: Arc<Learner>,
    recorders: Vec<Arc<RecordingShard>>,
}

/// A verifier wired to recording shards, seeded with the given balances.
fn node(accounts: &[(Address, u64)], pow_min: u64, pow_max: u64) -> Node {
    let (genesis, trie) = genesis_with(accounts);
    let queue = Arc::new(TxQueue::new());
    let learner = Arc::new(Learner::new(0));
    let (clients, recorders) = shard_set();
    let generator = BlockGenerator::new(
        options(pow_min, pow_max),
        queue.clone(),
        learner.clone(),
        clients,
        &genesis,
        trie,
    )
    .unwrap();
    Node {
        generator,
        queue,
        learner,
        recorders,
    }
}

fn submit(queue: &TxQueue, tx: Vec<u8>) -> tokio::sync::oneshot::Receiver<ErrorCode> {
    let (data, rx) = TransactionData::from_wire(tx, &[]).unwrap();
    queue.push_back(data);
    rx
}

fn op_for<'a>(msgs: &'a [UpdateMsg], address: &Address) -> Option<&'a verifier::UpdateOp> {
    msgs.iter()
        .flat_map(|m| &m.operations)
        .find(|op| op.account == address.as_bytes())
}

#[tokio::test]
async fn simple_transfer_commits_a_block() {
    let key = signing_key(0x42);
    let sender = key_address(&key);
    let recipient = Address::repeat_byte(0xbb);
    let mut node = node(&[(sender, 100), (recipient, 0)], 10, 20);
    let genesis_root = node.generator.state_root();

    let tx = signed_tx(&key, 0, Some(recipient), 40);
    let reply = submit(&node.queue, tx.clone());

    let outcome = node.generator.run_height().await.unwrap();
    let HeightOutcome::Proposed { number, hash } = outcome else {
        panic!("expected a proposal, got {outcome:?}");
    };
    assert_eq!(number, 1);
    assert_eq!(reply.await.unwrap(), ErrorCode::Success);

    // Every shard received the block; decode one and check the header.
    let msgs: Vec<UpdateMsg> = node
        .recorders
        .iter()
        .map(|r| r.last().expect("every shard got an update"))
        .collect();
    let block = Block::decode(&msgs[0].rlp_block).unwrap();
    assert_eq!(block.header.number, 1);
    assert_eq!(block.hash(), hash);
    assert_eq!(block.transactions, vec![tx.clone()]);
    assert_ne!(block.header.state_root, genesis_root);
    assert_eq!(node.generator.state_root(), block.header.state_root);
    assert_eq!(node.generator.parent_hash(), hash);
    assert_eq!(node.generator.number(), 2);

    // transactionsRoot is the trie of { "0" -> tx bytes }.
    let expected_root = CachedMpt::default()
        .batch_cow(
            [(Nibbles::from_bytes(b"0"), tx)],
            &mut UsedNodes::new(),
            &[],
        )
        .unwrap()
        .root_hash();
    assert_eq!(block.header.transactions_root, expected_root);

    // Post-state per the shard operations: A = (1, 60), B = (0, 40).
    let sender_op = op_for(&msgs, &sender).unwrap();
    assert_eq!(U256::from_big_endian(&sender_op.balance), U256::from(60));
    assert_eq!(sender_op.nonce, 1);
    let recipient_op = op_for(&msgs, &recipient).unwrap();
    assert_eq!(U256::from_big_endian(&recipient_op.balance), U256::from(40));
    assert_eq!(recipient_op.nonce, 0);
}

#[tokio::test]
async fn stale_nonce_is_rejected_and_the_block_is_empty() {
    let key = signing_key(0x42);
    let sender = key_address(&key);
    let mut node = node(&[(sender, 100)], 10, 20);
    let genesis_root = node.generator.state_root();

    let reply = submit(
        &node.queue,
        signed_tx(&key, 5, Some(Address::repeat_byte(0xbb)), 40),
    );
    node.generator.run_height().await.unwrap();

    assert_eq!(reply.await.unwrap(), ErrorCode::Invalid);
    assert_eq!(node.generator.state_root(), genesis_root);

    let msg = node.recorders[0].last().unwrap();
    let block = Block::decode(&msg.rlp_block).unwrap();
    assert!(block.transactions.is_empty());
    // The transactions trie of an empty sequence is the empty-trie root.
    assert_eq!(block.header.transactions_root, EMPTY_BUFFER_HASH);
    assert_eq!(block.header.state_root, genesis_root);
}

#[tokio::test]
async fn absent_recipient_is_created_by_the_transfer() {
    let key = signing_key(0x42);
    let sender = key_address(&key);
    let recipient = Address::repeat_byte(0xcc);
    let mut node = node(&[(sender, 100)], 10, 20);

    let reply = submit(&node.queue, signed_tx(&key, 0, Some(recipient), 40));
    node.generator.run_height().await.unwrap();
    assert_eq!(reply.await.unwrap(), ErrorCode::Success);

    let msgs: Vec<UpdateMsg> = node.recorders.iter().filter_map(|r| r.last()).collect();
    let created = op_for(&msgs, &recipient).unwrap();
    assert_eq!(U256::from_big_endian(&created.balance), U256::from(40));
    assert_eq!(created.nonce, 0);
    let sender_op = op_for(&msgs, &sender).unwrap();
    assert_eq!(U256::from_big_endian(&sender_op.balance), U256::from(60));
    assert_eq!(sender_op.nonce, 1);
}

#[tokio::test]
async fn contract_creation_is_rejected() {
    let key = signing_key(0x42);
    let sender = key_address(&key);
    let mut node = node(&[(sender, 100)], 10, 20);
    let genesis_root = node.generator.state_root();

    let reply = submit(&node.queue, signed_tx(&key, 0, None, 40));
    node.generator.run_height().await.unwrap();

    assert_eq!(reply.await.unwrap(), ErrorCode::Invalid);
    assert_eq!(node.generator.state_root(), genesis_root);
}

#[tokio::test]
async fn peer_block_wins_the_race_and_the_batch_requeues() {
    let key = signing_key(0x42);
    let sender = key_address(&key);
    // A long timer guarantees the peer block arrives first.
    let mut node = node(&[(sender, 100)], 5_000, 6_000);
    let genesis_root = node.generator.state_root();
    let parent = node.generator.parent_hash();

    let reply = submit(
        &node.queue,
        signed_tx(&key, 0, Some(Address::repeat_byte(0xbb)), 40),
    );

    // An empty peer block for height 1 whose state root is reachable:
    // no transactions, so it re-executes to the genesis root.
    let (mut peer, _) = genesis_with(&[(sender, 100)]);
    peer.header.number = 1;
    peer.header.parent_hash = parent;
    peer.header.state_root = genesis_root;
    let peer_hash = peer.hash();

    {
        let learner = node.learner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            learner.learn_block(peer);
        });
    }

    let outcome = node.generator.run_height().await.unwrap();
    assert_eq!(
        outcome,
        HeightOutcome::Adopted {
            number: 1,
            hash: peer_hash
        }
    );
    assert_eq!(node.generator.number(), 2);
    assert_eq!(node.generator.parent_hash(), peer_hash);
    assert_eq!(node.generator.state_root(), genesis_root);

    // The losing batch was replied to and went back to the queue head.
    assert_eq!(reply.await.unwrap(), ErrorCode::Success);
    assert_eq!(node.queue.len(), 1);

    // No shard saw an update for the adopted height.
    assert!(node.recorders.iter().all(|r| r.updates().is_empty()));
}

#[tokio::test]
async fn learned_block_is_adopted_before_racing() {
    let key = signing_key(0x42);
    let sender = key_address(&key);
    let mut node = node(&[(sender, 100)], 5_000, 6_000);
    let genesis_root = node.generator.state_root();

    let (mut peer, _) = genesis_with(&[(sender, 100)]);
    peer.header.number = 1;
    peer.header.parent_hash = node.generator.parent_hash();
    peer.header.state_root = genesis_root;
    node.learner.learn_block(peer.clone());

    // The shortcut path adopts without waiting out the 5 s timer.
    let started = std::time::Instant::now();
    let outcome = node.generator.run_height().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(
        outcome,
        HeightOutcome::Adopted {
            number: 1,
            hash: peer.hash()
        }
    );
}

#[tokio::test]
async fn bad_peer_block_is_rejected_and_we_propose() {
    let key = signing_key(0x42);
    let sender = key_address(&key);
    let mut node = node(&[(sender, 100)], 200, 300);

    // A peer block claiming an unreachable state root.
    let (mut peer, _) = genesis_with(&[(sender, 100)]);
    peer.header.number = 1;
    peer.header.state_root = keccak(b"nonsense");
    {
        let learner = node.learner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            learner.learn_block(peer);
        });
    }

    let outcome = node.generator.run_height().await.unwrap();
    assert!(matches!(outcome, HeightOutcome::Proposed { number: 1, .. }));
}

#[tokio::test]
async fn shard_routing_hits_exactly_the_touched_shards() {
    // Sender hashes into shard 3, as does the first recipient; the
    // second recipient hashes into shard 12.
    let key = signing_key_for_shard(3);
    let sender = key_address(&key);
    let recipient_3 = address_for_shard(3);
    let recipient_12 = address_for_shard(12);
    assert_ne!(sender, recipient_3);

    let mut node = node(&[(sender, 100)], 10, 20);
    let r1 = submit(&node.queue, signed_tx(&key, 0, Some(recipient_3), 10));
    let r2 = submit(&node.queue, signed_tx(&key, 1, Some(recipient_12), 10));
    node.generator.run_height().await.unwrap();
    assert_eq!(r1.await.unwrap(), ErrorCode::Success);
    assert_eq!(r2.await.unwrap(), ErrorCode::Success);

    for (shard, recorder) in node.recorders.iter().enumerate() {
        let msg = recorder.last().expect("all shards get the block");
        // Every shard gets the block and root bytes even with no ops.
        assert!(!msg.rlp_block.is_empty());
        assert!(!msg.merkle_tree_nodes.is_empty());
        match shard {
            3 => assert_eq!(msg.operations.len(), 2),
            12 => assert_eq!(msg.operations.len(), 1),
            _ => assert!(msg.operations.is_empty(), "shard {shard} got stray ops"),
        }
    }
}

#[tokio::test]
async fn heights_chain_across_consecutive_blocks() {
    let key = signing_key(0x42);
    let sender = key_address(&key);
    let recipient = Address::repeat_byte(0xbb);
    let mut node = node(&[(sender, 100)], 10, 20);

    submit(&node.queue, signed_tx(&key, 0, Some(recipient), 10));
    let first = node.generator.run_height().await.unwrap();
    let HeightOutcome::Proposed { number: 1, hash: first_hash } = first else {
        panic!("expected height 1 proposal");
    };

    submit(&node.queue, signed_tx(&key, 1, Some(recipient), 10));
    let second = node.generator.run_height().await.unwrap();
    let HeightOutcome::Proposed { number: 2, .. } = second else {
        panic!("expected height 2 proposal");
    };

    let msg = node.recorders[0].last().unwrap();
    let block = Block::decode(&msg.rlp_block).unwrap();
    assert_eq!(block.header.number, 2);
    // The second block links to the first.
    assert_eq!(block.header.parent_hash, first_hash);

    // Two transfers of 10 settled: A = (2, 80), B = (0, 20).
    let msgs: Vec<UpdateMsg> = node.recorders.iter().filter_map(|r| r.last()).collect();
    let sender_op = op_for(&msgs, &sender).unwrap();
    assert_eq!(U256::from_big_endian(&sender_op.balance), U256::from(80));
    assert_eq!(sender_op.nonce, 2);
    let recipient_op = op_for(&msgs, &recipient).unwrap();
    assert_eq!(U256::from_big_endian(&recipient_op.balance), U256::from(20));
}
