//! Shared fixtures for the end-to-end tests: signing, genesis
//! construction, and recording shard doubles.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use cached_mpt::UsedNodes;
use ethereum_types::{Address, Bloom, H256, H64, U256};
use k256::ecdsa::SigningKey;
use keccak_hash::keccak;
use parking_lot::Mutex;
use rlp::RlpStream;

use verifier::account::{Account, EMPTY_BUFFER_HASH};
use verifier::block::{Block, Header};
use verifier::exec::ExecutionFlags;
use verifier::generator::GeneratorOptions;
use verifier::shards::{ShardClient, UpdateMsg, SHARD_COUNT};
use verifier::state::{StateTrie, WriteSet};
use verifier::txn::Transaction;

pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32].into()).unwrap()
}

pub fn key_address(key: &SigningKey) -> Address {
    let point = key.verifying_key().to_encoded_point(false);
    let digest = keccak(&point.as_bytes()[1..]);
    Address::from_slice(&digest.as_bytes()[12..])
}

/// A signing key whose address hashes to the given top nibble (shard).
pub fn signing_key_for_shard(shard: u8) -> SigningKey {
    // 0xff repeated exceeds the curve order, so stop short of it.
    for seed in 1..=254u8 {
        let key = signing_key(seed);
        if keccak(key_address(&key)).as_bytes()[0] >> 4 == shard {
            return key;
        }
    }
    unreachable!("some seed always lands in the shard")
}

/// An address (not a key) whose hash lands in the given shard.
pub fn address_for_shard(shard: u8) -> Address {
    for seed in 0..=255u8 {
        for last in 0..=255u8 {
            let mut bytes = [seed; 20];
            bytes[19] = last;
            let address = Address::from(bytes);
            if keccak(address).as_bytes()[0] >> 4 == shard {
                return address;
            }
        }
    }
    unreachable!("some address always lands in the shard")
}

/// RLP of a signed legacy transfer (pre-EIP-155 `v`).
pub fn signed_tx(key: &SigningKey, nonce: u64, to: Option<Address>, value: u64) -> Vec<u8> {
    let unsigned = Transaction {
        nonce: nonce.into(),
        gas_price: U256::one(),
        gas_limit: U256::from(21_000),
        to,
        value: value.into(),
        data: vec![],
        v: 27,
        r: U256::zero(),
        s: U256::zero(),
    };
    let (sig, recovery) = key
        .sign_prehash_recoverable(unsigned.signing_hash().as_bytes())
        .unwrap();
    let mut stream = RlpStream::new_list(9);
    stream.append(&unsigned.nonce);
    stream.append(&unsigned.gas_price);
    stream.append(&unsigned.gas_limit);
    match to {
        Some(address) => stream.append(&address),
        None => stream.append_empty_data(),
    };
    stream.append(&unsigned.value);
    stream.append(&unsigned.data);
    stream.append(&(27 + recovery.to_byte() as u64));
    stream.append(&U256::from_big_endian(&sig.to_bytes()[..32]));
    stream.append(&U256::from_big_endian(&sig.to_bytes()[32..]));
    stream.out().to_vec()
}

/// A genesis block plus the matching state trie, with the given balances.
pub fn genesis_with(accounts: &[(Address, u64)]) -> (Block, StateTrie) {
    let mut write_set = WriteSet::new();
    for (address, balance) in accounts {
        write_set.insert(
            *address,
            keccak(*address),
            Account::with_balance((*balance).into()),
        );
    }
    let trie = StateTrie::default()
        .commit(&write_set, &mut UsedNodes::new(), &[])
        .unwrap();

    let header = Header {
        parent_hash: H256::zero(),
        uncles_hash: H256::zero(),
        beneficiary: Address::zero(),
        state_root: trie.root(),
        transactions_root: EMPTY_BUFFER_HASH,
        receipts_root: H256::zero(),
        logs_bloom: Bloom::zero(),
        difficulty: U256::from(100),
        number: 0,
        gas_limit: U256::from(8_000_000),
        gas_used: U256::zero(),
        timestamp: 0,
        extra_data: vec![],
        mix_hash: H256::zero(),
        nonce: H64::zero(),
    };
    (Block::new(header, vec![]), trie)
}

/// Generator options with a short, deterministic-enough timer.
pub fn options(pow_min: u64, pow_max: u64) -> GeneratorOptions {
    GeneratorOptions {
        beneficiary: Address::repeat_byte(0xee),
        pow_min,
        pow_max,
        max_tx_per_block: None,
        prune_depth: 4,
        flags: ExecutionFlags::default(),
        checkpoint_path: std::env::temp_dir().join(format!(
            "verifier-test-checkpoint-{}.txt",
            std::process::id()
        )),
    }
}

/// A shard double that records every update it receives.
#[derive(Debug, Default)]
pub struct RecordingShard {
    updates: Mutex<Vec<UpdateMsg>>,
}

impl RecordingShard {
    pub fn updates(&self) -> Vec<UpdateMsg> {
        self.updates.lock().clone()
    }

    pub fn last(&self) -> Option<UpdateMsg> {
        self.updates.lock().last().cloned()
    }
}

#[async_trait]
impl ShardClient for RecordingShard {
    async fn update(&self, msg: UpdateMsg) -> Result<()> {
        self.updates.lock().push(msg);
        Ok(())
    }
}

/// Sixteen recording shards, as the generator's client set plus handles
/// for assertions.
pub fn shard_set() -> (Vec<Arc<dyn ShardClient>>, Vec<Arc<RecordingShard>>) {
    let recorders: Vec<Arc<RecordingShard>> = (0..SHARD_COUNT)
        .map(|_| Arc::new(RecordingShard::default()))
        .collect();
    let clients = recorders
        .iter()
        .map(|r| r.clone() as Arc<dyn ShardClient>)
        .collect();
    (clients, recorders)
}
