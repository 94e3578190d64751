//! The typed state trie (hashed address -> account) and the per-block
//! write-set overlay.

use std::collections::HashMap;

use bytes::Bytes;
use cached_mpt::{CachedMpt, Nibbles, NodeBag, TrieOpResult, UsedNodes};
use ethereum_types::{Address, H256};

use crate::account::Account;

/// The global state trie, keyed by `keccak(address)` and valued by the
/// RLP encoding of [`Account`].
#[derive(Clone, Debug, Default)]
pub struct StateTrie {
    inner: CachedMpt,
}

impl StateTrie {
    pub fn new(inner: CachedMpt) -> Self {
        Self { inner }
    }

    pub fn root(&self) -> H256 {
        self.inner.root_hash()
    }

    /// The RLP encoding of the root node, shipped to storage shards so
    /// they can reanchor.
    pub fn serialize_root(&self) -> Bytes {
        self.inner.serialize_root()
    }

    /// Reads the account under `hashed_address`, resolving pruned stubs
    /// through `bags` and recording traversed nodes into `used`.
    pub fn get_account(
        &self,
        hashed_address: H256,
        used: &mut UsedNodes,
        bags: &[&NodeBag],
    ) -> TrieOpResult<Option<Account>> {
        match self
            .inner
            .get_with_bags(Nibbles::from_h256(hashed_address), used, bags)?
        {
            Some(bytes) => Ok(Some(Account::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Materializes the write-set copy-on-write, returning the next
    /// generation of the trie. `self` is left as the state of the previous
    /// block.
    pub fn commit(
        &self,
        write_set: &WriteSet,
        used: &mut UsedNodes,
        bags: &[&NodeBag],
    ) -> TrieOpResult<StateTrie> {
        let puts = write_set.entries().map(|entry| {
            (
                Nibbles::from_h256(entry.hashed_address),
                entry.account.rlp_bytes(),
            )
        });
        Ok(Self::new(self.inner.batch_cow(puts, used, bags)?))
    }

    /// Stubs out everything deeper than `depth`, bounding the resident
    /// cache between blocks.
    pub fn prune(&self, depth: usize) -> StateTrie {
        Self::new(self.inner.prune(depth))
    }
}

/// A draft account state awaiting commit, addressed both ways: the
/// unhashed address keys the overlay, the hashed address keys the trie
/// and picks the storage shard. Keeping both avoids rehashing on every
/// touch.
#[derive(Clone, Debug)]
pub struct WriteSetEntry {
    pub address: Address,
    pub hashed_address: H256,
    pub account: Account,
}

/// The in-flight overlay of one execution pass: consulted before the trie
/// on every account read, flushed to the trie only by the end-of-block
/// copy-on-write commit. Inside a pass this is the sole ground truth.
#[derive(Clone, Debug, Default)]
pub struct WriteSet {
    entries: HashMap<Address, WriteSetEntry>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &Address) -> Option<&Account> {
        self.entries.get(address).map(|entry| &entry.account)
    }

    pub fn insert(&mut self, address: Address, hashed_address: H256, account: Account) {
        self.entries.insert(
            address,
            WriteSetEntry {
                address,
                hashed_address,
                account,
            },
        );
    }

    pub fn entries(&self) -> impl Iterator<Item = &WriteSetEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
