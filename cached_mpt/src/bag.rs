//! Proof bags: out-of-band nodes keyed by digest.
//!
//! A stateless verifier traverses a partial trie whose missing regions are
//! `Hash` stubs. The nodes needed to cross a stub arrive out of band (as
//! per-transaction witnesses, as a per-block shared bag, or as nodes
//! learned from peers) and are looked up by digest at traversal time.
//! Callers chain several bags in priority order rather than copying nodes
//! between them.

use std::collections::HashMap;

use bytes::Bytes;
use ethereum_types::H256;
use keccak_hash::keccak;

use crate::codec;
use crate::partial_trie::{CachedMpt, Child};
use crate::trie_ops::TrieOpResult;

/// A set of decoded trie nodes keyed by the Keccak digest of their RLP.
#[derive(Clone, Debug, Default)]
pub struct NodeBag {
    nodes: HashMap<H256, Child>,
}

impl NodeBag {
    /// An empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes RLP node bytes and files the node under its digest,
    /// returning the digest.
    pub fn insert_encoded(&mut self, bytes: &[u8]) -> TrieOpResult<H256> {
        let hash = keccak(bytes);
        let node = codec::decode_node(bytes)?;
        self.nodes.insert(hash, Child::new(node));
        Ok(hash)
    }

    /// Files an already-decoded node under the given digest.
    pub fn insert_node(&mut self, hash: H256, node: Child) {
        self.nodes.insert(hash, node);
    }

    /// The node filed under `hash`, if present.
    pub fn get(&self, hash: &H256) -> Option<Child> {
        self.nodes.get(hash).cloned()
    }

    /// Whether a node is filed under `hash`.
    pub fn contains(&self, hash: &H256) -> bool {
        self.nodes.contains_key(hash)
    }

    /// Copies every entry of `other` into `self`.
    pub fn merge(&mut self, other: &NodeBag) {
        for (h, n) in &other.nodes {
            self.nodes.insert(*h, n.clone());
        }
    }

    /// The number of nodes in the bag.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the bag holds no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Drops every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}

/// First hit across a priority-ordered bag chain.
pub(crate) fn lookup(bags: &[&NodeBag], hash: &H256) -> Option<Child> {
    bags.iter().find_map(|b| b.get(hash))
}

/// The nodes touched by a traversal, keyed by digest.
///
/// Only nodes that exist independently (RLP of 32 bytes or more) are
/// recorded; smaller nodes travel embedded in their parents. The recorded
/// bytes are exactly what gets re-advertised to neighbors after a proposed
/// block.
#[derive(Clone, Debug, Default)]
pub struct UsedNodes {
    nodes: HashMap<H256, Bytes>,
}

impl UsedNodes {
    /// An empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the node's encoding if it is independently referenced.
    pub(crate) fn record(&mut self, trie: &CachedMpt) {
        if let crate::trie_hashing::Encoded::Hashed { bytes, hash } = trie.encoded() {
            self.nodes.entry(hash).or_insert(bytes);
        }
    }

    /// Whether a node with this digest was recorded.
    pub fn contains(&self, hash: &H256) -> bool {
        self.nodes.contains_key(hash)
    }

    /// The number of recorded nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The recorded `(digest, bytes)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&H256, &Bytes)> {
        self.nodes.iter()
    }

    /// Consumes the record, yielding the raw encodings.
    pub fn into_bytes(self) -> Vec<Bytes> {
        self.nodes.into_values().collect()
    }
}
