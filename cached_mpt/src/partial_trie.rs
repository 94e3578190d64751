//! The core [`CachedMpt`] type and its node representation.

use std::sync::Arc;

use bytes::Bytes;
use ethereum_types::H256;
use parking_lot::RwLock;

use crate::nibbles::Nibbles;
use crate::trie_hashing::{self, Encoded};

/// A child of a branch or extension node. `Arc` so copy-on-write
/// generations share every untouched subtree.
pub type Child = Arc<CachedMpt>;

/// A node of a partial Merkle-Patricia trie.
///
/// This mimics the structure of an Ethereum trie, with an additional
/// `Hash` variant standing in for subtrees whose bytes are not resident:
/// either pruned from the cache between blocks, or never fetched at all by
/// a stateless verifier. Traversals that reach a `Hash` node consult the
/// proof bags supplied by the caller.
#[derive(Clone, Debug, Default)]
pub enum Node {
    /// An empty (sub)trie.
    #[default]
    Empty,
    /// The digest of a subtree whose data is not resident.
    ///
    /// Stubs are only ever created for nodes whose RLP encoding is 32 bytes
    /// or more; smaller nodes are embedded in their parent and cannot be
    /// referenced independently.
    Hash(H256),
    /// Sixteen children and an optional value.
    Branch {
        /// One child per nibble.
        children: [Child; 16],
        /// The payload of a key terminating at this branch.
        value: Vec<u8>,
    },
    /// A shared path segment with a single child.
    Extension {
        /// The path of this extension.
        nibbles: Nibbles,
        /// The child below the shared segment.
        child: Child,
    },
    /// A terminal path segment and its value.
    Leaf {
        /// The remaining path of this leaf.
        nibbles: Nibbles,
        /// The payload of this node.
        value: Vec<u8>,
    },
}

/// A partial Merkle-Patricia trie whose node encodings are cached.
///
/// Every node lazily memoizes its own RLP encoding (and digest), so
/// repeated hashing, root serialization and used-node recording cost one
/// traversal in total. The trie itself is immutable: updates go through
/// [`CachedMpt::batch_cow`], which returns a new generation sharing all
/// untouched subtrees with its predecessor.
#[derive(Clone, Debug, Default)]
pub struct CachedMpt {
    pub(crate) node: Node,
    pub(crate) encoded: Arc<RwLock<Option<Encoded>>>,
}

impl CachedMpt {
    /// Wraps a node with an empty encoding cache.
    pub fn new(node: Node) -> Self {
        Self {
            node,
            encoded: Arc::new(RwLock::new(None)),
        }
    }

    /// Wraps a node whose encoding is already known (e.g. decoded off the
    /// wire), priming the cache.
    pub(crate) fn with_encoded(node: Node, encoded: Encoded) -> Self {
        Self {
            node,
            encoded: Arc::new(RwLock::new(Some(encoded))),
        }
    }

    /// A fresh empty child.
    pub(crate) fn empty_child() -> Child {
        Arc::new(Self::default())
    }

    /// The node's encoding, computed on first use.
    pub(crate) fn encoded(&self) -> Encoded {
        if let Some(e) = self.encoded.read().clone() {
            return e;
        }
        let e = trie_hashing::encode_node(&self.node);
        *self.encoded.write() = Some(e.clone());
        e
    }

    /// The Merkle root of this (sub)trie.
    ///
    /// An empty trie hashes to `keccak(rlp(""))`, matching the canonical
    /// Ethereum empty-trie root.
    pub fn root_hash(&self) -> H256 {
        self.encoded().hash()
    }

    /// The RLP encoding of the root node, with children referenced by
    /// digest (or embedded when under 32 bytes).
    ///
    /// For a root that is itself a pruned stub this degrades to the RLP of
    /// the bare digest, which is all that is known.
    pub fn serialize_root(&self) -> Bytes {
        match self.encoded() {
            Encoded::Raw(b) => b,
            Encoded::Hashed { bytes, .. } => bytes,
            Encoded::HashOnly(h) => rlp::encode(&h.as_bytes()).freeze(),
        }
    }

    /// Whether the root is the empty node.
    pub fn is_empty(&self) -> bool {
        matches!(self.node, Node::Empty)
    }
}

impl From<Node> for CachedMpt {
    fn from(node: Node) -> Self {
        Self::new(node)
    }
}

impl Eq for CachedMpt {}

/// Equality compares structure, not cache state.
impl PartialEq for CachedMpt {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl Eq for Node {}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Empty, Node::Empty) => true,
            (Node::Hash(a), Node::Hash(b)) => a == b,
            (
                Node::Branch {
                    children: c1,
                    value: v1,
                },
                Node::Branch {
                    children: c2,
                    value: v2,
                },
            ) => v1 == v2 && (0..16).all(|i| c1[i] == c2[i]),
            (
                Node::Extension {
                    nibbles: n1,
                    child: c1,
                },
                Node::Extension {
                    nibbles: n2,
                    child: c2,
                },
            ) => n1 == n2 && c1 == c2,
            (
                Node::Leaf {
                    nibbles: n1,
                    value: v1,
                },
                Node::Leaf {
                    nibbles: n2,
                    value: v2,
                },
            ) => n1 == n2 && v1 == v2,
            _ => false,
        }
    }
}
