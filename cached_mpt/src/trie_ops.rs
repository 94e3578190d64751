//! Reads and copy-on-write updates over [`CachedMpt`].

use std::sync::Arc;

use ethereum_types::H256;
use thiserror::Error;

use crate::bag::{self, NodeBag, UsedNodes};
use crate::nibbles::Nibbles;
use crate::partial_trie::{CachedMpt, Child, Node};
use crate::trie_hashing::Encoded;

/// Result alias for trie operations.
pub type TrieOpResult<T> = Result<T, TrieOpError>;

/// An error during a trie operation.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum TrieOpError {
    /// Traversal reached a pruned stub and no supplied bag carries the
    /// node. The transaction's witness (or the learned-node pool) is
    /// insufficient.
    #[error("traversal reached a pruned node with no matching proof (hash: {0:x})")]
    StructuralMiss(H256),

    /// Malformed RLP on the wire.
    #[error("malformed node encoding: {0}")]
    Decode(#[from] rlp::DecoderError),

    /// Structurally invalid node contents.
    #[error("invalid node structure: {0}")]
    InvalidNode(&'static str),
}

impl CachedMpt {
    /// Reads the value at `key`.
    ///
    /// Every independently-encoded node visited is recorded into `used`.
    /// A traversal that reaches a [`Node::Hash`] stub consults `bags` in
    /// order and continues through the first hit; a stub with no matching
    /// bag entry is a [`TrieOpError::StructuralMiss`]. `Ok(None)` means the
    /// key is provably absent.
    pub fn get_with_bags(
        &self,
        key: impl Into<Nibbles>,
        used: &mut UsedNodes,
        bags: &[&NodeBag],
    ) -> TrieOpResult<Option<Vec<u8>>> {
        let mut key = key.into();
        get_rec(self, &mut key, used, bags)
    }

    /// Applies `puts` copy-on-write, returning the new trie.
    ///
    /// `self` is untouched; the returned trie shares every subtree the
    /// write paths did not cross (the shared children are the *same*
    /// allocations, not copies). Stubs along a write path resolve through
    /// `bags` exactly as in [`Self::get_with_bags`], and traversed nodes
    /// are recorded into `used`.
    pub fn batch_cow(
        &self,
        puts: impl IntoIterator<Item = (Nibbles, Vec<u8>)>,
        used: &mut UsedNodes,
        bags: &[&NodeBag],
    ) -> TrieOpResult<CachedMpt> {
        let mut root: Child = Arc::new(self.clone());
        for (key, value) in puts {
            root = cow_insert(&root, key, value, used, bags)?;
        }
        Ok((*root).clone())
    }

    /// Returns a copy of the trie with every node more than `depth` levels
    /// below the root replaced by its [`Node::Hash`] stub.
    ///
    /// Nodes embedded in their parents (encodings under 32 bytes) cannot
    /// be referenced by digest and are kept. The root hash is unaffected.
    pub fn prune(&self, depth: usize) -> CachedMpt {
        (*prune_rec(&Arc::new(self.clone()), depth)).clone()
    }
}

fn get_rec(
    trie: &CachedMpt,
    key: &mut Nibbles,
    used: &mut UsedNodes,
    bags: &[&NodeBag],
) -> TrieOpResult<Option<Vec<u8>>> {
    used.record(trie);
    match &trie.node {
        Node::Empty => Ok(None),
        Node::Hash(h) => match bag::lookup(bags, h) {
            Some(sub) => get_rec(&sub, key, used, bags),
            None => Err(TrieOpError::StructuralMiss(*h)),
        },
        Node::Branch { children, value } => {
            if key.is_empty() {
                return Ok((!value.is_empty()).then(|| value.clone()));
            }
            let nib = key.pop_front();
            get_rec(&children[nib as usize], key, used, bags)
        }
        Node::Extension { nibbles, child } => match key.strip_prefix(nibbles) {
            true => get_rec(child, key, used, bags),
            false => Ok(None),
        },
        Node::Leaf { nibbles, value } => Ok((*key == *nibbles).then(|| value.clone())),
    }
}

fn cow_insert(
    trie: &Child,
    mut key: Nibbles,
    value: Vec<u8>,
    used: &mut UsedNodes,
    bags: &[&NodeBag],
) -> TrieOpResult<Child> {
    used.record(trie);
    let node = match &trie.node {
        Node::Empty => Node::Leaf {
            nibbles: key,
            value,
        },
        Node::Hash(h) => {
            // Materialize the stub from a bag and insert into the result;
            // the new generation carries the resolved subtree.
            let sub = bag::lookup(bags, h).ok_or(TrieOpError::StructuralMiss(*h))?;
            return cow_insert(&sub, key, value, used, bags);
        }
        Node::Branch {
            children,
            value: branch_value,
        } => {
            if key.is_empty() {
                Node::Branch {
                    children: children.clone(),
                    value,
                }
            } else {
                let nib = key.pop_front() as usize;
                let updated = cow_insert(&children[nib], key, value, used, bags)?;
                let mut children = children.clone();
                children[nib] = updated;
                Node::Branch {
                    children,
                    value: branch_value.clone(),
                }
            }
        }
        Node::Leaf {
            nibbles,
            value: old_value,
        } => {
            if *nibbles == key {
                Node::Leaf {
                    nibbles: key,
                    value,
                }
            } else {
                split_leaf(nibbles, old_value.clone(), &key, value)
            }
        }
        Node::Extension { nibbles, child } => {
            if key.strip_prefix(nibbles) {
                let updated = cow_insert(child, key, value, used, bags)?;
                Node::Extension {
                    nibbles: nibbles.clone(),
                    child: updated,
                }
            } else {
                split_extension(nibbles, child, &key, value)
            }
        }
    };
    Ok(Arc::new(CachedMpt::new(node)))
}

/// Splits a leaf whose path diverges from the inserted key into a branch,
/// prefixed by an extension over any common path.
fn split_leaf(existing: &Nibbles, existing_value: Vec<u8>, key: &Nibbles, value: Vec<u8>) -> Node {
    let cp = key.common_prefix_len(existing);
    let ex_rest = existing.suffix(cp);
    let new_rest = key.suffix(cp);

    let mut children: [Child; 16] = std::array::from_fn(|_| CachedMpt::empty_child());
    let mut branch_value = Vec::new();

    // Variable-length keys (e.g. the transactions trie) allow one side to
    // terminate exactly at the branch.
    if ex_rest.is_empty() {
        branch_value = existing_value;
    } else {
        children[ex_rest.at(0) as usize] = leaf(ex_rest.suffix(1), existing_value);
    }
    if new_rest.is_empty() {
        branch_value = value;
    } else {
        children[new_rest.at(0) as usize] = leaf(new_rest.suffix(1), value);
    }

    wrap_prefix(
        key.prefix(cp),
        Node::Branch {
            children,
            value: branch_value,
        },
    )
}

/// Splits an extension at the point of divergence with the inserted key.
fn split_extension(ext: &Nibbles, child: &Child, key: &Nibbles, value: Vec<u8>) -> Node {
    let cp = key.common_prefix_len(ext);
    let ex_rest = ext.suffix(cp);
    let new_rest = key.suffix(cp);

    let mut children: [Child; 16] = std::array::from_fn(|_| CachedMpt::empty_child());
    let mut branch_value = Vec::new();

    let ex_tail = ex_rest.suffix(1);
    children[ex_rest.at(0) as usize] = if ex_tail.is_empty() {
        child.clone()
    } else {
        Arc::new(CachedMpt::new(Node::Extension {
            nibbles: ex_tail,
            child: child.clone(),
        }))
    };
    if new_rest.is_empty() {
        branch_value = value;
    } else {
        children[new_rest.at(0) as usize] = leaf(new_rest.suffix(1), value);
    }

    wrap_prefix(
        key.prefix(cp),
        Node::Branch {
            children,
            value: branch_value,
        },
    )
}

fn leaf(nibbles: Nibbles, value: Vec<u8>) -> Child {
    Arc::new(CachedMpt::new(Node::Leaf { nibbles, value }))
}

fn wrap_prefix(prefix: Nibbles, node: Node) -> Node {
    if prefix.is_empty() {
        node
    } else {
        Node::Extension {
            nibbles: prefix,
            child: Arc::new(CachedMpt::new(node)),
        }
    }
}

fn prune_rec(trie: &Child, depth: usize) -> Child {
    match &trie.node {
        Node::Empty | Node::Hash(_) => trie.clone(),
        _ if depth == 0 => match trie.encoded() {
            Encoded::Hashed { hash, .. } => Arc::new(CachedMpt::with_encoded(
                Node::Hash(hash),
                Encoded::HashOnly(hash),
            )),
            // Embedded in the parent; nothing to reclaim.
            _ => trie.clone(),
        },
        Node::Leaf { .. } => trie.clone(),
        Node::Branch { children, value } => {
            let children = std::array::from_fn(|i| prune_rec(&children[i], depth - 1));
            // The encoding is unchanged: children keep their digests.
            Arc::new(CachedMpt {
                node: Node::Branch {
                    children,
                    value: value.clone(),
                },
                encoded: trie.encoded.clone(),
            })
        }
        Node::Extension { nibbles, child } => Arc::new(CachedMpt {
            node: Node::Extension {
                nibbles: nibbles.clone(),
                child: prune_rec(child, depth - 1),
            },
            encoded: trie.encoded.clone(),
        }),
    }
}
