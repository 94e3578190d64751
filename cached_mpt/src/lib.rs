//! Cached partial Merkle-Patricia tries for stateless block verification.
//!
//! A verifier that does not hold the full Ethereum state keeps a *partial*
//! trie between blocks: nodes it has touched recently stay resident, and
//! everything else is replaced by a [`Hash`][partial_trie::Node::Hash]
//! stub carrying the subtree's digest. Transactions arrive with witness
//! proofs ("bags" of out-of-band nodes keyed by digest), and traversals
//! cross stubs by looking the digest up in a caller-supplied chain of
//! [`NodeBag`][bag::NodeBag]s.
//!
//! The trie is updated copy-on-write only: [`batch_cow`]
//! returns a new generation sharing every untouched subtree with its
//! predecessor, so the canonical tree for block *N* survives unmodified
//! while block *N+1* is materialized. [`prune`] bounds the resident cache
//! between blocks by stubbing out everything below a configured depth
//! without changing the root hash.
//!
//! [`batch_cow`]: partial_trie::CachedMpt::batch_cow
//! [`prune`]: partial_trie::CachedMpt::prune

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]

pub mod bag;
pub mod codec;
pub mod nibbles;
pub mod partial_trie;
mod trie_hashing;
pub mod trie_ops;

pub use bag::{NodeBag, UsedNodes};
pub use codec::decode_node;
pub use nibbles::Nibbles;
pub use partial_trie::{CachedMpt, Child, Node};
pub use trie_ops::{TrieOpError, TrieOpResult};
