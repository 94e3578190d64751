//! Decoding wire-format (RLP) nodes into trie nodes.

use bytes::Bytes;
use rlp::Rlp;

use crate::nibbles::Nibbles;
use crate::partial_trie::{CachedMpt, Child, Node};
use crate::trie_hashing::encoded_from_bytes;
use crate::trie_ops::{TrieOpError, TrieOpResult};

/// Decodes the RLP encoding of a single trie node.
///
/// A 17-item list is a branch, a 2-item list is a leaf or extension
/// (disambiguated by the hex-prefix flag), and a bare 32-byte string is a
/// hash reference. Children embedded inline (encodings under 32 bytes)
/// are decoded recursively; 32-byte children become `Hash` stubs to be
/// resolved from a bag at traversal time.
///
/// The decoded node's encoding cache is primed with the input bytes, so
/// re-encoding (for hashing or re-advertisement) is free.
pub fn decode_node(bytes: &[u8]) -> TrieOpResult<CachedMpt> {
    let rlp = Rlp::new(bytes);
    let node = decode_rlp(&rlp)?;
    let encoded = match &node {
        // A bare hash reference encodes as the digest itself, not as the
        // 33-byte string it arrived in.
        Node::Hash(h) => crate::trie_hashing::Encoded::HashOnly(*h),
        _ => encoded_from_bytes(Bytes::copy_from_slice(bytes)),
    };
    Ok(CachedMpt::with_encoded(node, encoded))
}

fn decode_rlp(rlp: &Rlp<'_>) -> TrieOpResult<Node> {
    if rlp.is_data() {
        let data = rlp.data()?;
        return match data.len() {
            0 => Ok(Node::Empty),
            32 => Ok(Node::Hash(ethereum_types::H256::from_slice(data))),
            _ => Err(TrieOpError::InvalidNode(
                "data item is neither empty nor a 32-byte digest",
            )),
        };
    }

    match rlp.item_count()? {
        17 => {
            let mut children: [Child; 16] = std::array::from_fn(|_| CachedMpt::empty_child());
            for (i, child) in children.iter_mut().enumerate() {
                *child = decode_child(&rlp.at(i)?)?;
            }
            let value = rlp.at(16)?.data()?.to_vec();
            Ok(Node::Branch { children, value })
        }
        2 => {
            let path = rlp.at(0)?.data()?;
            let (nibbles, is_leaf) = Nibbles::from_hex_prefix(path)
                .ok_or(TrieOpError::InvalidNode("malformed hex-prefix path"))?;
            if is_leaf {
                let value = rlp.at(1)?.data()?.to_vec();
                Ok(Node::Leaf { nibbles, value })
            } else {
                let child = decode_child(&rlp.at(1)?)?;
                Ok(Node::Extension { nibbles, child })
            }
        }
        _ => Err(TrieOpError::InvalidNode(
            "node list is neither a branch (17) nor a leaf/extension (2)",
        )),
    }
}

fn decode_child(item: &Rlp<'_>) -> TrieOpResult<Child> {
    if item.is_list() {
        // Embedded node: its encoding is under 32 bytes by construction.
        let raw = item.as_raw();
        let node = decode_rlp(item)?;
        return Ok(Child::new(CachedMpt::with_encoded(
            node,
            encoded_from_bytes(Bytes::copy_from_slice(raw)),
        )));
    }
    let data = item.data()?;
    match data.len() {
        0 => Ok(CachedMpt::empty_child()),
        32 => Ok(Child::new(CachedMpt::new(Node::Hash(
            ethereum_types::H256::from_slice(data),
        )))),
        _ => Err(TrieOpError::InvalidNode(
            "child item is neither empty, embedded, nor a digest",
        )),
    }
}
