use bytes::Bytes;
use ethereum_types::H256;
use keccak_hash::keccak;
use rlp::RlpStream;

use crate::partial_trie::{CachedMpt, Node};

/// The encoding of a trie node, as referenced by its parent.
///
/// Nodes whose RLP encoding is shorter than 32 bytes are embedded raw in
/// their parent; everything else is referenced by Keccak digest. `HashOnly`
/// is the encoding of a pruned stub: the digest is known, the bytes are not.
#[derive(Clone, Debug)]
pub enum Encoded {
    /// RLP shorter than 32 bytes, embedded in the parent.
    Raw(Bytes),
    /// RLP of 32 bytes or more, referenced by hash; the bytes are resident.
    Hashed {
        /// The node's full RLP encoding.
        bytes: Bytes,
        /// Keccak-256 of `bytes`.
        hash: H256,
    },
    /// A stub standing in for a node whose bytes are not resident.
    HashOnly(H256),
}

impl Encoded {
    /// The digest this encoding contributes to its parent (for `Raw`, the
    /// hash the node *would* have as a root).
    pub fn hash(&self) -> H256 {
        match self {
            Encoded::Raw(b) => keccak(b),
            Encoded::Hashed { hash, .. } => *hash,
            Encoded::HashOnly(h) => *h,
        }
    }

    /// The resident RLP bytes, if any.
    pub fn bytes(&self) -> Option<&Bytes> {
        match self {
            Encoded::Raw(b) => Some(b),
            Encoded::Hashed { bytes, .. } => Some(bytes),
            Encoded::HashOnly(_) => None,
        }
    }
}

/// Wraps raw RLP in the reference form its parent embeds.
pub(crate) fn encoded_from_bytes(bytes: Bytes) -> Encoded {
    if bytes.len() < 32 {
        Encoded::Raw(bytes)
    } else {
        let hash = keccak(&bytes);
        Encoded::Hashed { bytes, hash }
    }
}

/// RLP-encodes a node, recursing through children via their cached
/// encodings.
pub(crate) fn encode_node(node: &Node) -> Encoded {
    match node {
        Node::Empty => Encoded::Raw(Bytes::from_static(&rlp::NULL_RLP)),
        Node::Hash(h) => Encoded::HashOnly(*h),
        Node::Branch { children, value } => {
            let mut stream = RlpStream::new_list(17);
            for c in children.iter() {
                append_child(&mut stream, c);
            }
            match value.is_empty() {
                false => stream.append(value),
                true => stream.append_empty_data(),
            };
            encoded_from_bytes(stream.out().freeze())
        }
        Node::Extension { nibbles, child } => {
            let mut stream = RlpStream::new_list(2);
            stream.append(&nibbles.to_hex_prefix(false));
            append_child(&mut stream, child);
            encoded_from_bytes(stream.out().freeze())
        }
        Node::Leaf { nibbles, value } => {
            let mut stream = RlpStream::new_list(2);
            stream.append(&nibbles.to_hex_prefix(true));
            stream.append(value);
            encoded_from_bytes(stream.out().freeze())
        }
    }
}

fn append_child(stream: &mut RlpStream, child: &CachedMpt) {
    match child.encoded() {
        Encoded::Raw(b) => {
            stream.append_raw(&b, 1);
        }
        other => {
            stream.append(&other.hash().as_bytes());
        }
    }
}
