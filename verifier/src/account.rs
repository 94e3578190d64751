//! The account model: the values stored in the state trie.

use ethereum_types::{H256, U256};
use hex_literal::hex;
use rlp_derive::{RlpDecodable, RlpEncodable};

/// `keccak("")`: the code hash of an account with no code.
pub const EMPTY_STRING_HASH: H256 = H256(hex!(
    "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
));

/// `keccak(rlp(""))`: the root of an empty trie, used as the storage root
/// of every account this verifier manages (contract storage is not
/// supported).
pub const EMPTY_BUFFER_HASH: H256 = H256(hex!(
    "56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"
));

/// An account, RLP-encoded as the fixed 4-tuple
/// `(nonce, balance, codeHash, storageRoot)`, the field order every
/// witness producer and storage shard on this network encodes.
///
/// Accounts are value objects: execution works on copies (the write-set
/// holds drafts) and the canonical trie is only touched by the
/// copy-on-write commit at end of block.
#[derive(Clone, Copy, Debug, Eq, PartialEq, RlpDecodable, RlpEncodable)]
pub struct Account {
    pub nonce: U256,
    pub balance: U256,
    pub code_hash: H256,
    pub storage_root: H256,
}

impl Account {
    /// A fresh account with the given balance, no code and no storage.
    pub fn with_balance(balance: U256) -> Self {
        Self {
            nonce: U256::zero(),
            balance,
            code_hash: EMPTY_STRING_HASH,
            storage_root: EMPTY_BUFFER_HASH,
        }
    }

    /// The zero-balance empty account.
    pub fn empty() -> Self {
        Self::with_balance(U256::zero())
    }

    pub fn has_code(&self) -> bool {
        self.code_hash != EMPTY_STRING_HASH
    }

    pub fn rlp_bytes(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, rlp::DecoderError> {
        rlp::decode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use keccak_hash::keccak;

    use super::*;

    #[test]
    fn sentinel_hashes_match_their_definitions() {
        assert_eq!(keccak([]), EMPTY_STRING_HASH);
        assert_eq!(keccak(rlp::NULL_RLP), EMPTY_BUFFER_HASH);
    }

    #[test]
    fn encodes_as_the_fixed_four_tuple() {
        let account = Account {
            nonce: U256::from(7),
            balance: U256::from(1000),
            code_hash: keccak(b"\x60\x00"),
            storage_root: EMPTY_BUFFER_HASH,
        };
        let encoded = account.rlp_bytes();

        // Code hash third, storage root fourth.
        let rlp = rlp::Rlp::new(&encoded);
        assert_eq!(rlp.item_count().unwrap(), 4);
        assert_eq!(rlp.val_at::<U256>(0).unwrap(), U256::from(7));
        assert_eq!(rlp.val_at::<U256>(1).unwrap(), U256::from(1000));
        assert_eq!(rlp.val_at::<H256>(2).unwrap(), keccak(b"\x60\x00"));
        assert_eq!(rlp.val_at::<H256>(3).unwrap(), EMPTY_BUFFER_HASH);

        assert_eq!(Account::decode(&encoded).unwrap(), account);
    }

    #[test]
    fn has_code_tracks_the_sentinel() {
        let mut account = Account::with_balance(U256::one());
        assert!(!account.has_code());
        account.code_hash = keccak(b"\x60\x00");
        assert!(account.has_code());
    }
}
