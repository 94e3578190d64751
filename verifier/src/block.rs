//! Blocks and headers, RLP-encoded per the canonical Ethereum layout.

use ethereum_types::{Address, Bloom, H256, H64, U256};
use keccak_hash::keccak;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

/// The `extraData` this verifier stamps into headers it proposes.
pub const PROPOSER_EXTRA_DATA: &[u8] = b"rainblock";

/// A block header. Field order is the canonical Ethereum header order and
/// must not be rearranged: the header hash is `keccak` of this encoding.
///
/// `Encodable`/`Decodable` are implemented by hand rather than derived:
/// `rlp_derive` encodes every `Vec<T>` field as an RLP list, which would
/// encode `extra_data` as a list of byte items instead of the canonical
/// RLP byte string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Header {
    pub parent_hash: H256,
    pub uncles_hash: H256,
    pub beneficiary: Address,
    pub state_root: H256,
    pub transactions_root: H256,
    pub receipts_root: H256,
    pub logs_bloom: Bloom,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: U256,
    pub gas_used: U256,
    /// Wall-clock milliseconds at execution time.
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    pub mix_hash: H256,
    pub nonce: H64,
}

impl Header {
    /// `keccak(rlp(header))`, the block hash.
    pub fn hash(&self) -> H256 {
        keccak(rlp::encode(self))
    }
}

impl Encodable for Header {
    fn rlp_append(&self, stream: &mut RlpStream) {
        stream.begin_list(15);
        stream.append(&self.parent_hash);
        stream.append(&self.uncles_hash);
        stream.append(&self.beneficiary);
        stream.append(&self.state_root);
        stream.append(&self.transactions_root);
        stream.append(&self.receipts_root);
        stream.append(&self.logs_bloom);
        stream.append(&self.difficulty);
        stream.append(&self.number);
        stream.append(&self.gas_limit);
        stream.append(&self.gas_used);
        stream.append(&self.timestamp);
        stream.append(&self.extra_data);
        stream.append(&self.mix_hash);
        stream.append(&self.nonce);
    }
}

impl Decodable for Header {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Header {
            parent_hash: rlp.val_at(0)?,
            uncles_hash: rlp.val_at(1)?,
            beneficiary: rlp.val_at(2)?,
            state_root: rlp.val_at(3)?,
            transactions_root: rlp.val_at(4)?,
            receipts_root: rlp.val_at(5)?,
            logs_bloom: rlp.val_at(6)?,
            difficulty: rlp.val_at(7)?,
            number: rlp.val_at(8)?,
            gas_limit: rlp.val_at(9)?,
            gas_used: rlp.val_at(10)?,
            timestamp: rlp.val_at(11)?,
            extra_data: rlp.val_at(12)?,
            mix_hash: rlp.val_at(13)?,
            nonce: rlp.val_at(14)?,
        })
    }
}

/// `RLP([header, transactions, uncles])` with uncles always empty.
///
/// Transactions are kept as their raw RLP items so the encoding
/// round-trips byte-for-byte regardless of transaction shape.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Vec<u8>>,
}

impl Block {
    pub fn new(header: Header, transactions: Vec<Vec<u8>>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut stream = RlpStream::new_list(3);
        stream.append(&self.header);
        stream.begin_list(self.transactions.len());
        for tx in &self.transactions {
            stream.append_raw(tx, 1);
        }
        stream.begin_list(0);
        stream.out().to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecoderError> {
        let rlp = Rlp::new(bytes);
        if rlp.item_count()? != 3 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let header = rlp.val_at(0)?;
        let transactions = rlp
            .at(1)?
            .iter()
            .map(|item| item.as_raw().to_vec())
            .collect();
        Ok(Self {
            header,
            transactions,
        })
    }
}
