//! Transactions: wire decoding, sender recovery, and the in-flight record
//! the generator queue carries.

use cached_mpt::{NodeBag, TrieOpError};
use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use rlp::{DecoderError, Rlp, RlpStream};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::wire::ErrorCode;

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("malformed transaction encoding: {0}")]
    Rlp(#[from] DecoderError),

    #[error("sender recovery failed: {0}")]
    Signature(&'static str),

    #[error(transparent)]
    Witness(#[from] TrieOpError),
}

/// A decoded legacy transaction (the 9-tuple RLP layout).
///
/// `to = None` is the contract-creation sentinel (an empty `to` field on
/// the wire).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transaction {
    pub nonce: U256,
    pub gas_price: U256,
    pub gas_limit: U256,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Vec<u8>,
    pub v: u64,
    pub r: U256,
    pub s: U256,
}

impl Transaction {
    pub fn decode(bytes: &[u8]) -> Result<Self, TxnError> {
        let rlp = Rlp::new(bytes);
        if rlp.item_count()? != 9 {
            return Err(DecoderError::RlpIncorrectListLen.into());
        }
        let to_data = rlp.at(3)?.data()?;
        let to = match to_data.len() {
            0 => None,
            20 => Some(Address::from_slice(to_data)),
            _ => return Err(DecoderError::RlpInvalidLength.into()),
        };
        Ok(Self {
            nonce: rlp.val_at(0)?,
            gas_price: rlp.val_at(1)?,
            gas_limit: rlp.val_at(2)?,
            to,
            value: rlp.val_at(4)?,
            data: rlp.val_at(5)?,
            v: rlp.val_at(6)?,
            r: rlp.val_at(7)?,
            s: rlp.val_at(8)?,
        })
    }

    /// The hash the sender signed: the unsigned 6-tuple for pre-EIP-155
    /// transactions, or the 9-tuple with `(chain_id, 0, 0)` appended for
    /// EIP-155 (`v >= 35`).
    pub fn signing_hash(&self) -> H256 {
        let eip155_chain_id = (self.v >= 35).then(|| (self.v - 35) / 2);
        let mut stream = RlpStream::new_list(if eip155_chain_id.is_some() { 9 } else { 6 });
        stream.append(&self.nonce);
        stream.append(&self.gas_price);
        stream.append(&self.gas_limit);
        match self.to {
            Some(address) => stream.append(&address),
            None => stream.append_empty_data(),
        };
        stream.append(&self.value);
        stream.append(&self.data);
        if let Some(chain_id) = eip155_chain_id {
            stream.append(&chain_id);
            stream.append(&0u8);
            stream.append(&0u8);
        }
        keccak(stream.out())
    }

    /// Derives the sender address by secp256k1 public-key recovery.
    ///
    /// Signature *validity* is assumed upstream; recovery is how the
    /// address travels, so a failure here is treated as a decode failure
    /// of the transaction.
    pub fn recover_sender(&self) -> Result<Address, TxnError> {
        use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};

        let recovery = match self.v {
            0 | 1 => self.v as u8,
            27 | 28 => (self.v - 27) as u8,
            v if v >= 35 => ((v - 35) % 2) as u8,
            _ => return Err(TxnError::Signature("unrecognized v value")),
        };
        let recovery =
            RecoveryId::try_from(recovery).map_err(|_| TxnError::Signature("bad recovery id"))?;

        let mut sig_bytes = [0u8; 64];
        self.r.to_big_endian(&mut sig_bytes[..32]);
        self.s.to_big_endian(&mut sig_bytes[32..]);
        let signature = Signature::from_slice(&sig_bytes)
            .map_err(|_| TxnError::Signature("r/s out of range"))?;

        let key =
            VerifyingKey::recover_from_prehash(self.signing_hash().as_bytes(), &signature, recovery)
                .map_err(|_| TxnError::Signature("point recovery failed"))?;

        // address = last 20 bytes of keccak(uncompressed pubkey sans tag)
        let point = key.to_encoded_point(false);
        let digest = keccak(&point.as_bytes()[1..]);
        Ok(Address::from_slice(&digest.as_bytes()[12..]))
    }
}

/// Everything the generator needs to carry a transaction through a
/// height: the decoded fields, the raw bytes for the block body, the
/// witness bag, precomputed key hashes, and the client's reply handle.
#[derive(Debug)]
pub struct TransactionData {
    pub tx_hash: H256,
    pub tx: Transaction,
    pub tx_binary: Vec<u8>,
    /// Witness nodes submitted with the transaction, keyed by digest.
    pub proofs: NodeBag,
    pub from: Address,
    pub from_hash: H256,
    pub to_hash: Option<H256>,
    /// Invoked at most once, when this transaction's height executes.
    pub reply: Option<oneshot::Sender<ErrorCode>>,
    /// Assigned by the execution engine.
    pub error_code: ErrorCode,
}

impl TransactionData {
    /// Builds the record for a client submission. Nothing is enqueued by
    /// this call; any failure leaves global state untouched.
    pub fn from_wire(
        tx_binary: Vec<u8>,
        account_witnesses: &[Vec<u8>],
    ) -> Result<(Self, oneshot::Receiver<ErrorCode>), TxnError> {
        let tx = Transaction::decode(&tx_binary)?;
        let mut proofs = NodeBag::new();
        for witness in account_witnesses {
            proofs.insert_encoded(witness)?;
        }
        let (reply, rx) = oneshot::channel();
        let mut data = Self::assemble(tx, tx_binary, proofs)?;
        data.reply = Some(reply);
        Ok((data, rx))
    }

    /// Builds the record for a transaction taken from a peer block: no
    /// witnesses (verify mode reads the learned-node pool) and no client
    /// to reply to.
    pub fn synthetic(tx_binary: Vec<u8>) -> Result<Self, TxnError> {
        let tx = Transaction::decode(&tx_binary)?;
        Self::assemble(tx, tx_binary, NodeBag::new())
    }

    fn assemble(tx: Transaction, tx_binary: Vec<u8>, proofs: NodeBag) -> Result<Self, TxnError> {
        let from = tx.recover_sender()?;
        Ok(Self {
            tx_hash: keccak(&tx_binary),
            from_hash: keccak(from),
            to_hash: tx.to.map(keccak),
            tx,
            tx_binary,
            proofs,
            from,
            reply: None,
            error_code: ErrorCode::Invalid,
        })
    }

    /// Sends `error_code` to the submitting client. Idempotent: the handle
    /// is consumed on first use, and a client that went away is ignored.
    pub fn send_reply(&mut self) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(self.error_code);
        }
    }
}
