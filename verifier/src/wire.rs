//! Wire messages of the verifier RPC surface and the codes it replies
//! with.

use ethereum_types::Address;
use serde::{Deserialize, Serialize};

/// The verifier-to-verifier protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// The outcome a client sees for a submitted transaction.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Success,
    Invalid,
}

/// Exchanged both ways during a verifier handshake.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeMessage {
    pub protocol_version: u32,
    pub version: String,
    pub beneficiary: Address,
}

/// A signed transaction plus the witness nodes proving its accounts.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    /// RLP encoding of the signed transaction.
    pub transaction: Vec<u8>,
    /// RLP encodings of the MPT nodes on the sender/recipient paths.
    pub account_witnesses: Vec<Vec<u8>>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TransactionReply {
    pub code: ErrorCode,
}

/// A batch of trie nodes a peer advertises, keyed implicitly by the
/// Keccak digest of each encoding.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleNodeAdvertisement {
    pub node_list: Vec<Vec<u8>>,
}

/// A block a peer has produced or adopted.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BlockAdvertisement {
    /// RLP encoding of the full block.
    pub block: Vec<u8>,
}

/// A verifier volunteering itself (or a third party) as a neighbor.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NeighborAdvertisement {
    pub host: String,
    pub port: u16,
}
