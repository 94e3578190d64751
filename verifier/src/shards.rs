//! The storage-shard protocol: routing write-set operations to the 16
//! storage partitions and shipping each one its per-block update.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::state::WriteSet;

/// The fixed number of storage partitions.
pub const SHARD_COUNT: usize = 16;

/// Shard routing: the top nibble of the hashed address.
pub fn shard_index(hashed_address: &ethereum_types::H256) -> usize {
    (hashed_address.as_bytes()[0] >> 4) as usize
}

/// One account mutation, shipped in the shard's own addressing terms:
/// the unhashed 20-byte address, the balance as 32 big-endian bytes, and
/// the nonce as a plain integer.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct UpdateOp {
    pub account: Vec<u8>,
    pub balance: Vec<u8>,
    pub nonce: u64,
}

/// The per-block message every shard receives: the full block, the
/// serialized root node (so the shard can reanchor), and the operations
/// routed to it, possibly none.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMsg {
    pub rlp_block: Vec<u8>,
    pub merkle_tree_nodes: Vec<u8>,
    pub operations: Vec<UpdateOp>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UpdateReply {
    pub ok: bool,
}

/// Builds the 16 update messages for a proposed block. Routing is total
/// and disjoint: every write-set entry lands in exactly one message.
pub fn build_update_msgs(
    rlp_block: &[u8],
    root_node: &[u8],
    write_set: &WriteSet,
) -> Vec<UpdateMsg> {
    let mut msgs: Vec<UpdateMsg> = (0..SHARD_COUNT)
        .map(|_| UpdateMsg {
            rlp_block: rlp_block.to_vec(),
            merkle_tree_nodes: root_node.to_vec(),
            operations: Vec::new(),
        })
        .collect();

    for entry in write_set.entries() {
        let mut balance = vec![0u8; 32];
        entry.account.balance.to_big_endian(&mut balance);
        msgs[shard_index(&entry.hashed_address)]
            .operations
            .push(UpdateOp {
                account: entry.address.as_bytes().to_vec(),
                balance,
                nonce: entry.account.nonce.low_u64(),
            });
    }
    msgs
}

/// A client for one storage shard.
#[async_trait]
pub trait ShardClient: Send + Sync {
    /// Ships one block's update and waits for the shard's reply.
    async fn update(&self, msg: UpdateMsg) -> Result<()>;
}

/// HTTP client for a shard, with an ordered host list; hosts are tried
/// in order until one accepts.
#[derive(Debug)]
pub struct HttpShardClient {
    shard: usize,
    hosts: Vec<String>,
    http: reqwest::Client,
}

impl HttpShardClient {
    pub fn new(shard: usize, hosts: Vec<String>) -> Self {
        Self {
            shard,
            hosts,
            http: reqwest::Client::new(),
        }
    }

    /// Startup probe: succeeds once any host of this shard accepts a TCP
    /// connection within `timeout`.
    pub async fn probe(&self, timeout: Duration) -> Result<()> {
        for host in &self.hosts {
            match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(host)).await {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(e)) => debug!(shard = self.shard, %host, error = %e, "probe refused"),
                Err(_) => debug!(shard = self.shard, %host, "probe timed out"),
            }
        }
        Err(anyhow!(
            "no host of shard {} reachable within {:?}",
            self.shard,
            timeout
        ))
    }
}

#[async_trait]
impl ShardClient for HttpShardClient {
    async fn update(&self, msg: UpdateMsg) -> Result<()> {
        let mut last_error = None;
        for host in &self.hosts {
            let url = format!("http://{host}/update");
            match self.http.post(&url).json(&msg).send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    last_error = Some(anyhow!("shard {} replied {}", self.shard, response.status()))
                }
                Err(e) => last_error = Some(anyhow::Error::new(e)),
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("shard {} has no hosts", self.shard)))
            .with_context(|| format!("update for shard {} failed", self.shard))
    }
}

#[cfg(test)]
mod tests {
    use ethereum_types::{Address, H256, U256};
    use keccak_hash::keccak;

    use super::*;
    use crate::account::Account;

    #[test]
    fn shard_index_is_the_top_nibble() {
        let mut hashed = H256::zero();
        hashed.as_bytes_mut()[0] = 0x3c;
        assert_eq!(shard_index(&hashed), 3);
        hashed.as_bytes_mut()[0] = 0xc3;
        assert_eq!(shard_index(&hashed), 12);
    }

    #[test]
    fn routing_is_total_and_disjoint() {
        let mut write_set = WriteSet::new();
        for seed in 0u8..32 {
            let address = Address::repeat_byte(seed);
            write_set.insert(address, keccak(address), Account::with_balance(seed.into()));
        }

        let msgs = build_update_msgs(b"block", b"root", &write_set);
        assert_eq!(msgs.len(), SHARD_COUNT);
        let total: usize = msgs.iter().map(|m| m.operations.len()).sum();
        assert_eq!(total, write_set.len());

        for (shard, msg) in msgs.iter().enumerate() {
            // Even an empty shard still gets the block and root bytes.
            assert_eq!(msg.rlp_block, b"block");
            assert_eq!(msg.merkle_tree_nodes, b"root");
            for op in &msg.operations {
                let address = Address::from_slice(&op.account);
                assert_eq!(shard_index(&keccak(address)), shard);
            }
        }
    }

    #[test]
    fn ops_carry_unhashed_address_and_fixed_width_balance() {
        let address = Address::repeat_byte(0x11);
        let mut account = Account::with_balance(U256::from(0xdead_beefu64));
        account.nonce = U256::from(9);
        let mut write_set = WriteSet::new();
        write_set.insert(address, keccak(address), account);

        let msgs = build_update_msgs(&[], &[], &write_set);
        let op = msgs
            .iter()
            .flat_map(|m| &m.operations)
            .next()
            .expect("one op somewhere");
        assert_eq!(op.account, address.as_bytes());
        assert_eq!(op.balance.len(), 32);
        assert_eq!(&op.balance[28..], &0xdead_beefu32.to_be_bytes());
        assert_eq!(op.nonce, 9);
    }
}
