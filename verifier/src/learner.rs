//! The network learner: peer-advertised trie nodes and blocks, plus the
//! outbound side that re-advertises what we use and produce.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use cached_mpt::{NodeBag, TrieOpResult};
use ethereum_types::H256;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tracing::{debug, info, trace};

use crate::block::Block;
use crate::wire::{BlockAdvertisement, MerkleNodeAdvertisement};

/// A peer verifier we advertise to.
#[derive(Clone, Debug)]
pub struct Neighbor {
    pub host: String,
    pub port: u16,
}

impl Neighbor {
    fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }
}

/// Learned state from the peer network.
///
/// Nodes advertised by peers accumulate in `current`; when a block is
/// finalized, `current` rotates into `previous` (the fallback bag during
/// fork re-execution) and starts empty. Learned blocks are candidates the
/// generator races against, filtered to heights we have not committed.
///
/// The generator holds the learner, never the other way around: block
/// arrival is published through a [`Notify`] the generator's race waits
/// on.
#[derive(Debug)]
pub struct Learner {
    current: Mutex<NodeBag>,
    previous: Mutex<NodeBag>,
    blocks: Mutex<HashMap<u64, Block>>,
    committed_height: AtomicU64,
    block_notify: Notify,
    neighbors: RwLock<Vec<Neighbor>>,
    http: reqwest::Client,
}

impl Learner {
    pub fn new(committed_height: u64) -> Self {
        Self {
            current: Mutex::new(NodeBag::new()),
            previous: Mutex::new(NodeBag::new()),
            blocks: Mutex::new(HashMap::new()),
            committed_height: AtomicU64::new(committed_height),
            block_notify: Notify::new(),
            neighbors: RwLock::new(Vec::new()),
            http: reqwest::Client::new(),
        }
    }

    /// Files a peer-advertised node under the digest of its encoding.
    pub fn learn_node(&self, bytes: &[u8]) -> TrieOpResult<H256> {
        self.current.lock().insert_encoded(bytes)
    }

    /// Files a peer-advertised block, ignoring heights already committed,
    /// and wakes the generator's race.
    pub fn learn_block(&self, block: Block) {
        let number = block.header.number;
        if number <= self.committed_height.load(Ordering::Acquire) {
            trace!(number, "ignoring stale peer block");
            return;
        }
        debug!(number, hash = %block.hash(), "learned peer block");
        self.blocks.lock().insert(number, block);
        self.block_notify.notify_waiters();
    }

    /// Removes and returns the learned candidate for `height`, if any.
    pub fn take_block(&self, height: u64) -> Option<Block> {
        self.blocks.lock().remove(&height)
    }

    /// Resolves once a peer block for `height` is available. This is the
    /// peer-arrival side of the generator's race; the block is consumed.
    pub async fn wait_for_block(&self, height: u64) -> Block {
        loop {
            let notified = self.block_notify.notified();
            tokio::pin!(notified);
            // Register before re-checking the table, or an arrival in
            // between would be missed.
            notified.as_mut().enable();
            if let Some(block) = self.take_block(height) {
                return block;
            }
            notified.await;
        }
    }

    /// Advances the committed height after a proposal or adoption and
    /// drops candidates the chain has moved past.
    pub fn set_committed_height(&self, height: u64) {
        self.committed_height.store(height, Ordering::Release);
        self.blocks.lock().retain(|number, _| *number > height);
    }

    /// Rotates the learned-node tables at block finalization:
    /// `previous <- current`, `current <- empty`.
    pub fn rotate(&self) {
        let current = std::mem::take(&mut *self.current.lock());
        *self.previous.lock() = current;
    }

    pub fn current_snapshot(&self) -> NodeBag {
        self.current.lock().clone()
    }

    pub fn previous_snapshot(&self) -> NodeBag {
        self.previous.lock().clone()
    }

    pub fn add_neighbor(&self, host: String, port: u16) {
        info!(%host, port, "registered neighbor");
        self.neighbors.write().push(Neighbor { host, port });
    }

    /// Fire-and-forget: posts the node encodings used by a produced block
    /// to every neighbor.
    pub fn advertise_nodes_to_neighbors(&self, nodes: Vec<Vec<u8>>) {
        if nodes.is_empty() {
            return;
        }
        let msg = MerkleNodeAdvertisement { node_list: nodes };
        for neighbor in self.neighbors.read().iter() {
            let url = neighbor.url("/advertise/node");
            let http = self.http.clone();
            let msg = msg.clone();
            tokio::spawn(async move {
                if let Err(e) = http.post(&url).json(&msg).send().await {
                    debug!(%url, error = %e, "node advertisement failed");
                }
            });
        }
    }

    /// Fire-and-forget: posts a block we produced or adopted to every
    /// neighbor.
    pub fn advertise_block_to_neighbors(&self, block_rlp: Vec<u8>) {
        let msg = BlockAdvertisement { block: block_rlp };
        for neighbor in self.neighbors.read().iter() {
            let url = neighbor.url("/advertise/block");
            let http = self.http.clone();
            let msg = msg.clone();
            tokio::spawn(async move {
                if let Err(e) = http.post(&url).json(&msg).send().await {
                    debug!(%url, error = %e, "block advertisement failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use ethereum_types::{Address, Bloom, H64, U256};

    use super::*;
    use crate::block::Header;

    fn block(number: u64) -> Block {
        Block::new(
            Header {
                parent_hash: H256::zero(),
                uncles_hash: H256::zero(),
                beneficiary: Address::zero(),
                state_root: H256::zero(),
                transactions_root: H256::zero(),
                receipts_root: H256::zero(),
                logs_bloom: Bloom::zero(),
                difficulty: U256::zero(),
                number,
                gas_limit: U256::zero(),
                gas_used: U256::zero(),
                timestamp: 0,
                extra_data: vec![],
                mix_hash: H256::zero(),
                nonce: H64::zero(),
            },
            vec![],
        )
    }

    #[test]
    fn stale_blocks_are_filtered() {
        let learner = Learner::new(5);
        learner.learn_block(block(5));
        learner.learn_block(block(3));
        assert!(learner.take_block(5).is_none());
        assert!(learner.take_block(3).is_none());

        learner.learn_block(block(6));
        assert!(learner.take_block(6).is_some());
        // Consumed.
        assert!(learner.take_block(6).is_none());
    }

    #[test]
    fn committed_height_drops_passed_candidates() {
        let learner = Learner::new(0);
        learner.learn_block(block(1));
        learner.learn_block(block(2));
        learner.set_committed_height(1);
        assert!(learner.take_block(1).is_none());
        assert!(learner.take_block(2).is_some());
    }

    #[test]
    fn rotation_moves_current_to_previous() {
        let learner = Learner::new(0);
        // A leaf node with an empty (even) path and a large value.
        let mut stream = rlp::RlpStream::new_list(2);
        stream.append(&vec![0x20u8]);
        stream.append(&vec![0xaa; 40]);
        learner.learn_node(&stream.out()).unwrap();
        assert_eq!(learner.current_snapshot().len(), 1);
        assert_eq!(learner.previous_snapshot().len(), 0);

        learner.rotate();
        assert_eq!(learner.current_snapshot().len(), 0);
        assert_eq!(learner.previous_snapshot().len(), 1);
    }

    #[tokio::test]
    async fn wait_for_block_resolves_on_arrival() {
        let learner = Arc::new(Learner::new(0));
        let waiter = {
            let learner = learner.clone();
            tokio::spawn(async move { learner.wait_for_block(7).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        learner.learn_block(block(7));

        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.header.number, 7);
    }
}
