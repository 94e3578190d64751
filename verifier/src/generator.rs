//! The block generator: the per-height state machine that gathers queued
//! transactions, executes them, and races a simulated proof-of-stake
//! timer against blocks learned from peers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use cached_mpt::{CachedMpt, Nibbles, TrieOpResult, UsedNodes};
use ethereum_types::{Address, Bloom, H256, H64, U256};
use futures::future::join_all;
use rand::Rng;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::block::{Block, Header, PROPOSER_EXTRA_DATA};
use crate::checkpoint::CheckpointLog;
use crate::config::Config;
use crate::exec::{
    order_and_execute, ExecError, ExecutionFlags, ExecutionMode, ExecutionResult,
};
use crate::learner::Learner;
use crate::queue::TxQueue;
use crate::shards::{build_update_msgs, ShardClient, SHARD_COUNT};
use crate::state::StateTrie;
use crate::txn::{TransactionData, TxnError};

/// Tunables of the generator, distilled from [`Config`] so tests can
/// construct them directly.
#[derive(Clone, Debug)]
pub struct GeneratorOptions {
    pub beneficiary: Address,
    /// Bounds of the simulated proof-of-stake delay, ms.
    pub pow_min: u64,
    pub pow_max: u64,
    pub max_tx_per_block: Option<usize>,
    pub prune_depth: usize,
    pub flags: ExecutionFlags,
    pub checkpoint_path: PathBuf,
}

impl GeneratorOptions {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            beneficiary: config.beneficiary()?,
            pow_min: config.pow_min,
            pow_max: config.pow_max,
            max_tx_per_block: config.max_tx_per_block,
            prune_depth: config.prune_depth,
            flags: ExecutionFlags {
                share_bag: config.share_bag,
                generate_from_accounts: config.generate_from_accounts,
                disable_nonce_check: config.disable_nonce_check,
            },
            checkpoint_path: PathBuf::from("checkpoint.txt"),
        })
    }
}

/// How a height concluded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HeightOutcome {
    /// Our timer won; the block was committed to the shards.
    Proposed { number: u64, hash: H256 },
    /// A peer's block was adopted.
    Adopted { number: u64, hash: H256 },
}

/// Why a peer block was rejected instead of adopted.
#[derive(Debug, Error)]
pub enum AdoptError {
    #[error("undecodable peer transaction: {0}")]
    Txn(#[from] TxnError),

    #[error("peer block re-execution failed: {0}")]
    Exec(#[from] ExecError),

    #[error("state root mismatch: computed {computed:x}, peer header declares {declared:x}")]
    RootMismatch { computed: H256, declared: H256 },
}

pub struct BlockGenerator {
    options: GeneratorOptions,
    queue: Arc<TxQueue>,
    learner: Arc<Learner>,
    shards: Vec<Arc<dyn ShardClient>>,
    trie: StateTrie,
    number: u64,
    parent_hash: H256,
    difficulty: U256,
    gas_limit: U256,
    running: Arc<AtomicBool>,
    checkpoint: CheckpointLog,
}

impl std::fmt::Debug for BlockGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockGenerator")
            .field("number", &self.number)
            .field("parent_hash", &self.parent_hash)
            .finish_non_exhaustive()
    }
}

impl BlockGenerator {
    /// Seeds the per-height state from the genesis block: the next height
    /// is `genesis + 1`, difficulty and gas limit carry forward, and the
    /// supplied trie must already hold the genesis state.
    pub fn new(
        options: GeneratorOptions,
        queue: Arc<TxQueue>,
        learner: Arc<Learner>,
        shards: Vec<Arc<dyn ShardClient>>,
        genesis: &Block,
        trie: StateTrie,
    ) -> Result<Self> {
        if shards.len() != SHARD_COUNT {
            bail!("expected {} shard clients, got {}", SHARD_COUNT, shards.len());
        }
        learner.set_committed_height(genesis.header.number);
        Ok(Self {
            checkpoint: CheckpointLog::new(&options.checkpoint_path),
            number: genesis.header.number + 1,
            parent_hash: genesis.hash(),
            difficulty: genesis.header.difficulty,
            gas_limit: genesis.header.gas_limit,
            options,
            queue,
            learner,
            shards,
            trie,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Clearing the returned flag stops the loop after the height in
    /// flight completes; nothing is abandoned mid-proposal.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// The height about to be produced.
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn parent_hash(&self) -> H256 {
        self.parent_hash
    }

    pub fn state_root(&self) -> H256 {
        self.trie.root()
    }

    /// Runs heights until shut down.
    pub async fn run(mut self) -> Result<()> {
        info!(height = self.number, "block generator started");
        while self.running.load(Ordering::Acquire) {
            self.run_height().await?;
        }
        info!(height = self.number, "block generator stopped");
        Ok(())
    }

    /// One full turn of the state machine: shortcut-adopt, gather,
    /// execute, race, propose or adopt, prune.
    pub async fn run_height(&mut self) -> Result<HeightOutcome> {
        // A block for this height may have arrived while we were busy;
        // adopting it outright beats racing for a height a peer already
        // won.
        if let Some(block) = self.learner.take_block(self.number) {
            match self.adopt(block) {
                Ok(outcome) => return Ok(self.finish_height(outcome)),
                Err(e) => warn!(error = %e, "peer block rejected, producing our own"),
            }
        }

        let mut batch = self.queue.take_batch(self.options.max_tx_per_block);
        debug!(height = self.number, batch = batch.len(), "gathered transactions");

        let current = self.learner.current_snapshot();
        let previous = self.learner.previous_snapshot();
        let exec = order_and_execute(
            &self.trie,
            &mut batch,
            ExecutionMode::Propose,
            self.options.flags,
            &current,
            &previous,
        )
        .context("proposal execution failed")?;

        // Witness nodes this block consumed get re-advertised right away
        // so neighbors can verify the block we may be about to send.
        self.learner
            .advertise_nodes_to_neighbors(exec.used_nodes.iter().map(|(_, b)| b.to_vec()).collect());

        let transactions_root = transactions_trie(&batch, &exec.order)
            .context("transactions trie construction failed")?
            .root_hash();
        let header = self.proposal_header(exec.state_root, transactions_root, exec.timestamp);

        // Clients learn their fate as soon as execution has decided it;
        // the race outcome does not change the codes.
        for tx in batch.iter_mut() {
            tx.send_reply();
        }

        let delay = rand::thread_rng().gen_range(self.options.pow_min..=self.options.pow_max);
        let peer_block = tokio::select! {
            _ = sleep(Duration::from_millis(delay)) => None,
            block = self.learner.wait_for_block(self.number) => Some(block),
        };

        let outcome = match peer_block {
            None => self.propose(header, exec, batch).await?,
            Some(block) => match self.adopt(block) {
                Ok(outcome) => {
                    // The losing batch retries at the next height, ahead
                    // of anything submitted meanwhile.
                    self.queue.requeue_front(batch);
                    outcome
                }
                Err(e) => {
                    // The peer block did not stand up; our own execution
                    // is still valid, so propose it rather than redo the
                    // height.
                    warn!(error = %e, "peer block rejected during race, proposing ours");
                    self.propose(header, exec, batch).await?
                }
            },
        };

        Ok(self.finish_height(outcome))
    }

    /// Commits a won race: ships the block to all 16 shards in parallel,
    /// advertises it, installs the new trie, and advances the height.
    async fn propose(
        &mut self,
        header: Header,
        exec: ExecutionResult,
        batch: Vec<TransactionData>,
    ) -> Result<HeightOutcome> {
        let transactions = exec
            .order
            .iter()
            .map(|&i| batch[i].tx_binary.clone())
            .collect();
        let block = Block::new(header, transactions);
        let rlp_block = block.encode();

        let msgs = build_update_msgs(&rlp_block, &exec.new_trie.serialize_root(), &exec.write_set);
        let updates = self.shards.iter().zip(msgs).map(|(shard, msg)| {
            let shard = shard.clone();
            async move { shard.update(msg).await }
        });
        for (shard, result) in join_all(updates).await.into_iter().enumerate() {
            if let Err(e) = result {
                error!(shard, error = %e, "shard update failed");
            }
        }

        self.learner.advertise_block_to_neighbors(rlp_block);
        self.learner.rotate();
        self.trie = exec.new_trie;
        self.parent_hash = block.hash();
        self.number += 1;
        self.learner.set_committed_height(self.number - 1);
        self.checkpoint.record(batch.len(), exec.execution_time);

        info!(
            number = block.header.number,
            hash = %block.hash(),
            txs = block.transactions.len(),
            "block proposed"
        );
        Ok(HeightOutcome::Proposed {
            number: block.header.number,
            hash: block.hash(),
        })
    }

    /// Adopts a peer block: re-executes its transactions in verify mode
    /// against the learned-node pool and requires the resulting root to
    /// match the peer header's.
    fn adopt(&mut self, block: Block) -> Result<HeightOutcome, AdoptError> {
        let mut synthetic = block
            .transactions
            .iter()
            .map(|raw| TransactionData::synthetic(raw.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        let current = self.learner.current_snapshot();
        let previous = self.learner.previous_snapshot();
        let exec = order_and_execute(
            &self.trie,
            &mut synthetic,
            ExecutionMode::Verify,
            self.options.flags,
            &current,
            &previous,
        )?;
        if exec.state_root != block.header.state_root {
            return Err(AdoptError::RootMismatch {
                computed: exec.state_root,
                declared: block.header.state_root,
            });
        }

        self.learner.rotate();
        self.trie = exec.new_trie;
        self.parent_hash = block.header.hash();
        self.number = block.header.number + 1;
        self.difficulty = block.header.difficulty;
        self.gas_limit = block.header.gas_limit;
        self.learner.set_committed_height(block.header.number);
        self.checkpoint
            .record(block.transactions.len(), exec.execution_time);

        info!(
            number = block.header.number,
            hash = %block.header.hash(),
            txs = block.transactions.len(),
            "peer block adopted"
        );
        Ok(HeightOutcome::Adopted {
            number: block.header.number,
            hash: block.header.hash(),
        })
    }

    fn proposal_header(&self, state_root: H256, transactions_root: H256, timestamp: u64) -> Header {
        Header {
            parent_hash: self.parent_hash,
            uncles_hash: H256::zero(),
            beneficiary: self.options.beneficiary,
            state_root,
            transactions_root,
            receipts_root: H256::zero(),
            logs_bloom: Bloom::zero(),
            difficulty: self.difficulty,
            number: self.number,
            gas_limit: self.gas_limit,
            gas_used: U256::zero(),
            timestamp,
            extra_data: PROPOSER_EXTRA_DATA.to_vec(),
            mix_hash: H256::zero(),
            nonce: H64::zero(),
        }
    }

    fn finish_height(&mut self, outcome: HeightOutcome) -> HeightOutcome {
        self.trie = self.trie.prune(self.options.prune_depth);
        outcome
    }
}

/// The per-block transactions trie: ASCII decimal position -> raw
/// transaction bytes, over the successful transactions only.
fn transactions_trie(batch: &[TransactionData], order: &[usize]) -> TrieOpResult<CachedMpt> {
    let puts = order.iter().enumerate().map(|(position, &i)| {
        (
            Nibbles::from_bytes(position.to_string().as_bytes()),
            batch[i].tx_binary.clone(),
        )
    });
    CachedMpt::default().batch_cow(puts, &mut UsedNodes::new(), &[])
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn empty_transactions_trie_has_the_empty_root() {
        let trie = transactions_trie(&[], &[]).unwrap();
        assert_eq!(
            trie.root_hash(),
            H256(hex!(
                "56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421"
            ))
        );
    }
}
