//! The execution engine: ordered transaction application over the cached
//! trie plus per-transaction proof bags, producing a write-set and the
//! next trie generation.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use cached_mpt::{NodeBag, TrieOpError, UsedNodes};
use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use thiserror::Error;
use tracing::{debug, warn};

use crate::account::Account;
use crate::state::{StateTrie, WriteSet};
use crate::txn::TransactionData;
use crate::wire::ErrorCode;

/// Which proof sources an execution pass may consult.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutionMode {
    /// Producing our own block: transactions carry their own witnesses
    /// (optionally unified into one bag per height).
    Propose,
    /// Re-executing a peer block: witnesses were never submitted to us,
    /// so only the learned-node pool is consulted.
    Verify,
}

/// The configuration switches the engine honors.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExecutionFlags {
    /// Unify all per-transaction witnesses into one bag per height, so a
    /// later transaction can lean on an earlier one's proofs.
    pub share_bag: bool,
    /// Synthesize absent sender accounts instead of failing the
    /// transaction (benchmarking aid).
    pub generate_from_accounts: bool,
    /// Skip sender-nonce equality enforcement.
    pub disable_nonce_check: bool,
}

/// Why one transaction was dropped from the block.
#[derive(Debug, Error)]
pub enum TxError {
    #[error("account {0:x} not found in tree or proofs")]
    KeyNotFound(Address),

    #[error("insufficient balance on {0:x}")]
    InsufficientBalance(Address),

    #[error("nonce mismatch: account at {expected}, transaction carries {got}")]
    NonceMismatch { expected: U256, got: U256 },

    #[error("{0} is not yet supported")]
    Unsupported(&'static str),

    #[error(transparent)]
    Trie(#[from] TrieOpError),
}

/// A block-scoped execution failure (the per-transaction kind is handled
/// inside the loop and never surfaces here).
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("state commit failed: {0}")]
    Commit(#[from] TrieOpError),
}

/// What one execution pass produced.
#[derive(Debug)]
pub struct ExecutionResult {
    /// Root of `new_trie`; the header's `stateRoot`.
    pub state_root: H256,
    /// Always zero: code execution is out of scope.
    pub gas_used: U256,
    /// Wall-clock milliseconds when execution finished.
    pub timestamp: u64,
    /// Indices (into the executed batch) of the transactions that
    /// succeeded, in application order; these form the block body.
    pub order: Vec<usize>,
    pub write_set: WriteSet,
    pub new_trie: StateTrie,
    /// Every independently-encoded node the pass touched, for
    /// re-advertisement after a proposal.
    pub used_nodes: UsedNodes,
    pub execution_time: Duration,
}

/// Applies `txs` in queue order against `trie`, then materializes the
/// write-set copy-on-write.
///
/// Transaction-scoped failures are isolated: the transaction's
/// `error_code` becomes `Invalid`, the write-set is untouched by it, and
/// the loop continues. Each transaction either fully applies or not at
/// all.
pub fn order_and_execute(
    trie: &StateTrie,
    txs: &mut [TransactionData],
    mode: ExecutionMode,
    flags: ExecutionFlags,
    learned_current: &NodeBag,
    learned_previous: &NodeBag,
) -> Result<ExecutionResult, ExecError> {
    let started = Instant::now();
    let mut used = UsedNodes::new();
    let mut write_set = WriteSet::new();
    let mut order = Vec::new();

    // In proposal mode every submitted witness lands in one buffer bag:
    // it backs the share-bag option, anchors the copy-on-write commit,
    // and is what gets re-advertised to neighbors.
    let mut buffer_bag = NodeBag::new();
    if mode == ExecutionMode::Propose {
        for tx in txs.iter() {
            buffer_bag.merge(&tx.proofs);
        }
    }

    for i in 0..txs.len() {
        let tx = &txs[i];
        let bags: Vec<&NodeBag> = match mode {
            ExecutionMode::Propose if flags.share_bag => vec![&buffer_bag],
            ExecutionMode::Propose => vec![&tx.proofs],
            ExecutionMode::Verify => vec![learned_current],
        };

        match apply_transaction(trie, &mut write_set, tx, &bags, &mut used, flags) {
            Ok(()) => {
                debug!(tx = %tx.tx_hash, "executed");
                txs[i].error_code = ErrorCode::Success;
                order.push(i);
            }
            Err(e) => {
                warn!(tx = %txs[i].tx_hash, error = %e, "transaction dropped");
                txs[i].error_code = ErrorCode::Invalid;
            }
        }
    }

    let cow_bags: Vec<&NodeBag> = match mode {
        ExecutionMode::Propose => vec![&buffer_bag, learned_previous],
        ExecutionMode::Verify => vec![learned_current, learned_previous],
    };
    let new_trie = trie.commit(&write_set, &mut used, &cow_bags)?;

    Ok(ExecutionResult {
        state_root: new_trie.root(),
        gas_used: U256::zero(),
        timestamp: unix_millis(),
        order,
        write_set,
        new_trie,
        used_nodes: used,
        execution_time: started.elapsed(),
    })
}

/// Applies a single transfer, mutating only the write-set, and only after
/// every check has passed.
fn apply_transaction(
    trie: &StateTrie,
    write_set: &mut WriteSet,
    tx: &TransactionData,
    bags: &[&NodeBag],
    used: &mut UsedNodes,
    flags: ExecutionFlags,
) -> Result<(), TxError> {
    let mut sender = get_account(
        trie,
        write_set,
        tx.from,
        tx.from_hash,
        bags,
        used,
        flags.generate_from_accounts,
        tx.tx.nonce,
    )?
    .ok_or(TxError::KeyNotFound(tx.from))?;

    if !flags.disable_nonce_check && tx.tx.nonce != sender.nonce {
        return Err(TxError::NonceMismatch {
            expected: sender.nonce,
            got: tx.tx.nonce,
        });
    }

    let Some(to) = tx.tx.to else {
        return Err(TxError::Unsupported("contract creation"));
    };
    let to_hash = tx.to_hash.unwrap_or_else(|| keccak(to));
    let value = tx.tx.value;

    if to == tx.from {
        // Self-transfer: the balance is a wash, only the nonce moves.
        if sender.balance < value {
            return Err(TxError::InsufficientBalance(tx.from));
        }
        sender.nonce = sender.nonce + U256::one();
        write_set.insert(tx.from, tx.from_hash, sender);
        return Ok(());
    }

    // An absent recipient is created on the spot with the transferred
    // value; anything else is a plain balance move.
    let mut recipient = get_account(trie, write_set, to, to_hash, bags, used, false, U256::zero())?
        .unwrap_or_else(Account::empty);
    if recipient.has_code() {
        warn!(to = %to, "recipient has code; applying as a plain transfer");
    }

    sender.balance = sender
        .balance
        .checked_sub(value)
        .ok_or(TxError::InsufficientBalance(tx.from))?;
    sender.nonce = sender.nonce + U256::one();
    recipient.balance = recipient.balance.overflowing_add(value).0;

    write_set.insert(tx.from, tx.from_hash, sender);
    write_set.insert(to, to_hash, recipient);
    Ok(())
}

/// Write-set overlay first, then the trie. `KeyNotFound` becomes a
/// synthesized account when `generate` is set (balance `U256::MAX`, the
/// transaction's own nonce); a structural miss is always an error.
#[allow(clippy::too_many_arguments)]
fn get_account(
    trie: &StateTrie,
    write_set: &WriteSet,
    address: Address,
    hashed_address: H256,
    bags: &[&NodeBag],
    used: &mut UsedNodes,
    generate: bool,
    generate_nonce: U256,
) -> Result<Option<Account>, TxError> {
    if let Some(account) = write_set.get(&address) {
        return Ok(Some(*account));
    }
    match trie.get_account(hashed_address, used, bags)? {
        Some(account) => Ok(Some(account)),
        None if generate => {
            let mut account = Account::with_balance(U256::MAX);
            account.nonce = generate_nonce;
            Ok(Some(account))
        }
        None => Ok(None),
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
