//! An Ethereum-compatible _verifier_ node.
//!
//! A verifier consumes signed transactions from clients, assembles them
//! into blocks, and commits each block to a set of 16 sharded storage
//! nodes. It does not hold the full state: between blocks it keeps a
//! [cached partial trie](cached_mpt) whose pruned regions are digest
//! stubs, and transactions arrive with witness proofs ("bags" of trie
//! nodes) that let execution cross those stubs.
//!
//! Per block height the [generator] gathers queued transactions, runs
//! the [execution engine](exec) against the cached trie plus the proof
//! bags, then races a simulated proof-of-stake timer against blocks
//! [learned from peers](learner). Winning the race commits the block to
//! the shards and advertises it; losing it re-executes the peer's block
//! from learned nodes and requeues our batch for the next height.
//!
//! Execution is transfers-only: contract code, receipts, and uncles are
//! out of scope, and nonce/signature validity is assumed checked
//! upstream.

#![deny(rustdoc::broken_intra_doc_links)]

pub mod account;
pub mod block;
pub mod checkpoint;
pub mod config;
pub mod exec;
pub mod generator;
pub mod genesis;
pub mod learner;
pub mod queue;
pub mod rpc;
pub mod shards;
pub mod state;
pub mod txn;
pub mod wire;

pub use account::Account;
pub use block::{Block, Header};
pub use config::Config;
pub use exec::{order_and_execute, ExecutionFlags, ExecutionMode, ExecutionResult};
pub use generator::{BlockGenerator, GeneratorOptions, HeightOutcome};
pub use learner::Learner;
pub use queue::TxQueue;
pub use rpc::VerifierService;
pub use shards::{ShardClient, UpdateMsg, UpdateOp};
pub use state::{StateTrie, WriteSet};
pub use txn::{Transaction, TransactionData};
pub use wire::ErrorCode;
