//! The transaction queue between the RPC surface and the block generator.
//!
//! Single-writer discipline: the RPC surface appends, the generator
//! consumes, and a batch that lost the block race goes back to the front
//! so the original FIFO order is preserved at the next height.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::txn::TransactionData;

#[derive(Debug, Default)]
pub struct TxQueue {
    inner: Mutex<VecDeque<TransactionData>>,
}

impl TxQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a freshly submitted transaction.
    pub fn push_back(&self, tx: TransactionData) {
        self.inner.lock().push_back(tx);
    }

    /// Returns transactions from the head of the queue to their original
    /// positions, keeping their relative order.
    pub fn requeue_front(&self, txs: Vec<TransactionData>) {
        let mut queue = self.inner.lock();
        for tx in txs.into_iter().rev() {
            queue.push_front(tx);
        }
    }

    /// Takes up to `limit` transactions from the head (everything when
    /// `limit` is `None`); the remainder stays queued.
    pub fn take_batch(&self, limit: Option<usize>) -> Vec<TransactionData> {
        let mut queue = self.inner.lock();
        let n = limit.unwrap_or(queue.len()).min(queue.len());
        queue.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
