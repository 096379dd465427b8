//! Responses received from the primary.

use std::fmt;

use crate::error::Result;
use crate::transaction::{CommittedTransaction, TxId, BASE_TX_ID};

type TxIter = Box<dyn Iterator<Item = Result<CommittedTransaction>> + Send>;

/// Transactions carried by a response, in commit order.
///
/// Decoding happens lazily in the transport, so every item may fail.
pub struct TransactionStream {
    inner: TxIter,
}

impl TransactionStream {
    /// Wraps a fallible iterator of transactions.
    pub fn new<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = Result<CommittedTransaction>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            inner: Box::new(iter.into_iter()),
        }
    }

    /// Wraps already-decoded transactions.
    pub fn from_transactions(transactions: Vec<CommittedTransaction>) -> Self {
        Self::new(transactions.into_iter().map(Ok))
    }
}

impl Iterator for TransactionStream {
    type Item = Result<CommittedTransaction>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl fmt::Debug for TransactionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionStream").finish_non_exhaustive()
    }
}

/// A response pulled from the primary.
#[derive(Debug)]
pub enum Response {
    /// The follower must have applied everything up to `tx_id` before proceeding.
    Obligation {
        /// Transaction id to reach.
        tx_id: TxId,
    },
    /// Transactions to commit and apply locally.
    Transactions(TransactionStream),
}

impl Response {
    /// Response that carries nothing to do.
    pub fn empty() -> Self {
        Response::Obligation { tx_id: BASE_TX_ID }
    }

    /// Obligation to reach `tx_id`.
    pub fn obligation(tx_id: TxId) -> Self {
        Response::Obligation { tx_id }
    }

    /// Response carrying already-decoded transactions.
    pub fn transactions(transactions: Vec<CommittedTransaction>) -> Self {
        Response::Transactions(TransactionStream::from_transactions(transactions))
    }
}
