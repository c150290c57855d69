//! Error taxonomy and per-block outcomes of the acceptance pipeline

use thiserror::Error;

use crate::chain::ChainLinkError;
use crate::hash::{BlockHash, StateRoot, TxHash};
use crate::types::{Address, TxType};

/// Block is malformed or untimely; discarded and never retried
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("node must upgrade before accepting blocks")]
    MustUpgrade,

    #[error("block time {time} is beyond now {now} plus tolerance {tolerance}")]
    FutureBlock { time: u64, now: u64, tolerance: u64 },

    #[error("block verification failed: {0}")]
    Verification(String),

    #[error("producer {producer} signed two blocks at height {height}: {first} and {second}")]
    Bifurcation {
        producer: Address,
        height: u64,
        first: BlockHash,
        second: BlockHash,
    },
}

/// The chain manager refused to extend the master chain
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtensionError {
    #[error("does not continue master tip: {0}")]
    NotContinuation(#[from] ChainLinkError),

    #[error("round verification failed: {0}")]
    Round(String),
}

/// A transaction-level check failed after the master chain was extended
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxValidationError {
    #[error("transaction {tx} has type {tx_type} unknown to the active protocol")]
    UnsupportedTxType { tx: TxHash, tx_type: TxType },

    #[error("signature check failed")]
    Signature,

    #[error("block gas {used} over ceiling {limit} at contract transaction {tx}")]
    GasExceeded { tx: TxHash, used: u64, limit: u64 },

    #[error("coin data of {tx} rejected: {reason}")]
    CoinData { tx: TxHash, reason: String },

    #[error("contract execution of {tx} failed: {reason}")]
    Contract { tx: TxHash, reason: String },

    #[error("contract session failed: {0}")]
    ContractSession(String),

    #[error("state root mismatch: declared {declared:?}, computed {computed:?}")]
    StateRootMismatch {
        declared: Option<StateRoot>,
        computed: Option<StateRoot>,
    },

    #[error("coinbase transaction does not match the round")]
    Coinbase,

    #[error("conflicting transactions: {0}")]
    Conflict(String),
}

/// Durable storage failed for an otherwise valid block
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommitError {
    #[error("storage failed: {0}")]
    Storage(String),
}

/// A fork continuation is malformed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForkError {
    #[error("block height {height} does not follow parent height {parent_height}")]
    HeightMismatch { parent_height: u64, height: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscardReason {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("double spend by an unregistered producer {0}")]
    UnattributedDoubleSpend(Address),

    #[error("download block did not extend the chain: {0}")]
    DownloadRejected(ExtensionError),

    #[error(transparent)]
    MalformedFork(#[from] ForkError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RollbackReason {
    #[error(transparent)]
    Transaction(#[from] TxValidationError),

    #[error(transparent)]
    Commit(#[from] CommitError),
}

/// How a single `add_block` call was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    Accepted,
    Discarded(DiscardReason),
    /// Double spend by an active agent; a punishment was raised or already
    /// on record
    Punished { agent: Address },
    /// Attached to, or already present in, a fork or the master chain
    Forked,
    Orphaned,
    RolledBack(RollbackReason),
}

impl BlockOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}
