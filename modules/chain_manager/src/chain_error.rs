//! Error types for chain manager operations.

use kestrel_common::BlockHash;

/// Errors returned by [`ChainManager`](crate::ChainManager) operations.
#[derive(Debug, thiserror::Error)]
pub enum ChainManagerError {
    /// The block asked to be rolled back is not the master tip.
    #[error("rollback of {hash} refused: master tip is {tip}")]
    NotTip { hash: BlockHash, tip: BlockHash },

    /// Rolling back would empty the in-memory window and the parent is not stored.
    #[error("parent {hash} not found in block store")]
    ParentMissing { hash: BlockHash },

    /// The block store failed while reloading history.
    #[error("block store: {0}")]
    Store(#[from] anyhow::Error),
}
