use kestrel_common::{BlockHash, PeerId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("no peer reports a network best block")]
    NoNetworkBest,

    #[error("no peers to download from")]
    NoPeers,

    #[error("{reporting} of {available} connected peers report the shorter chain, not enough to roll back")]
    InsufficientQuorum { available: usize, reporting: usize },

    #[error("no common ancestor within {attempts} rollbacks")]
    RollbackLimit { attempts: u32 },

    #[error("local store query failed: {0}")]
    Store(String),

    #[error("local rollback failed: {0}")]
    Rollback(String),

    #[error("peer {peer} did not answer for heights {from}..={to}")]
    Timeout { peer: PeerId, from: u64, to: u64 },

    #[error("peer {peer} failed: {reason}")]
    Peer { peer: PeerId, reason: String },

    #[error("heights {from}..={to} unavailable after {attempts} attempts")]
    RangeUnavailable { from: u64, to: u64, attempts: u32 },

    #[error("downloaded block {hash} at height {height} was not accepted")]
    Rejected { height: u64, hash: BlockHash },

    #[error("no block arrived for height {height}")]
    Gap { height: u64 },

    #[error("session did not finish within {secs}s")]
    SessionTimeout { secs: u64 },

    #[error("collect worker stopped without reporting")]
    WorkerStopped,
}
