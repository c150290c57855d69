//! Collaborators the acceptor is built with

use std::sync::Arc;

use kestrel_common::interfaces::{
    BlockStore, BlockVerifier, Clock, CommitObserver, ContractEngine, Ledger, Mempool, Network,
    ProtocolTracker, RoundScheduler, TransactionService,
};

/// Explicit application context threaded into the acceptor
#[derive(Clone)]
pub struct AcceptorContext {
    pub store: Arc<dyn BlockStore>,
    pub ledger: Arc<dyn Ledger>,
    pub contracts: Arc<dyn ContractEngine>,
    pub transactions: Arc<dyn TransactionService>,
    pub network: Arc<dyn Network>,
    pub mempool: Arc<dyn Mempool>,
    pub rounds: Arc<dyn RoundScheduler>,
    pub protocol: Arc<dyn ProtocolTracker>,
    pub verifier: Arc<dyn BlockVerifier>,
    pub clock: Arc<dyn Clock>,
    /// Random seed, reward statistics and protocol upgrade bookkeeping
    pub observers: Vec<Arc<dyn CommitObserver>>,
}
