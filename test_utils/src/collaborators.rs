use std::sync::Arc;

use crate::builder::{BLOCK_INTERVAL_MS, GENESIS_TIME};
use crate::consensus::{ManualClock, MemoryVerifier, RecordingObserver, StaticProtocol, StaticRounds};
use crate::contracts::MemoryContractEngine;
use crate::ledger::MemoryLedger;
use crate::mempool::MemoryMempool;
use crate::network::{MemoryNetwork, MemoryTransactionService};
use crate::store::MemoryBlockStore;

/// One of each in-memory collaborator, kept concrete so tests can script
/// and inspect them
pub struct Collaborators {
    pub store: Arc<MemoryBlockStore>,
    pub ledger: Arc<MemoryLedger>,
    pub contracts: Arc<MemoryContractEngine>,
    pub transactions: Arc<MemoryTransactionService>,
    pub network: Arc<MemoryNetwork>,
    pub mempool: Arc<MemoryMempool>,
    pub rounds: Arc<StaticRounds>,
    pub protocol: Arc<StaticProtocol>,
    pub verifier: Arc<MemoryVerifier>,
    pub clock: Arc<ManualClock>,
    pub observer: Arc<RecordingObserver>,
}

impl Collaborators {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryBlockStore::new()),
            ledger: Arc::new(MemoryLedger::new()),
            contracts: Arc::new(MemoryContractEngine::new()),
            transactions: Arc::new(MemoryTransactionService::new()),
            network: Arc::new(MemoryNetwork::new()),
            mempool: Arc::new(MemoryMempool::new()),
            rounds: Arc::new(StaticRounds::new()),
            protocol: Arc::new(StaticProtocol::new()),
            verifier: Arc::new(MemoryVerifier::new()),
            clock: Arc::new(ManualClock::new(GENESIS_TIME + 100_000 * BLOCK_INTERVAL_MS)),
            observer: Arc::new(RecordingObserver::new()),
        }
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::new()
    }
}
