//! Round, protocol, verifier and clock stand-ins

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use kestrel_common::interfaces::{
    BlockVerifier, Clock, CommitObserver, ProtocolTracker, RoundMode, RoundScheduler,
};
use kestrel_common::{
    Address, Agent, Block, BlockHash, BlockHeader, RoundContext, Transaction, TxHash, TxType,
};

pub const ROUND_SIZE: u64 = 10;

/// Every producer is a round member unless rejected
pub struct StaticRounds {
    rejected: Mutex<HashSet<Address>>,
    agents: Mutex<Vec<Agent>>,
    coinbase_valid: AtomicBool,
    last_mode: Mutex<Option<RoundMode>>,
}

impl StaticRounds {
    pub fn new() -> Self {
        Self {
            rejected: Mutex::new(HashSet::new()),
            agents: Mutex::new(Vec::new()),
            coinbase_valid: AtomicBool::new(true),
            last_mode: Mutex::new(None),
        }
    }

    pub fn reject(&self, producer: Address) {
        self.rejected.lock().unwrap().insert(producer);
    }

    pub fn set_agents(&self, agents: Vec<Agent>) {
        *self.agents.lock().unwrap() = agents;
    }

    pub fn fail_coinbase(&self) {
        self.coinbase_valid.store(false, Ordering::SeqCst);
    }

    /// Mode of the most recent round check
    pub fn last_mode(&self) -> Option<RoundMode> {
        *self.last_mode.lock().unwrap()
    }
}

impl Default for StaticRounds {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundScheduler for StaticRounds {
    fn verify_round(&self, header: &BlockHeader, mode: RoundMode) -> Result<RoundContext> {
        *self.last_mode.lock().unwrap() = Some(mode);
        if self.rejected.lock().unwrap().contains(&header.producer) {
            bail!("producer {} is not a round member", header.producer);
        }
        Ok(RoundContext {
            round_index: header.height / ROUND_SIZE,
            round_start: header.time,
            member_count: ROUND_SIZE as u32,
            member_index: (header.height % ROUND_SIZE) as u32,
            member_address: header.producer.clone(),
        })
    }

    fn verify_coinbase(&self, _block: &Block, _round: &RoundContext) -> bool {
        self.coinbase_valid.load(Ordering::SeqCst)
    }

    fn agents(&self) -> Vec<Agent> {
        self.agents.lock().unwrap().clone()
    }
}

#[derive(Default)]
pub struct StaticProtocol {
    unsupported: Mutex<HashSet<TxType>>,
    must_upgrade: AtomicBool,
}

impl StaticProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forbid(&self, tx_type: TxType) {
        self.unsupported.lock().unwrap().insert(tx_type);
    }

    pub fn require_upgrade(&self) {
        self.must_upgrade.store(true, Ordering::SeqCst);
    }
}

impl ProtocolTracker for StaticProtocol {
    fn supports_tx_type(&self, tx_type: TxType) -> bool {
        !self.unsupported.lock().unwrap().contains(&tx_type)
    }

    fn must_upgrade(&self) -> bool {
        self.must_upgrade.load(Ordering::SeqCst)
    }
}

/// Accepts everything except what it is told to reject
#[derive(Default)]
pub struct MemoryVerifier {
    bad_blocks: Mutex<HashSet<BlockHash>>,
    bad_txs: Mutex<HashSet<TxHash>>,
}

impl MemoryVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_block(&self, hash: BlockHash) {
        self.bad_blocks.lock().unwrap().insert(hash);
    }

    pub fn reject_tx(&self, hash: TxHash) {
        self.bad_txs.lock().unwrap().insert(hash);
    }
}

impl BlockVerifier for MemoryVerifier {
    fn verify_block(&self, block: &Block) -> Result<()> {
        if self.bad_blocks.lock().unwrap().contains(&block.hash()) {
            bail!("bad block signature");
        }
        Ok(())
    }

    fn verify_transaction(&self, tx: &Transaction) -> bool {
        !self.bad_txs.lock().unwrap().contains(&tx.hash)
    }
}

pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(now: u64) -> Self {
        Self(AtomicU64::new(now))
    }

    pub fn set(&self, now: u64) {
        self.0.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.0.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Records (height, previous best height) for every commit
#[derive(Default)]
pub struct RecordingObserver {
    commits: Mutex<Vec<(u64, u64)>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commits(&self) -> Vec<(u64, u64)> {
        self.commits.lock().unwrap().clone()
    }
}

impl CommitObserver for RecordingObserver {
    fn block_committed(&self, block: &Block, previous_best: &Block) {
        self.commits
            .lock()
            .unwrap()
            .push((block.height(), previous_best.height()));
    }
}
