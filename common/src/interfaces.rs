//! Narrow interfaces to the collaborators the block-acceptance core consumes.
//!
//! Implementations are injected as `Arc<dyn Trait>`; the core never looks
//! them up from global state.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::accumulator::CoinAccumulator;
use crate::hash::{BlockHash, StateRoot};
use crate::types::{
    Address, Agent, Block, BlockContainer, BlockHeader, Node, PeerId, RoundContext, Transaction,
    TxType,
};

/// Persistent block storage
pub trait BlockStore: Send + Sync {
    fn save_block(&self, block: &Arc<Block>) -> Result<()>;

    /// Highest stored block, `None` before genesis is written
    fn best_block(&self) -> Result<Option<Arc<Block>>>;

    fn block_header(&self, hash: &BlockHash) -> Result<Option<BlockHeader>>;

    fn block_by_hash(&self, hash: &BlockHash) -> Result<Option<Arc<Block>>>;

    fn remove_block(&self, hash: &BlockHash) -> Result<()>;
}

/// Result of checking a block's coins against the full ledger
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DoubleSpendCheck {
    Clean,
    /// Transactions in the block spend coins already spent on chain
    Repeated { conflicting: Vec<Transaction> },
}

pub trait Ledger: Send + Sync {
    fn verify_double_spend(&self, block: &Block) -> Result<DoubleSpendCheck>;

    /// Verify one transaction's coin data, updating `acc` with what it
    /// spends and creates
    fn verify_coin_data(&self, tx: &Transaction, acc: &mut CoinAccumulator) -> Result<()>;

    fn rollback_block(&self, block: &Block) -> Result<()>;
}

/// Block fields made visible to contracts during execution
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractBlockContext {
    pub height: u64,
    pub time: u64,
    pub producer: Address,
}

/// Outcome of executing one contract transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractResult {
    /// Set when the engine derived the post-state itself
    pub state_root: Option<StateRoot>,
    pub gas_used: u64,
}

/// Batch contract execution for one block's validation
pub trait ContractEngine: Send + Sync {
    fn create_temp_balance(&self) -> Result<()>;

    fn create_batch_execution(&self, state_root: Option<StateRoot>) -> Result<()>;

    fn set_current_block(&self, context: ContractBlockContext) -> Result<()>;

    /// `Ok(None)` when the engine produced no result for the transaction
    fn execute(
        &self,
        tx: &Transaction,
        best_height: u64,
        acc: &CoinAccumulator,
    ) -> Result<Option<ContractResult>>;

    fn commit_batch_execution(&self) -> Result<Option<StateRoot>>;

    fn remove_temp_balance(&self);

    /// Drops the batch executor and the current block context
    fn remove_batch_execution(&self);
}

#[async_trait]
pub trait TransactionService: Send + Sync {
    /// Detect conflicts across a whole transaction set
    fn conflict_detect(&self, txs: &[Transaction]) -> Result<()>;

    async fn new_tx(&self, tx: Transaction) -> Result<()>;

    async fn forward_tx(&self, tx: &Transaction, exclude: Option<PeerId>) -> Result<bool>;
}

/// The network's view of the best chain, as reported by a set of peers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkBest {
    pub height: u64,
    pub hash: BlockHash,
    /// Peers that reported this tip
    pub nodes: Vec<Node>,
}

#[async_trait]
pub trait Network: Send + Sync {
    async fn forward_block(&self, hash: BlockHash, exclude: Option<PeerId>) -> Result<()>;

    fn available_nodes(&self) -> Vec<Node>;

    /// Most widely reported tip among connected peers
    fn network_best(&self) -> Option<NetworkBest>;

    async fn fetch_block(&self, peer: PeerId, hash: BlockHash) -> Result<Option<Arc<Block>>>;

    /// Blocks in `[from, to]`, in any order; may be partial
    async fn fetch_blocks(&self, peer: PeerId, from: u64, to: u64) -> Result<Vec<Arc<Block>>>;

    /// Drop trust in the current peer set
    async fn reset(&self);
}

pub trait Mempool: Send + Sync {
    fn add_punishment_tx(&self, tx: Transaction) -> Result<()>;

    fn remove_confirmed_txs(&self, block: &Block) -> Result<()>;
}

/// Which round state a block is judged against
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundMode {
    /// The node's present round, for live-relayed blocks
    Live,
    /// The round that was current when a downloaded block was produced
    Reconstructed,
}

pub trait RoundScheduler: Send + Sync {
    fn verify_round(&self, header: &BlockHeader, mode: RoundMode) -> Result<RoundContext>;

    fn verify_coinbase(&self, block: &Block, round: &RoundContext) -> bool;

    fn agents(&self) -> Vec<Agent>;
}

pub trait ProtocolTracker: Send + Sync {
    fn supports_tx_type(&self, tx_type: TxType) -> bool;

    /// The network has moved to a protocol version this node does not know
    fn must_upgrade(&self) -> bool;
}

/// Cryptographic and structural self-checks
pub trait BlockVerifier: Send + Sync {
    /// Size limits, header fields, block signature and merkle root
    fn verify_block(&self, block: &Block) -> Result<()>;

    fn verify_transaction(&self, tx: &Transaction) -> bool;
}

/// Bookkeeping run after a block is durably stored
pub trait CommitObserver: Send + Sync {
    fn block_committed(&self, block: &Block, previous_best: &Block);
}

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// The local chain as seen by the sync engine
#[async_trait]
pub trait LocalChain: Send + Sync {
    async fn add_block(&self, container: BlockContainer) -> bool;

    fn best_block(&self) -> Arc<Block>;

    fn block_header(&self, hash: &BlockHash) -> Result<Option<BlockHeader>>;

    /// Undo the current best block, returning the new best
    async fn rollback_best_block(&self) -> Result<Arc<Block>>;
}
