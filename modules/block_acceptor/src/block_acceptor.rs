//! Kestrel block acceptor
//! Decides for every incoming block whether it extends the master chain,
//! belongs on a fork, waits as an orphan or is rejected, and commits or
//! rolls back accordingly.

pub mod bifurcation;
pub mod configuration;
pub mod context;
pub mod punishment;
pub mod signature_pool;
pub mod tx_validation;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use kestrel_common::interfaces::{DoubleSpendCheck, LocalChain};
use kestrel_common::validation::{
    BlockOutcome, CommitError, DiscardReason, ExtensionError, RollbackReason, StructuralError,
};
use kestrel_common::{
    BestBlock, Block, BlockContainer, BlockHash, BlockHeader, RoundContext,
    SharedConsensusStatus, Transaction,
};
use kestrel_module_chain_manager::fork_resolver::ForkResolution;
use kestrel_module_chain_manager::ChainManager;
use kestrel_module_orphan_pool::OrphanPool;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::bifurcation::BifurcationDetector;
use crate::configuration::AcceptorConfig;
use crate::context::AcceptorContext;
use crate::punishment::{find_active_agent, IssuedPunishments, PunishmentRecord};
use crate::signature_pool::SignaturePool;

/// State mutated while a block is being judged; one block at a time
struct CommitState {
    chain: ChainManager,
    bifurcation: BifurcationDetector,
    punishments: IssuedPunishments,
}

pub struct BlockAcceptor {
    context: AcceptorContext,
    state: AsyncMutex<CommitState>,
    orphans: Mutex<OrphanPool>,
    best: Arc<BestBlock>,
    status: Arc<SharedConsensusStatus>,
    signatures: SignaturePool,
    config: AcceptorConfig,
}

impl BlockAcceptor {
    pub fn new(
        context: AcceptorContext,
        chain: ChainManager,
        orphans: OrphanPool,
        best: Arc<BestBlock>,
        status: Arc<SharedConsensusStatus>,
        config: AcceptorConfig,
    ) -> Result<Self> {
        let signatures =
            SignaturePool::new(config.signature_thread_count(), context.verifier.clone())?;
        best.set(chain.best_block());
        Ok(Self {
            state: AsyncMutex::new(CommitState {
                chain,
                bifurcation: BifurcationDetector::new(config.bifurcation_window),
                punishments: IssuedPunishments::new(config.punishment_cache_size),
            }),
            orphans: Mutex::new(orphans),
            context,
            best,
            status,
            signatures,
            config,
        })
    }

    pub fn best_block(&self) -> Arc<Block> {
        self.best.get()
    }

    /// Offer a block. True only if it was committed to the master chain.
    ///
    /// Orphans waiting on a committed block are re-offered afterwards, one
    /// at a time, each under its own critical section.
    pub async fn add_block(&self, container: BlockContainer) -> bool {
        self.accept(container).await.is_accepted()
    }

    /// As [`add_block`](Self::add_block), reporting how the block was resolved
    pub async fn accept(&self, container: BlockContainer) -> BlockOutcome {
        let mut first = None;
        let mut pending = VecDeque::from([container]);
        while let Some(container) = pending.pop_front() {
            let block = container.block.clone();
            let span = info_span!("add_block", height = block.height(), hash = %block.hash().short());
            let outcome = self.process(&container).instrument(span).await;

            if outcome.is_accepted() {
                self.forward(&container).await;
            }
            // Children of a block placed on a fork can extend that fork
            if outcome.is_accepted() || outcome == BlockOutcome::Forked {
                let children = self.orphans().take_children(&block.hash());
                if !children.is_empty() {
                    debug!(count = children.len(), parent = %block.hash().short(), "re-offering orphans");
                }
                pending.extend(children.into_iter().map(|c| c.into_container()));
            }
            first.get_or_insert(outcome);
        }
        first.unwrap_or(BlockOutcome::Orphaned)
    }

    async fn process(&self, container: &BlockContainer) -> BlockOutcome {
        let block = &container.block;

        if self.context.protocol.must_upgrade() {
            warn!("protocol upgrade required, block ignored");
            return BlockOutcome::Discarded(StructuralError::MustUpgrade.into());
        }

        let now = self.context.clock.now_millis();
        let tolerance = self.config.future_tolerance_ms;
        if block.header.time > now.saturating_add(tolerance) {
            warn!(time = block.header.time, now, "future block discarded");
            return BlockOutcome::Discarded(
                StructuralError::FutureBlock {
                    time: block.header.time,
                    now,
                    tolerance,
                }
                .into(),
            );
        }

        let mut state = self.state.lock().await;

        if let Err(e) = self.context.verifier.verify_block(block) {
            warn!("block verification failed: {e:#}");
            return BlockOutcome::Discarded(StructuralError::Verification(format!("{e:#}")).into());
        }
        if let Err(e) = state.bifurcation.validate(&block.header) {
            warn!("{e}");
            return BlockOutcome::Discarded(e.into());
        }

        match self.context.ledger.verify_double_spend(block) {
            Ok(DoubleSpendCheck::Clean) => {}
            Ok(DoubleSpendCheck::Repeated { conflicting }) => {
                return self.punish(&mut state, block, conflicting);
            }
            Err(e) => error!("double spend check failed: {e:#}"),
        }

        match state.chain.verify_and_add_block(block, container.is_download()) {
            Ok(round) => self.validate_and_commit(&mut state, block, round).await,
            Err(e) => self.place_unconnected(&mut state, container, e),
        }
    }

    fn punish(&self, state: &mut CommitState, block: &Block, conflicting: Vec<Transaction>) -> BlockOutcome {
        let producer = &block.header.producer;
        let agents = self.context.rounds.agents();
        let Some(agent) = find_active_agent(&agents, producer) else {
            warn!(%producer, "double spend by unknown producer, block discarded");
            return BlockOutcome::Discarded(DiscardReason::UnattributedDoubleSpend(producer.clone()));
        };

        let record = PunishmentRecord::double_spend(agent, block, conflicting, self.config.red_punish_lock_ms);
        match record.to_transaction(agent) {
            Ok(tx) if state.punishments.record(tx.hash) => {
                let hash = tx.hash;
                match self.context.mempool.add_punishment_tx(tx) {
                    Ok(()) => warn!(agent = %agent.agent_address, tx = %hash.short(), "double spend punished"),
                    Err(e) => error!("punishment not queued: {e:#}"),
                }
            }
            Ok(tx) => debug!(tx = %tx.hash.short(), "punishment already issued"),
            Err(e) => error!("punishment not built: {e:#}"),
        }
        BlockOutcome::Punished {
            agent: agent.agent_address.clone(),
        }
    }

    async fn validate_and_commit(&self, state: &mut CommitState, block: &Arc<Block>, round: RoundContext) -> BlockOutcome {
        let previous_best = self.best.get();

        if let Err(e) = tx_validation::validate_transactions(
            &self.context,
            &self.signatures,
            &state.chain,
            block,
            &previous_best,
            &round,
            self.config.max_block_gas,
        )
        .await
        {
            return self.roll_back(state, block, e.into());
        }

        if let Err(e) = self.context.store.save_block(block) {
            warn!("save block failed: {e:#}");
            return self.roll_back(state, block, CommitError::Storage(format!("{e:#}")).into());
        }

        for observer in &self.context.observers {
            observer.block_committed(block, &previous_best);
        }
        self.best.set(block.clone());
        self.remove_tx_from_memory_pool(block);

        // Orphans below the in-memory window can no longer be placed anywhere
        let now = self.context.clock.now_millis();
        let mut orphans = self.orphans();
        orphans.purge_expired(now);
        orphans.remove_below(state.chain.master_chain().start_height());
        drop(orphans);

        info!(txs = block.txs.len(), producer = %block.header.producer, "block accepted");
        BlockOutcome::Accepted
    }

    fn roll_back(&self, state: &mut CommitState, block: &Block, reason: RollbackReason) -> BlockOutcome {
        let best = match state.chain.rollback(block) {
            Ok(best) => best,
            Err(e) => {
                error!("master chain rollback failed: {e}");
                state.chain.best_block()
            }
        };
        self.best.set(best);
        warn!(%reason, "block rolled back");
        BlockOutcome::RolledBack(reason)
    }

    fn place_unconnected(
        &self,
        state: &mut CommitState,
        container: &BlockContainer,
        err: ExtensionError,
    ) -> BlockOutcome {
        if container.is_download() && !self.status.is_running() {
            debug!("download block rejected: {err}");
            return BlockOutcome::Discarded(DiscardReason::DownloadRejected(err));
        }

        match state.chain.check_and_add_fork_chain(&container.block) {
            ForkResolution::Unhandled => {
                let now = self.context.clock.now_millis();
                self.orphans().add(container, now);
                debug!("block held as orphan: {err}");
                BlockOutcome::Orphaned
            }
            ForkResolution::Malformed(e) => {
                warn!("{e}");
                BlockOutcome::Discarded(e.into())
            }
            resolution => {
                debug!(?resolution, "block placed on fork");
                BlockOutcome::Forked
            }
        }
    }

    /// Drop a committed block's transactions from the mempool
    pub fn remove_tx_from_memory_pool(&self, block: &Block) -> bool {
        match self.context.mempool.remove_confirmed_txs(block) {
            Ok(()) => true,
            Err(e) => {
                error!("mempool cleanup failed: {e:#}");
                false
            }
        }
    }

    async fn forward(&self, container: &BlockContainer) {
        if container.is_download() {
            return;
        }
        let Some(node) = container.node else {
            return;
        };
        if let Err(e) = self.context.network.forward_block(container.block.hash(), Some(node)).await {
            warn!("forward failed: {e:#}");
        }
    }

    /// Undo the current best block in the ledger, storage and master chain
    pub async fn rollback_best_block(&self) -> Result<Arc<Block>> {
        let mut state = self.state.lock().await;
        let best = state.chain.best_block();
        self.context.ledger.rollback_block(&best)?;
        self.context.store.remove_block(&best.hash())?;
        let new_best = state.chain.rollback(&best)?;
        self.best.set(new_best.clone());
        info!(from = best.height(), to = new_best.height(), "best block rolled back");
        Ok(new_best)
    }

    /// Place a block on a fork without attempting to extend the master chain
    pub async fn check_and_add_fork_chain(&self, block: &Arc<Block>) -> bool {
        self.state.lock().await.chain.check_and_add_fork_chain(block).is_handled()
    }

    pub async fn fork_count(&self) -> usize {
        self.state.lock().await.chain.fork_chains().len()
    }

    pub async fn fork_tips(&self) -> Vec<BlockHash> {
        let state = self.state.lock().await;
        state.chain.fork_chains().iter().map(|f| f.chain.tip().hash()).collect()
    }

    pub async fn master_hashes(&self) -> Vec<BlockHash> {
        self.state.lock().await.chain.master_chain().block_hashes()
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans().len()
    }

    fn orphans(&self) -> std::sync::MutexGuard<'_, OrphanPool> {
        self.orphans.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl LocalChain for BlockAcceptor {
    async fn add_block(&self, container: BlockContainer) -> bool {
        BlockAcceptor::add_block(self, container).await
    }

    fn best_block(&self) -> Arc<Block> {
        self.best.get()
    }

    fn block_header(&self, hash: &BlockHash) -> Result<Option<BlockHeader>> {
        self.context.store.block_header(hash)
    }

    async fn rollback_best_block(&self) -> Result<Arc<Block>> {
        BlockAcceptor::rollback_best_block(self).await
    }
}

