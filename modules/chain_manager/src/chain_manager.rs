//! Kestrel chain manager
//! Owns the master chain and the set of fork chains, and performs the one
//! mutating operation of the acceptance core: extending the master chain.

pub mod chain_error;
pub mod configuration;
pub mod fork_resolver;

use std::sync::Arc;

use kestrel_common::interfaces::{BlockStore, RoundMode, RoundScheduler};
use kestrel_common::validation::ExtensionError;
use kestrel_common::{Block, Chain, ChainContainer, RoundContext};
use tracing::{debug, info};

use crate::chain_error::ChainManagerError;
use crate::configuration::ChainManagerConfig;
use crate::fork_resolver::{ForkResolution, ForkResolver};

pub struct ChainManager {
    master: ChainContainer,
    forks: ForkResolver,
    rounds: Arc<dyn RoundScheduler>,
    store: Arc<dyn BlockStore>,
    config: ChainManagerConfig,
}

impl ChainManager {
    /// Start with a master chain holding only `best`, normally the stored tip
    pub fn new(
        best: Arc<Block>,
        rounds: Arc<dyn RoundScheduler>,
        store: Arc<dyn BlockStore>,
        config: ChainManagerConfig,
    ) -> Self {
        Self {
            master: ChainContainer::master(Chain::new(best)),
            forks: ForkResolver::new(),
            rounds,
            store,
            config,
        }
    }

    /// Check that `block` continues the master tip and passes round
    /// verification, then append it. The master chain is untouched on
    /// failure.
    pub fn verify_and_add_block(
        &mut self,
        block: &Arc<Block>,
        is_download: bool,
    ) -> Result<RoundContext, ExtensionError> {
        self.master.chain.check_continues(&block.header)?;

        let mode = if is_download {
            RoundMode::Reconstructed
        } else {
            RoundMode::Live
        };
        let round = self
            .rounds
            .verify_round(&block.header, mode)
            .map_err(|e| ExtensionError::Round(format!("{e:#}")))?;

        self.master.chain.push(block.clone())?;
        self.prune();
        debug!(
            height = block.height(),
            round = round.round_index,
            member = round.member_index,
            "master chain extended"
        );
        Ok(round)
    }

    /// Undo a speculative extension. `block` must be the master tip.
    ///
    /// If the tip is the only block in memory its parent is reloaded from
    /// storage so the master chain never becomes empty.
    pub fn rollback(&mut self, block: &Block) -> Result<Arc<Block>, ChainManagerError> {
        let tip = self.master.chain.tip().hash();
        if tip != block.hash() {
            return Err(ChainManagerError::NotTip {
                hash: block.hash(),
                tip,
            });
        }

        if self.master.chain.pop().is_none() {
            let parent_hash = block.previous_hash();
            let parent = self
                .store
                .block_by_hash(&parent_hash)?
                .ok_or(ChainManagerError::ParentMissing { hash: parent_hash })?;
            self.master.chain = Chain::new(parent);
        }

        let best = self.best_block();
        info!(
            from = block.height(),
            to = best.height(),
            hash = %best.hash().short(),
            "master chain rolled back"
        );
        Ok(best)
    }

    pub fn best_block(&self) -> Arc<Block> {
        self.master.chain.tip().clone()
    }

    pub fn master_chain(&self) -> &Chain {
        &self.master.chain
    }

    pub fn fork_chains(&self) -> &[ChainContainer] {
        self.forks.chains()
    }

    pub fn verify_coinbase(&self, block: &Block, round: &RoundContext) -> bool {
        self.rounds.verify_coinbase(block, round)
    }

    /// Place a block that failed to extend the master chain on a fork
    pub fn check_and_add_fork_chain(&mut self, block: &Arc<Block>) -> ForkResolution {
        self.forks.check_and_add_fork_chain(block, &self.master.chain)
    }

    fn prune(&mut self) {
        let dropped = self.master.chain.retain_last(self.config.master_window);
        if dropped > 0 {
            self.forks.prune_below(self.master.chain.start_height());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::interfaces::BlockStore;
    use kestrel_test_utils::{ChainBuilder, MemoryBlockStore, StaticRounds};

    fn manager_at(builder: &ChainBuilder, height: u64) -> (ChainManager, Arc<MemoryBlockStore>, Arc<StaticRounds>) {
        let store = Arc::new(MemoryBlockStore::new());
        let rounds = Arc::new(StaticRounds::new());
        let chain = builder.chain(height as usize + 1);
        for block in chain.iter() {
            store.save_block(block).unwrap();
        }
        let manager = ChainManager::new(
            chain.tip().clone(),
            rounds.clone(),
            store.clone(),
            ChainManagerConfig { master_window: 4 },
        );
        (manager, store, rounds)
    }

    #[test]
    fn extends_master_with_continuation() {
        let builder = ChainBuilder::new();
        let (mut manager, _, _) = manager_at(&builder, 10);
        let next = builder.child_of(&manager.best_block(), 0);

        let round = manager.verify_and_add_block(&next, false).unwrap();
        assert_eq!(round.member_address, next.header.producer);
        assert_eq!(manager.best_block().height(), 11);
    }

    #[test]
    fn refuses_non_continuation_without_change() {
        let builder = ChainBuilder::new();
        let (mut manager, _, _) = manager_at(&builder, 10);
        let stray = builder.block_at(11, kestrel_test_utils::hash(9), 0);
        assert!(matches!(
            manager.verify_and_add_block(&stray, false),
            Err(ExtensionError::NotContinuation(_))
        ));
        assert_eq!(manager.best_block().height(), 10);
    }

    #[test]
    fn round_failure_leaves_master_untouched() {
        let builder = ChainBuilder::new();
        let (mut manager, _, rounds) = manager_at(&builder, 3);
        let next = builder.child_of(&manager.best_block(), 0);
        rounds.reject(next.header.producer.clone());
        assert!(matches!(
            manager.verify_and_add_block(&next, true),
            Err(ExtensionError::Round(_))
        ));
        assert_eq!(manager.best_block().height(), 3);
        assert_eq!(rounds.last_mode(), Some(RoundMode::Reconstructed));
    }

    #[test]
    fn rollback_restores_previous_tip() {
        let builder = ChainBuilder::new();
        let (mut manager, _, _) = manager_at(&builder, 5);
        let before = manager.best_block();
        let next = builder.child_of(&before, 0);
        manager.verify_and_add_block(&next, false).unwrap();

        let best = manager.rollback(&next).unwrap();
        assert_eq!(best.hash(), before.hash());
        assert!(matches!(manager.rollback(&next), Err(ChainManagerError::NotTip { .. })));
    }

    #[test]
    fn rollback_of_last_block_reloads_parent() {
        let builder = ChainBuilder::new();
        let (mut manager, _, _) = manager_at(&builder, 5);
        let tip = manager.best_block();
        let best = manager.rollback(&tip).unwrap();
        assert_eq!(best.height(), 4);
        assert_eq!(best.hash(), tip.previous_hash());
    }

    #[test]
    fn master_window_is_bounded() {
        let builder = ChainBuilder::new();
        let (mut manager, _, _) = manager_at(&builder, 0);
        for _ in 0..10 {
            let next = builder.child_of(&manager.best_block(), 0);
            manager.verify_and_add_block(&next, false).unwrap();
        }
        assert_eq!(manager.master_chain().len(), 4);
        assert_eq!(manager.master_chain().start_height(), 7);
    }

    #[test]
    fn competing_block_goes_to_fork() {
        let builder = ChainBuilder::new();
        let (mut manager, _, _) = manager_at(&builder, 10);
        let parent = manager.best_block();
        let first = builder.child_of(&parent, 0);
        let second = builder.child_of(&parent, 1);

        manager.verify_and_add_block(&first, false).unwrap();
        assert!(manager.verify_and_add_block(&second, false).is_err());
        assert_eq!(manager.check_and_add_fork_chain(&second), ForkResolution::Created);

        assert_eq!(manager.best_block().hash(), first.hash());
        assert_eq!(manager.fork_chains()[0].chain.tip().hash(), second.hash());
    }
}
