//! Acceptor wired to in-memory collaborators over a pre-built master chain

#![allow(dead_code)]

use std::sync::Arc;

use kestrel_common::interfaces::{BlockStore, RoundScheduler};
use kestrel_common::{Agent, BestBlock, Block, BlockContainer, ConsensusStatus, PeerId, SharedConsensusStatus};
use kestrel_module_block_acceptor::configuration::AcceptorConfig;
use kestrel_module_block_acceptor::context::AcceptorContext;
use kestrel_module_block_acceptor::BlockAcceptor;
use kestrel_module_chain_manager::configuration::ChainManagerConfig;
use kestrel_module_chain_manager::ChainManager;
use kestrel_module_orphan_pool::configuration::OrphanPoolConfig;
use kestrel_module_orphan_pool::OrphanPool;
use kestrel_test_utils::{address, ChainBuilder, Collaborators};

pub const RELAY_PEER: PeerId = PeerId(7);

pub struct Harness {
    pub acceptor: BlockAcceptor,
    pub deps: Collaborators,
    pub builder: ChainBuilder,
    pub best: Arc<BestBlock>,
    pub status: Arc<SharedConsensusStatus>,
}

impl Harness {
    /// Master chain from genesis up to `height`, consensus running
    pub fn at(height: u64) -> Self {
        Self::with_config(height, AcceptorConfig {
            signature_threads: 2,
            ..AcceptorConfig::default()
        })
    }

    pub fn with_config(height: u64, config: AcceptorConfig) -> Self {
        let deps = Collaborators::new();
        let builder = ChainBuilder::new();
        let chain = builder.chain(height as usize + 1);
        for block in chain.iter() {
            deps.store.save_block(block).unwrap();
        }

        let manager = ChainManager::new(
            chain.tip().clone(),
            deps.rounds.clone(),
            deps.store.clone(),
            ChainManagerConfig::default(),
        );
        let context = AcceptorContext {
            store: deps.store.clone(),
            ledger: deps.ledger.clone(),
            contracts: deps.contracts.clone(),
            transactions: deps.transactions.clone(),
            network: deps.network.clone(),
            mempool: deps.mempool.clone(),
            rounds: deps.rounds.clone(),
            protocol: deps.protocol.clone(),
            verifier: deps.verifier.clone(),
            clock: deps.clock.clone(),
            observers: vec![deps.observer.clone()],
        };
        let best = Arc::new(BestBlock::new(builder.genesis()));
        let status = Arc::new(SharedConsensusStatus::new(ConsensusStatus::Running));
        let acceptor = BlockAcceptor::new(
            context,
            manager,
            OrphanPool::new(OrphanPoolConfig::default()),
            best.clone(),
            status.clone(),
            config,
        )
        .unwrap();

        Self {
            acceptor,
            deps,
            builder,
            best,
            status,
        }
    }

    pub fn tip(&self) -> Arc<Block> {
        self.acceptor.best_block()
    }

    /// Register producer `n` as an active agent
    pub fn register_agent(&self, n: u8) -> Agent {
        let agent = Agent {
            agent_address: address(100 + n),
            packing_address: address(n),
            deposit: 20_000,
            deleted_height: None,
        };
        let mut agents = self.deps.rounds.agents();
        agents.push(agent.clone());
        self.deps.rounds.set_agents(agents);
        agent
    }
}

pub fn relayed(block: &Arc<Block>) -> BlockContainer {
    BlockContainer::received(block.clone(), Some(RELAY_PEER))
}

pub fn downloaded(block: &Arc<Block>) -> BlockContainer {
    BlockContainer::downloading(block.clone(), Some(RELAY_PEER))
}
