//! Devnet wiring: one acceptor, sync engine and relay over in-memory
//! collaborators, with a remote chain served by a handful of peers.

use std::sync::Arc;

use anyhow::Result;
use config::Config;
use kestrel_common::configuration::{
    section, CONFIG_SECTION_ACCEPTOR, CONFIG_SECTION_CHAIN_MANAGER, CONFIG_SECTION_ORPHAN_POOL,
    CONFIG_SECTION_RELAY, CONFIG_SECTION_SYNC,
};
use kestrel_common::interfaces::{BlockStore, SystemClock};
use kestrel_common::validation::BlockOutcome;
use kestrel_common::{BestBlock, Block, BlockContainer, ConsensusStatus, PeerId, SharedConsensusStatus};
use kestrel_module_block_acceptor::configuration::AcceptorConfig;
use kestrel_module_block_acceptor::context::AcceptorContext;
use kestrel_module_block_acceptor::BlockAcceptor;
use kestrel_module_chain_manager::configuration::ChainManagerConfig;
use kestrel_module_chain_manager::ChainManager;
use kestrel_module_orphan_pool::configuration::OrphanPoolConfig;
use kestrel_module_orphan_pool::OrphanPool;
use kestrel_module_sync_engine::configuration::SyncConfig;
use kestrel_module_sync_engine::{SyncEngine, SyncOutcome};
use kestrel_module_tx_relay::configuration::RelayConfig;
use kestrel_module_tx_relay::{RelayOutcome, TxRelay};
use kestrel_test_utils::{contract_call, ChainBuilder, Collaborators};
use rand::seq::SliceRandom;
use tracing::{info, warn};

const REMOTE_PEERS: u64 = 3;
const LIVE_BLOCKS: usize = 5;

pub struct Devnet {
    deps: Collaborators,
    acceptor: Arc<BlockAcceptor>,
    sync: SyncEngine,
    relay: TxRelay,
    status: Arc<SharedConsensusStatus>,
    builder: ChainBuilder,
}

#[derive(Debug)]
pub struct Summary {
    pub sync: SyncOutcome,
    pub height: u64,
    pub forks: usize,
    pub orphans: usize,
    pub relayed: u64,
}

impl Devnet {
    /// Local node at genesis; remote peers serve `remote_blocks` more
    pub fn new(config: &Config, remote_blocks: usize) -> Result<Self> {
        let acceptor_config = AcceptorConfig::try_load(&section(config, CONFIG_SECTION_ACCEPTOR)?)?;
        let chain_config = ChainManagerConfig::try_load(&section(config, CONFIG_SECTION_CHAIN_MANAGER)?)?;
        let orphan_config = OrphanPoolConfig::try_load(&section(config, CONFIG_SECTION_ORPHAN_POOL)?)?;
        let sync_config = SyncConfig::try_load(&section(config, CONFIG_SECTION_SYNC)?)?;
        let relay_config = RelayConfig::try_load(&section(config, CONFIG_SECTION_RELAY)?)?;

        let deps = Collaborators::new();
        let builder = ChainBuilder::new();
        let genesis = builder.genesis();
        deps.store.save_block(&genesis)?;

        let remote = builder.blocks(remote_blocks + 1);
        let peers: Vec<PeerId> = (1..=REMOTE_PEERS).map(|id| deps.network.add_peer(id, remote.clone())).collect();
        if let Some(tip) = remote.last() {
            deps.network.set_network_best(tip, &peers);
        }

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
            clock: Arc::new(SystemClock),
            observers: vec![deps.observer.clone()],
        };
        let best = Arc::new(BestBlock::new(genesis.clone()));
        let status = Arc::new(SharedConsensusStatus::new(ConsensusStatus::WaitRunning));
        let chain = ChainManager::new(genesis, deps.rounds.clone(), deps.store.clone(), chain_config);
        let acceptor = Arc::new(BlockAcceptor::new(
            context,
            chain,
            OrphanPool::new(orphan_config),
            best,
            status.clone(),
            acceptor_config,
        )?);

        let sync = SyncEngine::new(deps.network.clone(), acceptor.clone(), sync_config);
        let relay = TxRelay::new(deps.transactions.clone(), relay_config);

        Ok(Self {
            deps,
            acceptor,
            sync,
            relay,
            status,
            builder,
        })
    }

    /// Catch up with the peers, then take live blocks, competing blocks and
    /// transactions as a running node would
    pub async fn run(&self, forks: usize) -> Result<Summary> {
        let sync = self.sync.synchronize().await;
        match &sync {
            SyncOutcome::CaughtUp | SyncOutcome::Completed { .. } => info!(?sync, "initial sync done"),
            other => warn!(?other, "initial sync did not complete"),
        }
        self.status.set(ConsensusStatus::Running);

        self.live_blocks().await;
        self.competing_blocks(forks).await;
        let relayed = self.relay_transactions().await;

        Ok(Summary {
            sync,
            height: self.acceptor.best_block().height(),
            forks: self.acceptor.fork_count().await,
            orphans: self.acceptor.orphan_count(),
            relayed,
        })
    }

    /// Blocks on top of the tip arriving in random order
    async fn live_blocks(&self) {
        let mut blocks = self.builder.extend(&self.acceptor.best_block(), LIVE_BLOCKS, 0);
        blocks.shuffle(&mut rand::rng());
        for block in blocks {
            self.offer(&block, PeerId(1)).await;
        }
    }

    /// Rival children of the tip's parent, one per producer
    async fn competing_blocks(&self, forks: usize) {
        let tip = self.acceptor.best_block();
        let parent = match self.deps.store.block_by_hash(&tip.previous_hash()) {
            Ok(Some(parent)) => parent,
            _ => return,
        };
        for n in 0..forks {
            let rival = self.builder.child_of(&parent, 10 + (n % 200) as u8);
            self.offer(&rival, PeerId(2)).await;
        }
    }

    async fn relay_transactions(&self) -> u64 {
        let mut relayed = 0;
        for nonce in 0..3u8 {
            let outcome = self.relay.on_transaction(contract_call(nonce), Some(PeerId(3))).await;
            if matches!(outcome, RelayOutcome::Relayed { .. }) {
                relayed += 1;
            }
        }
        relayed
    }

    async fn offer(&self, block: &Arc<Block>, from: PeerId) -> BlockOutcome {
        let outcome = self.acceptor.accept(BlockContainer::received(block.clone(), Some(from))).await;
        info!(height = block.height(), hash = %block.hash().short(), ?outcome, "block offered");
        outcome
    }
}
