//! Peer network and transaction service held in memory

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use kestrel_common::interfaces::{Network, NetworkBest, TransactionService};
use kestrel_common::{Block, BlockHash, Node, PeerId, Transaction, TxHash};

/// Each peer serves a fixed list of blocks
#[derive(Default)]
pub struct MemoryNetwork {
    nodes: Mutex<Vec<Node>>,
    served: DashMap<PeerId, Vec<Arc<Block>>>,
    best: Mutex<Option<NetworkBest>>,
    failing: Mutex<HashSet<PeerId>>,
    silent: Mutex<HashSet<PeerId>>,
    forwarded: Mutex<Vec<(BlockHash, Option<PeerId>)>>,
    fetches: AtomicUsize,
    resets: AtomicUsize,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_peer(&self, id: u64, blocks: Vec<Arc<Block>>) -> PeerId {
        let peer = PeerId(id);
        self.nodes.lock().unwrap().push(Node {
            id: peer,
            address: format!("10.0.0.{id}:8001"),
        });
        self.served.insert(peer, blocks);
        peer
    }

    /// Report the tip of `peers` as the network best
    pub fn set_network_best(&self, block: &Block, peers: &[PeerId]) {
        let nodes = self
            .nodes
            .lock()
            .unwrap()
            .iter()
            .filter(|n| peers.contains(&n.id))
            .cloned()
            .collect();
        *self.best.lock().unwrap() = Some(NetworkBest {
            height: block.height(),
            hash: block.hash(),
            nodes,
        });
    }

    /// Requests to this peer fail immediately
    pub fn fail_peer(&self, peer: PeerId) {
        self.failing.lock().unwrap().insert(peer);
    }

    /// Requests to this peer never complete
    pub fn silence_peer(&self, peer: PeerId) {
        self.silent.lock().unwrap().insert(peer);
    }

    pub fn forwarded(&self) -> Vec<(BlockHash, Option<PeerId>)> {
        self.forwarded.lock().unwrap().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    async fn answer(&self, peer: PeerId) -> Result<Vec<Arc<Block>>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing.lock().unwrap().contains(&peer);
        if failing {
            bail!("peer {peer} refused request");
        }
        let silent = self.silent.lock().unwrap().contains(&peer);
        if silent {
            std::future::pending::<()>().await;
        }
        self.served
            .get(&peer)
            .map(|blocks| blocks.clone())
            .ok_or_else(|| anyhow!("peer {peer} not connected"))
    }
}

#[async_trait]
impl Network for MemoryNetwork {
    async fn forward_block(&self, hash: BlockHash, exclude: Option<PeerId>) -> Result<()> {
        self.forwarded.lock().unwrap().push((hash, exclude));
        Ok(())
    }

    fn available_nodes(&self) -> Vec<Node> {
        self.nodes.lock().unwrap().clone()
    }

    fn network_best(&self) -> Option<NetworkBest> {
        self.best.lock().unwrap().clone()
    }

    async fn fetch_block(&self, peer: PeerId, hash: BlockHash) -> Result<Option<Arc<Block>>> {
        let blocks = self.answer(peer).await?;
        Ok(blocks.into_iter().find(|b| b.hash() == hash))
    }

    async fn fetch_blocks(&self, peer: PeerId, from: u64, to: u64) -> Result<Vec<Arc<Block>>> {
        let blocks = self.answer(peer).await?;
        Ok(blocks
            .into_iter()
            .filter(|b| (from..=to).contains(&b.height()))
            .collect())
    }

    async fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MemoryTransactionService {
    conflict: Mutex<Option<String>>,
    rejected: Mutex<HashSet<TxHash>>,
    received: Mutex<Vec<Transaction>>,
    forwarded: Mutex<Vec<(TxHash, Option<PeerId>)>>,
}

impl MemoryTransactionService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make conflict detection fail with `reason`
    pub fn report_conflict(&self, reason: &str) {
        *self.conflict.lock().unwrap() = Some(reason.to_string());
    }

    /// Refuse this transaction on intake
    pub fn reject(&self, tx: TxHash) {
        self.rejected.lock().unwrap().insert(tx);
    }

    pub fn received(&self) -> Vec<Transaction> {
        self.received.lock().unwrap().clone()
    }

    pub fn forwarded(&self) -> Vec<(TxHash, Option<PeerId>)> {
        self.forwarded.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionService for MemoryTransactionService {
    fn conflict_detect(&self, _txs: &[Transaction]) -> Result<()> {
        match self.conflict.lock().unwrap().as_ref() {
            Some(reason) => bail!("{reason}"),
            None => Ok(()),
        }
    }

    async fn new_tx(&self, tx: Transaction) -> Result<()> {
        if self.rejected.lock().unwrap().contains(&tx.hash) {
            bail!("transaction {} refused", tx.hash.short());
        }
        self.received.lock().unwrap().push(tx);
        Ok(())
    }

    async fn forward_tx(&self, tx: &Transaction, exclude: Option<PeerId>) -> Result<bool> {
        self.forwarded.lock().unwrap().push((tx.hash, exclude));
        Ok(true)
    }
}
