//! Collect worker: puts downloaded blocks back in height order and feeds
//! them to the local chain.

use std::collections::BTreeMap;
use std::sync::Arc;

use kestrel_common::interfaces::LocalChain;
use kestrel_common::{Block, BlockContainer, PeerId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::request::Delivery;
use crate::sync_error::SyncError;

/// Height reached, or why the session stopped short
pub type CollectResult = Result<u64, SyncError>;

pub struct CollectWorker {
    chain: Arc<dyn LocalChain>,
    next: u64,
    target: u64,
    buffer: BTreeMap<u64, (Arc<Block>, PeerId)>,
}

impl CollectWorker {
    pub fn new(chain: Arc<dyn LocalChain>, from: u64, target: u64) -> Self {
        Self {
            chain,
            next: from,
            target,
            buffer: BTreeMap::new(),
        }
    }

    pub async fn run(mut self, mut deliveries: mpsc::Receiver<Delivery>, done: oneshot::Sender<CollectResult>) {
        let result = self.collect(&mut deliveries).await;
        match &result {
            Ok(height) => info!(height, "download complete"),
            Err(e) => warn!("download stopped: {e}"),
        }
        let _ = done.send(result);
    }

    async fn collect(&mut self, deliveries: &mut mpsc::Receiver<Delivery>) -> CollectResult {
        if self.next > self.target {
            return Ok(self.target);
        }
        while let Some(delivery) = deliveries.recv().await {
            match delivery {
                Delivery::Blocks { peer, blocks } => {
                    for block in blocks {
                        self.buffer_block(block, peer);
                    }
                    self.drain().await?;
                    if self.next > self.target {
                        return Ok(self.target);
                    }
                }
                Delivery::Failed { from, to, error } => {
                    if to >= self.next {
                        debug!(from, to, "range failed");
                        return Err(error);
                    }
                }
            }
        }
        Err(SyncError::Gap { height: self.next })
    }

    /// Keep the first copy of each height still ahead of the chain
    fn buffer_block(&mut self, block: Arc<Block>, peer: PeerId) {
        let height = block.height();
        if height < self.next || height > self.target {
            debug!(height, "stale block dropped");
            return;
        }
        self.buffer.entry(height).or_insert((block, peer));
    }

    /// Offer buffered blocks while they continue the chain
    async fn drain(&mut self) -> Result<(), SyncError> {
        while let Some((block, peer)) = self.buffer.remove(&self.next) {
            let height = block.height();
            let hash = block.hash();
            if !self.chain.add_block(BlockContainer::downloading(block, Some(peer))).await {
                return Err(SyncError::Rejected { height, hash });
            }
            self.next += 1;
        }
        Ok(())
    }
}
