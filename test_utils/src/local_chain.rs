use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use kestrel_common::interfaces::LocalChain;
use kestrel_common::{Block, BlockContainer, BlockHash, BlockHeader};

/// A linear chain that takes any block continuing its tip
pub struct MemoryLocalChain {
    blocks: Mutex<Vec<Arc<Block>>>,
    rejected: Mutex<HashSet<BlockHash>>,
    offered: Mutex<Vec<BlockContainer>>,
    rollbacks: AtomicUsize,
}

impl MemoryLocalChain {
    pub fn new(blocks: Vec<Arc<Block>>) -> Self {
        Self {
            blocks: Mutex::new(blocks),
            rejected: Mutex::new(HashSet::new()),
            offered: Mutex::new(Vec::new()),
            rollbacks: AtomicUsize::new(0),
        }
    }

    pub fn reject(&self, hash: BlockHash) {
        self.rejected.lock().unwrap().insert(hash);
    }

    pub fn blocks(&self) -> Vec<Arc<Block>> {
        self.blocks.lock().unwrap().clone()
    }

    /// Heights offered through `add_block`, in offer order
    pub fn offered_heights(&self) -> Vec<u64> {
        self.offered.lock().unwrap().iter().map(|c| c.block.height()).collect()
    }

    pub fn all_offered_as_download(&self) -> bool {
        self.offered.lock().unwrap().iter().all(|c| c.is_download())
    }

    pub fn rollback_count(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalChain for MemoryLocalChain {
    async fn add_block(&self, container: BlockContainer) -> bool {
        let block = container.block.clone();
        self.offered.lock().unwrap().push(container);
        if self.rejected.lock().unwrap().contains(&block.hash()) {
            return false;
        }
        let mut blocks = self.blocks.lock().unwrap();
        let continues = blocks
            .last()
            .is_some_and(|tip| tip.hash() == block.previous_hash() && tip.height() + 1 == block.height());
        if continues {
            blocks.push(block);
        }
        continues
    }

    fn best_block(&self) -> Arc<Block> {
        self.blocks.lock().unwrap().last().cloned().expect("chain holds genesis")
    }

    fn block_header(&self, hash: &BlockHash) -> Result<Option<BlockHeader>> {
        let blocks = self.blocks.lock().unwrap();
        Ok(blocks.iter().find(|b| b.hash() == *hash).map(|b| b.header.clone()))
    }

    async fn rollback_best_block(&self) -> Result<Arc<Block>> {
        let mut blocks = self.blocks.lock().unwrap();
        if blocks.len() <= 1 {
            bail!("cannot roll back genesis");
        }
        blocks.pop();
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(blocks.last().cloned().expect("genesis remains"))
    }
}
