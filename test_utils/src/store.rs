use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use dashmap::DashMap;
use kestrel_common::interfaces::BlockStore;
use kestrel_common::{Block, BlockHash, BlockHeader};

/// Block store held in memory
#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: DashMap<BlockHash, Arc<Block>>,
    fail_saves: AtomicBool,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following save fail
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.blocks.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl BlockStore for MemoryBlockStore {
    fn save_block(&self, block: &Arc<Block>) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            bail!("disk full");
        }
        self.blocks.insert(block.hash(), block.clone());
        Ok(())
    }

    fn best_block(&self) -> Result<Option<Arc<Block>>> {
        Ok(self
            .blocks
            .iter()
            .max_by_key(|entry| entry.value().height())
            .map(|entry| entry.value().clone()))
    }

    fn block_header(&self, hash: &BlockHash) -> Result<Option<BlockHeader>> {
        Ok(self.blocks.get(hash).map(|b| b.header.clone()))
    }

    fn block_by_hash(&self, hash: &BlockHash) -> Result<Option<Arc<Block>>> {
        Ok(self.blocks.get(hash).map(|b| b.value().clone()))
    }

    fn remove_block(&self, hash: &BlockHash) -> Result<()> {
        self.blocks.remove(hash);
        Ok(())
    }
}
