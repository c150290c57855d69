//! Shared pointer to the node's current canonical tip

use std::sync::{Arc, PoisonError, RwLock};

use crate::hash::BlockHash;
use crate::types::Block;

/// Lock-guarded cell holding the best block.
///
/// Readers take a snapshot `Arc`; the guard is never held beyond the
/// accessor so it cannot straddle an await point.
#[derive(Debug)]
pub struct BestBlock {
    inner: RwLock<Arc<Block>>,
}

impl BestBlock {
    pub fn new(block: Arc<Block>) -> Self {
        Self {
            inner: RwLock::new(block),
        }
    }

    pub fn get(&self) -> Arc<Block> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the tip, returning the previous one
    pub fn set(&self, block: Arc<Block>) -> Arc<Block> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, block)
    }

    pub fn height(&self) -> u64 {
        self.get().height()
    }

    pub fn hash(&self) -> BlockHash {
        self.get().hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Address;

    #[test]
    fn set_returns_previous_tip() {
        let genesis = Arc::new(Block::new(0, BlockHash::default(), 0, Address::default(), None, vec![]));
        let next = Arc::new(Block::new(1, genesis.hash(), 1, Address::default(), None, vec![]));
        let best = BestBlock::new(genesis.clone());
        let previous = best.set(next.clone());
        assert_eq!(previous.hash(), genesis.hash());
        assert_eq!(best.height(), 1);
        assert_eq!(best.hash(), next.hash());
    }
}
