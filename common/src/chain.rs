//! Ordered runs of linked blocks and their lifecycle wrapper

use std::sync::Arc;

use imbl::Vector;

use crate::hash::BlockHash;
use crate::types::{Block, BlockHeader};

/// Errors raised when a block does not continue a chain
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainLinkError {
    #[error("height {got} does not follow tip height {tip}")]
    HeightGap { tip: u64, got: u64 },

    #[error("previous hash {previous} does not match tip {tip}")]
    PreviousHashMismatch { tip: BlockHash, previous: BlockHash },
}

/// A non-empty run of blocks, contiguous by height and hash linkage.
///
/// Backed by a persistent vector so that splitting a fork shares the
/// common prefix with the chain it was split from.
#[derive(Clone, Debug)]
pub struct Chain {
    blocks: Vector<Arc<Block>>,
}

impl Chain {
    /// Create a chain holding a single block
    pub fn new(first: Arc<Block>) -> Self {
        let mut blocks = Vector::new();
        blocks.push_back(first);
        Self { blocks }
    }

    /// Build a chain from already-linked blocks. Returns `None` for an empty
    /// run; fails if any adjacent pair is not linked.
    pub fn from_blocks(
        blocks: impl IntoIterator<Item = Arc<Block>>,
    ) -> Result<Option<Self>, ChainLinkError> {
        let mut iter = blocks.into_iter();
        let Some(first) = iter.next() else {
            return Ok(None);
        };
        let mut chain = Self::new(first);
        for block in iter {
            chain.push(block)?;
        }
        Ok(Some(chain))
    }

    /// Header of the first block held
    pub fn start_header(&self) -> &BlockHeader {
        &self.blocks[0].header
    }

    pub fn tip(&self) -> &Arc<Block> {
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn tip_header(&self) -> &BlockHeader {
        &self.tip().header
    }

    pub fn start_height(&self) -> u64 {
        self.start_header().height
    }

    pub fn tip_height(&self) -> u64 {
        self.tip_header().height
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always false; kept for API symmetry with collections
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Block>> {
        self.blocks.get(index)
    }

    /// Blocks in ascending height order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<Block>> + '_ {
        self.blocks.iter()
    }

    /// Headers with their index, from tip back to the start
    pub fn headers_from_tip(&self) -> impl Iterator<Item = (usize, &BlockHeader)> + '_ {
        self.blocks.iter().enumerate().rev().map(|(i, b)| (i, &b.header))
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.blocks.iter().any(|b| b.hash() == *hash)
    }

    pub fn find(&self, hash: &BlockHash) -> Option<&Arc<Block>> {
        self.blocks.iter().rev().find(|b| b.hash() == *hash)
    }

    pub fn block_hashes(&self) -> Vec<BlockHash> {
        self.blocks.iter().map(|b| b.hash()).collect()
    }

    /// Append a block that directly continues the tip
    pub fn push(&mut self, block: Arc<Block>) -> Result<(), ChainLinkError> {
        self.check_continues(&block.header)?;
        self.blocks.push_back(block);
        Ok(())
    }

    pub fn check_continues(&self, header: &BlockHeader) -> Result<(), ChainLinkError> {
        let tip = self.tip_header();
        if header.previous_hash != tip.hash {
            return Err(ChainLinkError::PreviousHashMismatch {
                tip: tip.hash,
                previous: header.previous_hash,
            });
        }
        if header.height != tip.height + 1 {
            return Err(ChainLinkError::HeightGap {
                tip: tip.height,
                got: header.height,
            });
        }
        Ok(())
    }

    /// Remove the tip. Refuses to remove the last remaining block.
    pub fn pop(&mut self) -> Option<Arc<Block>> {
        if self.blocks.len() <= 1 {
            return None;
        }
        self.blocks.pop_back()
    }

    /// New chain holding blocks `0..=index`, sharing structure with `self`
    pub fn prefix(&self, index: usize) -> Self {
        let end = (index + 1).min(self.blocks.len());
        Self {
            blocks: self.blocks.take(end),
        }
    }

    /// Drop blocks from the front so that at most `keep` remain
    pub fn retain_last(&mut self, keep: usize) -> usize {
        let keep = keep.max(1);
        let len = self.blocks.len();
        if len <= keep {
            return 0;
        }
        let dropped = len - keep;
        self.blocks = self.blocks.skip(dropped);
        dropped
    }
}

/// Lifecycle status of a chain held by the chain manager
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainStatus {
    /// Alternative branch held pending possible promotion
    Candidate,
    /// The node's canonical chain
    Master,
}

#[derive(Clone, Debug)]
pub struct ChainContainer {
    pub chain: Chain,
    pub status: ChainStatus,
}

impl ChainContainer {
    pub fn master(chain: Chain) -> Self {
        Self {
            chain,
            status: ChainStatus::Master,
        }
    }

    pub fn candidate(chain: Chain) -> Self {
        Self {
            chain,
            status: ChainStatus::Candidate,
        }
    }

    pub fn is_master(&self) -> bool {
        self.status == ChainStatus::Master
    }
}
