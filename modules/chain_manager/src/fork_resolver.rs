//! Placement of blocks that do not extend the master chain.
//!
//! A block is matched against the live fork chains first and then against
//! the master chain. Each chain is scanned from its tip backward: the first
//! header whose hash is the block's parent decides where the block goes.
//! First match wins; no weighting happens here.

use std::sync::Arc;

use kestrel_common::validation::ForkError;
use kestrel_common::{Block, BlockHeader, Chain, ChainContainer};
use tracing::debug;

/// Where a block ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForkResolution {
    /// Already held by the master chain or a fork
    Duplicate,
    /// Appended to the tip of an existing fork
    Extended,
    /// Continued a fork below its tip; a new fork holds the shared prefix
    /// plus the block
    Split,
    /// Started a new fork off the master chain
    Created,
    /// Parent found but the height does not follow it
    Malformed(ForkError),
    /// No chain knows the parent
    Unhandled,
}

impl ForkResolution {
    /// True when the block needs no further placement
    pub fn is_handled(&self) -> bool {
        !matches!(self, Self::Unhandled)
    }
}

/// Where the parent sits within a scanned chain
enum ParentMatch {
    At(usize),
    HeightMismatch(ForkError),
    NotFound,
}

/// Holds the set of live fork chains
#[derive(Default)]
pub struct ForkResolver {
    forks: Vec<ChainContainer>,
}

impl ForkResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chains(&self) -> &[ChainContainer] {
        &self.forks
    }

    pub fn len(&self) -> usize {
        self.forks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forks.is_empty()
    }

    pub fn check_and_add_fork_chain(&mut self, block: &Arc<Block>, master: &Chain) -> ForkResolution {
        let hash = block.hash();
        if master.contains(&hash) || self.forks.iter().any(|f| f.chain.contains(&hash)) {
            debug!(height = block.height(), hash = %hash.short(), "block already held");
            return ForkResolution::Duplicate;
        }

        match self.check_fork_chain_from_fork_chains(block) {
            ForkResolution::Unhandled => self.check_fork_chain_from_master_chain(block, master),
            resolution => resolution,
        }
    }

    fn check_fork_chain_from_fork_chains(&mut self, block: &Arc<Block>) -> ForkResolution {
        for index in 0..self.forks.len() {
            let chain = &self.forks[index].chain;
            match find_parent(chain, &block.header) {
                ParentMatch::NotFound => continue,
                ParentMatch::HeightMismatch(err) => return ForkResolution::Malformed(err),
                ParentMatch::At(position) if position + 1 == chain.len() => {
                    let fork = &mut self.forks[index].chain;
                    if let Err(e) = fork.push(block.clone()) {
                        // find_parent already matched hash and height
                        debug!("fork tip push refused: {e}");
                        return ForkResolution::Unhandled;
                    }
                    debug!(height = block.height(), fork_start = fork.start_height(), "fork extended");
                    return ForkResolution::Extended;
                }
                ParentMatch::At(position) => {
                    let mut split = chain.prefix(position);
                    if let Err(e) = split.push(block.clone()) {
                        debug!("fork split refused: {e}");
                        return ForkResolution::Unhandled;
                    }
                    debug!(
                        height = block.height(),
                        fork_start = split.start_height(),
                        "fork split"
                    );
                    self.forks.push(ChainContainer::candidate(split));
                    return ForkResolution::Split;
                }
            }
        }
        ForkResolution::Unhandled
    }

    fn check_fork_chain_from_master_chain(&mut self, block: &Arc<Block>, master: &Chain) -> ForkResolution {
        match find_parent(master, &block.header) {
            ParentMatch::NotFound => ForkResolution::Unhandled,
            ParentMatch::HeightMismatch(err) => ForkResolution::Malformed(err),
            ParentMatch::At(_) => {
                debug!(height = block.height(), hash = %block.hash().short(), "fork created from master");
                self.forks.push(ChainContainer::candidate(Chain::new(block.clone())));
                ForkResolution::Created
            }
        }
    }

    /// Drop forks whose tip is below `height`
    pub fn prune_below(&mut self, height: u64) -> usize {
        let before = self.forks.len();
        self.forks.retain(|f| f.chain.tip_height() >= height);
        let pruned = before - self.forks.len();
        if pruned > 0 {
            debug!(pruned, height, "stale forks pruned");
        }
        pruned
    }
}

/// Scan `chain` tip-first for the parent of `header`, stopping once the
/// scan drops below the block's height
fn find_parent(chain: &Chain, header: &BlockHeader) -> ParentMatch {
    for (index, candidate) in chain.headers_from_tip() {
        if candidate.hash == header.previous_hash {
            if candidate.height + 1 != header.height {
                return ParentMatch::HeightMismatch(ForkError::HeightMismatch {
                    parent_height: candidate.height,
                    height: header.height,
                });
            }
            return ParentMatch::At(index);
        } else if candidate.height < header.height {
            break;
        }
    }
    ParentMatch::NotFound
}
