//! Orphan pool: blocks whose parent is not yet known locally.
//!
//! Entries are keyed by the hash of the missing parent so that when the
//! parent is committed its children can be drained in one lookup. The pool
//! is bounded: the oldest arrival is evicted once `capacity` is reached, and
//! entries older than `max-age` are purged.

pub mod configuration;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use kestrel_common::{Block, BlockContainer, BlockContainerStatus, BlockHash, PeerId};
use tracing::debug;

use crate::configuration::OrphanPoolConfig;

/// A block waiting for its parent
#[derive(Clone, Debug)]
pub struct OrphanEntry {
    pub block: Arc<Block>,
    /// Download-mode orphans are re-offered as downloads
    pub status: BlockContainerStatus,
    pub node: Option<PeerId>,
    /// Unix millis at which the block was admitted
    pub arrived_at: u64,
    seq: u64,
}

impl OrphanEntry {
    pub fn into_container(self) -> BlockContainer {
        BlockContainer {
            block: self.block,
            status: self.status,
            node: self.node,
        }
    }
}

pub struct OrphanPool {
    /// Entries grouped by the parent they wait for, each group in arrival order
    by_parent: HashMap<BlockHash, Vec<OrphanEntry>>,
    /// Arrival sequence -> (parent, block hash); oldest first
    arrivals: BTreeMap<u64, (BlockHash, BlockHash)>,
    /// Block hash -> arrival sequence
    index: HashMap<BlockHash, u64>,
    next_seq: u64,
    config: OrphanPoolConfig,
}

impl OrphanPool {
    pub fn new(config: OrphanPoolConfig) -> Self {
        Self {
            by_parent: HashMap::new(),
            arrivals: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.index.contains_key(hash)
    }

    /// Admit a block. Returns false if it is already held.
    pub fn add(&mut self, container: &BlockContainer, now: u64) -> bool {
        let block = &container.block;
        let hash = block.hash();
        if self.contains(&hash) {
            return false;
        }

        while self.len() >= self.config.capacity.max(1) {
            if !self.evict_oldest() {
                break;
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let parent = block.previous_hash();
        self.by_parent.entry(parent).or_default().push(OrphanEntry {
            block: block.clone(),
            status: container.status,
            node: container.node,
            arrived_at: now,
            seq,
        });
        self.arrivals.insert(seq, (parent, hash));
        self.index.insert(hash, seq);
        debug!(height = block.height(), hash = %hash.short(), parent = %parent.short(), "orphan held");
        true
    }

    /// Remove and return every block waiting on `parent`, oldest first
    pub fn take_children(&mut self, parent: &BlockHash) -> Vec<OrphanEntry> {
        let children = self.by_parent.remove(parent).unwrap_or_default();
        for child in &children {
            self.arrivals.remove(&child.seq);
            self.index.remove(&child.block.hash());
        }
        children
    }

    /// Drop entries that arrived more than `max-age` before `now`
    pub fn purge_expired(&mut self, now: u64) -> usize {
        let max_age = self.config.max_age_millis();
        let expired: Vec<(BlockHash, BlockHash)> = self
            .arrivals
            .values()
            .copied()
            .filter(|(parent, hash)| {
                self.entry(parent, hash)
                    .is_some_and(|e| now.saturating_sub(e.arrived_at) > max_age)
            })
            .collect();
        for (parent, hash) in &expired {
            self.remove(parent, hash);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "expired orphans purged");
        }
        expired.len()
    }

    /// Drop entries at or below `height`; they can no longer extend anything
    pub fn remove_below(&mut self, height: u64) -> usize {
        let stale: Vec<(BlockHash, BlockHash)> = self
            .by_parent
            .iter()
            .flat_map(|(parent, entries)| {
                entries
                    .iter()
                    .filter(|e| e.block.height() <= height)
                    .map(|e| (*parent, e.block.hash()))
            })
            .collect();
        for (parent, hash) in &stale {
            self.remove(parent, hash);
        }
        stale.len()
    }

    fn entry(&self, parent: &BlockHash, hash: &BlockHash) -> Option<&OrphanEntry> {
        self.by_parent.get(parent)?.iter().find(|e| e.block.hash() == *hash)
    }

    fn evict_oldest(&mut self) -> bool {
        let Some((_, (parent, hash))) = self.arrivals.first_key_value() else {
            return false;
        };
        let (parent, hash) = (*parent, *hash);
        debug!(hash = %hash.short(), "orphan pool full, evicting oldest");
        self.remove(&parent, &hash);
        true
    }

    fn remove(&mut self, parent: &BlockHash, hash: &BlockHash) {
        if let Some(seq) = self.index.remove(hash) {
            self.arrivals.remove(&seq);
        }
        if let Some(entries) = self.by_parent.get_mut(parent) {
            entries.retain(|e| e.block.hash() != *hash);
            if entries.is_empty() {
                self.by_parent.remove(parent);
            }
        }
    }
}

impl Default for OrphanPool {
    fn default() -> Self {
        Self::new(OrphanPoolConfig::default())
    }
}
