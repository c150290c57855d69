//! Request worker: fetches a height range from the session's peers in
//! batches, a bounded number at a time.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kestrel_common::interfaces::Network;
use kestrel_common::{Block, PeerId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::configuration::SyncConfig;
use crate::sync_error::SyncError;

/// What the request worker hands to the collect worker
#[derive(Debug)]
pub enum Delivery {
    Blocks { peer: PeerId, blocks: Vec<Arc<Block>> },
    /// A range no peer could serve
    Failed { from: u64, to: u64, error: SyncError },
}

/// Split `[from, to]` into consecutive ranges of at most `size` heights
pub fn batches(from: u64, to: u64, size: u64) -> Vec<(u64, u64)> {
    let size = size.max(1);
    let mut ranges = Vec::new();
    let mut start = from;
    while start <= to {
        let end = start.saturating_add(size - 1).min(to);
        ranges.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    ranges
}

pub struct RequestWorker {
    network: Arc<dyn Network>,
    peers: Vec<PeerId>,
    from: u64,
    to: u64,
    batch_size: u64,
    max_parallel: usize,
    timeout: Duration,
    max_retries: u32,
}

impl RequestWorker {
    pub fn new(network: Arc<dyn Network>, peers: Vec<PeerId>, from: u64, to: u64, config: &SyncConfig) -> Self {
        Self {
            network,
            peers,
            from,
            to,
            batch_size: config.batch_size,
            max_parallel: config.max_parallel.max(1),
            timeout: config.request_timeout(),
            max_retries: config.max_retries,
        }
    }

    /// Request every batch, stopping early once the collector hangs up
    pub async fn run(self, sink: mpsc::Sender<Delivery>) {
        let ranges = batches(self.from, self.to, self.batch_size);
        debug!(batches = ranges.len(), peers = self.peers.len(), "requesting blocks");

        let worker = &self;
        let sink = &sink;
        futures::stream::iter(ranges.into_iter().enumerate())
            .for_each_concurrent(self.max_parallel, move |(index, (from, to))| async move {
                if let Some(failure) = worker.fetch_batch(index, from, to, sink).await {
                    let _ = sink.send(failure).await;
                }
            })
            .await;
    }

    /// Fetch one batch, starting from a round-robin peer and moving to the
    /// next on timeout, error or short answer. Blocks are delivered as they
    /// arrive; a range that stays unserved is returned as a failure.
    async fn fetch_batch(&self, index: usize, from: u64, to: u64, sink: &mpsc::Sender<Delivery>) -> Option<Delivery> {
        if self.peers.is_empty() {
            return Some(Delivery::Failed {
                from,
                to,
                error: SyncError::NoPeers,
            });
        }

        let mut missing: BTreeSet<u64> = (from..=to).collect();
        let attempts = self.max_retries.saturating_add(1);
        for attempt in 0..attempts {
            let Some(&next) = missing.first() else {
                return None;
            };
            let peer = self.peers[(index + attempt as usize) % self.peers.len()];

            let blocks = match tokio::time::timeout(self.timeout, self.network.fetch_blocks(peer, next, to)).await {
                Ok(Ok(blocks)) => blocks,
                Ok(Err(e)) => {
                    let error = SyncError::Peer {
                        peer,
                        reason: format!("{e:#}"),
                    };
                    warn!(attempt, "{error}");
                    continue;
                }
                Err(_) => {
                    warn!(attempt, "{}", SyncError::Timeout { peer, from: next, to });
                    continue;
                }
            };

            let blocks: Vec<_> = blocks.into_iter().filter(|b| missing.remove(&b.height())).collect();
            if !blocks.is_empty() && sink.send(Delivery::Blocks { peer, blocks }).await.is_err() {
                // Collector finished
                return None;
            }
            if !missing.is_empty() {
                debug!(%peer, missing = missing.len(), "short answer, retrying");
            }
        }

        if missing.is_empty() {
            return None;
        }
        Some(Delivery::Failed {
            from,
            to,
            error: SyncError::RangeUnavailable { from, to, attempts },
        })
    }
}
