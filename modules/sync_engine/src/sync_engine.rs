//! Kestrel sync engine
//! Brings the local chain level with the network: decides whether the
//! local tip is usable, rolls back toward a common ancestor when it is not,
//! then downloads the missing range through a request and a collect worker.

pub mod collect;
pub mod configuration;
pub mod request;
pub mod sync_error;

use std::sync::Arc;

use kestrel_common::interfaces::{LocalChain, Network, NetworkBest};
use kestrel_common::{Block, Node, PeerId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::collect::CollectWorker;
use crate::configuration::SyncConfig;
use crate::request::RequestWorker;
use crate::sync_error::SyncError;

/// How a sync session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing to download
    CaughtUp,
    Completed { height: u64 },
    /// Give up for now; peers are kept
    Failed { reason: SyncError },
    /// The peer set cannot be trusted; the caller resets the network
    SessionAborted { reason: SyncError },
}

/// Verdict of comparing the local tip with the network best
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirstBlockCheck {
    /// Local chain already holds the network tip
    CaughtUp,
    /// The local tip is a common ancestor; download from it
    Download,
    Fail(SyncError),
    Abort(SyncError),
}

pub struct SyncEngine {
    network: Arc<dyn Network>,
    chain: Arc<dyn LocalChain>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(network: Arc<dyn Network>, chain: Arc<dyn LocalChain>, config: SyncConfig) -> Self {
        Self {
            network,
            chain,
            config,
        }
    }

    /// Run one session against the current network best. A session that
    /// aborts resets the network before returning.
    pub async fn synchronize(&self) -> SyncOutcome {
        let Some(best) = self.network.network_best() else {
            return SyncOutcome::Failed {
                reason: SyncError::NoNetworkBest,
            };
        };

        let span = info_span!("sync", target = best.height);
        let outcome = self.run(&best).instrument(span).await;
        if let SyncOutcome::SessionAborted { reason } = &outcome {
            warn!("sync session aborted, resetting network: {reason}");
            self.network.reset().await;
        }
        outcome
    }

    async fn run(&self, best: &NetworkBest) -> SyncOutcome {
        match self.check_first_block(best).await {
            FirstBlockCheck::CaughtUp => return SyncOutcome::CaughtUp,
            FirstBlockCheck::Fail(reason) => return SyncOutcome::Failed { reason },
            FirstBlockCheck::Abort(reason) => return SyncOutcome::SessionAborted { reason },
            FirstBlockCheck::Download => {}
        }

        let from = self.chain.best_block().height() + 1;
        if from > best.height {
            return SyncOutcome::CaughtUp;
        }
        let peers: Vec<PeerId> = best.nodes.iter().map(|n| n.id).collect();
        if peers.is_empty() {
            return SyncOutcome::Failed {
                reason: SyncError::NoPeers,
            };
        }
        self.download(peers, from, best.height).await
    }

    /// Decide whether the local tip can be downloaded from, rolling the
    /// local chain back first where it has diverged from the network
    pub async fn check_first_block(&self, best: &NetworkBest) -> FirstBlockCheck {
        let local = self.chain.best_block();

        if local.height() == 0 {
            return FirstBlockCheck::Download;
        }
        if local.height() == best.height && local.hash() == best.hash {
            return FirstBlockCheck::CaughtUp;
        }

        if best.height < local.height() {
            match self.chain.block_header(&best.hash) {
                Ok(Some(_)) => {
                    debug!(local = local.height(), network = best.height, "network tip already on local chain");
                    return FirstBlockCheck::CaughtUp;
                }
                Ok(None) => {}
                Err(e) => return FirstBlockCheck::Fail(SyncError::Store(format!("{e:#}"))),
            }
            if let Err(reason) = self.check_quorum(best) {
                return FirstBlockCheck::Abort(reason);
            }
            if let Err(reason) = self.roll_back_to(best.height, local.height() - best.height).await {
                return FirstBlockCheck::Fail(reason);
            }
        }

        match self.check_rollback(&best.nodes).await {
            Ok(rolled_back) => {
                if rolled_back > 0 {
                    info!(rolled_back, "common ancestor found");
                }
                FirstBlockCheck::Download
            }
            Err(reason) => FirstBlockCheck::Fail(reason),
        }
    }

    /// Rolling back toward a shorter chain needs enough connected peers,
    /// and enough of them reporting it
    fn check_quorum(&self, best: &NetworkBest) -> Result<(), SyncError> {
        let available = self.network.available_nodes().len();
        let reporting = best.nodes.len();
        let enough = available > 0
            && available >= self.config.min_connected_peers
            && reporting as f64 / available as f64 >= self.config.rollback_quorum_ratio;
        if enough {
            Ok(())
        } else {
            Err(SyncError::InsufficientQuorum { available, reporting })
        }
    }

    /// Roll back one block at a time until at `height`, at most `bound` times
    async fn roll_back_to(&self, height: u64, bound: u64) -> Result<(), SyncError> {
        for _ in 0..bound {
            if self.chain.best_block().height() <= height {
                break;
            }
            self.chain
                .rollback_best_block()
                .await
                .map_err(|e| SyncError::Rollback(format!("{e:#}")))?;
        }
        info!(height = self.chain.best_block().height(), "rolled back toward shorter network");
        Ok(())
    }

    /// Walk the local chain back until some peer confirms holding its tip.
    /// Returns the number of blocks rolled back.
    pub async fn check_rollback(&self, nodes: &[Node]) -> Result<u32, SyncError> {
        for attempt in 0..self.config.max_rollback_attempts {
            let local = self.chain.best_block();
            if local.height() == 0 || self.confirmed_by_peer(nodes, &local).await {
                return Ok(attempt);
            }
            if nodes.is_empty() {
                return Err(SyncError::NoPeers);
            }
            debug!(height = local.height(), "local tip unknown to peers, rolling back");
            self.chain
                .rollback_best_block()
                .await
                .map_err(|e| SyncError::Rollback(format!("{e:#}")))?;
        }

        let local = self.chain.best_block();
        if local.height() == 0 || self.confirmed_by_peer(nodes, &local).await {
            return Ok(self.config.max_rollback_attempts);
        }
        Err(SyncError::RollbackLimit {
            attempts: self.config.max_rollback_attempts,
        })
    }

    async fn confirmed_by_peer(&self, nodes: &[Node], local: &Block) -> bool {
        for node in nodes {
            let request = self.network.fetch_block(node.id, local.hash());
            match tokio::time::timeout(self.config.request_timeout(), request).await {
                Ok(Ok(Some(block))) if block.height() == local.height() => return true,
                Ok(Ok(_)) => {}
                Ok(Err(e)) => debug!(peer = %node.id, "block query failed: {e:#}"),
                Err(_) => debug!(peer = %node.id, "block query timed out"),
            }
        }
        false
    }

    /// Download `[from, to]`, waiting at most the session timeout
    async fn download(&self, peers: Vec<PeerId>, from: u64, to: u64) -> SyncOutcome {
        info!(from, to, peers = peers.len(), "downloading");
        let (sink, deliveries) = mpsc::channel(self.config.max_parallel.max(1) * 2);
        let (done_tx, done_rx) = oneshot::channel();

        let request = RequestWorker::new(self.network.clone(), peers, from, to, &self.config);
        let collect = CollectWorker::new(self.chain.clone(), from, to);
        let request_task = tokio::spawn(request.run(sink).instrument(info_span!("request")));
        // The collector is never aborted; it may be inside the acceptor and
        // stops on its own once the request side hangs up
        tokio::spawn(collect.run(deliveries, done_tx).instrument(info_span!("collect")));

        let result = tokio::time::timeout(self.config.session_timeout(), done_rx).await;
        request_task.abort();

        match result {
            Ok(Ok(Ok(height))) => SyncOutcome::Completed { height },
            Ok(Ok(Err(reason))) => SyncOutcome::Failed { reason },
            Ok(Err(_)) => SyncOutcome::Failed {
                reason: SyncError::WorkerStopped,
            },
            Err(_) => SyncOutcome::Failed {
                reason: SyncError::SessionTimeout {
                    secs: self.config.session_timeout_secs,
                },
            },
        }
    }
}
