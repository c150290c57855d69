//! Kestrel transaction relay
//! Takes transactions announced by peers, hands them to the transaction
//! service and passes accepted ones on to the rest of the network.

pub mod configuration;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use kestrel_common::interfaces::TransactionService;
use kestrel_common::{PeerId, Transaction};
use tracing::{debug, info};

use crate::configuration::RelayConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// System transactions only arrive inside blocks
    Ignored,
    Rejected,
    Relayed { forwarded: bool },
}

/// Counters since the relay started
#[derive(Debug, Default)]
pub struct RelayStats {
    received: AtomicU64,
    ignored: AtomicU64,
    rejected: AtomicU64,
    forwarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelaySnapshot {
    pub received: u64,
    pub ignored: u64,
    pub rejected: u64,
    pub forwarded: u64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelaySnapshot {
        RelaySnapshot {
            received: self.received.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
        }
    }
}

pub struct TxRelay {
    transactions: Arc<dyn TransactionService>,
    stats: RelayStats,
    last_report: Mutex<Instant>,
    config: RelayConfig,
}

impl TxRelay {
    pub fn new(transactions: Arc<dyn TransactionService>, config: RelayConfig) -> Self {
        Self {
            transactions,
            stats: RelayStats::default(),
            last_report: Mutex::new(Instant::now()),
            config,
        }
    }

    /// Handle a transaction received from `from`
    pub async fn on_transaction(&self, tx: Transaction, from: Option<PeerId>) -> RelayOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        self.maybe_report();

        if tx.is_system() {
            self.stats.ignored.fetch_add(1, Ordering::Relaxed);
            debug!(tx = %tx.hash.short(), tx_type = %tx.tx_type, "system transaction ignored");
            return RelayOutcome::Ignored;
        }

        let hash = tx.hash;
        if let Err(e) = self.transactions.new_tx(tx.clone()).await {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            debug!(tx = %hash.short(), "transaction refused: {e:#}");
            return RelayOutcome::Rejected;
        }

        let forwarded = match self.transactions.forward_tx(&tx, from).await {
            Ok(forwarded) => forwarded,
            Err(e) => {
                debug!(tx = %hash.short(), "forward failed: {e:#}");
                false
            }
        };
        if forwarded {
            self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
        }
        RelayOutcome::Relayed { forwarded }
    }

    pub fn stats(&self) -> RelaySnapshot {
        self.stats.snapshot()
    }

    fn maybe_report(&self) {
        let mut last = self.last_report.lock().unwrap_or_else(PoisonError::into_inner);
        if last.elapsed() < self.config.report_interval() {
            return;
        }
        *last = Instant::now();
        let s = self.stats.snapshot();
        info!(
            received = s.received,
            ignored = s.ignored,
            rejected = s.rejected,
            forwarded = s.forwarded,
            "transaction relay"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_test_utils::{coinbase, contract_call, MemoryTransactionService};

    fn relay() -> (TxRelay, Arc<MemoryTransactionService>) {
        let service = Arc::new(MemoryTransactionService::new());
        (TxRelay::new(service.clone(), RelayConfig::default()), service)
    }

    #[tokio::test]
    async fn system_transactions_are_ignored() {
        let (relay, service) = relay();

        let outcome = relay.on_transaction(coinbase(4, 1_000, 1), Some(PeerId(3))).await;

        assert_eq!(outcome, RelayOutcome::Ignored);
        assert!(service.received().is_empty());
        assert!(service.forwarded().is_empty());
        assert_eq!(relay.stats().ignored, 1);
    }

    #[tokio::test]
    async fn accepted_transaction_is_forwarded_excluding_origin() {
        let (relay, service) = relay();
        let tx = contract_call(1);

        let outcome = relay.on_transaction(tx.clone(), Some(PeerId(3))).await;

        assert_eq!(outcome, RelayOutcome::Relayed { forwarded: true });
        assert_eq!(service.received(), vec![tx.clone()]);
        assert_eq!(service.forwarded(), vec![(tx.hash, Some(PeerId(3)))]);
        assert_eq!(
            relay.stats(),
            RelaySnapshot {
                received: 1,
                ignored: 0,
                rejected: 0,
                forwarded: 1,
            }
        );
    }

    #[tokio::test]
    async fn refused_transaction_is_not_forwarded() {
        let (relay, service) = relay();
        let tx = contract_call(2);
        service.reject(tx.hash);

        assert_eq!(relay.on_transaction(tx, None).await, RelayOutcome::Rejected);
        assert!(service.forwarded().is_empty());
        assert_eq!(relay.stats().rejected, 1);
    }
}
