//! Parallel transaction signature checks.
//!
//! Checks run on a dedicated rayon pool owned by the acceptor. Each
//! transaction gets one task whose verdict comes back over a oneshot
//! channel; [`SignatureBatch::join`] is the barrier that collects them all.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::Result;
use kestrel_common::interfaces::BlockVerifier;
use kestrel_common::{Transaction, TxHash};
use rayon::ThreadPool;
use tokio::sync::oneshot;
use tracing::warn;

pub struct SignaturePool {
    pool: ThreadPool,
    verifier: Arc<dyn BlockVerifier>,
}

impl SignaturePool {
    pub fn new(threads: usize, verifier: Arc<dyn BlockVerifier>) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("sig-verify-{i}"))
            .build()?;
        Ok(Self { pool, verifier })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue one check per transaction and return without waiting
    pub fn dispatch(&self, txs: &[Transaction]) -> SignatureBatch {
        let pending = txs
            .iter()
            .map(|tx| {
                let (sender, receiver) = oneshot::channel();
                let tx = tx.clone();
                let hash = tx.hash;
                let verifier = self.verifier.clone();
                self.pool.spawn(move || {
                    // A panicking check is a failed check; rayon would abort otherwise
                    let valid = catch_unwind(AssertUnwindSafe(|| verifier.verify_transaction(&tx)))
                        .unwrap_or(false);
                    let _ = sender.send(valid);
                });
                (hash, receiver)
            })
            .collect();
        SignatureBatch { pending }
    }
}

/// Verdicts of one dispatched batch
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SignatureReport {
    pub checked: usize,
    pub failed: Vec<TxHash>,
}

impl SignatureReport {
    pub fn all_valid(&self) -> bool {
        self.failed.is_empty()
    }
}

/// In-flight checks. Dropping the batch abandons the results.
pub struct SignatureBatch {
    pending: Vec<(TxHash, oneshot::Receiver<bool>)>,
}

impl SignatureBatch {
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait for every check. A task that vanished without answering counts
    /// as failed.
    pub async fn join(self) -> SignatureReport {
        let mut report = SignatureReport::default();
        for (hash, receiver) in self.pending {
            report.checked += 1;
            match receiver.await {
                Ok(true) => {}
                Ok(false) => report.failed.push(hash),
                Err(_) => {
                    warn!(tx = %hash.short(), "signature task dropped");
                    report.failed.push(hash);
                }
            }
        }
        report
    }
}
