//! Transaction-level validation of a block that extended the master chain

use std::sync::Arc;

use kestrel_common::interfaces::{ContractBlockContext, ContractEngine};
use kestrel_common::validation::TxValidationError;
use kestrel_common::{Block, CoinAccumulator, RoundContext, StateRoot};
use kestrel_module_chain_manager::ChainManager;
use tracing::debug;

use crate::context::AcceptorContext;
use crate::signature_pool::SignaturePool;

/// Contract execution overlay for one block. Opening creates the temporary
/// balance area and the batch executor; both are released when the session
/// is finished or dropped, whichever comes first.
pub struct ContractSession {
    engine: Arc<dyn ContractEngine>,
    temp_balance: bool,
    batch: bool,
}

impl ContractSession {
    pub fn open(
        engine: Arc<dyn ContractEngine>,
        pre_state_root: Option<StateRoot>,
        block: ContractBlockContext,
    ) -> anyhow::Result<Self> {
        let mut session = Self {
            engine,
            temp_balance: false,
            batch: false,
        };
        session.engine.create_temp_balance()?;
        session.temp_balance = true;
        session.engine.create_batch_execution(pre_state_root)?;
        session.batch = true;
        session.engine.set_current_block(block)?;
        Ok(session)
    }

    pub fn engine(&self) -> &dyn ContractEngine {
        self.engine.as_ref()
    }

    /// Commit the batch and return the resulting state root
    pub fn finish(mut self) -> anyhow::Result<Option<StateRoot>> {
        self.release_temp_balance();
        let root = self.engine.commit_batch_execution();
        self.release_batch();
        root
    }

    fn release_temp_balance(&mut self) {
        if std::mem::take(&mut self.temp_balance) {
            self.engine.remove_temp_balance();
        }
    }

    fn release_batch(&mut self) {
        if std::mem::take(&mut self.batch) {
            self.engine.remove_batch_execution();
        }
    }
}

impl Drop for ContractSession {
    fn drop(&mut self) {
        self.release_temp_balance();
        self.release_batch();
    }
}

/// Run every transaction check on `block`, in order, stopping at the first
/// failure. `best` is the tip the block was built on.
pub async fn validate_transactions(
    context: &AcceptorContext,
    signatures: &SignaturePool,
    chain: &ChainManager,
    block: &Block,
    best: &Block,
    round: &RoundContext,
    max_block_gas: u64,
) -> Result<(), TxValidationError> {
    // Unknown types are refused before any contract state is touched
    if let Some(tx) = block.txs.iter().find(|tx| !context.protocol.supports_tx_type(tx.tx_type)) {
        return Err(TxValidationError::UnsupportedTxType {
            tx: tx.hash,
            tx_type: tx.tx_type,
        });
    }

    let signature_batch = signatures.dispatch(&block.txs);

    let mut acc = CoinAccumulator::new();
    let session = ContractSession::open(
        context.contracts.clone(),
        best.header.state_root,
        ContractBlockContext {
            height: block.height(),
            time: block.header.time,
            producer: block.header.producer.clone(),
        },
    )
    .map_err(|e| TxValidationError::ContractSession(format!("{e:#}")))?;

    let mut gas_used = 0u64;
    let mut derived_root: Option<StateRoot> = None;
    for tx in block.txs.iter().filter(|tx| !tx.is_system()) {
        if gas_used > max_block_gas && tx.consumes_gas() {
            return Err(TxValidationError::GasExceeded {
                tx: tx.hash,
                used: gas_used,
                limit: max_block_gas,
            });
        }

        context.ledger.verify_coin_data(tx, &mut acc).map_err(|e| TxValidationError::CoinData {
            tx: tx.hash,
            reason: format!("{e:#}"),
        })?;

        if tx.is_contract() {
            let result = session.engine().execute(tx, best.height(), &acc).map_err(|e| {
                TxValidationError::Contract {
                    tx: tx.hash,
                    reason: format!("{e:#}"),
                }
            })?;
            if let Some(result) = result {
                // The last result decides; an engine that re-derived the
                // root itself reports it here
                derived_root = result.state_root;
                gas_used = gas_used.saturating_add(result.gas_used);
            }
        }
    }

    let committed = session
        .finish()
        .map_err(|e| TxValidationError::ContractSession(format!("{e:#}")))?;
    let computed = derived_root.or(committed);
    if computed != block.header.state_root {
        return Err(TxValidationError::StateRootMismatch {
            declared: block.header.state_root,
            computed,
        });
    }

    if !chain.verify_coinbase(block, round) {
        return Err(TxValidationError::Coinbase);
    }

    context
        .transactions
        .conflict_detect(&block.txs)
        .map_err(|e| TxValidationError::Conflict(format!("{e:#}")))?;

    let report = signature_batch.join().await;
    if !report.all_valid() {
        return Err(TxValidationError::Signature);
    }

    debug!(
        txs = block.txs.len(),
        gas_used,
        spent = acc.spent_count(),
        "transactions validated"
    );
    Ok(())
}
