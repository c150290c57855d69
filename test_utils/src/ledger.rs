use std::sync::Mutex;

use anyhow::{bail, Result};
use dashmap::DashMap;
use kestrel_common::interfaces::{DoubleSpendCheck, Ledger};
use kestrel_common::{Block, BlockHash, Coin, CoinAccumulator, CoinRef, Transaction};

/// Ledger over an in-memory unspent set. Double spends against the chain
/// are scripted rather than derived.
#[derive(Default)]
pub struct MemoryLedger {
    unspent: DashMap<CoinRef, Coin>,
    double_spend: Mutex<Option<Vec<Transaction>>>,
    rolled_back: Mutex<Vec<BlockHash>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fund(&self, coin_ref: CoinRef, coin: Coin) {
        self.unspent.insert(coin_ref, coin);
    }

    /// Report the given transactions as already spent on chain
    pub fn report_double_spend(&self, conflicting: Vec<Transaction>) {
        *self.double_spend.lock().unwrap() = Some(conflicting);
    }

    pub fn clear_double_spend(&self) {
        *self.double_spend.lock().unwrap() = None;
    }

    pub fn rolled_back(&self) -> Vec<BlockHash> {
        self.rolled_back.lock().unwrap().clone()
    }
}

impl Ledger for MemoryLedger {
    fn verify_double_spend(&self, _block: &Block) -> Result<DoubleSpendCheck> {
        Ok(match self.double_spend.lock().unwrap().clone() {
            Some(conflicting) => DoubleSpendCheck::Repeated { conflicting },
            None => DoubleSpendCheck::Clean,
        })
    }

    fn verify_coin_data(&self, tx: &Transaction, acc: &mut CoinAccumulator) -> Result<()> {
        for input in &tx.coin_data.inputs {
            if acc.is_spent(input) {
                bail!("input {}:{} spent twice in block", input.tx_hash.short(), input.index);
            }
            if acc.claimed(input).is_none() && !self.unspent.contains_key(input) {
                bail!("input {}:{} unknown", input.tx_hash.short(), input.index);
            }
            acc.spend(*input);
        }
        acc.claim_outputs(tx);
        Ok(())
    }

    fn rollback_block(&self, block: &Block) -> Result<()> {
        self.rolled_back.lock().unwrap().push(block.hash());
        Ok(())
    }
}
