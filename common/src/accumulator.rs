//! Per-block coin accounting state

use std::collections::{HashMap, HashSet};

use crate::types::{Coin, CoinRef, Transaction};

/// Outputs claimed and inputs spent so far while validating one block.
///
/// Owned by a single validation pass and handed `&mut` to the ledger for
/// each transaction in block order, then dropped with the pass.
#[derive(Debug, Default)]
pub struct CoinAccumulator {
    claimed: HashMap<CoinRef, Coin>,
    spent: HashSet<CoinRef>,
}

impl CoinAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output created earlier in the same block
    pub fn claimed(&self, coin: &CoinRef) -> Option<&Coin> {
        self.claimed.get(coin)
    }

    pub fn is_spent(&self, coin: &CoinRef) -> bool {
        self.spent.contains(coin)
    }

    /// Record an input as spent. Returns false if it already was.
    pub fn spend(&mut self, coin: CoinRef) -> bool {
        self.spent.insert(coin)
    }

    /// Make every output of `tx` available to later transactions
    pub fn claim_outputs(&mut self, tx: &Transaction) {
        for (index, output) in tx.coin_data.outputs.iter().enumerate() {
            self.claimed.insert(CoinRef::new(tx.hash, index as u32), output.clone());
        }
    }

    pub fn claimed_count(&self) -> usize {
        self.claimed.len()
    }

    pub fn spent_count(&self) -> usize {
        self.spent.len()
    }
}
