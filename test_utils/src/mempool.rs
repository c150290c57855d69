use std::sync::Mutex;

use anyhow::Result;
use dashmap::DashMap;
use kestrel_common::interfaces::Mempool;
use kestrel_common::{Block, Transaction, TxHash};

#[derive(Default)]
pub struct MemoryMempool {
    pool: DashMap<TxHash, Transaction>,
    punishments: Mutex<Vec<Transaction>>,
}

impl MemoryMempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tx: Transaction) {
        self.pool.insert(tx.hash, tx);
    }

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.pool.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn punishments(&self) -> Vec<Transaction> {
        self.punishments.lock().unwrap().clone()
    }
}

impl Mempool for MemoryMempool {
    fn add_punishment_tx(&self, tx: Transaction) -> Result<()> {
        self.punishments.lock().unwrap().push(tx.clone());
        self.insert(tx);
        Ok(())
    }

    fn remove_confirmed_txs(&self, block: &Block) -> Result<()> {
        for tx in &block.txs {
            self.pool.remove(&tx.hash);
        }
        Ok(())
    }
}
