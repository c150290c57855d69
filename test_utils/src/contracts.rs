use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{bail, Result};
use kestrel_common::interfaces::{ContractBlockContext, ContractEngine, ContractResult};
use kestrel_common::{CoinAccumulator, StateRoot, Transaction, TxHash};

pub const DEFAULT_GAS: u64 = 1_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContractEvent {
    TempBalanceCreated,
    BatchCreated(Option<StateRoot>),
    BlockSet(u64),
    Executed(TxHash),
    Committed,
    TempBalanceRemoved,
    BatchRemoved,
}

/// Contract engine whose results are scripted per transaction
#[derive(Default)]
pub struct MemoryContractEngine {
    events: Mutex<Vec<ContractEvent>>,
    results: Mutex<HashMap<TxHash, ContractResult>>,
    failing: Mutex<HashSet<TxHash>>,
    commit_root: Mutex<Option<StateRoot>>,
}

impl MemoryContractEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, tx: TxHash, result: ContractResult) {
        self.results.lock().unwrap().insert(tx, result);
    }

    pub fn fail(&self, tx: TxHash) {
        self.failing.lock().unwrap().insert(tx);
    }

    pub fn set_commit_root(&self, root: Option<StateRoot>) {
        *self.commit_root.lock().unwrap() = root;
    }

    pub fn events(&self) -> Vec<ContractEvent> {
        self.events.lock().unwrap().clone()
    }

    /// True while a temp balance or batch is created but not yet removed
    pub fn overlays_open(&self) -> bool {
        let events = self.events();
        let count = |e: &ContractEvent| events.iter().filter(|x| *x == e).count();
        let batches = events
            .iter()
            .filter(|e| matches!(e, ContractEvent::BatchCreated(_)))
            .count();
        count(&ContractEvent::TempBalanceCreated) != count(&ContractEvent::TempBalanceRemoved)
            || batches != count(&ContractEvent::BatchRemoved)
    }

    pub fn sessions_opened(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| **e == ContractEvent::TempBalanceCreated)
            .count()
    }

    fn push(&self, event: ContractEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl ContractEngine for MemoryContractEngine {
    fn create_temp_balance(&self) -> Result<()> {
        self.push(ContractEvent::TempBalanceCreated);
        Ok(())
    }

    fn create_batch_execution(&self, state_root: Option<StateRoot>) -> Result<()> {
        self.push(ContractEvent::BatchCreated(state_root));
        Ok(())
    }

    fn set_current_block(&self, context: ContractBlockContext) -> Result<()> {
        self.push(ContractEvent::BlockSet(context.height));
        Ok(())
    }

    fn execute(
        &self,
        tx: &Transaction,
        _best_height: u64,
        _acc: &CoinAccumulator,
    ) -> Result<Option<ContractResult>> {
        self.push(ContractEvent::Executed(tx.hash));
        if self.failing.lock().unwrap().contains(&tx.hash) {
            bail!("contract reverted");
        }
        let scripted = self.results.lock().unwrap().get(&tx.hash).cloned();
        Ok(Some(scripted.unwrap_or(ContractResult {
            state_root: None,
            gas_used: DEFAULT_GAS,
        })))
    }

    fn commit_batch_execution(&self) -> Result<Option<StateRoot>> {
        self.push(ContractEvent::Committed);
        Ok(*self.commit_root.lock().unwrap())
    }

    fn remove_temp_balance(&self) {
        self.push(ContractEvent::TempBalanceRemoved);
    }

    fn remove_batch_execution(&self) {
        self.push(ContractEvent::BatchRemoved);
    }
}
