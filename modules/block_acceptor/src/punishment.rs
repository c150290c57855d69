//! Red punishments for producers caught double spending

use std::collections::{HashSet, VecDeque};

use anyhow::Result;
use kestrel_common::{
    Address, Agent, Block, BlockHeader, Coin, CoinData, Transaction, TxHash, TxType,
};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PunishReason {
    DoubleSpend,
}

/// The offending block reduced to its header, its transaction hashes and
/// the transactions found to conflict with the ledger
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Evidence {
    pub header: BlockHeader,
    pub tx_hashes: Vec<TxHash>,
    pub conflicting: Vec<Transaction>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PunishmentRecord {
    pub address: Address,
    pub evidence: Evidence,
    pub reason: PunishReason,
    /// Unix millis until which the agent's deposit stays locked
    pub lock_until: u64,
}

impl PunishmentRecord {
    pub fn double_spend(agent: &Agent, block: &Block, conflicting: Vec<Transaction>, lock_ms: u64) -> Self {
        Self {
            address: agent.agent_address.clone(),
            evidence: Evidence {
                header: block.header.clone(),
                tx_hashes: block.tx_hashes(),
                conflicting,
            },
            reason: PunishReason::DoubleSpend,
            lock_until: block.header.time.saturating_add(lock_ms),
        }
    }

    /// Red-punish system transaction re-locking the agent's deposit
    pub fn to_transaction(&self, agent: &Agent) -> Result<Transaction> {
        let data = serde_json::to_vec(self)?;
        let coin_data = CoinData {
            inputs: Vec::new(),
            outputs: vec![Coin {
                owner: agent.agent_address.clone(),
                amount: agent.deposit,
                lock_time: self.lock_until,
            }],
        };
        Ok(Transaction::new(TxType::RED_PUNISH, self.evidence.header.time, coin_data, data))
    }
}

/// Bounded memory of punishments already issued, oldest forgotten first
pub struct IssuedPunishments {
    order: VecDeque<TxHash>,
    issued: HashSet<TxHash>,
    capacity: usize,
}

impl IssuedPunishments {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            issued: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Remember `hash`. Returns false if it was already issued.
    pub fn record(&mut self, hash: TxHash) -> bool {
        if !self.issued.insert(hash) {
            return false;
        }
        self.order.push_back(hash);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.issued.remove(&oldest);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// First active agent whose packing address matches `producer`
pub fn find_active_agent<'a>(agents: &'a [Agent], producer: &Address) -> Option<&'a Agent> {
    agents.iter().find(|a| a.is_active() && a.packing_address == *producer)
}
