//! Test helpers for Kestrel modules: in-memory implementations of every
//! collaborator interface and builders for linked blocks.

pub mod builder;
pub mod collaborators;
pub mod consensus;
pub mod contracts;
pub mod ledger;
pub mod local_chain;
pub mod mempool;
pub mod network;
pub mod store;

use kestrel_common::{Address, BlockHash};

pub use builder::{coin, coinbase, contract_call, transfer, ChainBuilder, BLOCK_INTERVAL_MS, GENESIS_TIME};
pub use collaborators::Collaborators;
pub use consensus::{ManualClock, MemoryVerifier, RecordingObserver, StaticProtocol, StaticRounds};
pub use contracts::{ContractEvent, MemoryContractEngine};
pub use ledger::MemoryLedger;
pub use local_chain::MemoryLocalChain;
pub use mempool::MemoryMempool;
pub use network::{MemoryNetwork, MemoryTransactionService};
pub use store::MemoryBlockStore;

/// Helper: create a BlockHash from a u8 value
pub fn hash(n: u8) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[0] = n;
    BlockHash::from(bytes)
}

/// Helper: a one-byte address
pub fn address(n: u8) -> Address {
    Address::new(vec![n])
}
