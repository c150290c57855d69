// Kestrel common library - main library exports

pub mod accumulator;
pub mod best_block;
pub mod chain;
pub mod configuration;
pub mod hash;
pub mod interfaces;
pub mod status;
pub mod types;
pub mod validation;

// Flattened re-exports
pub use self::accumulator::CoinAccumulator;
pub use self::best_block::BestBlock;
pub use self::chain::{Chain, ChainContainer, ChainLinkError, ChainStatus};
pub use self::hash::{BlockHash, Hash, StateRoot, TxHash};
pub use self::status::{ConsensusStatus, SharedConsensusStatus};
pub use self::types::*;
