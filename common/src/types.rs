//! Kestrel chain value types: blocks, headers, transactions and coins

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::hash::{BlockHash, Hash, StateRoot, TxHash};

/// Opaque account / producer address
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(Vec<u8>);

impl Address {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

/// Identifier of a connected peer
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// A connected network node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub id: PeerId,
    pub address: String,
}

/// Transaction type tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxType(pub u16);

impl TxType {
    pub const COINBASE: Self = Self(1);
    pub const TRANSFER: Self = Self(2);
    pub const ALIAS: Self = Self(3);
    pub const REGISTER_AGENT: Self = Self(4);
    pub const DEPOSIT: Self = Self(5);
    pub const CANCEL_DEPOSIT: Self = Self(6);
    pub const YELLOW_PUNISH: Self = Self(7);
    pub const RED_PUNISH: Self = Self(8);
    pub const STOP_AGENT: Self = Self(9);
    pub const CREATE_CONTRACT: Self = Self(100);
    pub const CALL_CONTRACT: Self = Self(101);
    pub const DELETE_CONTRACT: Self = Self(102);
    pub const CONTRACT_TRANSFER: Self = Self(103);

    /// Produced by consensus or the contract engine rather than by a user
    pub fn is_system(self) -> bool {
        matches!(
            self,
            Self::COINBASE | Self::YELLOW_PUNISH | Self::RED_PUNISH | Self::CONTRACT_TRANSFER
        )
    }

    pub fn is_contract(self) -> bool {
        matches!(
            self,
            Self::CREATE_CONTRACT
                | Self::CALL_CONTRACT
                | Self::DELETE_CONTRACT
                | Self::CONTRACT_TRANSFER
        )
    }

    /// Contract transactions that are charged gas
    pub fn consumes_gas(self) -> bool {
        matches!(self, Self::CREATE_CONTRACT | Self::CALL_CONTRACT)
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to an output of an earlier transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CoinRef {
    pub tx_hash: TxHash,
    pub index: u32,
}

impl CoinRef {
    pub fn new(tx_hash: TxHash, index: u32) -> Self {
        Self { tx_hash, index }
    }
}

/// An output: value locked to an owner
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    pub owner: Address,
    pub amount: u64,
    /// Unix millis (or height, by convention of the ledger) until which the coin is locked
    pub lock_time: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinData {
    pub inputs: Vec<CoinRef>,
    pub outputs: Vec<Coin>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_type: TxType,
    pub hash: TxHash,
    pub time: u64,
    pub coin_data: CoinData,
    /// Type-specific payload
    pub data: Vec<u8>,
}

impl Transaction {
    /// Build a transaction and derive its hash from the content
    pub fn new(tx_type: TxType, time: u64, coin_data: CoinData, data: Vec<u8>) -> Self {
        let hash = Self::compute_hash(tx_type, time, &coin_data, &data);
        Self {
            tx_type,
            hash,
            time,
            coin_data,
            data,
        }
    }

    pub fn compute_hash(tx_type: TxType, time: u64, coin_data: &CoinData, data: &[u8]) -> TxHash {
        let mut bytes = Vec::with_capacity(64 + data.len());
        bytes.extend_from_slice(&tx_type.0.to_be_bytes());
        bytes.extend_from_slice(&time.to_be_bytes());
        for input in &coin_data.inputs {
            bytes.extend_from_slice(input.tx_hash.as_ref());
            bytes.extend_from_slice(&input.index.to_be_bytes());
        }
        for output in &coin_data.outputs {
            bytes.extend_from_slice(output.owner.as_bytes());
            bytes.extend_from_slice(&output.amount.to_be_bytes());
            bytes.extend_from_slice(&output.lock_time.to_be_bytes());
        }
        bytes.extend_from_slice(data);
        TxHash::digest(bytes)
    }

    pub fn is_system(&self) -> bool {
        self.tx_type.is_system()
    }

    pub fn is_contract(&self) -> bool {
        self.tx_type.is_contract()
    }

    pub fn consumes_gas(&self) -> bool {
        self.tx_type.consumes_gas()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: BlockHash,
    pub previous_hash: BlockHash,
    /// Unix millis
    pub time: u64,
    /// Packing address of the producer
    pub producer: Address,
    pub state_root: Option<StateRoot>,
    pub merkle_root: Hash<32>,
    pub tx_count: u32,
    pub signature: Vec<u8>,
}

impl BlockHeader {
    /// Hash over every header field except the hash and signature
    pub fn compute_hash(&self) -> BlockHash {
        let mut bytes = Vec::with_capacity(160);
        bytes.extend_from_slice(&self.height.to_be_bytes());
        bytes.extend_from_slice(self.previous_hash.as_ref());
        bytes.extend_from_slice(&self.time.to_be_bytes());
        bytes.extend_from_slice(self.producer.as_bytes());
        if let Some(root) = &self.state_root {
            bytes.extend_from_slice(root.as_ref());
        }
        bytes.extend_from_slice(self.merkle_root.as_ref());
        bytes.extend_from_slice(&self.tx_count.to_be_bytes());
        BlockHash::digest(bytes)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
}

impl Block {
    /// Assemble a block, deriving its merkle root and hash from the content
    pub fn new(
        height: u64,
        previous_hash: BlockHash,
        time: u64,
        producer: Address,
        state_root: Option<StateRoot>,
        txs: Vec<Transaction>,
    ) -> Self {
        let mut header = BlockHeader {
            height,
            hash: BlockHash::default(),
            previous_hash,
            time,
            producer,
            state_root,
            merkle_root: Self::merkle_root_of(&txs),
            tx_count: txs.len() as u32,
            signature: Vec::new(),
        };
        header.hash = header.compute_hash();
        Self { header, txs }
    }

    pub fn merkle_root_of(txs: &[Transaction]) -> Hash<32> {
        let mut bytes = Vec::with_capacity(txs.len() * 32);
        for tx in txs {
            bytes.extend_from_slice(tx.hash.as_ref());
        }
        Hash::digest(bytes)
    }

    pub fn hash(&self) -> BlockHash {
        self.header.hash
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn previous_hash(&self) -> BlockHash {
        self.header.previous_hash
    }

    pub fn tx_hashes(&self) -> Vec<TxHash> {
        self.txs.iter().map(|tx| tx.hash).collect()
    }
}

/// How a block arrived at the node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockContainerStatus {
    /// Relayed live by a peer
    Received,
    /// Fetched as part of a catch-up download
    Downloading,
}

/// A candidate block together with its admission context
#[derive(Clone, Debug)]
pub struct BlockContainer {
    pub block: Arc<Block>,
    pub status: BlockContainerStatus,
    pub node: Option<PeerId>,
}

impl BlockContainer {
    pub fn received(block: Arc<Block>, node: Option<PeerId>) -> Self {
        Self {
            block,
            status: BlockContainerStatus::Received,
            node,
        }
    }

    pub fn downloading(block: Arc<Block>, node: Option<PeerId>) -> Self {
        Self {
            block,
            status: BlockContainerStatus::Downloading,
            node,
        }
    }

    pub fn is_download(&self) -> bool {
        self.status == BlockContainerStatus::Downloading
    }
}

/// A registered block producer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_address: Address,
    pub packing_address: Address,
    /// Amount bonded by the agent itself
    pub deposit: u64,
    /// Height at which the agent was stopped, if any
    pub deleted_height: Option<u64>,
}

impl Agent {
    pub fn is_active(&self) -> bool {
        self.deleted_height.is_none()
    }
}

/// Round and member data under which a block was judged valid
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundContext {
    pub round_index: u64,
    pub round_start: u64,
    pub member_count: u32,
    pub member_index: u32,
    pub member_address: Address,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(n: u8) -> Transaction {
        Transaction::new(
            TxType::TRANSFER,
            1_000,
            CoinData {
                inputs: vec![CoinRef::new(TxHash::new([n; 32]), 0)],
                outputs: vec![Coin {
                    owner: Address::new(vec![n]),
                    amount: 10,
                    lock_time: 0,
                }],
            },
            Vec::new(),
        )
    }

    #[test]
    fn tx_type_classification() {
        assert!(TxType::COINBASE.is_system());
        assert!(TxType::RED_PUNISH.is_system());
        assert!(!TxType::TRANSFER.is_system());
        assert!(TxType::CALL_CONTRACT.is_contract());
        assert!(TxType::CALL_CONTRACT.consumes_gas());
        assert!(TxType::CONTRACT_TRANSFER.is_contract());
        assert!(!TxType::CONTRACT_TRANSFER.consumes_gas());
        assert!(!TxType::DELETE_CONTRACT.consumes_gas());
    }

    #[test]
    fn block_hash_covers_content() {
        let a = Block::new(1, BlockHash::default(), 10, Address::new(vec![1]), None, vec![transfer(1)]);
        let b = Block::new(1, BlockHash::default(), 10, Address::new(vec![1]), None, vec![transfer(2)]);
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.header.compute_hash(), a.hash());
        assert_eq!(a.header.tx_count, 1);
    }

    #[test]
    fn state_root_changes_block_hash() {
        let a = Block::new(1, BlockHash::default(), 10, Address::new(vec![1]), None, vec![]);
        let b = Block::new(
            1,
            BlockHash::default(),
            10,
            Address::new(vec![1]),
            Some(StateRoot::digest(b"root")),
            vec![],
        );
        assert_ne!(a.hash(), b.hash());
    }
}
