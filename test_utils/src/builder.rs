//! Builders for linked blocks and simple transactions

use std::sync::Arc;

use kestrel_common::{
    Block, BlockHash, Chain, Coin, CoinData, CoinRef, StateRoot, Transaction, TxType,
};

use crate::address;

pub const GENESIS_TIME: u64 = 1_700_000_000_000;
pub const BLOCK_INTERVAL_MS: u64 = 10_000;

/// Builds blocks linked to a fixed genesis. `variant` selects the producer
/// and nudges the timestamp, so siblings with different variants differ.
pub struct ChainBuilder {
    genesis: Arc<Block>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self {
            genesis: Arc::new(Block::new(0, BlockHash::default(), GENESIS_TIME, address(0), None, vec![])),
        }
    }

    pub fn genesis(&self) -> Arc<Block> {
        self.genesis.clone()
    }

    /// Genesis followed by `len - 1` children, all by producer 0
    pub fn blocks(&self, len: usize) -> Vec<Arc<Block>> {
        let mut blocks = vec![self.genesis()];
        if len > 1 {
            blocks.extend(self.extend(&self.genesis, len - 1, 0));
        }
        blocks
    }

    pub fn chain(&self, len: usize) -> Chain {
        let mut chain = Chain::new(self.genesis());
        for block in self.blocks(len).into_iter().skip(1) {
            chain.push(block).unwrap();
        }
        chain
    }

    /// `count` linked descendants of `parent`
    pub fn extend(&self, parent: &Arc<Block>, count: usize, variant: u8) -> Vec<Arc<Block>> {
        let mut parent = parent.clone();
        (0..count)
            .map(|_| {
                let child = self.child_of(&parent, variant);
                parent = child.clone();
                child
            })
            .collect()
    }

    /// Child carrying only a coinbase
    pub fn child_of(&self, parent: &Arc<Block>, variant: u8) -> Arc<Block> {
        self.child_with(parent, variant, Vec::new(), parent.header.state_root)
    }

    /// Child carrying a coinbase followed by `txs`
    pub fn child_with(
        &self,
        parent: &Arc<Block>,
        variant: u8,
        txs: Vec<Transaction>,
        state_root: Option<StateRoot>,
    ) -> Arc<Block> {
        let height = parent.height() + 1;
        let time = parent.header.time + BLOCK_INTERVAL_MS + variant as u64;
        let mut all = vec![coinbase(height, time, variant)];
        all.extend(txs);
        Arc::new(Block::new(height, parent.hash(), time, address(variant), state_root, all))
    }

    /// Block at an arbitrary height and parent, for malformed links
    pub fn block_at(&self, height: u64, previous: BlockHash, variant: u8) -> Arc<Block> {
        let time = GENESIS_TIME + height * BLOCK_INTERVAL_MS + variant as u64;
        Arc::new(Block::new(
            height,
            previous,
            time,
            address(variant),
            None,
            vec![coinbase(height, time, variant)],
        ))
    }
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn coin(owner: u8, amount: u64) -> Coin {
    Coin {
        owner: address(owner),
        amount,
        lock_time: 0,
    }
}

pub fn coinbase(height: u64, time: u64, producer: u8) -> Transaction {
    Transaction::new(
        TxType::COINBASE,
        time,
        CoinData {
            inputs: Vec::new(),
            outputs: vec![coin(producer, 0)],
        },
        height.to_be_bytes().to_vec(),
    )
}

pub fn transfer(inputs: Vec<CoinRef>, outputs: Vec<Coin>, nonce: u8) -> Transaction {
    Transaction::new(TxType::TRANSFER, GENESIS_TIME, CoinData { inputs, outputs }, vec![nonce])
}

pub fn contract_call(nonce: u8) -> Transaction {
    Transaction::new(TxType::CALL_CONTRACT, GENESIS_TIME, CoinData::default(), vec![nonce])
}
