// Path: crates/node/src/facade.rs
//! The chain facade: implements the networking hook boundary over the
//! concrete pipeline and mempool, so `cpc-networking` stays decoupled from
//! `cpc-chain`.

use async_trait::async_trait;
use cpc_chain::{Blockchain, Mempool};
use cpc_networking::ChainHooks;
use cpc_types::{Block, BlockError, BlockHeader, Transaction};
use std::sync::Arc;
use tracing::error;

/// Everything the P2P node may ask of this chain.
pub struct ChainFacade {
    chain: Arc<Blockchain>,
    mempool: Arc<Mempool>,
}

impl ChainFacade {
    pub fn new(chain: Arc<Blockchain>, mempool: Arc<Mempool>) -> Self {
        Self { chain, mempool }
    }
}

#[async_trait]
impl ChainHooks for ChainFacade {
    async fn apply_block(&self, block: Block) -> Result<(), BlockError> {
        // Block application completes in milliseconds; it runs inline in
        // the message handler, serialized by the chain-tip lock.
        self.chain.add_block(&block)
    }

    async fn submit_transaction(&self, tx: Transaction) -> Result<(), String> {
        self.mempool.add_transaction(tx).map_err(|e| e.to_string())
    }

    fn current_height(&self) -> i64 {
        self.chain.height()
    }

    fn last_hash(&self) -> String {
        self.chain.last_hash()
    }

    fn genesis_hash(&self) -> Option<String> {
        self.chain.genesis_hash()
    }

    fn block_by_height(&self, height: u64) -> Option<Block> {
        self.chain.get_block(height)
    }

    fn blocks_range(&self, from: i64, to: i64) -> Vec<Block> {
        self.chain.blocks_range(from, to)
    }

    fn headers_range(&self, from: i64, to: i64) -> Vec<BlockHeader> {
        self.chain.headers_range(from, to)
    }

    async fn rollback_to_height(&self, height: i64) -> Result<(), String> {
        self.chain
            .rollback_to_height(height)
            .map_err(|e| e.to_string())
    }

    fn latest_snapshot_height(&self) -> Option<u64> {
        self.chain.latest_snapshot_height()
    }

    fn snapshot_bytes(&self, height: u64) -> Option<Vec<u8>> {
        self.chain.snapshot_bytes(height)
    }

    async fn apply_snapshot_bytes(&self, height: u64, data: Vec<u8>) -> bool {
        match self.chain.load_snapshot_from_bytes(height, &data) {
            Ok(()) => true,
            Err(e) => {
                error!(height, %e, "failed to apply snapshot from peer");
                false
            }
        }
    }
}
