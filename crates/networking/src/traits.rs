// Path: crates/networking/src/traits.rs
//! Trait definitions for networking: the chain hook boundary and the sync
//! state machine's observable state.

use async_trait::async_trait;
use cpc_types::{Block, BlockError, BlockHeader, Transaction};

/// An error type for networking operations.
#[derive(thiserror::Error, Debug)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// The high-level state of the node's synchronization process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Syncing,
    Synced,
}

/// Capabilities the P2P node needs from the chain, handed in at
/// construction so the networking crate never imports the pipeline.
///
/// Mutating hooks are async because they may wait on the chain-tip lock;
/// read-only hooks are cheap synchronous snapshots.
#[async_trait]
pub trait ChainHooks: Send + Sync {
    /// Applies a block received from the network through the pipeline.
    async fn apply_block(&self, block: Block) -> Result<(), BlockError>;

    /// Admits a gossiped transaction to the mempool.
    async fn submit_transaction(&self, tx: Transaction) -> Result<(), String>;

    /// Current tip height (−1 when empty).
    fn current_height(&self) -> i64;

    /// Current tip hash.
    fn last_hash(&self) -> String;

    /// Hash of block 0, once the chain has one.
    fn genesis_hash(&self) -> Option<String>;

    /// The stored block at `height`, if any.
    fn block_by_height(&self, height: u64) -> Option<Block>;

    /// Blocks in `[from, to]` inclusive, stopping at the first gap.
    fn blocks_range(&self, from: i64, to: i64) -> Vec<Block>;

    /// Headers in `[from, to]` inclusive, stopping at the first gap.
    fn headers_range(&self, from: i64, to: i64) -> Vec<BlockHeader>;

    /// Rolls the chain back to `height` (inclusive) for fork resolution.
    async fn rollback_to_height(&self, height: i64) -> Result<(), String>;

    /// Height of the newest locally stored snapshot.
    fn latest_snapshot_height(&self) -> Option<u64>;

    /// Raw compressed snapshot bytes for serving to a peer.
    fn snapshot_bytes(&self, height: u64) -> Option<Vec<u8>>;

    /// Applies snapshot bytes received from a peer; `true` on success.
    async fn apply_snapshot_bytes(&self, height: u64, data: Vec<u8>) -> bool;
}
