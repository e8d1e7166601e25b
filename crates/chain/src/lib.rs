// Path: crates/chain/src/lib.rs
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing
    )
)]

//! The block pipeline and everything that drives it: full block validation
//! and application, reward distribution, epoch transitions, snapshotting,
//! rollback and rebuild, the mempool, and the slot-driven block proposer.
//!
//! [`Blockchain::add_block`] is the single entry point for applying a
//! block, whether locally produced or received from a peer; a process-wide
//! lock on the chain tip serializes all mutations.

pub mod chain;
pub mod epoch;
pub mod mempool;
pub mod proposer;
pub mod rewards;
pub mod snapshot;
pub mod upgrade;

pub use chain::{compute_poc_root, Blockchain, ChainOptions};
pub use mempool::Mempool;
pub use proposer::{BlockProposer, NoSync, SyncStatus};
pub use snapshot::SnapshotManager;
pub use upgrade::{UpgradeManager, UpgradePlan};
