// Path: crates/consensus/src/lib.rs
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

//! The consensus selector: deterministic round-robin proposer election
//! over the active validator set. The set is frozen within an epoch and
//! swapped atomically at epoch boundaries.

pub mod selector;

pub use selector::{ConsensusEngine, ValidatorSet};
