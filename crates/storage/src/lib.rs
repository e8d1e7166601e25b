// Path: crates/storage/src/lib.rs
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

//! Pure-Rust persistent storage (redb) for the block log and the state
//! key-value table. Two logical namespaces share one database file: blocks
//! (height → serialized block, plus a hash → height index) and state
//! (opaque string key → opaque string value). Durability is per block;
//! redb gives a single writer with concurrent MVCC readers.

pub mod chain_store;

pub use chain_store::ChainStore;
