// Path: crates/types/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # ComputeChain Types
//!
//! Core data structures shared by every other crate: accounts, validators,
//! transactions, blocks, snapshots, the genesis file, network and economic
//! configuration profiles, the canonical JSON codec and the domain error
//! types. Everything that two subsystems agree on lives here so that
//! serialization and hashing cannot drift between them.

pub mod account;
pub mod block;
pub mod codec;
pub mod compute;
pub mod config;
pub mod error;
pub mod genesis;
pub mod snapshot;
pub mod tx;
pub mod validator;

pub use account::{Account, UnbondingDelegation};
pub use block::{Block, BlockHeader};
pub use compute::ComputeResult;
pub use config::{EconomicConfig, NetworkConfig, DECIMALS, TREASURY_ADDRESS};
pub use error::{
    BlockError, ConsensusError, ErrorCode, MempoolError, SnapshotError, StateError,
    StorageError, TxError,
};
pub use genesis::{GenesisFile, GenesisValidator};
pub use snapshot::{Snapshot, SnapshotMetadata};
pub use tx::{Transaction, TxType};
pub use validator::{Delegation, Validator};

/// Token amount in minimal units (10^-18 CPC).
pub type Amount = u128;

/// Block height. The chain tip uses `i64` with −1 meaning "empty chain";
/// block headers always carry a non-negative height.
pub type Height = u64;

/// Gas unit count.
pub type Gas = u64;

/// The all-zeroes hash string used as `prev_hash` of the genesis block.
pub const ZERO_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";
