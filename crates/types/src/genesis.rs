// Path: crates/types/src/genesis.rs
//! The genesis file: initial allocations and the bootstrap validator set.

use crate::Amount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A validator entry in the genesis file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisValidator {
    /// Consensus address (`cpcvalcons1...`).
    pub address: String,
    /// Hex-encoded public key. Older genesis files used the `pub_key`
    /// field name; both spellings are accepted.
    #[serde(alias = "pub_key")]
    pub pq_pub_key: String,
    /// Initial voting power.
    pub power: Amount,
    /// Whether the validator starts in the active set.
    #[serde(default)]
    pub is_active: bool,
    /// Optional reward address; derived from the key when absent.
    #[serde(default)]
    pub reward_address: Option<String>,
}

/// The parsed `genesis.json`. An absent file yields an empty chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenesisFile {
    /// Premined balances: address → amount.
    #[serde(default)]
    pub alloc: BTreeMap<String, Amount>,
    /// The bootstrap validator set.
    #[serde(default)]
    pub validators: Vec<GenesisValidator>,
    /// Network start time (unix seconds); anchors the slot schedule.
    #[serde(default)]
    pub genesis_time: u64,
}
