// Path: crates/consensus/src/selector.rs
use cpc_types::{Amount, Validator};
use parking_lot::RwLock;
use tracing::info;

/// The registered validator set with its cached total active power.
#[derive(Debug, Clone, Default)]
pub struct ValidatorSet {
    /// All known validators, active or not.
    pub validators: Vec<Validator>,
    /// Sum of active validators' power.
    pub total_power: Amount,
}

impl ValidatorSet {
    /// Builds a set, computing the active total power.
    pub fn new(validators: Vec<Validator>) -> Self {
        let total_power = validators
            .iter()
            .filter(|v| v.is_active)
            .map(|v| v.power)
            .sum();
        Self {
            validators,
            total_power,
        }
    }

    /// Selects the proposer for `(height, round)`.
    ///
    /// Active validators are sorted by consensus address for determinism;
    /// the proposer is the one at index `(height + round) % n`. Round 0 is
    /// the on-time slot; each timeout advances the index by one. An empty
    /// active set yields `None`.
    pub fn proposer_for(&self, height: u64, round: u64) -> Option<&Validator> {
        let mut active: Vec<&Validator> =
            self.validators.iter().filter(|v| v.is_active).collect();
        if active.is_empty() {
            return None;
        }
        active.sort_by(|a, b| a.address.cmp(&b.address));
        let index = ((height + round) % active.len() as u64) as usize;
        active.get(index).copied()
    }

    /// Finds a validator by consensus address.
    pub fn get_by_address(&self, address: &str) -> Option<&Validator> {
        self.validators.iter().find(|v| v.address == address)
    }

    /// True when no validators are registered at all.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

/// Holds the current validator set behind a lock so the block pipeline and
/// the proposer thread read one consistent snapshot.
#[derive(Default)]
pub struct ConsensusEngine {
    set: RwLock<ValidatorSet>,
}

impl ConsensusEngine {
    /// Creates an engine with an empty validator set (bootstrap mode).
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replaces the active validator set.
    pub fn update_validator_set(&self, validators: Vec<Validator>) {
        let set = ValidatorSet::new(validators);
        info!(
            validators = set.validators.len(),
            total_power = %set.total_power,
            "validator set updated"
        );
        *self.set.write() = set;
    }

    /// Returns the proposer for `(height, round)`, cloned out of the set.
    pub fn get_proposer(&self, height: u64, round: u64) -> Option<Validator> {
        self.set.read().proposer_for(height, round).cloned()
    }

    /// Looks up a validator by consensus address.
    pub fn get_by_address(&self, address: &str) -> Option<Validator> {
        self.set.read().get_by_address(address).cloned()
    }

    /// True when no validators are registered (pre-genesis bootstrap).
    pub fn is_empty(&self) -> bool {
        self.set.read().is_empty()
    }

    /// Snapshot of the current set.
    pub fn snapshot(&self) -> ValidatorSet {
        self.set.read().clone()
    }
}
