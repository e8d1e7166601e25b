// Path: crates/types/src/validator.rs
//! Validator records and their embedded delegations.

use crate::Amount;
use serde::{Deserialize, Serialize};

/// A bond from a regular account to a validator. One record exists per
/// (delegator, validator) pair; it is removed when its amount reaches zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    /// The delegator's account address (`cpc1...`).
    pub delegator: String,
    /// The validator's consensus address (`cpcvalcons1...`).
    pub validator: String,
    /// Delegated amount in minimal units.
    pub amount: Amount,
    /// Height at which the delegation was created.
    pub created_height: u64,
}

/// A validator: staking weight, performance history and jail status.
///
/// Invariant: `power == self_stake + total_delegated` immediately after
/// every stake, unstake, delegate and undelegate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validator {
    /// Bech32 consensus address derived from `pq_pub_key` with the
    /// validator prefix.
    pub address: String,
    /// Hex-encoded scheme-opaque public key.
    pub pq_pub_key: String,
    /// Voting power: self stake plus delegations.
    pub power: Amount,
    /// Whether the validator belongs to the current active set.
    #[serde(default)]
    pub is_active: bool,
    /// Account address receiving rewards and authorized to manage the
    /// validator.
    #[serde(default)]
    pub reward_address: Option<String>,

    /// Display name (max 64 chars).
    #[serde(default)]
    pub name: Option<String>,
    /// Website URL (max 128 chars).
    #[serde(default)]
    pub website: Option<String>,
    /// Short description (max 256 chars).
    #[serde(default)]
    pub description: Option<String>,

    /// Blocks proposed in the current epoch.
    #[serde(default)]
    pub blocks_proposed: u64,
    /// Blocks this validator was expected to propose this epoch.
    #[serde(default)]
    pub blocks_expected: u64,
    /// Consecutive missed slots.
    #[serde(default)]
    pub missed_blocks: u32,
    /// Height of the last block this validator proposed.
    #[serde(default)]
    pub last_block_height: u64,
    /// `blocks_proposed / blocks_expected`, in [0, 1].
    #[serde(default = "default_score")]
    pub uptime_score: f64,
    /// Combined performance score, in [0, 1].
    #[serde(default = "default_score")]
    pub performance_score: f64,

    /// Total slashed amount over the validator's lifetime.
    #[serde(default)]
    pub total_penalties: Amount,
    /// Jailed until this height; 0 means not jailed.
    #[serde(default)]
    pub jailed_until_height: u64,
    /// Number of times this validator has been jailed.
    #[serde(default)]
    pub jail_count: u32,

    /// Height at which the validator registered.
    #[serde(default)]
    pub joined_height: u64,

    /// Commission retained from delegator rewards, in [0, 1].
    #[serde(default = "default_commission")]
    pub commission_rate: f64,
    /// The validator operator's own stake.
    #[serde(default)]
    pub self_stake: Amount,
    /// Sum of all delegation amounts.
    #[serde(default)]
    pub total_delegated: Amount,
    /// Individual delegation records, ordered by insertion.
    #[serde(default)]
    pub delegations: Vec<Delegation>,
}

fn default_score() -> f64 {
    1.0
}

fn default_commission() -> f64 {
    0.10
}

impl Validator {
    /// Creates a new inactive validator with `power` as its initial self
    /// stake, as registered by a `STAKE` transaction.
    pub fn new(
        address: impl Into<String>,
        pq_pub_key: impl Into<String>,
        power: Amount,
        reward_address: impl Into<String>,
        joined_height: u64,
    ) -> Self {
        Self {
            address: address.into(),
            pq_pub_key: pq_pub_key.into(),
            power,
            is_active: false,
            reward_address: Some(reward_address.into()),
            name: None,
            website: None,
            description: None,
            blocks_proposed: 0,
            blocks_expected: 0,
            missed_blocks: 0,
            last_block_height: 0,
            uptime_score: 1.0,
            performance_score: 1.0,
            total_penalties: 0,
            jailed_until_height: 0,
            jail_count: 0,
            joined_height,
            commission_rate: default_commission(),
            self_stake: power,
            total_delegated: 0,
            delegations: Vec::new(),
        }
    }

    /// True while a jail sentence is pending.
    pub fn is_jailed(&self) -> bool {
        self.jailed_until_height > 0
    }

    /// Returns the delegation record of `delegator`, if any.
    pub fn delegation_of(&self, delegator: &str) -> Option<&Delegation> {
        self.delegations.iter().find(|d| d.delegator == delegator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_validator_starts_inactive_with_self_stake() {
        let v = Validator::new("cpcvalcons1x", "aabb", 100, "cpc1owner", 5);
        assert!(!v.is_active);
        assert_eq!(v.power, 100);
        assert_eq!(v.self_stake, 100);
        assert_eq!(v.total_delegated, 0);
        assert_eq!(v.power, v.self_stake + v.total_delegated);
        assert!(!v.is_jailed());
    }

    #[test]
    fn serde_defaults_for_legacy_records() {
        let v: Validator = serde_json::from_str(
            r#"{"address":"cpcvalcons1x","pq_pub_key":"aa","power":10}"#,
        )
        .unwrap();
        assert_eq!(v.commission_rate, 0.10);
        assert_eq!(v.uptime_score, 1.0);
        assert!(v.delegations.is_empty());
    }
}
