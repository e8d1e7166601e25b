// Path: crates/types/src/account.rs
//! Account state: balances, nonces and delegation bookkeeping.

use crate::Amount;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A pending refund from an undelegation, claimable once the chain reaches
/// `completion_height`. Reserved for a future unbonding policy; the current
/// undelegate path refunds immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbondingDelegation {
    /// Consensus address of the validator the bond is leaving.
    pub validator: String,
    /// Amount being returned.
    pub amount: Amount,
    /// Height at which the refund becomes claimable.
    pub completion_height: u64,
}

/// A user account. Created implicitly on first read with zero balance and
/// nonce; never removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Bech32 account address (`cpc1...`).
    pub address: String,
    /// Balance in minimal units.
    #[serde(default)]
    pub balance: Amount,
    /// Strictly monotonic transaction counter.
    #[serde(default)]
    pub nonce: u64,
    /// Cumulative delegation rewards per epoch index.
    #[serde(default)]
    pub reward_history: BTreeMap<u64, Amount>,
    /// Pending undelegation refunds, ordered by insertion.
    #[serde(default)]
    pub unbonding_delegations: Vec<UnbondingDelegation>,
}

impl Account {
    /// Returns a fresh zero account for `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            balance: 0,
            nonce: 0,
            reward_history: BTreeMap::new(),
            unbonding_delegations: Vec::new(),
        }
    }
}
