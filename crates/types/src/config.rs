// Path: crates/types/src/config.rs
//! Network and economic configuration profiles.
//!
//! Each network (devnet/testnet/mainnet) pins concrete values for every
//! consensus-relevant parameter. These are constants of the protocol, not
//! tunables: changing any of them is a hard fork.

use crate::tx::TxType;
use crate::Amount;
use serde::{Deserialize, Serialize};

/// One CPC in minimal units.
pub const DECIMALS: Amount = 1_000_000_000_000_000_000;

/// The community-pool address credited with the treasury fee share.
pub const TREASURY_ADDRESS: &str =
    "cpc1treasury000000000000000000000000000000000000000000";

/// Base gas cost per transaction type. These values are consensus
/// constants: `gas_used` in every header is the sum over this table.
pub fn base_gas(tx_type: TxType) -> u64 {
    match tx_type {
        TxType::Transfer => 21_000,
        TxType::Stake => 40_000,
        TxType::Unstake => 40_000,
        TxType::Delegate => 30_000,
        TxType::Undelegate => 30_000,
        TxType::UpdateValidator => 25_000,
        TxType::Unjail => 50_000,
        TxType::SubmitResult => 80_000,
    }
}

/// Consensus and resource parameters of one network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Short network identifier (`devnet`, `testnet`, `mainnet`).
    pub network_id: String,
    /// Chain identifier carried in every block header.
    pub chain_id: String,
    /// Target seconds between blocks (the slot length).
    pub block_time_sec: u64,
    /// Minimum accepted gas price.
    pub min_gas_price: Amount,
    /// Maximum gas a block may declare.
    pub block_gas_limit: u64,
    /// Maximum transactions drawn into one block.
    pub max_tx_per_block: usize,
    /// Total premine allocated in genesis.
    pub genesis_premine: Amount,
    /// Bech32 prefix for account addresses.
    pub bech32_prefix_acc: String,
    /// Bech32 prefix for operator addresses.
    pub bech32_prefix_val: String,
    /// Bech32 prefix for consensus addresses.
    pub bech32_prefix_cons: String,
    /// Version of this parameter set.
    pub version: u32,
    /// Epoch length in blocks; the validator set rotates at boundaries.
    pub epoch_length_blocks: u64,
    /// Minimum power to qualify as a validator candidate.
    pub min_validator_stake: Amount,
    /// Size of the active validator set.
    pub max_validators: usize,
    /// Minimum delegation amount.
    pub min_delegation: Amount,
    /// Minimum uptime score to stay in the candidate pool.
    pub min_uptime_score: f64,
    /// Consecutive missed slots before jailing.
    pub max_missed_blocks_sequential: u32,
    /// Length of a jail sentence in blocks.
    pub jail_duration_blocks: u64,
    /// Jails before permanent ejection.
    pub ejection_threshold_jails: u32,
    /// Ceiling on the proposer round counter.
    pub max_rounds_per_height: u64,
    /// Deterministic faucet key for local development networks.
    #[serde(default)]
    pub faucet_priv_key: Option<String>,
}

impl NetworkConfig {
    /// The local development network: fast blocks, tiny epochs, a
    /// deterministic faucet key.
    pub fn devnet() -> Self {
        Self {
            network_id: "devnet".into(),
            chain_id: "cpc-devnet-1".into(),
            block_time_sec: 10,
            min_gas_price: 1000,
            block_gas_limit: 10_000_000,
            max_tx_per_block: 100,
            genesis_premine: 1_000_000_000 * DECIMALS,
            bech32_prefix_acc: "cpc".into(),
            bech32_prefix_val: "cpcvaloper".into(),
            bech32_prefix_cons: "cpcvalcons".into(),
            version: 1,
            epoch_length_blocks: 10,
            min_validator_stake: 1000,
            max_validators: 5,
            min_delegation: DECIMALS,
            min_uptime_score: 0.5,
            max_missed_blocks_sequential: 5,
            jail_duration_blocks: 100,
            ejection_threshold_jails: 3,
            max_rounds_per_height: 10,
            faucet_priv_key: Some(
                "4f3edf982522b4e51b7e8b5f2f9c4d1d7a9e5f8c2b6d4e1a3c5b7d9e0f1a2b3c"
                    .into(),
            ),
        }
    }

    /// The public test network.
    pub fn testnet() -> Self {
        Self {
            network_id: "testnet".into(),
            chain_id: "cpc-testnet-1".into(),
            block_time_sec: 30,
            min_gas_price: 5000,
            block_gas_limit: 15_000_000,
            max_tx_per_block: 1000,
            genesis_premine: 100_000_000 * DECIMALS,
            bech32_prefix_acc: "cpc".into(),
            bech32_prefix_val: "cpcvaloper".into(),
            bech32_prefix_cons: "cpcvalcons".into(),
            version: 1,
            epoch_length_blocks: 100,
            min_validator_stake: 100_000 * DECIMALS,
            max_validators: 21,
            min_delegation: DECIMALS,
            min_uptime_score: 0.5,
            max_missed_blocks_sequential: 5,
            jail_duration_blocks: 1000,
            ejection_threshold_jails: 3,
            max_rounds_per_height: 10,
            faucet_priv_key: None,
        }
    }

    /// The main network.
    pub fn mainnet() -> Self {
        Self {
            network_id: "mainnet".into(),
            chain_id: "cpc-mainnet-1".into(),
            block_time_sec: 60,
            min_gas_price: 1_000_000_000,
            block_gas_limit: 30_000_000,
            max_tx_per_block: 5000,
            genesis_premine: 0,
            bech32_prefix_acc: "cpc".into(),
            bech32_prefix_val: "cpcvaloper".into(),
            bech32_prefix_cons: "cpcvalcons".into(),
            version: 1,
            epoch_length_blocks: 72,
            min_validator_stake: 100_000 * DECIMALS,
            max_validators: 100,
            min_delegation: DECIMALS,
            min_uptime_score: 0.5,
            max_missed_blocks_sequential: 5,
            jail_duration_blocks: 10_000,
            ejection_threshold_jails: 3,
            max_rounds_per_height: 10,
            faucet_priv_key: None,
        }
    }

    /// Looks a profile up by its network id.
    pub fn named(network_id: &str) -> Option<Self> {
        match network_id {
            "devnet" => Some(Self::devnet()),
            "testnet" => Some(Self::testnet()),
            "mainnet" => Some(Self::mainnet()),
            _ => None,
        }
    }
}

/// Emission, distribution and penalty parameters.
///
/// Burn policy: only dust from integer division and penalties (slashing,
/// unjail fee, jailed-unstake penalty) are burned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomicConfig {
    /// Initial block reward in minimal units.
    pub initial_block_reward: Amount,
    /// The reward halves every this many blocks.
    pub halving_period_blocks: u64,
    /// Share of the block reward forming the validator pool.
    pub validator_reward_share: f64,
    /// Share of the block reward forming the miner pool.
    pub miner_reward_share: f64,
    /// Share of fees credited to the block producer.
    pub validator_fee_share: f64,
    /// Share of fees credited to the treasury.
    pub treasury_fee_share: f64,
    /// Base slashing rate applied on the first jail.
    pub slashing_base_rate: f64,
    /// Fixed fee for early release from jail (burned).
    pub unjail_fee: Amount,
    /// Penalty rate on unstaking while jailed (burned).
    pub unstake_penalty_rate: f64,
}

impl EconomicConfig {
    /// The economic model shared by the current network profiles.
    pub fn standard() -> Self {
        Self {
            initial_block_reward: 10 * DECIMALS,
            halving_period_blocks: 1_000_000,
            validator_reward_share: 0.70,
            miner_reward_share: 0.30,
            validator_fee_share: 0.90,
            treasury_fee_share: 0.10,
            slashing_base_rate: 0.05,
            unjail_fee: 1000 * DECIMALS,
            unstake_penalty_rate: 0.10,
        }
    }

    /// Block reward at `height`: the initial reward right-shifted once per
    /// elapsed halving period.
    pub fn block_reward(&self, height: u64) -> Amount {
        let halvings = height / self.halving_period_blocks;
        if halvings >= 128 {
            return 0;
        }
        self.initial_block_reward >> halvings
    }

    /// Splits the block reward into (validator_pool, miner_pool). The miner
    /// pool is the exact complement of the validator pool so the two always
    /// sum to `total` and supply accounting stays exact.
    pub fn split_block_reward(&self, total: Amount) -> (Amount, Amount) {
        let validator_pool = mul_rate(total, self.validator_reward_share);
        let miner_pool = total - validator_pool;
        (validator_pool, miner_pool)
    }

    /// Splits total fees into (validator_share, treasury, dust). Dust is
    /// burned by the caller.
    pub fn split_fees(&self, total: Amount) -> (Amount, Amount, Amount) {
        let validator = mul_rate(total, self.validator_fee_share);
        let treasury = mul_rate(total, self.treasury_fee_share);
        let dust = total - validator - treasury;
        (validator, treasury, dust)
    }
}

/// Multiplies an amount by a fractional rate, truncating toward zero.
pub fn mul_rate(amount: Amount, rate: f64) -> Amount {
    (amount as f64 * rate) as Amount
}
