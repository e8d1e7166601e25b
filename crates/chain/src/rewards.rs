// Path: crates/chain/src/rewards.rs
//! Block reward and fee distribution.
//!
//! Runs after the state-root check; reward credits are never reflected in
//! any header's `state_root`, and every node must apply them in the same
//! position of the pipeline.

use cpc_state::StateEngine;
use cpc_types::config::{base_gas, mul_rate};
use cpc_types::{
    Amount, Block, EconomicConfig, NetworkConfig, StateError, Validator, TREASURY_ADDRESS,
};
use cpc_crypto::address_from_pubkey;
use tracing::{debug, info, warn};

/// Mints the block reward, splits it into validator and miner pools,
/// distributes fees and credits the proposer (and its delegators).
///
/// The miner pool is burned until off-chain scoring is wired in.
pub fn distribute_rewards(
    state: &mut StateEngine,
    block: &Block,
    network: &NetworkConfig,
    economy: &EconomicConfig,
) -> Result<(), StateError> {
    let proposer_addr = &block.header.proposer_address;
    let Some(val) = state.get_validator(proposer_addr)? else {
        return Ok(());
    };
    if !val.is_active {
        return Ok(());
    }

    // Resolve the reward target.
    let target_addr = match &val.reward_address {
        Some(addr) => addr.clone(),
        None => {
            let Ok(pub_bytes) = hex::decode(&val.pq_pub_key) else {
                warn!(proposer = %proposer_addr, "could not determine reward address");
                return Ok(());
            };
            match address_from_pubkey(&pub_bytes, &network.bech32_prefix_acc) {
                Ok(addr) => addr,
                Err(_) => {
                    warn!(proposer = %proposer_addr, "could not determine reward address");
                    return Ok(());
                }
            }
        }
    };

    // 1. Mint the block reward and split it into pools.
    let block_reward = economy.block_reward(block.header.height);
    state.mint(block_reward);
    let (validator_pool, miner_pool) = economy.split_block_reward(block_reward);

    // 2. Aggregate and split transaction fees.
    let fees_total: Amount = block
        .txs
        .iter()
        .map(|tx| base_gas(tx.tx_type) as Amount * tx.gas_price)
        .sum();
    let (validator_fee_share, treasury_fee_share, fee_dust) = economy.split_fees(fees_total);

    if treasury_fee_share > 0 {
        let mut treasury = state.get_account(TREASURY_ADDRESS)?;
        treasury.balance += treasury_fee_share;
        state.set_account(treasury);
    }
    if fee_dust > 0 {
        state.burn(fee_dust);
    }

    // 3. Credit the proposer; with delegations, take commission first and
    // spread the rest proportionally.
    let validator_total_reward = validator_pool + validator_fee_share;

    if val.total_delegated > 0 {
        let commission = mul_rate(validator_total_reward, val.commission_rate);
        let delegators_share = validator_total_reward - commission;

        let mut acc = state.get_account(&target_addr)?;
        acc.balance += commission;
        state.set_account(acc);

        let epoch = state.epoch_index;
        let dust = distribute_delegator_rewards(state, &val, delegators_share, epoch)?;
        if dust > 0 {
            state.burn(dust);
        }
        info!(
            height = block.header.height,
            validator = %target_addr,
            commission,
            delegators = delegators_share - dust,
            dust_burned = dust,
            "proposer reward distributed"
        );
    } else {
        let mut acc = state.get_account(&target_addr)?;
        acc.balance += validator_total_reward;
        state.set_account(acc);
    }

    // 4. Miner pool placeholder: burned until compute scoring lands.
    if miner_pool > 0 {
        state.burn(miner_pool);
        debug!(miner_pool, "miner pool burned (no compute workers yet)");
    }
    Ok(())
}

/// Distributes `delegators_share` proportionally over the validator's
/// delegations and records each share in the delegator's per-epoch reward
/// history. Returns the undistributed integer-division dust.
fn distribute_delegator_rewards(
    state: &mut StateEngine,
    validator: &Validator,
    delegators_share: Amount,
    epoch: u64,
) -> Result<Amount, StateError> {
    if validator.delegations.is_empty() {
        warn!(
            validator = %validator.address,
            total_delegated = %validator.total_delegated,
            "delegated power without delegation records"
        );
        return Ok(delegators_share);
    }
    let total_delegated = validator.total_delegated;
    if total_delegated == 0 {
        return Ok(delegators_share);
    }

    let mut distributed: Amount = 0;
    for delegation in &validator.delegations {
        let reward = delegators_share * delegation.amount / total_delegated;
        if reward == 0 {
            continue;
        }
        let mut acc = state.get_account(&delegation.delegator)?;
        acc.balance += reward;
        *acc.reward_history.entry(epoch).or_insert(0) += reward;
        state.set_account(acc);
        distributed += reward;
    }
    Ok(delegators_share - distributed)
}
