// Path: crates/chain/src/epoch.rs
//! Epoch transitions: performance scoring, jailing and validator rotation.

use cpc_consensus::ConsensusEngine;
use cpc_state::StateEngine;
use cpc_types::config::mul_rate;
use cpc_types::{Block, EconomicConfig, NetworkConfig, StateError, Validator};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Runs the end-of-epoch rotation against `state`.
///
/// `current_height` is the height of the block closing the epoch. Jails
/// validators over the missed-block limit with a graduated slash, scores
/// the remaining candidates, activates the top `max_validators` by score
/// and seeds the next epoch's expectations.
pub fn process_epoch_transition(
    state: &mut StateEngine,
    network: &NetworkConfig,
    economy: &EconomicConfig,
    current_height: u64,
) -> Result<(), StateError> {
    let mut all_vals = state.get_all_validators()?;
    info!(
        epoch = state.epoch_index,
        height = current_height,
        "epoch transition"
    );

    // 0. Reset inactive validators' stats before filtering, so a
    // deactivated validator can re-enter with a clean slate.
    for v in all_vals.iter_mut() {
        if !v.is_active {
            v.blocks_expected = 0;
            v.blocks_proposed = 0;
            v.uptime_score = 1.0;
            state.set_validator(v.clone());
        }
    }

    // 1–2. Candidate filter: enough stake, not jailed, acceptable uptime
    // (validators without history pass).
    let mut candidates: Vec<Validator> = all_vals
        .iter()
        .filter(|v| {
            v.power >= network.min_validator_stake
                && v.jailed_until_height < current_height
                && (v.blocks_expected == 0 || v.uptime_score >= network.min_uptime_score)
        })
        .cloned()
        .collect();

    // 3. Score candidates.
    let total_network_power: u128 = all_vals.iter().map(|v| v.power).sum();
    for v in candidates.iter_mut() {
        v.performance_score = performance_score(v, total_network_power);
        v.uptime_score = if v.blocks_expected > 0 {
            v.blocks_proposed as f64 / v.blocks_expected as f64
        } else {
            1.0
        };
        debug!(
            validator = %v.address,
            score = v.performance_score,
            uptime = v.uptime_score,
            proposed = v.blocks_proposed,
            expected = v.blocks_expected,
            missed = v.missed_blocks,
            "candidate scored"
        );
        state.set_validator(v.clone());
    }

    // 4–5. Top N by performance score.
    candidates.sort_by(|a, b| {
        b.performance_score
            .partial_cmp(&a.performance_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let active_addresses: HashSet<String> = candidates
        .iter()
        .take(network.max_validators)
        .map(|v| v.address.clone())
        .collect();

    // 6. Jail offenders, then apply the new membership to everyone else.
    let all_vals = state.get_all_validators()?;
    for mut v in all_vals {
        if v.missed_blocks >= network.max_missed_blocks_sequential && v.is_active {
            jail_validator(state, &mut v, network, economy, current_height);
            state.set_validator(v);
            continue;
        }
        let is_active = active_addresses.contains(&v.address);
        if v.is_active != is_active {
            if is_active {
                info!(validator = %v.address, "validator joins the active set");
            } else {
                warn!(validator = %v.address, "validator removed from active set");
            }
            v.is_active = is_active;
            state.set_validator(v);
        }
    }

    // 7. Next epoch.
    state.epoch_index += 1;

    // 8. Seed blocks_expected for the new epoch.
    start_epoch_tracking(state, network)?;
    Ok(())
}

/// Performance score: `0.6·uptime + 0.2·stake_ratio + 0.2·(1 − min(penalty/power, 0.5))`,
/// clamped to [0, 1].
fn performance_score(v: &Validator, total_network_power: u128) -> f64 {
    let uptime = if v.blocks_expected > 0 {
        v.blocks_proposed as f64 / v.blocks_expected as f64
    } else {
        1.0
    };
    let stake_ratio = v.power as f64 / (total_network_power.max(1)) as f64;
    let penalty_ratio = (v.total_penalties as f64 / (v.power.max(1)) as f64).min(0.5);
    let score = 0.6 * uptime + 0.2 * stake_ratio + 0.2 * (1.0 - penalty_ratio);
    score.clamp(0.0, 1.0)
}

/// Jails a validator with a graduated slash: 5% on the first jail, 10% on
/// the second, 100% from the third on. The slashed amount is burned. After
/// `ejection_threshold_jails` jails the validator's power is zeroed for
/// good.
fn jail_validator(
    state: &mut StateEngine,
    v: &mut Validator,
    network: &NetworkConfig,
    economy: &EconomicConfig,
    current_height: u64,
) {
    let penalty_rate = match v.jail_count {
        0 => economy.slashing_base_rate,
        1 => economy.slashing_base_rate * 2.0,
        _ => 1.0,
    };
    let penalty = mul_rate(v.power, penalty_rate).min(v.power);

    slash_stake(v, penalty);
    state.burn(penalty);
    v.total_penalties += penalty;
    v.jail_count += 1;
    v.jailed_until_height = current_height + network.jail_duration_blocks;
    v.missed_blocks = 0;
    v.is_active = false;

    warn!(
        validator = %v.address,
        penalty = %penalty,
        jail_count = v.jail_count,
        until = v.jailed_until_height,
        remaining_power = %v.power,
        "validator jailed"
    );

    if v.jail_count >= network.ejection_threshold_jails {
        warn!(validator = %v.address, jails = v.jail_count, "validator ejected");
        let residual = v.power;
        if residual > 0 {
            slash_stake(v, residual);
            state.burn(residual);
            v.total_penalties += residual;
        }
        v.is_active = false;
    }
}

/// Removes `penalty` from the validator's stake: self stake first, then
/// delegations in record order, keeping `power == self_stake +
/// total_delegated` intact.
fn slash_stake(v: &mut Validator, penalty: u128) {
    let penalty = penalty.min(v.power);
    v.power -= penalty;

    let from_self = penalty.min(v.self_stake);
    v.self_stake -= from_self;
    let mut remaining = penalty - from_self;
    if remaining > 0 {
        for d in v.delegations.iter_mut() {
            let cut = remaining.min(d.amount);
            d.amount -= cut;
            remaining -= cut;
            if remaining == 0 {
                break;
            }
        }
        v.delegations.retain(|d| d.amount > 0);
        v.total_delegated = v.delegations.iter().map(|d| d.amount).sum();
    }
}

/// Seeds `blocks_expected` for the epoch that begins now: the epoch length
/// divided evenly over active validators, remainder to the first few in
/// address order. Inactive validators are zeroed for a clean re-entry.
pub fn start_epoch_tracking(
    state: &mut StateEngine,
    network: &NetworkConfig,
) -> Result<(), StateError> {
    let all_vals = state.get_all_validators()?;
    let mut active: Vec<Validator> = Vec::new();
    for mut v in all_vals {
        if v.is_active {
            active.push(v);
        } else {
            v.blocks_expected = 0;
            v.blocks_proposed = 0;
            state.set_validator(v);
        }
    }
    if active.is_empty() {
        return Ok(());
    }

    let per_validator = network.epoch_length_blocks / active.len() as u64;
    let remainder = network.epoch_length_blocks % active.len() as u64;
    active.sort_by(|a, b| a.address.cmp(&b.address));
    for (i, mut v) in active.into_iter().enumerate() {
        v.blocks_expected = per_validator + u64::from((i as u64) < remainder);
        v.blocks_proposed = 0;
        state.set_validator(v);
    }
    Ok(())
}

/// Credits the proposer of a freshly applied block: bumps
/// `blocks_proposed`, records the height and clears the consecutive-miss
/// counter. Local scoring only; not part of the state root.
pub fn track_proposer_performance(
    state: &mut StateEngine,
    block: &Block,
) -> Result<(), StateError> {
    if let Some(mut val) = state.get_validator(&block.header.proposer_address)? {
        val.blocks_proposed += 1;
        val.last_block_height = block.header.height;
        val.missed_blocks = 0;
        state.set_validator(val);
    }
    Ok(())
}

/// Infers skipped slots from the inter-block timestamp delta and charges a
/// missed block to whoever would have proposed each skipped slot at
/// round 0.
pub fn track_missed_blocks(
    state: &mut StateEngine,
    consensus: &ConsensusEngine,
    prev_height: i64,
    prev_timestamp: u64,
    block: &Block,
    network: &NetworkConfig,
) -> Result<(), StateError> {
    if prev_height < 0 {
        return Ok(());
    }
    let time_diff = block.header.timestamp.saturating_sub(prev_timestamp);
    let expected_blocks = time_diff / network.block_time_sec;
    if expected_blocks <= 1 {
        return Ok(());
    }

    let missed_count = expected_blocks - 1;
    warn!(missed_count, gap_secs = time_diff, "missed slots detected");
    for i in 1..=missed_count {
        let missed_height = (prev_height as u64) + i;
        let Some(expected) = consensus.get_proposer(missed_height, 0) else {
            continue;
        };
        if let Some(mut val) = state.get_validator(&expected.address)? {
            if val.is_active {
                val.missed_blocks += 1;
                warn!(
                    validator = %val.address,
                    height = missed_height,
                    consecutive = val.missed_blocks,
                    "validator missed a slot"
                );
                state.set_validator(val);
            }
        }
    }
    Ok(())
}
