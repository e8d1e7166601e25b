// Path: crates/chain/tests/pipeline.rs
//! End-to-end tests of the block pipeline: production, rewards, epochs,
//! rollback/rebuild and snapshots on a real on-disk chain.

use cpc_chain::{Blockchain, ChainOptions};
use cpc_crypto::{
    address_from_pubkey, generate_private_key, merkle_root, pq, public_key_from_private,
};
use cpc_types::config::{base_gas, DECIMALS};
use cpc_types::{
    Amount, Block, BlockError, BlockHeader, EconomicConfig, GenesisFile, GenesisValidator,
    NetworkConfig, Transaction, TxType,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

struct Key {
    priv_key: [u8; 32],
    pub_key: Vec<u8>,
    addr: String,
}

fn new_key(prefix: &str) -> Key {
    let priv_key = generate_private_key();
    let pub_key = public_key_from_private(&priv_key).unwrap();
    let addr = address_from_pubkey(&pub_key, prefix).unwrap();
    Key {
        priv_key,
        pub_key,
        addr,
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

struct Harness {
    _dir: TempDir,
    chain: Arc<Blockchain>,
    validator: Key,
    faucet: Key,
    genesis_stake: Amount,
}

/// Builds a chain with one active genesis validator and a premined faucet.
fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let validator = new_key("cpcvalcons");
    let faucet = new_key("cpc");
    let network = NetworkConfig::devnet();
    let genesis_stake = 2000 * DECIMALS;

    let mut alloc = BTreeMap::new();
    alloc.insert(faucet.addr.clone(), network.genesis_premine);
    let genesis = GenesisFile {
        alloc,
        validators: vec![GenesisValidator {
            address: validator.addr.clone(),
            pq_pub_key: hex::encode(&validator.pub_key),
            power: genesis_stake,
            is_active: true,
            reward_address: None,
        }],
        genesis_time: unix_now() - 5000,
    };
    std::fs::write(
        dir.path().join("genesis.json"),
        serde_json::to_string_pretty(&genesis).unwrap(),
    )
    .unwrap();

    let mut opts = ChainOptions::new(dir.path());
    opts.snapshot_interval = 0; // epoch boundaries only
    let chain =
        Blockchain::open(network, EconomicConfig::standard(), opts).unwrap();
    Harness {
        _dir: dir,
        chain: Arc::new(chain),
        validator,
        faucet,
        genesis_stake,
    }
}

fn signed_tx(
    key: &Key,
    tx_type: TxType,
    to: Option<&str>,
    amount: Amount,
    nonce: u64,
    payload: &[(&str, serde_json::Value)],
) -> Transaction {
    let gas = base_gas(tx_type);
    let mut map = serde_json::Map::new();
    for (k, v) in payload {
        map.insert((*k).to_string(), v.clone());
    }
    let mut tx = Transaction {
        tx_type,
        from: key.addr.clone(),
        to: to.map(Into::into),
        amount,
        fee: gas as Amount * 1000,
        nonce,
        gas_price: 1000,
        gas_limit: gas,
        payload: map,
        pub_key: hex::encode(&key.pub_key),
        signature: String::new(),
        timestamp: 0,
    };
    tx.sign(&key.priv_key).unwrap();
    tx
}

/// Builds and signs the next block the way the proposer would.
fn make_block(h: &Harness, txs: Vec<Transaction>) -> Block {
    let ctx = h.chain.proposal_context();
    let next_height = (ctx.height + 1) as u64;
    let mut tmp = ctx.state;
    let mut gas_used = 0u64;
    for tx in &txs {
        tmp.apply_transaction(tx, next_height, false).unwrap();
        gas_used += base_gas(tx.tx_type);
    }
    let state_root = tmp.compute_state_root().unwrap();
    let compute_root = cpc_chain::compute_poc_root(&txs);
    let leaves: Vec<[u8; 32]> = txs
        .iter()
        .map(|tx| {
            let mut leaf = [0u8; 32];
            leaf.copy_from_slice(&hex::decode(tx.hash_hex()).unwrap());
            leaf
        })
        .collect();
    let tx_root = hex::encode(merkle_root(&leaves));

    let timestamp = if ctx.height < 0 {
        h.chain.genesis_time()
    } else {
        ctx.last_block_timestamp + h.chain.network().block_time_sec
    };

    let header = BlockHeader {
        height: next_height,
        prev_hash: ctx.last_hash,
        timestamp,
        chain_id: h.chain.network().chain_id.clone(),
        proposer_address: h.validator.addr.clone(),
        round: 0,
        tx_root,
        state_root,
        compute_root,
        gas_used,
        gas_limit: h.chain.network().block_gas_limit,
    };
    let digest = hex::decode(header.hash_hex()).unwrap();
    let signature = pq::sign(&digest, &h.validator.priv_key).unwrap();
    Block {
        header,
        txs,
        pq_signature: hex::encode(signature),
        pq_sig_scheme_id: pq::SCHEME_ID,
    }
}

/// Sum of balances, validator powers and unbonding entries.
fn total_tokens(h: &Harness) -> Amount {
    let state = h.chain.state_clone();
    let accounts = state.export_accounts().unwrap();
    let mut sum: Amount = 0;
    for raw in accounts.values() {
        let acc: cpc_types::Account = serde_json::from_str(raw).unwrap();
        sum += acc.balance;
        sum += acc
            .unbonding_delegations
            .iter()
            .map(|u| u.amount)
            .sum::<Amount>();
    }
    for val in state.get_all_validators().unwrap() {
        sum += val.power;
    }
    sum
}

fn assert_supply_conserved(h: &Harness) {
    let state = h.chain.state_clone();
    let baseline = h.chain.network().genesis_premine + h.genesis_stake;
    assert_eq!(
        total_tokens(h),
        baseline + state.total_minted - state.total_burned,
        "token supply must be conserved"
    );
}

#[test]
fn genesis_block_applies_and_pays_the_proposer() {
    let h = harness();
    assert_eq!(h.chain.height(), -1);

    let block = make_block(&h, vec![]);
    assert_eq!(block.header.prev_hash, cpc_types::ZERO_HASH);
    h.chain.add_block(&block).unwrap();

    assert_eq!(h.chain.height(), 0);
    assert_eq!(h.chain.last_hash(), block.hash_hex());
    assert_eq!(h.chain.genesis_hash(), Some(block.hash_hex()));

    // The proposer's derived reward account received the validator pool.
    let reward_addr = address_from_pubkey(&h.validator.pub_key, "cpc").unwrap();
    let state = h.chain.state_clone();
    let reward = state.get_account(&reward_addr).unwrap().balance;
    let (validator_pool, _) = h
        .chain
        .economy()
        .split_block_reward(h.chain.economy().block_reward(0));
    assert_eq!(reward, validator_pool);
    assert_supply_conserved(&h);
}

#[test]
fn transfer_block_updates_balances_exactly() {
    let h = harness();
    h.chain.add_block(&make_block(&h, vec![])).unwrap();

    let recipient = new_key("cpc");
    let tx = signed_tx(&h.faucet, TxType::Transfer, Some(&recipient.addr), 100, 0, &[]);
    h.chain.add_block(&make_block(&h, vec![tx])).unwrap();

    let state = h.chain.state_clone();
    let fee = 21_000u128 * 1000;
    assert_eq!(
        state.get_account(&h.faucet.addr).unwrap().balance,
        h.chain.network().genesis_premine - 100 - fee
    );
    assert_eq!(state.get_account(&h.faucet.addr).unwrap().nonce, 1);
    assert_eq!(state.get_account(&recipient.addr).unwrap().balance, 100);
    assert_supply_conserved(&h);
}

#[test]
fn adding_the_same_block_twice_is_idempotent() {
    let h = harness();
    let block = make_block(&h, vec![]);
    h.chain.add_block(&block).unwrap();
    let tip_hash = h.chain.last_hash();
    let root_before = h.chain.state_clone().compute_state_root().unwrap();

    // Gossip replay: same block again.
    h.chain.add_block(&block).unwrap();
    assert_eq!(h.chain.height(), 0);
    assert_eq!(h.chain.last_hash(), tip_hash);
    assert_eq!(
        h.chain.state_clone().compute_state_root().unwrap(),
        root_before
    );
}

#[test]
fn height_gap_and_prev_hash_are_rejected() {
    let h = harness();
    let block0 = make_block(&h, vec![]);
    h.chain.add_block(&block0).unwrap();

    // Height gap.
    let mut gap = make_block(&h, vec![]);
    gap.header.height += 5;
    let err = h.chain.add_block(&gap).unwrap_err();
    assert!(matches!(
        err,
        BlockError::InvalidHeight { expected: 1, got: 6 }
    ));

    // Wrong parent.
    let mut orphan = make_block(&h, vec![]);
    orphan.header.prev_hash = cpc_types::ZERO_HASH.into();
    // Re-sign over the altered header.
    let digest = hex::decode(orphan.header.hash_hex()).unwrap();
    orphan.pq_signature = hex::encode(pq::sign(&digest, &h.validator.priv_key).unwrap());
    let err = h.chain.add_block(&orphan).unwrap_err();
    assert!(matches!(err, BlockError::MismatchedPrevHash { .. }));
}

#[test]
fn forged_proposer_or_signature_is_rejected() {
    let h = harness();
    let intruder = new_key("cpcvalcons");

    // Wrong proposer address.
    let mut block = make_block(&h, vec![]);
    block.header.proposer_address = intruder.addr.clone();
    let digest = hex::decode(block.header.hash_hex()).unwrap();
    block.pq_signature = hex::encode(pq::sign(&digest, &intruder.priv_key).unwrap());
    assert!(matches!(
        h.chain.add_block(&block).unwrap_err(),
        BlockError::InvalidProposer { .. }
    ));

    // Right proposer, wrong key.
    let mut block = make_block(&h, vec![]);
    let digest = hex::decode(block.header.hash_hex()).unwrap();
    block.pq_signature = hex::encode(pq::sign(&digest, &intruder.priv_key).unwrap());
    assert!(matches!(
        h.chain.add_block(&block).unwrap_err(),
        BlockError::InvalidSignature(_)
    ));
}

#[test]
fn declared_gas_and_roots_are_verified() {
    let h = harness();

    let mut wrong_gas = make_block(&h, vec![]);
    wrong_gas.header.gas_used = 999;
    let digest = hex::decode(wrong_gas.header.hash_hex()).unwrap();
    wrong_gas.pq_signature = hex::encode(pq::sign(&digest, &h.validator.priv_key).unwrap());
    assert!(matches!(
        h.chain.add_block(&wrong_gas).unwrap_err(),
        BlockError::GasUsedMismatch { .. }
    ));

    let mut wrong_root = make_block(&h, vec![]);
    wrong_root.header.state_root = "ff".repeat(32);
    let digest = hex::decode(wrong_root.header.hash_hex()).unwrap();
    wrong_root.pq_signature = hex::encode(pq::sign(&digest, &h.validator.priv_key).unwrap());
    assert!(matches!(
        h.chain.add_block(&wrong_root).unwrap_err(),
        BlockError::StateRootMismatch { .. }
    ));
}

#[test]
fn delegation_rewards_split_commission_and_shares() {
    let h = harness();
    h.chain.add_block(&make_block(&h, vec![])).unwrap();

    // Fund two delegators from the faucet, then delegate 60/40.
    let d1 = new_key("cpc");
    let d2 = new_key("cpc");
    let fund = 100 * DECIMALS;
    let t1 = signed_tx(&h.faucet, TxType::Transfer, Some(&d1.addr), fund, 0, &[]);
    let t2 = signed_tx(&h.faucet, TxType::Transfer, Some(&d2.addr), fund, 1, &[]);
    h.chain.add_block(&make_block(&h, vec![t1, t2])).unwrap();

    let del1 = signed_tx(
        &d1,
        TxType::Delegate,
        None,
        60 * DECIMALS,
        0,
        &[("validator", h.validator.addr.clone().into())],
    );
    let del2 = signed_tx(
        &d2,
        TxType::Delegate,
        None,
        40 * DECIMALS,
        0,
        &[("validator", h.validator.addr.clone().into())],
    );
    h.chain.add_block(&make_block(&h, vec![del1, del2])).unwrap();

    // The delegate block itself already distributed a reward with the
    // delegations in place, so assert deltas from here on.
    let state_before = h.chain.state_clone();
    let d1_before = state_before.get_account(&d1.addr).unwrap().balance;
    let d2_before = state_before.get_account(&d2.addr).unwrap().balance;
    let epoch = state_before.epoch_index;
    let d1_hist_before = *state_before
        .get_account(&d1.addr)
        .unwrap()
        .reward_history
        .get(&epoch)
        .unwrap_or(&0);
    let d2_hist_before = *state_before
        .get_account(&d2.addr)
        .unwrap()
        .reward_history
        .get(&epoch)
        .unwrap_or(&0);

    // An empty block: only the block reward flows.
    let height = (h.chain.height() + 1) as u64;
    h.chain.add_block(&make_block(&h, vec![])).unwrap();

    let economy = h.chain.economy();
    let (validator_pool, _) = economy.split_block_reward(economy.block_reward(height));
    let commission = (validator_pool as f64 * 0.10) as Amount;
    let share = validator_pool - commission;
    let total_delegated = 100 * DECIMALS;
    let expect_d1 = share * (60 * DECIMALS) / total_delegated;
    let expect_d2 = share * (40 * DECIMALS) / total_delegated;

    let state = h.chain.state_clone();
    let d1_acc = state.get_account(&d1.addr).unwrap();
    let d2_acc = state.get_account(&d2.addr).unwrap();
    assert_eq!(d1_acc.balance - d1_before, expect_d1);
    assert_eq!(d2_acc.balance - d2_before, expect_d2);
    assert_eq!(
        d1_acc.reward_history.get(&epoch).unwrap() - d1_hist_before,
        expect_d1
    );
    assert_eq!(
        d2_acc.reward_history.get(&epoch).unwrap() - d2_hist_before,
        expect_d2
    );
    assert_supply_conserved(&h);
}

#[test]
fn epoch_boundary_rotates_and_seeds_expectations() {
    let h = harness();
    let epoch_len = h.chain.network().epoch_length_blocks;

    for _ in 0..epoch_len {
        h.chain.add_block(&make_block(&h, vec![])).unwrap();
    }
    // Heights 0..=9 applied; (9 + 1) % 10 == 0 ran the transition.
    assert_eq!(h.chain.height() as u64, epoch_len - 1);

    let state = h.chain.state_clone();
    assert_eq!(state.epoch_index, 1);
    let validators = state.get_all_validators().unwrap();
    let val = validators
        .iter()
        .find(|v| v.address == h.validator.addr)
        .unwrap();
    assert!(val.is_active);
    // The lone active validator is expected to propose the whole epoch.
    assert_eq!(val.blocks_expected, epoch_len);
    // Proposer tracking for the boundary block itself runs after the
    // transition, so the new epoch already counts one proposed block.
    assert_eq!(val.blocks_proposed, 1);
    assert_supply_conserved(&h);
}

#[test]
fn rebuild_replays_to_the_same_state() {
    let h = harness();
    let recipient = new_key("cpc");
    h.chain.add_block(&make_block(&h, vec![])).unwrap();
    let tx = signed_tx(&h.faucet, TxType::Transfer, Some(&recipient.addr), 777, 0, &[]);
    h.chain.add_block(&make_block(&h, vec![tx])).unwrap();
    h.chain.add_block(&make_block(&h, vec![])).unwrap();

    let tip = h.chain.height();
    let hash = h.chain.last_hash();
    let root = h.chain.state_clone().compute_state_root().unwrap();
    let minted = h.chain.state_clone().total_minted;

    h.chain.rebuild_state_from_blocks().unwrap();

    assert_eq!(h.chain.height(), tip);
    assert_eq!(h.chain.last_hash(), hash);
    assert_eq!(h.chain.state_clone().compute_state_root().unwrap(), root);
    assert_eq!(h.chain.state_clone().total_minted, minted);
    assert_supply_conserved(&h);
}

#[test]
fn rollback_to_height_truncates_and_replays() {
    let h = harness();
    for _ in 0..4 {
        h.chain.add_block(&make_block(&h, vec![])).unwrap();
    }
    assert_eq!(h.chain.height(), 3);

    h.chain.rollback_to_height(1).unwrap();
    assert_eq!(h.chain.height(), 1);
    assert!(h.chain.get_block(2).is_none());
    assert!(h.chain.get_block(3).is_none());
    let tip_block = h.chain.get_block(1).unwrap();
    assert_eq!(h.chain.last_hash(), tip_block.hash_hex());

    // The chain keeps extending from the new tip.
    h.chain.add_block(&make_block(&h, vec![])).unwrap();
    assert_eq!(h.chain.height(), 2);
    assert_supply_conserved(&h);
}

#[test]
fn rollback_last_block_steps_back_one() {
    let h = harness();
    for _ in 0..3 {
        h.chain.add_block(&make_block(&h, vec![])).unwrap();
    }
    h.chain.rollback_last_block().unwrap();
    assert_eq!(h.chain.height(), 1);
    assert_supply_conserved(&h);
}

#[test]
fn epoch_boundary_produces_a_snapshot() {
    let h = harness();
    let epoch_len = h.chain.network().epoch_length_blocks;
    for _ in 0..epoch_len {
        h.chain.add_block(&make_block(&h, vec![])).unwrap();
    }

    let snap_height = epoch_len - 1;
    assert_eq!(h.chain.latest_snapshot_height(), Some(snap_height));
    let bytes = h.chain.snapshot_bytes(snap_height).unwrap();
    assert!(!bytes.is_empty());

    // Loading our own snapshot back leaves the state root unchanged.
    let root_before = h.chain.state_clone().compute_state_root().unwrap();
    h.chain.load_from_snapshot(snap_height).unwrap();
    assert_eq!(
        h.chain.state_clone().compute_state_root().unwrap(),
        root_before
    );
    assert_eq!(h.chain.height() as u64, snap_height);
}

#[test]
fn future_timestamp_is_rejected() {
    let h = harness();
    let mut block = make_block(&h, vec![]);
    block.header.timestamp = unix_now() + 120;
    let digest = hex::decode(block.header.hash_hex()).unwrap();
    block.pq_signature = hex::encode(pq::sign(&digest, &h.validator.priv_key).unwrap());
    assert!(matches!(
        h.chain.add_block(&block).unwrap_err(),
        BlockError::TimestampInFuture { .. }
    ));
}

#[test]
fn submit_result_block_carries_a_compute_root() {
    let h = harness();
    h.chain.add_block(&make_block(&h, vec![])).unwrap();

    // Fund a worker and have it submit a compute result.
    let worker = new_key("cpc");
    let fund = signed_tx(
        &h.faucet,
        TxType::Transfer,
        Some(&worker.addr),
        DECIMALS,
        0,
        &[],
    );
    h.chain.add_block(&make_block(&h, vec![fund])).unwrap();

    let submit = signed_tx(
        &worker,
        TxType::SubmitResult,
        None,
        0,
        0,
        &[
            ("task_id", "task_7".into()),
            ("worker_address", worker.addr.clone().into()),
            ("result_hash", "cafe1234".into()),
            ("proof", "0xdeadbeef".into()),
            ("nonce", serde_json::json!(1)),
            ("signature", "".into()),
        ],
    );
    let block = make_block(&h, vec![submit]);
    assert!(!block.header.compute_root.is_empty());
    h.chain.add_block(&block).unwrap();

    // A tampered compute root is rejected.
    let mut bad = make_block(&h, vec![]);
    bad.header.compute_root = "ff".repeat(32);
    let digest = hex::decode(bad.header.hash_hex()).unwrap();
    bad.pq_signature = hex::encode(pq::sign(&digest, &h.validator.priv_key).unwrap());
    assert!(matches!(
        h.chain.add_block(&bad).unwrap_err(),
        BlockError::ComputeRootMismatch { .. }
    ));
    assert_supply_conserved(&h);
}

#[test]
fn offline_validator_is_jailed_and_slashed_at_the_boundary() {
    // Two genesis validators; only one of them ever produces. The offline
    // one accumulates missed slots and gets jailed with a 5% slash.
    let dir = TempDir::new().unwrap();
    let keys = [new_key("cpcvalcons"), new_key("cpcvalcons")];
    let network = NetworkConfig::devnet();
    let stake = 2000 * DECIMALS;

    let genesis = GenesisFile {
        alloc: BTreeMap::new(),
        validators: keys
            .iter()
            .map(|k| GenesisValidator {
                address: k.addr.clone(),
                pq_pub_key: hex::encode(&k.pub_key),
                power: stake,
                is_active: true,
                reward_address: None,
            })
            .collect(),
        genesis_time: unix_now() - 5000,
    };
    std::fs::write(
        dir.path().join("genesis.json"),
        serde_json::to_string_pretty(&genesis).unwrap(),
    )
    .unwrap();
    let chain = Blockchain::open(
        network.clone(),
        EconomicConfig::standard(),
        ChainOptions::new(dir.path()),
    )
    .unwrap();

    // The live validator is whoever the selector elects for (0, 0); the
    // other one stays silent.
    let consensus = chain.consensus();
    let first = consensus.get_proposer(0, 0).unwrap().address;
    let live = keys.iter().find(|k| k.addr == first).unwrap();
    let lazy = keys.iter().find(|k| k.addr != first).unwrap();

    // Produce two full epochs, skipping the lazy validator's slots by
    // waiting one extra round whenever it is the round-0 proposer.
    let produce = |expected_height: u64| {
        let ctx = chain.proposal_context();
        let height = (ctx.height + 1) as u64;
        assert_eq!(height, expected_height);
        let round = if consensus.get_proposer(height, 0).unwrap().address == live.addr {
            0
        } else {
            1
        };
        let timestamp = if ctx.height < 0 {
            chain.genesis_time()
        } else {
            ctx.last_block_timestamp + (round + 1) * network.block_time_sec
        };
        let state_root = ctx.state.compute_state_root().unwrap();
        let header = BlockHeader {
            height,
            prev_hash: ctx.last_hash,
            timestamp,
            chain_id: network.chain_id.clone(),
            proposer_address: live.addr.clone(),
            round,
            tx_root: hex::encode(merkle_root(&[])),
            state_root,
            compute_root: String::new(),
            gas_used: 0,
            gas_limit: network.block_gas_limit,
        };
        let digest = hex::decode(header.hash_hex()).unwrap();
        let signature = pq::sign(&digest, &live.priv_key).unwrap();
        chain
            .add_block(&Block {
                header,
                txs: vec![],
                pq_signature: hex::encode(signature),
                pq_sig_scheme_id: pq::SCHEME_ID,
            })
            .unwrap();
    };
    for height in 0..2 * network.epoch_length_blocks {
        produce(height);
    }

    let state = chain.state_clone();
    let lazy_val = state.get_validator(&lazy.addr).unwrap().unwrap();
    assert!(lazy_val.is_jailed());
    assert!(!lazy_val.is_active);
    assert_eq!(lazy_val.jail_count, 1);
    let slashed = stake - lazy_val.power;
    assert!(slashed > 0);
    assert_eq!(lazy_val.total_penalties, slashed);
    assert_eq!(lazy_val.power, lazy_val.self_stake + lazy_val.total_delegated);

    let live_val = state.get_validator(&live.addr).unwrap().unwrap();
    assert!(live_val.is_active);
    assert_eq!(live_val.power, stake);

    // Conservation across the slash: balances + powers match premine
    // (none) + genesis stakes + minted − burned.
    let mut total: Amount = 0;
    for raw in state.export_accounts().unwrap().values() {
        let acc: cpc_types::Account = serde_json::from_str(raw).unwrap();
        total += acc.balance;
    }
    for val in state.get_all_validators().unwrap() {
        total += val.power;
    }
    assert_eq!(total, 2 * stake + state.total_minted - state.total_burned);
}

#[test]
fn snapshot_bytes_bootstrap_a_fresh_node() {
    let h = harness();
    let epoch_len = h.chain.network().epoch_length_blocks;
    for _ in 0..epoch_len {
        h.chain.add_block(&make_block(&h, vec![])).unwrap();
    }
    let snap_height = epoch_len - 1;
    let bytes = h.chain.snapshot_bytes(snap_height).unwrap();
    let source_root = h.chain.state_clone().compute_state_root().unwrap();

    // A fresh node (same genesis, empty store) applies the snapshot.
    let dir = TempDir::new().unwrap();
    std::fs::copy(
        h._dir.path().join("genesis.json"),
        dir.path().join("genesis.json"),
    )
    .unwrap();
    let fresh = Blockchain::open(
        NetworkConfig::devnet(),
        EconomicConfig::standard(),
        ChainOptions::new(dir.path()),
    )
    .unwrap();

    fresh.load_snapshot_from_bytes(snap_height, &bytes).unwrap();
    assert_eq!(fresh.height() as u64, snap_height);
    assert_eq!(
        fresh.state_clone().compute_state_root().unwrap(),
        source_root
    );
    assert_eq!(
        fresh.state_clone().epoch_index,
        h.chain.state_clone().epoch_index
    );

    // Tampered bytes are refused.
    let mut tampered = bytes.clone();
    let last = tampered.len() - 1;
    tampered[last] ^= 0xff;
    assert!(fresh
        .load_snapshot_from_bytes(snap_height, &tampered)
        .is_err());
}

#[test]
fn scheduled_upgrade_activates_while_blocks_flow() {
    let h = harness();
    h.chain.upgrades().register_migration(
        "1.0.0",
        "1.1.0",
        Box::new(|state| {
            let mut acc = state.get_account("cpc1migrationmarker")?;
            acc.balance = 42;
            state.set_account(acc);
            Ok(())
        }),
    );
    h.chain
        .upgrades()
        .schedule_upgrade(cpc_chain::UpgradePlan {
            name: "phase-2a".into(),
            version: "1.1.0".into(),
            upgrade_height: 2,
            description: "compute scoring".into(),
            breaking_changes: false,
        })
        .unwrap();

    h.chain.add_block(&make_block(&h, vec![])).unwrap();
    h.chain.add_block(&make_block(&h, vec![])).unwrap();
    assert_eq!(h.chain.upgrades().current_version().to_string(), "1.0.0");

    // Block 2 crosses the activation height.
    h.chain.add_block(&make_block(&h, vec![])).unwrap();
    assert_eq!(h.chain.upgrades().current_version().to_string(), "1.1.0");
    let state = h.chain.state_clone();
    assert_eq!(
        state.get_account("cpc1migrationmarker").unwrap().balance,
        42
    );
}

#[test]
fn proposer_thread_produces_blocks_and_drains_the_mempool() {
    let h = harness();
    let mempool = Arc::new(cpc_chain::Mempool::new(Arc::new(NetworkConfig::devnet())));

    // A pending transfer should land in the first produced block.
    let recipient = new_key("cpc");
    let tx = signed_tx(&h.faucet, TxType::Transfer, Some(&recipient.addr), 12345, 0, &[]);
    mempool.add_transaction(tx).unwrap();

    let produced = Arc::new(std::sync::atomic::AtomicU64::new(0));
    let mut proposer = cpc_chain::BlockProposer::new(
        h.chain.clone(),
        mempool.clone(),
        Arc::new(cpc_chain::NoSync),
        h.validator.priv_key.to_vec(),
    )
    .unwrap();
    assert_eq!(proposer.address(), h.validator.addr);
    let counter = produced.clone();
    proposer.set_block_callback(Arc::new(move |_| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }));

    proposer.start();
    for _ in 0..100 {
        if h.chain.height() >= 1 && mempool.size() == 0 {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    }
    proposer.stop();

    assert!(h.chain.height() >= 1, "proposer produced no blocks");
    assert!(produced.load(std::sync::atomic::Ordering::SeqCst) >= 1);
    assert_eq!(mempool.size(), 0, "included transaction was not evicted");
    let state = h.chain.state_clone();
    assert_eq!(state.get_account(&recipient.addr).unwrap().balance, 12345);
    assert_supply_conserved(&h);
}

#[test]
fn open_fast_syncs_from_a_local_snapshot_when_the_log_is_empty() {
    let h = harness();
    let epoch_len = h.chain.network().epoch_length_blocks;
    for _ in 0..epoch_len {
        h.chain.add_block(&make_block(&h, vec![])).unwrap();
    }
    let snap_height = epoch_len - 1;
    assert_eq!(h.chain.latest_snapshot_height(), Some(snap_height));
    let source_root = h.chain.state_clone().compute_state_root().unwrap();
    let source_epoch = h.chain.state_clone().epoch_index;
    let source_minted = h.chain.state_clone().total_minted;
    assert!(source_minted > 0);

    // A bootstrap node: the snapshot directory is seeded, the block log
    // is not.
    let dir = TempDir::new().unwrap();
    std::fs::copy(
        h._dir.path().join("genesis.json"),
        dir.path().join("genesis.json"),
    )
    .unwrap();
    std::fs::create_dir_all(dir.path().join("snapshots")).unwrap();
    for entry in std::fs::read_dir(h._dir.path().join("snapshots")).unwrap() {
        let entry = entry.unwrap();
        std::fs::copy(
            entry.path(),
            dir.path().join("snapshots").join(entry.file_name()),
        )
        .unwrap();
    }

    let mut opts = ChainOptions::new(dir.path());
    opts.snapshot_interval = 0;
    let fresh = Blockchain::open(
        NetworkConfig::devnet(),
        EconomicConfig::standard(),
        opts,
    )
    .unwrap();

    // Opened straight at the snapshot height instead of waiting for a
    // full block replay from genesis.
    assert_eq!(fresh.height() as u64, snap_height);
    assert_eq!(
        fresh.state_clone().compute_state_root().unwrap(),
        source_root
    );
    assert_eq!(fresh.state_clone().epoch_index, source_epoch);
    // Counters come from the snapshot, not from a re-applied genesis.
    assert_eq!(fresh.state_clone().total_minted, source_minted);
    // The selector was refreshed from the snapshot's validator set.
    assert!(fresh.consensus().get_proposer(snap_height + 1, 0).is_some());
}
