// Path: crates/chain/src/proposer.rs
//! The slot-driven block proposer.
//!
//! Runs on a dedicated OS thread, waking about once a second. When this
//! node is the elected proposer for the next (height, round), it drafts a
//! block from the mempool against a cloned state, signs the header and
//! submits it through the block pipeline.

use crate::chain::{compute_poc_root, Blockchain};
use crate::mempool::Mempool;
use cpc_crypto::{address_from_pubkey, merkle_root, pq, public_key_from_private, CryptoError};
use cpc_types::config::base_gas;
use cpc_types::{Block, BlockHeader, Transaction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Seconds between mempool maintenance passes.
const PRUNE_INTERVAL_SECS: u64 = 30;

/// Read-only view of the P2P node's synchronization state, used for
/// backpressure: the proposer stays quiet while the node is catching up.
pub trait SyncStatus: Send + Sync {
    /// True while the node is syncing from a peer.
    fn is_syncing(&self) -> bool;
    /// The best height reported by any peer (−1 when unknown).
    fn best_peer_height(&self) -> i64;
}

/// A no-op probe for nodes without networking (tests, single-node dev).
pub struct NoSync;

impl SyncStatus for NoSync {
    fn is_syncing(&self) -> bool {
        false
    }
    fn best_peer_height(&self) -> i64 {
        -1
    }
}

/// Callback invoked with every locally produced block (wired to the P2P
/// broadcast).
pub type BlockCallback = Arc<dyn Fn(&Block) + Send + Sync>;

/// The proposer worker.
pub struct BlockProposer {
    chain: Arc<Blockchain>,
    mempool: Arc<Mempool>,
    sync: Arc<dyn SyncStatus>,
    priv_key: Vec<u8>,
    address: String,
    on_block_created: Option<BlockCallback>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BlockProposer {
    /// Builds a proposer for the given validator key. The proposer address
    /// is derived with the consensus prefix.
    pub fn new(
        chain: Arc<Blockchain>,
        mempool: Arc<Mempool>,
        sync: Arc<dyn SyncStatus>,
        priv_key: Vec<u8>,
    ) -> Result<Self, CryptoError> {
        let pub_key = public_key_from_private(&priv_key)?;
        let address = address_from_pubkey(&pub_key, &chain.network().bech32_prefix_cons)?;
        Ok(Self {
            chain,
            mempool,
            sync,
            priv_key,
            address,
            on_block_created: None,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        })
    }

    /// Registers the broadcast callback.
    pub fn set_block_callback(&mut self, callback: BlockCallback) {
        self.on_block_created = Some(callback);
    }

    /// This node's proposer (consensus) address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Starts the proposer thread.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let worker = ProposerWorker {
            chain: self.chain.clone(),
            mempool: self.mempool.clone(),
            sync: self.sync.clone(),
            priv_key: self.priv_key.clone(),
            address: self.address.clone(),
            on_block_created: self.on_block_created.clone(),
            running: self.running.clone(),
        };
        info!(address = %self.address, "block proposer started");
        self.handle = Some(std::thread::spawn(move || worker.run_loop()));
    }

    /// Signals the proposer thread to stop and joins it.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BlockProposer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ProposerWorker {
    chain: Arc<Blockchain>,
    mempool: Arc<Mempool>,
    sync: Arc<dyn SyncStatus>,
    priv_key: Vec<u8>,
    address: String,
    on_block_created: Option<BlockCallback>,
    running: Arc<AtomicBool>,
}

impl ProposerWorker {
    fn run_loop(&self) {
        let mut last_prune = 0u64;
        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.try_produce_block_step() {
                error!(%e, "error in proposer loop");
            }

            let now = unix_now();
            if now.saturating_sub(last_prune) >= PRUNE_INTERVAL_SECS {
                self.mempool.cleanup_expired();
                let state = self.chain.state_clone();
                self.mempool.prune_stale_transactions(&state);
                last_prune = now;
            }

            // 1s cadence is plenty for a 10s block time.
            std::thread::sleep(Duration::from_secs(1));
        }
    }

    fn try_produce_block_step(&self) -> Result<(), String> {
        // Backpressure: never produce while significantly behind a peer.
        if self.sync.is_syncing() && self.sync.best_peer_height() > self.chain.height() + 1 {
            return Ok(());
        }

        let genesis_time = self.chain.genesis_time();
        if genesis_time == 0 && self.chain.height() < 0 {
            // No genesis yet; nothing to anchor the slot schedule to.
            return Ok(());
        }

        let block_time = self.chain.network().block_time_sec;
        let now = unix_now();
        let next_height = (self.chain.height() + 1) as u64;
        let slot_time = genesis_time + next_height * block_time;
        if now < slot_time {
            return Ok(());
        }

        let mut round = (now - slot_time) / block_time;
        let max_rounds = self.chain.network().max_rounds_per_height;
        if round > max_rounds {
            warn!(
                round,
                max_rounds,
                height = next_height,
                "round exceeds max_rounds_per_height; clamping"
            );
            round = max_rounds;
        }

        // Are we the elected proposer for this slot?
        let consensus = self.chain.consensus();
        match consensus.get_proposer(next_height, round) {
            Some(expected) if expected.address != self.address => return Ok(()),
            Some(_) => {}
            None if !consensus.is_empty() => return Ok(()),
            // Bootstrap mode: empty set, anyone may produce.
            None => {}
        }

        info!(
            height = next_height,
            round,
            "it's my turn to propose"
        );

        // Draft transactions against a cloned state.
        let candidates = self
            .mempool
            .get_transactions(self.chain.network().max_tx_per_block);
        let ctx = self.chain.proposal_context();
        let mut tmp_state = ctx.state;
        let block_gas_limit = self.chain.network().block_gas_limit;

        let mut valid_txs: Vec<Transaction> = Vec::new();
        let mut invalid_txs: Vec<Transaction> = Vec::new();
        let mut cumulative_gas: u64 = 0;

        for tx in candidates {
            let tx_gas = base_gas(tx.tx_type);
            if cumulative_gas + tx_gas > block_gas_limit {
                break;
            }
            match tmp_state.apply_transaction(&tx, next_height, true) {
                Ok(()) => {
                    cumulative_gas += tx_gas;
                    valid_txs.push(tx);
                }
                Err(e) if e.is_future_nonce() => {
                    // Future nonce: keep pooled until the gap fills.
                    debug!(tx = %tx.hash_hex(), %e, "skipping future-nonce tx");
                }
                Err(e) => {
                    warn!(tx = %tx.hash_hex(), %e, "dropping invalid tx");
                    invalid_txs.push(tx);
                }
            }
        }
        if !invalid_txs.is_empty() {
            self.mempool.remove_transactions(&invalid_txs);
            info!(count = invalid_txs.len(), "removed invalid transactions");
        }

        let state_root = tmp_state
            .compute_state_root()
            .map_err(|e| e.to_string())?;
        let compute_root = compute_poc_root(&valid_txs);
        let tx_root = {
            let mut leaves: Vec<[u8; 32]> = Vec::with_capacity(valid_txs.len());
            for tx in &valid_txs {
                let bytes = hex::decode(tx.hash_hex()).map_err(|e| e.to_string())?;
                let mut leaf = [0u8; 32];
                if bytes.len() == 32 {
                    leaf.copy_from_slice(&bytes);
                }
                leaves.push(leaf);
            }
            hex::encode(merkle_root(&leaves))
        };

        // Slot-aligned timestamp: independent of wall-clock jitter.
        let timestamp = slot_time + round * block_time;

        let header = BlockHeader {
            height: next_height,
            prev_hash: ctx.last_hash.clone(),
            timestamp,
            chain_id: self.chain.network().chain_id.clone(),
            proposer_address: self.address.clone(),
            round,
            tx_root,
            state_root,
            compute_root,
            gas_used: cumulative_gas,
            gas_limit: block_gas_limit,
        };

        let digest = hex::decode(header.hash_hex()).map_err(|e| e.to_string())?;
        let signature = pq::sign(&digest, &self.priv_key).map_err(|e| e.to_string())?;

        let block = Block {
            header,
            txs: valid_txs.clone(),
            pq_signature: hex::encode(signature),
            pq_sig_scheme_id: pq::SCHEME_ID,
        };

        // Gossip race check: another block may have landed while we were
        // preparing. Abort gracefully; the next tick recomputes.
        if self.chain.height() + 1 != next_height as i64 {
            debug!(
                expected = next_height,
                tip = self.chain.height(),
                "lost the block race, aborting proposal"
            );
            return Ok(());
        }

        match self.chain.add_block(&block) {
            Ok(()) => {
                self.mempool.remove_transactions(&valid_txs);
                self.mempool.cleanup_expired();
                let state = self.chain.state_clone();
                self.mempool.prune_stale_transactions(&state);
                info!(height = next_height, round, "produced block");
                if let Some(callback) = &self.on_block_created {
                    callback(&block);
                }
                Ok(())
            }
            Err(e) => Err(format!("failed to add own produced block: {e}")),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
