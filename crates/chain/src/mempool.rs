// Path: crates/chain/src/mempool.rs
//! The transaction pool: bounded, per-sender capped, TTL-pruned.
//!
//! Admission performs only stateless checks (signature, key/address match,
//! gas floors); nonce and balance validation happen when the proposer
//! drafts a block. The pool does not survive restarts.

use cpc_crypto::address_from_pubkey;
use cpc_state::StateEngine;
use cpc_types::config::base_gas;
use cpc_types::{MempoolError, NetworkConfig, Transaction, TxError};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_MAX_SIZE: usize = 100_000;
const DEFAULT_MAX_TX_PER_SENDER: usize = 1000;
const DEFAULT_TX_TTL: Duration = Duration::from_secs(3600);

struct PoolEntry {
    tx: Transaction,
    hash: String,
    added_at: Instant,
}

#[derive(Default)]
struct PoolInner {
    entries: Vec<PoolEntry>,
    hashes: HashSet<String>,
}

/// The shared transaction pool. All methods take `&self`; an internal lock
/// serializes add/remove/prune.
pub struct Mempool {
    inner: Mutex<PoolInner>,
    network: Arc<NetworkConfig>,
    max_size: usize,
    max_tx_per_sender: usize,
    tx_ttl: Duration,
}

impl Mempool {
    /// Creates a pool with the default bounds.
    pub fn new(network: Arc<NetworkConfig>) -> Self {
        Self::with_limits(
            network,
            DEFAULT_MAX_SIZE,
            DEFAULT_MAX_TX_PER_SENDER,
            DEFAULT_TX_TTL,
        )
    }

    /// Creates a pool with explicit bounds (used by tests).
    pub fn with_limits(
        network: Arc<NetworkConfig>,
        max_size: usize,
        max_tx_per_sender: usize,
        tx_ttl: Duration,
    ) -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
            network,
            max_size,
            max_tx_per_sender,
            tx_ttl,
        }
    }

    /// Admits a transaction after stateless validation.
    pub fn add_transaction(&self, tx: Transaction) -> Result<(), MempoolError> {
        let hash = tx.hash_hex();
        let mut inner = self.inner.lock();

        if inner.hashes.contains(&hash) {
            return Err(MempoolError::AlreadyInPool);
        }

        // Anti-spam floors.
        if tx.gas_price < self.network.min_gas_price {
            warn!(tx = %short(&hash), "reject: gas price below minimum");
            return Err(TxError::GasPriceTooLow {
                price: tx.gas_price,
                min: self.network.min_gas_price,
            }
            .into());
        }
        let base = base_gas(tx.tx_type);
        if tx.gas_limit < base {
            warn!(tx = %short(&hash), "reject: gas limit below base gas");
            return Err(TxError::GasLimitTooLow {
                limit: tx.gas_limit,
                needed: base,
            }
            .into());
        }
        let needed_fee = base as u128 * tx.gas_price;
        if tx.fee < needed_fee {
            warn!(tx = %short(&hash), "reject: fee below needed fee");
            return Err(TxError::FeeTooLow {
                fee: tx.fee,
                needed: needed_fee,
            }
            .into());
        }

        if inner.entries.len() >= self.max_size {
            warn!("mempool full, rejecting transaction");
            return Err(MempoolError::PoolFull);
        }
        let sender_count = inner
            .entries
            .iter()
            .filter(|e| e.tx.from == tx.from)
            .count();
        if sender_count >= self.max_tx_per_sender {
            warn!(tx = %short(&hash), sender = %tx.from, "reject: sender limit");
            return Err(MempoolError::SenderLimitExceeded(tx.from.clone()));
        }

        // Stateless crypto validation.
        if tx.signature.is_empty() || tx.pub_key.is_empty() {
            return Err(TxError::MissingCredentials.into());
        }
        let prefix = tx
            .from
            .split_once('1')
            .map(|(p, _)| p)
            .ok_or_else(|| TxError::InvalidKeyMaterial("no bech32 separator".into()))
            .map_err(MempoolError::Invalid)?;
        let pub_bytes = hex::decode(&tx.pub_key)
            .map_err(|e| MempoolError::Invalid(TxError::InvalidKeyMaterial(e.to_string())))?;
        let derived = address_from_pubkey(&pub_bytes, prefix)
            .map_err(|e| MempoolError::Invalid(TxError::InvalidKeyMaterial(e.to_string())))?;
        if derived != tx.from {
            warn!(tx = %short(&hash), "reject: pub_key mismatch");
            return Err(TxError::PubKeyMismatch {
                derived,
                expected: tx.from.clone(),
            }
            .into());
        }
        let digest = hex::decode(&hash)
            .map_err(|e| MempoolError::Invalid(TxError::InvalidKeyMaterial(e.to_string())))?;
        let sig = hex::decode(&tx.signature)
            .map_err(|e| MempoolError::Invalid(TxError::InvalidKeyMaterial(e.to_string())))?;
        if !cpc_crypto::verify(&digest, &sig, &pub_bytes) {
            warn!(tx = %short(&hash), "reject: invalid signature");
            return Err(TxError::InvalidSignature.into());
        }

        debug!(tx = %short(&hash), "transaction admitted to mempool");
        inner.hashes.insert(hash.clone());
        inner.entries.push(PoolEntry {
            tx,
            hash,
            added_at: Instant::now(),
        });
        Ok(())
    }

    /// Returns up to `max_count` transactions in arrival order.
    pub fn get_transactions(&self, max_count: usize) -> Vec<Transaction> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .take(max_count)
            .map(|e| e.tx.clone())
            .collect()
    }

    /// Removes the given transactions (by hash) from the pool.
    pub fn remove_transactions(&self, txs: &[Transaction]) {
        let hashes: HashSet<String> = txs.iter().map(|t| t.hash_hex()).collect();
        let mut inner = self.inner.lock();
        inner.entries.retain(|e| !hashes.contains(&e.hash));
        for h in &hashes {
            inner.hashes.remove(h);
        }
    }

    /// Evicts transactions whose nonce fell below the sender's on-chain
    /// nonce. Returns the number removed.
    pub fn prune_stale_transactions(&self, state: &StateEngine) -> usize {
        let mut inner = self.inner.lock();
        let mut stale: HashSet<String> = HashSet::new();
        for entry in &inner.entries {
            match state.get_account(&entry.tx.from) {
                Ok(account) if entry.tx.nonce < account.nonce => {
                    stale.insert(entry.hash.clone());
                }
                Ok(_) => {}
                Err(e) => {
                    // Keep the transaction when the account cannot be read.
                    debug!(tx = %short(&entry.hash), %e, "nonce check failed");
                }
            }
        }
        inner.entries.retain(|e| !stale.contains(&e.hash));
        for h in &stale {
            inner.hashes.remove(h);
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "pruned stale transactions");
        }
        stale.len()
    }

    /// Evicts transactions older than the pool TTL. Returns the number
    /// removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let ttl = self.tx_ttl;
        let before = inner.entries.len();
        let now = Instant::now();
        let expired: HashSet<String> = inner
            .entries
            .iter()
            .filter(|e| now.duration_since(e.added_at) > ttl)
            .map(|e| e.hash.clone())
            .collect();
        inner.entries.retain(|e| !expired.contains(&e.hash));
        for h in &expired {
            inner.hashes.remove(h);
        }
        let removed = before - inner.entries.len();
        if removed > 0 {
            info!(count = removed, "cleaned up expired transactions");
        }
        removed
    }

    /// Number of pooled transactions.
    pub fn size(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether a transaction with this hash is pooled.
    pub fn contains(&self, tx_hash: &str) -> bool {
        self.inner.lock().hashes.contains(tx_hash)
    }
}

fn short(hash: &str) -> &str {
    hash.get(..8).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpc_crypto::{generate_private_key, public_key_from_private};
    use cpc_storage::ChainStore;
    use cpc_types::{EconomicConfig, TxType};
    use tempfile::tempdir;

    fn network() -> Arc<NetworkConfig> {
        Arc::new(NetworkConfig::devnet())
    }

    fn signed_tx(nonce: u64) -> Transaction {
        let priv_key = generate_private_key();
        let pub_key = public_key_from_private(&priv_key).unwrap();
        let from = address_from_pubkey(&pub_key, "cpc").unwrap();
        let mut tx = Transaction {
            tx_type: TxType::Transfer,
            from,
            to: Some("cpc1rcpt".into()),
            amount: 1,
            fee: 21_000 * 1000,
            nonce,
            gas_price: 1000,
            gas_limit: 21_000,
            payload: serde_json::Map::new(),
            pub_key: hex::encode(&pub_key),
            signature: String::new(),
            timestamp: 0,
        };
        tx.sign(&priv_key).unwrap();
        tx
    }

    #[test]
    fn admits_and_deduplicates() {
        let pool = Mempool::new(network());
        let tx = signed_tx(0);
        pool.add_transaction(tx.clone()).unwrap();
        assert_eq!(pool.size(), 1);
        assert!(pool.contains(&tx.hash_hex()));
        assert!(matches!(
            pool.add_transaction(tx),
            Err(MempoolError::AlreadyInPool)
        ));
    }

    #[test]
    fn rejects_gas_floor_violations() {
        let pool = Mempool::new(network());

        let mut cheap = signed_tx(0);
        cheap.gas_price = 1; // below devnet minimum
        assert!(matches!(
            pool.add_transaction(cheap),
            Err(MempoolError::Invalid(TxError::GasPriceTooLow { .. }))
        ));

        let mut low_fee = signed_tx(0);
        low_fee.fee = 10;
        assert!(matches!(
            pool.add_transaction(low_fee),
            Err(MempoolError::Invalid(TxError::FeeTooLow { .. }))
        ));
    }

    #[test]
    fn rejects_bad_signatures() {
        let pool = Mempool::new(network());
        let mut tx = signed_tx(0);
        tx.amount = 999; // signature no longer matches
        assert!(matches!(
            pool.add_transaction(tx),
            Err(MempoolError::Invalid(TxError::InvalidSignature))
        ));
    }

    #[test]
    fn pool_size_bound() {
        let pool = Mempool::with_limits(network(), 2, 10, DEFAULT_TX_TTL);
        pool.add_transaction(signed_tx(0)).unwrap();
        pool.add_transaction(signed_tx(0)).unwrap();
        assert!(matches!(
            pool.add_transaction(signed_tx(0)),
            Err(MempoolError::PoolFull)
        ));
    }

    #[test]
    fn fifo_draw_and_removal() {
        let pool = Mempool::new(network());
        let a = signed_tx(0);
        let b = signed_tx(0);
        pool.add_transaction(a.clone()).unwrap();
        pool.add_transaction(b.clone()).unwrap();

        let drawn = pool.get_transactions(10);
        assert_eq!(drawn.len(), 2);
        assert_eq!(drawn[0].hash_hex(), a.hash_hex());

        pool.remove_transactions(&[a]);
        assert_eq!(pool.size(), 1);
        assert!(pool.contains(&b.hash_hex()));
    }

    #[test]
    fn prunes_stale_nonces() {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path().join("state.redb")).unwrap();
        let mut engine =
            StateEngine::new(store, network(), Arc::new(EconomicConfig::standard()));

        let pool = Mempool::new(network());
        let tx = signed_tx(0);
        let sender = tx.from.clone();
        pool.add_transaction(tx).unwrap();

        // The chain has moved past nonce 0 for this sender.
        let mut acc = engine.get_account(&sender).unwrap();
        acc.nonce = 5;
        engine.set_account(acc);

        assert_eq!(pool.prune_stale_transactions(&engine), 1);
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn ttl_cleanup() {
        let pool = Mempool::with_limits(network(), 100, 10, Duration::from_millis(0));
        pool.add_transaction(signed_tx(0)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(pool.cleanup_expired(), 1);
        assert_eq!(pool.size(), 0);
    }
}
