// Path: crates/chain/src/snapshot.rs
//! Creation, storage, loading and verification of state snapshots.
//!
//! Snapshots are compressed JSON files, one per height:
//! `snapshot_<H>.json.gz` holds the full snapshot and
//! `snapshot_<H>_meta.json` a metadata sidecar for quick queries.

use chrono::{TimeZone, Utc};
use cpc_state::StateEngine;
use cpc_types::{Amount, Snapshot, SnapshotError, SnapshotMetadata};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const SNAPSHOT_VERSION: &str = "1.0.0";

/// Manages the snapshot directory of one node.
pub struct SnapshotManager {
    snapshots_dir: PathBuf,
}

impl SnapshotManager {
    /// Creates the manager, ensuring the directory exists.
    pub fn new<P: AsRef<Path>>(snapshots_dir: P) -> Result<Self, SnapshotError> {
        let dir = snapshots_dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { snapshots_dir: dir })
    }

    /// Builds a snapshot from the current state and writes it to disk.
    ///
    /// `block_timestamp` (not wall-clock time) stamps the snapshot so that
    /// re-snapshotting the same height reproduces identical bytes.
    pub fn create_snapshot(
        &self,
        state: &StateEngine,
        height: u64,
        network_id: &str,
        block_timestamp: u64,
        genesis_premine: Amount,
    ) -> Result<SnapshotMetadata, SnapshotError> {
        let accounts = state
            .export_accounts()
            .map_err(|e| SnapshotError::Codec(e.to_string()))?;
        let validators = state
            .export_validators()
            .map_err(|e| SnapshotError::Codec(e.to_string()))?;

        let mut snapshot = Snapshot {
            version: SNAPSHOT_VERSION.into(),
            network_id: network_id.into(),
            height,
            epoch_index: state.epoch_index,
            timestamp: iso8601(block_timestamp),
            total_burned: state.total_burned,
            total_minted: state.total_minted,
            accounts,
            validators,
            hash: None,
        };
        snapshot.hash = Some(snapshot.calculate_hash().map_err(SnapshotError::Codec)?);

        let payload = serde_json::to_vec(&snapshot)
            .map_err(|e| SnapshotError::Codec(e.to_string()))?;
        let uncompressed_size = payload.len() as u64;

        let path = self.snapshot_path(height);
        let file = fs::File::create(&path)?;
        let mut encoder = GzEncoder::new(file, Compression::new(6));
        encoder.write_all(&payload)?;
        encoder.finish()?;
        let compressed_size = fs::metadata(&path)?.len();

        let metadata = SnapshotMetadata {
            version: snapshot.version.clone(),
            network_id: snapshot.network_id.clone(),
            height,
            epoch_index: snapshot.epoch_index,
            timestamp: snapshot.timestamp.clone(),
            accounts_count: snapshot.accounts.len(),
            validators_count: snapshot.validators.len(),
            total_supply: state.total_supply(genesis_premine),
            total_burned: snapshot.total_burned,
            total_minted: snapshot.total_minted,
            hash: snapshot.hash.clone().unwrap_or_default(),
            compressed_size,
            uncompressed_size,
        };
        fs::write(
            self.metadata_path(height),
            serde_json::to_vec_pretty(&metadata)
                .map_err(|e| SnapshotError::Codec(e.to_string()))?,
        )?;

        info!(
            height,
            accounts = metadata.accounts_count,
            validators = metadata.validators_count,
            compressed_kib = compressed_size / 1024,
            "snapshot created"
        );
        Ok(metadata)
    }

    /// Loads and verifies the snapshot at `height`.
    pub fn load_snapshot(&self, height: u64) -> Result<Snapshot, SnapshotError> {
        let path = self.snapshot_path(height);
        if !path.exists() {
            return Err(SnapshotError::NotFound(height));
        }
        let mut decoder = GzDecoder::new(fs::File::open(&path)?);
        let mut payload = Vec::new();
        decoder.read_to_end(&mut payload)?;

        let snapshot: Snapshot = serde_json::from_slice(&payload)
            .map_err(|e| SnapshotError::Codec(e.to_string()))?;
        if !snapshot.verify_hash() {
            return Err(SnapshotError::HashMismatch(height));
        }
        Ok(snapshot)
    }

    /// The height of the most recent snapshot, if any.
    pub fn latest_snapshot_height(&self) -> Option<u64> {
        self.list_snapshots()
            .into_iter()
            .map(|m| m.height)
            .max()
    }

    /// All snapshot metadata sidecars, sorted by height descending.
    pub fn list_snapshots(&self) -> Vec<SnapshotMetadata> {
        let Ok(entries) = fs::read_dir(&self.snapshots_dir) else {
            return Vec::new();
        };
        let mut snapshots: Vec<SnapshotMetadata> = entries
            .flatten()
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .ends_with("_meta.json")
            })
            .filter_map(|e| {
                let raw = fs::read_to_string(e.path()).ok()?;
                match serde_json::from_str(&raw) {
                    Ok(meta) => Some(meta),
                    Err(err) => {
                        warn!(path = %e.path().display(), %err, "unreadable snapshot metadata");
                        None
                    }
                }
            })
            .collect();
        snapshots.sort_by(|a, b| b.height.cmp(&a.height));
        snapshots
    }

    /// Deletes the snapshot and metadata at `height`.
    pub fn delete_snapshot(&self, height: u64) {
        let _ = fs::remove_file(self.snapshot_path(height));
        let _ = fs::remove_file(self.metadata_path(height));
    }

    /// Keeps only the `keep_count` most recent snapshots.
    pub fn cleanup_old_snapshots(&self, keep_count: usize) {
        let snapshots = self.list_snapshots();
        for old in snapshots.iter().skip(keep_count) {
            self.delete_snapshot(old.height);
        }
    }

    /// Raw compressed bytes of the snapshot file, for streaming to peers.
    pub fn snapshot_bytes(&self, height: u64) -> Option<Vec<u8>> {
        fs::read(self.snapshot_path(height)).ok()
    }

    /// Writes raw compressed snapshot bytes received from a peer.
    pub fn save_snapshot_bytes(&self, height: u64, data: &[u8]) -> Result<(), SnapshotError> {
        fs::write(self.snapshot_path(height), data)?;
        Ok(())
    }

    fn snapshot_path(&self, height: u64) -> PathBuf {
        self.snapshots_dir.join(format!("snapshot_{height}.json.gz"))
    }

    fn metadata_path(&self, height: u64) -> PathBuf {
        self.snapshots_dir
            .join(format!("snapshot_{height}_meta.json"))
    }
}

fn iso8601(unix: u64) -> String {
    match Utc.timestamp_opt(unix as i64, 0).single() {
        Some(dt) => dt.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        None => "1970-01-01T00:00:00Z".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpc_storage::ChainStore;
    use cpc_types::{Account, EconomicConfig, NetworkConfig};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn engine_with_account(dir: &Path) -> StateEngine {
        let store = ChainStore::open(dir.join("state.redb")).unwrap();
        let mut engine = StateEngine::new(
            store,
            Arc::new(NetworkConfig::devnet()),
            Arc::new(EconomicConfig::standard()),
        );
        let mut acc = Account::new("cpc1holder");
        acc.balance = 12345;
        engine.set_account(acc);
        engine.mint(500);
        engine
    }

    #[test]
    fn create_load_round_trip() {
        let dir = tempdir().unwrap();
        let engine = engine_with_account(dir.path());
        let manager = SnapshotManager::new(dir.path().join("snapshots")).unwrap();

        let meta = manager
            .create_snapshot(&engine, 42, "devnet", 1_700_000_000, 1000)
            .unwrap();
        assert_eq!(meta.height, 42);
        assert_eq!(meta.accounts_count, 1);
        assert_eq!(meta.total_supply, 1500);

        let snapshot = manager.load_snapshot(42).unwrap();
        assert!(snapshot.verify_hash());
        assert_eq!(snapshot.total_minted, 500);
        assert!(snapshot.accounts.contains_key("cpc1holder"));
        assert_eq!(manager.latest_snapshot_height(), Some(42));
    }

    #[test]
    fn resnapshot_of_same_state_is_byte_identical() {
        let dir = tempdir().unwrap();
        let engine = engine_with_account(dir.path());
        let manager = SnapshotManager::new(dir.path().join("snapshots")).unwrap();

        manager
            .create_snapshot(&engine, 7, "devnet", 1_700_000_000, 0)
            .unwrap();
        let first = manager.snapshot_bytes(7).unwrap();
        manager
            .create_snapshot(&engine, 7, "devnet", 1_700_000_000, 0)
            .unwrap();
        let second = manager.snapshot_bytes(7).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn corrupted_snapshot_fails_verification() {
        let dir = tempdir().unwrap();
        let engine = engine_with_account(dir.path());
        let manager = SnapshotManager::new(dir.path().join("snapshots")).unwrap();
        manager
            .create_snapshot(&engine, 9, "devnet", 1_700_000_000, 0)
            .unwrap();

        // Tamper: re-compress a modified payload.
        let snapshot = manager.load_snapshot(9).unwrap();
        let mut tampered = snapshot.clone();
        tampered.total_minted += 1;
        let payload = serde_json::to_vec(&tampered).unwrap();
        let file = fs::File::create(dir.path().join("snapshots/snapshot_9.json.gz")).unwrap();
        let mut enc = GzEncoder::new(file, Compression::new(6));
        enc.write_all(&payload).unwrap();
        enc.finish().unwrap();

        assert!(matches!(
            manager.load_snapshot(9),
            Err(SnapshotError::HashMismatch(9))
        ));
    }

    #[test]
    fn cleanup_keeps_most_recent() {
        let dir = tempdir().unwrap();
        let engine = engine_with_account(dir.path());
        let manager = SnapshotManager::new(dir.path().join("snapshots")).unwrap();
        for h in [10, 20, 30, 40] {
            manager
                .create_snapshot(&engine, h, "devnet", 1_700_000_000, 0)
                .unwrap();
        }
        manager.cleanup_old_snapshots(2);
        let left: Vec<u64> = manager.list_snapshots().iter().map(|m| m.height).collect();
        assert_eq!(left, vec![40, 30]);
        assert!(manager.snapshot_bytes(10).is_none());
    }

    #[test]
    fn missing_snapshot_is_not_found() {
        let dir = tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path().join("snapshots")).unwrap();
        assert!(matches!(
            manager.load_snapshot(99),
            Err(SnapshotError::NotFound(99))
        ));
        assert_eq!(manager.latest_snapshot_height(), None);
    }
}
