// Path: crates/types/src/snapshot.rs
//! State snapshots for fast-sync, content-addressed by their own hash.

use crate::codec;
use crate::Amount;
use cpc_crypto::sha256_hex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A complete state snapshot, stored gzip-compressed on disk and streamed
/// to peers in chunks.
///
/// Accounts and validators are kept as pre-serialized JSON strings keyed by
/// address, so applying a snapshot writes them straight into the state
/// table without a decode/encode round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot format version.
    pub version: String,
    /// Network the snapshot was taken on.
    pub network_id: String,
    /// Block height of the snapshot.
    pub height: u64,
    /// Epoch index at the snapshot height.
    pub epoch_index: u64,
    /// ISO-8601 creation timestamp.
    pub timestamp: String,
    /// Cumulative burned amount at the snapshot height.
    #[serde(default)]
    pub total_burned: Amount,
    /// Cumulative minted amount at the snapshot height.
    #[serde(default)]
    pub total_minted: Amount,
    /// address → serialized `Account` JSON.
    #[serde(default)]
    pub accounts: BTreeMap<String, String>,
    /// address → serialized `Validator` JSON.
    #[serde(default)]
    pub validators: BTreeMap<String, String>,
    /// Self-hash over all fields except this one, in key-sorted compact
    /// JSON. `None` only while the snapshot is being built.
    #[serde(default)]
    pub hash: Option<String>,
}

impl Snapshot {
    /// Computes the content hash: SHA-256 of the key-sorted compact JSON of
    /// every field except `hash`.
    pub fn calculate_hash(&self) -> Result<String, String> {
        let mut value = serde_json::to_value(self)
            .map_err(|e| format!("snapshot encode failed: {e}"))?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("hash");
        }
        let canonical = codec::sorted_json_string(&value)?;
        Ok(sha256_hex(canonical.as_bytes()))
    }

    /// Verifies the embedded self-hash. Returns `false` when the hash is
    /// absent or does not match.
    pub fn verify_hash(&self) -> bool {
        match (&self.hash, self.calculate_hash()) {
            (Some(stored), Ok(computed)) => *stored == computed,
            _ => false,
        }
    }
}

/// Snapshot metadata, stored in a sidecar file for quick querying without
/// decompressing the snapshot itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Snapshot format version.
    pub version: String,
    /// Network the snapshot was taken on.
    pub network_id: String,
    /// Block height of the snapshot.
    pub height: u64,
    /// Epoch index at the snapshot height.
    pub epoch_index: u64,
    /// ISO-8601 creation timestamp.
    pub timestamp: String,
    /// Number of accounts contained.
    pub accounts_count: usize,
    /// Number of validators contained.
    pub validators_count: usize,
    /// Total supply at the snapshot height.
    pub total_supply: Amount,
    /// Cumulative burned amount.
    pub total_burned: Amount,
    /// Cumulative minted amount.
    pub total_minted: Amount,
    /// The snapshot's self-hash.
    pub hash: String,
    /// On-disk compressed size in bytes.
    pub compressed_size: u64,
    /// Uncompressed payload size in bytes.
    pub uncompressed_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        let mut accounts = BTreeMap::new();
        accounts.insert(
            "cpc1a".to_string(),
            r#"{"address":"cpc1a","balance":10,"nonce":0}"#.to_string(),
        );
        Snapshot {
            version: "1.0.0".into(),
            network_id: "devnet".into(),
            height: 42,
            epoch_index: 4,
            timestamp: "2025-01-01T00:00:00Z".into(),
            total_burned: 1,
            total_minted: 2,
            accounts,
            validators: BTreeMap::new(),
            hash: None,
        }
    }

    #[test]
    fn hash_excludes_the_hash_field() {
        let mut snap = sample();
        let h1 = snap.calculate_hash().unwrap();
        snap.hash = Some(h1.clone());
        assert_eq!(snap.calculate_hash().unwrap(), h1);
        assert!(snap.verify_hash());
    }

    #[test]
    fn tampering_breaks_verification() {
        let mut snap = sample();
        snap.hash = Some(snap.calculate_hash().unwrap());
        snap.total_minted += 1;
        assert!(!snap.verify_hash());
    }

    #[test]
    fn unhashed_snapshot_does_not_verify() {
        assert!(!sample().verify_hash());
    }
}
