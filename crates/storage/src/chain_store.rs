// Path: crates/storage/src/chain_store.rs
use cpc_types::StorageError;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// ---- Table definitions (single DB) ----
const BLOCKS: TableDefinition<u64, &str> = TableDefinition::new("BLOCKS");
const BLOCK_HASHES: TableDefinition<u64, &str> = TableDefinition::new("BLOCK_HASHES");
const BLOCK_INDEX: TableDefinition<&str, u64> = TableDefinition::new("BLOCK_INDEX");
const STATE: TableDefinition<&str, &str> = TableDefinition::new("STATE");

fn backend(e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// The node's on-disk store: block log, hash index and state table.
///
/// Cheap to clone; all handles share one underlying database.
#[derive(Clone)]
pub struct ChainStore {
    db: Arc<Database>,
}

impl ChainStore {
    /// Opens (or creates) the database at `path` and ensures all tables
    /// exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(backend)?;
        {
            let w = db.begin_write().map_err(backend)?;
            w.open_table(BLOCKS).map_err(backend)?;
            w.open_table(BLOCK_HASHES).map_err(backend)?;
            w.open_table(BLOCK_INDEX).map_err(backend)?;
            w.open_table(STATE).map_err(backend)?;
            w.commit().map_err(backend)?;
        }
        debug!(path = %path.as_ref().display(), "chain store opened");
        Ok(Self { db: Arc::new(db) })
    }

    // ---- Block log ----

    /// Persists a block under its height and indexes it by hash.
    pub fn put_block(
        &self,
        height: u64,
        block_hash: &str,
        data: &str,
    ) -> Result<(), StorageError> {
        let w = self.db.begin_write().map_err(backend)?;
        {
            let mut blocks = w.open_table(BLOCKS).map_err(backend)?;
            blocks.insert(height, data).map_err(backend)?;
            let mut hashes = w.open_table(BLOCK_HASHES).map_err(backend)?;
            hashes.insert(height, block_hash).map_err(backend)?;
            let mut index = w.open_table(BLOCK_INDEX).map_err(backend)?;
            index.insert(block_hash, height).map_err(backend)?;
        }
        w.commit().map_err(backend)
    }

    /// Returns the serialized block at `height`, if present.
    pub fn block_by_height(&self, height: u64) -> Result<Option<String>, StorageError> {
        let r = self.db.begin_read().map_err(backend)?;
        let blocks = r.open_table(BLOCKS).map_err(backend)?;
        let result = blocks
            .get(height)
            .map_err(backend)?
            .map(|v| v.value().to_string());
        Ok(result)
    }

    /// Returns the serialized block with the given hash, via the index.
    pub fn block_by_hash(&self, block_hash: &str) -> Result<Option<String>, StorageError> {
        let r = self.db.begin_read().map_err(backend)?;
        let index = r.open_table(BLOCK_INDEX).map_err(backend)?;
        let Some(height) = index.get(block_hash).map_err(backend)?.map(|v| v.value())
        else {
            return Ok(None);
        };
        drop(index);
        let blocks = r.open_table(BLOCKS).map_err(backend)?;
        let result = blocks
            .get(height)
            .map_err(backend)?
            .map(|v| v.value().to_string());
        Ok(result)
    }

    /// Returns `(height, hash, data)` of the highest stored block.
    pub fn last_block(&self) -> Result<Option<(u64, String, String)>, StorageError> {
        let r = self.db.begin_read().map_err(backend)?;
        let blocks = r.open_table(BLOCKS).map_err(backend)?;
        let Some((height, data)) = blocks
            .iter()
            .map_err(backend)?
            .next_back()
            .transpose()
            .map_err(backend)?
            .map(|(k, v)| (k.value(), v.value().to_string()))
        else {
            return Ok(None);
        };
        let hashes = r.open_table(BLOCK_HASHES).map_err(backend)?;
        let hash = hashes
            .get(height)
            .map_err(backend)?
            .map(|v| v.value().to_string())
            .unwrap_or_default();
        Ok(Some((height, hash, data)))
    }

    /// Deletes the block at `height` together with its hash index entry.
    pub fn delete_block(&self, height: u64) -> Result<(), StorageError> {
        let w = self.db.begin_write().map_err(backend)?;
        {
            let mut hashes = w.open_table(BLOCK_HASHES).map_err(backend)?;
            let hash = hashes
                .remove(height)
                .map_err(backend)?
                .map(|v| v.value().to_string());
            let mut blocks = w.open_table(BLOCKS).map_err(backend)?;
            blocks.remove(height).map_err(backend)?;
            if let Some(hash) = hash {
                let mut index = w.open_table(BLOCK_INDEX).map_err(backend)?;
                index.remove(hash.as_str()).map_err(backend)?;
            }
        }
        w.commit().map_err(backend)
    }

    // ---- State table ----

    /// Reads one state entry.
    pub fn get_state(&self, key: &str) -> Result<Option<String>, StorageError> {
        let r = self.db.begin_read().map_err(backend)?;
        let state = r.open_table(STATE).map_err(backend)?;
        let result = state
            .get(key)
            .map_err(backend)?
            .map(|v| v.value().to_string());
        Ok(result)
    }

    /// Writes one state entry.
    pub fn set_state(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let w = self.db.begin_write().map_err(backend)?;
        {
            let mut state = w.open_table(STATE).map_err(backend)?;
            state.insert(key, value).map_err(backend)?;
        }
        w.commit().map_err(backend)
    }

    /// Writes a batch of state entries in one transaction.
    pub fn set_state_batch<'a>(
        &self,
        entries: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<(), StorageError> {
        let w = self.db.begin_write().map_err(backend)?;
        {
            let mut state = w.open_table(STATE).map_err(backend)?;
            for (key, value) in entries {
                state.insert(key, value).map_err(backend)?;
            }
        }
        w.commit().map_err(backend)
    }

    /// Range-scans state keys sharing `prefix`, returning key → value.
    pub fn state_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<BTreeMap<String, String>, StorageError> {
        let r = self.db.begin_read().map_err(backend)?;
        let state = r.open_table(STATE).map_err(backend)?;
        let mut out = BTreeMap::new();
        for entry in state.range(prefix..).map_err(backend)? {
            let (k, v) = entry.map_err(backend)?;
            let key = k.value().to_string();
            if !key.starts_with(prefix) {
                break;
            }
            out.insert(key, v.value().to_string());
        }
        Ok(out)
    }

    /// Deletes every state entry. The block log is untouched.
    pub fn clear_state(&self) -> Result<(), StorageError> {
        let w = self.db.begin_write().map_err(backend)?;
        {
            let mut state = w.open_table(STATE).map_err(backend)?;
            // redb has no truncate; drain by retaining nothing.
            let keys: Vec<String> = state
                .iter()
                .map_err(backend)?
                .filter_map(|e| e.ok().map(|(k, _)| k.value().to_string()))
                .collect();
            for key in keys {
                state.remove(key.as_str()).map_err(backend)?;
            }
        }
        w.commit().map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, ChainStore) {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path().join("chain.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn block_round_trip_by_height_and_hash() {
        let (_dir, store) = open_store();
        store.put_block(0, "aa", "{\"h\":0}").unwrap();
        store.put_block(1, "bb", "{\"h\":1}").unwrap();

        assert_eq!(store.block_by_height(1).unwrap().unwrap(), "{\"h\":1}");
        assert_eq!(store.block_by_hash("aa").unwrap().unwrap(), "{\"h\":0}");
        assert!(store.block_by_hash("cc").unwrap().is_none());

        let (h, hash, data) = store.last_block().unwrap().unwrap();
        assert_eq!((h, hash.as_str(), data.as_str()), (1, "bb", "{\"h\":1}"));
    }

    #[test]
    fn delete_block_clears_hash_index() {
        let (_dir, store) = open_store();
        store.put_block(0, "aa", "{}").unwrap();
        store.delete_block(0).unwrap();
        assert!(store.block_by_height(0).unwrap().is_none());
        assert!(store.block_by_hash("aa").unwrap().is_none());
        assert!(store.last_block().unwrap().is_none());
    }

    #[test]
    fn state_prefix_scan_is_exact() {
        let (_dir, store) = open_store();
        store.set_state("acc:cpc1a", "1").unwrap();
        store.set_state("acc:cpc1b", "2").unwrap();
        store.set_state("val:cpcvalcons1a", "3").unwrap();
        store.set_state("epoch_index", "4").unwrap();

        let accounts = store.state_by_prefix("acc:").unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts.get("acc:cpc1b").map(String::as_str), Some("2"));

        let validators = store.state_by_prefix("val:").unwrap();
        assert_eq!(validators.len(), 1);
    }

    #[test]
    fn clear_state_keeps_blocks() {
        let (_dir, store) = open_store();
        store.put_block(0, "aa", "{}").unwrap();
        store.set_state("acc:x", "1").unwrap();
        store.clear_state().unwrap();
        assert!(store.get_state("acc:x").unwrap().is_none());
        assert!(store.block_by_height(0).unwrap().is_some());
    }

    #[test]
    fn batch_write_is_visible() {
        let (_dir, store) = open_store();
        store
            .set_state_batch([("a", "1"), ("b", "2")])
            .unwrap();
        assert_eq!(store.get_state("b").unwrap().unwrap(), "2");
    }
}
