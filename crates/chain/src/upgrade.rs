// Path: crates/chain/src/upgrade.rs
//! Coordinated chain upgrades and state migrations.
//!
//! An upgrade is scheduled ahead of time with a target version and an
//! activation height. When the chain crosses that height, the registered
//! migration (if any) transforms the state and the persisted chain version
//! advances. The current version lives under the `chain_version` state key.

use cpc_state::StateEngine;
use cpc_storage::ChainStore;
use cpc_types::{StateError, StorageError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

const KEY_CHAIN_VERSION: &str = "chain_version";

/// Semantic version (`MAJOR.MINOR.PATCH`).
///
/// Breaking changes increment MAJOR; backwards-compatible features
/// increment MINOR; fixes increment PATCH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// A node on `self` can follow a chain at `other` when the major
    /// versions agree and `self` is not older.
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major && self >= other
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        let [major, minor, patch] = parts.as_slice() else {
            return Err(format!("invalid version format: {s}"));
        };
        Ok(Self {
            major: major.parse().map_err(|e| format!("bad major: {e}"))?,
            minor: minor.parse().map_err(|e| format!("bad minor: {e}"))?,
            patch: patch.parse().map_err(|e| format!("bad patch: {e}"))?,
        })
    }
}

/// A planned network upgrade, activated at a fixed block height.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradePlan {
    /// Upgrade name, e.g. `phase-2a`.
    pub name: String,
    /// Target version string, e.g. `1.1.0`.
    pub version: String,
    /// Height at which the upgrade activates.
    pub upgrade_height: u64,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Whether a state migration is mandatory.
    #[serde(default)]
    pub breaking_changes: bool,
}

/// A state migration: transforms the state when crossing an upgrade.
pub type Migration = Box<dyn Fn(&mut StateEngine) -> Result<(), StateError> + Send + Sync>;

/// Registry of migration functions keyed by version transition.
#[derive(Default)]
pub struct MigrationRegistry {
    migrations: HashMap<String, Migration>,
}

impl MigrationRegistry {
    fn key(from: &str, to: &str) -> String {
        format!("{from}->{to}")
    }

    /// Registers a migration for the `from` → `to` transition.
    pub fn register(&mut self, from: &str, to: &str, migration: Migration) {
        let key = Self::key(from, to);
        if self.migrations.insert(key.clone(), migration).is_some() {
            warn!(%key, "overwriting registered migration");
        } else {
            info!(%key, "registered migration");
        }
    }

    /// Whether a migration exists for the transition.
    pub fn has_migration(&self, from: &str, to: &str) -> bool {
        self.migrations.contains_key(&Self::key(from, to))
    }

    fn run(
        &self,
        from: &str,
        to: &str,
        state: &mut StateEngine,
    ) -> Result<bool, StateError> {
        match self.migrations.get(&Self::key(from, to)) {
            Some(migration) => {
                migration(state)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

struct VersionState {
    version: Version,
    last_upgrade_height: u64,
    next_upgrade: Option<UpgradePlan>,
}

/// Tracks the chain version and executes scheduled upgrades while blocks
/// are processed.
pub struct UpgradeManager {
    state: Mutex<VersionState>,
    registry: Mutex<MigrationRegistry>,
}

impl UpgradeManager {
    /// A manager starting at version `1.0.0` with no scheduled upgrade.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(VersionState {
                version: Version {
                    major: 1,
                    minor: 0,
                    patch: 0,
                },
                last_upgrade_height: 0,
                next_upgrade: None,
            }),
            registry: Mutex::new(MigrationRegistry::default()),
        }
    }

    /// Restores the persisted chain version, writing the default on first
    /// start.
    pub fn load(&self, store: &ChainStore) -> Result<(), StorageError> {
        match store.get_state(KEY_CHAIN_VERSION)? {
            Some(raw) => {
                let version: Version = raw
                    .parse()
                    .map_err(StorageError::Decode)?;
                self.state.lock().version = version;
                Ok(())
            }
            None => {
                let version = self.state.lock().version;
                store.set_state(KEY_CHAIN_VERSION, &version.to_string())
            }
        }
    }

    /// The current chain version.
    pub fn current_version(&self) -> Version {
        self.state.lock().version
    }

    /// Re-writes the current version to storage (after a state rebuild
    /// cleared the table).
    pub fn persist(&self, store: &ChainStore) -> Result<(), StorageError> {
        let version = self.state.lock().version;
        store.set_state(KEY_CHAIN_VERSION, &version.to_string())
    }

    /// Registers a state migration for a version transition.
    pub fn register_migration(&self, from: &str, to: &str, migration: Migration) {
        self.registry.lock().register(from, to, migration);
    }

    /// Schedules an upgrade. The target version must be strictly newer,
    /// and breaking upgrades must come with a registered migration.
    pub fn schedule_upgrade(&self, plan: UpgradePlan) -> Result<(), String> {
        let target: Version = plan.version.parse()?;
        let mut state = self.state.lock();
        if target <= state.version {
            return Err(format!(
                "target version {target} must be greater than current {}",
                state.version
            ));
        }
        if plan.breaking_changes
            && !self
                .registry
                .lock()
                .has_migration(&state.version.to_string(), &plan.version)
        {
            return Err(format!(
                "breaking upgrade {} has no registered migration",
                plan.name
            ));
        }
        info!(
            name = %plan.name,
            version = %plan.version,
            height = plan.upgrade_height,
            "upgrade scheduled"
        );
        state.next_upgrade = Some(plan);
        Ok(())
    }

    /// Activates a pending upgrade once `height` reaches its activation
    /// height: runs the migration against `state` and advances the
    /// persisted version. Returns `true` when an upgrade activated.
    pub fn maybe_activate(
        &self,
        height: u64,
        engine: &mut StateEngine,
        store: &ChainStore,
    ) -> Result<bool, StateError> {
        let plan = {
            let state = self.state.lock();
            match &state.next_upgrade {
                Some(plan) if height >= plan.upgrade_height => plan.clone(),
                _ => return Ok(false),
            }
        };

        let from = self.current_version().to_string();
        let migrated = self.registry.lock().run(&from, &plan.version, engine)?;
        if plan.breaking_changes && !migrated {
            // Scheduling validated the migration; a miss here means the
            // registry changed since.
            warn!(name = %plan.name, "breaking upgrade activated without migration");
        }

        let target: Version = plan
            .version
            .parse()
            .map_err(StateError::Decode)?;
        {
            let mut state = self.state.lock();
            state.version = target;
            state.last_upgrade_height = height;
            state.next_upgrade = None;
        }
        store
            .set_state(KEY_CHAIN_VERSION, &target.to_string())
            .map_err(StateError::from)?;
        info!(
            name = %plan.name,
            version = %plan.version,
            height,
            migrated,
            "chain upgrade activated"
        );
        Ok(true)
    }
}

impl Default for UpgradeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpc_types::{EconomicConfig, NetworkConfig};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn engine() -> (tempfile::TempDir, ChainStore, StateEngine) {
        let dir = tempdir().unwrap();
        let store = ChainStore::open(dir.path().join("state.redb")).unwrap();
        let engine = StateEngine::new(
            store.clone(),
            Arc::new(NetworkConfig::devnet()),
            Arc::new(EconomicConfig::standard()),
        );
        (dir, store, engine)
    }

    #[test]
    fn version_parse_format_and_order() {
        let v: Version = "1.2.3".parse().unwrap();
        assert_eq!(v.to_string(), "1.2.3");
        assert!("1.2".parse::<Version>().is_err());
        assert!("a.b.c".parse::<Version>().is_err());

        let newer: Version = "1.3.0".parse().unwrap();
        assert!(newer > v);
        assert!(newer.is_compatible_with(&v));
        assert!(!v.is_compatible_with(&newer));
        let breaking: Version = "2.0.0".parse().unwrap();
        assert!(!breaking.is_compatible_with(&v));
    }

    #[test]
    fn load_initializes_and_restores_the_version_key() {
        let (_dir, store, _engine) = engine();
        let manager = UpgradeManager::new();
        manager.load(&store).unwrap();
        assert_eq!(store.get_state("chain_version").unwrap().unwrap(), "1.0.0");

        store.set_state("chain_version", "1.4.2").unwrap();
        let manager = UpgradeManager::new();
        manager.load(&store).unwrap();
        assert_eq!(manager.current_version().to_string(), "1.4.2");
    }

    #[test]
    fn schedule_rejects_stale_and_unmigrated_breaking_upgrades() {
        let manager = UpgradeManager::new();
        assert!(manager
            .schedule_upgrade(UpgradePlan {
                name: "noop".into(),
                version: "1.0.0".into(),
                upgrade_height: 10,
                description: String::new(),
                breaking_changes: false,
            })
            .is_err());

        assert!(manager
            .schedule_upgrade(UpgradePlan {
                name: "breaking".into(),
                version: "2.0.0".into(),
                upgrade_height: 10,
                description: String::new(),
                breaking_changes: true,
            })
            .is_err());

        manager.register_migration("1.0.0", "2.0.0", Box::new(|_| Ok(())));
        assert!(manager
            .schedule_upgrade(UpgradePlan {
                name: "breaking".into(),
                version: "2.0.0".into(),
                upgrade_height: 10,
                description: String::new(),
                breaking_changes: true,
            })
            .is_ok());
    }

    #[test]
    fn activation_runs_the_migration_and_bumps_the_version() {
        let (_dir, store, mut engine) = engine();
        let manager = UpgradeManager::new();
        manager.load(&store).unwrap();

        manager.register_migration(
            "1.0.0",
            "1.1.0",
            Box::new(|state| {
                // The migration credits a marker account.
                let mut acc = state.get_account("cpc1migrated")?;
                acc.balance = 1;
                state.set_account(acc);
                Ok(())
            }),
        );
        manager
            .schedule_upgrade(UpgradePlan {
                name: "phase-2a".into(),
                version: "1.1.0".into(),
                upgrade_height: 5,
                description: "adds compute scoring".into(),
                breaking_changes: false,
            })
            .unwrap();

        // Not yet.
        assert!(!manager.maybe_activate(4, &mut engine, &store).unwrap());
        assert_eq!(manager.current_version().to_string(), "1.0.0");

        // Crossing the activation height.
        assert!(manager.maybe_activate(5, &mut engine, &store).unwrap());
        assert_eq!(manager.current_version().to_string(), "1.1.0");
        assert_eq!(store.get_state("chain_version").unwrap().unwrap(), "1.1.0");
        assert_eq!(engine.get_account("cpc1migrated").unwrap().balance, 1);

        // One-shot: nothing pending afterwards.
        assert!(!manager.maybe_activate(6, &mut engine, &store).unwrap());
    }
}
