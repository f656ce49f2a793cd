//! Persistent configuration storage, abstracted as key-value groups.
//!
//! The concrete storage engine a host application uses is treated as an
//! external collaborator; what's in scope here is the shape of the
//! abstraction callers depend on, so the scheduler/history code can be
//! tested without any real disk I/O. [`RonFileConfigGroup`] is the
//! production-shaped default, using `ron` as the serialization format;
//! [`InMemoryConfigGroup`] is the test double.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};

/// A key-value group store: groups are namespaces (e.g. `"PlasmaRunnerManager"`,
/// `"History-work"`), and each group holds string-list-valued keys.
pub trait ConfigGroup: Send + Sync {
    /// Reads the string list at `(group, key)`, or an empty list if absent.
    fn entries(&self, group: &str, key: &str) -> Vec<String>;

    /// Writes the string list at `(group, key)`, replacing any prior value.
    fn set_entries(&self, group: &str, key: &str, values: Vec<String>);

    /// Reads a single boolean-valued key (used for `Plugins.<id>Enabled`).
    fn get_bool(&self, group: &str, key: &str) -> Option<bool>;

    /// Writes a single boolean-valued key.
    fn set_bool(&self, group: &str, key: &str, value: bool);
}

type GroupMap = HashMap<String, HashMap<String, Vec<String>>>;
type BoolMap = HashMap<String, HashMap<String, bool>>;

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    groups: GroupMap,
    bools: BoolMap,
}

/// An in-memory [`ConfigGroup`], cheaply clonable (all clones share the same
/// backing store) — used as the test double throughout this crate's test
/// suite, and as the starting point for [`RonFileConfigGroup`].
#[derive(Clone, Default)]
pub struct InMemoryConfigGroup {
    snapshot: Arc<Mutex<Snapshot>>,
}

impl ConfigGroup for InMemoryConfigGroup {
    fn entries(&self, group: &str, key: &str) -> Vec<String> {
        self.snapshot
            .lock()
            .groups
            .get(group)
            .and_then(|g| g.get(key))
            .cloned()
            .unwrap_or_default()
    }

    fn set_entries(&self, group: &str, key: &str, values: Vec<String>) {
        self.snapshot
            .lock()
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), values);
    }

    fn get_bool(&self, group: &str, key: &str) -> Option<bool> {
        self.snapshot.lock().bools.get(group).and_then(|g| g.get(key)).copied()
    }

    fn set_bool(&self, group: &str, key: &str, value: bool) {
        self.snapshot
            .lock()
            .bools
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }
}

/// A [`ConfigGroup`] backed by a single `ron`-encoded file on disk, loaded
/// eagerly and flushed on every write. Adequate for a launcher's
/// once-per-keystroke write volume; not meant for high-frequency storage.
pub struct RonFileConfigGroup {
    path: PathBuf,
    snapshot: Mutex<Snapshot>,
}

impl RonFileConfigGroup {
    /// Opens (or creates) the config file at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = Self::load(&path)?;
        Ok(Self {
            path,
            snapshot: Mutex::new(snapshot),
        })
    }

    fn load(path: &Path) -> Result<Snapshot> {
        match std::fs::read_to_string(path) {
            Ok(contents) => ron::from_str(&contents)
                .map_err(|e| DispatchError::Config(format!("parsing {}: {e}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Snapshot::default()),
            Err(e) => Err(DispatchError::Config(format!("reading {}: {e}", path.display()))),
        }
    }

    fn flush(&self, snapshot: &Snapshot) {
        let Ok(serialized) = ron::ser::to_string_pretty(snapshot, ron::ser::PrettyConfig::default()) else {
            log::warn!("failed to serialize config snapshot for {}", self.path.display());
            return;
        };
        if let Err(e) = std::fs::write(&self.path, serialized) {
            log::warn!("failed to write config file {}: {e}", self.path.display());
        }
    }
}

impl ConfigGroup for RonFileConfigGroup {
    fn entries(&self, group: &str, key: &str) -> Vec<String> {
        self.snapshot
            .lock()
            .groups
            .get(group)
            .and_then(|g| g.get(key))
            .cloned()
            .unwrap_or_default()
    }

    fn set_entries(&self, group: &str, key: &str, values: Vec<String>) {
        let mut guard = self.snapshot.lock();
        guard.groups.entry(group.to_string()).or_default().insert(key.to_string(), values);
        self.flush(&guard);
    }

    fn get_bool(&self, group: &str, key: &str) -> Option<bool> {
        self.snapshot.lock().bools.get(group).and_then(|g| g.get(key)).copied()
    }

    fn set_bool(&self, group: &str, key: &str, value: bool) {
        let mut guard = self.snapshot.lock();
        guard.bools.entry(group.to_string()).or_default().insert(key.to_string(), value);
        self.flush(&guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ron_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner-dispatch.ron");

        {
            let config = RonFileConfigGroup::open(&path).unwrap();
            config.set_entries("PlasmaRunnerManager", "LaunchCounts", vec!["5 foo".to_string()]);
            config.set_bool("Plugins", "calculatorEnabled", true);
        }

        let reopened = RonFileConfigGroup::open(&path).unwrap();
        assert_eq!(
            reopened.entries("PlasmaRunnerManager", "LaunchCounts"),
            vec!["5 foo".to_string()]
        );
        assert_eq!(reopened.get_bool("Plugins", "calculatorEnabled"), Some(true));
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = RonFileConfigGroup::open(dir.path().join("missing.ron")).unwrap();
        assert!(config.entries("any", "key").is_empty());
    }
}
