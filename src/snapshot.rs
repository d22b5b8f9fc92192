//! Substitution variables read from a config directory
//!
//! Every regular file in the directory becomes one variable: the file name is
//! the key and the file contents are the value. This is the layout Kubernetes
//! produces when a ConfigMap or Secret is mounted as a volume.
//!
//! Snapshots are immutable; a reload builds a new [`ConfigSnapshot`] and swaps
//! the whole `Arc`, so readers always see one consistent generation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::watch::Reload;
use crate::{Error, Result};

/// Immutable key/value mapping, iterated in sorted key order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSnapshot {
    values: BTreeMap<String, String>,
}

impl ConfigSnapshot {
    /// Build a snapshot from any key/value iterator
    pub fn new<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Look up one value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Entries in lexicographic key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of variables
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` when no variables are loaded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Source of the current snapshot, refreshed out-of-band
pub trait SnapshotProvider: Send + Sync {
    /// The most recently published snapshot (possibly empty)
    fn current(&self) -> Arc<ConfigSnapshot>;
}

/// A fixed snapshot that never changes
impl SnapshotProvider for Arc<ConfigSnapshot> {
    fn current(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(self)
    }
}

/// Live, atomically-swappable snapshot backed by a directory.
///
/// Readers take a read-lock and clone the inner `Arc`; writers swap the whole
/// `Arc` under a write-lock.
pub struct SnapshotStore {
    dir: PathBuf,
    inner: RwLock<Arc<ConfigSnapshot>>,
}

impl SnapshotStore {
    /// Create an empty store for `dir`; nothing is read until [`Self::reload`]
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            inner: RwLock::new(Arc::new(ConfigSnapshot::default())),
        }
    }

    /// Re-read the directory and publish the result.
    ///
    /// On error the previous snapshot stays published.
    pub fn reload(&self) -> Result<Arc<ConfigSnapshot>> {
        let snapshot = Arc::new(load_directory(&self.dir)?);
        *self.inner.write() = Arc::clone(&snapshot);
        info!(
            directory = %self.dir.display(),
            variables = snapshot.len(),
            "Config snapshot loaded"
        );
        Ok(snapshot)
    }

    /// Replace the snapshot directly
    pub fn publish(&self, snapshot: ConfigSnapshot) {
        *self.inner.write() = Arc::new(snapshot);
    }
}

impl SnapshotProvider for SnapshotStore {
    fn current(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.inner.read())
    }
}

impl Reload for SnapshotStore {
    fn name(&self) -> &'static str {
        "config"
    }

    fn reload(&self) -> Result<()> {
        SnapshotStore::reload(self).map(|_| ())
    }
}

/// Read every visible regular file under `dir` into a snapshot.
///
/// Hidden entries (leading `.`) are skipped without descending, which also
/// leaves out the `..data` and timestamped directories of projected volumes.
/// Symlinks are followed when reading, so the visible per-key links resolve.
///
/// # Errors
///
/// Fails if `dir` is missing or not a directory, a file cannot be read, or no
/// variables were found.
pub fn load_directory(dir: &Path) -> Result<ConfigSnapshot> {
    let meta = fs::metadata(dir)
        .map_err(|e| Error::Snapshot(format!("Cannot stat '{}': {e}", dir.display())))?;
    if !meta.is_dir() {
        return Err(Error::Snapshot(format!(
            "not a directory: {}",
            dir.display()
        )));
    }

    let mut values = BTreeMap::new();
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_hidden(e));

    for entry in walker {
        let entry = entry.map_err(|e| {
            Error::Snapshot(format!("error reading directory '{}': {e}", dir.display()))
        })?;
        let path = entry.path();

        // Follow symlinks: a key link pointing at a file counts as a file
        let Ok(target) = fs::metadata(path) else {
            debug!(path = %path.display(), "Skipping dangling entry");
            continue;
        };
        if !target.is_file() {
            continue;
        }

        let key = entry.file_name().to_string_lossy().into_owned();
        let value = fs::read_to_string(path).map_err(|e| {
            Error::Snapshot(format!("error reading file '{}': {e}", path.display()))
        })?;
        values.insert(key, value);
    }

    if values.is_empty() {
        return Err(Error::Snapshot("no configuration found".into()));
    }

    Ok(ConfigSnapshot { values })
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}
