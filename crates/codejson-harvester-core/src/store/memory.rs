//! In-memory [`SnapshotStore`] implementation for tests.
//!
//! Snapshots are kept as serialized JSON behind a `std::sync::RwLock`, so
//! a read returns exactly what a file-backed store would decode.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;

use crate::models::{IntermediateSnapshot, Platform, ScanTarget};

use super::SnapshotStore;

type Key = (Platform, String);

/// In-memory snapshot store.
pub struct InMemorySnapshotStore {
    snapshots: RwLock<BTreeMap<Key, String>>,
    writes: AtomicUsize,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self {
            snapshots: RwLock::new(BTreeMap::new()),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of successful writes since creation.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Raw JSON stored for `target`.
    pub fn raw(&self, target: &ScanTarget) -> Option<String> {
        self.snapshots
            .read()
            .ok()
            .and_then(|s| s.get(&key(target)).cloned())
    }

    /// Store raw bytes for `target`, bypassing serialization.
    pub fn put_raw(&self, target: &ScanTarget, raw: impl Into<String>) -> Result<()> {
        let mut guard = self
            .snapshots
            .write()
            .map_err(|_| anyhow!("snapshot store lock poisoned"))?;
        guard.insert(key(target), raw.into());
        Ok(())
    }
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

fn key(target: &ScanTarget) -> Key {
    (target.platform, target.name.clone())
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn read(&self, target: &ScanTarget) -> Result<Option<IntermediateSnapshot>> {
        match self.raw(target) {
            None => Ok(None),
            Some(raw) => {
                let snapshot = serde_json::from_str(&raw)
                    .with_context(|| format!("Malformed snapshot for {}", target.label()))?;
                Ok(Some(snapshot))
            }
        }
    }

    async fn write(&self, snapshot: &IntermediateSnapshot) -> Result<()> {
        let raw = serde_json::to_string_pretty(snapshot)?;
        self.put_raw(&snapshot.target, raw)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read_all(&self) -> Result<Vec<IntermediateSnapshot>> {
        let guard = self
            .snapshots
            .read()
            .map_err(|_| anyhow!("snapshot store lock poisoned"))?;
        Ok(guard
            .values()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect())
    }
}
