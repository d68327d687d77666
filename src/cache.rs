//! File-backed snapshot store and the tolerant cache loader.
//!
//! Snapshots live in the output directory as
//! `intermediate_<platform>_<slug>_<hash>.json`. Writes go through
//! [`write_atomic`]: a temporary file in the same directory is written,
//! fsynced, then renamed over the destination, so a crash mid-write leaves
//! the previous snapshot intact.
//!
//! [`CacheStore::load`] never fails: a missing snapshot is a cold start,
//! and an unreadable one is logged and treated the same way.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use codejson_harvester_core::freshness::CacheIndex;
use codejson_harvester_core::models::{IntermediateSnapshot, ScanTarget};
use codejson_harvester_core::store::SnapshotStore;

const SNAPSHOT_PREFIX: &str = "intermediate_";

/// Replace `path` with `bytes` as one unit.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(bytes)
        .with_context(|| format!("Failed to write temp file for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("Failed to sync temp file for {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Snapshots stored as JSON files in one directory.
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, target: &ScanTarget) -> PathBuf {
        self.dir.join(target.snapshot_file_name())
    }

    /// Every snapshot file in the directory, sorted by name.
    pub fn snapshot_files(&self) -> Vec<PathBuf> {
        if !self.dir.exists() {
            return Vec::new();
        }
        let mut files: Vec<PathBuf> = WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                let name = e.file_name().to_string_lossy();
                name.starts_with(SNAPSHOT_PREFIX) && name.ends_with(".json")
            })
            .map(|e| e.into_path())
            .collect();
        files.sort();
        files
    }
}

fn read_snapshot_file(path: &Path) -> Result<IntermediateSnapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Malformed snapshot: {}", path.display()))
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn read(&self, target: &ScanTarget) -> Result<Option<IntermediateSnapshot>> {
        let path = self.path_for(target);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let snapshot = serde_json::from_str(&content)
                    .with_context(|| format!("Malformed snapshot: {}", path.display()))?;
                Ok(Some(snapshot))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read snapshot: {}", path.display()))
            }
        }
    }

    async fn write(&self, snapshot: &IntermediateSnapshot) -> Result<()> {
        let path = self.path_for(&snapshot.target);
        let mut bytes = serde_json::to_vec_pretty(snapshot)?;
        bytes.push(b'\n');
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .context("Snapshot writer task failed")?
    }

    async fn read_all(&self) -> Result<Vec<IntermediateSnapshot>> {
        let files = self.snapshot_files();
        tokio::task::spawn_blocking(move || {
            files
                .iter()
                .filter_map(|path| match read_snapshot_file(path) {
                    Ok(s) => Some(s),
                    Err(e) => {
                        tracing::warn!(file = %path.display(), error = %format!("{:#}", e), "skipping unreadable snapshot");
                        None
                    }
                })
                .collect()
        })
        .await
        .context("Snapshot reader task failed")
    }
}

/// Cache view over a [`SnapshotStore`].
#[derive(Clone)]
pub struct CacheStore {
    store: Arc<dyn SnapshotStore>,
}

impl CacheStore {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// Previous run's records for `target`. Never fails.
    pub async fn load(&self, target: &ScanTarget) -> CacheIndex {
        match self.store.read(target).await {
            Ok(Some(snapshot)) => {
                if snapshot.target.platform != target.platform
                    || snapshot.target.name != target.name
                {
                    tracing::warn!(
                        scan = %target.label(),
                        found = %snapshot.target.label(),
                        "cached snapshot belongs to another target, ignoring"
                    );
                    return CacheIndex::new();
                }
                let index = CacheIndex::from_snapshot(snapshot);
                tracing::debug!(scan = %target.label(), entries = index.len(), "loaded cache");
                index
            }
            Ok(None) => {
                tracing::info!(scan = %target.label(), "no previous snapshot, cold start");
                CacheIndex::new()
            }
            Err(e) => {
                tracing::warn!(
                    scan = %target.label(),
                    error = %format!("{:#}", e),
                    "previous snapshot unreadable, treating cache as empty"
                );
                CacheIndex::new()
            }
        }
    }

    pub async fn save(&self, snapshot: &IntermediateSnapshot) -> Result<()> {
        self.store.write(snapshot).await
    }
}
