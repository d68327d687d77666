//! Snapshot storage abstraction.
//!
//! The [`SnapshotStore`] trait is the persistence seam of the harvester:
//! the target runner reads the previous snapshot as its cache and writes
//! the new one when the target completes, and the merge engine reads them
//! all back. The application crate provides a JSON-file implementation
//! with atomic replacement; [`memory::InMemorySnapshotStore`] serves tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{IntermediateSnapshot, ScanTarget};

/// Abstract storage backend for intermediate snapshots.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`read`](SnapshotStore::read) | Previous snapshot of one target, if any |
/// | [`write`](SnapshotStore::write) | Replace a target's snapshot as one unit |
/// | [`read_all`](SnapshotStore::read_all) | Every readable snapshot |
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Read the stored snapshot for `target`.
    ///
    /// Returns `Ok(None)` when the target has never completed. A snapshot
    /// that exists but cannot be decoded is an `Err`; callers that treat
    /// the snapshot as a cache downgrade that to an empty cache.
    async fn read(&self, target: &ScanTarget) -> Result<Option<IntermediateSnapshot>>;

    /// Replace the snapshot for `snapshot.target`.
    ///
    /// A reader never observes a partially written snapshot: either the
    /// previous snapshot or the new one.
    async fn write(&self, snapshot: &IntermediateSnapshot) -> Result<()>;

    /// Read every snapshot in the store. Unreadable entries are skipped.
    async fn read_all(&self) -> Result<Vec<IntermediateSnapshot>>;
}
