//! Whole-file snapshots backing crash-atomic transactions.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tarn_common::Result;

/// Manages the snapshot copies of the page file and the value heap.
///
/// Snapshots live alongside the store files as `<path>-snapshot` and
/// `<path>-entries-snapshot`. The page snapshot is the
/// transaction-in-flight marker: it is created last and deleted last, so
/// whenever it exists the checkpoint it belongs to is complete. A
/// snapshot file is always written under a temporary name and renamed
/// into place, so a snapshot present under its final name is never a
/// partial copy.
///
/// A crash between commit's two deletions leaves only the page snapshot;
/// restoring it against the newer heap is consistent because the heap is
/// append-only (every offset the restored tree references still holds the
/// same bytes).
pub struct SnapshotManager {
    page_live: PathBuf,
    heap_live: PathBuf,
    page_snapshot: PathBuf,
    heap_snapshot: PathBuf,
}

impl SnapshotManager {
    /// Creates a manager for the given live files.
    pub fn new(page_live: impl Into<PathBuf>, heap_live: impl Into<PathBuf>) -> Self {
        let page_live = page_live.into();
        let heap_live = heap_live.into();
        let page_snapshot = snapshot_name(&page_live);
        let heap_snapshot = snapshot_name(&heap_live);
        Self {
            page_live,
            heap_live,
            page_snapshot,
            heap_snapshot,
        }
    }

    /// Returns true if a transaction is in flight (or crashed in flight).
    pub fn in_flight(&self) -> bool {
        self.page_snapshot.exists()
    }

    /// Takes a checkpoint: copies both live files to their snapshots.
    /// The caller must have flushed and fsynced the live files first.
    pub fn checkpoint(&self) -> Result<()> {
        copy_into_place(&self.heap_live, &self.heap_snapshot)?;
        copy_into_place(&self.page_live, &self.page_snapshot)?;
        tracing::debug!(page = %self.page_snapshot.display(), "checkpoint taken");
        Ok(())
    }

    /// Rolls the live files back to the checkpoint. The snapshots stay in
    /// place as the baseline for the next transaction.
    pub fn restore(&self) -> Result<()> {
        tracing::warn!(
            page = %self.page_snapshot.display(),
            "restoring store from snapshot"
        );
        fs::copy(&self.page_snapshot, &self.page_live)?;
        if self.heap_snapshot.exists() {
            fs::copy(&self.heap_snapshot, &self.heap_live)?;
        }
        Ok(())
    }

    /// Deletes the snapshots, making the current state durable. The heap
    /// snapshot goes first; see the type-level comment for why.
    pub fn discard(&self) -> Result<()> {
        if self.heap_snapshot.exists() {
            fs::remove_file(&self.heap_snapshot)?;
        }
        if self.page_snapshot.exists() {
            fs::remove_file(&self.page_snapshot)?;
        }
        Ok(())
    }
}

/// Appends `-snapshot` to the file name of `path`.
fn snapshot_name(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push("-snapshot");
    path.with_file_name(name)
}

/// Copies `src` to `dst` via a temporary name and an atomic rename.
fn copy_into_place(src: &Path, dst: &Path) -> Result<()> {
    let mut tmp_name = dst.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = dst.with_file_name(tmp_name);

    fs::copy(src, &tmp)?;
    File::open(&tmp)?.sync_all()?;
    fs::rename(&tmp, dst)?;
    Ok(())
}
