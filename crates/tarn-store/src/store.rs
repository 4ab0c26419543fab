//! The store facade: buffer in front, tree behind, snapshots around.

use crate::snapshot::SnapshotManager;
use tarn_buffer::WriteBuffer;
use tarn_common::key::{KVPair, Unit};
use tarn_common::{Result, StoreConfig, TarnError};
use tarn_storage::{BTree, PageFile, RangeScan, ValueHeap};

/// An embedded ordered key-value store.
///
/// Writes land dirty in the buffer and reach the tree when the dirty count
/// hits the buffer capacity, on explicit [`flush`](Store::flush), before a
/// range scan, and at transaction boundaries. Reads consult the buffer
/// first and populate it clean on a tree hit.
pub struct Store {
    tree: BTree,
    buffer: WriteBuffer,
    snapshots: SnapshotManager,
    /// Dirty-entry threshold that triggers a proactive flush on write.
    max_writes: usize,
}

impl Store {
    /// Opens a store, creating the page file and value heap when absent.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let heap_path = config.heap_path();
        let pages = PageFile::open(&config.path, config.fsync_enabled)?;
        let heap = ValueHeap::open(&heap_path, config.fsync_enabled)?;
        let tree = BTree::open(pages, heap)?;

        tracing::info!(
            path = %config.path.display(),
            entries = tree.size(),
            height = tree.height(),
            "store opened"
        );

        Ok(Self {
            tree,
            buffer: WriteBuffer::new(config.buffer_capacity),
            snapshots: SnapshotManager::new(&config.path, &heap_path),
            max_writes: config.buffer_capacity,
        })
    }

    /// Opens a store at the given path with default configuration.
    pub fn open_path(path: impl Into<std::path::PathBuf>) -> Result<Self> {
        Self::open(StoreConfig::with_path(path))
    }

    /// Writes a pair. The write is buffered; it becomes durable on flush
    /// and transaction commit.
    pub fn write(&mut self, key: &[Unit], value: &[Unit]) -> Result<()> {
        if key.is_empty() {
            return Err(TarnError::EmptyKey);
        }
        if value.is_empty() {
            return Err(TarnError::EmptyValue);
        }

        if self.buffer.dirty_count() >= self.max_writes {
            self.flush()?;
        }

        self.buffer
            .put(key, KVPair::new(key.to_vec(), value.to_vec()), true)
    }

    /// Returns the value for `key`, or `None` if absent.
    pub fn read(&mut self, key: &[Unit]) -> Result<Option<Vec<Unit>>> {
        if key.is_empty() {
            return Err(TarnError::EmptyKey);
        }

        if let Some(pair) = self.buffer.get(key) {
            return Ok(Some(pair.value.clone()));
        }

        match self.tree.get(key)? {
            Some(value) => {
                self.buffer
                    .put(key, KVPair::new(key.to_vec(), value.clone()), false)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Returns a lazy scan over all pairs with `low <= key <= high` in
    /// ascending key order. Flushes first, so the scan reflects every
    /// write issued before it.
    pub fn read_range(&mut self, low: &[Unit], high: &[Unit]) -> Result<RangeScan<'_>> {
        if low.is_empty() || high.is_empty() {
            return Err(TarnError::EmptyKey);
        }

        self.flush()?;
        self.tree.range(low, high)
    }

    /// Writes every dirty pair to the tree and marks the buffer clean.
    pub fn flush(&mut self) -> Result<()> {
        let dirty: Vec<KVPair> = self.buffer.dirty_pairs().cloned().collect();
        if dirty.is_empty() {
            return Ok(());
        }

        tracing::debug!(count = dirty.len(), "flushing dirty entries");
        for pair in &dirty {
            self.tree.put(&pair.key, &pair.value)?;
        }
        self.buffer.clear_dirty();
        Ok(())
    }

    /// Begins a transaction.
    ///
    /// If a prior transaction crashed (or was begun and never committed),
    /// its snapshot still exists: the store rolls back to that checkpoint
    /// first and keeps the snapshot as the new baseline. Otherwise the
    /// current state is flushed and checkpointed.
    pub fn begin_tx(&mut self) -> Result<()> {
        if self.snapshots.in_flight() {
            self.snapshots.restore()?;
            self.buffer.clear();
            self.tree.reload()?;
            tracing::info!(entries = self.tree.size(), "rolled back to checkpoint");
        } else {
            self.flush()?;
            self.tree.sync()?;
            self.snapshots.checkpoint()?;
        }
        Ok(())
    }

    /// Commits the in-flight transaction: flushes everything to the tree
    /// and drops the checkpoint. Without a prior `begin_tx` this flushes
    /// and is otherwise a no-op.
    pub fn commit(&mut self) -> Result<()> {
        self.flush()?;
        self.tree.sync()?;
        self.snapshots.discard()?;
        tracing::debug!(entries = self.tree.size(), "transaction committed");
        Ok(())
    }

    /// Number of pairs in the store: tree entries plus unflushed writes.
    pub fn size(&self) -> usize {
        self.tree.size() + self.buffer.dirty_count()
    }

    /// Number of pairs in the tree on disk.
    pub fn file_size(&self) -> usize {
        self.tree.size()
    }

    /// Number of entries resident in the buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Number of entries resident in the buffer.
    pub fn num_buffer_entries(&self) -> usize {
        self.buffer.len()
    }

    /// Height of the tree on disk.
    pub fn height(&self) -> u32 {
        self.tree.height()
    }
}
