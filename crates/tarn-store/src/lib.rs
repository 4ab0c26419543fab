//! TarnDB store: the embedded key-value store facade.
//!
//! Composes the write buffer, the disk B-tree, and the snapshot manager
//! into the public store API: `write`, `read`, `read_range`, `flush`, and
//! snapshot-based transactions (`begin_tx`/`commit` with implicit rollback
//! on crash).

mod snapshot;
mod store;

pub use snapshot::SnapshotManager;
pub use store::Store;

pub use tarn_common::{StoreConfig, TarnError};
pub use tarn_storage::RangeScan;
