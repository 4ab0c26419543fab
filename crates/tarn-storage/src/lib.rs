//! Storage engine for TarnDB.
//!
//! This crate provides:
//! - Page file for fixed-size node storage
//! - Append-only value heap for variable-length payloads
//! - Node and entry serialization
//! - Disk-resident B-tree with a doubly-linked leaf-entry chain

mod btree;
mod heap;
mod node;
mod pagefile;

pub use btree::{BTree, RangeScan};
pub use heap::ValueHeap;
pub use node::{Entry, ExternalEntry, InternalEntry, Node, ENTRY_FRAME_SIZE, M, MAX_KEY_UNITS};
pub use pagefile::PageFile;
