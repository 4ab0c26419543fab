//! Bounded write buffer for TarnDB.
//!
//! A count-bounded cache of key-value pairs that sits in front of the
//! tree. Writes land here marked dirty and reach the tree only on flush;
//! reads populate the buffer clean. Eviction removes the oldest clean
//! entry; dirty entries are never evicted.

mod buffer;

pub use buffer::WriteBuffer;
