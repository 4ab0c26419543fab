//! Write buffer with insertion-order eviction.

use std::collections::{HashMap, HashSet, VecDeque};
use tarn_common::key::{KVPair, Unit};
use tarn_common::{Result, TarnError};

/// A bounded write-through cache of key-value pairs.
///
/// Contents:
/// - a map from key to its current pair,
/// - a queue of keys in insertion order (re-inserting a key moves it to
///   the tail), scanned from the oldest end on eviction,
/// - the set of dirty keys: written but not yet flushed to the tree.
///
/// Invariant: every dirty key is resident in the map. Clean entries may be
/// evicted silently; dirty entries are never evicted, so eviction fails
/// with [`TarnError::BufferFull`] when everything resident is dirty.
pub struct WriteBuffer {
    map: HashMap<Vec<Unit>, KVPair>,
    queue: VecDeque<Vec<Unit>>,
    dirty: HashSet<Vec<Unit>>,
    capacity: usize,
}

impl WriteBuffer {
    /// Creates an empty buffer holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            capacity,
        }
    }

    /// Returns the configured capacity in entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of resident entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if nothing is resident.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the number of dirty entries.
    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Looks up a resident pair.
    pub fn get(&self, key: &[Unit]) -> Option<&KVPair> {
        self.map.get(key)
    }

    /// Returns true if the key is resident.
    pub fn contains(&self, key: &[Unit]) -> bool {
        self.map.contains_key(key)
    }

    /// Inserts a pair, moving the key to the tail of the eviction queue.
    /// At capacity, one clean entry is evicted first; if every resident
    /// entry is dirty the insert fails with `BufferFull`.
    pub fn put(&mut self, key: &[Unit], pair: KVPair, dirty: bool) -> Result<()> {
        if self.map.contains_key(key) {
            self.queue.retain(|k| k.as_slice() != key);
        } else if self.map.len() >= self.capacity {
            self.evict_one()?;
        }

        self.queue.push_back(key.to_vec());
        self.map.insert(key.to_vec(), pair);

        if dirty {
            self.dirty.insert(key.to_vec());
        }

        Ok(())
    }

    /// Removes an entry from the map and the queue. Only eviction calls
    /// this, so the key is never dirty.
    fn remove(&mut self, key: &[Unit]) -> Option<KVPair> {
        self.queue.retain(|k| k.as_slice() != key);
        self.map.remove(key)
    }

    /// Evicts the oldest clean entry. Fails with `BufferFull` when every
    /// resident entry is dirty.
    pub fn evict_one(&mut self) -> Result<()> {
        let key = self
            .queue
            .iter()
            .find(|k| !self.dirty.contains(k.as_slice()))
            .cloned()
            .ok_or(TarnError::BufferFull)?;

        tracing::trace!(len = self.map.len(), "evicting clean buffer entry");
        self.remove(&key);
        Ok(())
    }

    /// Iterates over the dirty pairs, in no particular order.
    pub fn dirty_pairs(&self) -> impl Iterator<Item = &KVPair> {
        self.dirty.iter().filter_map(|k| self.map.get(k))
    }

    /// Empties the dirty set. The pairs stay resident as clean entries.
    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Drops everything, resident and dirty alike. Used when a snapshot
    /// rollback invalidates the cached state.
    pub fn clear(&mut self) {
        self.map.clear();
        self.queue.clear();
        self.dirty.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarn_common::key::units;

    fn pair(k: &str, v: &str) -> KVPair {
        KVPair::new(units(k), units(v))
    }

    #[test]
    fn test_put_get() {
        let mut buffer = WriteBuffer::new(4);

        buffer.put(&units("a"), pair("a", "1"), true).unwrap();

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.dirty_count(), 1);
        assert!(buffer.contains(&units("a")));
        assert_eq!(buffer.get(&units("a")).unwrap().value, units("1"));
        assert!(buffer.get(&units("b")).is_none());
    }

    #[test]
    fn test_overwrite_keeps_one_entry() {
        let mut buffer = WriteBuffer::new(4);

        buffer.put(&units("a"), pair("a", "1"), true).unwrap();
        buffer.put(&units("a"), pair("a", "2"), true).unwrap();

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.dirty_count(), 1);
        assert_eq!(buffer.get(&units("a")).unwrap().value, units("2"));
    }

    #[test]
    fn test_eviction_is_fifo_for_clean_entries() {
        let mut buffer = WriteBuffer::new(3);

        buffer.put(&units("a"), pair("a", "1"), false).unwrap();
        buffer.put(&units("b"), pair("b", "2"), false).unwrap();
        buffer.put(&units("c"), pair("c", "3"), false).unwrap();

        // At capacity: the oldest clean entry goes first.
        buffer.put(&units("d"), pair("d", "4"), false).unwrap();

        assert_eq!(buffer.len(), 3);
        assert!(!buffer.contains(&units("a")));
        assert!(buffer.contains(&units("b")));
        assert!(buffer.contains(&units("d")));
    }

    #[test]
    fn test_reinsert_moves_to_tail() {
        let mut buffer = WriteBuffer::new(3);

        buffer.put(&units("a"), pair("a", "1"), false).unwrap();
        buffer.put(&units("b"), pair("b", "2"), false).unwrap();
        buffer.put(&units("c"), pair("c", "3"), false).unwrap();

        // Touch "a": it becomes the newest entry.
        buffer.put(&units("a"), pair("a", "9"), false).unwrap();
        buffer.put(&units("d"), pair("d", "4"), false).unwrap();

        assert!(buffer.contains(&units("a")));
        assert!(!buffer.contains(&units("b")));
    }

    #[test]
    fn test_dirty_entries_never_evicted() {
        let mut buffer = WriteBuffer::new(3);

        buffer.put(&units("a"), pair("a", "1"), true).unwrap();
        buffer.put(&units("b"), pair("b", "2"), false).unwrap();
        buffer.put(&units("c"), pair("c", "3"), true).unwrap();

        buffer.put(&units("d"), pair("d", "4"), true).unwrap();

        // "b" was the only clean entry.
        assert!(!buffer.contains(&units("b")));
        assert!(buffer.contains(&units("a")));
        assert!(buffer.contains(&units("c")));
        assert!(buffer.contains(&units("d")));
    }

    #[test]
    fn test_buffer_full_when_everything_dirty() {
        let mut buffer = WriteBuffer::new(2);

        buffer.put(&units("a"), pair("a", "1"), true).unwrap();
        buffer.put(&units("b"), pair("b", "2"), true).unwrap();

        let result = buffer.put(&units("c"), pair("c", "3"), true);
        assert!(matches!(result, Err(TarnError::BufferFull)));

        // The failed put must not lose existing entries.
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.dirty_count(), 2);
    }

    #[test]
    fn test_dirty_pairs_and_clear() {
        let mut buffer = WriteBuffer::new(4);

        buffer.put(&units("a"), pair("a", "1"), true).unwrap();
        buffer.put(&units("b"), pair("b", "2"), false).unwrap();
        buffer.put(&units("c"), pair("c", "3"), true).unwrap();

        let mut dirty: Vec<String> = buffer
            .dirty_pairs()
            .map(|p| String::from_utf16_lossy(&p.key))
            .collect();
        dirty.sort();
        assert_eq!(dirty, vec!["a", "c"]);

        buffer.clear_dirty();
        assert_eq!(buffer.dirty_count(), 0);
        // Entries stay resident and are now evictable.
        assert_eq!(buffer.len(), 3);

        buffer.put(&units("d"), pair("d", "4"), false).unwrap();
        buffer.put(&units("e"), pair("e", "5"), false).unwrap();
        assert_eq!(buffer.len(), 4);
        assert!(!buffer.contains(&units("a")));
    }

    #[test]
    fn test_overwrite_dirty_stays_single_dirty_entry() {
        let mut buffer = WriteBuffer::new(4);

        buffer.put(&units("a"), pair("a", "1"), true).unwrap();
        buffer.put(&units("a"), pair("a", "2"), true).unwrap();

        assert_eq!(buffer.dirty_count(), 1);
        let dirty: Vec<_> = buffer.dirty_pairs().collect();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].value, units("2"));
    }

    #[test]
    fn test_clean_read_does_not_mark_dirty() {
        let mut buffer = WriteBuffer::new(4);

        buffer.put(&units("a"), pair("a", "1"), false).unwrap();
        assert_eq!(buffer.dirty_count(), 0);
    }

    #[test]
    fn test_clear() {
        let mut buffer = WriteBuffer::new(4);

        buffer.put(&units("a"), pair("a", "1"), true).unwrap();
        buffer.put(&units("b"), pair("b", "2"), false).unwrap();

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.dirty_count(), 0);
        assert!(!buffer.contains(&units("a")));
    }
}
