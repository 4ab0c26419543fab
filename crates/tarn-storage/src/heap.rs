//! Append-only value heap.

use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tarn_common::key::Unit;
use tarn_common::{Result, TarnError};

/// Size of the heap header: the end-of-values offset.
const HEAP_HEADER_SIZE: u64 = 8;

/// Append-only storage for value payloads.
///
/// The file starts with one big-endian `u64`: the offset of the next free
/// byte (`eov`). Records `{ length: u32, units: length x u16 }` follow from
/// offset 8. Values are never reclaimed; overwriting a key abandons the old
/// record and appends a new one. A record's identity is the offset of its
/// `length` field.
pub struct ValueHeap {
    /// The open file handle.
    file: Mutex<File>,
    /// Path to the file.
    path: PathBuf,
    /// Enable fsync after writes.
    fsync_enabled: bool,
}

impl ValueHeap {
    /// Opens an existing value heap, creating it with `eov = 8` if it does
    /// not exist.
    pub fn open(path: impl AsRef<Path>, fsync_enabled: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let create = !path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let heap = Self {
            file: Mutex::new(file),
            path,
            fsync_enabled,
        };

        if create {
            tracing::info!(path = %heap.path.display(), "creating value heap");
            heap.write_end(HEAP_HEADER_SIZE)?;
        }

        Ok(heap)
    }

    /// Returns the path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a value record and returns its offset.
    pub fn append(&self, value: &[Unit]) -> Result<u64> {
        let mut record = BytesMut::with_capacity(4 + value.len() * 2);
        record.put_u32(value.len() as u32);
        for &u in value {
            record.put_u16(u);
        }

        let mut file = self.file.lock();
        let offset = Self::read_end_locked(&mut file)?;

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&record)?;
        let new_end = offset + record.len() as u64;

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&new_end.to_be_bytes())?;

        if self.fsync_enabled {
            file.sync_all()?;
        }

        Ok(offset)
    }

    /// Reads the value record at the given offset.
    pub fn read(&self, offset: u64) -> Result<Vec<Unit>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf) as usize;

        if len == 0 {
            return Err(TarnError::EntryCorrupted {
                offset,
                reason: "zero-length value record".to_string(),
            });
        }

        let mut data = vec![0u8; len * 2];
        file.read_exact(&mut data)?;

        Ok(data
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect())
    }

    /// Returns the current end-of-values offset.
    pub fn end(&self) -> Result<u64> {
        let mut file = self.file.lock();
        Self::read_end_locked(&mut file)
    }

    /// Flushes file contents and metadata to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn read_end_locked(file: &mut File) -> Result<u64> {
        file.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; 8];
        file.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    fn write_end(&self, end: u64) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&end.to_be_bytes())?;

        if self.fsync_enabled {
            file.sync_all()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarn_common::key::units;
    use tempfile::tempdir;

    fn create_test_heap() -> (ValueHeap, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let heap = ValueHeap::open(dir.path().join("entries"), false).unwrap();
        (heap, dir)
    }

    #[test]
    fn test_new_heap_end_is_header_size() {
        let (heap, _dir) = create_test_heap();
        assert_eq!(heap.end().unwrap(), 8);
    }

    #[test]
    fn test_append_read_roundtrip() {
        let (heap, _dir) = create_test_heap();

        let value = units("111");
        let offset = heap.append(&value).unwrap();

        assert_eq!(offset, 8);
        assert_eq!(heap.read(offset).unwrap(), value);
    }

    #[test]
    fn test_append_advances_end() {
        let (heap, _dir) = create_test_heap();

        let off1 = heap.append(&units("abc")).unwrap();
        // Record: 4-byte length + 3 units of 2 bytes.
        assert_eq!(heap.end().unwrap(), off1 + 4 + 6);

        let off2 = heap.append(&units("x")).unwrap();
        assert_eq!(off2, off1 + 10);
        assert_eq!(heap.end().unwrap(), off2 + 6);
    }

    #[test]
    fn test_multiple_records_independent() {
        let (heap, _dir) = create_test_heap();

        let offsets: Vec<u64> = (0..10)
            .map(|i| heap.append(&units(&format!("value_{i}"))).unwrap())
            .collect();

        for (i, &off) in offsets.iter().enumerate() {
            assert_eq!(heap.read(off).unwrap(), units(&format!("value_{i}")));
        }
    }

    #[test]
    fn test_old_records_survive_overwrite_appends() {
        let (heap, _dir) = create_test_heap();

        let old = heap.append(&units("old")).unwrap();
        let new = heap.append(&units("new")).unwrap();

        // Append-only: the abandoned record is still readable.
        assert_eq!(heap.read(old).unwrap(), units("old"));
        assert_eq!(heap.read(new).unwrap(), units("new"));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("entries");

        let offset = {
            let heap = ValueHeap::open(&path, true).unwrap();
            heap.append(&units("durable")).unwrap()
        };

        let heap = ValueHeap::open(&path, true).unwrap();
        assert_eq!(heap.read(offset).unwrap(), units("durable"));
        assert_eq!(heap.end().unwrap(), offset + 4 + 14);
    }

    #[test]
    fn test_non_bmp_units() {
        let (heap, _dir) = create_test_heap();

        // Surrogate pairs round-trip as raw units.
        let value = units("k\u{1F600}v");
        let offset = heap.append(&value).unwrap();
        assert_eq!(heap.read(offset).unwrap(), value);
    }
}
