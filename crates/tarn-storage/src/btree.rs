//! Disk-resident B-tree with a doubly-linked leaf-entry chain.
//!
//! Nodes live in fixed-size pages of the [`PageFile`]; value payloads live
//! in the [`ValueHeap`]. External (leaf) entries are threaded into one
//! doubly-linked list across all leaves in key order, addressed by absolute
//! file offset, which makes range scans a chain walk. Mutations collect an
//! affected-entries / affected-nodes write set during the recursive descent
//! and commit it at the top of `put`; crash consistency across those writes
//! is provided by the snapshot layer, not by write ordering.

use crate::heap::ValueHeap;
use crate::node::{Entry, ExternalEntry, InternalEntry, Node, M, MAX_KEY_UNITS};
use crate::pagefile::PageFile;
use tarn_common::key::{equal, geq, less, more, KVPair, Unit};
use tarn_common::page::{FileHeader, PageNo, NIL, PAGE_SIZE};
use tarn_common::{Result, TarnError};

/// Writes accumulated during one `put`, committed together at the top.
#[derive(Default)]
struct WriteSet {
    /// Entries rewritten in place at their `self_offset`, in mutation
    /// order (later repairs of the same entry win).
    entries: Vec<ExternalEntry>,
    /// Nodes rewritten as full pages.
    nodes: Vec<Node>,
    /// True if the key already existed and only its value offset changed.
    overwrote: bool,
}

/// An ordered key-value tree over a page file and a value heap.
pub struct BTree {
    pages: PageFile,
    heap: ValueHeap,
    /// Cached copy of the page file header.
    header: FileHeader,
}

impl BTree {
    /// Opens the tree over the given files, reading the header.
    pub fn open(pages: PageFile, heap: ValueHeap) -> Result<Self> {
        let header = pages.read_header()?;
        Ok(Self {
            pages,
            heap,
            header,
        })
    }

    /// Returns the number of key-value pairs in the tree.
    pub fn size(&self) -> usize {
        self.header.entry_count as usize
    }

    /// Returns true if the tree holds no pairs.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns the height of the tree (0 = root is a leaf).
    pub fn height(&self) -> u32 {
        self.header.height
    }

    /// Re-reads the header from disk, discarding the cached copy. Required
    /// after the files are replaced underneath the tree (snapshot restore).
    pub fn reload(&mut self) -> Result<()> {
        self.header = self.pages.read_header()?;
        Ok(())
    }

    /// Flushes both files to disk.
    pub fn sync(&self) -> Result<()> {
        self.pages.sync()?;
        self.heap.sync()
    }

    /// Returns the value for `key`, or `None` if absent.
    pub fn get(&self, key: &[Unit]) -> Result<Option<Vec<Unit>>> {
        let root = self.read_node(self.header.root_page_no)?;
        match self.search(&root, key, self.header.height, false)? {
            Some(entry) => Ok(Some(self.heap.read(entry.value_offset)?)),
            None => Ok(None),
        }
    }

    /// Returns a lazy scan over all pairs with `low <= key <= high`, in
    /// ascending key order. `low > high` yields an empty scan.
    pub fn range(&self, low: &[Unit], high: &[Unit]) -> Result<RangeScan<'_>> {
        let root = self.read_node(self.header.root_page_no)?;
        let start = self
            .search(&root, low, self.header.height, true)?
            .map(|e| e.self_offset)
            .unwrap_or(NIL);

        Ok(RangeScan {
            tree: self,
            next_offset: start,
            high: high.to_vec(),
        })
    }

    /// Inserts or overwrites a pair.
    pub fn put(&mut self, key: &[Unit], value: &[Unit]) -> Result<()> {
        if key.len() > MAX_KEY_UNITS {
            return Err(TarnError::KeyTooLarge {
                size: key.len(),
                max: MAX_KEY_UNITS,
            });
        }

        // The value goes to the heap first; the leaf entry then refers to
        // it by offset whether the key is new or overwritten.
        let value_offset = self.heap.append(value)?;

        let mut root = self.read_node(self.header.root_page_no)?;
        let mut ws = WriteSet::default();
        let height = self.header.height;
        let sibling = self.insert(&mut root, key, value_offset, height, &mut ws)?;

        if !ws.overwrote {
            self.header.entry_count += 1;
        }

        if let Some(sibling) = sibling {
            // The root split: a new root routes to both halves by their
            // minimum keys.
            let new_root_no = self.allocate_page();
            let mut new_root = Node::new(new_root_no);
            new_root.entries.push(Entry::Internal(InternalEntry {
                key: root.entries[0].key().to_vec(),
                child_page_no: root.page_no,
                self_offset: 0,
            }));
            new_root.entries.push(Entry::Internal(InternalEntry {
                key: sibling.entries[0].key().to_vec(),
                child_page_no: sibling.page_no,
                self_offset: 0,
            }));
            new_root.assign_offsets();

            self.header.root_page_no = new_root_no;
            self.header.height += 1;
            tracing::debug!(
                root = new_root_no,
                height = self.header.height,
                "root split"
            );
            ws.nodes.push(new_root);
        }

        // Commit the write set: in-place entry writes, full-page node
        // writes, then the header.
        for entry in &ws.entries {
            let bytes = Entry::External(entry.clone()).encode();
            self.pages.write_all_at(entry.self_offset, &bytes)?;
        }
        for node in &ws.nodes {
            self.pages.write_page(node.page_no, &node.encode()?)?;
        }
        self.pages.write_header(&self.header)?;

        Ok(())
    }

    /// Reads and validates the node stored on a page.
    fn read_node(&self, page_no: PageNo) -> Result<Node> {
        let data = self.pages.read_page(page_no)?;
        let node = Node::decode(&data)?;
        if node.page_no != page_no {
            return Err(TarnError::PageCorrupted {
                page_no,
                reason: format!("page number mismatch: found {}", node.page_no),
            });
        }
        Ok(node)
    }

    /// Reads the external entry stored at an absolute file offset.
    fn read_entry(&self, offset: u64) -> Result<ExternalEntry> {
        let mut size_buf = [0u8; 4];
        self.pages.read_exact_at(offset, &mut size_buf)?;
        let size = u32::from_be_bytes(size_buf) as usize;

        if size < 13 || size > PAGE_SIZE {
            return Err(TarnError::EntryCorrupted {
                offset,
                reason: format!("entry size {size} out of range"),
            });
        }

        let mut buf = vec![0u8; 4 + size];
        buf[..4].copy_from_slice(&size_buf);
        self.pages.read_exact_at(offset + 4, &mut buf[4..])?;

        let (entry, _) = Entry::decode(&buf, 0, offset)?;
        match entry {
            Entry::External(e) => Ok(e),
            Entry::Internal(_) => Err(TarnError::EntryCorrupted {
                offset,
                reason: "leaf chain points at an internal entry".to_string(),
            }),
        }
    }

    /// Root-to-leaf search. With `want_geq` false, returns the leaf entry
    /// whose key equals `key`; with `want_geq` true, the smallest leaf
    /// entry with key >= `key`, following the leaf chain into the
    /// successor leaf when the descent overshoots.
    fn search(
        &self,
        node: &Node,
        key: &[Unit],
        ht: u32,
        want_geq: bool,
    ) -> Result<Option<ExternalEntry>> {
        if ht != 0 {
            for j in 0..node.m() {
                if j + 1 == node.m() || less(key, node.entries[j + 1].key()) {
                    let child_no = node.entries[j].as_internal()?.child_page_no;
                    let child = self.read_node(child_no)?;
                    return self.search(&child, key, ht - 1, want_geq);
                }
            }
            Ok(None)
        } else {
            for entry in &node.entries {
                let hit = if want_geq {
                    geq(entry.key(), key)
                } else {
                    equal(key, entry.key())
                };
                if hit {
                    return Ok(Some(entry.as_external()?.clone()));
                }
            }
            // Every entry here is below `key`; the smallest entry at or
            // above it is the first one of the successor leaf.
            if want_geq && node.m() > 0 {
                let last = node.entries[node.m() - 1].as_external()?;
                if last.next_offset != NIL {
                    return Ok(Some(self.read_entry(last.next_offset)?));
                }
            }
            Ok(None)
        }
    }

    /// Recursive insertion. Mutates `h` in place; returns the new right
    /// sibling if `h` split. `h` (and the sibling) are pushed onto the
    /// write set once all mutations to them are complete.
    fn insert(
        &mut self,
        h: &mut Node,
        key: &[Unit],
        value_offset: u64,
        ht: u32,
        ws: &mut WriteSet,
    ) -> Result<Option<Node>> {
        let j;
        let mut pending: Option<InternalEntry> = None;

        if ht == 0 {
            let mut at = h.m();
            for i in 0..h.m() {
                if less(key, h.entries[i].key()) {
                    at = i;
                    break;
                }
                if equal(key, h.entries[i].key()) {
                    // Overwrite: retarget the existing entry's value and
                    // rewrite it in place. No structural change.
                    let updated = {
                        let e = h.entries[i].as_external_mut()?;
                        e.value_offset = value_offset;
                        e.clone()
                    };
                    ws.entries.push(updated);
                    ws.overwrote = true;
                    return Ok(None);
                }
            }
            j = at;
        } else {
            let mut descended = None;
            for i in 0..h.m() {
                if i + 1 == h.m() || less(key, h.entries[i + 1].key()) {
                    let child_no = h.entries[i].as_internal()?.child_page_no;
                    let mut child = self.read_node(child_no)?;
                    let Some(sibling) = self.insert(&mut child, key, value_offset, ht - 1, ws)?
                    else {
                        return Ok(None);
                    };
                    pending = Some(InternalEntry {
                        key: sibling.entries[0].key().to_vec(),
                        child_page_no: sibling.page_no,
                        self_offset: 0,
                    });
                    descended = Some(i + 1);
                    break;
                }
            }
            j = descended.ok_or_else(|| TarnError::PageCorrupted {
                page_no: h.page_no,
                reason: "internal node with no entries".to_string(),
            })?;
        }

        if ht == 0 {
            self.splice_leaf(h, j, key, value_offset, ws)?;
        } else if let Some(separator) = pending.take() {
            h.entries.insert(j, Entry::Internal(separator));
            h.assign_offsets();
        }

        if h.m() < M && h.serialized_size() < PAGE_SIZE {
            ws.nodes.push(h.clone());
            return Ok(None);
        }

        let sibling = self.split(h, ht, ws)?;
        ws.nodes.push(h.clone());
        ws.nodes.push(sibling.clone());
        Ok(Some(sibling))
    }

    /// Inserts a new external entry at position `j` of a leaf and repairs
    /// the doubly-linked chain: the leaf's internal links are recomputed
    /// from the new layout, and the neighbouring entries in adjacent
    /// leaves are rewritten where their pointers went stale.
    fn splice_leaf(
        &mut self,
        h: &mut Node,
        j: usize,
        key: &[Unit],
        value_offset: u64,
        ws: &mut WriteSet,
    ) -> Result<()> {
        let prev_in = match h.entries.first() {
            Some(e) => e.as_external()?.prev_offset,
            None => NIL,
        };
        let next_out = match h.entries.last() {
            Some(e) => e.as_external()?.next_offset,
            None => NIL,
        };

        h.entries.insert(
            j,
            Entry::External(ExternalEntry {
                key: key.to_vec(),
                value_offset,
                prev_offset: NIL,
                next_offset: NIL,
                self_offset: 0,
            }),
        );
        h.assign_offsets();
        Self::relink_leaf(h, prev_in, next_out)?;

        // Everything at or after `j` moved, so the successor leaf's first
        // entry points at a stale offset for this leaf's last entry.
        if next_out != NIL {
            let mut neighbour = self.read_entry(next_out)?;
            neighbour.prev_offset = h.entries[h.m() - 1].self_offset();
            ws.entries.push(neighbour);
        }

        // A new minimum took over the old first entry's offset; the
        // predecessor leaf's last entry must point at the new entry.
        if j == 0 && prev_in != NIL {
            let mut neighbour = self.read_entry(prev_in)?;
            neighbour.next_offset = h.entries[0].self_offset();
            ws.entries.push(neighbour);
        }

        Ok(())
    }

    /// Rewrites a leaf's internal chain links from its entry layout,
    /// keeping the given boundary pointers at both ends.
    fn relink_leaf(node: &mut Node, prev_in: u64, next_out: u64) -> Result<()> {
        let offsets: Vec<u64> = node.entries.iter().map(|e| e.self_offset()).collect();
        let m = node.m();
        for i in 0..m {
            let e = node.entries[i].as_external_mut()?;
            e.prev_offset = if i == 0 { prev_in } else { offsets[i - 1] };
            e.next_offset = if i + 1 == m { next_out } else { offsets[i + 1] };
        }
        Ok(())
    }

    /// Splits `h` in half: the lower half stays, the upper half moves to a
    /// freshly allocated page. At leaf level the chain is re-stitched
    /// across the halves and the neighbour just past the split window has
    /// its back-pointer repaired.
    fn split(&mut self, h: &mut Node, ht: u32, ws: &mut WriteSet) -> Result<Node> {
        let keep = h.m() / 2;
        let moved = h.entries.split_off(keep);
        let mut sibling = Node {
            page_no: self.allocate_page(),
            entries: moved,
        };
        sibling.assign_offsets();
        tracing::debug!(
            page = h.page_no,
            sibling = sibling.page_no,
            level = ht,
            "node split"
        );

        if ht == 0 {
            let page_no = h.page_no;
            let last = h.entries.last_mut().ok_or_else(|| TarnError::PageCorrupted {
                page_no,
                reason: "split left an empty node".to_string(),
            })?;
            let left_last_offset = {
                let last = last.as_external_mut()?;
                last.next_offset = sibling.entries[0].self_offset();
                last.self_offset
            };

            let next_out = sibling.entries[sibling.m() - 1].as_external()?.next_offset;
            Self::relink_leaf(&mut sibling, left_last_offset, next_out)?;

            if next_out != NIL {
                let mut neighbour = self.read_entry(next_out)?;
                neighbour.prev_offset = sibling.entries[sibling.m() - 1].self_offset();
                ws.entries.push(neighbour);
            }
        }

        Ok(sibling)
    }

    /// Hands out the next page number. The page materializes when its node
    /// is first written.
    fn allocate_page(&mut self) -> PageNo {
        let page_no = self.header.page_count;
        self.header.page_count += 1;
        page_no
    }
}

/// Lazy, ascending scan over the leaf chain, bounded inclusively.
pub struct RangeScan<'a> {
    tree: &'a BTree,
    /// Offset of the next entry to yield, or `NIL` when exhausted.
    next_offset: u64,
    high: Vec<Unit>,
}

impl Iterator for RangeScan<'_> {
    type Item = Result<KVPair>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_offset == NIL {
            return None;
        }

        let entry = match self.tree.read_entry(self.next_offset) {
            Ok(e) => e,
            Err(e) => {
                self.next_offset = NIL;
                return Some(Err(e));
            }
        };

        if more(&entry.key, &self.high) {
            self.next_offset = NIL;
            return None;
        }

        let value = match self.tree.heap.read(entry.value_offset) {
            Ok(v) => v,
            Err(e) => {
                self.next_offset = NIL;
                return Some(Err(e));
            }
        };

        self.next_offset = entry.next_offset;
        Some(Ok(KVPair::new(entry.key, value)))
    }
}
