//! Version-1 B-trees: keyed by chunk coordinates (node-type 1, indexing a
//! chunked dataset's chunks) or by local-heap name offset (node-type 0,
//! indexing a v1 group's symbol-table nodes) — spec.md §3 "B-trees", §4.5,
//! §6 "B-tree v1 node".
//!
//! Both node types share one on-disk envelope (`TREE` signature, node-type,
//! level, entries-used, sibling addresses, then `entries_used + 1`
//! `(key, child)` pairs — the trailing key bounds the last child's range).
//! Splitting into multiple leaves under one internal root happens at
//! `2 * k` entries, per spec.md §4.5; this engine builds the whole tree in
//! one pass rather than doing incremental on-disk splits, since nothing is
//! deleted or inserted into an already-written file in this MVP.

use std::cmp::Ordering;

use crate::alloc::Allocator;
use crate::error::{Error, Result};
use crate::io::FileIo;
use crate::primitive::{read_address, read_u16, read_u32, read_u8, write_address};

const SIGNATURE: &[u8; 4] = b"TREE";
pub const NODE_TYPE_GROUP: u8 = 0;
pub const NODE_TYPE_CHUNK: u8 = 1;

/// Default split threshold (`2 * K`, spec.md's "Splits at 2K entries").
const DEFAULT_K: u16 = 16;

/// A chunk's key: stored byte size, applied-filter mask, and the R+1
/// chunk coordinates (the trailing coordinate is always 0, spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkKey {
    pub size: u32,
    pub filter_mask: u32,
    pub coords: Vec<u64>,
}

impl ChunkKey {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 8 * self.coords.len());
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.filter_mask.to_le_bytes());
        for c in &self.coords {
            out.extend_from_slice(&c.to_le_bytes());
        }
        out
    }

    fn decode(data: &[u8], rank_plus_one: usize) -> Result<Self> {
        let (input, size) = read_u32(data)?;
        let (mut input, filter_mask) = read_u32(input)?;
        let mut coords = Vec::with_capacity(rank_plus_one);
        for _ in 0..rank_plus_one {
            let (rest, c) = crate::primitive::read_u64(input)?;
            coords.push(c);
            input = rest;
        }
        Ok(ChunkKey {
            size,
            filter_mask,
            coords,
        })
    }

    fn byte_len(rank_plus_one: usize) -> usize {
        8 + 8 * rank_plus_one
    }
}

/// A single stored chunk: its key plus the address of its (possibly
/// filtered) byte payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub key: ChunkKey,
    pub address: u64,
}

/// The chunked-dataset index: coordinate → (address, size, filter mask).
#[derive(Debug, Clone, Default)]
pub struct ChunkBTree {
    records: Vec<ChunkRecord>,
    k: u16,
}

impl ChunkBTree {
    pub fn new() -> Self {
        ChunkBTree {
            records: Vec::new(),
            k: DEFAULT_K,
        }
    }

    /// Inserts the chunk at `coords` (keeping `records` sorted lexicographic
    /// over coordinates, as spec.md §4.5 requires for key comparison).
    pub fn insert(&mut self, coords: Vec<u64>, address: u64, size: u32, filter_mask: u32) {
        let key = ChunkKey {
            size,
            filter_mask,
            coords,
        };
        let pos = self
            .records
            .binary_search_by(|r| compare_coords(&r.key.coords, &key.coords))
            .unwrap_or_else(|i| i);
        self.records.insert(pos, ChunkRecord { key, address });
    }

    pub fn lookup(&self, coords: &[u64]) -> Result<(u64, u32, u32)> {
        self.records
            .binary_search_by(|r| compare_coords(&r.key.coords, coords))
            .map(|i| {
                let r = &self.records[i];
                (r.address, r.key.size, r.key.filter_mask)
            })
            .map_err(|_| Error::NotFound {
                kind: "chunk",
                key: format!("{coords:?}"),
            })
    }

    pub fn iterate(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.records.iter()
    }

    pub fn write(&self, io: &mut FileIo, alloc: &mut Allocator, offset_size: u8, rank_plus_one: usize) -> Result<u64> {
        let key_len = ChunkKey::byte_len(rank_plus_one);
        write_tree(
            io,
            alloc,
            offset_size,
            NODE_TYPE_CHUNK,
            self.k,
            &self.records.iter().map(|r| (r.key.encode(), r.address)).collect::<Vec<_>>(),
            key_len,
        )
    }

    pub fn decode(io: &FileIo, address: u64, offset_size: u8, rank_plus_one: usize) -> Result<Self> {
        let key_len = ChunkKey::byte_len(rank_plus_one);
        let raw = read_tree(io, address, offset_size, key_len)?;
        let records = raw
            .into_iter()
            .map(|(key_bytes, addr)| {
                Ok(ChunkRecord {
                    key: ChunkKey::decode(&key_bytes, rank_plus_one)?,
                    address: addr,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ChunkBTree { records, k: DEFAULT_K })
    }
}

fn compare_coords(a: &[u64], b: &[u64]) -> Ordering {
    a.cmp(b)
}

/// The v1 group index: local-heap name offset → symbol-table-node address.
/// Each leaf entry's key is the offset of the *first* name stored in the
/// `SNOD` it points at, used only to route a name search to the right node.
#[derive(Debug, Clone, Default)]
pub struct GroupBTree {
    /// (first name offset in this SNOD, SNOD address)
    leaves: Vec<(u64, u64)>,
    k: u16,
}

impl GroupBTree {
    pub fn new() -> Self {
        GroupBTree {
            leaves: Vec::new(),
            k: DEFAULT_K,
        }
    }

    pub fn push_leaf(&mut self, first_name_offset: u64, snod_address: u64) {
        self.leaves.push((first_name_offset, snod_address));
    }

    pub fn leaves(&self) -> &[(u64, u64)] {
        &self.leaves
    }

    pub fn write(&self, io: &mut FileIo, alloc: &mut Allocator, offset_size: u8) -> Result<u64> {
        let entries: Vec<(Vec<u8>, u64)> = self
            .leaves
            .iter()
            .map(|(offset, addr)| (offset.to_le_bytes().to_vec(), *addr))
            .collect();
        write_tree(io, alloc, offset_size, NODE_TYPE_GROUP, self.k, &entries, 8)
    }

    pub fn decode(io: &FileIo, address: u64, offset_size: u8) -> Result<Self> {
        let raw = read_tree(io, address, offset_size, 8)?;
        let leaves = raw
            .into_iter()
            .map(|(key_bytes, addr)| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&key_bytes[..8]);
                (u64::from_le_bytes(buf), addr)
            })
            .collect();
        Ok(GroupBTree { leaves, k: DEFAULT_K })
    }
}

/// Packs `entries` (already sorted by key) into one or more `TREE` leaf
/// nodes, chained under a single internal root once they exceed `2*k`
/// entries, and writes the whole structure. Returns the root's address.
fn write_tree(
    io: &mut FileIo,
    alloc: &mut Allocator,
    offset_size: u8,
    node_type: u8,
    k: u16,
    entries: &[(Vec<u8>, u64)],
    key_len: usize,
) -> Result<u64> {
    let max_per_leaf = 2 * k as usize;
    if entries.len() <= max_per_leaf || entries.is_empty() {
        return write_node(io, alloc, offset_size, node_type, 0, None, None, entries, key_len);
    }

    let chunks: Vec<&[(Vec<u8>, u64)]> = entries.chunks(max_per_leaf).collect();
    let mut leaf_addresses = Vec::with_capacity(chunks.len());
    for chunk in &chunks {
        let addr = write_node(io, alloc, offset_size, node_type, 0, None, None, chunk, key_len)?;
        leaf_addresses.push(addr);
    }

    // Internal root: one (first-key-of-child, child-address) pair per leaf,
    // plus the final leaf's last key as the trailing boundary key.
    let mut internal_entries = Vec::with_capacity(chunks.len());
    for (chunk, addr) in chunks.iter().zip(&leaf_addresses) {
        internal_entries.push((chunk[0].0.clone(), *addr));
    }
    write_node(io, alloc, offset_size, node_type, 1, None, None, &internal_entries, key_len)
}

fn write_node(
    io: &mut FileIo,
    alloc: &mut Allocator,
    offset_size: u8,
    node_type: u8,
    level: u8,
    left_sibling: Option<u64>,
    right_sibling: Option<u64>,
    entries: &[(Vec<u8>, u64)],
    key_len: usize,
) -> Result<u64> {
    let mut out = Vec::new();
    out.extend_from_slice(SIGNATURE);
    out.push(node_type);
    out.push(level);
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    write_address(left_sibling, offset_size, &mut out);
    write_address(right_sibling, offset_size, &mut out);
    for (key, child) in entries {
        debug_assert_eq!(key.len(), key_len);
        out.extend_from_slice(key);
        write_address(Some(*child), offset_size, &mut out);
    }
    // Trailing boundary key (no corresponding child), matching the wire
    // format's N+1 keys for N children.
    if let Some((key, _)) = entries.last() {
        out.extend_from_slice(key);
    } else {
        out.extend_from_slice(&vec![0u8; key_len]);
    }

    let address = alloc.allocate(out.len() as u64)?;
    io.write_at(address, &out)?;
    Ok(address)
}

/// Reads a `TREE` node (and, recursively, its children) back into a flat
/// list of `(key_bytes, child_or_leaf_address)` leaf-level entries.
fn read_tree(io: &FileIo, address: u64, offset_size: u8, key_len: usize) -> Result<Vec<(Vec<u8>, u64)>> {
    let fixed_len = 4 + 1 + 1 + 2 + 2 * offset_size as u64;
    let fixed = io.read_at(address, fixed_len)?;
    if &fixed[..4] != SIGNATURE {
        return Err(Error::InvariantViolation("expected TREE signature".into()));
    }
    let (input, _node_type) = read_u8(&fixed[4..])?;
    let (input, level) = read_u8(input)?;
    let (input, entries_used) = read_u16(input)?;
    let (input, _left) = read_address(input, offset_size)?;
    let (_, _right) = read_address(input, offset_size)?;

    let entry_stride = key_len + offset_size as usize;
    let entries_addr = address + fixed_len;
    let entries_bytes = io.read_at(entries_addr, (entries_used as u64) * entry_stride as u64)?;

    let mut entries = Vec::with_capacity(entries_used as usize);
    let mut cursor: &[u8] = &entries_bytes;
    for _ in 0..entries_used {
        let key = cursor[..key_len].to_vec();
        let (rest, addr) = read_address(&cursor[key_len..], offset_size)?;
        entries.push((key, addr.unwrap_or(0)));
        cursor = rest;
    }

    if level == 0 {
        Ok(entries)
    } else {
        let mut all = Vec::new();
        for (_, child_addr) in entries {
            all.extend(read_tree(io, child_addr, offset_size, key_len)?);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn new_io() -> (FileIo, Allocator) {
        let tmp = NamedTempFile::new().unwrap();
        (FileIo::from_file(tmp.reopen().unwrap()).unwrap(), Allocator::new(0))
    }

    #[test]
    fn chunk_btree_single_leaf_roundtrips() {
        let (mut io, mut alloc) = new_io();
        let mut tree = ChunkBTree::new();
        tree.insert(vec![0, 0, 0], 1000, 64, 0);
        tree.insert(vec![0, 1, 0], 2000, 64, 0);
        tree.insert(vec![1, 0, 0], 3000, 64, 0);

        let addr = tree.write(&mut io, &mut alloc, 8, 3).unwrap();
        let decoded = ChunkBTree::decode(&io, addr, 8, 3).unwrap();

        assert_eq!(decoded.lookup(&[0, 1, 0]).unwrap(), (2000, 64, 0));
        assert_eq!(decoded.iterate().count(), 3);
    }

    #[test]
    fn chunk_btree_splits_across_multiple_leaves() {
        let (mut io, mut alloc) = new_io();
        let mut tree = ChunkBTree::new();
        for i in 0..100u64 {
            tree.insert(vec![i, 0], 1000 + i * 64, 64, 0);
        }
        let addr = tree.write(&mut io, &mut alloc, 8, 2).unwrap();
        let decoded = ChunkBTree::decode(&io, addr, 8, 2).unwrap();

        assert_eq!(decoded.iterate().count(), 100);
        for i in 0..100u64 {
            assert_eq!(decoded.lookup(&[i, 0]).unwrap().0, 1000 + i * 64);
        }
    }

    #[test]
    fn chunk_not_found_reports_missing_coordinate() {
        let tree = ChunkBTree::new();
        assert!(matches!(tree.lookup(&[0, 0]), Err(Error::NotFound { .. })));
    }

    #[test]
    fn group_btree_leaves_roundtrip() {
        let (mut io, mut alloc) = new_io();
        let mut tree = GroupBTree::new();
        tree.push_leaf(0, 4096);
        tree.push_leaf(64, 8192);

        let addr = tree.write(&mut io, &mut alloc, 8).unwrap();
        let decoded = GroupBTree::decode(&io, addr, 8).unwrap();
        assert_eq!(decoded.leaves(), &[(0, 4096), (64, 8192)]);
    }
}
