//! Version-2 B-trees: typed, checksummed records used by dense groups and
//! dense attribute storage, keyed by a hash of the name with the raw bytes
//! as a tie-breaker (spec.md §3 "B-trees", §4.5, §6 "B-tree v2 headers").
//!
//! This engine implements one record shape — `(name_hash, heap_id)` — since
//! spec.md describes the link-name and attribute-name indices as sharing
//! that shape; `record_type` is still carried on the wire so a reader can
//! tell the two apart, matching the real format's per-tree type code.

use crate::alloc::Allocator;
use crate::checksum::lookup3;
use crate::error::{Error, Result};
use crate::heap::fractal::HeapId;
use crate::io::FileIo;
use crate::primitive::{read_address, read_u16, read_u32, read_u8, read_uint, write_address, write_uint};

const HEADER_SIGNATURE: &[u8; 4] = b"BTHD";
const INTERNAL_SIGNATURE: &[u8; 4] = b"BTIN";
const LEAF_SIGNATURE: &[u8; 4] = b"BTLF";

pub const RECORD_TYPE_LINK_NAME: u8 = 5;
pub const RECORD_TYPE_ATTR_NAME: u8 = 8;

const RECORD_SIZE: usize = 4 + 8; // name_hash: u32, heap_id: 8 bytes
const MAX_RECORDS_PER_LEAF: usize = 16;

/// One `(name_hash, heap_id)` record. Ties on `name_hash` are broken by
/// `heap_id` bytes; resolving the *actual* name for a collision check is the
/// caller's job (it has access to the heap the ID points into), per
/// spec.md §4.9's lookup algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameRecord {
    pub name_hash: u32,
    pub heap_id: HeapId,
}

impl NameRecord {
    fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[..4].copy_from_slice(&self.name_hash.to_le_bytes());
        out[4..].copy_from_slice(&self.heap_id.to_bytes());
        out
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut hash = [0u8; 4];
        hash.copy_from_slice(&bytes[..4]);
        let mut id = [0u8; 8];
        id.copy_from_slice(&bytes[4..12]);
        NameRecord {
            name_hash: u32::from_le_bytes(hash),
            heap_id: HeapId::from_bytes(id),
        }
    }

    fn sort_key(&self) -> (u32, [u8; 8]) {
        (self.name_hash, self.heap_id.to_bytes())
    }
}

/// Hashes a name the same way for insertion and lookup. `lookup3` is
/// already implemented for the checksum path, so it is reused here rather
/// than pulling in a second hash function.
pub fn hash_name(name: &str) -> u32 {
    lookup3(name.as_bytes(), 0)
}

/// A name-keyed v2 B-tree, built in memory and flushed in one pass (this
/// engine does not mutate an already-written tree — spec.md §4.1's
/// allocator never reclaims, so there is nothing to merge into).
#[derive(Debug, Clone, Default)]
pub struct V2NameBTree {
    records: Vec<NameRecord>,
}

impl V2NameBTree {
    pub fn new() -> Self {
        V2NameBTree { records: Vec::new() }
    }

    pub fn insert(&mut self, record: NameRecord) {
        let pos = self
            .records
            .binary_search_by_key(&record.sort_key(), |r| r.sort_key())
            .unwrap_or_else(|i| i);
        self.records.insert(pos, record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records whose hash matches `hash`; the caller must still compare
    /// real names (resolved through the heap) to rule out collisions.
    pub fn lookup_candidates(&self, hash: u32) -> Vec<NameRecord> {
        let start = self.records.partition_point(|r| r.name_hash < hash);
        self.records[start..]
            .iter()
            .take_while(|r| r.name_hash == hash)
            .copied()
            .collect()
    }

    pub fn iterate(&self) -> impl Iterator<Item = &NameRecord> {
        self.records.iter()
    }

    pub fn write(
        &self,
        io: &mut FileIo,
        alloc: &mut Allocator,
        offset_size: u8,
        length_size: u8,
        record_type: u8,
    ) -> Result<u64> {
        let root_is_leaf = self.records.len() <= MAX_RECORDS_PER_LEAF;
        let (root_addr, root_nrec, depth) = if root_is_leaf || self.records.is_empty() {
            let addr = write_leaf(io, alloc, record_type, &self.records)?;
            (addr, self.records.len() as u16, 0u16)
        } else {
            let chunks: Vec<&[NameRecord]> = self.records.chunks(MAX_RECORDS_PER_LEAF).collect();
            let mut children = Vec::with_capacity(chunks.len());
            for chunk in &chunks {
                let addr = write_leaf(io, alloc, record_type, chunk)?;
                children.push((addr, chunk.len() as u32));
            }
            let addr = write_internal(io, alloc, offset_size, record_type, &children)?;
            (addr, children.len() as u16, 1u16)
        };

        let mut header = Vec::new();
        header.extend_from_slice(HEADER_SIGNATURE);
        header.push(0); // version
        header.push(record_type);
        header.extend_from_slice(&4096u32.to_le_bytes()); // nominal node size
        header.extend_from_slice(&(RECORD_SIZE as u16).to_le_bytes());
        header.extend_from_slice(&depth.to_le_bytes());
        header.push(100); // split percent
        header.push(50); // merge percent
        write_address(Some(root_addr), offset_size, &mut header);
        header.extend_from_slice(&root_nrec.to_le_bytes());
        write_uint(self.records.len() as u64, length_size, &mut header);
        let checksum = lookup3(&header, 0);
        header.extend_from_slice(&checksum.to_le_bytes());

        let header_addr = alloc.allocate(header.len() as u64)?;
        io.write_at(header_addr, &header)?;
        Ok(header_addr)
    }

    pub fn decode(io: &FileIo, header_address: u64, offset_size: u8, length_size: u8) -> Result<Self> {
        let fixed_len = 4 + 1 + 1 + 4 + 2 + 2 + 1 + 1;
        let prefix = io.read_at(header_address, fixed_len)?;
        if &prefix[..4] != HEADER_SIGNATURE {
            return Err(Error::InvariantViolation("expected BTHD signature".into()));
        }
        let (input, _version) = read_u8(&prefix[4..])?;
        let (input, _record_type) = read_u8(input)?;
        let (input, _node_size) = read_u32(input)?;
        let (input, _record_size) = read_u16(input)?;
        let (input, depth) = read_u16(input)?;
        let (_, _split_percent) = read_u8(input)?;

        let tail = io.read_at(
            header_address + fixed_len,
            offset_size as u64 + 2 + length_size as u64 + 4,
        )?;
        let (tail, root_addr) = read_address(&tail, offset_size)?;
        let (tail, _root_nrec) = read_u16(tail)?;
        let (_, _total_records) = read_uint(tail, length_size)?;
        let root_addr = root_addr.unwrap_or(0);

        let records = if depth == 0 {
            read_leaf(io, root_addr, _root_nrec as usize)?
        } else {
            let children = read_internal(io, root_addr, offset_size)?;
            let mut all = Vec::new();
            for (child_addr, nrec) in children {
                all.extend(read_leaf(io, child_addr, nrec as usize)?);
            }
            all
        };
        Ok(V2NameBTree { records })
    }
}

fn write_leaf(io: &mut FileIo, alloc: &mut Allocator, record_type: u8, records: &[NameRecord]) -> Result<u64> {
    let mut out = Vec::new();
    out.extend_from_slice(LEAF_SIGNATURE);
    out.push(0); // version
    out.push(record_type);
    for r in records {
        out.extend_from_slice(&r.encode());
    }
    let checksum = lookup3(&out, 0);
    out.extend_from_slice(&checksum.to_le_bytes());

    let address = alloc.allocate(out.len() as u64)?;
    io.write_at(address, &out)?;
    Ok(address)
}

/// Reads a leaf holding exactly `count` records — the caller already knows
/// this from the header's `root_nrec` (leaf root) or the parent internal
/// node's per-child count, so the body length is exact rather than probed.
fn read_leaf(io: &FileIo, address: u64, count: usize) -> Result<Vec<NameRecord>> {
    let body_len = 6 + count * RECORD_SIZE;
    let bytes = io.read_at(address, body_len as u64 + 4)?;
    let (body, checksum_bytes) = bytes.split_at(body_len);
    if &body[..4] != LEAF_SIGNATURE {
        return Err(Error::InvariantViolation("expected BTLF signature".into()));
    }
    if lookup3(body, 0).to_le_bytes() != checksum_bytes {
        return Err(Error::ChecksumMismatch {
            kind: "v2 B-tree leaf",
            stored: u32::from_le_bytes(checksum_bytes.try_into().unwrap()),
            computed: lookup3(body, 0),
        });
    }
    Ok(body[6..].chunks_exact(RECORD_SIZE).map(NameRecord::decode).collect())
}

fn write_internal(
    io: &mut FileIo,
    alloc: &mut Allocator,
    offset_size: u8,
    record_type: u8,
    children: &[(u64, u32)],
) -> Result<u64> {
    let mut out = Vec::new();
    out.extend_from_slice(INTERNAL_SIGNATURE);
    out.push(0); // version
    out.push(record_type);
    out.extend_from_slice(&(children.len() as u16).to_le_bytes());
    for (addr, nrec) in children {
        write_address(Some(*addr), offset_size, &mut out);
        out.extend_from_slice(&nrec.to_le_bytes());
    }
    let checksum = lookup3(&out, 0);
    out.extend_from_slice(&checksum.to_le_bytes());

    let address = alloc.allocate(out.len() as u64)?;
    io.write_at(address, &out)?;
    Ok(address)
}

fn read_internal(io: &FileIo, address: u64, offset_size: u8) -> Result<Vec<(u64, u32)>> {
    let prefix = io.read_at(address, 4 + 1 + 1 + 2)?;
    if &prefix[..4] != INTERNAL_SIGNATURE {
        return Err(Error::InvariantViolation("expected BTIN signature".into()));
    }
    let (_, num_children) = read_u16(&prefix[6..])?;
    let stride = offset_size as usize + 4;
    let body = io.read_at(address + 8, num_children as u64 * stride as u64)?;
    let mut out = Vec::with_capacity(num_children as usize);
    let mut cursor: &[u8] = &body;
    for _ in 0..num_children {
        let (rest, addr) = read_address(cursor, offset_size)?;
        let (rest, nrec) = read_u32(rest)?;
        out.push((addr.unwrap_or(0), nrec));
        cursor = rest;
    }
    Ok(out)
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
    fn single_leaf_roundtrip() {
        let (mut io, mut alloc) = new_io();
        let mut tree = V2NameBTree::new();
        for name in ["alpha", "beta", "gamma"] {
            tree.insert(NameRecord {
                name_hash: hash_name(name),
                heap_id: HeapId::from_bytes([0, 1, 2, 3, 4, 5, 6, 7]),
            });
        }
        let addr = tree.write(&mut io, &mut alloc, 8, 8, RECORD_TYPE_LINK_NAME).unwrap();
        let decoded = V2NameBTree::decode(&io, addr, 8, 8).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded.lookup_candidates(hash_name("beta")).len(), 1);
    }

    #[test]
    fn splits_across_multiple_leaves_and_iterates_every_record() {
        let (mut io, mut alloc) = new_io();
        let mut tree = V2NameBTree::new();
        let names: Vec<String> = (0..100).map(|i| format!("link{i}")).collect();
        for (i, name) in names.iter().enumerate() {
            tree.insert(NameRecord {
                name_hash: hash_name(name),
                heap_id: HeapId::from_bytes((i as u64).to_le_bytes()),
            });
        }
        let addr = tree.write(&mut io, &mut alloc, 8, 8, RECORD_TYPE_LINK_NAME).unwrap();
        let decoded = V2NameBTree::decode(&io, addr, 8, 8).unwrap();
        assert_eq!(decoded.len(), 100);
        for name in &names {
            assert_eq!(decoded.lookup_candidates(hash_name(name)).len(), 1);
        }
    }

    #[test]
    fn empty_tree_roundtrips() {
        let (mut io, mut alloc) = new_io();
        let tree = V2NameBTree::new();
        let addr = tree.write(&mut io, &mut alloc, 8, 8, RECORD_TYPE_ATTR_NAME).unwrap();
        let decoded = V2NameBTree::decode(&io, addr, 8, 8).unwrap();
        assert!(decoded.is_empty());
    }
}
