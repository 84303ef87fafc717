//! Group engine: v1 symbol-table groups and dense (link-info) groups
//! (spec.md §3 "Group models", §4.9).
//!
//! A v1 group is a local heap of child names plus a v1 B-tree (node type 0)
//! of symbol-table-node (`SNOD`) addresses; each `SNOD` holds the actual
//! `(name offset, child object-header address)` entries. A new-style group
//! starts out compact — its links live as `Link` messages directly in the
//! owning object header — and switches to dense storage (fractal heap + v2
//! B-tree keyed by name hash) once the link count crosses
//! [`GroupConfig::dense_threshold`]. Neither representation shrinks back
//! (spec.md §4.10 "Group storage" state machine).

use log::debug;

use crate::alloc::Allocator;
use crate::btree::v1::GroupBTree;
use crate::btree::v2::{hash_name, NameRecord, V2NameBTree, RECORD_TYPE_LINK_NAME};
use crate::error::{Error, Result};
use crate::heap::{FractalHeap, LocalHeap};
use crate::io::FileIo;
use crate::object_header::message::{decode_link, encode_link, Link, LinkInfo, LinkTarget, SymbolTableMsg};
use crate::primitive::{read_address, read_u16, read_uint, write_address};

/// Number of symbol-table entries packed into one `SNOD` block. The real
/// format derives this from the superblock's group-leaf-K; this engine
/// picks a fixed value since it never mutates an already-written group.
const SNOD_CHUNK: usize = 8;

const SNOD_SIGNATURE: &[u8; 4] = b"SNOD";

/// Threshold controlling when a new-style group's links move from inline
/// `Link` messages to dense (fractal-heap + v2 B-tree) storage (spec.md
/// §4.9: "default compact up to 8 links").
#[derive(Debug, Clone, Copy)]
pub struct GroupConfig {
    pub dense_threshold: usize,
}

impl Default for GroupConfig {
    fn default() -> Self {
        GroupConfig { dense_threshold: 8 }
    }
}

/// Either a group's links are small enough to sit as inline `Link` messages
/// in the object header (`Compact`), or they've been moved out to dense
/// storage (`Dense`, spec.md §4.9).
#[derive(Debug, Clone)]
pub enum GroupRepresentation {
    Compact(Vec<Link>),
    Dense(LinkInfo),
}

pub struct GroupEngine;

impl GroupEngine {
    // ---- v1 symbol-table groups --------------------------------------

    /// Builds a v1 group's local heap and B-tree from `(name, child address)`
    /// pairs, returning the Symbol-Table message the owning object header
    /// carries. Names are sorted first so that heap offsets (and thus
    /// B-tree leaf keys) increase in the same order as the names they name,
    /// matching spec.md §3 "keys = local-heap offsets (sorted by
    /// byte-compared name)".
    pub fn write_v1(
        io: &mut FileIo,
        alloc: &mut Allocator,
        offset_size: u8,
        mut entries: Vec<(String, u64)>,
    ) -> Result<SymbolTableMsg> {
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut heap = LocalHeap::new();
        let name_entries: Vec<(u64, u64)> = entries
            .iter()
            .map(|(name, addr)| (heap.insert_string(name), *addr))
            .collect();
        let local_heap_address = heap.write(io, alloc, offset_size)?;

        let mut btree = GroupBTree::new();
        for chunk in name_entries.chunks(SNOD_CHUNK) {
            let snod_address = write_snod(io, alloc, offset_size, chunk)?;
            btree.push_leaf(chunk[0].0, snod_address);
        }
        let btree_address = btree.write(io, alloc, offset_size)?;

        debug!(
            "v1 group: {} entries across {} SNOD(s), heap at {local_heap_address:#x}, btree at {btree_address:#x}",
            entries.len(),
            name_entries.len().div_ceil(SNOD_CHUNK).max(1)
        );

        Ok(SymbolTableMsg {
            btree_address,
            local_heap_address,
        })
    }

    /// Resolves `name` to its child object-header address. Scans every
    /// `SNOD` rather than binary-searching the B-tree leaves by name
    /// (spec.md §4.9 "v1 compares names byte-wise") — correct and simple
    /// for the group sizes this engine expects to write.
    pub fn lookup_v1(io: &FileIo, symtab: &SymbolTableMsg, offset_size: u8, name: &str) -> Result<u64> {
        let heap = LocalHeap::decode(io, symtab.local_heap_address, offset_size)?;
        let btree = GroupBTree::decode(io, symtab.btree_address, offset_size)?;
        for (_, snod_address) in btree.leaves() {
            for (name_offset, child_address) in read_snod(io, *snod_address, offset_size)? {
                if heap.read_string(name_offset)? == name {
                    return Ok(child_address);
                }
            }
        }
        Err(Error::NotFound {
            kind: "v1 group link",
            key: name.to_string(),
        })
    }

    /// Every `(name, child address)` pair stored in the group, in no
    /// particular order.
    pub fn iterate_v1(io: &FileIo, symtab: &SymbolTableMsg, offset_size: u8) -> Result<Vec<(String, u64)>> {
        let heap = LocalHeap::decode(io, symtab.local_heap_address, offset_size)?;
        let btree = GroupBTree::decode(io, symtab.btree_address, offset_size)?;
        let mut out = Vec::new();
        for (_, snod_address) in btree.leaves() {
            for (name_offset, child_address) in read_snod(io, *snod_address, offset_size)? {
                out.push((heap.read_string(name_offset)?, child_address));
            }
        }
        Ok(out)
    }

    // ---- new-style (compact / dense) groups --------------------------

    /// Decides between compact and dense storage for `links` and, for
    /// dense, builds the fractal heap + v2 B-tree (spec.md §4.9).
    pub fn write_new_style(
        io: &mut FileIo,
        alloc: &mut Allocator,
        offset_size: u8,
        length_size: u8,
        links: Vec<Link>,
        config: &GroupConfig,
    ) -> Result<GroupRepresentation> {
        if links.len() <= config.dense_threshold {
            return Ok(GroupRepresentation::Compact(links));
        }

        let mut heap = FractalHeap::new();
        let mut btree = V2NameBTree::new();
        for link in &links {
            let encoded = encode_link(link, offset_size);
            let heap_id = heap.insert_object(&encoded)?;
            btree.insert(NameRecord {
                name_hash: hash_name(&link.name),
                heap_id,
            });
        }
        let fractal_heap_address = heap.write(io, alloc, offset_size, length_size)?;
        let name_btree_address = btree.write(io, alloc, offset_size, length_size, RECORD_TYPE_LINK_NAME)?;

        debug!("dense group: {} links, heap at {fractal_heap_address:#x}", links.len());

        Ok(GroupRepresentation::Dense(LinkInfo {
            fractal_heap_address: Some(fractal_heap_address),
            name_btree_address: Some(name_btree_address),
            creation_order_btree_address: None,
        }))
    }

    /// Resolves `name` against dense storage: hash the query, gather
    /// same-hash candidates from the v2 B-tree, then compare real names
    /// (read back through the fractal heap) to rule out collisions
    /// (spec.md §4.9).
    pub fn lookup_dense(
        io: &FileIo,
        link_info: &LinkInfo,
        offset_size: u8,
        length_size: u8,
        name: &str,
    ) -> Result<Link> {
        let heap_address = link_info.fractal_heap_address.ok_or(Error::NotFound {
            kind: "dense group fractal heap",
            key: name.to_string(),
        })?;
        let btree_address = link_info.name_btree_address.ok_or(Error::NotFound {
            kind: "dense group name btree",
            key: name.to_string(),
        })?;
        let heap = FractalHeap::decode(io, heap_address, offset_size, length_size)?;
        let btree = V2NameBTree::decode(io, btree_address, offset_size, length_size)?;

        for candidate in btree.lookup_candidates(hash_name(name)) {
            let bytes = heap.read_object(candidate.heap_id)?;
            let link = decode_link(&bytes, offset_size)?;
            if link.name == name {
                return Ok(link);
            }
        }
        Err(Error::NotFound {
            kind: "dense group link",
            key: name.to_string(),
        })
    }

    /// Every link stored in dense storage, in B-tree (hash) order.
    pub fn iterate_dense(io: &FileIo, link_info: &LinkInfo, offset_size: u8, length_size: u8) -> Result<Vec<Link>> {
        let heap_address = link_info.fractal_heap_address.ok_or(Error::InvariantViolation(
            "dense group link-info message has no fractal heap address".into(),
        ))?;
        let btree_address = link_info.name_btree_address.ok_or(Error::InvariantViolation(
            "dense group link-info message has no name B-tree address".into(),
        ))?;
        let heap = FractalHeap::decode(io, heap_address, offset_size, length_size)?;
        let btree = V2NameBTree::decode(io, btree_address, offset_size, length_size)?;

        btree
            .iterate()
            .map(|record| decode_link(&heap.read_object(record.heap_id)?, offset_size))
            .collect()
    }
}

/// Builds a hard link to `address` named `name` (the common case this
/// engine's writers need; soft/external links are constructed directly via
/// [`Link`] when required).
pub fn hard_link(name: impl Into<String>, address: u64) -> Link {
    Link {
        name: name.into(),
        target: LinkTarget::Hard,
        hard_target_address: Some(address),
        soft_target_path: None,
    }
}

fn write_snod(io: &mut FileIo, alloc: &mut Allocator, offset_size: u8, entries: &[(u64, u64)]) -> Result<u64> {
    let mut out = Vec::new();
    out.extend_from_slice(SNOD_SIGNATURE);
    out.push(1); // version
    out.push(0); // reserved
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for (name_offset, child_address) in entries {
        crate::primitive::write_uint(*name_offset, offset_size, &mut out);
        write_address(Some(*child_address), offset_size, &mut out);
        out.extend_from_slice(&0u32.to_le_bytes()); // cache type: none cached
        out.extend_from_slice(&0u32.to_le_bytes()); // reserved
        out.extend_from_slice(&[0u8; 16]); // scratch-pad, unused by this reader
    }
    let address = alloc.allocate(out.len() as u64)?;
    io.write_at(address, &out)?;
    Ok(address)
}

fn read_snod(io: &FileIo, address: u64, offset_size: u8) -> Result<Vec<(u64, u64)>> {
    let prefix = io.read_at(address, 8)?;
    if &prefix[..4] != SNOD_SIGNATURE {
        return Err(Error::InvariantViolation("expected SNOD signature".into()));
    }
    let (_, num_symbols) = read_u16(&prefix[6..])?;
    let entry_len = 2 * offset_size as u64 + 4 + 4 + 16;
    let body = io.read_at(address + 8, num_symbols as u64 * entry_len)?;

    let mut out = Vec::with_capacity(num_symbols as usize);
    let mut cursor: &[u8] = &body;
    for _ in 0..num_symbols {
        let (rest, name_offset) = read_uint(cursor, offset_size)?;
        let (rest, child_address) = read_address(rest, offset_size)?;
        cursor = &rest[4 + 4 + 16..];
        out.push((name_offset, child_address.unwrap_or(0)));
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
    fn v1_group_roundtrips_and_looks_up_by_name() {
        let (mut io, mut alloc) = new_io();
        let entries = vec![
            ("alpha".to_string(), 0x1000),
            ("beta".to_string(), 0x2000),
            ("gamma".to_string(), 0x3000),
        ];
        let symtab = GroupEngine::write_v1(&mut io, &mut alloc, 8, entries.clone()).unwrap();

        assert_eq!(GroupEngine::lookup_v1(&io, &symtab, 8, "beta").unwrap(), 0x2000);
        let mut listed = GroupEngine::iterate_v1(&io, &symtab, 8).unwrap();
        listed.sort();
        let mut expected = entries;
        expected.sort();
        assert_eq!(listed, expected);
    }

    #[test]
    fn v1_group_spans_multiple_snod_blocks() {
        let (mut io, mut alloc) = new_io();
        let entries: Vec<(String, u64)> = (0..50).map(|i| (format!("child{i:02}"), 0x1000 + i * 0x100)).collect();
        let symtab = GroupEngine::write_v1(&mut io, &mut alloc, 8, entries.clone()).unwrap();

        for (name, addr) in &entries {
            assert_eq!(GroupEngine::lookup_v1(&io, &symtab, 8, name).unwrap(), *addr);
        }
        assert_eq!(GroupEngine::iterate_v1(&io, &symtab, 8).unwrap().len(), 50);
    }

    #[test]
    fn v1_lookup_of_missing_name_fails() {
        let (mut io, mut alloc) = new_io();
        let symtab = GroupEngine::write_v1(&mut io, &mut alloc, 8, vec![("only".to_string(), 42)]).unwrap();
        assert!(matches!(
            GroupEngine::lookup_v1(&io, &symtab, 8, "missing"),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn few_links_stay_compact() {
        let (mut io, mut alloc) = new_io();
        let links = vec![hard_link("a", 1), hard_link("b", 2)];
        let repr = GroupEngine::write_new_style(&mut io, &mut alloc, 8, 8, links.clone(), &GroupConfig::default()).unwrap();
        assert!(matches!(repr, GroupRepresentation::Compact(l) if l == links));
    }

    #[test]
    fn many_links_go_dense_and_roundtrip() {
        let (mut io, mut alloc) = new_io();
        let links: Vec<Link> = (0..100).map(|i| hard_link(format!("link{i}"), 0x1000 + i as u64 * 0x100)).collect();
        let repr = GroupEngine::write_new_style(&mut io, &mut alloc, 8, 8, links.clone(), &GroupConfig::default()).unwrap();

        let link_info = match repr {
            GroupRepresentation::Dense(li) => li,
            GroupRepresentation::Compact(_) => panic!("expected dense storage for 100 links"),
        };

        for link in &links {
            let found = GroupEngine::lookup_dense(&io, &link_info, 8, 8, &link.name).unwrap();
            assert_eq!(found.hard_target_address, link.hard_target_address);
        }

        let mut iterated = GroupEngine::iterate_dense(&io, &link_info, 8, 8).unwrap();
        iterated.sort_by(|a, b| a.name.cmp(&b.name));
        let mut expected = links;
        expected.sort_by(|a, b| a.name.cmp(&b.name));
        for (got, want) in iterated.iter().zip(expected.iter()) {
            assert_eq!(got.name, want.name);
            assert_eq!(got.hard_target_address, want.hard_target_address);
        }
    }

    #[test]
    fn dense_lookup_of_missing_name_fails() {
        let (mut io, mut alloc) = new_io();
        let links: Vec<Link> = (0..20).map(|i| hard_link(format!("link{i}"), i as u64)).collect();
        let repr = GroupEngine::write_new_style(&mut io, &mut alloc, 8, 8, links, &GroupConfig::default()).unwrap();
        let link_info = match repr {
            GroupRepresentation::Dense(li) => li,
            _ => panic!("expected dense"),
        };
        assert!(matches!(
            GroupEngine::lookup_dense(&io, &link_info, 8, 8, "nonexistent"),
            Err(Error::NotFound { .. })
        ));
    }
}
