//! Fractal heap: the managed-object heap backing dense groups and dense
//! attribute storage (spec.md §3 "Fractal Heap", §4.4).
//!
//! This engine's direct blocks are a flat, growable list rather than the
//! full row/column indirect-block table the reference format uses — dense
//! storage in this MVP only has to hold link and attribute records for
//! groups/objects that exceeded the compact threshold, not the huge
//! managed-object counts a general-purpose heap has to scale to. Huge
//! objects are rejected outright: spec.md §9 leaves their secondary-index
//! management as an explicit open question, and this build decides not to
//! implement it (see DESIGN.md).

use log::trace;

use crate::alloc::Allocator;
use crate::error::{Error, Result};
use crate::io::FileIo;
use crate::primitive::{read_address, read_u16, read_u32, read_u8, read_uint, write_uint};

const HEADER_SIGNATURE: &[u8; 4] = b"FRHP";
const DIRECT_BLOCK_SIGNATURE: &[u8; 4] = b"FHDB";

/// Default maximum size (bytes) of a "managed" object; above this a huge
/// object is attempted and rejected (spec.md §4.4, §9).
const DEFAULT_MAX_MANAGED_OBJECT_SIZE: u64 = 4096;
const DEFAULT_DIRECT_BLOCK_SIZE: u64 = 4096;
/// Objects small enough to be inlined directly into the 8-byte heap ID.
const TINY_MAX_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapIdKind {
    Managed,
    Tiny,
    Huge,
}

/// An 8-byte tagged identifier locating an object inside a fractal heap
/// (spec.md glossary "Heap ID").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapId(pub [u8; 8]);

impl HeapId {
    pub fn kind(&self) -> HeapIdKind {
        match self.0[0] & 0x03 {
            0 => HeapIdKind::Managed,
            1 => HeapIdKind::Tiny,
            _ => HeapIdKind::Huge,
        }
    }

    fn managed(block_index: u16, offset: u16, length: u16) -> Self {
        let mut b = [0u8; 8];
        b[0] = 0;
        b[1..3].copy_from_slice(&block_index.to_le_bytes());
        b[3..5].copy_from_slice(&offset.to_le_bytes());
        b[5..7].copy_from_slice(&length.to_le_bytes());
        HeapId(b)
    }

    fn tiny(data: &[u8]) -> Self {
        debug_assert!(data.len() <= TINY_MAX_LEN);
        let mut b = [0u8; 8];
        b[0] = 1 | ((data.len() as u8) << 4);
        b[1..1 + data.len()].copy_from_slice(data);
        HeapId(b)
    }

    pub fn to_bytes(self) -> [u8; 8] {
        self.0
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        HeapId(bytes)
    }
}

struct DirectBlock {
    data: Vec<u8>,
    used: usize,
}

impl DirectBlock {
    fn new(size: u64) -> Self {
        DirectBlock {
            data: vec![0u8; size as usize],
            used: 0,
        }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.used
    }

    /// Appends a 2-byte length-prefixed object, returning its byte offset
    /// within the block.
    fn insert(&mut self, bytes: &[u8]) -> u16 {
        let offset = self.used as u16;
        let len = bytes.len() as u16;
        self.data[self.used..self.used + 2].copy_from_slice(&len.to_le_bytes());
        self.data[self.used + 2..self.used + 2 + bytes.len()].copy_from_slice(bytes);
        self.used += 2 + bytes.len();
        offset
    }

    fn read(&self, offset: u16, length: u16) -> Result<Vec<u8>> {
        let start = offset as usize + 2;
        let end = start + length as usize;
        self.data
            .get(start..end)
            .map(|b| b.to_vec())
            .ok_or_else(|| Error::InvariantViolation("fractal heap direct-block offset out of range".into()))
    }
}

/// An in-memory fractal heap builder/reader.
pub struct FractalHeap {
    max_managed_object_size: u64,
    direct_block_size: u64,
    blocks: Vec<DirectBlock>,
}

impl FractalHeap {
    pub fn new() -> Self {
        FractalHeap {
            max_managed_object_size: DEFAULT_MAX_MANAGED_OBJECT_SIZE,
            direct_block_size: DEFAULT_DIRECT_BLOCK_SIZE,
            blocks: Vec::new(),
        }
    }

    /// Inserts `bytes`, returning the heap ID that locates it. Objects up to
    /// [`TINY_MAX_LEN`] bytes are inlined in the ID itself (no block space
    /// consumed); objects larger than `max_managed_object_size` are rejected
    /// (huge-object storage is unimplemented, spec.md §9).
    pub fn insert_object(&mut self, bytes: &[u8]) -> Result<HeapId> {
        if bytes.len() <= TINY_MAX_LEN {
            return Ok(HeapId::tiny(bytes));
        }
        if bytes.len() as u64 > self.max_managed_object_size {
            return Err(Error::CapacityExceeded {
                resource: "fractal heap huge object (unimplemented in this build)",
            });
        }
        let needed = bytes.len() + 2;
        let block_index = self
            .blocks
            .iter()
            .position(|b| b.remaining() >= needed)
            .unwrap_or_else(|| {
                self.blocks.push(DirectBlock::new(self.direct_block_size));
                self.blocks.len() - 1
            });
        let offset = self.blocks[block_index].insert(bytes);
        Ok(HeapId::managed(block_index as u16, offset, bytes.len() as u16))
    }

    pub fn read_object(&self, id: HeapId) -> Result<Vec<u8>> {
        match id.kind() {
            HeapIdKind::Tiny => {
                let len = (id.0[0] >> 4) as usize;
                Ok(id.0[1..1 + len].to_vec())
            }
            HeapIdKind::Managed => {
                let block_index = u16::from_le_bytes([id.0[1], id.0[2]]) as usize;
                let offset = u16::from_le_bytes([id.0[3], id.0[4]]);
                let length = u16::from_le_bytes([id.0[5], id.0[6]]);
                let block = self.blocks.get(block_index).ok_or_else(|| Error::NotFound {
                    kind: "fractal heap direct block",
                    key: block_index.to_string(),
                })?;
                block.read(offset, length)
            }
            HeapIdKind::Huge => Err(Error::CapacityExceeded {
                resource: "fractal heap huge object (unimplemented in this build)",
            }),
        }
    }

    /// Writes the heap header and every direct block, returning the
    /// header's address.
    pub fn write(&self, io: &mut FileIo, alloc: &mut Allocator, offset_size: u8, length_size: u8) -> Result<u64> {
        let mut block_addresses = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let mut out = Vec::new();
            out.extend_from_slice(DIRECT_BLOCK_SIGNATURE);
            out.push(0); // version
            write_uint(0, offset_size, &mut out); // owning heap-header address, unused by this reader
            write_uint(0, offset_size, &mut out); // block offset within heap, unused by this reader
            out.extend_from_slice(&block.data);
            let address = alloc.allocate(out.len() as u64)?;
            block_addresses.push(address);
            io.write_at(address, &out)?;
        }

        let mut header = Vec::new();
        header.extend_from_slice(HEADER_SIGNATURE);
        header.push(0); // version
        header.extend_from_slice(&(TINY_MAX_LEN as u16).to_le_bytes());
        write_uint(self.max_managed_object_size, length_size, &mut header);
        write_uint(self.direct_block_size, length_size, &mut header);
        header.extend_from_slice(&(self.blocks.len() as u32).to_le_bytes());
        for addr in &block_addresses {
            crate::primitive::write_uint(*addr, offset_size, &mut header);
        }

        let address = alloc.allocate(header.len() as u64)?;
        io.write_at(address, &header)?;
        trace!(
            "fractal heap: {} direct blocks, header at {address:#x}",
            self.blocks.len()
        );
        Ok(address)
    }

    /// Reads a heap back from its header address.
    pub fn decode(io: &FileIo, header_address: u64, offset_size: u8, length_size: u8) -> Result<Self> {
        let prefix_len = 4 + 1 + 2 + 2 * length_size as u64 + 4;
        let prefix = io.read_at(header_address, prefix_len)?;
        if &prefix[..4] != HEADER_SIGNATURE {
            return Err(Error::InvariantViolation("expected FRHP signature".into()));
        }
        let (input, _version) = read_u8(&prefix[4..])?;
        let (input, _tiny_max_len) = read_u16(input)?;
        let (input, max_managed_object_size) = read_uint(input, length_size)?;
        let (input, direct_block_size) = read_uint(input, length_size)?;
        let (_, num_blocks) = read_u32(input)?;

        let addresses_start = header_address + prefix_len;
        let addresses_bytes = io.read_at(addresses_start, num_blocks as u64 * offset_size as u64)?;
        let mut blocks = Vec::with_capacity(num_blocks as usize);
        let mut cursor: &[u8] = &addresses_bytes;
        for _ in 0..num_blocks {
            let (rest, addr) = read_address(cursor, offset_size)?;
            cursor = rest;
            let block_addr = addr.unwrap_or(0);
            let block_prefix_len = 4 + 1 + 2 * offset_size as u64;
            let block_bytes = io.read_at(block_addr, block_prefix_len + direct_block_size)?;
            if &block_bytes[..4] != DIRECT_BLOCK_SIGNATURE {
                return Err(Error::InvariantViolation("expected FHDB signature".into()));
            }
            let data = block_bytes[block_prefix_len as usize..].to_vec();
            blocks.push(DirectBlock {
                used: data.len(),
                data,
            });
        }

        Ok(FractalHeap {
            max_managed_object_size,
            direct_block_size,
            blocks,
        })
    }
}

impl Default for FractalHeap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn tiny_object_roundtrips_without_a_block() {
        let mut heap = FractalHeap::new();
        let id = heap.insert_object(b"hi").unwrap();
        assert_eq!(id.kind(), HeapIdKind::Tiny);
        assert_eq!(heap.read_object(id).unwrap(), b"hi");
        assert!(heap.blocks.is_empty());
    }

    #[test]
    fn managed_object_roundtrips_through_write_decode() {
        let tmp = NamedTempFile::new().unwrap();
        let mut io = FileIo::from_file(tmp.reopen().unwrap()).unwrap();
        let mut alloc = Allocator::new(0);

        let mut heap = FractalHeap::new();
        let payload = vec![0xABu8; 64];
        let id = heap.insert_object(&payload).unwrap();
        assert_eq!(id.kind(), HeapIdKind::Managed);

        let addr = heap.write(&mut io, &mut alloc, 8, 8).unwrap();
        let decoded = FractalHeap::decode(&io, addr, 8, 8).unwrap();
        assert_eq!(decoded.read_object(id).unwrap(), payload);
    }

    #[test]
    fn huge_object_is_rejected() {
        let mut heap = FractalHeap::new();
        let payload = vec![0u8; DEFAULT_MAX_MANAGED_OBJECT_SIZE as usize + 1];
        assert!(matches!(
            heap.insert_object(&payload),
            Err(Error::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn many_objects_span_multiple_direct_blocks() {
        let mut heap = FractalHeap::new();
        let mut ids = Vec::new();
        for i in 0..200u32 {
            let payload = format!("object-{i}").into_bytes();
            ids.push((payload.clone(), heap.insert_object(&payload).unwrap()));
        }
        assert!(heap.blocks.len() > 1);
        for (payload, id) in ids {
            assert_eq!(heap.read_object(id).unwrap(), payload);
        }
    }
}
