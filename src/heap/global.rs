//! Global heap: collections of ref-counted variable-length blobs, used by
//! variable-length datatypes (spec.md §3 "Global Heap", §4.4).
//!
//! Each collection is written as a standalone `GCOL` block; this engine
//! allocates one collection per object rather than packing multiple objects
//! into a shared collection the way the reference library's free-space
//! tracker does — there is no reclamation in this MVP (spec.md §4.1), so
//! packing would only complicate `decref` bookkeeping for no benefit.

use crate::alloc::Allocator;
use crate::error::{Error, Result};
use crate::io::FileIo;
use crate::primitive::{read_u16, read_uint, write_uint};

const SIGNATURE: &[u8; 4] = b"GCOL";

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalHeapObject {
    pub index: u16,
    pub ref_count: u16,
    pub data: Vec<u8>,
}

/// A single `GCOL` collection. This engine always writes collections
/// holding exactly one live object (index 1).
#[derive(Debug, Clone)]
pub struct GlobalHeapCollection {
    pub object: GlobalHeapObject,
}

fn pad8(n: usize) -> usize {
    (n + 7) & !7
}

impl GlobalHeapCollection {
    fn encode(&self, length_size: u8) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.object.index.to_le_bytes());
        body.extend_from_slice(&self.object.ref_count.to_le_bytes());
        body.extend_from_slice(&[0u8; 4]); // reserved
        write_uint(self.object.data.len() as u64, length_size, &mut body);
        body.extend_from_slice(&self.object.data);
        body.resize(pad8(body.len()), 0);

        // Terminator: a zero-index record marking the remainder of the
        // collection (here, zero bytes) as free space.
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&[0u8; 4]);
        write_uint(0, length_size, &mut body);

        let mut out = Vec::new();
        out.extend_from_slice(SIGNATURE);
        out.push(1); // version
        out.extend_from_slice(&[0u8; 3]); // reserved
        write_uint((body.len() + 8 + length_size as usize) as u64, length_size, &mut out);
        out.extend_from_slice(&body);
        out
    }

    fn decode(bytes: &[u8], length_size: u8) -> Result<Self> {
        if bytes.len() < 8 || &bytes[..4] != SIGNATURE {
            return Err(Error::InvariantViolation("expected GCOL signature".into()));
        }
        let cursor = &bytes[8..];
        let (cursor, _collection_size) = read_uint(cursor, length_size)?;
        let (cursor, index) = read_u16(cursor)?;
        let (cursor, ref_count) = read_u16(cursor)?;
        let cursor = &cursor[4..];
        let (cursor, size) = read_uint(cursor, length_size)?;
        let data = cursor
            .get(..size as usize)
            .ok_or_else(|| Error::TruncatedInput {
                context: "global heap object data",
                need: size as usize,
                had: cursor.len(),
            })?
            .to_vec();
        Ok(GlobalHeapCollection {
            object: GlobalHeapObject {
                index,
                ref_count,
                data,
            },
        })
    }
}

/// A thin namespace over `GlobalHeapCollection` exposing the operations
/// spec.md §4.4 names directly.
pub struct GlobalHeap;

impl GlobalHeap {
    /// Writes `data` as a new single-object collection, returning
    /// `(collection_address, index)`.
    pub fn allocate_object(
        io: &mut FileIo,
        alloc: &mut Allocator,
        length_size: u8,
        data: &[u8],
    ) -> Result<(u64, u16)> {
        let collection = GlobalHeapCollection {
            object: GlobalHeapObject {
                index: 1,
                ref_count: 1,
                data: data.to_vec(),
            },
        };
        let bytes = collection.encode(length_size);
        let address = alloc.allocate(bytes.len() as u64)?;
        io.write_at(address, &bytes)?;
        Ok((address, 1))
    }

    /// Reads back the object at `index` inside the collection at
    /// `collection_addr`.
    pub fn deref(io: &FileIo, collection_addr: u64, length_size: u8, index: u16) -> Result<Vec<u8>> {
        let collection = Self::decode_at(io, collection_addr, length_size)?;
        if collection.object.index != index {
            return Err(Error::NotFound {
                kind: "global heap object",
                key: index.to_string(),
            });
        }
        Ok(collection.object.data)
    }

    pub fn incref(io: &mut FileIo, collection_addr: u64, length_size: u8, index: u16) -> Result<()> {
        Self::adjust_ref_count(io, collection_addr, length_size, index, 1)
    }

    pub fn decref(io: &mut FileIo, collection_addr: u64, length_size: u8, index: u16) -> Result<()> {
        Self::adjust_ref_count(io, collection_addr, length_size, index, -1)
    }

    fn adjust_ref_count(
        io: &mut FileIo,
        collection_addr: u64,
        length_size: u8,
        index: u16,
        delta: i32,
    ) -> Result<()> {
        let mut collection = Self::decode_at(io, collection_addr, length_size)?;
        if collection.object.index != index {
            return Err(Error::NotFound {
                kind: "global heap object",
                key: index.to_string(),
            });
        }
        collection.object.ref_count = (collection.object.ref_count as i32 + delta).max(0) as u16;
        // The ref-count field sits right after the signature, version,
        // reserved bytes, and collection-size field; only those two bytes
        // need rewriting, not the whole collection.
        let ref_count_offset = collection_addr + 8 + length_size as u64 + 2;
        io.write_at(ref_count_offset, &collection.object.ref_count.to_le_bytes())
    }

    fn decode_at(io: &FileIo, collection_addr: u64, length_size: u8) -> Result<GlobalHeapCollection> {
        let prefix = io.read_at(collection_addr, 8 + length_size as u64)?;
        let (_, size) = read_uint(&prefix[8..], length_size)?;
        let bytes = io.read_at(collection_addr, size)?;
        GlobalHeapCollection::decode(&bytes, length_size)
    }
}
