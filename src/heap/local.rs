//! Local heap: contiguous, NUL-terminated string storage for v1 (symbol
//! table) groups (spec.md §3 "Local Heap", §4.4).
//!
//! The heap is built up in memory as names are inserted, then written once
//! as a single data segment; re-opening a file decodes that segment back
//! into the same in-memory buffer so `read_string` works off the offsets
//! handed out by the original `insert_string` calls.

use log::debug;

use crate::alloc::Allocator;
use crate::error::{Error, Result};
use crate::io::FileIo;
use crate::primitive::{read_address, read_u8, read_uint, write_uint};

const SIGNATURE: &[u8; 4] = b"HEAP";

/// Contiguous string storage for a single v1 group.
#[derive(Debug, Clone, Default)]
pub struct LocalHeap {
    data: Vec<u8>,
}

impl LocalHeap {
    /// A fresh heap. Offset 0 is reserved for the empty string, matching
    /// the convention real HDF5 writers use for a group's "." self-entry.
    pub fn new() -> Self {
        LocalHeap { data: vec![0] }
    }

    /// Appends `s` NUL-terminated to the data segment, returning its offset.
    pub fn insert_string(&mut self, s: &str) -> u64 {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        offset
    }

    /// Reads the NUL-terminated string starting at `offset`.
    pub fn read_string(&self, offset: u64) -> Result<String> {
        let start = offset as usize;
        let bytes = self.data.get(start..).ok_or_else(|| {
            Error::InvariantViolation(format!("local heap offset {offset:#x} out of range"))
        })?;
        let end = bytes.iter().position(|b| *b == 0).ok_or_else(|| {
            Error::InvariantViolation("local heap string is not NUL-terminated".into())
        })?;
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Writes the heap header and data segment, returning the header's
    /// address.
    pub fn write(&self, io: &mut FileIo, alloc: &mut Allocator, offset_size: u8) -> Result<u64> {
        let data_address = alloc.allocate(self.data.len().max(1) as u64)?;
        io.write_at(data_address, &self.data)?;

        let mut header = Vec::new();
        header.extend_from_slice(SIGNATURE);
        header.push(0); // version
        header.extend_from_slice(&[0u8; 3]); // reserved
        write_uint(self.data.len() as u64, offset_size, &mut header);
        write_uint(0, offset_size, &mut header); // free-list head offset: none tracked
        write_uint(data_address, offset_size, &mut header);

        let header_address = alloc.allocate(header.len() as u64)?;
        io.write_at(header_address, &header)?;
        debug!(
            "local heap: {} bytes of strings at {data_address:#x}, header at {header_address:#x}",
            self.data.len()
        );
        Ok(header_address)
    }

    /// Reads a previously written heap back from its header address.
    pub fn decode(io: &FileIo, header_address: u64, offset_size: u8) -> Result<Self> {
        let fixed_len = 8 + 2 * offset_size as u64;
        let header = io.read_at(header_address, fixed_len)?;
        if &header[..4] != SIGNATURE {
            return Err(Error::InvariantViolation("expected HEAP signature".into()));
        }
        let (input, _version) = read_u8(&header[4..])?;
        let input = &input[3..]; // reserved
        let (input, data_segment_size) = read_uint(input, offset_size)?;
        let (input, _free_list_head) = read_uint(input, offset_size)?;
        let (_, data_address) = read_address(input, offset_size)?;
        let data_address = data_address.unwrap_or(0);

        let data = io.read_at(data_address, data_segment_size)?;
        Ok(LocalHeap { data })
    }
}
