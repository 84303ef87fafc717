//! Space allocator: reserves non-overlapping byte ranges at end-of-file.
//!
//! Nothing is freed in this MVP (spec.md §9, open question). The allocator
//! only ever grows `next_offset`; the rebalancing controller may later
//! reclaim fragmented B-tree nodes but that is out of scope for the
//! allocator itself.

use log::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub offset: u64,
    pub size: u64,
}

/// Monotonic bump allocator over the file's address space.
pub struct Allocator {
    next_offset: u64,
    blocks: Vec<Block>,
}

impl Allocator {
    /// Creates an allocator whose first allocation will land at
    /// `start_offset` (typically just past the superblock).
    pub fn new(start_offset: u64) -> Self {
        Allocator {
            next_offset: start_offset,
            blocks: Vec::new(),
        }
    }

    /// Reserves `size` bytes, returning the address of the new block.
    pub fn allocate(&mut self, size: u64) -> Result<u64> {
        if size == 0 {
            return Err(Error::ZeroSizeAllocation);
        }
        let offset = self.next_offset;
        self.blocks.push(Block { offset, size });
        self.next_offset += size;
        debug!("allocate size={size} -> offset={offset:#x}, eof now {:#x}", self.next_offset);
        Ok(offset)
    }

    /// Current end-of-file address: one past the last allocated byte.
    pub fn end_of_file(&self) -> u64 {
        self.next_offset
    }

    /// Whether `[offset, offset+size)` overlaps any previously allocated
    /// block.
    pub fn is_allocated(&self, offset: u64, size: u64) -> bool {
        self.blocks
            .iter()
            .any(|b| overlaps(b.offset, b.size, offset, size))
    }

    /// Debug aid: confirms no two recorded blocks overlap and that
    /// `next_offset` is at least as large as every block's end.
    pub fn validate_no_overlaps(&self) -> Result<()> {
        for i in 0..self.blocks.len() {
            for j in (i + 1)..self.blocks.len() {
                let a = self.blocks[i];
                let b = self.blocks[j];
                if overlaps(a.offset, a.size, b.offset, b.size) {
                    return Err(Error::InvariantViolation(format!(
                        "allocator blocks overlap: {a:?} and {b:?}"
                    )));
                }
            }
            let b = self.blocks[i];
            if b.offset + b.size > self.next_offset {
                return Err(Error::InvariantViolation(format!(
                    "block {b:?} extends past end_of_file {:#x}",
                    self.next_offset
                )));
            }
        }
        Ok(())
    }
}

fn overlaps(a_off: u64, a_size: u64, b_off: u64, b_size: u64) -> bool {
    a_off < b_off + b_size && b_off < a_off + a_size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_sequential_and_non_overlapping() {
        let mut alloc = Allocator::new(48);
        let a = alloc.allocate(16).unwrap();
        let b = alloc.allocate(32).unwrap();
        assert_eq!(a, 48);
        assert_eq!(b, 64);
        assert_eq!(alloc.end_of_file(), 96);
        alloc.validate_no_overlaps().unwrap();
    }

    #[test]
    fn zero_size_allocation_fails() {
        let mut alloc = Allocator::new(48);
        assert!(matches!(alloc.allocate(0), Err(Error::ZeroSizeAllocation)));
    }

    #[test]
    fn detects_overlap_queries() {
        let mut alloc = Allocator::new(0);
        alloc.allocate(10).unwrap();
        assert!(alloc.is_allocated(0, 10));
        assert!(alloc.is_allocated(5, 1));
        assert!(!alloc.is_allocated(10, 5));
    }
}
