//! Positional byte I/O over a backing file.
//!
//! This is the lowest layer: everything above it (superblock, object
//! headers, heaps, B-trees) addresses the file by byte offset, never by a
//! stream cursor. `FileIo` wraps a `std::fs::File` plus a read-only mmap of
//! its current contents for cheap random reads; writes go straight to the
//! file and invalidate the mmap on the next read.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use log::trace;

use crate::error::{Error, Result};

/// A positional reader/writer over a single backing file.
///
/// Mutation through a `FileIo` is exclusive: the type is `!Sync` in spirit
/// (spec.md §5 — concurrent mutation from multiple threads is a program
/// error in this MVP) even though nothing here enforces that at the type
/// level beyond normal borrow checking at the call site.
pub struct FileIo {
    file: File,
    mmap: Option<memmap2::Mmap>,
    len: u64,
}

impl FileIo {
    /// Opens `path` for reading and writing, creating it if absent.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();
        let mut io = FileIo {
            file,
            mmap: None,
            len,
        };
        io.remap()?;
        Ok(io)
    }

    /// Wraps an already-open file. Used by tests that need a `tempfile`.
    pub fn from_file(file: File) -> Result<Self> {
        let len = file.metadata()?.len();
        let mut io = FileIo {
            file,
            mmap: None,
            len,
        };
        io.remap()?;
        Ok(io)
    }

    fn remap(&mut self) -> Result<()> {
        self.mmap = if self.len == 0 {
            None
        } else {
            Some(unsafe { memmap2::Mmap::map(&self.file)? })
        };
        Ok(())
    }

    /// Reads exactly `len` bytes starting at `offset`.
    pub fn read_at(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        if offset + len > self.len {
            return Err(Error::TruncatedInput {
                context: "read_at",
                need: len as usize,
                had: self.len.saturating_sub(offset) as usize,
            });
        }
        let start = offset as usize;
        let end = start + len as usize;
        match &self.mmap {
            Some(mmap) => Ok(mmap[start..end].to_vec()),
            None => Ok(Vec::new()),
        }
    }

    /// Writes `bytes` at `offset`, growing the file if necessary, then
    /// re-maps so subsequent reads observe the write.
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        trace!("write_at offset={offset} len={}", bytes.len());
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        self.len = self.len.max(offset + bytes.len() as u64);
        self.remap()
    }

    /// Flushes pending writes to the underlying storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Current length of the backing file in bytes.
    pub fn size(&self) -> u64 {
        self.len
    }
}

/// A read-only byte source over an in-memory buffer, used by tests that
/// build a file image without touching disk.
pub struct SliceIo<'a> {
    data: &'a [u8],
}

impl<'a> SliceIo<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        SliceIo { data }
    }

    pub fn read_at(&self, offset: u64, len: u64) -> Result<&'a [u8]> {
        let start = offset as usize;
        let end = start + len as usize;
        self.data.get(start..end).ok_or(Error::TruncatedInput {
            context: "SliceIo::read_at",
            need: len as usize,
            had: self.data.len().saturating_sub(start),
        })
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Reads a whole file into memory. Convenience used by tests and by callers
/// who want a one-shot, fully-buffered open.
pub fn read_whole_file(path: impl AsRef<std::path::Path>) -> Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(buf)
}
