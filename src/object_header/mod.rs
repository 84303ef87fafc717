//! Object headers: the versioned envelope describing any HDF5 object
//! (spec.md §3 "Object Header", §4.3).
//!
//! Decoding walks v1 (16-bit message types, no checksum) or v2 (`OHDR`
//! signature, lookup3-checksummed chunks) headers, following continuation
//! messages until the chain ends. Encoding always produces a v2 header,
//! since this engine only ever writes new objects.

pub mod message;

use log::trace;

pub use message::Message;

use crate::alloc::Allocator;
use crate::checksum::lookup3;
use crate::error::{Error, Result};
use crate::io::FileIo;
use crate::primitive::{read_address, read_u16, read_u32, read_u8};

const V2_SIGNATURE: &[u8; 4] = b"OHDR";

/// An ordered list of messages describing one object. Message order and the
/// exact bytes of each (for unknown types) are preserved across a
/// read-modify-write round trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectHeader {
    pub messages: Vec<Message>,
}

impl ObjectHeader {
    pub fn new(messages: Vec<Message>) -> Self {
        ObjectHeader { messages }
    }

    /// Reads the object header at `address`, following continuation chunks.
    pub fn decode(io: &FileIo, address: u64, offset_size: u8) -> Result<Self> {
        let probe = io.read_at(address, 4)?;
        if probe.as_slice() == V2_SIGNATURE {
            Self::decode_v2(io, address, offset_size)
        } else {
            Self::decode_v1(io, address, offset_size)
        }
    }

    fn decode_v1(io: &FileIo, address: u64, offset_size: u8) -> Result<Self> {
        let head = io.read_at(address, 16)?;
        let (input, version) = read_u8(&head)?;
        if version != 1 {
            return Err(Error::UnsupportedVersion {
                kind: "object header",
                version,
            });
        }
        let (input, _reserved) = read_u8(input)?;
        let (input, total_messages) = read_u16(input)?;
        let (input, _reference_count) = read_u32(input)?;
        let (_, header_size) = read_u32(input)?;

        let mut chunk_addr = address + 16;
        let mut chunk_remaining = header_size as u64;
        let mut messages = Vec::new();
        let mut parsed = 0u16;

        while parsed < total_messages {
            if chunk_remaining < 8 {
                break;
            }
            let envelope = io.read_at(chunk_addr, 8)?;
            let (rest, msg_type) = read_u16(&envelope)?;
            let (rest, msg_size) = read_u16(rest)?;
            let (_, _flags) = read_u8(rest)?;
            let body_addr = chunk_addr + 8;
            let body = io.read_at(body_addr, msg_size as u64)?;

            if msg_type == message::TYPE_CONTINUATION {
                let decoded = Message::decode(msg_type, msg_size, &body, offset_size)?;
                if let Message::Continuation(c) = decoded {
                    chunk_addr = c.offset;
                    chunk_remaining = c.length;
                    parsed += 1;
                    continue;
                }
            }

            messages.push(Message::decode(msg_type, msg_size, &body, offset_size)?);
            let consumed = 8 + msg_size as u64;
            chunk_addr += consumed;
            chunk_remaining = chunk_remaining.saturating_sub(consumed);
            parsed += 1;
        }

        Ok(ObjectHeader { messages })
    }

    fn decode_v2(io: &FileIo, address: u64, offset_size: u8) -> Result<Self> {
        let fixed = io.read_at(address, 6)?;
        if &fixed[..4] != V2_SIGNATURE {
            return Err(Error::InvariantViolation("expected OHDR signature".into()));
        }
        let (input, version) = read_u8(&fixed[4..])?;
        if version != 2 {
            return Err(Error::UnsupportedVersion {
                kind: "object header",
                version,
            });
        }
        let (_, flags) = read_u8(input)?;

        let mut cursor = address + 6;
        if flags & 0x20 != 0 {
            cursor += 16; // four u32 timestamps
        }
        if flags & 0x10 != 0 {
            cursor += 4; // max-compact/max-dense u16 pair
        }

        let size_of_chunk0 = 1usize << (flags & 0x03);
        let chunk0_size_bytes = io.read_at(cursor, size_of_chunk0 as u64)?;
        let mut chunk0_size = 0u64;
        for (i, b) in chunk0_size_bytes.iter().enumerate() {
            chunk0_size |= (*b as u64) << (8 * i);
        }
        cursor += size_of_chunk0 as u64;

        // chunk0_size covers the messages plus the trailing lookup3 checksum;
        // the checksum itself is taken over everything from the `OHDR`
        // signature through the last message byte (spec.md §3/§8 invariant 2).
        if chunk0_size < 4 {
            return Err(Error::InvariantViolation(
                "v2 object header chunk-0 size too small to hold a checksum".into(),
            ));
        }
        verify_chunk_checksum(io, address, (cursor - address) + chunk0_size - 4)?;

        let mut chunk_addr = cursor;
        let mut chunk_remaining = chunk0_size;
        let mut messages = Vec::new();
        let track_creation_order = flags & 0x04 != 0;

        loop {
            if chunk_remaining < 4 {
                break;
            }
            let envelope_len = if track_creation_order { 6 } else { 4 };
            if chunk_remaining < envelope_len as u64 + 1 {
                break;
            }
            let envelope = io.read_at(chunk_addr, envelope_len as u64)?;
            let (rest, msg_type) = read_u8(&envelope)?;
            let (rest, msg_size) = read_u16(rest)?;
            let (_, _msg_flags) = read_u8(rest)?;
            let body_addr = chunk_addr + envelope_len as u64;
            let body = io.read_at(body_addr, msg_size as u64)?;

            if msg_type as u16 == message::TYPE_CONTINUATION {
                let decoded = Message::decode(msg_type as u16, msg_size, &body, offset_size)?;
                if let Message::Continuation(c) = decoded {
                    if c.length < 8 {
                        return Err(Error::InvariantViolation(
                            "v2 object header continuation block too small to hold signature + checksum".into(),
                        ));
                    }
                    // v2 continuation blocks are signature-prefixed ('OCHK') and
                    // checksummed the same way chunk-0 is: over everything from
                    // the signature through the last message byte.
                    verify_chunk_checksum(io, c.offset, c.length - 4)?;
                    chunk_addr = c.offset + 4;
                    chunk_remaining = c.length.saturating_sub(4 + 4); // minus sig + trailing checksum
                    continue;
                }
            }

            messages.push(Message::decode(msg_type as u16, msg_size, &body, offset_size)?);
            let consumed = envelope_len as u64 + msg_size as u64;
            chunk_addr += consumed;
            chunk_remaining = chunk_remaining.saturating_sub(consumed);

            if chunk_remaining < envelope_len as u64 + 1 {
                break;
            }
        }

        trace!("decoded v2 object header at {address:#x}: {} messages", messages.len());
        Ok(ObjectHeader { messages })
    }

    /// Packs `self.messages` into a v2 object header, allocating continuation
    /// chunks as needed, and writes it at a freshly allocated address.
    /// Returns that address.
    pub fn write(&self, io: &mut FileIo, alloc: &mut Allocator, offset_size: u8) -> Result<u64> {
        let mut chunk0 = Vec::new();
        for m in &self.messages {
            encode_message_envelope(m, offset_size, &mut chunk0);
        }

        let mut header = Vec::new();
        header.extend_from_slice(V2_SIGNATURE);
        header.push(2); // version
        header.push(0); // flags: size-of-chunk0 = 1 byte width (class 0), no timestamps/thresholds/creation-order

        let size_of_chunk0: u8 = if chunk0.len() + 4 <= u8::MAX as usize {
            1
        } else if chunk0.len() + 4 <= u16::MAX as usize {
            2
        } else {
            4
        };
        // Patch the flags byte's low 2 bits to reflect the chosen width class.
        let class = match size_of_chunk0 {
            1 => 0,
            2 => 1,
            4 => 2,
            _ => 3,
        };
        header[5] |= class;

        let chunk0_total = chunk0.len() as u64 + 4; // + trailing checksum
        crate::primitive::write_uint(chunk0_total, size_of_chunk0, &mut header);
        header.extend_from_slice(&chunk0);

        let checksum = lookup3(&header, 0);
        header.extend_from_slice(&checksum.to_le_bytes());

        let address = alloc.allocate(header.len() as u64)?;
        io.write_at(address, &header)?;
        Ok(address)
    }
}

/// Verifies a v2 chunk's trailing lookup3 checksum: `prefix_len` bytes
/// starting at `prefix_start` are hashed and compared against the next 4
/// bytes (spec.md §8 invariant 2, §7 "checksum failures are fatal").
fn verify_chunk_checksum(io: &FileIo, prefix_start: u64, prefix_len: u64) -> Result<()> {
    let bytes = io.read_at(prefix_start, prefix_len + 4)?;
    let (prefix, trailer) = bytes.split_at(prefix_len as usize);
    let stored = u32::from_le_bytes(trailer.try_into().unwrap());
    let computed = lookup3(prefix, 0);
    if stored != computed {
        return Err(Error::ChecksumMismatch {
            kind: "v2 object header chunk",
            stored,
            computed,
        });
    }
    Ok(())
}

fn encode_message_envelope(message: &Message, offset_size: u8, out: &mut Vec<u8>) {
    let body = message.encode(offset_size);
    out.push(message.type_id() as u8);
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.push(0); // flags
    out.extend_from_slice(&body);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::{Datatype, Dataspace};
    use tempfile::NamedTempFile;

    #[test]
    fn write_then_read_roundtrips_messages() {
        let tmp = NamedTempFile::new().unwrap();
        let mut io = FileIo::from_file(tmp.reopen().unwrap()).unwrap();
        let mut alloc = Allocator::new(0);

        let header = ObjectHeader::new(vec![
            Message::Dataspace(Dataspace::new(vec![5])),
            Message::Datatype(Datatype::f64()),
            Message::Unknown {
                msg_type: 0x4242,
                data: vec![9, 9, 9, 9],
            },
        ]);

        let addr = header.write(&mut io, &mut alloc, 8).unwrap();
        let decoded = ObjectHeader::decode(&io, addr, 8).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn corrupted_v2_chunk_fails_checksum() {
        let tmp = NamedTempFile::new().unwrap();
        let mut io = FileIo::from_file(tmp.reopen().unwrap()).unwrap();
        let mut alloc = Allocator::new(0);

        let header = ObjectHeader::new(vec![Message::Dataspace(Dataspace::new(vec![5]))]);
        let addr = header.write(&mut io, &mut alloc, 8).unwrap();

        // Flip a byte inside the encoded message, leaving the trailing
        // checksum untouched so it no longer matches.
        let mut byte = io.read_at(addr + 10, 1).unwrap();
        byte[0] ^= 0xff;
        io.write_at(addr + 10, &byte).unwrap();

        assert!(matches!(
            ObjectHeader::decode(&io, addr, 8),
            Err(Error::ChecksumMismatch { kind: "v2 object header chunk", .. })
        ));
    }
}
