//! The superblock: the file's anchor record, immediately following the
//! 8-byte HDF5 signature. Versions 0/1 (legacy, decode-only) and 2/3
//! (current, decode + encode) are supported, per spec.md §4.2.

use log::warn;

use crate::error::{Error, Result};
use crate::primitive::{read_address, read_u16, read_u32, read_u64, read_u8, write_address, write_uint};

pub const SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', 0x0d, 0x0a, 0x1a, 0x0a];

#[derive(Debug, Clone, Copy)]
pub struct Superblock {
    pub version: u8,
    pub offset_size: u8,
    pub length_size: u8,
    pub file_consistency_flags: u32,
    pub base_address: u64,
    pub superblock_extension_address: Option<u64>,
    pub end_of_file_address: u64,
    pub root_group_object_header_address: Option<u64>,
    /// Only populated for v0/v1: legacy files locate the root group through
    /// a symbol-table entry rather than a bare object-header address.
    pub root_group_symbol_table: Option<RootSymbolTable>,
}

#[derive(Debug, Clone, Copy)]
pub struct RootSymbolTable {
    pub btree_address: u64,
    pub local_heap_address: u64,
}

/// Options controlling lenient decode behavior. `salvage_legacy_root` is the
/// opt-in, documented workaround from spec.md §9: when a v0 superblock has
/// an undefined root-group address, scan forward for the first `OHDR`
/// signature instead of failing outright. Off by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodeOptions {
    pub salvage_legacy_root: bool,
}

impl Superblock {
    /// Decodes a superblock from `input`, which must begin at the 8-byte
    /// file signature.
    pub fn decode(input: &[u8]) -> Result<Self> {
        Self::decode_with_options(input, DecodeOptions::default())
    }

    pub fn decode_with_options(input: &[u8], opts: DecodeOptions) -> Result<Self> {
        if input.len() < 8 || input[..8] != SIGNATURE {
            return Err(Error::InvalidMagic);
        }
        let input = &input[8..];
        let (input, version) = read_u8(input)?;

        match version {
            0 | 1 => Self::decode_legacy(input, version, opts),
            2 | 3 => Self::decode_current(input, version),
            v => Err(Error::UnsupportedVersion {
                kind: "superblock",
                version: v,
            }),
        }
    }

    fn decode_legacy(input: &[u8], version: u8, opts: DecodeOptions) -> Result<Self> {
        let (input, _free_space_storage_version) = read_u8(input)?;
        let (input, _root_group_symtab_entry_version) = read_u8(input)?;
        let (input, _reserved) = read_u8(input)?;
        let (input, _shared_header_message_format_version) = read_u8(input)?;
        let (input, offset_size) = read_u8(input)?;
        let (input, length_size) = read_u8(input)?;
        let (input, _reserved) = read_u8(input)?;
        let (input, _group_leaf_node_k) = read_u16(input)?;
        let (input, _group_internal_node_k) = read_u16(input)?;
        let (input, file_consistency_flags) = read_u32(input)?;
        if version == 1 {
            let (_, _indexed_storage_internal_node_k) = read_u16(input)?;
        }
        let input = if version == 1 { &input[4..] } else { input };

        let (input, base_address) = read_address(input, offset_size)?;
        let (input, _free_space_addr) = read_address(input, offset_size)?;
        let (input, end_of_file_address) = read_address(input, offset_size)?;
        let (input, _driver_info_addr) = read_address(input, offset_size)?;

        // Root-group symbol-table entry: link-name-offset, object-header
        // address, cache type, reserved, B-tree address, local-heap address.
        let (input, _link_name_offset) = read_address(input, offset_size)?;
        let (input, object_header_address) = read_address(input, offset_size)?;
        let (input, _cache_type) = read_u32(input)?;
        let (input, _reserved) = read_u32(input)?;
        let (input, btree_address) = read_address(input, offset_size)?;
        let (_, local_heap_address) = read_address(input, offset_size)?;

        let root_object_header = object_header_address;
        if root_object_header.is_none() {
            if opts.salvage_legacy_root {
                warn!(
                    "v{version} superblock has undefined root-group address; \
                     caller should salvage by scanning for the first OHDR signature"
                );
            } else {
                return Err(Error::AddressOutOfRange(crate::primitive::UNDEFINED_ADDRESS));
            }
        }

        Ok(Superblock {
            version,
            offset_size,
            length_size,
            file_consistency_flags,
            base_address: base_address.unwrap_or(0),
            superblock_extension_address: None,
            end_of_file_address: end_of_file_address.unwrap_or(0),
            root_group_object_header_address: root_object_header,
            root_group_symbol_table: Some(RootSymbolTable {
                btree_address: btree_address.unwrap_or(0),
                local_heap_address: local_heap_address.unwrap_or(0),
            }),
        })
    }

    fn decode_current(input: &[u8], version: u8) -> Result<Self> {
        let (input, offset_size) = read_u8(input)?;
        let (input, length_size) = read_u8(input)?;
        let (input, file_consistency_flags) = read_u8(input)?;
        let (input, base_address) = read_address(input, offset_size)?;
        let (input, superblock_extension_address) = read_address(input, offset_size)?;
        let (input, end_of_file_address) = read_address(input, offset_size)?;
        let (input, root_group_object_header_address) = read_address(input, offset_size)?;
        let (_, _checksum) = read_u32(input)?;

        Ok(Superblock {
            version,
            offset_size,
            length_size,
            file_consistency_flags: file_consistency_flags as u32,
            base_address: base_address.unwrap_or(0),
            superblock_extension_address,
            end_of_file_address: end_of_file_address.unwrap_or(0),
            root_group_object_header_address,
            root_group_symbol_table: None,
        })
    }

    /// Encodes a v3 superblock (the only version this engine writes).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(48);
        out.extend_from_slice(&SIGNATURE);
        out.push(3); // version
        out.push(self.offset_size);
        out.push(self.length_size);
        out.push(self.file_consistency_flags as u8);
        write_address(Some(self.base_address), self.offset_size, &mut out);
        write_address(self.superblock_extension_address, self.offset_size, &mut out);
        write_address(Some(self.end_of_file_address), self.offset_size, &mut out);
        write_address(
            self.root_group_object_header_address,
            self.offset_size,
            &mut out,
        );
        let checksum = crate::checksum::lookup3(&out[8..], 0);
        write_uint(checksum as u64, 4, &mut out);
        out
    }

    /// Minimum length in bytes of the fixed-size v2/v3 superblock for the
    /// given offset size (used to size the initial allocator start).
    pub fn current_len(offset_size: u8) -> u64 {
        // signature(8) + version/offset/length/flags(4) + 4 addresses + checksum(4)
        8 + 4 + 4 * offset_size as u64 + 4
    }
}
