//! Little-endian primitive codec shared by every structural decoder/encoder.
//!
//! HDF5 addresses and lengths are not fixed-width: their size is carried by
//! the superblock (`offset_size`, `length_size`, usually 8 but 4 for small
//! files). [`read_uint`]/[`write_uint`] handle that variable width; everything
//! else is a thin wrapper over `nom`'s little-endian integer parsers so call
//! sites read the same whether the field is 1, 2, 4, or 8 bytes.

use crate::error::{Error, Result};

/// Sentinel for "undefined address": all bits set within the address's width.
pub const UNDEFINED_ADDRESS: u64 = u64::MAX;

/// Reads a `width`-byte (1/2/4/8) little-endian unsigned integer, zero
/// extended into a `u64`. Used for addresses and lengths whose width is
/// governed by the superblock.
pub fn read_uint(input: &[u8], width: u8) -> Result<(&[u8], u64)> {
    if (input.len() as u64) < width as u64 {
        return Err(Error::TruncatedInput {
            context: "variable-width integer",
            need: width as usize,
            had: input.len(),
        });
    }
    let (bytes, rest) = input.split_at(width as usize);
    let mut value = 0u64;
    for (i, b) in bytes.iter().enumerate() {
        value |= (*b as u64) << (8 * i);
    }
    Ok((rest, value))
}

/// Encodes `value` into `width` little-endian bytes, truncating silently for
/// widths smaller than 8 (callers are expected to have validated range).
pub fn write_uint(value: u64, width: u8, out: &mut Vec<u8>) {
    let bytes = value.to_le_bytes();
    out.extend_from_slice(&bytes[..width as usize]);
}

/// An address is a variable-width offset; `UNDEFINED_ADDRESS` (width's
/// all-ones) denotes "no value". Decodes the all-ones sentinel for any width.
pub fn read_address(input: &[u8], width: u8) -> Result<(&[u8], Option<u64>)> {
    let (rest, raw) = read_uint(input, width)?;
    let all_ones = if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (8 * width)) - 1
    };
    Ok((rest, if raw == all_ones { None } else { Some(raw) }))
}

/// Encodes `Option<u64>` as an address: `None` becomes the width's all-ones
/// sentinel.
pub fn write_address(value: Option<u64>, width: u8, out: &mut Vec<u8>) {
    let all_ones = if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (8 * width)) - 1
    };
    write_uint(value.unwrap_or(all_ones), width, out);
}

pub fn read_u8(input: &[u8]) -> Result<(&[u8], u8)> {
    nom::number::complete::le_u8::<_, nom::error::VerboseError<&[u8]>>(input)
        .map_err(Error::from)
}

pub fn read_u16(input: &[u8]) -> Result<(&[u8], u16)> {
    nom::number::complete::le_u16::<_, nom::error::VerboseError<&[u8]>>(input)
        .map_err(Error::from)
}

pub fn read_u32(input: &[u8]) -> Result<(&[u8], u32)> {
    nom::number::complete::le_u32::<_, nom::error::VerboseError<&[u8]>>(input)
        .map_err(Error::from)
}

pub fn read_u64(input: &[u8]) -> Result<(&[u8], u64)> {
    nom::number::complete::le_u64::<_, nom::error::VerboseError<&[u8]>>(input)
        .map_err(Error::from)
}

/// Rounds `n` up to the next multiple of 8, HDF5's universal padding rule for
/// names and inline message bodies.
pub fn pad8(n: usize) -> usize {
    (n + 7) & !7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_variable_width() {
        for width in [4u8, 8u8] {
            let mut out = Vec::new();
            write_uint(0x1234, width, &mut out);
            let (rest, value) = read_uint(&out, width).unwrap();
            assert!(rest.is_empty());
            assert_eq!(value, 0x1234);
        }
    }

    #[test]
    fn undefined_address_roundtrips() {
        let mut out = Vec::new();
        write_address(None, 8, &mut out);
        let (_, value) = read_address(&out, 8).unwrap();
        assert_eq!(value, None);

        let mut out = Vec::new();
        write_address(Some(42), 4, &mut out);
        let (_, value) = read_address(&out, 4).unwrap();
        assert_eq!(value, Some(42));
    }

    #[test]
    fn pad8_rounds_up() {
        assert_eq!(pad8(0), 0);
        assert_eq!(pad8(1), 8);
        assert_eq!(pad8(8), 8);
        assert_eq!(pad8(9), 16);
    }
}
