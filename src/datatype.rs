//! Shared datatype and dataspace types (spec.md §3: "Datatype", "Dataspace").
//!
//! These are used both by the Datatype object-header message and by the
//! Attribute message, which embeds a datatype/dataspace pair inline.

use crate::error::{Error, Result};
use crate::primitive::{pad8, read_u32, read_u64, read_u8};

#[derive(Debug, Clone, PartialEq)]
pub enum DatatypeClass {
    FixedPoint { signed: bool },
    FloatingPoint,
    Time,
    String,
    Bitfield,
    Opaque,
    Compound { members: Vec<CompoundMember> },
    Reference,
    Enum,
    VariableLength { base: Box<DatatypeClass>, is_string: bool },
    Array { base: Box<DatatypeClass>, dims: Vec<u32> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompoundMember {
    pub name: String,
    pub byte_offset: u32,
    pub datatype: Datatype,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Datatype {
    pub version: u8,
    pub class: DatatypeClass,
    pub size: u32,
}

impl Datatype {
    pub fn f64() -> Self {
        Datatype {
            version: 1,
            class: DatatypeClass::FloatingPoint,
            size: 8,
        }
    }

    pub fn f32() -> Self {
        Datatype {
            version: 1,
            class: DatatypeClass::FloatingPoint,
            size: 4,
        }
    }

    pub fn i64() -> Self {
        Datatype {
            version: 1,
            class: DatatypeClass::FixedPoint { signed: true },
            size: 8,
        }
    }

    pub fn i32() -> Self {
        Datatype {
            version: 1,
            class: DatatypeClass::FixedPoint { signed: true },
            size: 4,
        }
    }

    pub fn u8() -> Self {
        Datatype {
            version: 1,
            class: DatatypeClass::FixedPoint { signed: false },
            size: 1,
        }
    }

    /// Decodes a Datatype message body (type=3), given the message's
    /// declared size (needed because "properties" is a variable tail).
    pub fn decode(input: &[u8], message_size: u16) -> Result<Self> {
        let (input, class_and_version) = read_u8(input)?;
        let version = class_and_version >> 4;
        let raw_class = class_and_version & 0x0f;
        let (input, bitfield0) = read_u8(input)?;
        let (input, bitfield1) = read_u8(input)?;
        let (input, bitfield2) = read_u8(input)?;
        let (input, size) = read_u32(input)?;
        let properties_len = message_size as usize - 8;
        let properties = if input.len() >= properties_len {
            &input[..properties_len]
        } else {
            input
        };

        let class = match raw_class {
            0 => DatatypeClass::FixedPoint {
                signed: bitfield0 & 0x08 != 0,
            },
            1 => DatatypeClass::FloatingPoint,
            2 => DatatypeClass::Time,
            3 => DatatypeClass::String,
            4 => DatatypeClass::Bitfield,
            5 => DatatypeClass::Opaque,
            6 => decode_compound(properties, bitfield0, bitfield1, size)?,
            7 => DatatypeClass::Reference,
            8 => DatatypeClass::Enum,
            9 => {
                let is_string = (bitfield0 & 0x0f) == 1;
                let base = if properties.len() >= 8 {
                    Box::new(Self::decode(&properties[8..], (properties.len() - 8) as u16)?.class)
                } else {
                    Box::new(DatatypeClass::Opaque)
                };
                DatatypeClass::VariableLength { base, is_string }
            }
            10 => {
                let dims_count = properties.first().copied().unwrap_or(0) as usize;
                let base = Box::new(DatatypeClass::Opaque);
                DatatypeClass::Array {
                    base,
                    dims: vec![0u32; dims_count],
                }
            }
            other => {
                return Err(Error::UnsupportedDatatype {
                    class: "unknown",
                    detail: format!("class id {other}"),
                })
            }
        };

        Ok(Datatype {
            version,
            class,
            size,
        })
    }

    /// Encodes a Datatype message body. Only the subset of classes this
    /// engine writes (fixed-point, floating-point, string, variable-length)
    /// is supported; others round-trip only through `decode`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let (raw_class, bitfield0): (u8, u8) = match &self.class {
            DatatypeClass::FixedPoint { signed } => (0, if *signed { 0x08 } else { 0 }),
            DatatypeClass::FloatingPoint => (1, 0x20), // bit 5: IEEE mantissa normalization
            DatatypeClass::Time => (2, 0),
            DatatypeClass::String => (3, 0),
            DatatypeClass::Bitfield => (4, 0),
            DatatypeClass::Opaque => (5, 0),
            DatatypeClass::Compound { .. } => (6, 0),
            DatatypeClass::Reference => (7, 0),
            DatatypeClass::Enum => (8, 0),
            DatatypeClass::VariableLength { is_string, .. } => {
                (9, if *is_string { 1 } else { 0 })
            }
            DatatypeClass::Array { .. } => (10, 0),
        };
        out.push((self.version << 4) | raw_class);
        out.push(bitfield0);
        out.push(0);
        out.push(0);
        out.extend_from_slice(&self.size.to_le_bytes());

        match &self.class {
            DatatypeClass::FixedPoint { .. } => {
                // bit-offset u16, bit-precision u16
                out.extend_from_slice(&0u16.to_le_bytes());
                out.extend_from_slice(&((self.size * 8) as u16).to_le_bytes());
            }
            DatatypeClass::FloatingPoint => {
                // simplified IEEE-754 property block matching size's natural layout
                let (exp_bits, mant_bits): (u16, u16) = if self.size == 4 {
                    (8, 23)
                } else {
                    (11, 52)
                };
                out.extend_from_slice(&0u16.to_le_bytes()); // bit offset
                out.extend_from_slice(&((self.size * 8) as u16).to_le_bytes()); // precision
                out.push((mant_bits) as u8); // sign location reused as mantissa low byte marker
                out.push(mant_bits as u8); // mantissa normalization position
                out.push(exp_bits as u8);
                out.push(0);
                out.extend_from_slice(&0u16.to_le_bytes());
                out.extend_from_slice(&(exp_bits).to_le_bytes());
                out.extend_from_slice(&0u16.to_le_bytes());
                out.extend_from_slice(&(mant_bits).to_le_bytes());
                out.extend_from_slice(&0u32.to_le_bytes());
            }
            DatatypeClass::VariableLength { base, .. } => {
                let inner = Datatype {
                    version: self.version,
                    class: (**base).clone(),
                    size: self.size,
                };
                out.extend_from_slice(&inner.encode());
            }
            _ => {}
        }
        out
    }
}

fn decode_compound(properties: &[u8], bitfield0: u8, bitfield1: u8, _size: u32) -> Result<DatatypeClass> {
    let num_members = (bitfield0 as u16) | ((bitfield1 as u16) << 8);
    let mut members = Vec::with_capacity(num_members as usize);
    let mut rest = properties;
    for _ in 0..num_members {
        let name_end = rest.iter().position(|b| *b == 0).unwrap_or(rest.len());
        let name = String::from_utf8_lossy(&rest[..name_end]).into_owned();
        let consumed = pad8(name_end + 1);
        if consumed > rest.len() {
            break;
        }
        rest = &rest[consumed..];
        if rest.len() < 4 {
            break;
        }
        let (next, byte_offset) = read_u32(rest)?;
        rest = next;
        // The remaining sub-datatype is opaque to this simplified decoder;
        // stop rather than mis-parse an unknown nested encoding.
        members.push(CompoundMember {
            name,
            byte_offset,
            datatype: Datatype {
                version: 1,
                class: DatatypeClass::Opaque,
                size: 0,
            },
        });
    }
    Ok(DatatypeClass::Compound { members })
}

/// Dataspace: rank plus current/maximum dimensions (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Dataspace {
    pub dimensions: Vec<u64>,
    pub max_dimensions: Option<Vec<u64>>,
}

/// Sentinel for "this axis is unlimited" in `max_dimensions`.
pub const UNLIMITED: u64 = u64::MAX;

impl Dataspace {
    pub fn new(dimensions: Vec<u64>) -> Self {
        Dataspace {
            dimensions,
            max_dimensions: None,
        }
    }

    pub fn scalar() -> Self {
        Dataspace {
            dimensions: Vec::new(),
            max_dimensions: None,
        }
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        let (input, version) = read_u8(input)?;
        let (input, dimensionality) = read_u8(input)?;
        let (input, flags) = read_u8(input)?;
        let input = if version == 1 {
            let (input, _reserved_ty) = read_u8(input)?;
            &input[4..]
        } else {
            input
        };
        let (input, dimensions) = count_u64(input, dimensionality as usize)?;
        let max_dimensions = if flags & 0x1 != 0 {
            Some(count_u64(input, dimensionality as usize)?.1)
        } else {
            None
        };
        Ok(Dataspace {
            dimensions,
            max_dimensions,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(1); // version
        out.push(self.dimensions.len() as u8);
        out.push(if self.max_dimensions.is_some() { 0x1 } else { 0 });
        out.push(0); // reserved "type" byte (version 1)
        out.extend_from_slice(&[0u8; 4]);
        for d in &self.dimensions {
            out.extend_from_slice(&d.to_le_bytes());
        }
        if let Some(max) = &self.max_dimensions {
            for d in max {
                out.extend_from_slice(&d.to_le_bytes());
            }
        }
        out
    }
}

fn count_u64(input: &[u8], n: usize) -> Result<(&[u8], Vec<u64>)> {
    let mut out = Vec::with_capacity(n);
    let mut rest = input;
    for _ in 0..n {
        let (next, v) = read_u64(rest)?;
        out.push(v);
        rest = next;
    }
    Ok((rest, out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataspace_roundtrip_rank2() {
        let ds = Dataspace::new(vec![2, 3]);
        let bytes = ds.encode();
        let decoded = Dataspace::decode(&bytes).unwrap();
        assert_eq!(decoded.dimensions, vec![2, 3]);
        assert_eq!(decoded.max_dimensions, None);
    }

    #[test]
    fn dataspace_scalar_roundtrip() {
        let ds = Dataspace::scalar();
        let bytes = ds.encode();
        let decoded = Dataspace::decode(&bytes).unwrap();
        assert_eq!(decoded.rank(), 0);
    }

    #[test]
    fn fixed_point_datatype_roundtrip() {
        let dt = Datatype::i64();
        let bytes = dt.encode();
        let decoded = Datatype::decode(&bytes, bytes.len() as u16).unwrap();
        assert_eq!(decoded.size, 8);
        assert!(matches!(decoded.class, DatatypeClass::FixedPoint { signed: true }));
    }

    #[test]
    fn float_datatype_roundtrip_size() {
        let dt = Datatype::f64();
        let bytes = dt.encode();
        let decoded = Datatype::decode(&bytes, bytes.len() as u16).unwrap();
        assert_eq!(decoded.size, 8);
        assert!(matches!(decoded.class, DatatypeClass::FloatingPoint));
    }
}
