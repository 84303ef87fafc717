//! Filter pipeline: an ordered chain of reversible byte transforms applied
//! to chunk/attribute payloads before they reach storage (spec.md §4.6).
//!
//! [`FilterSpec`] is the data-only, wire-shaped description of one filter
//! (what the Filter-Pipeline message stores); [`Filter`] is the behavioral
//! trait each spec maps to via [`FilterSpec::as_filter`]. Keeping the stored
//! form data-only lets [`Pipeline`] derive `Clone`/`PartialEq` for use inside
//! [`crate::object_header::Message`], while dispatch still goes through a
//! single polymorphic interface (spec.md §9 "Polymorphic filters").

mod bzip2;
mod deflate;
mod fletcher32;
mod lzf;
mod shuffle;
mod szip;

use crate::error::{Error, Result};
use crate::primitive::{pad8, read_u16, read_u8};

pub const ID_DEFLATE: u16 = 1;
pub const ID_SHUFFLE: u16 = 2;
pub const ID_FLETCHER32: u16 = 3;
pub const ID_SZIP: u16 = 4;
pub const ID_BZIP2: u16 = 307;
pub const ID_LZF: u16 = 32000;

/// The behavioral contract every filter implements (spec.md §4.6).
pub trait Filter {
    fn id(&self) -> u16;
    fn name(&self) -> &str;
    /// Forward transform, applied on write.
    fn apply(&self, data: &[u8]) -> Result<Vec<u8>>;
    /// Inverse transform, applied on read (reverse pipeline order).
    fn remove(&self, data: &[u8]) -> Result<Vec<u8>>;
    /// `(flags, cd_values)` as stored in the Filter-Pipeline message.
    fn encode_params(&self) -> (u16, Vec<u32>);
}

/// Data-only description of one pipeline stage, as stored in the
/// Filter-Pipeline object-header message.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterSpec {
    Deflate { level: u32 },
    Shuffle { element_size: u32 },
    Fletcher32,
    Szip,
    Bzip2,
    Lzf,
    /// Any filter id this build doesn't implement; preserved for round-trip.
    Unknown { id: u16, name: String, cd_values: Vec<u32> },
}

impl FilterSpec {
    pub fn as_filter(&self) -> Box<dyn Filter> {
        match self {
            FilterSpec::Deflate { level } => Box::new(deflate::Deflate { level: *level }),
            FilterSpec::Shuffle { element_size } => {
                Box::new(shuffle::Shuffle { element_size: *element_size })
            }
            FilterSpec::Fletcher32 => Box::new(fletcher32::Fletcher32Filter),
            FilterSpec::Szip => Box::new(szip::Szip),
            FilterSpec::Bzip2 => Box::new(bzip2::Bzip2),
            FilterSpec::Lzf => Box::new(lzf::Lzf),
            FilterSpec::Unknown { id, name, .. } => Box::new(UnknownFilter {
                id: *id,
                name: name.clone(),
            }),
        }
    }

    fn wire_name(&self) -> &str {
        match self {
            FilterSpec::Deflate { .. } => "deflate",
            FilterSpec::Shuffle { .. } => "shuffle",
            FilterSpec::Fletcher32 => "fletcher32",
            FilterSpec::Szip => "szip",
            FilterSpec::Bzip2 => "bzip2",
            FilterSpec::Lzf => "lzf",
            FilterSpec::Unknown { name, .. } => name,
        }
    }

    fn id(&self) -> u16 {
        match self {
            FilterSpec::Deflate { .. } => ID_DEFLATE,
            FilterSpec::Shuffle { .. } => ID_SHUFFLE,
            FilterSpec::Fletcher32 => ID_FLETCHER32,
            FilterSpec::Szip => ID_SZIP,
            FilterSpec::Bzip2 => ID_BZIP2,
            FilterSpec::Lzf => ID_LZF,
            FilterSpec::Unknown { id, .. } => *id,
        }
    }

    fn cd_values(&self) -> Vec<u32> {
        match self {
            FilterSpec::Deflate { level } => vec![*level],
            FilterSpec::Shuffle { element_size } => vec![*element_size],
            FilterSpec::Unknown { cd_values, .. } => cd_values.clone(),
            _ => Vec::new(),
        }
    }

    fn from_wire(id: u16, name: &str, cd_values: Vec<u32>) -> FilterSpec {
        match id {
            ID_DEFLATE => FilterSpec::Deflate {
                level: cd_values.first().copied().unwrap_or(6),
            },
            ID_SHUFFLE => FilterSpec::Shuffle {
                element_size: cd_values.first().copied().unwrap_or(1),
            },
            ID_FLETCHER32 => FilterSpec::Fletcher32,
            ID_SZIP => FilterSpec::Szip,
            ID_BZIP2 => FilterSpec::Bzip2,
            ID_LZF => FilterSpec::Lzf,
            other => FilterSpec::Unknown {
                id: other,
                name: name.to_string(),
                cd_values,
            },
        }
    }
}

struct UnknownFilter {
    id: u16,
    name: String,
}

impl Filter for UnknownFilter {
    fn id(&self) -> u16 {
        self.id
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn apply(&self, _data: &[u8]) -> Result<Vec<u8>> {
        Err(Error::UnsupportedFilter {
            id: self.id,
            name: self.name.clone(),
        })
    }
    fn remove(&self, _data: &[u8]) -> Result<Vec<u8>> {
        Err(Error::UnsupportedFilter {
            id: self.id,
            name: self.name.clone(),
        })
    }
    fn encode_params(&self) -> (u16, Vec<u32>) {
        (0, Vec::new())
    }
}

/// An ordered chain of filter stages (spec.md §4.6).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pipeline {
    pub stages: Vec<FilterSpec>,
}

impl Pipeline {
    pub fn new(stages: Vec<FilterSpec>) -> Self {
        Pipeline { stages }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Applies every stage in order (write path).
    pub fn apply(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut buf = data.to_vec();
        for stage in &self.stages {
            buf = stage.as_filter().apply(&buf)?;
        }
        Ok(buf)
    }

    /// Applies every stage's inverse in reverse order (read path).
    pub fn remove(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut buf = data.to_vec();
        for stage in self.stages.iter().rev() {
            buf = stage.as_filter().remove(&buf)?;
        }
        Ok(buf)
    }

    /// Decodes a Filter-Pipeline message body (version 2 wire format).
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (input, version) = read_u8(data)?;
        if version != 2 {
            return Err(Error::UnsupportedVersion {
                kind: "filter pipeline message",
                version,
            });
        }
        let (input, filter_count) = read_u8(input)?;
        let mut rest = &input[6..]; // reserved
        let mut stages = Vec::with_capacity(filter_count as usize);

        for _ in 0..filter_count {
            let (next, id) = read_u16(rest)?;
            let (next, name_len) = read_u16(next)?;
            let (next, _flags) = read_u16(next)?;
            let (next, cd_count) = read_u16(next)?;
            let name_bytes = &next[..pad8(name_len as usize)];
            let name_end = name_bytes.iter().position(|b| *b == 0).unwrap_or(name_bytes.len());
            let name = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();
            let mut cursor = &next[pad8(name_len as usize)..];
            let mut cd_values = Vec::with_capacity(cd_count as usize);
            for _ in 0..cd_count {
                let (c, v) = crate::primitive::read_u32(cursor)?;
                cd_values.push(v);
                cursor = c;
            }
            stages.push(FilterSpec::from_wire(id, &name, cd_values));
            rest = cursor;
        }

        Ok(Pipeline { stages })
    }

    /// Encodes a Filter-Pipeline message body (version 2 wire format).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![2u8, self.stages.len() as u8];
        out.extend_from_slice(&[0u8; 6]);
        for stage in &self.stages {
            let id = stage.id();
            let name = stage.wire_name();
            let cd_values = stage.cd_values();
            out.extend_from_slice(&id.to_le_bytes());
            out.extend_from_slice(&((name.len() + 1) as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes()); // flags: optional
            out.extend_from_slice(&(cd_values.len() as u16).to_le_bytes());
            let mut name_bytes = name.as_bytes().to_vec();
            name_bytes.push(0);
            name_bytes.resize(pad8(name_bytes.len()), 0);
            out.extend_from_slice(&name_bytes);
            for v in cd_values {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_message_roundtrip() {
        let pipeline = Pipeline::new(vec![
            FilterSpec::Shuffle { element_size: 4 },
            FilterSpec::Deflate { level: 6 },
        ]);
        let encoded = pipeline.encode();
        let decoded = Pipeline::decode(&encoded).unwrap();
        assert_eq!(decoded, pipeline);
    }

    #[test]
    fn apply_then_remove_is_identity() {
        let pipeline = Pipeline::new(vec![
            FilterSpec::Shuffle { element_size: 4 },
            FilterSpec::Deflate { level: 6 },
            FilterSpec::Fletcher32,
        ]);
        let data: Vec<u8> = (0..64u8).collect();
        let applied = pipeline.apply(&data).unwrap();
        let restored = pipeline.remove(&applied).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn unsupported_filter_reports_codec_name() {
        let spec = FilterSpec::Szip;
        let err = spec.as_filter().apply(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFilter { .. }));
    }
}
