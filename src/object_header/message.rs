//! Object-header message bodies (spec.md §3 "Message types").
//!
//! Message dispatch is table-driven by `(type, version)` the way spec.md §4.3
//! describes: [`Message::decode`] matches on the numeric type to pick a
//! codec, and preserves the raw bytes of any type it doesn't recognize so a
//! rewrite is still byte-identical for messages this engine doesn't
//! interpret.

use crate::datatype::{Datatype, Dataspace};
use crate::error::{Error, Result};
use crate::filter::Pipeline;
use crate::primitive::{pad8, read_address, read_u16, read_u32, read_u64, read_u8};

pub const TYPE_NIL: u16 = 0x00;
pub const TYPE_DATASPACE: u16 = 0x01;
pub const TYPE_LINK_INFO: u16 = 0x02;
pub const TYPE_DATATYPE: u16 = 0x03;
pub const TYPE_FILL_VALUE_OLD: u16 = 0x04;
pub const TYPE_FILL_VALUE: u16 = 0x05;
pub const TYPE_LINK: u16 = 0x06;
pub const TYPE_DATA_LAYOUT: u16 = 0x08;
pub const TYPE_GROUP_INFO: u16 = 0x0a;
pub const TYPE_FILTER_PIPELINE: u16 = 0x0b;
pub const TYPE_ATTRIBUTE: u16 = 0x0c;
pub const TYPE_OBJECT_COMMENT: u16 = 0x0d;
pub const TYPE_OBJECT_MODIFICATION_TIME: u16 = 0x12;
pub const TYPE_CONTINUATION: u16 = 0x10;
pub const TYPE_SYMBOL_TABLE: u16 = 0x11;
pub const TYPE_ATTRIBUTE_INFO: u16 = 0x15;

#[derive(Debug, Clone, PartialEq)]
pub struct LinkInfo {
    pub fractal_heap_address: Option<u64>,
    pub name_btree_address: Option<u64>,
    pub creation_order_btree_address: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FillValue {
    pub defined: bool,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkTarget {
    /// Hard link: resolves directly to an object-header address.
    Hard,
    /// Soft link: resolves by re-walking a textual path at lookup time.
    Soft,
    /// External link: resolves through another file (unsupported for
    /// traversal in this engine; the message still round-trips).
    External,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub name: String,
    pub target: LinkTarget,
    pub hard_target_address: Option<u64>,
    pub soft_target_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLayoutClass {
    Compact,
    Contiguous,
    Chunked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataLayout {
    pub class: DataLayoutClass,
    /// Contiguous: the data address. Chunked: the chunk B-tree root address.
    pub address: Option<u64>,
    /// Contiguous: byte size of the block.
    pub size: u64,
    /// Chunked: dimensions of one chunk, element size as the trailing entry
    /// (matching the wire layout: rank+1 dims, last being byte width).
    pub chunk_dimensions: Option<Vec<u32>>,
    /// Compact: the inline bytes.
    pub compact_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupInfo {
    pub max_compact_links: Option<u16>,
    pub max_dense_links: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeMsg {
    pub name: String,
    pub datatype: Datatype,
    pub dataspace: Dataspace,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Continuation {
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolTableMsg {
    pub btree_address: u64,
    pub local_heap_address: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributeInfo {
    pub fractal_heap_address: Option<u64>,
    pub name_btree_address: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Nil,
    Dataspace(Dataspace),
    LinkInfo(LinkInfo),
    Datatype(Datatype),
    FillValueOld(Vec<u8>),
    FillValue(FillValue),
    Link(Link),
    DataLayout(DataLayout),
    GroupInfo(GroupInfo),
    FilterPipeline(Pipeline),
    Attribute(AttributeMsg),
    ObjectComment(String),
    ObjectModificationTime(u32),
    Continuation(Continuation),
    SymbolTable(SymbolTableMsg),
    AttributeInfo(AttributeInfo),
    /// Any message type this engine doesn't interpret; preserved verbatim so
    /// a rewrite is byte-identical (spec.md §9 "Polymorphic messages").
    Unknown { msg_type: u16, data: Vec<u8> },
}

impl Message {
    pub fn type_id(&self) -> u16 {
        match self {
            Message::Nil => TYPE_NIL,
            Message::Dataspace(_) => TYPE_DATASPACE,
            Message::LinkInfo(_) => TYPE_LINK_INFO,
            Message::Datatype(_) => TYPE_DATATYPE,
            Message::FillValueOld(_) => TYPE_FILL_VALUE_OLD,
            Message::FillValue(_) => TYPE_FILL_VALUE,
            Message::Link(_) => TYPE_LINK,
            Message::DataLayout(_) => TYPE_DATA_LAYOUT,
            Message::GroupInfo(_) => TYPE_GROUP_INFO,
            Message::FilterPipeline(_) => TYPE_FILTER_PIPELINE,
            Message::Attribute(_) => TYPE_ATTRIBUTE,
            Message::ObjectComment(_) => TYPE_OBJECT_COMMENT,
            Message::ObjectModificationTime(_) => TYPE_OBJECT_MODIFICATION_TIME,
            Message::Continuation(_) => TYPE_CONTINUATION,
            Message::SymbolTable(_) => TYPE_SYMBOL_TABLE,
            Message::AttributeInfo(_) => TYPE_ATTRIBUTE_INFO,
            Message::Unknown { msg_type, .. } => *msg_type,
        }
    }

    /// Decodes one message body given its `(type, size)` envelope fields,
    /// all addresses assumed 8 bytes wide (this engine only writes/reads
    /// O=L=8 files for newly created objects; legacy narrow files are
    /// handled by passing the superblock's widths through `offset_size`).
    pub fn decode(msg_type: u16, size: u16, data: &[u8], offset_size: u8) -> Result<Self> {
        Ok(match msg_type {
            TYPE_NIL => Message::Nil,
            TYPE_DATASPACE => Message::Dataspace(Dataspace::decode(data)?),
            TYPE_LINK_INFO => Message::LinkInfo(decode_link_info(data, offset_size)?),
            TYPE_DATATYPE => Message::Datatype(Datatype::decode(data, size)?),
            TYPE_FILL_VALUE_OLD => Message::FillValueOld(data.to_vec()),
            TYPE_FILL_VALUE => Message::FillValue(decode_fill_value(data)?),
            TYPE_LINK => Message::Link(decode_link(data, offset_size)?),
            TYPE_DATA_LAYOUT => Message::DataLayout(decode_data_layout(data)?),
            TYPE_GROUP_INFO => Message::GroupInfo(decode_group_info(data)?),
            TYPE_FILTER_PIPELINE => Message::FilterPipeline(Pipeline::decode(data)?),
            TYPE_ATTRIBUTE => Message::Attribute(decode_attribute(data, size)?),
            TYPE_OBJECT_COMMENT => {
                let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
                Message::ObjectComment(String::from_utf8_lossy(&data[..end]).into_owned())
            }
            TYPE_OBJECT_MODIFICATION_TIME => {
                let (_, seconds) = read_u32(&data[4..])?;
                Message::ObjectModificationTime(seconds)
            }
            TYPE_CONTINUATION => {
                let (rest, offset) = read_address(data, offset_size)?;
                let (_, length) = read_address(rest, offset_size)?;
                Message::Continuation(Continuation {
                    offset: offset.unwrap_or(0),
                    length: length.unwrap_or(0),
                })
            }
            TYPE_SYMBOL_TABLE => {
                let (rest, btree) = read_address(data, offset_size)?;
                let (_, heap) = read_address(rest, offset_size)?;
                Message::SymbolTable(SymbolTableMsg {
                    btree_address: btree.unwrap_or(0),
                    local_heap_address: heap.unwrap_or(0),
                })
            }
            TYPE_ATTRIBUTE_INFO => Message::AttributeInfo(decode_attribute_info(data, offset_size)?),
            other => Message::Unknown {
                msg_type: other,
                data: data.to_vec(),
            },
        })
    }

    /// Encodes the message body (not the envelope).
    pub fn encode(&self, offset_size: u8) -> Vec<u8> {
        match self {
            Message::Nil => Vec::new(),
            Message::Dataspace(d) => d.encode(),
            Message::LinkInfo(li) => encode_link_info(li, offset_size),
            Message::Datatype(dt) => dt.encode(),
            Message::FillValueOld(raw) => raw.clone(),
            Message::FillValue(fv) => encode_fill_value(fv),
            Message::Link(l) => encode_link(l, offset_size),
            Message::DataLayout(dl) => encode_data_layout(dl),
            Message::GroupInfo(gi) => encode_group_info(gi),
            Message::FilterPipeline(p) => p.encode(),
            Message::Attribute(a) => encode_attribute(a),
            Message::ObjectComment(s) => {
                let mut out = s.as_bytes().to_vec();
                out.push(0);
                out
            }
            Message::ObjectModificationTime(secs) => {
                let mut out = vec![1, 0, 0, 0];
                out.extend_from_slice(&secs.to_le_bytes());
                out
            }
            Message::Continuation(c) => {
                let mut out = Vec::new();
                crate::primitive::write_uint(c.offset, offset_size, &mut out);
                crate::primitive::write_uint(c.length, offset_size, &mut out);
                out
            }
            Message::SymbolTable(st) => {
                let mut out = Vec::new();
                crate::primitive::write_uint(st.btree_address, offset_size, &mut out);
                crate::primitive::write_uint(st.local_heap_address, offset_size, &mut out);
                out
            }
            Message::AttributeInfo(ai) => encode_attribute_info(ai, offset_size),
            Message::Unknown { data, .. } => data.clone(),
        }
    }
}

fn decode_link_info(data: &[u8], offset_size: u8) -> Result<LinkInfo> {
    let (input, _version) = read_u8(data)?;
    let (input, flags) = read_u8(input)?;
    let input = if flags & 0x1 != 0 { &input[8..] } else { input };
    let (input, fractal_heap_address) = read_address(input, offset_size)?;
    let (input, name_btree_address) = read_address(input, offset_size)?;
    let creation_order_btree_address = if flags & 0x2 != 0 {
        read_address(input, offset_size)?.1
    } else {
        None
    };
    Ok(LinkInfo {
        fractal_heap_address,
        name_btree_address,
        creation_order_btree_address,
    })
}

fn encode_link_info(li: &LinkInfo, offset_size: u8) -> Vec<u8> {
    let mut out = vec![0u8, 0u8]; // version, flags (no creation-order tracking)
    crate::primitive::write_address(li.fractal_heap_address, offset_size, &mut out);
    crate::primitive::write_address(li.name_btree_address, offset_size, &mut out);
    out
}

fn decode_fill_value(data: &[u8]) -> Result<FillValue> {
    let (input, _version) = read_u8(data)?;
    let (input, _space_alloc_time) = read_u8(input)?;
    let (input, _write_time) = read_u8(input)?;
    let (input, defined) = read_u8(input)?;
    if defined == 0 {
        return Ok(FillValue {
            defined: false,
            value: Vec::new(),
        });
    }
    let (input, size) = read_u32(input)?;
    let value = input.get(..size as usize).unwrap_or(input).to_vec();
    Ok(FillValue {
        defined: true,
        value,
    })
}

fn encode_fill_value(fv: &FillValue) -> Vec<u8> {
    let mut out = vec![2, 2, 1, if fv.defined { 1 } else { 0 }];
    if fv.defined {
        out.extend_from_slice(&(fv.value.len() as u32).to_le_bytes());
        out.extend_from_slice(&fv.value);
    }
    out
}

/// Decodes a single link record (the same body `Message::Link` carries, but
/// used bare — without the `(type, size, flags)` envelope — for link
/// records stored inside a dense group's fractal heap; spec.md §4.9).
pub(crate) fn decode_link(data: &[u8], offset_size: u8) -> Result<Link> {
    let (input, _version) = read_u8(data)?;
    let (input, flags) = read_u8(input)?;
    let input = if flags & 0x08 != 0 { &input[1..] } else { input }; // link type byte present
    let link_type = if flags & 0x08 != 0 { data[2] } else { 0 };
    let input = if flags & 0x10 != 0 { &input[1..] } else { input }; // charset byte present
    let name_len_size = 1usize << (flags & 0x03);
    let (input, name_len) = match name_len_size {
        1 => read_u8(input).map(|(r, v)| (r, v as u64))?,
        2 => read_u16(input).map(|(r, v)| (r, v as u64))?,
        4 => read_u32(input).map(|(r, v)| (r, v as u64))?,
        _ => read_u64(input)?,
    };
    let name = String::from_utf8_lossy(&input[..name_len as usize]).into_owned();
    let rest = &input[name_len as usize..];

    match link_type {
        0 => {
            let (_, addr) = read_address(rest, offset_size)?;
            Ok(Link {
                name,
                target: LinkTarget::Hard,
                hard_target_address: addr,
                soft_target_path: None,
            })
        }
        1 => {
            let (rest, len) = read_u16(rest)?;
            let path = String::from_utf8_lossy(&rest[..len as usize]).into_owned();
            Ok(Link {
                name,
                target: LinkTarget::Soft,
                hard_target_address: None,
                soft_target_path: Some(path),
            })
        }
        _ => Ok(Link {
            name,
            target: LinkTarget::External,
            hard_target_address: None,
            soft_target_path: None,
        }),
    }
}

pub(crate) fn encode_link(l: &Link, offset_size: u8) -> Vec<u8> {
    let mut out = vec![1u8, 0x08]; // version 1, link-type byte present
    let type_byte = match l.target {
        LinkTarget::Hard => 0u8,
        LinkTarget::Soft => 1u8,
        LinkTarget::External => 64u8,
    };
    out.push(type_byte);
    out.push(l.name.len() as u8);
    out.extend_from_slice(l.name.as_bytes());
    match l.target {
        LinkTarget::Hard => {
            crate::primitive::write_address(l.hard_target_address, offset_size, &mut out);
        }
        LinkTarget::Soft => {
            let path = l.soft_target_path.as_deref().unwrap_or("");
            out.extend_from_slice(&(path.len() as u16).to_le_bytes());
            out.extend_from_slice(path.as_bytes());
        }
        LinkTarget::External => {}
    }
    out
}

fn decode_data_layout(data: &[u8]) -> Result<DataLayout> {
    let (input, version) = read_u8(data)?;
    if version != 3 && version != 4 {
        return Err(Error::UnsupportedVersion {
            kind: "data layout message",
            version,
        });
    }
    let (input, layout_class) = read_u8(input)?;
    match layout_class {
        0 => {
            let (input, size) = read_u16(input)?;
            let compact_data = input.get(..size as usize).unwrap_or(input).to_vec();
            Ok(DataLayout {
                class: DataLayoutClass::Compact,
                address: None,
                size: size as u64,
                chunk_dimensions: None,
                compact_data: Some(compact_data),
            })
        }
        1 => {
            let (input, address) = read_address(input, 8)?;
            let (_, size) = read_u64(input)?;
            Ok(DataLayout {
                class: DataLayoutClass::Contiguous,
                address,
                size,
                chunk_dimensions: None,
                compact_data: None,
            })
        }
        2 => {
            let (input, dimensionality) = read_u8(input)?;
            let (input, address) = read_address(input, 8)?;
            let mut dims = Vec::with_capacity(dimensionality as usize);
            let mut rest = input;
            for _ in 0..dimensionality {
                let (next, d) = read_u32(rest)?;
                dims.push(d);
                rest = next;
            }
            Ok(DataLayout {
                class: DataLayoutClass::Chunked,
                address,
                size: 0,
                chunk_dimensions: Some(dims),
                compact_data: None,
            })
        }
        other => Err(Error::UnsupportedVersion {
            kind: "data layout class",
            version: other,
        }),
    }
}

fn encode_data_layout(dl: &DataLayout) -> Vec<u8> {
    let mut out = vec![3u8];
    match dl.class {
        DataLayoutClass::Compact => {
            out.push(0);
            let data = dl.compact_data.clone().unwrap_or_default();
            out.extend_from_slice(&(data.len() as u16).to_le_bytes());
            out.extend_from_slice(&data);
        }
        DataLayoutClass::Contiguous => {
            out.push(1);
            crate::primitive::write_address(dl.address, 8, &mut out);
            out.extend_from_slice(&dl.size.to_le_bytes());
        }
        DataLayoutClass::Chunked => {
            out.push(2);
            let dims = dl.chunk_dimensions.clone().unwrap_or_default();
            out.push(dims.len() as u8);
            crate::primitive::write_address(dl.address, 8, &mut out);
            for d in dims {
                out.extend_from_slice(&d.to_le_bytes());
            }
        }
    }
    out
}

fn decode_group_info(data: &[u8]) -> Result<GroupInfo> {
    let (input, _version) = read_u8(data)?;
    let (input, flags) = read_u8(input)?;
    let input = if flags & 0x1 != 0 { &input[4..] } else { input };
    if flags & 0x2 != 0 {
        let (input, max_compact) = read_u16(input)?;
        let (_, max_dense) = read_u16(input)?;
        Ok(GroupInfo {
            max_compact_links: Some(max_compact),
            max_dense_links: Some(max_dense),
        })
    } else {
        Ok(GroupInfo {
            max_compact_links: None,
            max_dense_links: None,
        })
    }
}

fn encode_group_info(gi: &GroupInfo) -> Vec<u8> {
    let mut out = vec![0u8];
    match (gi.max_compact_links, gi.max_dense_links) {
        (Some(compact), Some(dense)) => {
            out.push(0x2);
            out.extend_from_slice(&compact.to_le_bytes());
            out.extend_from_slice(&dense.to_le_bytes());
        }
        _ => out.push(0),
    }
    out
}

fn decode_attribute(data: &[u8], message_size: u16) -> Result<AttributeMsg> {
    let (input, _version) = read_u8(data)?;
    let (input, _reserved) = read_u8(input)?;
    let (input, name_size) = read_u16(input)?;
    let (input, datatype_size) = read_u16(input)?;
    let (input, dataspace_size) = read_u16(input)?;

    let name = String::from_utf8_lossy(
        &input[..name_size as usize]
            .iter()
            .take_while(|b| **b != 0)
            .copied()
            .collect::<Vec<u8>>(),
    )
    .into_owned();
    let input = &input[pad8(name_size as usize)..];

    let datatype = Datatype::decode(input, datatype_size)?;
    let input = &input[pad8(datatype_size as usize)..];

    let dataspace = Dataspace::decode(input)?;
    let input = &input[pad8(dataspace_size as usize)..];

    let header_len = 8 + pad8(name_size as usize) + pad8(datatype_size as usize) + pad8(dataspace_size as usize);
    let data_len = (message_size as usize).saturating_sub(header_len);
    let data = input.get(..data_len).unwrap_or(input).to_vec();

    Ok(AttributeMsg {
        name,
        datatype,
        dataspace,
        data,
    })
}

fn encode_attribute(a: &AttributeMsg) -> Vec<u8> {
    let mut name_bytes = a.name.as_bytes().to_vec();
    name_bytes.push(0);
    let name_size = name_bytes.len();
    let datatype_bytes = a.datatype.encode();
    let dataspace_bytes = a.dataspace.encode();

    let mut out = vec![1u8, 0u8];
    out.extend_from_slice(&(name_size as u16).to_le_bytes());
    out.extend_from_slice(&(datatype_bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(&(dataspace_bytes.len() as u16).to_le_bytes());

    name_bytes.resize(pad8(name_size), 0);
    out.extend_from_slice(&name_bytes);

    let mut dt = datatype_bytes.clone();
    dt.resize(pad8(dt.len()), 0);
    out.extend_from_slice(&dt);

    let mut ds = dataspace_bytes.clone();
    ds.resize(pad8(ds.len()), 0);
    out.extend_from_slice(&ds);

    out.extend_from_slice(&a.data);
    out
}

fn decode_attribute_info(data: &[u8], offset_size: u8) -> Result<AttributeInfo> {
    let (input, _version) = read_u8(data)?;
    let (input, flags) = read_u8(input)?;
    let input = if flags & 0x1 != 0 { &input[2..] } else { input };
    let (input, fractal_heap_address) = read_address(input, offset_size)?;
    let (_, name_btree_address) = read_address(input, offset_size)?;
    Ok(AttributeInfo {
        fractal_heap_address,
        name_btree_address,
    })
}

fn encode_attribute_info(ai: &AttributeInfo, offset_size: u8) -> Vec<u8> {
    let mut out = vec![0u8, 0u8];
    crate::primitive::write_address(ai.fractal_heap_address, offset_size, &mut out);
    crate::primitive::write_address(ai.name_btree_address, offset_size, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataspace_message_roundtrip() {
        let msg = Message::Dataspace(Dataspace::new(vec![5]));
        let encoded = msg.encode(8);
        let decoded = Message::decode(TYPE_DATASPACE, encoded.len() as u16, &encoded, 8).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn unknown_message_preserves_raw_bytes() {
        let data = vec![1, 2, 3, 4];
        let decoded = Message::decode(0x9999, 4, &data, 8).unwrap();
        assert_eq!(decoded, Message::Unknown { msg_type: 0x9999, data: data.clone() });
        assert_eq!(decoded.encode(8), data);
    }

    #[test]
    fn contiguous_layout_roundtrip() {
        let dl = DataLayout {
            class: DataLayoutClass::Contiguous,
            address: Some(512),
            size: 128,
            chunk_dimensions: None,
            compact_data: None,
        };
        let encoded = encode_data_layout(&dl);
        let decoded = decode_data_layout(&encoded).unwrap();
        assert_eq!(decoded, dl);
    }

    #[test]
    fn symbol_table_message_roundtrip() {
        let msg = Message::SymbolTable(SymbolTableMsg {
            btree_address: 128,
            local_heap_address: 256,
        });
        let encoded = msg.encode(8);
        let decoded = Message::decode(TYPE_SYMBOL_TABLE, encoded.len() as u16, &encoded, 8).unwrap();
        assert_eq!(decoded, msg);
    }
}
