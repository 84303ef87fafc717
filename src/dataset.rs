//! Dataset engine: reads and writes compact, contiguous, and chunked
//! datasets given a datatype, dataspace, and (for chunked layouts) a filter
//! pipeline (spec.md §3 "Data Layout", §4.8).
//!
//! Layout choice is one-way (spec.md §4.10 "Dataset layout" state machine):
//! once a dataset is written as compact, contiguous, or chunked, this
//! engine never migrates it to a different layout.

use log::debug;

use crate::alloc::Allocator;
use crate::btree::v1::ChunkBTree;
use crate::chunk::ChunkCoordinator;
use crate::datatype::{Datatype, Dataspace};
use crate::error::{Error, Result};
use crate::filter::Pipeline;
use crate::io::FileIo;
use crate::object_header::message::{DataLayout, DataLayoutClass, FillValue};
use crate::object_header::{Message, ObjectHeader};

/// Datasets at or below this many bytes are embedded directly in the
/// object header rather than given a separate storage block (spec.md §3
/// "Compact: raw bytes embedded... (size ≤ 64 KiB)").
pub const COMPACT_SIZE_LIMIT: u64 = 64 * 1024;

/// A dataset's shape, datatype, and (already row-major, uncompressed) bytes,
/// as returned by [`DatasetEngine::read`] and accepted by
/// [`DatasetEngine::write`].
///
/// `compact` only has an effect when no chunk dimensions or filters are set;
/// it requests the inline-in-object-header layout rather than the default
/// contiguous one (spec.md §3 "Compact: raw bytes embedded... (size ≤ 64
/// KiB)" is an opt-in layout, not an automatic override of contiguous).
#[derive(Debug, Clone)]
pub struct DatasetPlan {
    pub dimensions: Vec<u64>,
    pub datatype: Datatype,
    pub chunk_dimensions: Option<Vec<u64>>,
    pub pipeline: Pipeline,
    pub compact: bool,
}

impl DatasetPlan {
    pub fn contiguous(dimensions: Vec<u64>, datatype: Datatype) -> Self {
        DatasetPlan {
            dimensions,
            datatype,
            chunk_dimensions: None,
            pipeline: Pipeline::default(),
            compact: false,
        }
    }

    /// Requests the compact (inline-in-object-header) layout. Rejected at
    /// write time if the data doesn't fit under [`COMPACT_SIZE_LIMIT`].
    pub fn compact(dimensions: Vec<u64>, datatype: Datatype) -> Self {
        DatasetPlan {
            dimensions,
            datatype,
            chunk_dimensions: None,
            pipeline: Pipeline::default(),
            compact: true,
        }
    }

    pub fn chunked(dimensions: Vec<u64>, datatype: Datatype, chunk_dimensions: Vec<u64>, pipeline: Pipeline) -> Self {
        DatasetPlan {
            dimensions,
            datatype,
            chunk_dimensions: Some(chunk_dimensions),
            pipeline,
            compact: false,
        }
    }

    /// A rank-0 (scalar) dataspace holds exactly one element; otherwise
    /// the usual product of dimensions (zero on any zero-sized axis).
    fn element_count(&self) -> u64 {
        if self.dimensions.is_empty() {
            1
        } else {
            self.dimensions.iter().product()
        }
    }

    fn total_bytes(&self) -> u64 {
        self.element_count() * self.datatype.size as u64
    }
}

pub struct DatasetEngine;

impl DatasetEngine {
    /// Writes `data` (row-major, uncompressed, `total_bytes()` long) using
    /// the layout spec.md §4.8 describes: chunked if chunk dimensions or a
    /// filter pipeline were requested; otherwise compact only if the plan
    /// explicitly asked for it (and the data fits under
    /// [`COMPACT_SIZE_LIMIT`]); contiguous by default. Returns the address
    /// of the written object header.
    pub fn write(
        io: &mut FileIo,
        alloc: &mut Allocator,
        offset_size: u8,
        plan: &DatasetPlan,
        data: &[u8],
    ) -> Result<u64> {
        let total_bytes = plan.total_bytes();
        if data.len() as u64 != total_bytes {
            return Err(Error::InvariantViolation(format!(
                "dataset data is {} bytes, expected {total_bytes} for dimensions {:?} and element size {}",
                data.len(),
                plan.dimensions,
                plan.datatype.size
            )));
        }

        let wants_chunking = plan.chunk_dimensions.is_some() || !plan.pipeline.is_empty();
        if plan.compact && wants_chunking {
            return Err(Error::InvariantViolation(
                "dataset plan requests both compact and chunked/filtered layout".into(),
            ));
        }

        let layout = if wants_chunking {
            Self::write_chunked(io, alloc, offset_size, plan, data)?
        } else if plan.compact {
            if total_bytes > COMPACT_SIZE_LIMIT {
                return Err(Error::CapacityExceeded { resource: "compact dataset" });
            }
            Self::write_compact(data)
        } else {
            Self::write_contiguous(io, alloc, data)?
        };

        let mut messages = vec![
            Message::Dataspace(Dataspace::new(plan.dimensions.clone())),
            Message::Datatype(plan.datatype.clone()),
            Message::DataLayout(layout),
        ];
        if !plan.pipeline.is_empty() {
            messages.push(Message::FilterPipeline(plan.pipeline.clone()));
        }
        messages.push(Message::FillValue(FillValue {
            defined: true,
            value: vec![0u8; plan.datatype.size as usize],
        }));

        let header = ObjectHeader::new(messages);
        let address = header.write(io, alloc, offset_size)?;
        debug!(
            "dataset write: dims={:?} total_bytes={total_bytes} header at {address:#x}",
            plan.dimensions
        );
        Ok(address)
    }

    fn write_compact(data: &[u8]) -> DataLayout {
        DataLayout {
            class: DataLayoutClass::Compact,
            address: None,
            size: data.len() as u64,
            chunk_dimensions: None,
            compact_data: Some(data.to_vec()),
        }
    }

    fn write_contiguous(io: &mut FileIo, alloc: &mut Allocator, data: &[u8]) -> Result<DataLayout> {
        let address = if data.is_empty() {
            None
        } else {
            let addr = alloc.allocate(data.len() as u64)?;
            io.write_at(addr, data)?;
            Some(addr)
        };
        Ok(DataLayout {
            class: DataLayoutClass::Contiguous,
            address,
            size: data.len() as u64,
            chunk_dimensions: None,
            compact_data: None,
        })
    }

    fn write_chunked(
        io: &mut FileIo,
        alloc: &mut Allocator,
        offset_size: u8,
        plan: &DatasetPlan,
        data: &[u8],
    ) -> Result<DataLayout> {
        let chunk_dims = plan
            .chunk_dimensions
            .clone()
            .ok_or_else(|| Error::InvariantViolation("chunked write requested without chunk dimensions".into()))?;
        let elem_size = plan.datatype.size as usize;
        let coordinator = ChunkCoordinator::new(plan.dimensions.clone(), chunk_dims.clone())?;
        let rank = plan.dimensions.len();

        let mut btree = ChunkBTree::new();
        for i in 0..coordinator.total_chunks() {
            let coord = coordinator.linear_to_coord(i);
            let raw_chunk = coordinator.extract_chunk(data, &coord, elem_size);
            let stored = if plan.pipeline.is_empty() {
                raw_chunk
            } else {
                plan.pipeline.apply(&raw_chunk)?
            };
            let address = alloc.allocate(stored.len() as u64)?;
            io.write_at(address, &stored)?;

            let mut key = coord;
            key.push(0); // trailing coordinate is always 0, spec.md §3
            btree.insert(key, address, stored.len() as u32, 0);
        }

        let btree_address = btree.write(io, alloc, offset_size, rank + 1)?;
        let mut chunk_dimensions: Vec<u32> = chunk_dims.iter().map(|d| *d as u32).collect();
        chunk_dimensions.push(elem_size as u32);

        Ok(DataLayout {
            class: DataLayoutClass::Chunked,
            address: Some(btree_address),
            size: 0,
            chunk_dimensions: Some(chunk_dimensions),
            compact_data: None,
        })
    }

    /// Reads the dataset rooted at `address` back into a row-major byte
    /// buffer, inverting whatever layout it was written with.
    pub fn read(io: &FileIo, address: u64, offset_size: u8) -> Result<(Vec<u64>, Datatype, Vec<u8>)> {
        let header = ObjectHeader::decode(io, address, offset_size)?;

        let mut dataspace = None;
        let mut datatype = None;
        let mut layout = None;
        let mut pipeline = Pipeline::default();
        for message in &header.messages {
            match message {
                Message::Dataspace(d) => dataspace = Some(d.clone()),
                Message::Datatype(d) => datatype = Some(d.clone()),
                Message::DataLayout(l) => layout = Some(l.clone()),
                Message::FilterPipeline(p) => pipeline = p.clone(),
                _ => {}
            }
        }

        let dataspace = dataspace.ok_or_else(|| Error::InvariantViolation("dataset object header has no Dataspace message".into()))?;
        let datatype = datatype.ok_or_else(|| Error::InvariantViolation("dataset object header has no Datatype message".into()))?;
        let layout = layout.ok_or_else(|| Error::InvariantViolation("dataset object header has no Data Layout message".into()))?;

        let data = match layout.class {
            DataLayoutClass::Compact => layout.compact_data.clone().unwrap_or_default(),
            DataLayoutClass::Contiguous => match layout.address {
                Some(addr) => io.read_at(addr, layout.size)?,
                None => Vec::new(),
            },
            DataLayoutClass::Chunked => {
                Self::read_chunked(io, offset_size, &dataspace, &datatype, &layout, &pipeline)?
            }
        };

        Ok((dataspace.dimensions, datatype, data))
    }

    fn read_chunked(
        io: &FileIo,
        offset_size: u8,
        dataspace: &Dataspace,
        datatype: &Datatype,
        layout: &DataLayout,
        pipeline: &Pipeline,
    ) -> Result<Vec<u8>> {
        let btree_address = layout
            .address
            .ok_or_else(|| Error::InvariantViolation("chunked layout message has no B-tree address".into()))?;
        let chunk_dims_with_elem = layout
            .chunk_dimensions
            .clone()
            .ok_or_else(|| Error::InvariantViolation("chunked layout message has no chunk dimensions".into()))?;
        let rank = dataspace.rank();
        let chunk_dims: Vec<u64> = chunk_dims_with_elem[..rank].iter().map(|d| *d as u64).collect();
        let elem_size = datatype.size as usize;

        let coordinator = ChunkCoordinator::new(dataspace.dimensions.clone(), chunk_dims)?;
        let btree = ChunkBTree::decode(io, btree_address, offset_size, rank + 1)?;

        let element_count: u64 = dataspace.dimensions.iter().product();
        let mut buf = vec![0u8; element_count as usize * elem_size];
        for i in 0..coordinator.total_chunks() {
            let coord = coordinator.linear_to_coord(i);
            let mut key = coord.clone();
            key.push(0);
            let (addr, size, _filter_mask) = btree.lookup(&key)?;
            let stored = io.read_at(addr, size as u64)?;
            let raw_chunk = if pipeline.is_empty() { stored } else { pipeline.remove(&stored)? };
            coordinator.place_chunk(&mut buf, &raw_chunk, &coord, elem_size);
        }
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterSpec;
    use tempfile::NamedTempFile;

    fn new_io() -> (FileIo, Allocator) {
        let tmp = NamedTempFile::new().unwrap();
        (FileIo::from_file(tmp.reopen().unwrap()).unwrap(), Allocator::new(0))
    }

    fn f64_bytes(values: &[f64]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn simple_float64_dataset_roundtrips() {
        let (mut io, mut alloc) = new_io();
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let plan = DatasetPlan::contiguous(vec![5], Datatype::f64());
        let addr = DatasetEngine::write(&mut io, &mut alloc, 8, &plan, &f64_bytes(&values)).unwrap();

        let (dims, dtype, data) = DatasetEngine::read(&io, addr, 8).unwrap();
        assert_eq!(dims, vec![5]);
        assert_eq!(dtype.size, 8);
        assert_eq!(data, f64_bytes(&values));
    }

    #[test]
    fn large_dataset_chooses_contiguous_layout() {
        let (mut io, mut alloc) = new_io();
        let values: Vec<f64> = (0..10_000).map(|v| v as f64).collect();
        let plan = DatasetPlan::contiguous(vec![10_000], Datatype::f64());
        let bytes = f64_bytes(&values);
        assert!(bytes.len() as u64 > COMPACT_SIZE_LIMIT);
        let addr = DatasetEngine::write(&mut io, &mut alloc, 8, &plan, &bytes).unwrap();

        let header = ObjectHeader::decode(&io, addr, 8).unwrap();
        let has_contiguous = header.messages.iter().any(|m| {
            matches!(m, Message::DataLayout(l) if l.class == DataLayoutClass::Contiguous)
        });
        assert!(has_contiguous);

        let (dims, _dtype, data) = DatasetEngine::read(&io, addr, 8).unwrap();
        assert_eq!(dims, vec![10_000]);
        assert_eq!(data, bytes);
    }

    #[test]
    fn matrix_2d_roundtrips_row_major() {
        let (mut io, mut alloc) = new_io();
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let plan = DatasetPlan::contiguous(vec![2, 3], Datatype::f64());
        let addr = DatasetEngine::write(&mut io, &mut alloc, 8, &plan, &f64_bytes(&values)).unwrap();

        let (dims, _dtype, data) = DatasetEngine::read(&io, addr, 8).unwrap();
        assert_eq!(dims, vec![2, 3]);
        assert_eq!(data, f64_bytes(&values));
    }

    #[test]
    fn tiny_dataset_defaults_to_contiguous_layout() {
        // Matches the reference library: a small dataset written with the
        // default (non-compact) plan stays contiguous, not compact.
        let (mut io, mut alloc) = new_io();
        let values = [1.0f64, 2.0];
        let plan = DatasetPlan::contiguous(vec![2], Datatype::f64());
        let addr = DatasetEngine::write(&mut io, &mut alloc, 8, &plan, &f64_bytes(&values)).unwrap();

        let header = ObjectHeader::decode(&io, addr, 8).unwrap();
        let has_contiguous = header.messages.iter().any(|m| {
            matches!(m, Message::DataLayout(l) if l.class == DataLayoutClass::Contiguous)
        });
        assert!(has_contiguous);

        let (_, _, data) = DatasetEngine::read(&io, addr, 8).unwrap();
        assert_eq!(data, f64_bytes(&values));
    }

    #[test]
    fn compact_dataset_requires_explicit_opt_in() {
        let (mut io, mut alloc) = new_io();
        let values = [1.0f64, 2.0];
        let plan = DatasetPlan::compact(vec![2], Datatype::f64());
        let addr = DatasetEngine::write(&mut io, &mut alloc, 8, &plan, &f64_bytes(&values)).unwrap();

        let header = ObjectHeader::decode(&io, addr, 8).unwrap();
        let has_compact = header.messages.iter().any(|m| {
            matches!(m, Message::DataLayout(l) if l.class == DataLayoutClass::Compact)
        });
        assert!(has_compact);

        let (_, _, data) = DatasetEngine::read(&io, addr, 8).unwrap();
        assert_eq!(data, f64_bytes(&values));
    }

    #[test]
    fn oversized_compact_request_is_rejected() {
        let (mut io, mut alloc) = new_io();
        let values: Vec<f64> = (0..10_000).map(|v| v as f64).collect();
        let plan = DatasetPlan::compact(vec![10_000], Datatype::f64());
        let bytes = f64_bytes(&values);
        assert!(bytes.len() as u64 > COMPACT_SIZE_LIMIT);
        let err = DatasetEngine::write(&mut io, &mut alloc, 8, &plan, &bytes).unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded { resource: "compact dataset" }));
    }

    #[test]
    fn chunked_dataset_with_filters_roundtrips() {
        let (mut io, mut alloc) = new_io();
        let values: Vec<f64> = (0..36).map(|v| v as f64).collect();
        let pipeline = Pipeline::new(vec![
            FilterSpec::Shuffle { element_size: 8 },
            FilterSpec::Deflate { level: 6 },
            FilterSpec::Fletcher32,
        ]);
        let plan = DatasetPlan::chunked(vec![6, 6], Datatype::f64(), vec![4, 4], pipeline);
        let addr = DatasetEngine::write(&mut io, &mut alloc, 8, &plan, &f64_bytes(&values)).unwrap();

        let header = ObjectHeader::decode(&io, addr, 8).unwrap();
        let has_chunked = header.messages.iter().any(|m| {
            matches!(m, Message::DataLayout(l) if l.class == DataLayoutClass::Chunked)
        });
        assert!(has_chunked);

        let (dims, _dtype, data) = DatasetEngine::read(&io, addr, 8).unwrap();
        assert_eq!(dims, vec![6, 6]);
        assert_eq!(data, f64_bytes(&values));
    }

    #[test]
    fn edge_chunks_round_trip_partial_shapes() {
        let (mut io, mut alloc) = new_io();
        let values: Vec<f64> = (0..25).map(|v| v as f64).collect();
        let plan = DatasetPlan::chunked(vec![5, 5], Datatype::f64(), vec![2, 2], Pipeline::default());
        let addr = DatasetEngine::write(&mut io, &mut alloc, 8, &plan, &f64_bytes(&values)).unwrap();

        let (_, _, data) = DatasetEngine::read(&io, addr, 8).unwrap();
        assert_eq!(data, f64_bytes(&values));
    }

    #[test]
    fn scalar_dataset_roundtrips() {
        let (mut io, mut alloc) = new_io();
        let plan = DatasetPlan::contiguous(vec![], Datatype::f64());
        let addr = DatasetEngine::write(&mut io, &mut alloc, 8, &plan, &42.0f64.to_le_bytes()).unwrap();

        let (dims, _dtype, data) = DatasetEngine::read(&io, addr, 8).unwrap();
        assert!(dims.is_empty());
        assert_eq!(data, 42.0f64.to_le_bytes());
    }

    #[test]
    fn mismatched_data_length_is_rejected() {
        let (mut io, mut alloc) = new_io();
        let plan = DatasetPlan::contiguous(vec![5], Datatype::f64());
        let err = DatasetEngine::write(&mut io, &mut alloc, 8, &plan, &[0u8; 4]).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
    }
}
