//! Chunk coordinator: maps N-D dataset indices to chunk coordinates and
//! extracts/places chunk-shaped subarrays from/into a row-major buffer
//! (spec.md §4.7).

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ChunkCoordinator {
    dimensions: Vec<u64>,
    chunk_dimensions: Vec<u64>,
    num_chunks_per_dim: Vec<u64>,
}

impl ChunkCoordinator {
    pub fn new(dimensions: Vec<u64>, chunk_dimensions: Vec<u64>) -> Result<Self> {
        if dimensions.len() != chunk_dimensions.len() {
            return Err(Error::InvariantViolation(format!(
                "rank mismatch: dataset has {} dims, chunk has {}",
                dimensions.len(),
                chunk_dimensions.len()
            )));
        }
        if dimensions.iter().any(|d| *d == 0) || chunk_dimensions.iter().any(|d| *d == 0) {
            return Err(Error::InvariantViolation(
                "dataset and chunk dimensions must be non-zero".into(),
            ));
        }
        let num_chunks_per_dim = dimensions
            .iter()
            .zip(&chunk_dimensions)
            .map(|(d, c)| d.div_ceil(*c))
            .collect();
        Ok(ChunkCoordinator {
            dimensions,
            chunk_dimensions,
            num_chunks_per_dim,
        })
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    pub fn num_chunks_per_dim(&self) -> &[u64] {
        &self.num_chunks_per_dim
    }

    pub fn total_chunks(&self) -> u64 {
        self.num_chunks_per_dim.iter().product()
    }

    /// Row-major: the rightmost axis varies fastest.
    pub fn linear_to_coord(&self, mut index: u64) -> Vec<u64> {
        let mut coord = vec![0u64; self.rank()];
        for axis in (0..self.rank()).rev() {
            let n = self.num_chunks_per_dim[axis];
            coord[axis] = index % n;
            index /= n;
        }
        coord
    }

    /// Clamps to the dataset edge, producing a partial chunk shape there.
    pub fn chunk_shape(&self, coord: &[u64]) -> Vec<u64> {
        (0..self.rank())
            .map(|axis| {
                let start = coord[axis] * self.chunk_dimensions[axis];
                let remaining = self.dimensions[axis] - start;
                remaining.min(self.chunk_dimensions[axis])
            })
            .collect()
    }

    /// Gathers the chunk at `coord` out of `dataset_buf` (row-major, full
    /// dataset extent), into a contiguous chunk-shaped buffer.
    pub fn extract_chunk(&self, dataset_buf: &[u8], coord: &[u64], elem_size: usize) -> Vec<u8> {
        let shape = self.chunk_shape(coord);
        let starts: Vec<u64> = (0..self.rank())
            .map(|axis| coord[axis] * self.chunk_dimensions[axis])
            .collect();
        let total: u64 = shape.iter().product::<u64>().max(if self.rank() == 0 { 1 } else { 0 });
        let mut out = vec![0u8; (total as usize) * elem_size];
        self.walk(&shape, &mut |linear_in_chunk, multi_index| {
            let mut dataset_index = 0u64;
            let mut stride = 1u64;
            for axis in (0..self.rank()).rev() {
                dataset_index += (starts[axis] + multi_index[axis]) * stride;
                stride *= self.dimensions[axis];
            }
            let src = dataset_index as usize * elem_size;
            let dst = linear_in_chunk * elem_size;
            out[dst..dst + elem_size].copy_from_slice(&dataset_buf[src..src + elem_size]);
        });
        out
    }

    /// Inverse of [`extract_chunk`]: scatters `chunk_buf` into `dataset_buf`.
    pub fn place_chunk(&self, dataset_buf: &mut [u8], chunk_buf: &[u8], coord: &[u64], elem_size: usize) {
        let shape = self.chunk_shape(coord);
        let starts: Vec<u64> = (0..self.rank())
            .map(|axis| coord[axis] * self.chunk_dimensions[axis])
            .collect();
        self.walk(&shape, &mut |linear_in_chunk, multi_index| {
            let mut dataset_index = 0u64;
            let mut stride = 1u64;
            for axis in (0..self.rank()).rev() {
                dataset_index += (starts[axis] + multi_index[axis]) * stride;
                stride *= self.dimensions[axis];
            }
            let dst = dataset_index as usize * elem_size;
            let src = linear_in_chunk * elem_size;
            dataset_buf[dst..dst + elem_size].copy_from_slice(&chunk_buf[src..src + elem_size]);
        });
    }

    /// Row-major walk over a shape, invoking `f(linear_index, multi_index)`
    /// for every element. Shared by extract/place so the traversal order is
    /// defined exactly once.
    fn walk(&self, shape: &[u64], f: &mut impl FnMut(usize, &[u64])) {
        if shape.is_empty() {
            f(0, &[]);
            return;
        }
        let mut multi_index = vec![0u64; shape.len()];
        let total: u64 = shape.iter().product();
        for linear in 0..total {
            let mut rem = linear;
            for axis in (0..shape.len()).rev() {
                multi_index[axis] = rem % shape[axis];
                rem /= shape[axis];
            }
            f(linear as usize, &multi_index);
        }
    }
}
