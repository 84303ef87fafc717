//! End-to-end dataset round trips through a real backing file: superblock +
//! object header + dataset engine, exercising all three storage layouts.

use hdf5_engine::alloc::Allocator;
use hdf5_engine::dataset::{DatasetEngine, DatasetPlan};
use hdf5_engine::datatype::Datatype;
use hdf5_engine::filter::{FilterSpec, Pipeline};
use hdf5_engine::io::FileIo;
use hdf5_engine::superblock::Superblock;
use quickcheck::{quickcheck, TestResult};
use tempfile::NamedTempFile;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn new_file() -> (FileIo, Allocator) {
    init();
    let tmp = NamedTempFile::new().unwrap();
    let mut io = FileIo::from_file(tmp.reopen().unwrap()).unwrap();
    let offset_size = 8;
    let start = Superblock::current_len(offset_size);
    let mut alloc = Allocator::new(start);

    let sb = Superblock {
        version: 3,
        offset_size,
        length_size: 8,
        file_consistency_flags: 0,
        base_address: 0,
        superblock_extension_address: None,
        end_of_file_address: start,
        root_group_object_header_address: None,
        root_group_symbol_table: None,
    };
    io.write_at(0, &sb.encode()).unwrap();
    (io, alloc)
}

#[test]
fn small_vector_lands_as_contiguous_and_roundtrips_through_a_real_file() {
    // spec.md §8 scenario 1: `/data` shape [5] float64 is written with
    // contiguous layout, not compact, even though it fits well under the
    // compact size limit.
    let (mut io, mut alloc) = new_file();
    let data: Vec<u8> = (0..40u8).collect();
    let plan = DatasetPlan::contiguous(vec![5], Datatype::f64());

    let addr = DatasetEngine::write(&mut io, &mut alloc, 8, &plan, &data).unwrap();
    let (dims, dtype, bytes) = DatasetEngine::read(&io, addr, 8).unwrap();

    assert_eq!(dims, vec![5]);
    assert_eq!(dtype, Datatype::f64());
    assert_eq!(bytes, data);
}

#[test]
fn large_matrix_round_trips_with_deflate_and_checksums() {
    let (mut io, mut alloc) = new_file();
    let rows = 64u64;
    let cols = 64u64;
    let elem = Datatype::f64();
    let data: Vec<u8> = (0..rows * cols * elem.size as u64).map(|i| (i % 251) as u8).collect();

    let pipeline = Pipeline::new(vec![
        FilterSpec::Shuffle { element_size: elem.size },
        FilterSpec::Deflate { level: 6 },
        FilterSpec::Fletcher32,
    ]);
    let plan = DatasetPlan::chunked(vec![rows, cols], elem.clone(), vec![16, 16], pipeline);

    let addr = DatasetEngine::write(&mut io, &mut alloc, 8, &plan, &data).unwrap();
    let (dims, dtype, bytes) = DatasetEngine::read(&io, addr, 8).unwrap();

    assert_eq!(dims, vec![rows, cols]);
    assert_eq!(dtype, elem);
    assert_eq!(bytes, data);
}

#[test]
fn writing_wrong_amount_of_data_is_rejected() {
    let (mut io, mut alloc) = new_file();
    let plan = DatasetPlan::contiguous(vec![10], Datatype::i32());
    let data = vec![0u8; 4]; // should be 40 bytes
    assert!(DatasetEngine::write(&mut io, &mut alloc, 8, &plan, &data).is_err());
}

quickcheck! {
    /// Any 2-D dataset with any chunk shape that evenly or unevenly tiles it
    /// round-trips byte for byte, including the ragged edge chunks.
    fn chunked_2d_roundtrips_for_arbitrary_shapes(
        rows: u8,
        cols: u8,
        chunk_rows: u8,
        chunk_cols: u8
    ) -> TestResult {
        let rows = rows as u64 % 40 + 1;
        let cols = cols as u64 % 40 + 1;
        let chunk_rows = chunk_rows as u64 % 40 + 1;
        let chunk_cols = chunk_cols as u64 % 40 + 1;

        let (mut io, mut alloc) = new_file();
        let elem = Datatype::u8();
        let data: Vec<u8> = (0..rows * cols).map(|i| (i % 256) as u8).collect();
        let plan = DatasetPlan::chunked(
            vec![rows, cols],
            elem,
            vec![chunk_rows, chunk_cols],
            Pipeline::default(),
        );

        let addr = match DatasetEngine::write(&mut io, &mut alloc, 8, &plan, &data) {
            Ok(addr) => addr,
            Err(_) => return TestResult::discard(),
        };
        let (_, _, bytes) = DatasetEngine::read(&io, addr, 8).unwrap();
        TestResult::from_bool(bytes == data)
    }
}
