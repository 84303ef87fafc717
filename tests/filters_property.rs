//! Property tests for the filter pipeline's invertibility and the shuffle
//! filter's byte permutation, independent of the dataset/chunk layer above.

use hdf5_engine::filter::{FilterSpec, Pipeline};
use quickcheck::{quickcheck, TestResult};

quickcheck! {
    /// `remove(apply(data))` is the identity for any pipeline made of the
    /// filters this build implements, for any input length.
    fn deflate_shuffle_fletcher32_pipeline_is_invertible(data: Vec<u8>, element_size: u8) -> TestResult {
        let element_size = (element_size as u32 % 8) + 1;
        if data.len() % element_size as usize != 0 {
            return TestResult::discard();
        }
        let pipeline = Pipeline::new(vec![
            FilterSpec::Shuffle { element_size },
            FilterSpec::Deflate { level: 6 },
            FilterSpec::Fletcher32,
        ]);
        let applied = match pipeline.apply(&data) {
            Ok(bytes) => bytes,
            Err(_) => return TestResult::discard(),
        };
        let restored = pipeline.remove(&applied).unwrap();
        TestResult::from_bool(restored == data)
    }

    /// Shuffle followed by its own inverse is the identity regardless of
    /// how the byte count divides (or fails to divide) the element size.
    fn shuffle_alone_is_invertible(data: Vec<u8>, element_size: u8) -> TestResult {
        let element_size = (element_size as u32 % 16) + 1;
        let pipeline = Pipeline::new(vec![FilterSpec::Shuffle { element_size }]);
        let applied = match pipeline.apply(&data) {
            Ok(bytes) => bytes,
            Err(_) => return TestResult::discard(),
        };
        let restored = pipeline.remove(&applied).unwrap();
        TestResult::from_bool(restored == data)
    }

    /// LZF round-trips arbitrary byte strings on its own, as a single-stage
    /// pipeline.
    fn lzf_is_invertible(data: Vec<u8>) -> TestResult {
        let pipeline = Pipeline::new(vec![FilterSpec::Lzf]);
        let applied = match pipeline.apply(&data) {
            Ok(bytes) => bytes,
            Err(_) => return TestResult::discard(),
        };
        let restored = pipeline.remove(&applied).unwrap();
        TestResult::from_bool(restored == data)
    }
}

#[test]
fn unknown_filter_round_trips_through_the_message_without_executing() {
    let pipeline = Pipeline::new(vec![FilterSpec::Unknown {
        id: 99,
        name: "proprietary".to_string(),
        cd_values: vec![1, 2, 3],
    }]);
    let encoded = pipeline.encode();
    let decoded = Pipeline::decode(&encoded).unwrap();
    assert_eq!(decoded, pipeline);
    assert!(pipeline.apply(&[1, 2, 3]).is_err());
}

#[test]
fn bzip2_decodes_data_produced_outside_this_engine_but_never_encodes() {
    use std::io::Write;
    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::best());
    encoder.write_all(b"round trip me through bzip2").unwrap();
    let compressed = encoder.finish().unwrap();

    let pipeline = Pipeline::new(vec![FilterSpec::Bzip2]);
    let restored = pipeline.remove(&compressed).unwrap();
    assert_eq!(restored, b"round trip me through bzip2");
    assert!(pipeline.apply(b"anything").is_err());
}
