//! Filter id 307: bzip2. Decode only, via the platform `bzip2` library
//! binding (spec.md §4.6: "decode supported via platform library; encode
//! unimplemented"). `apply` always reports the unimplemented-encoder error;
//! `remove` streams through `bzip2::read::BzDecoder` and reports a
//! `ChecksumMismatch`-free `UnsupportedFilter`-shaped I/O error on a
//! corrupt stream rather than panicking.

use std::io::Read;

use bzip2::read::BzDecoder;

use crate::error::{Error, Result};
use crate::filter::Filter;

pub struct Bzip2;

impl Filter for Bzip2 {
    fn id(&self) -> u16 {
        super::ID_BZIP2
    }

    fn name(&self) -> &str {
        "bzip2"
    }

    fn apply(&self, _data: &[u8]) -> Result<Vec<u8>> {
        Err(Error::UnsupportedFilter {
            id: super::ID_BZIP2,
            name: "bzip2 (encoder not implemented; write with deflate instead)".to_string(),
        })
    }

    fn remove(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = BzDecoder::new(data);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }

    fn encode_params(&self) -> (u16, Vec<u32>) {
        (0, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn decodes_a_stream_produced_by_the_platform_encoder() {
        let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::best());
        encoder.write_all(b"hello bzip2 world").unwrap();
        let compressed = encoder.finish().unwrap();

        let decoded = Bzip2.remove(&compressed).unwrap();
        assert_eq!(decoded, b"hello bzip2 world");
    }

    #[test]
    fn encode_is_unimplemented() {
        let err = Bzip2.apply(b"data").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFilter { .. }));
    }
}
