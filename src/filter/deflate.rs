//! Filter id 1: deflate (gzip-family), backed by `flate2`.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::Result;
use crate::filter::Filter;

pub struct Deflate {
    pub level: u32,
}

impl Filter for Deflate {
    fn id(&self) -> u16 {
        super::ID_DEFLATE
    }

    fn name(&self) -> &str {
        "deflate"
    }

    fn apply(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(self.level.clamp(1, 9)));
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }

    fn remove(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(data);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }

    fn encode_params(&self) -> (u16, Vec<u32>) {
        (0, vec![self.level])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deflate_roundtrip() {
        let filter = Deflate { level: 6 };
        let data = b"the quick brown fox jumps over the lazy dog".repeat(4);
        let compressed = filter.apply(&data).unwrap();
        assert!(compressed.len() < data.len());
        let restored = filter.remove(&compressed).unwrap();
        assert_eq!(restored, data);
    }
}
