//! Filter id 3: Fletcher-32 checksum. Appends a 4-byte trailer on `apply`;
//! `remove` verifies and strips it, failing with `ChecksumMismatch` on any
//! corruption (spec.md §8 property 7).

use crate::checksum::fletcher32;
use crate::error::{Error, Result};
use crate::filter::Filter;

pub struct Fletcher32Filter;

impl Filter for Fletcher32Filter {
    fn id(&self) -> u16 {
        super::ID_FLETCHER32
    }

    fn name(&self) -> &str {
        "fletcher32"
    }

    fn apply(&self, data: &[u8]) -> Result<Vec<u8>> {
        let checksum = fletcher32(data);
        let mut out = data.to_vec();
        out.extend_from_slice(&checksum.to_le_bytes());
        Ok(out)
    }

    fn remove(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < 4 {
            return Err(Error::TruncatedInput {
                context: "fletcher32 trailer",
                need: 4,
                had: data.len(),
            });
        }
        let (payload, trailer) = data.split_at(data.len() - 4);
        let stored = u32::from_le_bytes(trailer.try_into().unwrap());
        let computed = fletcher32(payload);
        if stored != computed {
            return Err(Error::ChecksumMismatch {
                kind: "fletcher32",
                stored,
                computed,
            });
        }
        Ok(payload.to_vec())
    }

    fn encode_params(&self) -> (u16, Vec<u32>) {
        (0, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_trailer_matching_spec_vector() {
        let filter = Fletcher32Filter;
        let out = filter.apply(&[0x01, 0x02, 0x03, 0x04]).unwrap();
        assert_eq!(out.len(), 8);
        let trailer = u32::from_le_bytes(out[4..].try_into().unwrap());
        assert_eq!(trailer, fletcher32(&[0x01, 0x02, 0x03, 0x04]));
    }

    #[test]
    fn corruption_fails_checksum() {
        let filter = Fletcher32Filter;
        let mut out = filter.apply(&[0x01, 0x02, 0x03, 0x04]).unwrap();
        out[0] ^= 0xff;
        assert!(matches!(
            filter.remove(&out),
            Err(Error::ChecksumMismatch { .. })
        ));
    }
}
