//! Filter id 4: SZIP. Neither direction is implemented — SZIP's patent
//! history made it a "stub that fails" in the reference implementation this
//! engine is modeled on, and it stays that way here (spec.md §4.6).

use crate::error::{Error, Result};
use crate::filter::Filter;

pub struct Szip;

impl Filter for Szip {
    fn id(&self) -> u16 {
        super::ID_SZIP
    }

    fn name(&self) -> &str {
        "szip"
    }

    fn apply(&self, _data: &[u8]) -> Result<Vec<u8>> {
        Err(unsupported())
    }

    fn remove(&self, _data: &[u8]) -> Result<Vec<u8>> {
        Err(unsupported())
    }

    fn encode_params(&self) -> (u16, Vec<u32>) {
        (0, Vec::new())
    }
}

fn unsupported() -> Error {
    Error::UnsupportedFilter {
        id: super::ID_SZIP,
        name: "szip (not implemented; consider re-encoding with deflate)".to_string(),
    }
}
