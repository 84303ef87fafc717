//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the engine returns [`Result<T>`], an alias over
//! this single [`Error`] enum. Variants correspond 1:1 to the error kinds the
//! format itself can surface; there is no generic "parse failed" bucket so
//! that callers can match on the specific structural problem.

use thiserror::Error;

/// The result type returned by every fallible operation in this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not an HDF5 file: missing or corrupt 8-byte signature")]
    InvalidMagic,

    #[error("unsupported {kind} version {version}")]
    UnsupportedVersion { kind: &'static str, version: u8 },

    #[error("truncated input while reading {context}: need {need} bytes, had {had}")]
    TruncatedInput {
        context: &'static str,
        need: usize,
        had: usize,
    },

    #[error("address {0:#x} is undefined or out of range")]
    AddressOutOfRange(u64),

    #[error("{kind} checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        kind: &'static str,
        stored: u32,
        computed: u32,
    },

    #[error("structural invariant violated: {0}")]
    InvariantViolation(String),

    #[error("filter {id} ({name}) is not supported by this build")]
    UnsupportedFilter { id: u16, name: String },

    #[error("datatype class {class} is not supported ({detail})")]
    UnsupportedDatatype { class: &'static str, detail: String },

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} already exists: {key}")]
    Duplicate { kind: &'static str, key: String },

    #[error("I/O error during {context}: {cause}")]
    IoError {
        context: &'static str,
        #[source]
        cause: std::io::Error,
    },

    #[error("{resource} capacity exceeded")]
    CapacityExceeded { resource: &'static str },

    #[error("allocation of zero bytes is not permitted")]
    ZeroSizeAllocation,
}

impl From<std::io::Error> for Error {
    fn from(cause: std::io::Error) -> Self {
        Error::IoError {
            context: "byte i/o",
            cause,
        }
    }
}

impl<'a> From<nom::Err<nom::error::VerboseError<&'a [u8]>>> for Error {
    fn from(e: nom::Err<nom::error::VerboseError<&'a [u8]>>) -> Self {
        match e {
            nom::Err::Incomplete(nom::Needed::Size(n)) => Error::TruncatedInput {
                context: "nom parser",
                need: n.get(),
                had: 0,
            },
            nom::Err::Incomplete(nom::Needed::Unknown) => Error::TruncatedInput {
                context: "nom parser",
                need: 0,
                had: 0,
            },
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                Error::InvariantViolation(format!("{:?}", e))
            }
        }
    }
}
