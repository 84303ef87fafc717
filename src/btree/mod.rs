//! B-trees: the two distinct on-disk index formats spec.md §3 names —
//! version 1 (group symbol tables and chunked-dataset indices) and version 2
//! (typed, checksummed records for dense groups/attributes).

pub mod v1;
pub mod v2;
