//! Heaps: the three variable-length storage structures named in spec.md §3
//! ("Heaps") — local heap (contiguous v1-group name storage), global heap
//! (ref-counted variable-length blobs), and fractal heap (managed/tiny
//! objects for dense groups and attributes).

pub mod fractal;
pub mod global;
pub mod local;

pub use fractal::FractalHeap;
pub use global::GlobalHeap;
pub use local::LocalHeap;
