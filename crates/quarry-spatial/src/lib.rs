//! Sparse octree spatial index.
//!
//! Nodes and objects live in flat, contiguous vectors; child links are
//! signed indices (`-1` = absent). This keeps traversal cache-friendly
//! compared to a pointer tree at the cost of slightly more bookkeeping on
//! removal.

pub mod octree;

pub use octree::SparseOctree;
