//! Locality-sensitive hashing of cells for fast grouping by similarity.

mod lsh;

pub use lsh::{Hyperplanes, Lsh};
