//! Persistent storage built on memory-mapped files.
//!
//! - [`MappedVec`] - a growable array of plain-old-data records in one file
//! - [`RaggedVec`] - a vector of variable-length rows stored as two mapped arrays
//! - [`StringTable`] - a persistent name table used for gene, cell and meta data names

mod mapped_vec;
mod ragged;
mod string_table;

pub use mapped_vec::{MappedHeader, MappedVec, MAGIC_NUMBER, PAGE_SIZE};
pub use ragged::{CountingPass, FillingPass, RaggedVec};
pub use string_table::StringTable;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Appends `.suffix` to a base path, keeping any dots already in the file name.
pub(crate) fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixed_keeps_existing_dots() {
        let path = suffixed(Path::new("/tmp/data/Cell.Names"), "toc");
        assert_eq!(path, PathBuf::from("/tmp/data/Cell.Names.toc"));
    }
}
