//! Error types for the cellmatrix storage and similarity engine.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for cellmatrix operations.
#[derive(Error, Debug)]
pub enum MatrixError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error opening, truncating, mapping or syncing a backing file.
    #[error("Mapping error for {path}: {source}")]
    Mapping {
        /// The backing file.
        path: PathBuf,
        /// The underlying OS error.
        source: std::io::Error,
    },

    /// The header of a mapped file does not match what the caller expects.
    #[error("Invalid header in {path}: {reason}")]
    InvalidHeader {
        /// The backing file.
        path: PathBuf,
        /// What did not match.
        reason: String,
    },

    /// Directory already exists and would be overwritten.
    #[error("Directory already exists: {0}")]
    DirectoryExists(PathBuf),

    /// File or directory not found.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// The cell meta data has no `CellName` entry.
    #[error("CellName missing from cell meta data")]
    MissingCellName,

    /// A cell with this name is already stored.
    #[error("Cell name {0} already exists")]
    DuplicateCellName(String),

    /// A negative expression count was supplied.
    #[error("Negative expression count {count} for cell {cell} gene {gene}")]
    NegativeExpressionCount {
        /// The cell being added.
        cell: String,
        /// The offending gene.
        gene: String,
        /// The offending count.
        count: f32,
    },

    /// The same gene appears twice in one cell's expression counts.
    #[error("Duplicate expression count for cell {cell} gene {gene}")]
    DuplicateGene {
        /// The cell being added.
        cell: String,
        /// The duplicated gene.
        gene: String,
    },

    /// The cell has no meta data entry with this name. Meta data rows are
    /// sized when the cell is added, so new names cannot be added later.
    #[error("Cell {cell} has no meta data named {name}")]
    MissingMetaData {
        /// The cell being updated.
        cell: String,
        /// The meta data name.
        name: String,
    },

    /// Malformed input record or inconsistent persisted object.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias for cellmatrix operations.
pub type Result<T> = std::result::Result<T, MatrixError>;

impl MatrixError {
    /// Wraps an OS error with the path of the file being mapped.
    pub(crate) fn mapping(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MatrixError::Mapping {
            path: path.into(),
            source,
        }
    }

    /// Creates a header validation error.
    pub(crate) fn invalid_header(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        MatrixError::InvalidHeader {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_offender() {
        let err = MatrixError::DuplicateGene {
            cell: "A".to_string(),
            gene: "gene7".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("A"));
        assert!(message.contains("gene7"));

        let err = MatrixError::invalid_header("/tmp/x", "bad magic number");
        assert!(err.to_string().contains("/tmp/x"));
    }
}
