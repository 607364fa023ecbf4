use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

use super::{BlockIndex, ColumnType};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A JSONQL request that failed validation. Carries every violation found, each
/// prefixed with the JSON path it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid JSONQL: {}", .violations.join("; "))]
pub struct JsonQlException {
    pub violations: Vec<String>,
}

impl JsonQlException {
    pub fn new(violations: Vec<String>) -> Self {
        Self { violations }
    }

    pub fn single(violation: impl Into<String>) -> Self {
        Self {
            violations: vec![violation.into()],
        }
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Re-roots every violation path under `path`, used when a nested document
    /// (an array item, an embedded select) was validated on its own.
    pub fn nested(self, path: &str) -> Self {
        let violations = self
            .violations
            .into_iter()
            .map(|violation| match violation.strip_prefix('$') {
                Some(rest) => format!("{path}{rest}"),
                None => format!("{path}: {violation}"),
            })
            .collect();
        Self { violations }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error(transparent)]
    JsonQl(#[from] JsonQlException),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("corrupt storage {path:?}: file size {file_size} is not a multiple of block size {block_size}")]
    CorruptStorage {
        path: PathBuf,
        file_size: u64,
        block_size: usize,
    },

    #[error("invalid block size {block_size}: must be between {min} and {max} bytes")]
    InvalidBlockSizeConfig {
        block_size: usize,
        min: usize,
        max: usize,
    },

    #[error("block {index} not found: storage holds {block_count} blocks")]
    BlockNotFound { index: BlockIndex, block_count: u32 },

    #[error("invalid block size: expected {expected} bytes, got {actual}")]
    InvalidBlockSize { expected: usize, actual: usize },

    #[error("storage is full: no block index left to allocate")]
    StorageFull,

    #[error("corrupt block {index}: {reason}")]
    CorruptBlock { index: BlockIndex, reason: String },

    #[error("Table {0} does not exist")]
    TableNotFound(String),

    #[error("Table {0} already exists")]
    TableAlreadyExists(String),

    #[error("Table {table} has no column {column}")]
    UnknownColumn { table: String, column: String },

    #[error("column {column} of table {table} expects {expected:?}, got {value}")]
    TypeMismatch {
        table: String,
        column: String,
        expected: ColumnType,
        value: Value,
    },

    #[error("row of {size} bytes does not fit a block payload of {capacity} bytes")]
    RowTooLarge { size: usize, capacity: usize },

    #[error("metadata of table {table} needs {size} bytes, a block holds {capacity}")]
    TableMetaDataTooLarge {
        table: String,
        size: usize,
        capacity: usize,
    },
}

impl Error {
    pub(crate) fn corrupt_block(index: BlockIndex, reason: impl Into<String>) -> Self {
        Error::CorruptBlock {
            index,
            reason: reason.into(),
        }
    }
}
