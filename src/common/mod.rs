// STD Imports
use std::collections::HashMap;

// Third party library imports
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod config;
pub mod error;
pub mod table;

pub const DEFAULT_BLOCK_SIZE: usize = 4096;
pub const MIN_BLOCK_SIZE: usize = 32;
// Payload offsets and lengths inside a block are stored as u16
pub const MAX_BLOCK_SIZE: usize = u16::MAX as usize;

/// Reserved per-row marker used for logical deletion.
pub const ROW_IS_DELETED: &str = ".ROW_IS_DELETED";

pub type BlockIndex = u32;
/// Sentinel for "no block" in on-disk block references.
pub const NO_BLOCK: BlockIndex = u32::MAX;

/// A row as seen by expressions and commands: column name to scalar value.
pub type Row = serde_json::Map<String, Value>;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Any,
    Int, // i64
    Float,
    Boolean,
    String,
}

impl ColumnType {
    pub const NAMES: [&'static str; 5] = ["any", "int", "float", "boolean", "string"];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "any" => Some(ColumnType::Any),
            "int" => Some(ColumnType::Int),
            "float" => Some(ColumnType::Float),
            "boolean" => Some(ColumnType::Boolean),
            "string" => Some(ColumnType::String),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            ColumnType::Any => 0,
            ColumnType::Int => 1,
            ColumnType::Float => 2,
            ColumnType::Boolean => 3,
            ColumnType::String => 4,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ColumnType::Any),
            1 => Some(ColumnType::Int),
            2 => Some(ColumnType::Float),
            3 => Some(ColumnType::Boolean),
            4 => Some(ColumnType::String),
            _ => None,
        }
    }

    /// Whether `value` may be stored in a column of this type. Null is always accepted,
    /// arrays and objects never are.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (_, Value::Array(_)) | (_, Value::Object(_)) => false,
            (ColumnType::Any, _) => true,
            (ColumnType::Int, Value::Number(number)) => number.is_i64(),
            (ColumnType::Float, Value::Number(_)) => true,
            (ColumnType::Boolean, Value::Bool(_)) => true,
            (ColumnType::String, Value::String(_)) => true,
            _ => false,
        }
    }
}

pub type ColumnHeader = (String, ColumnType);
pub type TableInfo = Vec<ColumnHeader>;
/// Column name to its type and position in the table.
pub type TableInfoMap = HashMap<String, (ColumnType, usize)>;

pub fn map_table_info(table_info: &TableInfo) -> TableInfoMap {
    table_info
        .iter()
        .enumerate()
        .map(|(position, (name, column_type))| (name.clone(), (*column_type, position)))
        .collect()
}
