//! Encoding of rows inside row blocks.
//!
//! A row block starts with a header (kind, owning table metadata block, next
//! row block, row count, used payload bytes) followed by row records. Each
//! record is length-prefixed, carries the logical-deletion flag and then one
//! tagged value per table column, in column order.

use std::io::{Cursor, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use serde_json::{Number, Value};

use crate::common::error::{Error, Result};
use crate::common::table::TableMetaData;
use crate::common::{BlockIndex, ColumnType, Row, NO_BLOCK, ROW_IS_DELETED};

use super::block::{Block, BlockKind};
use super::codec::{str_len, write_str, BlockReader};

/// kind + owner + next + row count + used bytes
pub const ROW_BLOCK_HEADER_SIZE: usize = 1 + 4 + 4 + 2 + 2;
// length prefix + deletion flag
const RECORD_HEADER_SIZE: usize = 2 + 1;

const TAG_NULL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STRING: u8 = 5;

/// One stored row: its deletion flag and its values in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRecord {
    pub deleted: bool,
    pub values: Vec<Value>,
}

impl RowRecord {
    /// Checks `row` against the table's columns and lays it out in column order.
    /// Columns missing from `row` are stored as null.
    pub fn from_row(row: &Row, table: &TableMetaData) -> Result<Self> {
        let columns = table.column_map();
        for key in row.keys() {
            if key != ROW_IS_DELETED && !columns.contains_key(key) {
                return Err(Error::UnknownColumn {
                    table: table.name.clone(),
                    column: key.clone(),
                });
            }
        }

        let deleted = match row.get(ROW_IS_DELETED) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(deleted)) => *deleted,
            Some(other) => {
                return Err(Error::TypeMismatch {
                    table: table.name.clone(),
                    column: ROW_IS_DELETED.into(),
                    expected: ColumnType::Boolean,
                    value: other.clone(),
                })
            }
        };

        let mut values = Vec::with_capacity(table.columns.len());
        for (name, column_type) in &table.columns {
            let value = row.get(name).cloned().unwrap_or(Value::Null);
            if !column_type.accepts(&value) {
                return Err(Error::TypeMismatch {
                    table: table.name.clone(),
                    column: name.clone(),
                    expected: *column_type,
                    value,
                });
            }
            values.push(value);
        }

        Ok(Self { deleted, values })
    }

    /// The row as a column map, deletion marker included.
    pub fn to_row(&self, table: &TableMetaData) -> Row {
        let mut row = Row::new();
        for (index, (name, _)) in table.columns.iter().enumerate() {
            let value = self.values.get(index).cloned().unwrap_or(Value::Null);
            row.insert(name.clone(), value);
        }
        row.insert(ROW_IS_DELETED.into(), Value::Bool(self.deleted));
        row
    }

    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.values.iter().map(value_len).sum::<usize>()
    }

    fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u16::<LittleEndian>(self.encoded_len() as u16)?;
        writer.write_u8(self.deleted as u8)?;
        for value in &self.values {
            write_value(writer, value)?;
        }
        Ok(())
    }

    fn decode(reader: &mut BlockReader) -> Result<Self> {
        let start = reader.position();
        let len = reader.u16()? as usize;
        if len < RECORD_HEADER_SIZE {
            return Err(reader.corrupt(format!("row record of {len} bytes")));
        }
        let deleted = reader.u8()? != 0;
        let end = start + len;

        let mut values = Vec::new();
        while reader.position() < end {
            values.push(read_value(reader)?);
        }
        if reader.position() != end {
            return Err(reader.corrupt("row record overruns its length"));
        }
        Ok(Self { deleted, values })
    }
}

fn value_len(value: &Value) -> usize {
    match value {
        Value::Number(_) => 1 + 8,
        Value::String(string) => 1 + str_len(string),
        _ => 1,
    }
}

fn write_value<W: Write>(writer: &mut W, value: &Value) -> Result<()> {
    match value {
        Value::Bool(false) => writer.write_u8(TAG_FALSE)?,
        Value::Bool(true) => writer.write_u8(TAG_TRUE)?,
        Value::Number(number) => match number.as_i64() {
            Some(int) => {
                writer.write_u8(TAG_INT)?;
                writer.write_i64::<LittleEndian>(int)?;
            }
            None => {
                writer.write_u8(TAG_FLOAT)?;
                writer.write_f64::<LittleEndian>(number.as_f64().unwrap_or_default())?;
            }
        },
        Value::String(string) => {
            writer.write_u8(TAG_STRING)?;
            write_str(writer, string)?;
        }
        // Arrays and objects are refused by ColumnType::accepts before encoding
        _ => writer.write_u8(TAG_NULL)?,
    }
    Ok(())
}

fn read_value(reader: &mut BlockReader) -> Result<Value> {
    let value = match reader.u8()? {
        TAG_NULL => Value::Null,
        TAG_FALSE => Value::Bool(false),
        TAG_TRUE => Value::Bool(true),
        TAG_INT => Value::from(reader.i64()?),
        TAG_FLOAT => Number::from_f64(reader.f64()?).map_or(Value::Null, Value::Number),
        TAG_STRING => Value::String(reader.string()?),
        tag => return Err(reader.corrupt(format!("unknown value tag {tag}"))),
    };
    Ok(value)
}

/// Decoded contents of a row block.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBlock {
    /// Index of the table metadata block this block belongs to.
    pub owner: BlockIndex,
    pub next: BlockIndex,
    pub records: Vec<RowRecord>,
}

impl RowBlock {
    pub fn new(owner: BlockIndex) -> Self {
        Self {
            owner,
            next: NO_BLOCK,
            records: Vec::new(),
        }
    }

    pub fn payload_capacity(block_size: usize) -> usize {
        block_size.saturating_sub(ROW_BLOCK_HEADER_SIZE)
    }

    pub fn payload_len(&self) -> usize {
        self.records.iter().map(RowRecord::encoded_len).sum()
    }

    pub fn fits(&self, record: &RowRecord, block_size: usize) -> bool {
        self.payload_len() + record.encoded_len() <= Self::payload_capacity(block_size)
    }

    pub fn encode(&self, block: &mut Block) -> Result<()> {
        let capacity = Self::payload_capacity(block.size());
        let used = self.payload_len();
        if used > capacity {
            return Err(Error::RowTooLarge {
                size: used,
                capacity,
            });
        }

        block.free();
        block.set_kind(BlockKind::Rows);
        let mut cursor = Cursor::new(&mut block.raw_mut()[1..]);
        cursor.write_u32::<LittleEndian>(self.owner)?;
        cursor.write_u32::<LittleEndian>(self.next)?;
        cursor.write_u16::<LittleEndian>(self.records.len() as u16)?;
        cursor.write_u16::<LittleEndian>(used as u16)?;
        for record in &self.records {
            record.encode(&mut cursor)?;
        }
        cursor.flush()?;
        Ok(())
    }

    pub fn decode(block: &Block) -> Result<Self> {
        if block.kind()? != BlockKind::Rows {
            return Err(Error::corrupt_block(block.index(), "not a row block"));
        }

        let mut reader = BlockReader::new(&block.raw()[1..], block.index());
        let owner = reader.u32()?;
        let next = reader.u32()?;
        let count = reader.u16()?;
        let used = reader.u16()? as usize;
        if used > Self::payload_capacity(block.size()) {
            return Err(reader.corrupt(format!("{used} payload bytes exceed the block")));
        }

        let payload_start = reader.position();
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            records.push(RowRecord::decode(&mut reader)?);
        }
        if reader.position() - payload_start != used {
            return Err(reader.corrupt("row payload length mismatch"));
        }

        Ok(Self {
            owner,
            next,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn users() -> TableMetaData {
        TableMetaData::new(
            "users".into(),
            vec![("id".into(), ColumnType::Int), ("name".into(), ColumnType::Any)],
        )
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn rows_survive_a_block() {
        let table = users();
        let mut rows = RowBlock::new(0);
        rows.records.push(RowRecord::from_row(&row(json!({"id": 1, "name": "a"})), &table).unwrap());
        rows.records.push(RowRecord::from_row(&row(json!({"id": 2, "name": 2.5})), &table).unwrap());
        rows.next = 7;

        let mut block = Block::new(3, 64);
        rows.encode(&mut block).unwrap();
        let decoded = RowBlock::decode(&block).unwrap();
        assert_eq!(decoded, rows);

        let decoded_rows = block.rows(&table).unwrap();
        assert_eq!(
            decoded_rows[1],
            row(json!({"id": 2, "name": 2.5, ".ROW_IS_DELETED": false}))
        );
    }

    #[test]
    fn record_length_follows_values() {
        let record = RowRecord::from_row(&row(json!({"id": 1, "name": "a"})), &users()).unwrap();
        // header 3, int 9, string 1 + 2 + 1
        assert_eq!(record.encoded_len(), 16);
    }

    #[test]
    fn missing_columns_are_null() {
        let record = RowRecord::from_row(&row(json!({"id": 1})), &users()).unwrap();
        assert_eq!(record.values, vec![json!(1), Value::Null]);
        assert!(!record.deleted);
    }

    #[test]
    fn unknown_column_is_rejected() {
        let err = RowRecord::from_row(&row(json!({"id": 1, "age": 3})), &users()).unwrap_err();
        assert!(matches!(err, Error::UnknownColumn { column, .. } if column == "age"));
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let err = RowRecord::from_row(&row(json!({"id": "one"})), &users()).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { expected: ColumnType::Int, .. }));

        let err = RowRecord::from_row(&row(json!({"name": [1]})), &users()).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }));
    }

    #[test]
    fn deletion_marker_is_carried() {
        let record =
            RowRecord::from_row(&row(json!({"id": 1, ".ROW_IS_DELETED": true})), &users()).unwrap();
        assert!(record.deleted);
        assert_eq!(record.to_row(&users())[ROW_IS_DELETED], json!(true));
    }

    #[test]
    fn overfull_block_is_rejected() {
        let table = users();
        let mut rows = RowBlock::new(0);
        let record = RowRecord::from_row(&row(json!({"id": 1, "name": "a"})), &table).unwrap();
        while rows.fits(&record, 64) {
            rows.records.push(record.clone());
        }
        assert_eq!(rows.records.len(), 3);

        rows.records.push(record);
        assert!(matches!(
            rows.encode(&mut Block::new(0, 64)),
            Err(Error::RowTooLarge { size: 64, capacity: 51 })
        ));
    }

    #[test]
    fn garbage_payload_is_corruption() {
        let mut block = Block::new(4, 64);
        block.set_kind(BlockKind::Rows);
        // claims one row but no payload bytes
        block.raw_mut()[9] = 1;
        assert!(matches!(RowBlock::decode(&block), Err(Error::CorruptBlock { index: 4, .. })));
    }
}
