use std::io::{Cursor, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::common::error::{Error, Result};
use crate::common::{map_table_info, BlockIndex, ColumnType, TableInfo, TableInfoMap, NO_BLOCK};
use crate::storage_engine::block::{Block, BlockKind};
use crate::storage_engine::codec::{str_len, write_str, BlockReader};

/// Everything a table metadata block stores: the table's name, its columns
/// and both ends of its chain of row blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetaData {
    pub name: String,
    pub columns: TableInfo,
    pub first_row_block: BlockIndex,
    pub last_row_block: BlockIndex,
}

impl TableMetaData {
    pub fn new(name: String, columns: TableInfo) -> Self {
        Self {
            name,
            columns,
            first_row_block: NO_BLOCK,
            last_row_block: NO_BLOCK,
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn column_map(&self) -> TableInfoMap {
        map_table_info(&self.columns)
    }

    pub fn encoded_len(&self) -> usize {
        // kind + first + last + name + column count
        let header = 1 + 4 + 4 + str_len(&self.name) + 2;
        header
            + self
                .columns
                .iter()
                .map(|(name, _)| str_len(name) + 1)
                .sum::<usize>()
    }

    /// Fails when the metadata cannot fit a block of `block_size` bytes.
    pub fn check_fits(&self, block_size: usize) -> Result<()> {
        let size = self.encoded_len();
        if size > block_size {
            return Err(Error::TableMetaDataTooLarge {
                table: self.name.clone(),
                size,
                capacity: block_size,
            });
        }
        Ok(())
    }

    pub fn encode(&self, block: &mut Block) -> Result<()> {
        self.check_fits(block.size())?;
        block.free();
        block.set_kind(BlockKind::TableMetaData);

        let mut cursor = Cursor::new(&mut block.raw_mut()[1..]);
        cursor.write_u32::<LittleEndian>(self.first_row_block)?;
        cursor.write_u32::<LittleEndian>(self.last_row_block)?;
        write_str(&mut cursor, &self.name)?;
        cursor.write_u16::<LittleEndian>(self.columns.len() as u16)?;
        for (name, column_type) in &self.columns {
            write_str(&mut cursor, name)?;
            cursor.write_u8(column_type.to_byte())?;
        }
        cursor.flush()?;
        Ok(())
    }

    pub fn decode(block: &Block) -> Result<Self> {
        if block.kind()? != BlockKind::TableMetaData {
            return Err(Error::corrupt_block(block.index(), "not a table metadata block"));
        }

        let mut reader = BlockReader::new(&block.raw()[1..], block.index());
        let first_row_block = reader.u32()?;
        let last_row_block = reader.u32()?;
        let name = reader.string()?;
        let column_count = reader.u16()?;
        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let column_name = reader.string()?;
            let type_byte = reader.u8()?;
            let column_type = ColumnType::from_byte(type_byte)
                .ok_or_else(|| reader.corrupt(format!("unknown column type {type_byte}")))?;
            columns.push((column_name, column_type));
        }

        Ok(Self {
            name,
            columns,
            first_row_block,
            last_row_block,
        })
    }
}
