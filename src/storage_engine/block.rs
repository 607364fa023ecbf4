use crate::common::error::{Error, Result};
use crate::common::table::TableMetaData;
use crate::common::{BlockIndex, Row};

use super::row_block::RowBlock;

/// What a block holds, stored in its first byte. A zeroed block is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockKind {
    Free = 0,
    TableMetaData = 1,
    Rows = 2,
}

impl BlockKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(BlockKind::Free),
            1 => Some(BlockKind::TableMetaData),
            2 => Some(BlockKind::Rows),
            _ => None,
        }
    }
}

/// One block of the backing file, held in memory.
///
/// The length of `raw` is fixed when the block is created; mutation goes through
/// [`Block::raw_mut`], which hands out a slice and so can never resize it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    index: BlockIndex,
    raw: Vec<u8>,
}

impl Block {
    /// A zeroed (free) block.
    pub fn new(index: BlockIndex, size: usize) -> Self {
        Self {
            index,
            raw: vec![0u8; size],
        }
    }

    pub fn from_raw(index: BlockIndex, raw: Vec<u8>) -> Self {
        Self { index, raw }
    }

    pub fn index(&self) -> BlockIndex {
        self.index
    }

    pub fn size(&self) -> usize {
        self.raw.len()
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn raw_mut(&mut self) -> &mut [u8] {
        &mut self.raw
    }

    pub fn kind(&self) -> Result<BlockKind> {
        match self.raw.first() {
            None => Ok(BlockKind::Free),
            Some(byte) => BlockKind::from_byte(*byte)
                .ok_or_else(|| Error::corrupt_block(self.index, format!("unknown block kind {byte}"))),
        }
    }

    pub(crate) fn set_kind(&mut self, kind: BlockKind) {
        if let Some(first) = self.raw.first_mut() {
            *first = kind as u8;
        }
    }

    pub fn is_free(&self) -> bool {
        self.raw.first().map_or(true, |kind| *kind == BlockKind::Free as u8)
    }

    /// Marks the block reusable. The whole buffer is zeroed so stale rows never
    /// leak into whatever reuses the slot.
    pub fn free(&mut self) {
        self.raw.fill(0);
    }

    /// Decodes the rows stored in a row block, deletion marker included.
    pub fn rows(&self, table: &TableMetaData) -> Result<Vec<Row>> {
        let rows = RowBlock::decode(self)?;
        Ok(rows.records.iter().map(|record| record.to_row(table)).collect())
    }
}
