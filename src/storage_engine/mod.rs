//! The database view of a block file: tables, their row chains and the set of
//! reusable blocks.

// Rust Builtin Imports

use std::collections::BTreeSet;
use std::path::Path;

// Third party library imports

use tracing::{debug, info};

// First party library imports

use crate::common::config::DataBaseConfig;
use crate::common::error::{Error, Result};
use crate::common::table::TableMetaData;
use crate::common::{BlockIndex, NO_BLOCK};

pub mod block;
pub mod block_storage;
pub(crate) mod codec;
pub mod row_block;

pub use block::{Block, BlockKind};
pub use block_storage::BlockStorage;
pub use row_block::{RowBlock, RowRecord};

/// Single point of block access for commands.
///
/// Keeps an in-memory free list, rebuilt by a full scan at open, so allocation
/// can hand out freed blocks before growing the file. An allocated block stays
/// on the free list, reserved, until it is written; a reservation that is never
/// written is given back by [`DataBaseStorage::release_reservations`].
pub struct DataBaseStorage {
    blocks: BlockStorage,
    free_blocks: BTreeSet<BlockIndex>,
    reserved: BTreeSet<BlockIndex>,
}

impl DataBaseStorage {
    pub fn open(path: &Path, block_size: usize) -> Result<Self> {
        let blocks = BlockStorage::open(path, block_size)?;

        let mut free_blocks = BTreeSet::new();
        for index in 0..blocks.block_count() {
            if blocks.read_block(index)?.is_free() {
                free_blocks.insert(index);
            }
        }
        info!(
            path = %path.display(),
            blocks = blocks.block_count(),
            free = free_blocks.len(),
            "opened database"
        );

        Ok(Self {
            blocks,
            free_blocks,
            reserved: BTreeSet::new(),
        })
    }

    pub fn from_config(config: &DataBaseConfig) -> Result<Self> {
        config.validate()?;
        Self::open(&config.path, config.block_size)
    }

    pub fn block_size(&self) -> usize {
        self.blocks.block_size()
    }

    pub fn block_count(&self) -> u32 {
        self.blocks.block_count()
    }

    pub fn free_block_count(&self) -> usize {
        self.free_blocks.len()
    }

    pub fn read_block(&self, index: BlockIndex) -> Result<Block> {
        self.blocks.read_block(index)
    }

    pub fn write_block(&mut self, block: &Block) -> Result<()> {
        self.blocks.write_block(block)?;
        self.reserved.remove(&block.index());
        if block.is_free() {
            self.free_blocks.insert(block.index());
        } else {
            self.free_blocks.remove(&block.index());
        }
        Ok(())
    }

    /// Returns a zeroed block, reusing the lowest unreserved free index when there
    /// is one and appending to the file otherwise. The slot is reserved for the
    /// caller until it is written back.
    pub fn allocate_block(&mut self) -> Result<Block> {
        let reusable = self.free_blocks.difference(&self.reserved).next().copied();
        let block = match reusable {
            Some(index) => {
                debug!(index, "reusing free block");
                Block::new(index, self.block_size())
            }
            None => {
                let block = self.blocks.allocate_block()?;
                self.free_blocks.insert(block.index());
                block
            }
        };
        self.reserved.insert(block.index());
        Ok(block)
    }

    /// Hands every allocated but unwritten block back to the free list.
    pub fn release_reservations(&mut self) {
        if !self.reserved.is_empty() {
            debug!(blocks = self.reserved.len(), "released unwritten blocks");
            self.reserved.clear();
        }
    }

    pub fn sync(&self) -> Result<()> {
        self.blocks.sync()
    }

    /// Every live table, in block order. Each call starts a fresh scan.
    pub fn table_meta_data_gen(&self) -> TableMetaDataGen<'_> {
        TableMetaDataGen {
            blocks: &self.blocks,
            next_index: 0,
        }
    }

    pub fn find_table(&self, name: &str) -> Result<(TableMetaData, BlockIndex)> {
        for entry in self.table_meta_data_gen() {
            let (meta, index) = entry?;
            if meta.name == name {
                return Ok((meta, index));
            }
        }
        Err(Error::TableNotFound(name.to_owned()))
    }

    /// Reads a block of the row chain owned by the metadata block `owner`.
    pub fn read_row_block(&self, index: BlockIndex, owner: BlockIndex) -> Result<(Block, RowBlock)> {
        let block = self.read_block(index)?;
        let rows = RowBlock::decode(&block)?;
        if rows.owner != owner {
            return Err(Error::corrupt_block(
                index,
                format!("row block belongs to {} instead of {owner}", rows.owner),
            ));
        }
        Ok((block, rows))
    }

    /// Walks the row chain of a table from its first block.
    pub fn row_blocks<'a>(&'a self, meta: &TableMetaData, owner: BlockIndex) -> RowBlockChain<'a> {
        RowBlockChain {
            storage: self,
            owner,
            next: meta.first_row_block,
            remaining: self.block_count(),
        }
    }
}

pub struct TableMetaDataGen<'a> {
    blocks: &'a BlockStorage,
    next_index: BlockIndex,
}

impl<'a> Iterator for TableMetaDataGen<'a> {
    type Item = Result<(TableMetaData, BlockIndex)>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next_index < self.blocks.block_count() {
            let index = self.next_index;
            self.next_index += 1;

            let block = match self.blocks.read_block(index) {
                Ok(block) => block,
                Err(err) => return Some(Err(err)),
            };
            match block.kind() {
                Ok(BlockKind::TableMetaData) => {
                    return Some(TableMetaData::decode(&block).map(|meta| (meta, index)))
                }
                Ok(_) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
        None
    }
}

pub struct RowBlockChain<'a> {
    storage: &'a DataBaseStorage,
    owner: BlockIndex,
    next: BlockIndex,
    // A chain can never be longer than the file; running out means a cycle
    remaining: u32,
}

impl<'a> Iterator for RowBlockChain<'a> {
    type Item = Result<(Block, RowBlock)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NO_BLOCK {
            return None;
        }
        if self.remaining == 0 {
            let index = self.next;
            self.next = NO_BLOCK;
            return Some(Err(Error::corrupt_block(index, "row chain loops")));
        }
        self.remaining -= 1;

        match self.storage.read_row_block(self.next, self.owner) {
            Ok((block, rows)) => {
                self.next = rows.next;
                Some(Ok((block, rows)))
            }
            Err(err) => {
                self.next = NO_BLOCK;
                Some(Err(err))
            }
        }
    }
}
