//! A single file viewed as an array of fixed-size blocks.

use std::fs::File;
use std::os::unix::prelude::FileExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::common::error::{Error, Result};
use crate::common::{BlockIndex, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, NO_BLOCK};

use super::block::Block;

pub struct BlockStorage {
    file: File,
    path: PathBuf,
    block_size: usize,
    block_count: u32,
}

impl BlockStorage {
    /// Opens `path`, creating it when absent. The file size must be an exact
    /// multiple of `block_size`.
    pub fn open(path: &Path, block_size: usize) -> Result<Self> {
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&block_size) {
            return Err(Error::InvalidBlockSizeConfig {
                block_size,
                min: MIN_BLOCK_SIZE,
                max: MAX_BLOCK_SIZE,
            });
        }

        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let file_size = file.metadata()?.len();
        let corrupt = || Error::CorruptStorage {
            path: path.to_path_buf(),
            file_size,
            block_size,
        };
        if file_size % block_size as u64 != 0 {
            return Err(corrupt());
        }
        let block_count = u32::try_from(file_size / block_size as u64).map_err(|_| corrupt())?;

        info!(path = %path.display(), block_size, block_count, "opened block storage");

        Ok(Self {
            file,
            path: path.to_path_buf(),
            block_size,
            block_count,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    fn offset(&self, index: BlockIndex) -> u64 {
        index as u64 * self.block_size as u64
    }

    fn check_bounds(&self, index: BlockIndex) -> Result<()> {
        if index >= self.block_count {
            return Err(Error::BlockNotFound {
                index,
                block_count: self.block_count,
            });
        }
        Ok(())
    }

    pub fn read_block(&self, index: BlockIndex) -> Result<Block> {
        self.check_bounds(index)?;
        let mut raw = vec![0u8; self.block_size];
        self.file.read_exact_at(&mut raw, self.offset(index))?;
        Ok(Block::from_raw(index, raw))
    }

    pub fn write_block(&mut self, block: &Block) -> Result<()> {
        if block.size() != self.block_size {
            return Err(Error::InvalidBlockSize {
                expected: self.block_size,
                actual: block.size(),
            });
        }
        self.check_bounds(block.index())?;
        self.file.write_all_at(block.raw(), self.offset(block.index()))?;
        debug!(index = block.index(), "wrote block");
        Ok(())
    }

    /// Appends a zeroed block to the end of the file and returns it.
    pub fn allocate_block(&mut self) -> Result<Block> {
        let index = self.block_count;
        if index == NO_BLOCK {
            return Err(Error::StorageFull);
        }
        let block = Block::new(index, self.block_size);
        self.file.write_all_at(block.raw(), self.offset(index))?;
        self.block_count += 1;
        debug!(index, "appended block");
        Ok(block)
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::TempDir;

    use super::*;

    const BLOCK_SIZE: usize = 64;

    fn open_temp(dir: &TempDir) -> BlockStorage {
        BlockStorage::open(&dir.path().join("blocks.db"), BLOCK_SIZE).unwrap()
    }

    #[test]
    fn open_creates_an_empty_file() {
        let dir = TempDir::new().unwrap();
        let storage = open_temp(&dir);
        assert_eq!(storage.block_count(), 0);
        assert!(storage.path().exists());
    }

    #[test]
    fn allocation_is_monotonic() {
        let dir = TempDir::new().unwrap();
        let mut storage = open_temp(&dir);

        for expected in 0..5 {
            let before = storage.block_count();
            let block = storage.allocate_block().unwrap();
            assert_eq!(block.index(), before);
            assert_eq!(block.index(), expected);
            assert_eq!(storage.block_count(), before + 1);
            assert!(block.is_free());
        }
        let file_size = fs::metadata(storage.path()).unwrap().len();
        assert_eq!(file_size, 5 * BLOCK_SIZE as u64);
    }

    #[test]
    fn random_blocks_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut storage = open_temp(&dir);
        let mut rng = StdRng::seed_from_u64(7);

        let mut written = Vec::new();
        for _ in 0..8 {
            let index = storage.allocate_block().unwrap().index();
            let mut raw = vec![0u8; BLOCK_SIZE];
            rng.fill(&mut raw[..]);
            let block = Block::from_raw(index, raw);
            storage.write_block(&block).unwrap();
            written.push(block);
        }

        for block in &written {
            let read = storage.read_block(block.index()).unwrap();
            assert_eq!(&read, block);
            // Writing back what was read changes nothing
            storage.write_block(&read).unwrap();
            assert_eq!(storage.read_block(block.index()).unwrap(), read);
        }
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut storage = open_temp(&dir);
        storage.allocate_block().unwrap();

        assert!(matches!(
            storage.read_block(1),
            Err(Error::BlockNotFound { index: 1, block_count: 1 })
        ));
        assert!(matches!(
            storage.write_block(&Block::new(4, BLOCK_SIZE)),
            Err(Error::BlockNotFound { index: 4, .. })
        ));
    }

    #[test]
    fn wrong_length_write_fails_and_leaves_file_unchanged() {
        let dir = TempDir::new().unwrap();
        let mut storage = open_temp(&dir);
        storage.allocate_block().unwrap();
        let before = fs::read(storage.path()).unwrap();

        let short = Block::from_raw(0, vec![9u8; BLOCK_SIZE - 1]);
        assert!(matches!(
            storage.write_block(&short),
            Err(Error::InvalidBlockSize { expected: BLOCK_SIZE, actual })
                if actual == BLOCK_SIZE - 1
        ));
        assert_eq!(fs::read(storage.path()).unwrap(), before);
    }

    #[test]
    fn misaligned_file_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blocks.db");
        fs::write(&path, vec![0u8; BLOCK_SIZE + 3]).unwrap();

        assert!(matches!(
            BlockStorage::open(&path, BLOCK_SIZE),
            Err(Error::CorruptStorage { file_size, .. }) if file_size == BLOCK_SIZE as u64 + 3
        ));
    }

    #[test]
    fn reopen_counts_existing_blocks() {
        let dir = TempDir::new().unwrap();
        {
            let mut storage = open_temp(&dir);
            storage.allocate_block().unwrap();
            storage.allocate_block().unwrap();
            storage.sync().unwrap();
        }
        assert_eq!(open_temp(&dir).block_count(), 2);
    }

    #[test]
    fn unusable_block_size_is_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            BlockStorage::open(&dir.path().join("blocks.db"), 4),
            Err(Error::InvalidBlockSizeConfig { block_size: 4, .. })
        ));
    }
}
