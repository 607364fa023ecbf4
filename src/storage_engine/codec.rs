//! Little-endian primitives shared by the block encodings.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::error::{Error, Result};
use crate::common::BlockIndex;

/// Encoded size of a length-prefixed string.
pub(crate) fn str_len(value: &str) -> usize {
    2 + value.len()
}

pub(crate) fn write_str<W: Write>(writer: &mut W, value: &str) -> Result<()> {
    let len = u16::try_from(value.len()).map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "string longer than 65535 bytes")
    })?;
    writer.write_u16::<LittleEndian>(len)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

/// Reader over the bytes of one block that turns every decoding failure into
/// a `CorruptBlock` error for that block.
pub(crate) struct BlockReader<'a> {
    cursor: Cursor<&'a [u8]>,
    index: BlockIndex,
}

impl<'a> BlockReader<'a> {
    pub(crate) fn new(bytes: &'a [u8], index: BlockIndex) -> Self {
        Self {
            cursor: Cursor::new(bytes),
            index,
        }
    }

    pub(crate) fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    fn truncated(&self) -> Error {
        Error::corrupt_block(self.index, format!("truncated at byte {}", self.position()))
    }

    pub(crate) fn corrupt(&self, reason: impl Into<String>) -> Error {
        Error::corrupt_block(self.index, reason)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        self.cursor.read_u8().map_err(|_| self.truncated())
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        self.cursor.read_u16::<LittleEndian>().map_err(|_| self.truncated())
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        self.cursor.read_u32::<LittleEndian>().map_err(|_| self.truncated())
    }

    pub(crate) fn i64(&mut self) -> Result<i64> {
        self.cursor.read_i64::<LittleEndian>().map_err(|_| self.truncated())
    }

    pub(crate) fn f64(&mut self) -> Result<f64> {
        self.cursor.read_f64::<LittleEndian>().map_err(|_| self.truncated())
    }

    pub(crate) fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let mut bytes = vec![0u8; len];
        self.cursor.read_exact(&mut bytes).map_err(|_| self.truncated())?;
        String::from_utf8(bytes).map_err(|_| self.corrupt("string is not valid UTF-8"))
    }
}
