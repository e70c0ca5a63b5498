//! Block-structured store for captured byte payloads.
//!
//! Generated replay code addresses payloads as `GetBinaryData(offset)`, where the offset is
//! a position in the logical (uncompressed) data stream. The stream is cut into blocks of a
//! fixed power-of-two size; with compression each block is lz4 compressed on its own and the
//! file ends with a table locating every block.

pub mod io;
mod loader;
mod store;

pub use loader::BinaryDataLoader;
pub use store::BinaryDataStore;

use crate::error::{CaptureError, Result};

pub const BINARY_DATA_VERSION: u32 = 1;

/// Every payload starts on this boundary.
pub const BINARY_ALIGNMENT: usize = 16;

pub const DEFAULT_BLOCK_SIZE: usize = 256 << 20;
pub const DEFAULT_RESIDENT_SIZE: usize = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compression {
    None = 0,
    #[default]
    Lz4 = 1,
}

impl Compression {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            _ => Err(CaptureError::Corrupt("invalid compression kind")),
        }
    }

    pub fn is_compressed(self) -> bool {
        self != Compression::None
    }

    /// Binary file suffix appended to the trace label.
    pub fn file_suffix(self) -> &'static str {
        match self {
            Compression::None => ".cltrace.bin",
            Compression::Lz4 => ".cltrace.bin.lz4",
        }
    }
}

fn compress(kind: Compression, input: &[u8]) -> Vec<u8> {
    match kind {
        Compression::None => input.to_vec(),
        Compression::Lz4 => lz4_flex::block::compress(input),
    }
}

fn decompress(kind: Compression, compressed: &[u8], expected_len: usize) -> Result<Vec<u8>> {
    match kind {
        Compression::None => {
            if compressed.len() != expected_len {
                return Err(CaptureError::Corrupt("uncompressed block length mismatch"));
            }
            Ok(compressed.to_vec())
        }
        Compression::Lz4 => Ok(lz4_flex::block::decompress(compressed, expected_len)?),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryStoreOptions {
    pub compression: Compression,
    pub block_size: usize,
    /// Bytes of blocks kept in memory before the oldest ones are written out. Also bounds the
    /// loader's memory at replay time.
    pub resident_size: usize,
}

impl Default for BinaryStoreOptions {
    fn default() -> Self {
        Self {
            compression: Compression::Lz4,
            block_size: DEFAULT_BLOCK_SIZE,
            resident_size: DEFAULT_RESIDENT_SIZE,
        }
    }
}

impl BinaryStoreOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.block_size.is_power_of_two() || self.block_size < BINARY_ALIGNMENT {
            return Err(CaptureError::InvalidBlockSize(self.block_size as u64));
        }
        if self.resident_size / self.block_size < 2 {
            return Err(CaptureError::InvalidResidentSize {
                resident: self.resident_size as u64,
                block_size: self.block_size as u64,
            });
        }
        Ok(())
    }
}

/// What a reader needs to locate blocks in a finished binary file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryFileIndexInfo {
    pub version: u32,
    pub block_count: u64,
    pub block_size: u64,
    pub resident_size: u64,
    /// File offset of the block table; 0 for uncompressed files, which have none.
    pub index_offset: u64,
}

/// One entry of the block table at the end of a compressed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileBlockInfo {
    pub file_offset: u64,
    pub data_offset: u64,
    pub data_size: u64,
    pub compressed_size: u64,
}

impl FileBlockInfo {
    pub const SIZE: usize = 32;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_must_be_power_of_two() {
        let opts = BinaryStoreOptions {
            block_size: 3000,
            ..Default::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(CaptureError::InvalidBlockSize(3000))
        ));
    }

    #[test]
    fn resident_size_must_hold_two_blocks() {
        let opts = BinaryStoreOptions {
            compression: Compression::None,
            block_size: 1024,
            resident_size: 1500,
        };
        assert!(matches!(
            opts.validate(),
            Err(CaptureError::InvalidResidentSize { .. })
        ));
        assert!(BinaryStoreOptions::default().validate().is_ok());
    }

    #[test]
    fn compression_kind_round_trips_through_u8() {
        assert_eq!(Compression::from_u8(1).unwrap(), Compression::Lz4);
        assert!(Compression::from_u8(9).is_err());
        assert_eq!(Compression::None.file_suffix(), ".cltrace.bin");
    }
}
