use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::binary::io::WriteLeExt;
use crate::binary::{
    compress, BinaryFileIndexInfo, BinaryStoreOptions, Compression, FileBlockInfo,
    BINARY_ALIGNMENT, BINARY_DATA_VERSION,
};
use crate::error::{CaptureError, Result};

fn align_up(v: usize, align: usize) -> usize {
    (v + align - 1) & !(align - 1)
}

/// Append-only store for captured payloads, addressed by byte offset from generated code.
///
/// Data accumulates in fixed-size blocks. Once more than `resident_size` bytes of blocks are
/// held in memory, the oldest blocks are written to disk. Every payload starts on a 16-byte
/// boundary and never straddles a block.
#[derive(Debug)]
pub struct BinaryDataStore {
    path: PathBuf,
    out: BufWriter<File>,
    compression: Compression,
    block_size: usize,
    resident_size: usize,
    max_resident_blocks: usize,
    resident: VecDeque<Vec<u8>>,
    block_count: usize,
    stored_blocks: usize,
    file_pos: u64,
    index: Vec<FileBlockInfo>,
}

impl BinaryDataStore {
    pub fn create(path: impl AsRef<Path>, opts: BinaryStoreOptions) -> Result<Self> {
        opts.validate()?;
        let path = path.as_ref().to_path_buf();
        let out = BufWriter::new(File::create(&path)?);
        tracing::debug!(
            path = %path.display(),
            block_size = opts.block_size,
            resident_size = opts.resident_size,
            compression = ?opts.compression,
            "opened binary data store"
        );
        Ok(Self {
            path,
            out,
            compression: opts.compression,
            block_size: opts.block_size,
            resident_size: opts.resident_size,
            max_resident_blocks: opts.resident_size / opts.block_size,
            resident: VecDeque::new(),
            block_count: 0,
            stored_blocks: 0,
            file_pos: 0,
            index: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Bytes addressed so far, including alignment padding.
    pub fn total_size(&self) -> u64 {
        match self.resident.back() {
            Some(current) => {
                ((self.block_count - 1) * self.block_size + current.len()) as u64
            }
            None => 0,
        }
    }

    /// Copies `data` into the store and returns the offset replay code reads it from.
    pub fn append(&mut self, data: &[u8]) -> Result<u64> {
        if data.len() > self.block_size {
            return Err(CaptureError::PayloadExceedsBlock {
                len: data.len(),
                block_size: self.block_size as u64,
            });
        }
        let padded = align_up(data.len(), BINARY_ALIGNMENT);

        let needs_block = match self.resident.back() {
            Some(current) => current.len() + padded > self.block_size,
            None => true,
        };
        if needs_block {
            self.start_block()?;
        }

        let block_index = self.block_count - 1;
        let current = self
            .resident
            .back_mut()
            .ok_or(CaptureError::Corrupt("no current block"))?;
        let offset = block_index * self.block_size + current.len();
        current.extend_from_slice(data);
        current.resize(current.len() + padded - data.len(), 0);
        Ok(offset as u64)
    }

    fn start_block(&mut self) -> Result<()> {
        while self.resident.len() >= self.max_resident_blocks {
            self.store_front(false)?;
        }
        self.resident.push_back(Vec::new());
        self.block_count += 1;
        Ok(())
    }

    /// Writes the oldest resident block. Blocks other than the final one are padded to the
    /// full block size so uncompressed offsets map straight to file offsets.
    fn store_front(&mut self, last: bool) -> Result<()> {
        let Some(mut block) = self.resident.pop_front() else {
            return Ok(());
        };
        if !last {
            block.resize(self.block_size, 0);
        }

        let data_offset = (self.stored_blocks * self.block_size) as u64;
        if self.compression.is_compressed() {
            let compressed = compress(self.compression, &block);
            self.out.write_bytes(&compressed)?;
            self.index.push(FileBlockInfo {
                file_offset: self.file_pos,
                data_offset,
                data_size: block.len() as u64,
                compressed_size: compressed.len() as u64,
            });
            self.file_pos += compressed.len() as u64;
        } else {
            self.out.write_bytes(&block)?;
            self.file_pos += block.len() as u64;
        }
        self.stored_blocks += 1;
        tracing::trace!(block = self.stored_blocks - 1, len = block.len(), "stored binary data block");
        Ok(())
    }

    /// Flushes every block, appends the block index for compressed stores and returns what the
    /// metadata file needs to locate the data again.
    pub fn close(mut self) -> Result<BinaryFileIndexInfo> {
        while !self.resident.is_empty() {
            let last = self.resident.len() == 1;
            self.store_front(last)?;
        }

        let mut index_offset = 0;
        if self.compression.is_compressed() {
            index_offset = self.file_pos;
            for entry in &self.index {
                self.out.write_u64_le(entry.file_offset)?;
                self.out.write_u64_le(entry.data_offset)?;
                self.out.write_u64_le(entry.data_size)?;
                self.out.write_u64_le(entry.compressed_size)?;
            }
        }
        self.out.flush()?;

        let info = BinaryFileIndexInfo {
            version: BINARY_DATA_VERSION,
            block_count: self.block_count as u64,
            block_size: self.block_size as u64,
            resident_size: self.resident_size as u64,
            index_offset,
        };
        tracing::info!(
            path = %self.path.display(),
            blocks = info.block_count,
            bytes = self.file_pos,
            "closed binary data store"
        );
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(compression: Compression) -> BinaryStoreOptions {
        BinaryStoreOptions {
            compression,
            block_size: 64,
            resident_size: 128,
        }
    }

    #[test]
    fn appends_are_16_byte_aligned() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BinaryDataStore::create(dir.path().join("d.bin"), opts(Compression::None)).unwrap();
        assert_eq!(store.append(&[1, 2, 3]).unwrap(), 0);
        assert_eq!(store.append(&[4; 17]).unwrap(), 16);
        assert_eq!(store.total_size(), 48);
    }

    #[test]
    fn payloads_never_straddle_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BinaryDataStore::create(dir.path().join("d.bin"), opts(Compression::None)).unwrap();
        assert_eq!(store.append(&[0; 48]).unwrap(), 0);
        // 48 + 32 > 64, so this lands at the start of the second block.
        assert_eq!(store.append(&[1; 32]).unwrap(), 64);
        let info = store.close().unwrap();
        assert_eq!(info.block_count, 2);
        assert_eq!(info.index_offset, 0);
        let len = std::fs::metadata(dir.path().join("d.bin")).unwrap().len();
        assert_eq!(len, 64 + 32);
    }

    #[test]
    fn oversized_payloads_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BinaryDataStore::create(dir.path().join("d.bin"), opts(Compression::None)).unwrap();
        assert!(matches!(
            store.append(&[0; 65]),
            Err(CaptureError::PayloadExceedsBlock { len: 65, .. })
        ));
    }

    #[test]
    fn compressed_store_records_index_trailer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.bin.lz4");
        let mut store = BinaryDataStore::create(&path, opts(Compression::Lz4)).unwrap();
        for i in 0..5u8 {
            store.append(&[i; 40]).unwrap();
        }
        let info = store.close().unwrap();
        assert_eq!(info.block_count, 5);
        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, info.index_offset + 5 * FileBlockInfo::SIZE as u64);
    }
}
