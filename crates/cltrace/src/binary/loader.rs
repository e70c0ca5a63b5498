use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;

use crate::binary::io::ReadLeExt;
use crate::binary::{decompress, BinaryFileIndexInfo, Compression, FileBlockInfo};
use crate::error::{CaptureError, Result};

/// Reads payloads back out of a finished binary data file.
///
/// The leading blocks stay resident after the first load; everything past the resident limit
/// shares a single transient slot that is replaced on each miss.
#[derive(Debug)]
pub struct BinaryDataLoader {
    reader: BufReader<File>,
    compression: Compression,
    block_size: u64,
    blocks: Vec<FileBlockInfo>,
    resident: Vec<Option<Vec<u8>>>,
    transient: Option<(usize, Vec<u8>)>,
}

impl BinaryDataLoader {
    pub fn open(
        path: impl AsRef<Path>,
        info: &BinaryFileIndexInfo,
        compression: Compression,
    ) -> Result<Self> {
        if !info.block_size.is_power_of_two() {
            return Err(CaptureError::InvalidBlockSize(info.block_size));
        }
        let file = File::open(path.as_ref())?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let blocks = if compression.is_compressed() {
            read_block_table(&mut reader, info, file_len)?
        } else {
            uncompressed_blocks(info, file_len)
        };

        let max_resident = (info.resident_size / info.block_size).max(2) as usize;
        let preload = blocks.len().min(max_resident - 1);

        let mut loader = Self {
            reader,
            compression,
            block_size: info.block_size,
            resident: vec![None; preload],
            blocks,
            transient: None,
        };
        for i in 0..preload {
            let data = loader.load_block(i)?;
            loader.resident[i] = Some(data);
        }
        tracing::debug!(
            path = %path.as_ref().display(),
            blocks = loader.blocks.len(),
            preloaded = preload,
            "opened binary data"
        );
        Ok(loader)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[FileBlockInfo] {
        &self.blocks
    }

    /// Logical size of the stored data.
    pub fn data_size(&self) -> u64 {
        self.blocks
            .last()
            .map(|b| b.data_offset + b.data_size)
            .unwrap_or(0)
    }

    /// Returns `len` bytes starting at the logical `offset` handed out by the store.
    pub fn get(&mut self, offset: u64, len: usize) -> Result<&[u8]> {
        let out_of_range = CaptureError::OffsetOutOfRange { offset, len };
        let block = (offset / self.block_size) as usize;
        let within = (offset % self.block_size) as usize;
        let Some(desc) = self.blocks.get(block) else {
            return Err(out_of_range);
        };
        if within as u64 + len as u64 > desc.data_size {
            return Err(out_of_range);
        }

        let data = if block < self.resident.len() {
            match &self.resident[block] {
                Some(data) => data,
                None => return Err(CaptureError::Corrupt("resident block missing")),
            }
        } else {
            let cached = matches!(&self.transient, Some((b, _)) if *b == block);
            if !cached {
                let data = self.load_block(block)?;
                self.transient = Some((block, data));
            }
            match &self.transient {
                Some((_, data)) => data,
                None => return Err(CaptureError::Corrupt("transient block missing")),
            }
        };
        Ok(&data[within..within + len])
    }

    fn load_block(&mut self, block: usize) -> Result<Vec<u8>> {
        let desc = self.blocks[block];
        self.reader.seek(SeekFrom::Start(desc.file_offset))?;
        let stored_len = if self.compression.is_compressed() {
            desc.compressed_size
        } else {
            desc.data_size
        };
        let stored = self.reader.read_exact_vec(stored_len as usize)?;
        decompress(self.compression, &stored, desc.data_size as usize)
    }
}

fn read_block_table(
    reader: &mut BufReader<File>,
    info: &BinaryFileIndexInfo,
    file_len: u64,
) -> Result<Vec<FileBlockInfo>> {
    let table_len = info
        .block_count
        .checked_mul(FileBlockInfo::SIZE as u64)
        .ok_or(CaptureError::Corrupt("block count overflows"))?;
    if info.index_offset.checked_add(table_len) != Some(file_len) {
        return Err(CaptureError::Corrupt("block table does not end the file"));
    }
    reader.seek(SeekFrom::Start(info.index_offset))?;
    let mut blocks = Vec::with_capacity(info.block_count as usize);
    for _ in 0..info.block_count {
        let entry = FileBlockInfo {
            file_offset: reader.read_u64_le()?,
            data_offset: reader.read_u64_le()?,
            data_size: reader.read_u64_le()?,
            compressed_size: reader.read_u64_le()?,
        };
        if entry.file_offset + entry.compressed_size > info.index_offset {
            return Err(CaptureError::Corrupt("block extends into the block table"));
        }
        blocks.push(entry);
    }
    Ok(blocks)
}

/// Uncompressed blocks sit back to back at their logical offsets; only the last is short.
fn uncompressed_blocks(info: &BinaryFileIndexInfo, file_len: u64) -> Vec<FileBlockInfo> {
    (0..info.block_count)
        .map(|i| i * info.block_size)
        .take_while(|&start| start < file_len)
        .map(|start| {
            let size = info.block_size.min(file_len - start);
            FileBlockInfo {
                file_offset: start,
                data_offset: start,
                data_size: size,
                compressed_size: size,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::{BinaryDataStore, BinaryStoreOptions};

    fn write_store(path: &Path, compression: Compression, payloads: &[Vec<u8>]) -> (Vec<u64>, BinaryFileIndexInfo) {
        let mut store = BinaryDataStore::create(
            path,
            BinaryStoreOptions {
                compression,
                block_size: 64,
                resident_size: 128,
            },
        )
        .unwrap();
        let offsets = payloads.iter().map(|p| store.append(p).unwrap()).collect();
        (offsets, store.close().unwrap())
    }

    fn payloads() -> Vec<Vec<u8>> {
        (0..9u8).map(|i| vec![i; 20 + i as usize * 3]).collect()
    }

    #[test]
    fn compressed_payloads_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin.lz4");
        let payloads = payloads();
        let (offsets, info) = write_store(&path, Compression::Lz4, &payloads);

        let mut loader = BinaryDataLoader::open(&path, &info, Compression::Lz4).unwrap();
        assert_eq!(loader.block_count() as u64, info.block_count);
        // Read back to front so the transient slot gets replaced.
        for (p, &off) in payloads.iter().zip(&offsets).rev() {
            assert_eq!(loader.get(off, p.len()).unwrap(), &p[..]);
        }
    }

    #[test]
    fn uncompressed_payloads_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");
        let payloads = payloads();
        let (offsets, info) = write_store(&path, Compression::None, &payloads);

        let mut loader = BinaryDataLoader::open(&path, &info, Compression::None).unwrap();
        for (p, &off) in payloads.iter().zip(&offsets) {
            assert_eq!(loader.get(off, p.len()).unwrap(), &p[..]);
        }
    }

    #[test]
    fn reads_past_a_block_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.bin");
        let (_, info) = write_store(&path, Compression::None, &[vec![1; 16]]);
        let mut loader = BinaryDataLoader::open(&path, &info, Compression::None).unwrap();
        assert!(matches!(
            loader.get(8, 16),
            Err(CaptureError::OffsetOutOfRange { offset: 8, len: 16 })
        ));
        assert!(loader.get(640, 1).is_err());
    }
}
