//! SSTable writer: entries arrive in ascending key order and are streamed
//! straight to disk; the sparse index and bloom filter are built in memory
//! and emitted on finalize, followed by a trailer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use lauradb_common::Result;

use super::bloom::BloomFilter;
use super::MAGIC;

pub struct SsTableWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    out: BufWriter<File>,
    offset: u64,
    index_interval: usize,
    sparse_index: Vec<(Vec<u8>, u64)>,
    bloom: BloomFilter,
    entry_count: u64,
    last_key: Option<Vec<u8>>,
}

impl SsTableWriter {
    pub fn create(path: &Path, index_interval: usize, expected_entries: usize) -> Result<Self> {
        let tmp_path = path.with_extension("sst.tmp");
        let out = BufWriter::new(File::create(&tmp_path)?);
        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            out,
            offset: 0,
            index_interval: index_interval.max(1),
            sparse_index: Vec::new(),
            bloom: BloomFilter::new(expected_entries.max(1), 0.01),
            entry_count: 0,
            last_key: None,
        })
    }

    /// Appends one entry. Caller must supply keys in ascending order.
    pub fn add(&mut self, key: &[u8], value: Option<&[u8]>, timestamp: i64) -> Result<()> {
        if let Some(last) = &self.last_key {
            debug_assert!(last.as_slice() <= key, "sstable writer requires ascending keys");
        }

        if self.entry_count as usize % self.index_interval == 0 {
            self.sparse_index.push((key.to_vec(), self.offset));
        }
        self.bloom.add(key);

        let keylen = key.len() as u32;
        self.out.write_all(&keylen.to_le_bytes())?;
        self.out.write_all(key)?;
        let value_bytes = value.unwrap_or(&[]);
        let vallen = value_bytes.len() as u32;
        self.out.write_all(&vallen.to_le_bytes())?;
        self.out.write_all(value_bytes)?;
        self.out.write_all(&timestamp.to_le_bytes())?;
        let tombstone: u8 = u8::from(value.is_none());
        self.out.write_all(&[tombstone])?;

        self.offset += 4 + key.len() as u64 + 4 + value_bytes.len() as u64 + 8 + 1;
        self.entry_count += 1;
        self.last_key = Some(key.to_vec());
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// Writes the index, bloom filter, and trailer, then atomically renames
    /// the temp file into place.
    pub fn finish(mut self) -> Result<PathBuf> {
        let index_offset = self.offset;
        let mut cursor = index_offset + 4;
        self.out.write_all(&(self.sparse_index.len() as u32).to_le_bytes())?;
        for (key, offset) in &self.sparse_index {
            self.out.write_all(&(key.len() as u32).to_le_bytes())?;
            self.out.write_all(key)?;
            self.out.write_all(&offset.to_le_bytes())?;
            cursor += 4 + key.len() as u64 + 8;
        }

        let bloom_offset = cursor;
        self.out.write_all(&self.bloom.marshal())?;

        self.out.write_all(&index_offset.to_le_bytes())?;
        self.out.write_all(&bloom_offset.to_le_bytes())?;
        self.out.write_all(&self.entry_count.to_le_bytes())?;
        self.out.write_all(&MAGIC.to_le_bytes())?;
        self.out.flush()?;
        drop(self.out);

        std::fs::rename(&self.tmp_path, &self.path)?;
        Ok(self.path)
    }
}
