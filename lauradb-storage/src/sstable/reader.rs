//! SSTable reader: bloom filter negative short-circuits, else binary search
//! the sparse index for the floor key and scan forward from there.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use lauradb_common::{Result, StorageError};

use super::bloom::BloomFilter;
use super::MAGIC;

struct Trailer {
    index_offset: u64,
    bloom_offset: u64,
    num_entries: u64,
}

const TRAILER_LEN: u64 = 8 + 8 + 8 + 4;

pub struct SsTableReader {
    path: PathBuf,
    file: std::sync::Mutex<File>,
    sparse_index: Vec<(Vec<u8>, u64)>,
    bloom: BloomFilter,
    num_entries: u64,
    entries_end: u64,
}

pub struct SsTableEntry {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub timestamp: i64,
}

impl SsTableReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < TRAILER_LEN {
            return Err(StorageError::CorruptData("file too small for trailer".into()).into());
        }

        file.seek(SeekFrom::Start(len - TRAILER_LEN))?;
        let mut trailer_buf = [0u8; TRAILER_LEN as usize];
        file.read_exact(&mut trailer_buf)?;
        let index_offset = u64::from_le_bytes(trailer_buf[0..8].try_into().unwrap());
        let bloom_offset = u64::from_le_bytes(trailer_buf[8..16].try_into().unwrap());
        let num_entries = u64::from_le_bytes(trailer_buf[16..24].try_into().unwrap());
        let magic = u32::from_le_bytes(trailer_buf[24..28].try_into().unwrap());
        if magic != MAGIC {
            return Err(StorageError::CorruptData("bad trailer magic".into()).into());
        }
        let trailer = Trailer {
            index_offset,
            bloom_offset,
            num_entries,
        };

        file.seek(SeekFrom::Start(trailer.index_offset))?;
        let mut count_buf = [0u8; 4];
        file.read_exact(&mut count_buf)?;
        let index_count = u32::from_le_bytes(count_buf);
        let mut sparse_index = Vec::with_capacity(index_count as usize);
        for _ in 0..index_count {
            let mut len_buf = [0u8; 4];
            file.read_exact(&mut len_buf)?;
            let keylen = u32::from_le_bytes(len_buf) as usize;
            let mut key = vec![0u8; keylen];
            file.read_exact(&mut key)?;
            let mut offset_buf = [0u8; 8];
            file.read_exact(&mut offset_buf)?;
            let offset = u64::from_le_bytes(offset_buf);
            sparse_index.push((key, offset));
        }

        let bloom_len = (len - TRAILER_LEN - trailer.bloom_offset) as usize;
        file.seek(SeekFrom::Start(trailer.bloom_offset))?;
        let mut bloom_buf = vec![0u8; bloom_len];
        file.read_exact(&mut bloom_buf)?;
        let bloom = BloomFilter::unmarshal(&bloom_buf)?;

        Ok(Self {
            path: path.to_path_buf(),
            file: std::sync::Mutex::new(file),
            sparse_index,
            bloom,
            num_entries: trailer.num_entries,
            entries_end: trailer.index_offset,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Floor search: the greatest indexed key ≤ target, or the start of the
    /// entries region if every indexed key is greater.
    fn floor_offset(&self, key: &[u8]) -> u64 {
        match self.sparse_index.partition_point(|(k, _)| k.as_slice() <= key) {
            0 => 0,
            n => self.sparse_index[n - 1].1,
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<SsTableEntry>> {
        if !self.bloom.contains(key) {
            return Ok(None);
        }

        let start = self.floor_offset(key);
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(start))?;
        let mut offset = start;
        while offset < self.entries_end {
            let (entry, next_offset) = read_entry(&mut *file)?;
            if entry.key.as_slice() == key {
                return Ok(Some(entry));
            }
            if entry.key.as_slice() > key {
                return Ok(None);
            }
            offset = next_offset;
        }
        Ok(None)
    }

    /// Sequential scan from the start of the entries region.
    pub fn iter(&self) -> Result<SsTableIter> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(SsTableIter {
            file,
            offset: 0,
            end: self.entries_end,
        })
    }
}

fn read_entry(file: &mut File) -> Result<(SsTableEntry, u64)> {
    let mut len_buf = [0u8; 4];
    file.read_exact(&mut len_buf)?;
    let keylen = u32::from_le_bytes(len_buf) as usize;
    let mut key = vec![0u8; keylen];
    file.read_exact(&mut key)?;

    let mut vallen_buf = [0u8; 4];
    file.read_exact(&mut vallen_buf)?;
    let vallen = u32::from_le_bytes(vallen_buf) as usize;
    let mut value = vec![0u8; vallen];
    file.read_exact(&mut value)?;

    let mut ts_buf = [0u8; 8];
    file.read_exact(&mut ts_buf)?;
    let timestamp = i64::from_le_bytes(ts_buf);

    let mut tomb_buf = [0u8; 1];
    file.read_exact(&mut tomb_buf)?;
    let deleted = tomb_buf[0] != 0;

    let consumed = 4 + keylen + 4 + vallen + 8 + 1;
    Ok((
        SsTableEntry {
            key,
            value: if deleted { None } else { Some(value) },
            timestamp,
        },
        consumed as u64,
    ))
}

pub struct SsTableIter {
    file: File,
    offset: u64,
    end: u64,
}

impl Iterator for SsTableIter {
    type Item = Result<SsTableEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }
        match read_entry(&mut self.file) {
            Ok((entry, consumed)) => {
                self.offset += consumed;
                Some(Ok(entry))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
