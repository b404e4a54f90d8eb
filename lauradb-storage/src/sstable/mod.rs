//! Sorted on-disk tables: writer, reader, bloom filter, and N-way merge.

pub mod bloom;
pub mod reader;
pub mod writer;

pub use bloom::BloomFilter;
pub use reader::{SsTableEntry, SsTableReader};
pub use writer::SsTableWriter;

use std::path::Path;

use lauradb_common::Result;

/// Fence bytes terminating the trailer: ASCII "LSST".
pub const MAGIC: u32 = 0x4C53_5354;

/// Merges sstables into a single new sstable.
///
/// `readers` are ordered newest-first. For duplicate keys, the entry with
/// the highest timestamp wins (ties broken by recency in `readers`). When
/// `drop_tombstones` is set (merges reaching the oldest level), tombstones
/// are omitted from the output since no older value remains for them to
/// mask.
pub fn merge(
    readers: &[SsTableReader],
    out_path: &Path,
    index_interval: usize,
    drop_tombstones: bool,
) -> Result<SsTableWriter> {
    use std::collections::BTreeMap;

    // source index 0 = newest; lower index wins ties on timestamp.
    let mut winners: BTreeMap<Vec<u8>, (i64, usize, Option<Vec<u8>>)> = BTreeMap::new();
    for (source, reader) in readers.iter().enumerate() {
        for entry in reader.iter()? {
            let entry = entry?;
            winners
                .entry(entry.key)
                .and_modify(|(ts, src, val)| {
                    if entry.timestamp > *ts || (entry.timestamp == *ts && source < *src) {
                        *ts = entry.timestamp;
                        *src = source;
                        *val = entry.value.clone();
                    }
                })
                .or_insert((entry.timestamp, source, entry.value));
        }
    }

    let total_entries: u64 = readers.iter().map(SsTableReader::num_entries).sum();
    let mut writer = SsTableWriter::create(out_path, index_interval, total_entries as usize)?;
    for (key, (timestamp, _source, value)) in winners {
        if value.is_none() && drop_tombstones {
            continue;
        }
        writer.add(&key, value.as_deref(), timestamp)?;
    }
    Ok(writer)
}
