//! LSM engine: one active memtable, immutable memtables awaiting flush, a
//! newest-first list of sstables, and two background workers (flush,
//! compaction) driven over bounded channels.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{bounded, Sender};
use lauradb_common::{metrics, Key, Result, StorageError};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::memtable::MemTable;
use crate::sstable::{self, SsTableReader};

const DEFAULT_MAX_MEMTABLE_SIZE: usize = 4 * 1024 * 1024;
const DEFAULT_INDEX_INTERVAL: usize = 100;
const DEFAULT_COMPACTION_THRESHOLD: usize = 4;

/// Tunables for an [`LsmEngine`], mirroring the `lsm` section of the
/// process-wide configuration.
#[derive(Debug, Clone)]
pub struct LsmOptions {
    pub dir: PathBuf,
    pub memtable_size: usize,
    pub index_interval: usize,
    pub compaction_threshold: usize,
}

impl Default for LsmOptions {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data/lsm"),
            memtable_size: DEFAULT_MAX_MEMTABLE_SIZE,
            index_interval: DEFAULT_INDEX_INTERVAL,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LsmStats {
    pub num_sstables: usize,
    pub num_immutable_memtables: usize,
    pub active_memtable_size: usize,
}

enum WorkerMsg {
    Flush(Arc<MemTable>),
    Tick,
    Shutdown,
}

struct Inner {
    options: LsmOptions,
    active: RwLock<Arc<MemTable>>,
    immutables: RwLock<Vec<Arc<MemTable>>>,
    sstables: RwLock<Vec<Arc<SsTableReader>>>,
    next_sstable_id: AtomicU64,
    closed: AtomicBool,
    flush_tx: Sender<WorkerMsg>,
    compaction_tx: Sender<WorkerMsg>,
}

/// The storage engine itself: memtable rotation, sstable reads, and the
/// flush/compaction workers that keep the sstable list bounded.
pub struct LsmEngine {
    inner: Arc<Inner>,
    flush_handle: Option<std::thread::JoinHandle<()>>,
    compaction_handle: Option<std::thread::JoinHandle<()>>,
}

impl LsmEngine {
    pub fn open(options: LsmOptions) -> Result<Self> {
        fs::create_dir_all(&options.dir)?;

        let mut sstables = Vec::new();
        let mut max_id = 0u64;
        for entry in fs::read_dir(&options.dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(id) = parse_sstable_id(name) {
                max_id = max_id.max(id);
                sstables.push((id, SsTableReader::open(&path)?));
            }
        }
        // newest-id-first
        sstables.sort_by(|a, b| b.0.cmp(&a.0));
        let sstables: Vec<Arc<SsTableReader>> =
            sstables.into_iter().map(|(_, r)| Arc::new(r)).collect();

        let (flush_tx, flush_rx) = bounded::<WorkerMsg>(64);
        let (compaction_tx, compaction_rx) = bounded::<WorkerMsg>(64);

        let inner = Arc::new(Inner {
            options: options.clone(),
            active: RwLock::new(Arc::new(MemTable::new())),
            immutables: RwLock::new(Vec::new()),
            sstables: RwLock::new(sstables),
            next_sstable_id: AtomicU64::new(max_id + 1),
            closed: AtomicBool::new(false),
            flush_tx,
            compaction_tx,
        });

        let flush_inner = inner.clone();
        let compaction_tx_for_flush = flush_inner.compaction_tx.clone();
        let flush_handle = std::thread::spawn(move || {
            flush_worker(flush_inner, flush_rx, compaction_tx_for_flush);
        });

        let compaction_inner = inner.clone();
        let compaction_handle = std::thread::spawn(move || {
            compaction_worker(compaction_inner, compaction_rx);
        });

        Ok(Self {
            inner,
            flush_handle: Some(flush_handle),
            compaction_handle: Some(compaction_handle),
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed.into());
        }
        Ok(())
    }

    pub fn put(&self, key: Key, value: Vec<u8>) -> Result<()> {
        self.check_open()?;
        let timestamp = now_nanos();
        let active = self.inner.active.read().clone();
        active.put(key, value, timestamp);
        self.maybe_rotate(active);
        Ok(())
    }

    pub fn delete(&self, key: Key) -> Result<()> {
        self.check_open()?;
        let timestamp = now_nanos();
        let active = self.inner.active.read().clone();
        active.delete(key, timestamp);
        self.maybe_rotate(active);
        Ok(())
    }

    /// active memtable → immutables (newest-first) → sstables (newest-first).
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_open()?;

        let active = self.inner.active.read().clone();
        if let Some(entry) = active.get(key) {
            return Ok(entry.value);
        }

        for imm in self.inner.immutables.read().iter().rev() {
            if let Some(entry) = imm.get(key) {
                return Ok(entry.value);
            }
        }

        for sst in self.inner.sstables.read().iter() {
            if let Some(entry) = sst.get(key)? {
                return Ok(entry.value);
            }
        }

        Ok(None)
    }

    fn maybe_rotate(&self, active: Arc<MemTable>) {
        if !active.is_full(self.inner.options.memtable_size) {
            return;
        }
        let mut active_lock = self.inner.active.write();
        // someone else may have rotated already
        if !Arc::ptr_eq(&active_lock, &active) {
            return;
        }
        let rotated = std::mem::replace(&mut *active_lock, Arc::new(MemTable::new()));
        drop(active_lock);

        self.inner.immutables.write().push(rotated.clone());
        debug!(size = rotated.approximate_size(), "rotated memtable");
        if self.inner.flush_tx.send(WorkerMsg::Flush(rotated)).is_err() {
            warn!("flush worker channel closed, memtable stays immutable until shutdown flush");
        }
    }

    pub fn stats(&self) -> LsmStats {
        LsmStats {
            num_sstables: self.inner.sstables.read().len(),
            num_immutable_memtables: self.inner.immutables.read().len(),
            active_memtable_size: self.inner.active.read().approximate_size(),
        }
    }

    /// Synchronously flushes the active memtable and any remaining
    /// immutables, used on shutdown.
    pub fn flush(&self) -> Result<()> {
        let mut active_lock = self.inner.active.write();
        let current = std::mem::replace(&mut *active_lock, Arc::new(MemTable::new()));
        drop(active_lock);
        if !current.is_empty() {
            self.inner.immutables.write().push(current);
        }

        let pending: Vec<Arc<MemTable>> = self.inner.immutables.write().drain(..).collect();
        for memtable in pending {
            flush_one(&self.inner, &memtable)?;
        }
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.flush()?;
        let _ = self.inner.flush_tx.send(WorkerMsg::Shutdown);
        let _ = self.inner.compaction_tx.send(WorkerMsg::Shutdown);
        if let Some(h) = self.flush_handle.take() {
            let _ = h.join();
        }
        if let Some(h) = self.compaction_handle.take() {
            let _ = h.join();
        }
        Ok(())
    }
}

impl Drop for LsmEngine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(error = %e, "error closing lsm engine");
        }
    }
}

fn now_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn parse_sstable_id(file_name: &str) -> Option<u64> {
    file_name
        .strip_prefix("sstable_")?
        .strip_suffix(".sst")?
        .parse()
        .ok()
}

fn flush_one(inner: &Arc<Inner>, memtable: &Arc<MemTable>) -> Result<()> {
    if memtable.is_empty() {
        inner.immutables.write().retain(|m| !Arc::ptr_eq(m, memtable));
        return Ok(());
    }

    let start = std::time::Instant::now();
    let id = inner.next_sstable_id.fetch_add(1, Ordering::SeqCst);
    let path = inner.options.dir.join(format!("sstable_{id}.sst"));
    let mut writer = sstable::SsTableWriter::create(&path, inner.options.index_interval, memtable.len())?;
    let mut count = 0u64;
    for (key, entry) in memtable.iter() {
        writer.add(&key, entry.value.as_deref(), entry.timestamp)?;
        count += 1;
    }
    let final_path = writer.finish()?;
    let reader = SsTableReader::open(&final_path)?;

    inner.sstables.write().insert(0, Arc::new(reader));
    inner.immutables.write().retain(|m| !Arc::ptr_eq(m, memtable));

    metrics::record_flush(count, start.elapsed().as_millis() as u64);
    info!(sstable_id = id, entries = count, "flushed memtable to sstable");

    if inner.sstables.read().len() > inner.options.compaction_threshold {
        let _ = inner.compaction_tx.send(WorkerMsg::Tick);
    }
    Ok(())
}

fn flush_worker(inner: Arc<Inner>, rx: crossbeam::channel::Receiver<WorkerMsg>, compaction_tx: Sender<WorkerMsg>) {
    for msg in rx {
        match msg {
            WorkerMsg::Flush(memtable) => {
                if let Err(e) = flush_one(&inner, &memtable) {
                    error!(error = %e, "flush failed, state left consistent");
                }
            }
            WorkerMsg::Tick => {
                let _ = compaction_tx.send(WorkerMsg::Tick);
            }
            WorkerMsg::Shutdown => return,
        }
    }
}

fn compaction_worker(inner: Arc<Inner>, rx: crossbeam::channel::Receiver<WorkerMsg>) {
    loop {
        match rx.recv_timeout(Duration::from_secs(5)) {
            Ok(WorkerMsg::Shutdown) => return,
            Ok(WorkerMsg::Tick) | Ok(WorkerMsg::Flush(_)) => run_compaction(&inner),
            Err(crossbeam::channel::RecvTimeoutError::Timeout) => run_compaction(&inner),
            Err(crossbeam::channel::RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn run_compaction(inner: &Arc<Inner>) {
    let threshold = inner.options.compaction_threshold;
    let (to_merge, is_oldest_level): (Vec<Arc<SsTableReader>>, bool) = {
        let sstables = inner.sstables.read();
        if sstables.len() <= threshold {
            return;
        }
        // oldest N: the tail of the newest-first list. That tail always
        // reaches the true oldest sstable, so this merge always covers the
        // oldest level and may drop tombstones.
        let start = sstables.len() - threshold;
        let to_merge = sstables[start..].to_vec();
        let is_oldest_level = start + to_merge.len() == sstables.len();
        (to_merge, is_oldest_level)
    };

    if to_merge.len() < 2 {
        return;
    }

    let start = std::time::Instant::now();
    let id = inner.next_sstable_id.fetch_add(1, Ordering::SeqCst);
    let path = inner.options.dir.join(format!("sstable_{id}.sst"));

    let readers: Vec<&SsTableReader> = to_merge.iter().map(Arc::as_ref).collect();
    let owned_readers: Vec<SsTableReader> = readers
        .iter()
        .map(|r| SsTableReader::open(r.path()))
        .collect::<Result<_>>()
        .unwrap_or_default();
    if owned_readers.len() != to_merge.len() {
        warn!("compaction aborted: could not reopen input sstables");
        return;
    }

    let merged = match sstable::merge(&owned_readers, &path, inner.options.index_interval, is_oldest_level) {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "compaction failed, state left consistent");
            return;
        }
    };

    let merged_path = match merged.finish() {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "compaction finalize failed");
            return;
        }
    };
    let merged_reader = match SsTableReader::open(&merged_path) {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to reopen compacted sstable");
            return;
        }
    };

    let stale_paths: Vec<PathBuf> = to_merge.iter().map(|r| r.path().to_path_buf()).collect();
    {
        let mut sstables = inner.sstables.write();
        sstables.retain(|s| !to_merge.iter().any(|m| Arc::ptr_eq(s, m)));
        sstables.push(Arc::new(merged_reader));
    }
    for stale in stale_paths {
        if let Err(e) = fs::remove_file(&stale) {
            warn!(error = %e, path = %stale.display(), "failed to remove compacted-away sstable");
        }
    }

    metrics::record_compaction(to_merge.len() as u64, start.elapsed().as_millis() as u64);
    info!(new_sstable_id = id, merged = to_merge.len(), "compaction complete");
}
