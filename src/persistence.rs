//! Snapshot persistence for allocator state
//!
//! A snapshot captures the raw words of every bitmap shard plus the
//! free-list's extent set. Each tier is read-locked independently while it
//! is captured, so the snapshot is recovery-point consistent rather than
//! transactional across tiers; it only bootstraps a restart.
//!
//! The background runner writes a snapshot whenever the allocator's
//! operation counter or the elapsed time crosses its configured threshold.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::allocator::bitmap::ShardedBitmap;
use crate::allocator::freelist::{Extent, FreeList};
use crate::allocator::hybrid::HybridAllocator;
use crate::config::Config;
use crate::error::Result;

/// How often the background runner re-checks its triggers.
const TICK: Duration = Duration::from_secs(1);

/// On-disk snapshot shape.
///
/// The encoding is an implementation detail with no external compatibility
/// contract; a shape mismatch at load time is a fatal configuration error.
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotState {
    /// Raw 64-bit words of every bitmap shard, in shard order.
    pub bitmaps: Vec<Vec<u64>>,
    /// Free extents in ascending-offset order, local to the large region.
    pub extents: Vec<Extent>,
}

/// Capture the allocator's state and write it to `path`.
///
/// Parent directories are created as needed. Writers on a tier wait while
/// that tier is being captured; readers do not.
pub fn save_state(allocator: &HybridAllocator, path: &Path) -> Result<()> {
    let state = SnapshotState {
        bitmaps: allocator.bitmap().snapshot_words(),
        extents: allocator.freelist().extents(),
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &state)?;
    writer.flush()?;
    Ok(())
}

/// Build the allocator for startup: restored from the configured snapshot
/// file when one exists, fresh otherwise.
///
/// An absent or empty snapshot file yields a fresh state. A snapshot that
/// cannot be decoded, or whose shard layout or extent set does not match the
/// configuration, is a fatal error.
pub fn load_state(cfg: &Config) -> Result<HybridAllocator> {
    if cfg.state_persistence_path.is_empty() {
        return Ok(HybridAllocator::new(cfg));
    }
    let path = Path::new(&cfg.state_persistence_path);
    if !path.exists() {
        return Ok(HybridAllocator::new(cfg));
    }
    if fs::metadata(path)?.len() == 0 {
        return Ok(HybridAllocator::new(cfg));
    }

    let file = File::open(path)?;
    let state: SnapshotState = serde_json::from_reader(BufReader::new(file))?;
    from_snapshot(cfg, &state)
}

/// Rebuild an allocator from a decoded snapshot.
pub fn from_snapshot(cfg: &Config, state: &SnapshotState) -> Result<HybridAllocator> {
    let bitmap = ShardedBitmap::new(cfg.small_block_limit, cfg.num_shards);
    bitmap.restore_words(&state.bitmaps)?;
    let freelist = FreeList::from_extents(cfg.large_region_units(), &state.extents)?;
    Ok(HybridAllocator::with_parts(cfg, bitmap, freelist))
}

/// Background snapshot thread.
///
/// Ticks once per second; snapshots when the operation counter reaches
/// `backup_operation_threshold` or `backup_interval_sec` has elapsed since
/// the last snapshot. Write failures are logged and retried on the next
/// tick. [`stop`](Self::stop) joins the thread and takes a final snapshot.
pub struct BackupRunner {
    allocator: Arc<HybridAllocator>,
    path: PathBuf,
    interval: Duration,
    op_threshold: u64,
    running: Arc<Mutex<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl BackupRunner {
    pub fn new(allocator: Arc<HybridAllocator>, cfg: &Config) -> Self {
        BackupRunner {
            allocator,
            path: PathBuf::from(&cfg.state_persistence_path),
            interval: Duration::from_secs(cfg.backup_interval_sec),
            op_threshold: cfg.backup_operation_threshold,
            running: Arc::new(Mutex::new(false)),
            handle: None,
        }
    }

    pub fn start(&mut self) {
        *self.running.lock() = true;

        let allocator = Arc::clone(&self.allocator);
        let path = self.path.clone();
        let interval = self.interval;
        let op_threshold = self.op_threshold;
        let running = Arc::clone(&self.running);

        self.handle = Some(thread::spawn(move || {
            let mut last_snapshot = Instant::now();
            while *running.lock() {
                thread::sleep(TICK);
                if !*running.lock() {
                    break;
                }

                let due_by_ops = allocator.ops_since_snapshot() >= op_threshold;
                let due_by_time = last_snapshot.elapsed() >= interval;
                if !due_by_ops && !due_by_time {
                    continue;
                }

                match save_state(&allocator, &path) {
                    Ok(()) => {
                        allocator.reset_op_counter();
                        last_snapshot = Instant::now();
                        debug!(path = %path.display(), "snapshot written");
                    }
                    Err(err) => warn!(%err, "snapshot write failed, retrying next tick"),
                }
            }
        }));
    }

    /// Stop the background thread and take a final snapshot.
    pub fn stop(&mut self) {
        *self.running.lock() = false;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        match save_state(&self.allocator, &self.path) {
            Ok(()) => info!(path = %self.path.display(), "final snapshot written"),
            Err(err) => warn!(%err, "final snapshot failed"),
        }
    }
}

impl Drop for BackupRunner {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}
