//! Hybrid allocator routing requests between the two tiers
//!
//! Requests at or below the small threshold go to the bitmap first;
//! everything else is served from the free-list, with spillover in both
//! directions when a tier runs dry. Addresses and sizes cross the API in
//! bytes; all internal arithmetic is in units.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::allocator::bitmap::ShardedBitmap;
use crate::allocator::freelist::FreeList;
use crate::allocator::SpaceAllocator;
use crate::config::Config;
use crate::error::{Result, SpaceWeaveError};

/// Unit-count boundary between the tiers: 64 units = 256 KiB at 4 KiB units.
pub const SMALL_ALLOC_THRESHOLD_UNITS: u64 = 64;

/// Two-tier allocator over the unit domain `[0, total_units)`.
///
/// Units `[0, small_block_limit)` belong to the bitmap; the free-list owns
/// the rest, internally indexed from zero. The router holds no locks of its
/// own; each tier call is atomic and there is no linearization across tiers.
pub struct HybridAllocator {
    bitmap: ShardedBitmap,
    freelist: FreeList,
    unit_size: u64,
    total_size: u64,
    small_block_limit: u64,
    op_counter: AtomicU64,
}

impl HybridAllocator {
    /// Create an empty allocator for the configured address space.
    pub fn new(cfg: &Config) -> Self {
        HybridAllocator::with_parts(
            cfg,
            ShardedBitmap::new(cfg.small_block_limit, cfg.num_shards),
            FreeList::new(cfg.large_region_units()),
        )
    }

    /// Assemble an allocator around restored tier state.
    pub(crate) fn with_parts(cfg: &Config, bitmap: ShardedBitmap, freelist: FreeList) -> Self {
        HybridAllocator {
            bitmap,
            freelist,
            unit_size: cfg.unit_size,
            total_size: cfg.total_size,
            small_block_limit: cfg.small_block_limit,
            op_counter: AtomicU64::new(0),
        }
    }

    /// Allocate at least `size` bytes and return the starting byte address.
    ///
    /// Routing: small requests try the bitmap first, then the free-list;
    /// if the free-list is too fragmented a defragmentation pass is run and
    /// the free-list retried; last comes the bitmap fallback, which can only
    /// serve requests no larger than one shard's bit count — above that the
    /// bitmap refuses the run and the whole request is `OutOfSpace`.
    pub fn allocate(&self, size: u64) -> Result<u64> {
        let units = size.div_ceil(self.unit_size);

        if units <= SMALL_ALLOC_THRESHOLD_UNITS {
            if let Some(bit) = self.bitmap.allocate(units) {
                self.note_mutation();
                return Ok(bit * self.unit_size);
            }
        }

        if let Some(offset) = self.freelist.allocate(units) {
            self.note_mutation();
            return Ok((offset + self.small_block_limit) * self.unit_size);
        }

        self.freelist.defragment();
        if let Some(offset) = self.freelist.allocate(units) {
            self.note_mutation();
            return Ok((offset + self.small_block_limit) * self.unit_size);
        }

        if let Some(bit) = self.bitmap.allocate(units) {
            self.note_mutation();
            return Ok(bit * self.unit_size);
        }

        Err(SpaceWeaveError::OutOfSpace)
    }

    /// Return a previously allocated region.
    ///
    /// The freed range may straddle the tier boundary: the bitmap part is
    /// clipped off first and the remainder goes to the free-list. Double
    /// frees are absorbed by the tiers and never surface as errors.
    pub fn free(&self, address: u64, size: u64) -> Result<()> {
        let mut start = address / self.unit_size;
        let mut units = size.div_ceil(self.unit_size);
        if units == 0 {
            return Ok(());
        }

        if start < self.small_block_limit {
            let span = units.min(self.small_block_limit - start);
            self.bitmap.free(start, span);
            start += span;
            units -= span;
        }
        if units > 0 {
            self.freelist.free(start - self.small_block_limit, units);
        }

        self.note_mutation();
        Ok(())
    }

    /// Fraction of the managed space currently allocated.
    ///
    /// Reads both tiers without cross-tier atomicity; monitoring-grade.
    pub fn utilization(&self) -> f64 {
        let available = (self.bitmap.available() + self.freelist.available()) * self.unit_size;
        let used = self.total_size - available;
        used as f64 / self.total_size as f64
    }

    /// Mutating operations since the counter was last reset.
    pub fn ops_since_snapshot(&self) -> u64 {
        self.op_counter.load(Ordering::Relaxed)
    }

    pub fn reset_op_counter(&self) {
        self.op_counter.store(0, Ordering::Relaxed);
    }

    fn note_mutation(&self) {
        self.op_counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unit_size(&self) -> u64 {
        self.unit_size
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn small_block_limit(&self) -> u64 {
        self.small_block_limit
    }

    pub fn bitmap(&self) -> &ShardedBitmap {
        &self.bitmap
    }

    pub fn freelist(&self) -> &FreeList {
        &self.freelist
    }
}

impl SpaceAllocator for HybridAllocator {
    fn allocate(&self, size: u64) -> Result<u64> {
        HybridAllocator::allocate(self, size)
    }

    fn free(&self, address: u64, size: u64) -> Result<()> {
        HybridAllocator::free(self, address, size)
    }

    fn utilization(&self) -> f64 {
        HybridAllocator::utilization(self)
    }
}
