//! Ordered free-list for the large-block tier
//!
//! Free extents are indexed twice under one lock: by starting offset for
//! neighbour lookups when coalescing, and by `(length, offset)` for best-fit
//! search. Both indices always describe the same extent set. Offsets are
//! local to the large-block region.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SpaceWeaveError};

/// A contiguous run of free units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    /// First unit of the run, local to the large-block region.
    pub start: u64,
    /// Number of units in the run.
    pub length: u64,
}

impl Extent {
    pub fn new(start: u64, length: u64) -> Self {
        Extent { start, length }
    }

    /// One past the last unit of the run.
    pub fn end(&self) -> u64 {
        self.start + self.length
    }

    /// True when `other` begins exactly where this extent ends, or vice versa.
    pub fn is_adjacent(&self, other: &Extent) -> bool {
        self.end() == other.start || other.end() == self.start
    }
}

#[derive(Default)]
struct Indexes {
    by_start: BTreeMap<u64, u64>,
    by_size: BTreeSet<(u64, u64)>,
    free_units: u64,
}

impl Indexes {
    fn insert(&mut self, start: u64, length: u64) {
        self.by_start.insert(start, length);
        self.by_size.insert((length, start));
    }

    fn remove(&mut self, start: u64, length: u64) {
        self.by_start.remove(&start);
        self.by_size.remove(&(length, start));
    }
}

/// Best-fit extent allocator with merge-on-free coalescing.
pub struct FreeList {
    inner: RwLock<Indexes>,
    region_units: u64,
}

impl FreeList {
    /// Create a free-list covering `region_units` units as one extent.
    pub fn new(region_units: u64) -> Self {
        let mut inner = Indexes::default();
        if region_units > 0 {
            inner.insert(0, region_units);
            inner.free_units = region_units;
        }
        FreeList {
            inner: RwLock::new(inner),
            region_units,
        }
    }

    /// Rebuild a free-list from an ascending-offset extent list, as produced
    /// by [`extents`](Self::extents). Overlapping, unsorted, or out-of-range
    /// extents are a snapshot-shape error.
    pub fn from_extents(region_units: u64, extents: &[Extent]) -> Result<Self> {
        let mut inner = Indexes::default();
        let mut prev_end = 0u64;
        for (index, extent) in extents.iter().enumerate() {
            if extent.length == 0 {
                return Err(SpaceWeaveError::SnapshotMismatch(format!(
                    "extent {index} has zero length"
                )));
            }
            if extent.start < prev_end {
                return Err(SpaceWeaveError::SnapshotMismatch(format!(
                    "extent {index} overlaps its predecessor"
                )));
            }
            let end = extent.start.checked_add(extent.length).ok_or_else(|| {
                SpaceWeaveError::SnapshotMismatch(format!("extent {index} overflows"))
            })?;
            if end > region_units {
                return Err(SpaceWeaveError::SnapshotMismatch(format!(
                    "extent {index} extends past the region ({end} > {region_units})"
                )));
            }
            inner.insert(extent.start, extent.length);
            inner.free_units += extent.length;
            prev_end = end;
        }
        Ok(FreeList {
            inner: RwLock::new(inner),
            region_units,
        })
    }

    /// Total units covered by the region, free or not.
    pub fn region_units(&self) -> u64 {
        self.region_units
    }

    /// Allocate `units` from the smallest extent that fits, splitting off the
    /// remainder. Ties between equal-length extents resolve to the lowest
    /// offset. Returns the region-local start, or `None`.
    pub fn allocate(&self, units: u64) -> Option<u64> {
        if units == 0 {
            return None;
        }
        let mut inner = self.inner.write();
        if inner.free_units < units {
            return None;
        }

        let best = inner.by_size.range((units, 0)..).next().copied();
        let (length, start) = best?;

        inner.remove(start, length);
        if length > units {
            inner.insert(start + units, length - units);
        }
        inner.free_units -= units;
        Some(start)
    }

    /// Return `units` starting at region-local `start`, coalescing with both
    /// neighbours.
    ///
    /// A range that overlaps an existing free extent or falls outside the
    /// region is logged and dropped rather than inserted; the no-overlap
    /// invariant stays intact and the caller sees no error, matching the
    /// free contract.
    pub fn free(&self, start: u64, units: u64) {
        if units == 0 {
            return;
        }
        let mut inner = self.inner.write();

        if start + units > self.region_units {
            warn!(start, units, "free range outside the region, ignoring");
            return;
        }
        if let Some((&prev_start, &prev_length)) = inner.by_start.range(..=start).next_back() {
            if prev_start + prev_length > start {
                warn!(start, units, "free overlaps an existing free extent, ignoring");
                return;
            }
        }
        if let Some((&next_start, _)) = inner.by_start.range(start..).next() {
            if start + units > next_start {
                warn!(start, units, "free overlaps an existing free extent, ignoring");
                return;
            }
        }

        let mut merged_start = start;
        let mut merged_length = units;

        let prev = inner
            .by_start
            .range(..start)
            .next_back()
            .map(|(&s, &l)| (s, l));
        if let Some((prev_start, prev_length)) = prev {
            if prev_start + prev_length == start {
                inner.remove(prev_start, prev_length);
                merged_start = prev_start;
                merged_length += prev_length;
            }
        }

        let next = inner
            .by_start
            .range(start + units..)
            .next()
            .map(|(&s, &l)| (s, l));
        if let Some((next_start, next_length)) = next {
            if start + units == next_start {
                inner.remove(next_start, next_length);
                merged_length += next_length;
            }
        }

        inner.insert(merged_start, merged_length);
        inner.free_units += units;
    }

    /// Merge any adjacent extents and rebuild both indices.
    ///
    /// A no-op whenever the coalescing invariant already holds; it exists as
    /// a salvage pass for the hybrid router's spillover path and as a manual
    /// operation.
    pub fn defragment(&self) {
        let mut inner = self.inner.write();
        let extents: Vec<(u64, u64)> = inner.by_start.iter().map(|(&s, &l)| (s, l)).collect();
        if extents.len() < 2 {
            return;
        }

        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(extents.len());
        let (mut current_start, mut current_length) = extents[0];
        for &(start, length) in &extents[1..] {
            if current_start + current_length == start {
                current_length += length;
            } else {
                merged.push((current_start, current_length));
                current_start = start;
                current_length = length;
            }
        }
        merged.push((current_start, current_length));

        if merged.len() == extents.len() {
            return;
        }
        inner.by_start.clear();
        inner.by_size.clear();
        for (start, length) in merged {
            inner.insert(start, length);
        }
    }

    /// Free units currently in the region.
    pub fn available(&self) -> u64 {
        self.inner.read().free_units
    }

    /// All free extents in ascending-offset order.
    pub fn extents(&self) -> Vec<Extent> {
        self.inner
            .read()
            .by_start
            .iter()
            .map(|(&start, &length)| Extent::new(start, length))
            .collect()
    }
}
