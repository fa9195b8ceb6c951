//! Allocation tiers for the managed address space
//!
//! The unit-granular space is split into a small-block prefix owned by a
//! sharded bitmap and a large-block suffix owned by an ordered free-list;
//! the hybrid allocator routes between the two.

pub mod bitmap;
pub mod freelist;
pub mod hybrid;

use crate::error::Result;

/// Byte-level allocation contract exposed to the service shell.
///
/// Addresses and sizes cross this boundary in bytes; everything behind it is
/// unit arithmetic.
pub trait SpaceAllocator: Send + Sync {
    /// Allocate a contiguous region of at least `size` bytes and return the
    /// byte address of its first byte.
    fn allocate(&self, size: u64) -> Result<u64>;

    /// Return a region previously handed out by [`allocate`](Self::allocate).
    fn free(&self, address: u64, size: u64) -> Result<()>;

    /// Fraction of the managed space currently allocated, in `[0, 1]`.
    fn utilization(&self) -> f64;
}
