//! # SpaceWeave - Disk-Space Allocator Service
//!
//! `spaceweave` is a pure bookkeeping engine over a flat byte address space
//! `[0, TOTAL_SIZE)`: clients request a contiguous region of at least N
//! bytes and get back a starting address; returning the `(address, size)`
//! pair frees it. No actual storage is touched.
//!
//! The space is unit-granular and split into two tiers:
//!
//! - a **small-block region** managed by a lock-striped [`ShardedBitmap`],
//! - a **large-block region** managed by a best-fit [`FreeList`] with
//!   merge-on-free coalescing.
//!
//! [`HybridAllocator`] routes requests between the tiers by size, handles
//! spillover when one tier runs dry, and keeps the operation counter the
//! [`persistence`] engine uses to drive background snapshots. The
//! [`service`] module wraps it all behind request validation and a small
//! wire codec for the TCP adapter in `src/bin/server.rs`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spaceweave::{Config, HybridAllocator, Result};
//!
//! # fn main() -> Result<()> {
//! let cfg = Config::from_env()?;
//! let allocator = HybridAllocator::new(&cfg);
//!
//! let address = allocator.allocate(4096)?;
//! allocator.free(address, 4096)?;
//! assert_eq!(allocator.utilization(), 0.0);
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod config;
pub mod error;
pub mod persistence;
pub mod service;

pub use crate::allocator::bitmap::ShardedBitmap;
pub use crate::allocator::freelist::{Extent, FreeList};
pub use crate::allocator::hybrid::{HybridAllocator, SMALL_ALLOC_THRESHOLD_UNITS};
pub use crate::allocator::SpaceAllocator;
pub use crate::config::Config;
pub use crate::error::{Result, SpaceWeaveError};
pub use crate::persistence::{load_state, save_state, BackupRunner, SnapshotState};
pub use crate::service::AllocatorService;
