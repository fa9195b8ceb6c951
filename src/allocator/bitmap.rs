//! Sharded bitmap for the small-block tier
//!
//! Each bit tracks one allocation unit: 0 = free, 1 = allocated. The bit
//! domain is split evenly across shards, each with its own lock, so an
//! allocation scan holds at most one shard lock at a time.

use parking_lot::RwLock;
use tracing::warn;

use crate::error::{Result, SpaceWeaveError};

/// One lock-partition of the bitmap.
struct Shard {
    words: RwLock<Vec<u64>>,
}

/// Lock-striped bitmap over the bit domain `[0, total_bits)`.
///
/// Allocations are first-fit within a shard and never cross a shard
/// boundary; frees are computed from global bit indexes and may span shards.
pub struct ShardedBitmap {
    shards: Vec<Shard>,
    words_per_shard: usize,
}

impl ShardedBitmap {
    /// Create a bitmap covering `total_bits` units split across `num_shards`.
    ///
    /// `total_bits` must be a multiple of `num_shards * 64` so every shard
    /// owns a whole number of words; [`Config`](crate::config::Config)
    /// guarantees this for derived limits.
    pub fn new(total_bits: u64, num_shards: u64) -> Self {
        let words_per_shard = ((total_bits / 64) / num_shards) as usize;
        let shards = (0..num_shards)
            .map(|_| Shard {
                words: RwLock::new(vec![0u64; words_per_shard]),
            })
            .collect();
        ShardedBitmap {
            shards,
            words_per_shard,
        }
    }

    /// Number of bits owned by each shard.
    pub fn bits_per_shard(&self) -> u64 {
        self.words_per_shard as u64 * 64
    }

    /// Total number of bits tracked.
    pub fn total_bits(&self) -> u64 {
        self.shards.len() as u64 * self.bits_per_shard()
    }

    /// Allocate `units` consecutive bits and return the global index of the
    /// first one, or `None` when no shard holds a long-enough run.
    ///
    /// The scan visits shards in circular order from a random starting shard
    /// to spread contention. A run must fit inside a single shard, so
    /// requests larger than [`bits_per_shard`](Self::bits_per_shard) always
    /// fail on this tier.
    pub fn allocate(&self, units: u64) -> Option<u64> {
        if units == 0 || units > self.bits_per_shard() {
            return None;
        }

        let shard_count = self.shards.len() as u64;
        let start_shard = rand::random::<u64>() % shard_count;

        for i in 0..shard_count {
            let shard_index = (start_shard + i) % shard_count;
            let mut words = self.shards[shard_index as usize].words.write();
            if let Some(start) = allocate_in_shard(&mut words, units) {
                return Some(shard_index * self.bits_per_shard() + start);
            }
        }
        None
    }

    /// Clear `units` bits starting at global bit index `start`.
    ///
    /// Idempotent at the bit level: clearing already-zero bits succeeds
    /// silently. Ranges past the end of the bitmap are clipped with a
    /// warning.
    pub fn free(&self, start: u64, units: u64) {
        let bits_per_shard = self.bits_per_shard();
        if bits_per_shard == 0 {
            return;
        }

        let mut bit = start;
        let mut remaining = units;
        while remaining > 0 {
            let shard_index = (bit / bits_per_shard) as usize;
            let Some(shard) = self.shards.get(shard_index) else {
                warn!(start, units, "free range extends past the bitmap, dropping tail");
                return;
            };
            let local = bit % bits_per_shard;
            let span = remaining.min(bits_per_shard - local);

            let mut words = shard.words.write();
            clear_range(&mut words, local, span);

            bit += span;
            remaining -= span;
        }
    }

    /// Count free bits across all shards.
    ///
    /// Takes each shard's read lock in turn; monitoring-grade, not hot-path.
    pub fn available(&self) -> u64 {
        self.shards
            .iter()
            .map(|shard| {
                let words = shard.words.read();
                words.iter().map(|w| 64 - u64::from(w.count_ones())).sum::<u64>()
            })
            .sum()
    }

    /// Copy out the raw words of every shard, in shard order.
    pub fn snapshot_words(&self) -> Vec<Vec<u64>> {
        self.shards
            .iter()
            .map(|shard| shard.words.read().clone())
            .collect()
    }

    /// Overwrite shard words from a snapshot.
    ///
    /// Fails when the snapshot's shard count or per-shard word count does not
    /// match the current layout.
    pub fn restore_words(&self, words: &[Vec<u64>]) -> Result<()> {
        if words.len() != self.shards.len() {
            return Err(SpaceWeaveError::SnapshotMismatch(format!(
                "snapshot has {} bitmap shards, configuration expects {}",
                words.len(),
                self.shards.len()
            )));
        }
        for (index, saved) in words.iter().enumerate() {
            if saved.len() != self.words_per_shard {
                return Err(SpaceWeaveError::SnapshotMismatch(format!(
                    "shard {} has {} words, configuration expects {}",
                    index,
                    saved.len(),
                    self.words_per_shard
                )));
            }
        }
        for (shard, saved) in self.shards.iter().zip(words) {
            shard.words.write().copy_from_slice(saved);
        }
        Ok(())
    }
}

/// First-fit scan for a run of `units` zero bits; marks and returns the
/// shard-local start on success.
fn allocate_in_shard(words: &mut [u64], units: u64) -> Option<u64> {
    let mut run = 0u64;
    let mut start = 0u64;

    for (word_index, &word) in words.iter().enumerate() {
        if word == u64::MAX {
            run = 0;
            continue;
        }
        for bit in 0..64u64 {
            if word & (1u64 << bit) == 0 {
                if run == 0 {
                    start = word_index as u64 * 64 + bit;
                }
                run += 1;
                if run == units {
                    set_range(words, start, units);
                    return Some(start);
                }
            } else {
                run = 0;
            }
        }
    }
    None
}

fn set_range(words: &mut [u64], mut bit: u64, mut count: u64) {
    while count > 0 {
        let word = (bit / 64) as usize;
        let offset = bit % 64;
        let span = count.min(64 - offset);
        words[word] |= range_mask(offset, span);
        bit += span;
        count -= span;
    }
}

fn clear_range(words: &mut [u64], mut bit: u64, mut count: u64) {
    while count > 0 {
        let word = (bit / 64) as usize;
        let offset = bit % 64;
        let span = count.min(64 - offset);
        words[word] &= !range_mask(offset, span);
        bit += span;
        count -= span;
    }
}

fn range_mask(offset: u64, span: u64) -> u64 {
    if span == 64 {
        u64::MAX
    } else {
        ((1u64 << span) - 1) << offset
    }
}
