//! Property-based tests for allocator correctness
//!
//! Uses proptest to verify allocator invariants hold across many random
//! allocate/free sequences.

use proptest::prelude::*;
use spaceweave::{Config, HybridAllocator, SpaceWeaveError};

fn test_config() -> Config {
    Config {
        listen_addr: String::new(),
        max_idle_sec: 3600,
        unit_size: 4096,
        total_size: 1 << 30,
        small_block_ratio: 0.1,
        num_shards: 16,
        state_persistence_path: String::new(),
        backup_interval_sec: 300,
        backup_operation_threshold: 10_000,
        small_block_limit: 25_600,
    }
}

fn round_up(size: u64, unit: u64) -> u64 {
    (size + unit - 1) / unit * unit
}

proptest! {
    #[test]
    fn prop_addresses_aligned_and_in_bounds(
        sizes in prop::collection::vec(1u64..8 * 1024 * 1024, 1..40)
    ) {
        let cfg = test_config();
        let alloc = HybridAllocator::new(&cfg);

        let mut live = Vec::new();
        for size in sizes {
            match alloc.allocate(size) {
                Ok(addr) => {
                    prop_assert_eq!(addr % cfg.unit_size, 0, "address not unit-aligned");
                    prop_assert!(
                        addr + round_up(size, cfg.unit_size) <= cfg.total_size,
                        "allocation extends past capacity"
                    );
                    live.push((addr, size));
                }
                Err(SpaceWeaveError::OutOfSpace) => {}
                Err(err) => prop_assert!(false, "unexpected error: {err}"),
            }
        }

        for (addr, size) in live {
            alloc.free(addr, size).unwrap();
        }
        prop_assert_eq!(alloc.utilization(), 0.0);
    }

    #[test]
    fn prop_no_live_allocations_overlap(
        sizes in prop::collection::vec(1u64..4 * 1024 * 1024, 1..60)
    ) {
        let cfg = test_config();
        let alloc = HybridAllocator::new(&cfg);

        let mut live: Vec<(u64, u64)> = Vec::new();
        for size in sizes {
            if let Ok(addr) = alloc.allocate(size) {
                live.push((addr, round_up(size, cfg.unit_size)));
            }
        }

        live.sort_unstable();
        for pair in live.windows(2) {
            let (prev_addr, prev_len) = pair[0];
            let (next_addr, _) = pair[1];
            prop_assert!(
                prev_addr + prev_len <= next_addr,
                "allocations overlap: ({prev_addr}, {prev_len}) and {next_addr}"
            );
        }
    }

    #[test]
    fn prop_exact_reversal_restores_zero_utilization(
        ops in prop::collection::vec((1u64..2 * 1024 * 1024, any::<bool>()), 1..80)
    ) {
        let cfg = test_config();
        let alloc = HybridAllocator::new(&cfg);

        // Interleave allocations with frees of the most recent live block.
        let mut stack: Vec<(u64, u64)> = Vec::new();
        for (size, free_one) in ops {
            if free_one {
                if let Some((addr, size)) = stack.pop() {
                    alloc.free(addr, size).unwrap();
                }
            } else if let Ok(addr) = alloc.allocate(size) {
                stack.push((addr, size));
            }
        }

        while let Some((addr, size)) = stack.pop() {
            alloc.free(addr, size).unwrap();
        }
        prop_assert_eq!(alloc.utilization(), 0.0);
    }

    #[test]
    fn prop_units_are_conserved(
        sizes in prop::collection::vec(1u64..4 * 1024 * 1024, 1..50)
    ) {
        let cfg = test_config();
        let alloc = HybridAllocator::new(&cfg);

        let mut live_bytes = 0u64;
        for size in sizes {
            if let Ok(_addr) = alloc.allocate(size) {
                live_bytes += round_up(size, cfg.unit_size);
            }
        }

        let available =
            (alloc.bitmap().available() + alloc.freelist().available()) * cfg.unit_size;
        prop_assert_eq!(live_bytes + available, cfg.total_size);
    }

    #[test]
    fn prop_freelist_extents_never_overlap_or_touch(
        ops in prop::collection::vec((256u64..2048, any::<bool>()), 1..60)
    ) {
        let cfg = test_config();
        let alloc = HybridAllocator::new(&cfg);

        // All sizes here exceed the small threshold, driving the free-list.
        let mut stack: Vec<(u64, u64)> = Vec::new();
        for (units, free_one) in ops {
            let size = units * cfg.unit_size;
            if free_one {
                if let Some((addr, size)) = stack.pop() {
                    alloc.free(addr, size).unwrap();
                }
            } else if let Ok(addr) = alloc.allocate(size) {
                stack.push((addr, size));
            }

            let extents = alloc.freelist().extents();
            for pair in extents.windows(2) {
                prop_assert!(
                    pair[0].end() < pair[1].start,
                    "extents overlap or are adjacent: {:?} then {:?}",
                    pair[0],
                    pair[1]
                );
            }
        }
    }
}
