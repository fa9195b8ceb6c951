//! Concurrent allocate/free stress tests

use std::sync::Arc;

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

#[test]
fn test_concurrent_allocations_never_overlap() {
    let cfg = test_config();
    let alloc = Arc::new(HybridAllocator::new(&cfg));

    // Mixed small/large sizes; each thread frees half of what it takes and
    // returns the rest.
    let handles: Vec<_> = (0..8)
        .map(|thread_id| {
            let alloc = Arc::clone(&alloc);
            std::thread::spawn(move || {
                let mut live = Vec::new();
                for i in 0..200 {
                    let size = match (thread_id + i) % 4 {
                        0 => 4096,
                        1 => 10 * 4096,
                        2 => 64 * 4096,
                        _ => 512 * 1024,
                    };
                    match alloc.allocate(size) {
                        Ok(addr) => live.push((addr, size)),
                        Err(SpaceWeaveError::OutOfSpace) => {}
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                    if i % 2 == 0 {
                        if let Some((addr, size)) = live.pop() {
                            alloc.free(addr, size).unwrap();
                        }
                    }
                }
                live
            })
        })
        .collect();

    let mut live: Vec<(u64, u64)> = Vec::new();
    for handle in handles {
        live.extend(handle.join().unwrap());
    }

    // No two live allocations may overlap.
    let unit = cfg.unit_size;
    let mut rounded: Vec<(u64, u64)> = live
        .iter()
        .map(|&(addr, size)| (addr, (size + unit - 1) / unit * unit))
        .collect();
    rounded.sort_unstable();
    for pair in rounded.windows(2) {
        assert!(
            pair[0].0 + pair[0].1 <= pair[1].0,
            "overlapping allocations: {:?} and {:?}",
            pair[0],
            pair[1]
        );
    }

    for (addr, size) in live {
        alloc.free(addr, size).unwrap();
    }
    assert_eq!(alloc.utilization(), 0.0);
}

#[test]
fn test_utilization_readers_alongside_writers() {
    let cfg = test_config();
    let alloc = Arc::new(HybridAllocator::new(&cfg));

    let writers: Vec<_> = (0..4)
        .map(|_| {
            let alloc = Arc::clone(&alloc);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    if let Ok(addr) = alloc.allocate(1024 * 1024) {
                        alloc.free(addr, 1024 * 1024).unwrap();
                    }
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let alloc = Arc::clone(&alloc);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let utilization = alloc.utilization();
                    assert!((0.0..=1.0).contains(&utilization));
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }
    assert_eq!(alloc.utilization(), 0.0);
}

#[test]
fn test_contended_small_tier() {
    let cfg = test_config();
    let alloc = Arc::new(HybridAllocator::new(&cfg));

    // Hammer the bitmap tier from many threads; every thread reverses its
    // own allocations, so the end state must be empty.
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let alloc = Arc::clone(&alloc);
            std::thread::spawn(move || {
                for _ in 0..300 {
                    let addr = alloc.allocate(3 * 4096).unwrap();
                    alloc.free(addr, 3 * 4096).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(alloc.utilization(), 0.0);
}
