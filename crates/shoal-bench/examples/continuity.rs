//! End-to-end allocation continuity driver.
//!
//! Spawns producer threads that hammer a shared store, validates that the
//! union of returned logical indices is exactly `[0, total)`, times the
//! iteration and sort phases, then compares allocation wall-clock against
//! individually boxed records.

use std::time::Instant;

use shoal::MassStore;
use shoal_bench::{fill_concurrently, verify_dense, Record};

const THREADS: usize = 8;
const PER_THREAD: usize = 1_000_000;
/// The boxed baseline allocates 1/1000 of the volume; per-object heap
/// allocation at full volume would dominate the run.
const BOXED_PER_THREAD: usize = PER_THREAD / 1000;

fn main() {
    let total = THREADS * PER_THREAD;
    let mut store = MassStore::<Record>::new();

    println!("=== Shoal continuity driver ===\n");
    println!("is_lock_free = {}", store.is_lock_free());
    println!(
        "record size {} bytes, allocating {} records across {} threads ({:.1} MB)",
        std::mem::size_of::<Record>(),
        total,
        THREADS,
        (total * std::mem::size_of::<Record>()) as f64 / (1024.0 * 1024.0),
    );

    // --- Allocation phase ---
    let start = Instant::now();
    let index_sets = fill_concurrently(&store, THREADS, PER_THREAD);
    let fill_time = start.elapsed();
    println!(
        "allocated {} records in {:?} ({} blocks, {:.1} MB committed)",
        store.len(),
        fill_time,
        store.block_count(),
        store.memory_use() as f64 / (1024.0 * 1024.0),
    );

    print!("checking allocation continuity... ");
    match verify_dense(&index_sets, total) {
        Ok(()) => println!("ok"),
        Err(index) => {
            println!("FAILED at index {index}");
            std::process::exit(1);
        }
    }

    // --- Iteration phase ---
    let start = Instant::now();
    let key_sum: u64 = store.iter().map(|record| record.key).sum();
    println!(
        "iterated {} records in {:?} (key sum {})",
        total,
        start.elapsed(),
        key_sum,
    );

    // --- Sort phase ---
    let start = Instant::now();
    store.sort_unstable_by(|a, b| b.key.cmp(&a.key));
    println!("sorted {} records in {:?}", total, start.elapsed());

    let mut previous = u64::MAX;
    for record in store.iter() {
        assert!(record.key <= previous, "sort order violated");
        previous = record.key;
    }
    println!("sort order verified (descending by key)");

    // --- Reset phase ---
    let start = Instant::now();
    store.clear();
    println!("cleared store in {:?}\n", start.elapsed());

    // --- Boxed baseline ---
    let boxed_total = THREADS * BOXED_PER_THREAD;
    let start = Instant::now();
    std::thread::scope(|s| {
        for t in 0..THREADS {
            s.spawn(move || {
                let mut records = Vec::with_capacity(BOXED_PER_THREAD);
                for i in 0..BOXED_PER_THREAD {
                    records.push(Box::new(Record {
                        key: (t * BOXED_PER_THREAD + i) as u64,
                        weight: 0.0,
                    }));
                }
                records
            });
        }
    });
    println!(
        "boxed baseline: {} records (1/1000 volume) in {:?}",
        boxed_total,
        start.elapsed(),
    );
}
