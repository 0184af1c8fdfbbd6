//! Shared driver vocabulary for the shoal benchmarks and examples.
//!
//! Provides the record element type, a concurrent fill helper, and the
//! dense-index verifier used by the criterion benches and the
//! `continuity` example.

#![deny(rustdoc::broken_intra_doc_links)]

use bytemuck::Zeroable;
use crossbeam_channel::unbounded;
use shoal::MassStore;
use std::thread;

/// The benchmark element: the shape of a typical small record payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Zeroable)]
#[repr(C)]
pub struct Record {
    /// Sort and validation key.
    pub key: u64,
    /// Payload field.
    pub weight: f64,
}

/// Fill `store` from `threads` producers, `per_thread` claims each.
///
/// Each producer records every logical index it claims and sends its
/// vector over a channel once done; the result collects the vectors in
/// arrival order.
pub fn fill_concurrently(
    store: &MassStore<Record>,
    threads: usize,
    per_thread: usize,
) -> Vec<Vec<usize>> {
    let (sender, receiver) = unbounded();
    thread::scope(|s| {
        for t in 0..threads {
            let sender = sender.clone();
            s.spawn(move || {
                let mut indices = Vec::with_capacity(per_thread);
                for i in 0..per_thread {
                    let mut slot = store.create_element().expect("store allocation failed");
                    slot.key = (t * per_thread + i) as u64;
                    indices.push(slot.index());
                }
                sender.send(indices).expect("result channel closed");
            });
        }
        drop(sender);
        receiver.iter().collect()
    })
}

/// Check that `index_sets` together claim exactly `[0, expected)`.
///
/// Returns `Err` with the first out-of-range, duplicated, or missing
/// index.
pub fn verify_dense(index_sets: &[Vec<usize>], expected: usize) -> Result<(), usize> {
    let mut seen = vec![false; expected];
    for set in index_sets {
        for &index in set {
            if index >= expected || seen[index] {
                return Err(index);
            }
            seen[index] = true;
        }
    }
    match seen.iter().position(|&claimed| !claimed) {
        Some(hole) => Err(hole),
        None => Ok(()),
    }
}
