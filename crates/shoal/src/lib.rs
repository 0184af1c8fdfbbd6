//! Shoal: a concurrent bump-pointer object store.
//!
//! [`MassStore`] hands out freshly-zeroed, fixed-layout elements to any
//! number of producer threads with a single atomic fetch-and-increment in
//! the common case. Elements never move and are never freed individually;
//! the whole store resets at once, and the accumulated sequence is
//! addressable, iterable, and sortable afterwards.
//!
//! # Architecture
//!
//! ```text
//! MassStore<T>
//! ├── Cursor           — one AtomicU64: (block index << 32) | slot index
//! ├── spine            — fixed table of block pointers, filled append-only
//! ├── Block<T> × n     — zero-filled contiguous element storage
//! ├── Slot<'_, T>      — producer handle: &mut element + logical index
//! └── Iter / IterMut   — exclusive reader cursors over [0, len())
//! ```
//!
//! Claims race on the cursor. Exactly one claim per block boundary — the
//! one whose fetch-and-increment lands on the boundary value — becomes the
//! installer that allocates and publishes the next block; claims that land
//! past the boundary retry with a cooperative yield until the installer
//! publishes. The common case is one atomic increment and a comparison.
//!
//! # Example
//!
//! ```rust
//! use shoal::MassStore;
//!
//! let mut store = MassStore::<u64>::new();
//! std::thread::scope(|s| {
//!     for _ in 0..4 {
//!         s.spawn(|| {
//!             for _ in 0..1000 {
//!                 let mut slot = store.create_element().unwrap();
//!                 let index = slot.index() as u64;
//!                 *slot = index;
//!             }
//!         });
//!     }
//! });
//! assert_eq!(store.len(), 4000);
//! assert!(store.iter().enumerate().all(|(i, &v)| v == i as u64));
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod block;
mod cursor;

pub mod config;
pub mod error;
pub mod handle;
pub mod iter;
pub mod store;

pub use config::StoreConfig;
pub use error::StoreError;
pub use handle::Slot;
pub use iter::{Iter, IterMut};
pub use store::MassStore;
