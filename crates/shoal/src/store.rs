//! The concurrent object store and its allocation protocol.
//!
//! [`MassStore`] hands out freshly-zeroed elements through a single packed
//! atomic cursor. A claim is one fetch-and-increment; the decoded
//! pre-increment value selects one of three paths:
//!
//! - **fast** (`slot < block_capacity`): the slot's block is already
//!   published — return a pointer into it.
//! - **installer** (`slot == block_capacity`): this claim crossed the block
//!   boundary. Allocate the next zero-filled block, publish it into the
//!   block table, then republish the cursor at `(new block, 1)`, keeping
//!   slot 0 for this claim. Exactly one claim per boundary can observe the
//!   crossing value, so installation needs no lock.
//! - **spin** (`slot > block_capacity`): the boundary was crossed by
//!   another claim that has not published yet. Retry the
//!   fetch-and-increment, yielding between attempts.
//!
//! The block table is a fixed-length spine of `AtomicPtr` entries allocated
//! at construction, so installers never reallocate structure that
//! concurrent claims are reading. Element reads require `&mut self`: the
//! borrow checker, not documentation, rules out reader/producer races.

use std::alloc::Layout;
use std::cmp;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Range;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};
use std::thread;

use bytemuck::Zeroable;

use crate::block::Block;
use crate::config::StoreConfig;
use crate::cursor::Cursor;
use crate::error::StoreError;
use crate::handle::Slot;
use crate::iter::{Iter, IterMut};

/// A concurrent bump-pointer object store.
///
/// Any number of threads may call [`create_element`](MassStore::create_element)
/// on a shared reference; each call claims a distinct, freshly-zeroed
/// element with a dense logical index. Elements never move and are never
/// freed individually — the whole store releases its memory at once in
/// [`clear`](MassStore::clear) or on drop.
///
/// The element type must be plain old data: [`Zeroable`] (an all-zero bit
/// pattern is a valid value) and without a `Drop` impl — element
/// destructors are never run.
///
/// Producers typically borrow the store shared inside
/// [`std::thread::scope`]; once the scope joins, the owner regains
/// exclusive access for iteration, indexing, and sorting.
pub struct MassStore<T> {
    /// Fixed block-pointer table. Null entries are not-yet-installed blocks.
    spine: Box<[AtomicPtr<T>]>,
    /// Number of published blocks. Written only by installers.
    installed: AtomicU32,
    /// The packed allocation cursor.
    cursor: Cursor,
    /// Set by an installer that could not publish its block.
    poisoned: AtomicBool,
    block_capacity: u32,
    /// The store owns the `T` values stored in its blocks.
    _marker: PhantomData<T>,
}

// SAFETY: the store exclusively owns its blocks and the elements in them;
// sending the store sends the elements.
unsafe impl<T: Send> Send for MassStore<T> {}

// SAFETY: `create_element(&self)` hands `&mut T` to the calling thread
// (requires `T: Send`), and the unchecked accessors may expose `&T` from
// any thread holding the documented exclusivity (requires `T: Sync`).
unsafe impl<T: Send + Sync> Sync for MassStore<T> {}

// Compile-time assertion: MassStore must be Send + Sync for POD elements.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<MassStore<u64>>();
};

impl<T: Zeroable> MassStore<T> {
    /// Create a store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::new()).expect("default store configuration is valid")
    }

    /// Create a store with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] if the configuration fails
    /// [`StoreConfig::validate`], if a block of `block_capacity` elements
    /// of `T` cannot be laid out, or if `T` has a `Drop` impl (element
    /// destructors are never run).
    pub fn with_config(config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        if std::mem::needs_drop::<T>() {
            return Err(StoreError::InvalidConfig {
                reason: "element type must not need drop".to_string(),
            });
        }
        if Layout::array::<T>(config.block_capacity as usize).is_err() {
            return Err(StoreError::InvalidConfig {
                reason: "block byte size exceeds isize::MAX".to_string(),
            });
        }
        let spine = (0..config.max_blocks)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        Ok(Self {
            spine,
            installed: AtomicU32::new(0),
            cursor: Cursor::new(config.block_capacity),
            poisoned: AtomicBool::new(false),
            block_capacity: config.block_capacity,
            _marker: PhantomData,
        })
    }

    /// Claim a freshly zeroed element.
    ///
    /// Callable from any number of threads concurrently with no external
    /// locking. Returns a [`Slot`] that dereferences to the element and
    /// carries its logical index; indices across all successful claims are
    /// dense — N claims realise exactly `[0, N)`.
    ///
    /// The call never blocks on a lock, but a claim that lands past a
    /// block boundary spins (yielding the processor between retries) until
    /// the boundary's installer publishes the new block.
    ///
    /// # Errors
    ///
    /// - [`StoreError::CapacityExceeded`] — the block table is full.
    /// - [`StoreError::AllocationFailed`] — a new block could not be
    ///   allocated.
    /// - [`StoreError::Poisoned`] — an earlier installation failed, so the
    ///   boundary this claim is waiting on will never be published.
    /// - [`StoreError::IndexSpaceExhausted`] — the cursor's slot field
    ///   saturated while spinning.
    pub fn create_element(&self) -> Result<Slot<'_, T>, StoreError> {
        loop {
            let (block, slot) = self.cursor.claim();

            if slot < self.block_capacity {
                return Ok(self.slot_handle(block, slot));
            }

            if slot == self.block_capacity {
                return self.install_block();
            }

            if slot == u32::MAX {
                return Err(StoreError::IndexSpaceExhausted);
            }
            if self.poisoned.load(Ordering::Acquire) {
                return Err(StoreError::Poisoned);
            }
            thread::yield_now();
        }
    }

    /// Installer path: allocate, publish, and claim slot 0 of the next
    /// block.
    ///
    /// Only one claim per boundary observes `slot == block_capacity`, so
    /// installation is serialised by construction and `installed` is
    /// written only here (and under `&mut self` in `clear`).
    fn install_block(&self) -> Result<Slot<'_, T>, StoreError> {
        let index = self.installed.load(Ordering::Relaxed);
        if index as usize == self.spine.len() {
            self.poisoned.store(true, Ordering::Release);
            return Err(StoreError::CapacityExceeded {
                installed: index,
                max_blocks: self.spine.len() as u32,
            });
        }
        let block = match Block::new(self.block_capacity) {
            Ok(block) => block,
            Err(err) => {
                self.poisoned.store(true, Ordering::Release);
                return Err(err);
            }
        };
        // The spine entry and the installed count must be visible before
        // any claim observes the republished cursor.
        self.spine[index as usize].store(block.into_raw(), Ordering::Release);
        self.installed.store(index + 1, Ordering::Release);
        // Slot 0 belongs to this call; the next claim lands on slot 1.
        self.cursor.publish(index, 1);
        Ok(self.slot_handle(index, 0))
    }

    /// Resolve a claimed `(block, slot)` pair into a handle.
    fn slot_handle(&self, block: u32, slot: u32) -> Slot<'_, T> {
        let index = block as usize * self.block_capacity as usize + slot as usize;
        // The claim that produced this pair acquired a cursor value in the
        // release sequence headed by the block's publication, so the spine
        // entry is visible here.
        let base = self.spine[block as usize].load(Ordering::Acquire);
        debug_assert!(!base.is_null(), "claimed slot in an uninstalled block");
        // SAFETY: `slot < block_capacity`, and the packed-cursor protocol
        // hands each `(block, slot)` pair to exactly one claim, so no other
        // reference to this element exists.
        let value = unsafe { &mut *base.add(slot as usize) };
        Slot::new(value, index)
    }
}

impl<T: Zeroable> Default for MassStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MassStore<T> {
    /// Number of elements allocated so far.
    ///
    /// Under concurrent allocation this is a best-effort snapshot (claims
    /// past an unpublished boundary are not counted until the installer
    /// publishes); it is exact once all producers have returned.
    pub fn len(&self) -> usize {
        if self.installed.load(Ordering::Acquire) == 0 {
            return 0;
        }
        let (block, slot) = self.cursor.load();
        block as usize * self.block_capacity as usize
            + slot.min(self.block_capacity) as usize
    }

    /// Whether the store holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Committed memory in bytes: installed blocks × block capacity ×
    /// element size, including a partially filled final block.
    pub fn memory_use(&self) -> usize {
        self.installed.load(Ordering::Acquire) as usize
            * self.block_capacity as usize
            * std::mem::size_of::<T>()
    }

    /// Number of installed blocks.
    pub fn block_count(&self) -> usize {
        self.installed.load(Ordering::Acquire) as usize
    }

    /// Elements per block, as configured at construction.
    pub fn block_capacity(&self) -> u32 {
        self.block_capacity
    }

    /// Whether 64-bit atomic operations are lock-free on this target.
    ///
    /// A capability query: the allocation protocol is identical either way.
    pub fn is_lock_free(&self) -> bool {
        cfg!(target_has_atomic = "64")
    }

    /// Shared access to the element at `index`, or `None` if out of range.
    ///
    /// Element reads take `&mut self` so they cannot race a producer's
    /// writes through a live [`Slot`].
    pub fn get(&mut self, index: usize) -> Option<&T> {
        if index < self.len() {
            // SAFETY: `index` is in range and `&mut self` rules out live
            // producer handles.
            Some(unsafe { self.get_unchecked(index) })
        } else {
            None
        }
    }

    /// Exclusive access to the element at `index`, or `None` if out of
    /// range.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index < self.len() {
            // SAFETY: `index` is in range and `&mut self` rules out any
            // other reference to the element.
            Some(unsafe { self.get_unchecked_mut(index) })
        } else {
            None
        }
    }

    /// Shared access without bounds or exclusivity checks.
    ///
    /// # Safety
    ///
    /// `index` must be below [`len`](MassStore::len), and no live [`Slot`]
    /// or exclusive reference may alias the element.
    pub unsafe fn get_unchecked(&self, index: usize) -> &T {
        &*self.element_ptr(index)
    }

    /// Exclusive access without bounds or exclusivity checks.
    ///
    /// # Safety
    ///
    /// `index` must be below [`len`](MassStore::len), and no other
    /// reference of any kind may alias the element.
    pub unsafe fn get_unchecked_mut(&self, index: usize) -> &mut T {
        &mut *self.element_ptr(index)
    }

    /// Raw pointer to the element at `index`.
    ///
    /// # Safety
    ///
    /// `index` must be below [`len`](MassStore::len), so that the decoded
    /// block is installed.
    pub(crate) unsafe fn element_ptr(&self, index: usize) -> *mut T {
        let block = index / self.block_capacity as usize;
        let slot = index % self.block_capacity as usize;
        let base = self.spine[block].load(Ordering::Acquire);
        debug_assert!(!base.is_null(), "element index in an uninstalled block");
        // SAFETY: `slot < block_capacity` by construction of the modulo,
        // and the caller guarantees the block is installed.
        base.add(slot)
    }

    /// Exchange the elements at `i` and `j`.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of range.
    pub fn swap(&mut self, i: usize, j: usize) {
        let len = self.len();
        assert!(
            i < len && j < len,
            "swap indices {i}, {j} out of range for store of {len}"
        );
        if i == j {
            return;
        }
        // SAFETY: both indices are in range; distinct logical indices name
        // disjoint elements.
        unsafe { ptr::swap(self.element_ptr(i), self.element_ptr(j)) };
    }

    /// Iterate over all elements in logical-index order.
    ///
    /// Requires exclusive access: no producer can allocate while the
    /// iterator's borrow is live.
    pub fn iter(&mut self) -> Iter<'_, T> {
        let len = self.len();
        Iter::new(self, len)
    }

    /// Iterate mutably over all elements in logical-index order.
    pub fn iter_mut(&mut self) -> IterMut<'_, T> {
        let len = self.len();
        IterMut::new(self, len)
    }

    /// Sort all elements in place with a comparator.
    ///
    /// Unstable, like [`slice::sort_unstable_by`].
    pub fn sort_unstable_by<F>(&mut self, compare: F)
    where
        F: FnMut(&T, &T) -> cmp::Ordering,
    {
        let len = self.len();
        self.sort_range_unstable_by(0..len, compare);
    }

    /// Sort a logical range of elements in place.
    ///
    /// The store's storage is deliberately non-contiguous, so this sorts
    /// an index permutation with the standard slice sort and then applies
    /// it by cycle-walking element swaps: the elements end up reordered
    /// inside their blocks, and indexed access and iteration observe the
    /// sorted order through the same storage. Uses O(range length)
    /// auxiliary index memory.
    ///
    /// # Panics
    ///
    /// Panics if the range is inverted or its end exceeds
    /// [`len`](MassStore::len).
    pub fn sort_range_unstable_by<F>(&mut self, range: Range<usize>, mut compare: F)
    where
        F: FnMut(&T, &T) -> cmp::Ordering,
    {
        let len = self.len();
        assert!(
            range.start <= range.end && range.end <= len,
            "sort range {}..{} out of range for store of {len}",
            range.start,
            range.end
        );
        let base = range.start;
        let count = range.end - range.start;
        if count < 2 {
            return;
        }

        // order[position] = range offset of the element that belongs at
        // `position` once sorted.
        let mut order: Vec<usize> = (0..count).collect();
        order.sort_unstable_by(|&a, &b| {
            // SAFETY: offsets are within the validated range, and
            // `&mut self` rules out aliasing exclusive references.
            let (x, y) = unsafe { (self.get_unchecked(base + a), self.get_unchecked(base + b)) };
            compare(x, y)
        });

        // Invert into destination[offset] = final position, then apply the
        // permutation by walking its cycles. Each swap places at least one
        // element at its final position.
        let mut destination = vec![0usize; count];
        for (position, &offset) in order.iter().enumerate() {
            destination[offset] = position;
        }
        for start in 0..count {
            while destination[start] != start {
                let target = destination[start];
                // SAFETY: both offsets are within the validated range and
                // `start != target`, so the elements are disjoint.
                unsafe {
                    ptr::swap(self.element_ptr(base + start), self.element_ptr(base + target));
                }
                destination.swap(start, target);
            }
        }
    }

    /// Release every block and reset to the freshly constructed state.
    ///
    /// Exclusive access means this can never run concurrently with
    /// allocation. Afterwards the first claim installs block 0 again,
    /// exactly as on a new store; a poisoned store becomes usable again.
    pub fn clear(&mut self) {
        self.release_blocks();
        *self.installed.get_mut() = 0;
        *self.poisoned.get_mut() = false;
        self.cursor.reset(self.block_capacity);
    }

    /// Drop every installed block and null its spine entry.
    fn release_blocks(&mut self) {
        let installed = *self.installed.get_mut() as usize;
        for entry in self.spine.iter_mut().take(installed) {
            let raw = std::mem::replace(entry.get_mut(), ptr::null_mut());
            if !raw.is_null() {
                // SAFETY: `raw` came from `Block::into_raw` with this
                // capacity, and the nulled entry ensures it is reclaimed
                // exactly once.
                drop(unsafe { Block::from_raw(raw, self.block_capacity) });
            }
        }
    }
}

impl<T> Drop for MassStore<T> {
    fn drop(&mut self) {
        self.release_blocks();
    }
}

impl<T> fmt::Debug for MassStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MassStore")
            .field("len", &self.len())
            .field("block_count", &self.block_count())
            .field("block_capacity", &self.block_capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_store(block_capacity: u32) -> MassStore<u64> {
        MassStore::with_config(StoreConfig::with_block_capacity(block_capacity)).unwrap()
    }

    #[test]
    fn first_claim_installs_block_zero() {
        let store = small_store(4);
        assert_eq!(store.block_count(), 0);
        let slot = store.create_element().unwrap();
        assert_eq!(slot.index(), 0);
        assert_eq!(*slot, 0);
        assert_eq!(store.block_count(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn ten_elements_across_three_blocks() {
        // Capacity 4, 10 elements: blocks hold 4 + 4 + 2, committing 12
        // slots while 10 are used.
        let mut store = small_store(4);
        for expected in 0..10 {
            let slot = store.create_element().unwrap();
            assert_eq!(slot.index(), expected);
        }
        assert_eq!(store.len(), 10);
        assert_eq!(store.block_count(), 3);
        assert_eq!(store.memory_use(), 12 * std::mem::size_of::<u64>());
        assert_eq!(store.get(9), Some(&0));
        assert_eq!(store.get(10), None);
    }

    #[test]
    fn elements_are_zeroed_and_writable() {
        let mut store = small_store(8);
        for value in 0..20u64 {
            let mut slot = store.create_element().unwrap();
            assert_eq!(*slot, 0);
            *slot = value;
        }
        for index in 0..20 {
            assert_eq!(store.get(index), Some(&(index as u64)));
        }
    }

    #[test]
    fn exactly_full_block_reports_full_len() {
        let store = small_store(4);
        for _ in 0..4 {
            let _ = store.create_element().unwrap();
        }
        assert_eq!(store.len(), 4);
        assert_eq!(store.block_count(), 1);
    }

    #[test]
    fn get_mut_writes_through() {
        let mut store = small_store(4);
        let _ = store.create_element().unwrap();
        *store.get_mut(0).unwrap() = 99;
        assert_eq!(store.get(0), Some(&99));
        assert_eq!(store.get_mut(1), None);
    }

    #[test]
    fn swap_exchanges_elements_across_blocks() {
        let mut store = small_store(2);
        for value in 0..5u64 {
            *store.create_element().unwrap() = value;
        }
        store.swap(0, 4);
        assert_eq!(store.get(0), Some(&4));
        assert_eq!(store.get(4), Some(&0));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn swap_out_of_range_panics() {
        let mut store = small_store(2);
        let _ = store.create_element().unwrap();
        store.swap(0, 1);
    }

    #[test]
    fn sort_reorders_underlying_storage() {
        let mut store = small_store(3);
        for value in [5u64, 1, 4, 2, 8, 0, 3] {
            *store.create_element().unwrap() = value;
        }
        store.sort_unstable_by(|a, b| a.cmp(b));
        let collected: Vec<u64> = store.iter().copied().collect();
        assert_eq!(collected, vec![0, 1, 2, 3, 4, 5, 8]);
        // Indexed access observes the same order as iteration.
        for (index, expected) in collected.iter().enumerate() {
            assert_eq!(store.get(index), Some(expected));
        }
    }

    #[test]
    fn sort_range_leaves_rest_untouched() {
        let mut store = small_store(4);
        for value in [9u64, 7, 8, 1, 2, 3] {
            *store.create_element().unwrap() = value;
        }
        store.sort_range_unstable_by(0..3, |a, b| a.cmp(b));
        let collected: Vec<u64> = store.iter().copied().collect();
        assert_eq!(collected, vec![7, 8, 9, 1, 2, 3]);
    }

    #[test]
    fn clear_resets_to_fresh_state() {
        let mut store = small_store(4);
        for _ in 0..10 {
            let _ = store.create_element().unwrap();
        }
        store.clear();
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert_eq!(store.block_count(), 0);
        assert_eq!(store.memory_use(), 0);
        // The first claim after clear installs block 0 again.
        let slot = store.create_element().unwrap();
        assert_eq!(slot.index(), 0);
        assert_eq!(store.block_count(), 1);
    }

    #[test]
    fn spine_exhaustion_poisons_the_store() {
        let mut store: MassStore<u64> = MassStore::with_config(StoreConfig {
            block_capacity: 2,
            max_blocks: 1,
        })
        .unwrap();
        let _ = store.create_element().unwrap();
        let _ = store.create_element().unwrap();
        assert!(matches!(
            store.create_element(),
            Err(StoreError::CapacityExceeded {
                installed: 1,
                max_blocks: 1,
            })
        ));
        assert!(matches!(
            store.create_element(),
            Err(StoreError::Poisoned)
        ));
        // clear() recovers the store.
        store.clear();
        assert_eq!(store.create_element().unwrap().index(), 0);
    }

    #[test]
    fn droppable_element_type_rejected() {
        struct Leaky(#[allow(dead_code)] String);
        // SAFETY: test-only impl; a zeroed String is never read because
        // construction is expected to fail first.
        unsafe impl bytemuck::Zeroable for Leaky {}

        assert!(matches!(
            MassStore::<Leaky>::with_config(StoreConfig::with_block_capacity(4)),
            Err(StoreError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn zero_sized_elements_supported() {
        let mut store: MassStore<()> = MassStore::with_config(StoreConfig {
            block_capacity: 4,
            max_blocks: 4,
        })
        .unwrap();
        for expected in 0..10 {
            assert_eq!(store.create_element().unwrap().index(), expected);
        }
        assert_eq!(store.len(), 10);
        assert_eq!(store.memory_use(), 0);
        assert_eq!(store.iter().count(), 10);
    }

    #[test]
    fn debug_output_summarises_state() {
        let store = small_store(4);
        let _ = store.create_element().unwrap();
        let text = format!("{store:?}");
        assert!(text.contains("len: 1"));
        assert!(text.contains("block_capacity: 4"));
    }

    #[test]
    fn lock_free_query_is_consistent() {
        let store = small_store(4);
        assert_eq!(store.is_lock_free(), cfg!(target_has_atomic = "64"));
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn len_and_memory_track_alloc_count(
                count in 0usize..500,
                block_capacity in 1u32..16,
            ) {
                let store: MassStore<u32> = MassStore::with_config(
                    StoreConfig { block_capacity, max_blocks: 1024 },
                ).unwrap();
                for _ in 0..count {
                    let _ = store.create_element().unwrap();
                }
                prop_assert_eq!(store.len(), count);
                let blocks = count.div_ceil(block_capacity as usize);
                prop_assert_eq!(store.block_count(), blocks);
                prop_assert_eq!(
                    store.memory_use(),
                    blocks * block_capacity as usize * std::mem::size_of::<u32>()
                );
            }

            #[test]
            fn sort_produces_a_permutation(
                mut values in proptest::collection::vec(any::<u64>(), 0..200),
                block_capacity in 1u32..16,
            ) {
                let mut store: MassStore<u64> = MassStore::with_config(
                    StoreConfig { block_capacity, max_blocks: 1024 },
                ).unwrap();
                for &value in &values {
                    *store.create_element().unwrap() = value;
                }
                store.sort_unstable_by(|a, b| a.cmp(b));
                let sorted: Vec<u64> = store.iter().copied().collect();
                values.sort_unstable();
                prop_assert_eq!(sorted, values);
            }
        }
    }
}
