use std::alloc::{Layout, alloc, dealloc};
use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr::{self, NonNull};

use tracing::{debug, trace};

use crate::{Error, Result};

/// The backing storage of a [`DynArray`][crate::DynArray]: one untyped heap block sized for
/// `capacity` items of `T`.
///
/// The storage does not know which of its slots hold live items. The owner tracks that and
/// promises, via the safety contracts below, to construct only into raw slots and to destroy
/// only live ones. Every construct/destroy transition of the array passes through the
/// primitives of this type.
///
/// When `capacity` is zero, or when `T` is zero-sized, no allocation exists and the pointer is
/// the dangling sentinel. Dropping the storage releases the block but never drops any items.
///
/// # Moves
///
/// Relocating items into a new block is a bitwise copy. Rust moves cannot fail, so once the new
/// block is allocated a reallocation always completes.
pub(crate) struct RawStorage<T> {
    /// Start of the block, or `NonNull::dangling()` if nothing is allocated.
    ptr: NonNull<T>,

    /// Number of items the block can hold.
    capacity: usize,

    _owns: PhantomData<T>,
}

impl<T> RawStorage<T> {
    /// Creates storage with zero capacity. Does not allocate.
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self {
            ptr: NonNull::dangling(),
            capacity: 0,
            _owns: PhantomData,
        }
    }

    /// Creates storage for exactly `capacity` items.
    pub(crate) fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self {
            ptr: Self::allocate(capacity)?,
            capacity,
            _owns: PhantomData,
        })
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub(crate) fn ptr(&self) -> NonNull<T> {
        self.ptr
    }

    /// Whether a real heap block backs this storage (as opposed to the dangling sentinel).
    #[must_use]
    pub(crate) fn is_allocated(&self) -> bool {
        Self::needs_allocation(self.capacity)
    }

    fn needs_allocation(capacity: usize) -> bool {
        capacity != 0 && size_of::<T>() != 0
    }

    /// Requests a block for exactly `capacity` items from the global allocator.
    ///
    /// Returns the sentinel without calling the allocator if no memory is needed.
    fn allocate(capacity: usize) -> Result<NonNull<T>> {
        if !Self::needs_allocation(capacity) {
            return Ok(NonNull::dangling());
        }

        let Ok(layout) = Layout::array::<T>(capacity) else {
            debug!(
                capacity,
                item_type = type_name::<T>(),
                "requested capacity exceeds the addressable size"
            );
            return Err(Error::OutOfMemory {
                requested: capacity,
            });
        };

        // SAFETY: The layout is not zero-sized because capacity is non-zero and T is not
        // zero-sized, as checked by needs_allocation() above.
        let ptr = unsafe { alloc(layout) };

        NonNull::new(ptr.cast::<T>()).ok_or_else(|| {
            debug!(
                capacity,
                bytes = layout.size(),
                item_type = type_name::<T>(),
                "allocator could not satisfy storage request"
            );
            Error::OutOfMemory {
                requested: capacity,
            }
        })
    }

    /// Returns a block to the global allocator. No-op for the sentinel.
    ///
    /// The block must not hold live items anymore - they are not dropped here.
    fn deallocate(ptr: NonNull<T>, capacity: usize) {
        if !Self::needs_allocation(capacity) {
            return;
        }

        let layout = Layout::array::<T>(capacity)
            .expect("the layout was calculable when the block was allocated");

        // SAFETY: The pointer came from alloc() with this same layout, as the capacity is
        // stored together with the pointer and both are only ever replaced as a pair.
        unsafe {
            dealloc(ptr.as_ptr().cast(), layout);
        }
    }

    /// Moves the first `len` items into a new block of `new_capacity` items and releases the
    /// current block.
    ///
    /// If allocation fails, the storage is left untouched and the error is returned.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds either the current or the new capacity.
    pub(crate) fn reallocate(&mut self, new_capacity: usize, len: usize) -> Result<()> {
        assert!(
            len <= self.capacity,
            "cannot relocate {len} items out of storage with capacity {} for {}",
            self.capacity,
            type_name::<T>()
        );
        assert!(
            len <= new_capacity,
            "cannot relocate {len} items into storage with capacity {new_capacity} for {}",
            type_name::<T>()
        );

        let new_ptr = Self::allocate(new_capacity)?;

        trace!(
            old_capacity = self.capacity,
            new_capacity,
            len,
            item_type = type_name::<T>(),
            "reallocating storage"
        );

        // The copy is the move. Afterwards the old slots are raw memory again and must not be
        // dropped, which is why the old block is released without touching them.
        //
        // SAFETY: The first `len` slots of the old block are live (caller contract, bounded by
        // the assertion above) and the new block has room for at least `len` items. The new
        // block is freshly allocated (or both are the sentinel with nothing to copy for
        // zero-sized items), so the regions cannot overlap.
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.as_ptr(), new_ptr.as_ptr(), len);
        }

        let old_ptr = mem::replace(&mut self.ptr, new_ptr);
        let old_capacity = mem::replace(&mut self.capacity, new_capacity);

        Self::deallocate(old_ptr, old_capacity);

        Ok(())
    }

    /// Releases the block, leaving zero-capacity storage behind.
    ///
    /// Any items still in the block must already have been dropped or moved out.
    pub(crate) fn release(&mut self) {
        let old_ptr = mem::replace(&mut self.ptr, NonNull::dangling());
        let old_capacity = mem::replace(&mut self.capacity, 0);

        Self::deallocate(old_ptr, old_capacity);
    }

    /// Transfers the block out, leaving zero-capacity storage behind.
    #[must_use]
    pub(crate) fn take(&mut self) -> Self {
        mem::replace(self, Self::new())
    }

    /// Pointer to the slot at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is beyond the end of the block.
    #[must_use]
    pub(crate) fn slot(&self, index: usize) -> NonNull<T> {
        assert!(
            index <= self.capacity,
            "slot {index} is out of bounds in storage with capacity {} for {}",
            self.capacity,
            type_name::<T>()
        );

        // SAFETY: Guarded by the bounds check above, so the offset is within the block or one
        // past its end, which is valid for pointer arithmetic.
        unsafe { self.ptr.add(index) }
    }

    /// Pointer to the slot at `index`, bounds-checked in debug builds only.
    ///
    /// # Safety
    ///
    /// `index` must be less than the capacity.
    #[must_use]
    unsafe fn slot_unchecked(&self, index: usize) -> NonNull<T> {
        debug_assert!(
            index < self.capacity,
            "slot {index} is out of bounds in storage with capacity {} for {}",
            self.capacity,
            type_name::<T>()
        );

        // SAFETY: The slot is within the block (caller contract).
        unsafe { self.ptr.add(index) }
    }

    /// Constructs an item in place at `index`.
    ///
    /// # Safety
    ///
    /// The slot at `index` must be raw (not holding a live item), otherwise the previous item
    /// is leaked. `index` must be less than the capacity.
    pub(crate) unsafe fn write_slot(&mut self, index: usize, value: T) {
        // SAFETY: The slot is within the block (caller contract) and properly aligned because
        // the block was allocated with the layout of an array of T.
        unsafe {
            self.slot_unchecked(index).write(value);
        }
    }

    /// Moves the item at `index` out, leaving the slot raw.
    ///
    /// # Safety
    ///
    /// The slot at `index` must hold a live item and the caller must subsequently treat the
    /// slot as raw.
    #[must_use]
    pub(crate) unsafe fn read_slot(&mut self, index: usize) -> T {
        // SAFETY: The slot holds a live item (caller contract).
        unsafe { self.slot_unchecked(index).read() }
    }

    /// Drops the item at `index` in place, leaving the slot raw.
    ///
    /// # Safety
    ///
    /// The slot at `index` must hold a live item and the caller must subsequently treat the
    /// slot as raw.
    pub(crate) unsafe fn drop_slot(&mut self, index: usize) {
        // SAFETY: The slot holds a live item (caller contract).
        unsafe {
            self.slot_unchecked(index).drop_in_place();
        }
    }

    /// Drops the items in `start..end` in place, in index order, leaving the slots raw.
    ///
    /// If an item's `Drop` panics, the remaining items in the range are still dropped.
    ///
    /// # Safety
    ///
    /// Every slot in the range must hold a live item and the caller must subsequently treat
    /// them all as raw.
    pub(crate) unsafe fn drop_range(&mut self, start: usize, end: usize) {
        let count = end
            .checked_sub(start)
            .expect("drop range must not end before it starts");

        assert!(
            end <= self.capacity,
            "drop range {start}..{end} is out of bounds in storage with capacity {} for {}",
            self.capacity,
            type_name::<T>()
        );

        if count == 0 {
            return;
        }

        let items = ptr::slice_from_raw_parts_mut(self.slot(start).as_ptr(), count);

        // SAFETY: All slots in the range hold live items (caller contract) and a slice is
        // dropped front to back.
        unsafe {
            items.drop_in_place();
        }
    }

    /// Asserts the invariants that the storage can check on its own, given the live count.
    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    pub(crate) fn integrity_check(&self, len: usize) {
        assert!(
            len <= self.capacity,
            "live count {len} exceeds capacity {} in storage for {}",
            self.capacity,
            type_name::<T>()
        );

        if size_of::<T>() != 0 {
            assert_eq!(
                self.ptr == NonNull::dangling(),
                self.capacity == 0,
                "storage for {} must use the sentinel if and only if capacity is zero",
                type_name::<T>()
            );
        }
    }
}

impl<T> Drop for RawStorage<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> fmt::Debug for RawStorage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawStorage")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("ptr", &self.ptr)
            .field("capacity", &self.capacity)
            .finish()
    }
}

// SAFETY: Yes, there are raw pointers involved here but the block is uniquely owned and nothing
// about it is tied to a thread, so as long as T itself can move between threads, the storage
// can do so, too.
unsafe impl<T: Send> Send for RawStorage<T> {}

// SAFETY: Shared access to the storage only ever hands out shared access to the items.
unsafe impl<T: Sync> Sync for RawStorage<T> {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    struct Droppable {
        drops: Rc<Cell<usize>>,
    }

    impl Drop for Droppable {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    #[test]
    fn new_does_not_allocate() {
        let storage = RawStorage::<u64>::new();

        assert_eq!(storage.capacity(), 0);
        assert!(!storage.is_allocated());
        assert_eq!(storage.ptr(), NonNull::dangling());
    }

    #[test]
    fn zero_capacity_is_sentinel() {
        let storage = RawStorage::<u64>::with_capacity(0).unwrap();

        assert!(!storage.is_allocated());
        #[cfg(debug_assertions)]
        storage.integrity_check(0);
    }

    #[test]
    fn with_capacity_allocates() {
        let storage = RawStorage::<u64>::with_capacity(8).unwrap();

        assert_eq!(storage.capacity(), 8);
        assert!(storage.is_allocated());
        assert_ne!(storage.ptr(), NonNull::dangling());
        #[cfg(debug_assertions)]
        storage.integrity_check(0);
    }

    #[test]
    fn unrepresentable_capacity_is_out_of_memory() {
        let result = RawStorage::<u64>::with_capacity(usize::MAX);

        assert_eq!(
            result.unwrap_err(),
            Error::OutOfMemory {
                requested: usize::MAX
            }
        );
    }

    #[test]
    fn zero_sized_items_never_allocate() {
        let storage = RawStorage::<()>::with_capacity(usize::MAX).unwrap();

        assert_eq!(storage.capacity(), usize::MAX);
        assert!(!storage.is_allocated());
    }

    #[test]
    fn reallocate_moves_live_items() {
        let mut storage = RawStorage::<String>::with_capacity(2).unwrap();

        // SAFETY: Slots 0 and 1 are raw and within capacity.
        unsafe {
            storage.write_slot(0, "zero".to_string());
        }
        // SAFETY: Slot 1 is raw and within capacity.
        unsafe {
            storage.write_slot(1, "one".to_string());
        }

        storage.reallocate(5, 2).unwrap();
        assert_eq!(storage.capacity(), 5);

        // SAFETY: Slots 0 and 1 were relocated and are live.
        let (zero, one) = unsafe { (storage.read_slot(0), storage.read_slot(1)) };
        assert_eq!(zero, "zero");
        assert_eq!(one, "one");
    }

    #[test]
    fn reallocate_failure_leaves_storage_untouched() {
        let mut storage = RawStorage::<u64>::with_capacity(2).unwrap();
        let ptr_before = storage.ptr();

        // SAFETY: Slot 0 is raw and within capacity.
        unsafe {
            storage.write_slot(0, 42);
        }

        assert!(storage.reallocate(usize::MAX, 1).is_err());

        assert_eq!(storage.capacity(), 2);
        assert_eq!(storage.ptr(), ptr_before);

        // SAFETY: Slot 0 is live.
        assert_eq!(unsafe { storage.read_slot(0) }, 42);
    }

    #[test]
    fn reallocate_to_zero_releases_block() {
        let mut storage = RawStorage::<u64>::with_capacity(4).unwrap();

        storage.reallocate(0, 0).unwrap();

        assert_eq!(storage.capacity(), 0);
        assert!(!storage.is_allocated());
        #[cfg(debug_assertions)]
        storage.integrity_check(0);
    }

    #[test]
    #[should_panic]
    fn reallocate_below_live_count_panics() {
        let mut storage = RawStorage::<u64>::with_capacity(4).unwrap();

        storage.reallocate(1, 2).unwrap();
    }

    #[test]
    fn drop_range_drops_only_the_range() {
        let drops = Rc::new(Cell::new(0));
        let mut storage = RawStorage::<Droppable>::with_capacity(4).unwrap();

        for index in 0..4 {
            // SAFETY: Every slot is raw and within capacity.
            unsafe {
                storage.write_slot(
                    index,
                    Droppable {
                        drops: Rc::clone(&drops),
                    },
                );
            }
        }

        // SAFETY: Slots 1 and 2 are live.
        unsafe {
            storage.drop_range(1, 3);
        }
        assert_eq!(drops.get(), 2);

        // SAFETY: Slots 0 and 3 are still live.
        unsafe {
            storage.drop_slot(0);
        }
        // SAFETY: Slot 3 is still live.
        unsafe {
            storage.drop_slot(3);
        }
        assert_eq!(drops.get(), 4);
    }

    #[test]
    #[should_panic]
    fn slot_beyond_capacity_panics() {
        let storage = RawStorage::<u64>::with_capacity(2).unwrap();

        _ = storage.slot(3);
    }

    #[test]
    fn slot_one_past_end_is_allowed() {
        let storage = RawStorage::<u64>::with_capacity(2).unwrap();

        assert_eq!(
            storage.slot(2).as_ptr(),
            storage.slot(0).as_ptr().wrapping_add(2)
        );
    }

    #[test]
    #[should_panic]
    fn drop_range_beyond_capacity_panics() {
        let mut storage = RawStorage::<u64>::with_capacity(2).unwrap();

        // SAFETY: The bounds check panics before any slot is touched.
        unsafe {
            storage.drop_range(1, 3);
        }
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic]
    fn write_beyond_capacity_panics_in_debug_builds() {
        let mut storage = RawStorage::<u64>::with_capacity(2).unwrap();

        // SAFETY: The debug bounds check panics before the slot is written.
        unsafe {
            storage.write_slot(2, 42);
        }
    }

    #[test]
    fn dropping_storage_does_not_drop_items() {
        let drops = Rc::new(Cell::new(0));
        let mut storage = RawStorage::<Droppable>::with_capacity(1).unwrap();

        let item = Droppable {
            drops: Rc::clone(&drops),
        };

        // SAFETY: Slot 0 is raw and within capacity.
        unsafe {
            storage.write_slot(0, item);
        }

        // SAFETY: Slot 0 is live; we take it back out before dropping the storage.
        let item = unsafe { storage.read_slot(0) };
        drop(storage);
        assert_eq!(drops.get(), 0);

        drop(item);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn take_leaves_empty_storage() {
        let mut storage = RawStorage::<u64>::with_capacity(3).unwrap();
        let ptr = storage.ptr();

        let taken = storage.take();

        assert_eq!(taken.capacity(), 3);
        assert_eq!(taken.ptr(), ptr);
        assert_eq!(storage.capacity(), 0);
        assert!(!storage.is_allocated());
    }
}
