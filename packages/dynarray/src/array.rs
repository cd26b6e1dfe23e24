use std::alloc::{Layout, handle_alloc_error};
use std::any::type_name;
use std::borrow::{Borrow, BorrowMut};
use std::hash::{Hash, Hasher};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::{fmt, iter, mem, slice};

use scopeguard::ScopeGuard;

use crate::raw::RawStorage;
use crate::{DynArrayBuilder, Error, Result};

/// A growable, contiguous array that manages its own storage.
///
/// The array owns one heap block with room for [`capacity()`][1] items, of which the first
/// [`len()`][2] are live. The rest of the block is raw memory that has never held an item or
/// whose item has since been dropped or moved out. Items are constructed directly into the
/// block and dropped in place.
///
/// # Growth
///
/// When an item is appended to a full array, the capacity becomes 1 if it was 0 and doubles
/// otherwise. Growing moves every live item into a new block and releases the old one, which
/// invalidates any pointer obtained from [`data()`][3] or [`as_ptr()`][4].
///
/// [`reserve()`][5] sets the capacity to exactly the requested value, including shrinking the
/// block when the request is smaller than the current capacity (but never below the live count).
/// Use [`shrink_to_fit()`][6] to shrink the block to the live count.
///
/// # Failures
///
/// Operations that may need storage return [`Error::OutOfMemory`] if the allocator cannot
/// satisfy the request, leaving the array as it was. Panics raised by `T::clone()` or
/// `T::default()` propagate to the caller after any items constructed by the failing call have
/// been dropped and any storage allocated by it has been released.
///
/// Moving items is a bitwise copy, so relocating items into a new block cannot fail once the
/// block has been allocated.
///
/// # Thread safety
///
/// The array is `Send` if `T` is `Send` and `Sync` if `T` is `Sync`. It performs no internal
/// synchronization.
///
/// # Examples
///
/// ```
/// use dynarray::DynArray;
///
/// let mut array = DynArray::new();
///
/// array.push(1).unwrap();
/// array.push(2).unwrap();
/// array.push(3).unwrap();
///
/// assert_eq!(array.len(), 3);
/// assert_eq!(array.capacity(), 4);
/// assert_eq!(array[1], 2);
/// assert_eq!(*array.back().unwrap(), 3);
/// ```
///
/// [1]: Self::capacity
/// [2]: Self::len
/// [3]: Self::data
/// [4]: Self::as_ptr
/// [5]: Self::reserve
/// [6]: Self::shrink_to_fit
pub struct DynArray<T> {
    /// Slots `0..len` hold live items, the rest of the block is raw memory.
    storage: RawStorage<T>,

    len: usize,
}

impl<T> DynArray<T> {
    /// Creates an empty array. Does not allocate.
    ///
    /// # Examples
    ///
    /// ```
    /// use dynarray::DynArray;
    ///
    /// let array = DynArray::<u32>::new();
    ///
    /// assert!(array.is_empty());
    /// assert_eq!(array.capacity(), 0);
    /// assert!(array.data().is_none());
    /// ```
    #[must_use]
    pub const fn new() -> Self {
        Self {
            storage: RawStorage::new(),
            len: 0,
        }
    }

    /// Creates a builder for customizing the array before creating it.
    ///
    /// # Examples
    ///
    /// ```
    /// use dynarray::DynArray;
    ///
    /// let array = DynArray::<u32>::builder()
    ///     .capacity(16)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(array.capacity(), 16);
    /// ```
    pub fn builder() -> DynArrayBuilder<T> {
        DynArrayBuilder::new()
    }

    /// Creates an empty array with room for exactly `capacity` items.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the storage cannot be allocated.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self {
            storage: RawStorage::with_capacity(capacity)?,
            len: 0,
        })
    }

    /// Creates an array holding `count` clones of `value`, with a capacity of exactly `count`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the storage cannot be allocated. No clones are made in
    /// that case.
    ///
    /// # Panics
    ///
    /// If cloning `value` panics, the clones made so far are dropped and the storage is
    /// released before the panic continues.
    ///
    /// # Examples
    ///
    /// ```
    /// use dynarray::DynArray;
    ///
    /// let array = DynArray::from_value(4, &42).unwrap();
    ///
    /// assert_eq!(array.len(), 4);
    /// assert!(array.iter().all(|&item| item == 42));
    /// ```
    pub fn from_value(count: usize, value: &T) -> Result<Self>
    where
        T: Clone,
    {
        let mut array = Self::with_capacity(count)?;
        array.construct_tail(iter::repeat_n(value, count).cloned());
        Ok(array)
    }

    /// Creates an array holding clones of the items in `items`, with a capacity of exactly
    /// `items.len()`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the storage cannot be allocated.
    ///
    /// # Panics
    ///
    /// If cloning an item panics, the clones made so far are dropped and the storage is
    /// released before the panic continues.
    pub fn try_from_slice(items: &[T]) -> Result<Self>
    where
        T: Clone,
    {
        let mut array = Self::with_capacity(items.len())?;
        array.construct_tail(items.iter().cloned());
        Ok(array)
    }

    /// Creates a deep copy of the array.
    ///
    /// The copy has the same capacity as the original (not merely its length). Items are
    /// cloned in index order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the storage cannot be allocated.
    ///
    /// # Panics
    ///
    /// If cloning an item panics, the clones made so far are dropped and the storage is
    /// released before the panic continues. The original is not affected.
    pub fn try_clone(&self) -> Result<Self>
    where
        T: Clone,
    {
        let mut array = Self::with_capacity(self.capacity())?;
        array.construct_tail(self.iter().cloned());
        Ok(array)
    }

    /// Moves the contents out of this array into a new one, leaving this array empty with
    /// zero capacity. Never allocates.
    ///
    /// # Examples
    ///
    /// ```
    /// use dynarray::DynArray;
    ///
    /// let mut original = DynArray::from_value(3, &10).unwrap();
    /// let moved = original.take();
    ///
    /// assert_eq!(moved.len(), 3);
    /// assert_eq!(original.len(), 0);
    /// assert_eq!(original.capacity(), 0);
    /// ```
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            storage: self.storage.take(),
            len: mem::replace(&mut self.len, 0),
        }
    }

    /// The number of live items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the array holds no live items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of items the array can hold without reallocating.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Reallocates the storage to hold exactly `capacity` items.
    ///
    /// This always reallocates when `capacity` is non-zero, even if the current capacity is
    /// already larger: a smaller request shrinks the block. A request below the current length
    /// shrinks the block to the length, as live items are never discarded by this method.
    /// A request for zero is ignored.
    ///
    /// Any pointers into the array are invalidated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the new storage cannot be allocated. The array is not
    /// modified in that case.
    ///
    /// # Examples
    ///
    /// ```
    /// use dynarray::DynArray;
    ///
    /// let mut array = DynArray::<u32>::with_capacity(10).unwrap();
    ///
    /// array.reserve(4).unwrap();
    /// assert_eq!(array.capacity(), 4);
    /// ```
    pub fn reserve(&mut self, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return Ok(());
        }

        self.storage.reallocate(capacity.max(self.len), self.len)
    }

    /// Reallocates the storage to hold exactly as many items as are live. Releases the storage
    /// entirely if the array is empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the new storage cannot be allocated. The array is not
    /// modified in that case.
    pub fn shrink_to_fit(&mut self) -> Result<()> {
        if self.capacity() == self.len {
            return Ok(());
        }

        self.storage.reallocate(self.len, self.len)
    }

    /// Changes the length to `new_len`.
    ///
    /// When growing, the new items are created with `T::default()` in index order, first
    /// reserving exactly `new_len` if the capacity is insufficient. When shrinking, the excess
    /// items are dropped in index order. The capacity never shrinks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the array needs to grow and the new storage cannot be
    /// allocated. The array is not modified in that case.
    ///
    /// # Panics
    ///
    /// If `T::default()` panics, the items created by this call are dropped and the length is
    /// left unchanged before the panic continues. The capacity may have grown.
    ///
    /// # Examples
    ///
    /// ```
    /// use dynarray::DynArray;
    ///
    /// let mut array = DynArray::from_value(2, &7).unwrap();
    ///
    /// array.resize(4).unwrap();
    /// assert_eq!(array.as_slice(), &[7, 7, 0, 0]);
    ///
    /// array.resize(1).unwrap();
    /// assert_eq!(array.as_slice(), &[7]);
    /// ```
    pub fn resize(&mut self, new_len: usize) -> Result<()>
    where
        T: Default,
    {
        if new_len > self.capacity() {
            self.reserve(new_len)?;
        }

        match new_len.checked_sub(self.len) {
            Some(additional) => {
                self.construct_tail(iter::repeat_with(T::default).take(additional));
            }
            None => self.truncate(new_len),
        }

        Ok(())
    }

    /// Drops the items at index `len` and beyond, in index order. No-op if the array is not
    /// longer than `len`. The capacity is not affected.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }

        // The length is updated first so a panicking Drop cannot lead to a double drop.
        let old_len = mem::replace(&mut self.len, len);

        // SAFETY: Slots len..old_len were live and are no longer counted as such.
        unsafe {
            self.storage.drop_range(len, old_len);
        }
    }

    /// Drops all items in index order. The capacity is not affected.
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Appends `value`, growing the storage first if the array is full.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the array needs to grow and the new storage cannot be
    /// allocated. The array is not modified in that case and `value` is dropped.
    pub fn push(&mut self, value: T) -> Result<()> {
        if self.len == self.capacity() {
            self.grow()?;
        }

        // SAFETY: Slot len is raw because only 0..len are live, and within capacity because we
        // grew above if the array was full.
        unsafe {
            self.storage.write_slot(self.len, value);
        }

        self.len = self
            .len
            .checked_add(1)
            .expect("guarded by len < capacity, which is not more than usize::MAX");

        Ok(())
    }

    /// Appends a clone of `value`, growing the storage first if the array is full.
    ///
    /// The clone is made before the storage is touched, so a panicking `T::clone()` leaves
    /// the array unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] if the array needs to grow and the new storage cannot be
    /// allocated. The array is not modified in that case.
    pub fn push_cloned(&mut self, value: &T) -> Result<()>
    where
        T: Clone,
    {
        self.push(value.clone())
    }

    /// Drops the last item. No-op if the array is empty. The capacity is not affected.
    pub fn pop_back(&mut self) {
        if let Some(last) = self.len.checked_sub(1) {
            self.len = last;

            // SAFETY: Slot `last` was live and is no longer counted as such.
            unsafe {
                self.storage.drop_slot(last);
            }
        }
    }

    /// Removes the last item and returns it, or `None` if the array is empty.
    pub fn pop(&mut self) -> Option<T> {
        let last = self.len.checked_sub(1)?;
        self.len = last;

        // SAFETY: Slot `last` was live and is no longer counted as such.
        Some(unsafe { self.storage.read_slot(last) })
    }

    /// Returns a reference to the item at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if `index` is not less than the length.
    ///
    /// # Examples
    ///
    /// ```
    /// use dynarray::{DynArray, Error};
    ///
    /// let array = DynArray::from_value(3, &1).unwrap();
    ///
    /// assert_eq!(*array.at(2).unwrap(), 1);
    /// assert_eq!(array.at(3), Err(Error::IndexOutOfRange { index: 3, len: 3 }));
    /// ```
    pub fn at(&self, index: usize) -> Result<&T> {
        let len = self.len;
        self.as_slice()
            .get(index)
            .ok_or(Error::IndexOutOfRange { index, len })
    }

    /// Returns an exclusive reference to the item at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfRange`] if `index` is not less than the length.
    pub fn at_mut(&mut self, index: usize) -> Result<&mut T> {
        let len = self.len;
        self.as_mut_slice()
            .get_mut(index)
            .ok_or(Error::IndexOutOfRange { index, len })
    }

    /// Returns a reference to the item at `index` without checking that it is live.
    ///
    /// # Safety
    ///
    /// `index` must be less than [`len()`][Self::len]. Anything else is undefined behavior,
    /// even if the result is not used.
    #[must_use]
    pub unsafe fn get_unchecked(&self, index: usize) -> &T {
        debug_assert!(index < self.len, "get_unchecked({index}) out of range");

        // SAFETY: The slot is live (caller contract), so it is in bounds and initialized.
        unsafe { self.storage.ptr().add(index).as_ref() }
    }

    /// Returns an exclusive reference to the item at `index` without checking that it is live.
    ///
    /// # Safety
    ///
    /// `index` must be less than [`len()`][Self::len]. Anything else is undefined behavior,
    /// even if the result is not used.
    #[must_use]
    pub unsafe fn get_unchecked_mut(&mut self, index: usize) -> &mut T {
        debug_assert!(index < self.len, "get_unchecked_mut({index}) out of range");

        // SAFETY: The slot is live (caller contract), so it is in bounds and initialized, and
        // we hold an exclusive reference to the array.
        unsafe { self.storage.ptr().add(index).as_mut() }
    }

    /// Returns a reference to the first item.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyContainer`] if the array is empty.
    pub fn front(&self) -> Result<&T> {
        self.as_slice().first().ok_or(Error::EmptyContainer)
    }

    /// Returns an exclusive reference to the first item.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyContainer`] if the array is empty.
    pub fn front_mut(&mut self) -> Result<&mut T> {
        self.as_mut_slice().first_mut().ok_or(Error::EmptyContainer)
    }

    /// Returns a reference to the last item.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyContainer`] if the array is empty.
    pub fn back(&self) -> Result<&T> {
        self.as_slice().last().ok_or(Error::EmptyContainer)
    }

    /// Returns an exclusive reference to the last item.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyContainer`] if the array is empty.
    pub fn back_mut(&mut self) -> Result<&mut T> {
        self.as_mut_slice().last_mut().ok_or(Error::EmptyContainer)
    }

    /// Returns a pointer to the start of the storage block, or `None` if no block is allocated
    /// (zero capacity or zero-sized `T`).
    ///
    /// The pointer is valid for reading [`len()`][Self::len] items until the array is
    /// reallocated or dropped. Writing through it additionally requires that no references to
    /// the items exist.
    #[must_use]
    pub fn data(&self) -> Option<NonNull<T>> {
        self.storage.is_allocated().then(|| self.storage.ptr())
    }

    /// Returns a raw pointer to the start of the storage block. The pointer is dangling but
    /// well-aligned if no block is allocated.
    #[must_use]
    pub fn as_ptr(&self) -> *const T {
        self.storage.ptr().as_ptr()
    }

    /// Returns a raw pointer to the start of the storage block. The pointer is dangling but
    /// well-aligned if no block is allocated.
    #[must_use]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.storage.ptr().as_ptr()
    }

    /// Returns the live items as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: The pointer is non-null and aligned (dangling only if nothing is allocated,
        // in which case len is 0 or T is zero-sized) and slots 0..len are live.
        unsafe { slice::from_raw_parts(self.storage.ptr().as_ptr(), self.len) }
    }

    /// Returns the live items as an exclusive slice.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: The pointer is non-null and aligned (dangling only if nothing is allocated,
        // in which case len is 0 or T is zero-sized) and slots 0..len are live. We hold an
        // exclusive reference to the array.
        unsafe { slice::from_raw_parts_mut(self.storage.ptr().as_ptr(), self.len) }
    }

    /// Grows the storage for one more item: to 1 from empty, otherwise to double.
    fn grow(&mut self) -> Result<()> {
        let new_capacity = match self.capacity() {
            0 => 1,
            capacity => capacity.checked_mul(2).ok_or(Error::OutOfMemory {
                requested: usize::MAX,
            })?,
        };

        self.storage.reallocate(new_capacity, self.len)
    }

    /// Constructs the items produced by `values` into the slots following the live ones and
    /// only then counts them as live.
    ///
    /// If producing an item panics, the items constructed by this call are dropped before the
    /// panic continues and the length is left unchanged.
    ///
    /// # Panics
    ///
    /// Panics if `values` produces more items than fit in the remaining capacity.
    fn construct_tail(&mut self, values: impl Iterator<Item = T>) {
        let base = self.len;

        let mut guard = scopeguard::guard(
            (&mut self.storage, 0_usize),
            |(storage, constructed)| {
                let end = base
                    .checked_add(constructed)
                    .expect("guarded by capacity check on every construction");

                // SAFETY: The slots base..end were constructed below and are not yet counted
                // as live, so nobody else will drop them.
                unsafe {
                    storage.drop_range(base, end);
                }
            },
        );

        for value in values {
            let (storage, constructed) = &mut *guard;

            let index = base
                .checked_add(*constructed)
                .expect("guarded by capacity check on the previous construction");

            assert!(
                index < storage.capacity(),
                "constructing more items than fit in array of {} with capacity {}",
                type_name::<T>(),
                storage.capacity()
            );

            // SAFETY: The slot is within capacity (asserted above) and raw because it is
            // beyond both the live items and the ones constructed so far in this call.
            unsafe {
                storage.write_slot(index, value);
            }

            *constructed = constructed
                .checked_add(1)
                .expect("guarded by index < capacity above");
        }

        let (_, constructed) = ScopeGuard::into_inner(guard);

        self.len = base
            .checked_add(constructed)
            .expect("guarded by capacity check on every construction");

        #[cfg(debug_assertions)]
        self.integrity_check();
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    pub(crate) fn integrity_check(&self) {
        self.storage.integrity_check(self.len);
    }

    pub(crate) fn into_storage(self) -> (RawStorage<T>, usize) {
        let mut array = mem::ManuallyDrop::new(self);

        // The array is not dropped, so its items and block now belong to the caller.
        (array.storage.take(), mem::replace(&mut array.len, 0))
    }
}

/// Reports allocation failure from contexts that cannot return an error.
fn infallible<T, R>(result: Result<R>) -> R {
    match result {
        Ok(value) => value,
        Err(Error::OutOfMemory { requested }) => match Layout::array::<T>(requested) {
            Ok(layout) => handle_alloc_error(layout),
            Err(_) => panic!(
                "capacity overflow: {requested} items of {} exceed the addressable size",
                type_name::<T>()
            ),
        },
        Err(error) => panic!("unexpected error from storage operation: {error}"),
    }
}

impl<T> Drop for DynArray<T> {
    fn drop(&mut self) {
        self.clear();
        self.storage.release();
    }
}

impl<T> Default for DynArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Clone for DynArray<T> {
    /// # Panics
    ///
    /// Reports allocation failure via [`handle_alloc_error`].
    fn clone(&self) -> Self {
        infallible::<T, _>(self.try_clone())
    }

    /// Reuses the existing storage block if it can hold all the items of `source`.
    fn clone_from(&mut self, source: &Self) {
        self.clear();

        if self.capacity() < source.len {
            // Nothing is live, so the block can be replaced without relocating anything.
            self.storage = infallible::<T, _>(RawStorage::with_capacity(source.capacity()));
        }

        self.construct_tail(source.iter().cloned());
    }
}

impl<T: fmt::Debug> fmt::Debug for DynArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: PartialEq> PartialEq for DynArray<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl<T: Eq> Eq for DynArray<T> {}

impl<T: Hash> Hash for DynArray<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_slice().hash(state);
    }
}

impl<T> Deref for DynArray<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T> DerefMut for DynArray<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T> AsRef<[T]> for DynArray<T> {
    fn as_ref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T> AsMut<[T]> for DynArray<T> {
    fn as_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T> Borrow<[T]> for DynArray<T> {
    fn borrow(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T> BorrowMut<[T]> for DynArray<T> {
    fn borrow_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<'a, T> IntoIterator for &'a DynArray<T> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_slice().iter()
    }
}

impl<'a, T> IntoIterator for &'a mut DynArray<T> {
    type Item = &'a mut T;
    type IntoIter = slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_mut_slice().iter_mut()
    }
}

impl<T> Extend<T> for DynArray<T> {
    /// # Panics
    ///
    /// Reports allocation failure via [`handle_alloc_error`].
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            infallible::<T, _>(self.push(value));
        }
    }
}

impl<'a, T: Clone + 'a> Extend<&'a T> for DynArray<T> {
    /// # Panics
    ///
    /// Reports allocation failure via [`handle_alloc_error`].
    fn extend<I: IntoIterator<Item = &'a T>>(&mut self, iter: I) {
        for value in iter {
            infallible::<T, _>(self.push_cloned(value));
        }
    }
}

impl<T> FromIterator<T> for DynArray<T> {
    /// # Panics
    ///
    /// Reports allocation failure via [`handle_alloc_error`].
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut array = Self::new();
        array.extend(iter);
        array
    }
}
