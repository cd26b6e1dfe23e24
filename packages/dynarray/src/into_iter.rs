use std::any::type_name;
use std::fmt;
use std::iter::FusedIterator;
use std::slice;

use crate::DynArray;
use crate::raw::RawStorage;

/// An iterator that moves the items out of a [`DynArray`], front to back.
///
/// Items not yet yielded when the iterator is dropped are dropped in index order, after which
/// the storage block is released.
///
/// # Examples
///
/// ```
/// use dynarray::DynArray;
///
/// let array: DynArray<String> = ["a", "b", "c"].into_iter().map(String::from).collect();
///
/// let mut items = array.into_iter();
///
/// assert_eq!(items.next().as_deref(), Some("a"));
/// assert_eq!(items.next_back().as_deref(), Some("c"));
/// assert_eq!(items.as_slice(), &["b".to_string()]);
/// ```
pub struct IntoIter<T> {
    storage: RawStorage<T>,

    /// Slots `start..end` hold the items not yet yielded; all other slots are raw.
    start: usize,
    end: usize,
}

impl<T> IntoIter<T> {
    /// The items that have not been yielded yet.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        let len = self.remaining();

        // SAFETY: Slots start..end are live and within the block, so the pointer is valid for
        // `len` items.
        unsafe { slice::from_raw_parts(self.storage.slot(self.start).as_ptr(), len) }
    }

    /// The items that have not been yielded yet, as an exclusive slice.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let len = self.remaining();

        // SAFETY: Slots start..end are live and within the block, so the pointer is valid for
        // `len` items, and we hold an exclusive reference to the iterator.
        unsafe { slice::from_raw_parts_mut(self.storage.slot(self.start).as_ptr(), len) }
    }

    fn remaining(&self) -> usize {
        self.end
            .checked_sub(self.start)
            .expect("start never passes end")
    }
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.start == self.end {
            return None;
        }

        let index = self.start;
        self.start = index.checked_add(1).expect("guarded by start < end");

        // SAFETY: The slot was live and is now outside start..end, so nobody else reads or
        // drops it.
        Some(unsafe { self.storage.read_slot(index) })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl<T> DoubleEndedIterator for IntoIter<T> {
    fn next_back(&mut self) -> Option<T> {
        if self.start == self.end {
            return None;
        }

        self.end = self.end.checked_sub(1).expect("guarded by start < end");

        // SAFETY: The slot was live and is now outside start..end, so nobody else reads or
        // drops it.
        Some(unsafe { self.storage.read_slot(self.end) })
    }
}

impl<T> ExactSizeIterator for IntoIter<T> {}

impl<T> FusedIterator for IntoIter<T> {}

impl<T> Drop for IntoIter<T> {
    fn drop(&mut self) {
        // SAFETY: Slots start..end are exactly the live items; the rest were moved out.
        unsafe {
            self.storage.drop_range(self.start, self.end);
        }

        // The storage field releases the block when it is dropped after this.
    }
}

impl<T: fmt::Debug> fmt::Debug for IntoIter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntoIter")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("remaining", &self.as_slice())
            .finish()
    }
}

impl<T> IntoIterator for DynArray<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        let (storage, len) = self.into_storage();

        IntoIter {
            storage,
            start: 0,
            end: len,
        }
    }
}
