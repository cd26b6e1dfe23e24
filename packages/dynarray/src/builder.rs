use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;

use crate::{DynArray, Result};

/// Builder for creating an instance of [`DynArray`].
///
/// You only need to use this builder if you want to customize the array configuration.
/// [`DynArray::new()`][1] creates an empty array with no storage, which is sufficient for most
/// use cases.
///
/// # Examples
///
/// ```
/// use dynarray::DynArray;
///
/// let array = DynArray::<u32>::builder()
///     .capacity(64)
///     .build()
///     .unwrap();
///
/// assert_eq!(array.capacity(), 64);
/// assert!(array.is_empty());
/// ```
///
/// [1]: DynArray::new
#[must_use]
pub struct DynArrayBuilder<T> {
    capacity: usize,

    _item: PhantomData<T>,
}

impl<T> fmt::Debug for DynArrayBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynArrayBuilder")
            .field("item_type", &format_args!("{}", type_name::<T>()))
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<T> DynArrayBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            capacity: 0,
            _item: PhantomData,
        }
    }

    /// Sets the number of items the array has room for when created. The storage is allocated
    /// by [`build()`][Self::build]. Defaults to zero, which allocates nothing.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Builds the array with the specified configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`][crate::Error::OutOfMemory] if the initial storage
    /// cannot be allocated.
    pub fn build(self) -> Result<DynArray<T>> {
        DynArray::with_capacity(self.capacity)
    }
}
