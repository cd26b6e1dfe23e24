use thiserror::Error;

/// Errors that can occur when operating on a [`DynArray`][crate::DynArray].
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
    /// Storage for the requested number of items could not be obtained, either because the
    /// allocator refused the request or because the size in bytes is not representable.
    ///
    /// The array is left exactly as it was before the failing call.
    #[error("out of memory: cannot allocate storage for {requested} items")]
    OutOfMemory {
        /// The capacity, in items, that the failed request asked for.
        requested: usize,
    },

    /// A checked access referred to an index that does not hold a live item.
    #[error("index {index} is out of range for an array of length {len}")]
    IndexOutOfRange {
        /// The index that was requested.
        index: usize,

        /// The number of live items at the time of the request.
        len: usize,
    },

    /// The first or last item was requested from an array that holds no items.
    #[error("the array is empty")]
    EmptyContainer,
}

/// A specialized `Result` type for array operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
