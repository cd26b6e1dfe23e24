#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A growable, contiguous array that manages its own raw storage.
//!
//! This crate provides [`DynArray`], a dynamic array in the spirit of `Vec<T>` that is built
//! directly on the global allocator. It keeps a strict separation between the capacity of its
//! storage block and the number of live items in it, with every construction and destruction
//! of an item going through a small set of storage primitives.
//!
//! # Key Features
//!
//! - **Lazy allocation**: an empty array holds no storage until the first item arrives
//! - **Amortized doubling**: appending to a full array grows capacity 0, 1, 2, 4, 8, ...
//! - **Exact reservation**: [`reserve()`](DynArray::reserve) sets the capacity to exactly the
//!   requested value, shrinking the block if asked to
//! - **Fallible allocation**: operations that allocate return [`Error::OutOfMemory`] instead
//!   of aborting, leaving the array untouched
//! - **Panic safety**: a panicking `Clone` or `Default` never leaks items or storage
//! - **Checked and unchecked access**: [`at()`](DynArray::at), [`front()`](DynArray::front) and
//!   [`back()`](DynArray::back) report errors, [`get_unchecked()`](DynArray::get_unchecked) does
//!   not check at all
//! - **Slice view**: the live items deref to `[T]` for iteration, sorting and random access
//!
//! # Examples
//!
//! ## Appending and reading back
//!
//! ```rust
//! use dynarray::DynArray;
//!
//! let mut array = DynArray::new();
//!
//! for value in [1, 2, 3] {
//!     array.push(value).unwrap();
//! }
//!
//! assert_eq!(array.as_slice(), &[1, 2, 3]);
//! assert_eq!(array.capacity(), 4);
//! ```
//!
//! ## Handling errors
//!
//! ```rust
//! use dynarray::{DynArray, Error};
//!
//! let mut array = DynArray::<u64>::new();
//!
//! assert_eq!(array.front(), Err(Error::EmptyContainer));
//!
//! array.push(7).unwrap();
//! assert_eq!(array.at(1), Err(Error::IndexOutOfRange { index: 1, len: 1 }));
//!
//! // No allocator can provide this much memory.
//! assert!(matches!(
//!     array.reserve(usize::MAX),
//!     Err(Error::OutOfMemory { .. })
//! ));
//! assert_eq!(array.as_slice(), &[7]);
//! ```
//!
//! ## Sorting through the slice view
//!
//! ```rust
//! use dynarray::DynArray;
//!
//! let mut array: DynArray<i32> = [5, 3, 9, 1, 4].into_iter().collect();
//!
//! array.sort();
//!
//! assert_eq!(array.as_slice(), &[1, 3, 4, 5, 9]);
//! ```

mod array;
mod builder;
mod error;
mod into_iter;
mod raw;

pub use array::DynArray;
pub use builder::*;
pub use error::*;
pub use into_iter::IntoIter;
