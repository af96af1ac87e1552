//! Cache-line geometry and slot sizing.
//!
//! The cache line size is fixed at build time. It defaults to 64 bytes and
//! can be switched with the `cache-line-32` or `cache-line-128` features.
//!
//! # Slot geometry
//!
//! ```text
//! stride = round_up(FLAG_SIZE + element_size, CACHE_LINE_SIZE)
//!
//! ┌──────────── slot 0 ────────────┬──────────── slot 1 ────────────┬─ ...
//! │ flag │ payload │   padding     │ flag │ payload │   padding     │
//! └────────────────────────────────┴────────────────────────────────┴─ ...
//! ^ array base, CACHE_LINE_SIZE aligned
//! ```

use std::alloc::Layout;
use std::ops::Deref;
use std::sync::atomic::AtomicUsize;

use crate::error::CreateError;
use crate::index::{is_power_of_two, next_power_of_two};

#[cfg(all(feature = "cache-line-32", feature = "cache-line-128"))]
compile_error!("features `cache-line-32` and `cache-line-128` are mutually exclusive");

/// Cache line size in bytes used for padding and slot strides.
#[cfg(feature = "cache-line-32")]
pub const CACHE_LINE_SIZE: usize = 32;

/// Cache line size in bytes used for padding and slot strides.
#[cfg(feature = "cache-line-128")]
pub const CACHE_LINE_SIZE: usize = 128;

/// Cache line size in bytes used for padding and slot strides.
#[cfg(not(any(feature = "cache-line-32", feature = "cache-line-128")))]
pub const CACHE_LINE_SIZE: usize = 64;

const _: () = assert!(is_power_of_two(CACHE_LINE_SIZE));

/// Bytes at the start of every slot taken by its occupancy flag.
pub const FLAG_SIZE: usize = size_of::<AtomicUsize>();

/// Pads and aligns a value to the start of its own cache line.
#[repr(C)]
#[cfg_attr(feature = "cache-line-32", repr(align(32)))]
#[cfg_attr(feature = "cache-line-128", repr(align(128)))]
#[cfg_attr(
    not(any(feature = "cache-line-32", feature = "cache-line-128")),
    repr(align(64))
)]
pub(crate) struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Rounds `n` up to a multiple of [`CACHE_LINE_SIZE`], or `None` on overflow.
#[inline]
#[must_use]
pub const fn round_up_to_cache_line(n: usize) -> Option<usize> {
    n.checked_next_multiple_of(CACHE_LINE_SIZE)
}

/// Validated geometry of a slot array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    capacity: usize,
    element_size: usize,
    stride: usize,
    array: Layout,
}

impl SlotLayout {
    /// Computes the geometry for `capacity` slots holding `element_size` bytes each.
    ///
    /// Capacity is rounded up to a power of two (minimum 1) and each slot is
    /// rounded up to a whole number of cache lines including its flag.
    ///
    /// # Errors
    ///
    /// - [`CreateError::InvalidElementSize`] if `element_size == 0`
    /// - [`CreateError::CapacityOverflow`] if `capacity` has no power of two above it
    /// - [`CreateError::SizeOverflow`] if the stride or the array size overflows,
    ///   or the array exceeds what a single allocation may span
    pub fn new(capacity: usize, element_size: usize) -> Result<Self, CreateError> {
        if element_size == 0 {
            return Err(CreateError::InvalidElementSize);
        }

        let requested = capacity;
        let capacity =
            next_power_of_two(requested).ok_or(CreateError::CapacityOverflow { requested })?;

        let overflow = CreateError::SizeOverflow {
            capacity,
            element_size,
        };

        let stride = element_size
            .checked_add(FLAG_SIZE)
            .and_then(round_up_to_cache_line)
            .ok_or(overflow)?;

        let bytes = capacity.checked_mul(stride).ok_or(overflow)?;
        let array = Layout::from_size_align(bytes, CACHE_LINE_SIZE).map_err(|_| overflow)?;

        Ok(Self {
            capacity,
            element_size,
            stride,
            array,
        })
    }

    /// Number of slots (a power of two).
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Usable payload bytes per slot, as requested at creation.
    #[inline]
    #[must_use]
    pub const fn element_size(&self) -> usize {
        self.element_size
    }

    /// Bytes between the starts of consecutive slots.
    #[inline]
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// `capacity - 1`, used to wrap cursors.
    #[inline]
    #[must_use]
    pub const fn mask(&self) -> usize {
        self.capacity - 1
    }

    /// Allocation layout of the whole slot array.
    #[inline]
    #[must_use]
    pub const fn array(&self) -> Layout {
        self.array
    }

    /// Byte offset of slot `index` from the array base.
    ///
    /// # Panics
    ///
    /// Panics if `index >= capacity`.
    #[inline]
    #[must_use]
    pub const fn offset_of(&self, index: usize) -> usize {
        assert!(index < self.capacity, "slot index out of bounds");
        index * self.stride
    }
}
