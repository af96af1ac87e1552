//! Errors reported when creating a queue.
//!
//! These are the only failures the crate surfaces. A full or empty queue on
//! the hot path is an ordinary `None`, never an error.

use thiserror::Error;

/// Failure to create a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CreateError {
    /// The requested element size was zero.
    #[error("element size must be greater than zero")]
    InvalidElementSize,

    /// The requested capacity has no representable power of two at or above it.
    #[error("capacity {requested} cannot be rounded up to a power of two")]
    CapacityOverflow {
        /// Capacity passed by the caller.
        requested: usize,
    },

    /// The slot stride or the total array size does not fit in the address space.
    #[error("slot array for capacity {capacity} and element size {element_size} overflows")]
    SizeOverflow {
        /// Realized (power-of-two) capacity.
        capacity: usize,
        /// Element size passed by the caller.
        element_size: usize,
    },

    /// The allocator could not provide the backing array.
    #[error("failed to allocate {bytes} bytes for the slot array")]
    AllocationFailure {
        /// Size of the rejected allocation.
        bytes: usize,
    },
}
