//! Core lock-free SPSC slot ring.
//!
//! Holds the queue header, owns the slot array and implements the per-slot
//! flag protocol. The public handles in [`crate::sync::spsc`] are thin safe
//! wrappers around it.
//!
//! # Protocol
//!
//! Every slot carries one atomic flag, `EMPTY` or `FULL`:
//!
//! - The producer may write a payload only after loading `EMPTY` (acquire) at
//!   its write cursor, and hands it over by storing `FULL` (release).
//! - The consumer may read a payload only after loading `FULL` (acquire) at
//!   its read cursor, and hands it back by storing `EMPTY` (release).
//!
//! The flag is the only state both sides touch. Cursors are plain cells, each
//! owned by exactly one side.
//!
//! # Safety
//!
//! The protocol methods are `unsafe` because they require the caller to
//! uphold the SPSC invariant: exactly one producer and one consumer, with no
//! concurrent access to either role.

use std::alloc;
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::CreateError;
use crate::index::bump_cursor;
use crate::layout::{CACHE_LINE_SIZE, CachePadded, FLAG_SIZE, SlotLayout};
use crate::trace::{debug, error};

/// Flag value of a slot the producer may fill.
pub const EMPTY: usize = 0;

/// Flag value of a slot the consumer may drain.
pub const FULL: usize = 1;

/// Role marker: fields owned exclusively by the producer.
pub struct ProducerRole;

/// Role marker: fields owned exclusively by the consumer.
pub struct ConsumerRole;

/// Interior-mutable cell with a role marker for nominal type safety.
///
/// The `Role` parameter has no runtime effect; it keeps producer-owned and
/// consumer-owned cells from being mixed up at compile time.
#[repr(transparent)]
pub struct SpscCell<T, Role>(UnsafeCell<T>, PhantomData<Role>);

impl<T, Role> SpscCell<T, Role> {
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value), PhantomData)
    }

    pub const fn get(&self) -> &UnsafeCell<T> {
        &self.0
    }
}

// SAFETY: each SpscCell is only ever read or written by the one side named by
// its Role; the other side never touches it.
unsafe impl<T: Send, Role> Sync for SpscCell<T, Role> {}
unsafe impl<T: Send, Role> Send for SpscCell<T, Role> {}

/// Cell owned exclusively by the producer.
pub type ProducerCell<T> = SpscCell<T, ProducerRole>;

/// Cell owned exclusively by the consumer.
pub type ConsumerCell<T> = SpscCell<T, ConsumerRole>;

/// Read-only queue metadata, shared by both sides.
pub struct Meta {
    pub layout: SlotLayout,
    /// Base of the cache-line-aligned slot array.
    pub slots: NonNull<u8>,
}

/// Producer-side state.
pub struct ProducerState {
    /// Index of the next slot to fill, in `[0, capacity)`.
    pub cursor: ProducerCell<usize>,
}

/// Consumer-side state.
pub struct ConsumerState {
    /// Index of the next slot to drain, in `[0, capacity)`.
    pub cursor: ConsumerCell<usize>,
}

/// Queue header.
///
/// Each group starts its own cache line so the producer's cursor, the
/// consumer's cursor and the metadata both of them read never share a line.
#[repr(C)]
pub struct RawQueue {
    pub meta: CachePadded<Meta>,
    pub producer: CachePadded<ProducerState>,
    pub consumer: CachePadded<ConsumerState>,
    /// Filled slots. Advisory only; never gates push or pop.
    pub occupancy: CachePadded<AtomicUsize>,
}

/// Start of every slot, ahead of its payload bytes.
#[repr(C)]
pub struct SlotHeader {
    /// `EMPTY` or `FULL`.
    pub flag: AtomicUsize,
}

impl SlotHeader {
    const fn new() -> Self {
        Self {
            flag: AtomicUsize::new(EMPTY),
        }
    }
}

const _: () = assert!(size_of::<SlotHeader>() == FLAG_SIZE);
const _: () = assert!(align_of::<SlotHeader>() <= CACHE_LINE_SIZE);

/// View of one slot: its header and the start of its payload.
pub struct Slot<'a> {
    header: &'a SlotHeader,
    payload: NonNull<u8>,
}

impl Slot<'_> {
    #[inline]
    pub fn is_full(&self) -> bool {
        self.header.flag.load(Ordering::Acquire) == FULL
    }

    #[inline]
    pub fn payload(&self) -> NonNull<u8> {
        self.payload
    }
}

impl RawQueue {
    /// Allocates the slot array and marks every slot empty.
    ///
    /// # Errors
    ///
    /// [`CreateError::AllocationFailure`] if the allocator returns null.
    pub fn new(layout: SlotLayout) -> Result<Self, CreateError> {
        let array = layout.array();

        // SAFETY: `array` has non-zero size (capacity >= 1, stride >= one
        // cache line) and a power-of-two alignment, both checked by SlotLayout.
        let base = unsafe { alloc::alloc_zeroed(array) };
        let Some(slots) = NonNull::new(base) else {
            error!(bytes = array.size(), "slot array allocation failed");
            return Err(CreateError::AllocationFailure {
                bytes: array.size(),
            });
        };

        for index in 0..layout.capacity() {
            // SAFETY: offset_of(index) < array.size() and every slot starts on
            // a cache line boundary, so the header is in bounds and aligned.
            unsafe {
                slots
                    .add(layout.offset_of(index))
                    .cast::<SlotHeader>()
                    .write(SlotHeader::new());
            }
        }

        Ok(Self {
            meta: CachePadded::new(Meta { layout, slots }),
            producer: CachePadded::new(ProducerState {
                cursor: ProducerCell::new(0),
            }),
            consumer: CachePadded::new(ConsumerState {
                cursor: ConsumerCell::new(0),
            }),
            occupancy: CachePadded::new(AtomicUsize::new(0)),
        })
    }

    #[inline]
    pub fn layout(&self) -> &SlotLayout {
        &self.meta.layout
    }

    /// Returns the slot at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= capacity`.
    #[inline]
    pub fn slot(&self, index: usize) -> Slot<'_> {
        let offset = self.meta.layout.offset_of(index);

        // SAFETY: offset is bounds-checked above. The header was written in
        // `new` and lives as long as `self`. The payload starts right after
        // it and spans element_size bytes, which fits in the stride.
        unsafe {
            let header = self.meta.slots.add(offset).cast::<SlotHeader>();
            Slot {
                header: header.as_ref(),
                payload: header.add(1).cast::<u8>(),
            }
        }
    }

    #[inline]
    pub fn occupancy(&self) -> usize {
        self.occupancy.load(Ordering::Relaxed)
    }

    /// Whether the slot at the write cursor is empty.
    ///
    /// # Safety
    ///
    /// Must only be called by the single producer.
    #[inline]
    pub unsafe fn push_ready(&self) -> bool {
        // SAFETY: the producer is the only accessor of its cursor.
        let cursor = unsafe { *self.producer.cursor.get().get() };
        !self.slot(cursor).is_full()
    }

    /// Payload of the slot at the write cursor.
    ///
    /// # Safety
    ///
    /// Must only be called by the single producer.
    #[inline]
    pub unsafe fn push_payload(&self) -> NonNull<u8> {
        // SAFETY: the producer is the only accessor of its cursor.
        let cursor = unsafe { *self.producer.cursor.get().get() };
        self.slot(cursor).payload()
    }

    /// Hands the slot at the write cursor to the consumer and advances.
    ///
    /// # Safety
    ///
    /// Must only be called by the single producer, after `push_ready`
    /// returned `true` for the current cursor.
    #[inline]
    pub unsafe fn publish(&self) {
        // SAFETY: the producer is the only accessor of its cursor.
        let cursor = unsafe { &mut *self.producer.cursor.get().get() };
        let slot = self.slot(*cursor);

        // Counted before the flag flips so the consumer's decrement for this
        // slot is always ordered after this increment.
        self.occupancy.fetch_add(1, Ordering::Relaxed);
        slot.header.flag.store(FULL, Ordering::Release);

        *cursor = bump_cursor(*cursor, self.meta.layout.mask());
    }

    /// Whether the slot at the read cursor is full.
    ///
    /// # Safety
    ///
    /// Must only be called by the single consumer.
    #[inline]
    pub unsafe fn pop_ready(&self) -> bool {
        // SAFETY: the consumer is the only accessor of its cursor.
        let cursor = unsafe { *self.consumer.cursor.get().get() };
        self.slot(cursor).is_full()
    }

    /// Payload of the slot at the read cursor.
    ///
    /// # Safety
    ///
    /// Must only be called by the single consumer.
    #[inline]
    pub unsafe fn pop_payload(&self) -> NonNull<u8> {
        // SAFETY: the consumer is the only accessor of its cursor.
        let cursor = unsafe { *self.consumer.cursor.get().get() };
        self.slot(cursor).payload()
    }

    /// Hands the slot at the read cursor back to the producer and advances.
    ///
    /// # Safety
    ///
    /// Must only be called by the single consumer, after `pop_ready`
    /// returned `true` for the current cursor.
    #[inline]
    pub unsafe fn release(&self) {
        // SAFETY: the consumer is the only accessor of its cursor.
        let cursor = unsafe { &mut *self.consumer.cursor.get().get() };
        let slot = self.slot(*cursor);

        // Uncounted before the flag flips so the producer's next increment
        // for this slot is always ordered after this decrement.
        self.occupancy.fetch_sub(1, Ordering::Relaxed);
        slot.header.flag.store(EMPTY, Ordering::Release);

        *cursor = bump_cursor(*cursor, self.meta.layout.mask());
    }
}

impl Drop for RawQueue {
    fn drop(&mut self) {
        debug!(
            capacity = self.meta.layout.capacity(),
            stride = self.meta.layout.stride(),
            "releasing slot array"
        );
        // SAFETY: `slots` was allocated in `new` with exactly this layout and
        // is freed only here.
        unsafe { alloc::dealloc(self.meta.slots.as_ptr(), self.meta.layout.array()) };
    }
}

// SAFETY: RawQueue owns its slot array outright; the raw pointer is never
// shared outside the queue.
unsafe impl Send for RawQueue {}

// SAFETY: concurrent access is mediated by the slot flags:
// - payload bytes change hands only through release/acquire on the flag
// - each cursor is touched by one side only (see SpscCell)
// - occupancy is atomic
unsafe impl Sync for RawQueue {}

#[cfg(test)]
mod tests {
    use std::mem::offset_of;

    use super::*;

    fn queue(capacity: usize, element_size: usize) -> RawQueue {
        RawQueue::new(SlotLayout::new(capacity, element_size).unwrap()).unwrap()
    }

    #[test]
    fn test_header_groups_start_separate_cache_lines() {
        let meta_lines = size_of::<Meta>().div_ceil(CACHE_LINE_SIZE);
        let producer = offset_of!(RawQueue, producer);

        assert_eq!(offset_of!(RawQueue, meta), 0);
        assert_eq!(producer, meta_lines * CACHE_LINE_SIZE);
        assert_eq!(offset_of!(RawQueue, consumer), producer + CACHE_LINE_SIZE);
        assert_eq!(offset_of!(RawQueue, occupancy), producer + 2 * CACHE_LINE_SIZE);
        assert_eq!(size_of::<RawQueue>(), producer + 3 * CACHE_LINE_SIZE);
        assert_eq!(align_of::<RawQueue>(), CACHE_LINE_SIZE);

        if CACHE_LINE_SIZE == 64 {
            assert_eq!(producer, 64);
        }
    }

    #[test]
    fn test_slot_array_is_cache_aligned_and_empty() {
        let q = queue(26, CACHE_LINE_SIZE - FLAG_SIZE);
        assert_eq!(q.meta.slots.as_ptr() as usize % CACHE_LINE_SIZE, 0);
        for index in 0..q.layout().capacity() {
            let slot = q.slot(index);
            assert!(!slot.is_full());
            assert_eq!(slot.header as *const SlotHeader as usize % CACHE_LINE_SIZE, 0);
            assert_eq!(
                slot.payload().as_ptr() as usize - slot.header as *const SlotHeader as usize,
                FLAG_SIZE
            );
        }
        assert_eq!(q.occupancy(), 0);
    }

    #[test]
    fn test_header_flag_tracks_publish_and_release() {
        let q = queue(2, 8);
        let flag = |index| q.slot(index).header.flag.load(Ordering::Relaxed);

        assert_eq!(flag(0), EMPTY);
        unsafe { q.publish() };
        assert_eq!(flag(0), FULL);
        assert_eq!(flag(1), EMPTY);
        unsafe { q.release() };
        assert_eq!(flag(0), EMPTY);
    }

    #[test]
    #[should_panic(expected = "slot index out of bounds")]
    fn test_slot_index_is_bounds_checked() {
        let q = queue(4, 8);
        let _ = q.slot(4);
    }

    #[test]
    fn test_publish_marks_slot_and_advances_cursor() {
        let q = queue(26, 1);

        for (i, byte) in (b'A'..=b'Z').enumerate() {
            unsafe {
                assert!(q.push_ready());
                q.push_payload().write(byte);
                q.publish();
            }
            assert_eq!(q.occupancy(), i + 1);
        }

        assert_eq!(unsafe { *q.producer.cursor.get().get() }, 26);
        let slot = q.slot(12);
        assert!(slot.is_full());
        assert_eq!(unsafe { slot.payload().read() }, b'M');
    }

    #[test]
    fn test_release_acts_on_read_cursor_slot() {
        let q = queue(26, 1);
        for byte in b'A'..=b'Z' {
            unsafe {
                q.push_payload().write(byte);
                q.publish();
            }
        }

        let mut last = None;
        for i in 0..13 {
            unsafe {
                assert!(q.pop_ready());
                last = Some(q.pop_payload().read());
                q.release();
            }
            assert_eq!(q.occupancy(), 26 - i - 1);
        }

        assert_eq!(last, Some(b'M'));
        assert_eq!(unsafe { *q.consumer.cursor.get().get() }, 13);
        assert!(!q.slot(12).is_full());
        assert!(q.slot(13).is_full());
        // Write cursor stayed put; its slot must not have been touched.
        assert!(!q.slot(26).is_full());
    }

    #[test]
    fn test_full_ring_refuses_push_until_release() {
        let q = queue(4, 8);
        for _ in 0..4 {
            unsafe {
                assert!(q.push_ready());
                q.publish();
            }
        }
        assert!(!unsafe { q.push_ready() });

        unsafe { q.release() };
        assert!(unsafe { q.push_ready() });
        assert_eq!(q.occupancy(), 3);
    }

    #[test]
    fn test_capacity_one_ping_pongs() {
        let q = queue(1, 8);
        for round in 0..3u8 {
            unsafe {
                assert!(q.push_ready());
                assert!(!q.pop_ready());
                q.push_payload().write(round);
                q.publish();
                assert!(!q.push_ready());
                assert!(q.pop_ready());
                assert_eq!(q.pop_payload().read(), round);
                q.release();
            }
        }
    }
}
