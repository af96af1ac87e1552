//! Lock-free SPSC slot queue for in-process (inter-thread) communication.
//!
//! A bounded queue of fixed-size byte slots. Payloads are written and read in
//! place: the producer borrows the next free slot, fills it and publishes it;
//! the consumer borrows the next full slot, reads it and releases it.
//!
//! # Overview
//!
//! - [`Producer`] - Write end (single producer per queue)
//! - [`Consumer`] - Read end (single consumer per queue)
//! - Lock-free: no mutexes, syscalls or allocation in the hot path
//!
//! # Example
//!
//! ```
//! use slotring::sync::spsc;
//!
//! let (mut producer, mut consumer) = spsc::channel(1024, 8)?;
//!
//! // Producer thread
//! let slot = producer.try_acquire_push().expect("queue full");
//! slot.copy_from_slice(&42u64.to_le_bytes());
//! producer.finish_push();
//!
//! // Consumer thread
//! let slot = consumer.try_acquire_pop().expect("queue empty");
//! assert_eq!(u64::from_le_bytes(slot.try_into().unwrap()), 42);
//! consumer.finish_pop();
//! # Ok::<(), slotring::CreateError>(())
//! ```
//!
//! # Teardown
//!
//! Both handles share one reference-counted header. The slot array is freed
//! when the last of them is dropped, so teardown can never overlap a push or
//! pop on the other side.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use minstant::Instant;

use crate::config::QueueConfig;
use crate::error::CreateError;
use crate::layout::SlotLayout;
use crate::spsc::ring::RawQueue;
use crate::trace::{info, trace, warn};
use crate::wait::{WaitStrategy, Waiter};

/// Deadline `timeout` from now, or `None` if it cannot be represented.
///
/// minstant truncates durations beyond `u64` nanoseconds instead of failing,
/// so those are rejected here before `checked_add`.
fn deadline_after(timeout: Duration) -> Option<Instant> {
    u64::try_from(timeout.as_nanos()).ok()?;
    Instant::now().checked_add(timeout)
}

/// Marker type to opt-out of `Sync` while remaining `Send`.
type PhantomUnsync = PhantomData<Cell<&'static ()>>;

/// Write end of the slot queue.
///
/// # Thread Safety
///
/// `Producer` is [`Send`] but **not** [`Sync`]:
/// - Can transfer ownership to another thread
/// - Cannot share `&Producer` between threads
pub struct Producer {
    queue: Arc<RawQueue>,
    wait: WaitStrategy,
    /// Set by a successful acquire, cleared by `finish_push`.
    acquired: bool,
    _unsync: PhantomUnsync,
}

/// Read end of the slot queue.
///
/// See [`Producer`] for thread safety details (same semantics apply).
pub struct Consumer {
    queue: Arc<RawQueue>,
    wait: WaitStrategy,
    /// Set by a successful acquire, cleared by `finish_pop`.
    acquired: bool,
    _unsync: PhantomUnsync,
}

/// Creates a queue of at least `capacity` slots of `element_size` bytes.
///
/// Blocking acquires use [`WaitStrategy::Spin`]. See
/// [`channel_with_config`] for the other knobs.
///
/// # Errors
///
/// See [`channel_with_config`].
///
/// # Example
///
/// ```
/// use slotring::sync::spsc;
///
/// let (producer, consumer) = spsc::channel(26, 56)?;
/// assert_eq!(producer.capacity(), 32);
/// assert_eq!(consumer.element_size(), 56);
/// # Ok::<(), slotring::CreateError>(())
/// ```
pub fn channel(capacity: usize, element_size: usize) -> Result<(Producer, Consumer), CreateError> {
    channel_with_config(&QueueConfig {
        capacity,
        element_size,
        wait: WaitStrategy::Spin,
    })
}

/// Creates a queue from a [`QueueConfig`].
///
/// Capacity is rounded up to a power of two (minimum 1). Each slot is
/// `element_size` plus its flag, rounded up to whole cache lines.
///
/// # Errors
///
/// - [`CreateError::InvalidElementSize`] if `element_size == 0`
/// - [`CreateError::CapacityOverflow`] if capacity has no power of two above it
/// - [`CreateError::SizeOverflow`] if the slot array size overflows
/// - [`CreateError::AllocationFailure`] if the allocator refuses the slot array
pub fn channel_with_config(config: &QueueConfig) -> Result<(Producer, Consumer), CreateError> {
    let layout = match SlotLayout::new(config.capacity, config.element_size) {
        Ok(layout) => layout,
        Err(err) => {
            warn!(
                %err,
                capacity = config.capacity,
                element_size = config.element_size,
                "rejected slot queue geometry"
            );
            return Err(err);
        }
    };

    let queue = Arc::new(RawQueue::new(layout)?);

    info!(
        requested_capacity = config.capacity,
        capacity = layout.capacity(),
        element_size = layout.element_size(),
        stride = layout.stride(),
        wait = ?config.wait,
        "slot queue created"
    );

    let producer = Producer {
        queue: Arc::clone(&queue),
        wait: config.wait,
        acquired: false,
        _unsync: PhantomData,
    };

    let consumer = Consumer {
        queue,
        wait: config.wait,
        acquired: false,
        _unsync: PhantomData,
    };

    Ok((producer, consumer))
}

impl Producer {
    /// Borrows the next free slot without waiting.
    ///
    /// Returns `None` if the queue is full. Call [`finish_push`](Self::finish_push)
    /// after writing to hand the slot to the consumer.
    #[inline]
    pub fn try_acquire_push(&mut self) -> Option<&mut [u8]> {
        // SAFETY: this handle is the queue's only producer.
        if unsafe { self.queue.push_ready() } {
            Some(self.push_slot())
        } else {
            None
        }
    }

    /// Waits until a slot is free, then borrows it.
    ///
    /// Waits according to the configured [`WaitStrategy`] with no timeout; if
    /// the consumer never releases a slot this never returns.
    #[inline]
    pub fn acquire_push_blocking(&mut self) -> &mut [u8] {
        let mut waiter = Waiter::new(self.wait);
        // SAFETY: this handle is the queue's only producer.
        while !unsafe { self.queue.push_ready() } {
            waiter.wait();
        }
        self.push_slot()
    }

    /// Waits up to `timeout` for a free slot.
    ///
    /// Returns `None` if the queue stayed full for the whole timeout.
    /// A timeout too large to represent as a deadline waits without limit.
    pub fn acquire_push_timeout(&mut self, timeout: Duration) -> Option<&mut [u8]> {
        let deadline = deadline_after(timeout);
        let mut waiter = Waiter::new(self.wait);
        loop {
            // SAFETY: this handle is the queue's only producer.
            if unsafe { self.queue.push_ready() } {
                return Some(self.push_slot());
            }
            if deadline.is_some_and(|deadline| Instant::now() > deadline) {
                trace!(
                    timeout_us = timeout.as_micros() as u64,
                    "push acquire timed out"
                );
                return None;
            }
            waiter.wait();
        }
    }

    /// Publishes the slot returned by the last successful acquire.
    ///
    /// Calling this without a successful acquire first breaks the queue's
    /// ordering; debug builds assert against it.
    #[inline]
    pub fn finish_push(&mut self) {
        debug_assert!(self.acquired, "finish_push without a successful acquire");
        self.acquired = false;
        // SAFETY: this handle is the queue's only producer, and the acquire
        // above observed the slot at the write cursor as empty.
        unsafe { self.queue.publish() }
    }

    /// Fills the next free slot with `fill` and publishes it.
    ///
    /// Returns `None` without calling `fill` if the queue is full.
    #[inline]
    pub fn try_push_with<R>(&mut self, fill: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let out = fill(self.try_acquire_push()?);
        self.finish_push();
        Some(out)
    }

    /// Waits for a free slot, fills it with `fill` and publishes it.
    #[inline]
    pub fn push_with<R>(&mut self, fill: impl FnOnce(&mut [u8]) -> R) -> R {
        let out = fill(self.acquire_push_blocking());
        self.finish_push();
        out
    }

    /// Number of filled slots at this instant. Advisory under concurrency.
    #[inline]
    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.queue.occupancy()
    }

    /// Number of slots (a power of two).
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.queue.layout().capacity()
    }

    /// Payload bytes per slot.
    #[inline]
    #[must_use]
    pub fn element_size(&self) -> usize {
        self.queue.layout().element_size()
    }

    /// Bytes between consecutive slots.
    #[inline]
    #[must_use]
    pub fn stride(&self) -> usize {
        self.queue.layout().stride()
    }

    fn push_slot(&mut self) -> &mut [u8] {
        self.acquired = true;
        let len = self.queue.layout().element_size();
        // SAFETY: the flag at the write cursor was loaded as EMPTY with acquire
        // ordering, so the consumer is done with these bytes and will not look
        // at them until `finish_push`. The slice borrows `self` mutably, which
        // `finish_push` also needs. The array is zero-initialized at creation.
        unsafe { std::slice::from_raw_parts_mut(self.queue.push_payload().as_ptr(), len) }
    }
}

impl Consumer {
    /// Borrows the next full slot without waiting.
    ///
    /// Returns `None` if the queue is empty. Call [`finish_pop`](Self::finish_pop)
    /// after reading to hand the slot back to the producer.
    #[inline]
    pub fn try_acquire_pop(&mut self) -> Option<&[u8]> {
        // SAFETY: this handle is the queue's only consumer.
        if unsafe { self.queue.pop_ready() } {
            Some(self.pop_slot())
        } else {
            None
        }
    }

    /// Waits until a slot is full, then borrows it.
    ///
    /// Waits according to the configured [`WaitStrategy`] with no timeout; if
    /// the producer never publishes this never returns.
    #[inline]
    pub fn acquire_pop_blocking(&mut self) -> &[u8] {
        let mut waiter = Waiter::new(self.wait);
        // SAFETY: this handle is the queue's only consumer.
        while !unsafe { self.queue.pop_ready() } {
            waiter.wait();
        }
        self.pop_slot()
    }

    /// Waits up to `timeout` for a full slot.
    ///
    /// Returns `None` if the queue stayed empty for the whole timeout.
    /// A timeout too large to represent as a deadline waits without limit.
    pub fn acquire_pop_timeout(&mut self, timeout: Duration) -> Option<&[u8]> {
        let deadline = deadline_after(timeout);
        let mut waiter = Waiter::new(self.wait);
        loop {
            // SAFETY: this handle is the queue's only consumer.
            if unsafe { self.queue.pop_ready() } {
                return Some(self.pop_slot());
            }
            if deadline.is_some_and(|deadline| Instant::now() > deadline) {
                trace!(
                    timeout_us = timeout.as_micros() as u64,
                    "pop acquire timed out"
                );
                return None;
            }
            waiter.wait();
        }
    }

    /// Releases the slot returned by the last successful acquire.
    ///
    /// Always acts on the slot at the read cursor. Calling this without a
    /// successful acquire first breaks the queue's ordering; debug builds
    /// assert against it.
    #[inline]
    pub fn finish_pop(&mut self) {
        debug_assert!(self.acquired, "finish_pop without a successful acquire");
        self.acquired = false;
        // SAFETY: this handle is the queue's only consumer, and the acquire
        // above observed the slot at the read cursor as full.
        unsafe { self.queue.release() }
    }

    /// Reads the next full slot with `read` and releases it.
    ///
    /// Returns `None` without calling `read` if the queue is empty.
    #[inline]
    pub fn try_pop_with<R>(&mut self, read: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let out = read(self.try_acquire_pop()?);
        self.finish_pop();
        Some(out)
    }

    /// Waits for a full slot, reads it with `read` and releases it.
    #[inline]
    pub fn pop_with<R>(&mut self, read: impl FnOnce(&[u8]) -> R) -> R {
        let out = read(self.acquire_pop_blocking());
        self.finish_pop();
        out
    }

    /// Number of filled slots at this instant. Advisory under concurrency.
    #[inline]
    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.queue.occupancy()
    }

    /// Number of slots (a power of two).
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.queue.layout().capacity()
    }

    /// Payload bytes per slot.
    #[inline]
    #[must_use]
    pub fn element_size(&self) -> usize {
        self.queue.layout().element_size()
    }

    /// Bytes between consecutive slots.
    #[inline]
    #[must_use]
    pub fn stride(&self) -> usize {
        self.queue.layout().stride()
    }

    fn pop_slot(&mut self) -> &[u8] {
        self.acquired = true;
        let len = self.queue.layout().element_size();
        // SAFETY: the flag at the read cursor was loaded as FULL with acquire
        // ordering, which makes the producer's writes visible; the producer
        // will not touch these bytes again until `finish_pop` stores EMPTY.
        unsafe { std::slice::from_raw_parts(self.queue.pop_payload().as_ptr(), len) }
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.capacity())
            .field("stride", &self.stride())
            .field("occupancy", &self.occupancy())
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("capacity", &self.capacity())
            .field("stride", &self.stride())
            .field("occupancy", &self.occupancy())
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}
