//! # slotring
//!
//! A fixed-capacity, lock-free ring of byte slots handing fixed-size payloads
//! from exactly one producer thread to exactly one consumer thread.
//!
//! - Payloads are written and read in place, inside the ring
//! - No allocation after creation
//! - One atomic flag per slot is the only state both threads touch
//! - Slots, cursors and metadata are cache-line aligned against false sharing
//!
//! See [`sync::spsc`] for the queue handles.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod index;
pub mod layout;
mod spsc;
pub mod sync;
mod trace;
pub mod wait;

pub use config::QueueConfig;
pub use error::CreateError;
pub use layout::{CACHE_LINE_SIZE, FLAG_SIZE, SlotLayout};
pub use sync::spsc::{Consumer, Producer, channel, channel_with_config};
pub use trace::init_tracing;
pub use wait::WaitStrategy;
