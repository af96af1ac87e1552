//! Core SPSC (Single-Producer Single-Consumer) slot ring.
//!
//! This module holds the raw queue header and the per-slot flag protocol.
//! The safe producer/consumer handles live in [`crate::sync::spsc`].

pub(crate) mod ring;
