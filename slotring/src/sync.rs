//! Synchronization primitives for in-process communication.
//!
//! This module provides the thread-to-thread slot queue handles.

pub mod spsc;
