//! Queue construction parameters.

use serde::{Deserialize, Serialize};

use crate::wait::WaitStrategy;

/// Parameters for [`channel_with_config`](crate::sync::spsc::channel_with_config).
///
/// Deserializable so embedding systems can keep queue sizing next to the rest
/// of their configuration. Missing fields take their [`Default`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Minimum number of slots. Rounded up to a power of two.
    pub capacity: usize,
    /// Payload bytes per slot. Must be non-zero.
    pub element_size: usize,
    /// Backoff used by the blocking acquire variants.
    pub wait: WaitStrategy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            element_size: size_of::<u64>(),
            wait: WaitStrategy::Spin,
        }
    }
}
