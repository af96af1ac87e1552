//! Backoff used by the blocking acquire variants.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a blocking acquire waits between polls of the slot flag.
///
/// Every strategy polls with the same acquire load as the non-blocking
/// variants; they only differ in what happens between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Busy-spin with a CPU relax hint. Lowest latency, burns a full core.
    #[default]
    Spin,
    /// Yield the time slice to the OS scheduler after every failed poll.
    Yield,
    /// Spin for `spins` polls, then fall back to yielding.
    SpinThenYield {
        /// Polls to spin before the first yield.
        spins: u32,
    },
    /// Sleep for a fixed interval after every failed poll.
    Sleep(Duration),
}

/// Per-call wait state.
#[derive(Debug)]
pub(crate) struct Waiter {
    strategy: WaitStrategy,
    polls: u32,
}

impl Waiter {
    pub(crate) const fn new(strategy: WaitStrategy) -> Self {
        Self { strategy, polls: 0 }
    }

    /// Backs off once after a failed poll.
    #[inline]
    pub(crate) fn wait(&mut self) {
        match self.strategy {
            WaitStrategy::Spin => std::hint::spin_loop(),
            WaitStrategy::Yield => std::thread::yield_now(),
            WaitStrategy::SpinThenYield { spins } => {
                if self.polls < spins {
                    self.polls += 1;
                    std::hint::spin_loop();
                } else {
                    std::thread::yield_now();
                }
            }
            WaitStrategy::Sleep(interval) => std::thread::sleep(interval),
        }
    }
}
