//! Compile-time limits and runtime configuration
//!
//! Author: Moroya Sakamoto

use crate::error::Error;

/// Maximum handlers a [`TaskTable`](crate::task::TaskTable) is expected to hold
pub const MAX_HANDLERS: usize = 16;

/// Timer resolution used when none is configured
pub const DEFAULT_MS_PER_TICK: u32 = 10;

/// Task name length (ASCII, zero padded)
pub const TASK_NAME_LEN: usize = 8;

/// Timer service configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerConfig {
    /// Milliseconds represented by one tick
    pub ms_per_tick: u32,
}

impl TimerConfig {
    /// Configuration with the given tick resolution
    pub const fn new(ms_per_tick: u32) -> Self {
        Self { ms_per_tick }
    }

    /// Reject configurations the timer service cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.ms_per_tick == 0 {
            return Err(Error::ZeroTickPeriod);
        }
        Ok(())
    }

    /// Ticks in one second, truncated
    ///
    /// Zero when a tick is longer than a second; such timers fire on the next update.
    pub fn ticks_per_sec(&self) -> u32 {
        1000 / self.ms_per_tick
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MS_PER_TICK)
    }
}
