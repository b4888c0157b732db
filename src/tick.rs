//! Tick clock — hardware-abstract tick source
//!
//! Turns elapsed hardware time into whole timer ticks. The periodic
//! interrupt (SysTick on Cortex-M, MTIME on RISC-V) reports how many
//! microseconds passed; the clock carries the sub-tick remainder so no
//! time is lost between interrupts of uneven length.
//!
//! Author: Moroya Sakamoto

use crate::config::TimerConfig;
use crate::error::Error;
use crate::timer::Ticks;

/// Elapsed-time accumulator
///
/// Size: 32 bytes
#[derive(Debug, Clone)]
pub struct TickClock {
    /// Time since start (microseconds)
    now_us: u64,
    /// Time not yet converted to a tick (microseconds)
    residual_us: u64,
    /// Tick length (microseconds)
    us_per_tick: u64,
    /// Ticks produced since start
    total_ticks: u64,
}

impl TickClock {
    /// Create a clock with the timer service's tick length
    pub fn new(config: TimerConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            now_us: 0,
            residual_us: 0,
            us_per_tick: config.ms_per_tick as u64 * 1000,
            total_ticks: 0,
        })
    }

    /// Advance by `us` microseconds, returns whole ticks elapsed
    pub fn advance_us(&mut self, us: u64) -> Ticks {
        self.now_us = self.now_us.wrapping_add(us);
        self.residual_us = self.residual_us.saturating_add(us);
        let ticks = self.residual_us / self.us_per_tick;
        self.residual_us %= self.us_per_tick;
        self.total_ticks = self.total_ticks.wrapping_add(ticks);
        ticks.min(Ticks::MAX as u64) as Ticks
    }

    /// Advance by `ms` milliseconds, returns whole ticks elapsed
    pub fn advance_ms(&mut self, ms: u64) -> Ticks {
        self.advance_us(ms.saturating_mul(1000))
    }

    /// Current time in microseconds
    pub fn now_us(&self) -> u64 {
        self.now_us
    }

    /// Current time in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.now_us / 1000
    }

    /// Ticks produced since start
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// Tick length in microseconds
    pub fn us_per_tick(&self) -> u64 {
        self.us_per_tick
    }

    /// Reset to time zero
    pub fn reset(&mut self) {
        self.now_us = 0;
        self.residual_us = 0;
        self.total_ticks = 0;
    }
}
