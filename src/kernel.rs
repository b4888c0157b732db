//! Kernel — top-level wiring
//!
//! Combines tick clock + timer service + message service over one task
//! table. The board's periodic interrupt calls [`Kernel::tick`]; the
//! dispatch loop drains each ready handler through `messages` and
//! [`Kernel::next_expired`].
//!
//! Author: Moroya Sakamoto

use crate::config::TimerConfig;
use crate::error::Error;
use crate::message::MessageService;
use crate::pool::BufferPool;
use crate::task::{HandlerId, TaskTable};
use crate::tick::TickClock;
use crate::timer::{Expiry, Ticks, TimerService};

/// Kernel over `H` handlers and `T` timers
///
/// Both services share the same `&TaskTable`, which is the scheduler
/// they lock and signal through.
pub struct Kernel<'a, P, const H: usize, const T: usize> {
    /// Message service
    pub messages: MessageService<&'a TaskTable<H>, P>,
    /// Timer service
    pub timers: TimerService<&'a TaskTable<H>, T>,
    /// Tick source
    clock: TickClock,
    tasks: &'a TaskTable<H>,
    stats: KernelStats,
}

impl<'a, P: BufferPool, const H: usize, const T: usize> Kernel<'a, P, H, T> {
    /// Create a kernel over a registered task table
    pub fn new(tasks: &'a TaskTable<H>, pool: P, config: TimerConfig) -> Result<Self, Error> {
        Ok(Self {
            messages: MessageService::new(tasks, pool),
            timers: TimerService::new(tasks, config)?,
            clock: TickClock::new(config)?,
            tasks,
            stats: KernelStats::default(),
        })
    }

    /// Advance time by `delta_us` and update timers
    ///
    /// Returns the whole ticks that elapsed; timers only see whole ticks.
    pub fn tick(&mut self, delta_us: u64) -> Ticks {
        let elapsed = self.clock.advance_us(delta_us);
        if elapsed > 0 {
            self.timers.update(elapsed);
            self.stats.updates += 1;
        }
        elapsed
    }

    /// Take one expired timer owned by `handler`
    pub fn next_expired(&mut self, handler: HandlerId) -> Option<Expiry> {
        let expiry = self.timers.service_expired(handler)?;
        self.stats.expirations += 1;
        Some(expiry)
    }

    /// Run the tick source for a given duration (testing)
    pub fn run_for(&mut self, total_us: u64, tick_us: u64) -> KernelStats {
        let mut elapsed = 0u64;
        while elapsed < total_us && tick_us > 0 {
            self.tick(tick_us);
            elapsed += tick_us;
        }
        self.stats()
    }

    /// Task table
    pub fn tasks(&self) -> &'a TaskTable<H> {
        self.tasks
    }

    /// Tick source
    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    /// Execution statistics
    pub fn stats(&self) -> KernelStats {
        KernelStats {
            now_us: self.clock.now_us(),
            total_ticks: self.clock.total_ticks(),
            ..self.stats
        }
    }
}

/// Kernel execution statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KernelStats {
    /// Elapsed time (µs)
    pub now_us: u64,
    /// Ticks produced by the clock
    pub total_ticks: u64,
    /// Timer updates issued
    pub updates: u64,
    /// Timers handed to their owners
    pub expirations: u64,
}
