//! WSF kernel — cooperative kernel core for embedded BLE hosts
//!
//! The substrate a BLE host stack runs on: every profile starts or stops a
//! timer and sends or receives messages through these primitives.
//! - Intrusive FIFO queues (no allocation, elements carry their own link)
//! - Message passing between handlers over an external buffer pool
//! - Software timers multiplexed over one tick source, kept sorted
//! - An explicit scheduler contract: critical section + readiness bits
//!
//! Author: Moroya Sakamoto

#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[macro_use]
mod fmt;

pub mod config;
pub mod error;
pub mod queue;
pub mod pool;
pub mod message;
pub mod scheduler;
pub mod task;
pub mod timer;
pub mod tick;
pub mod kernel;

pub use config::TimerConfig;
pub use error::Error;
pub use queue::{Links, Queue};
pub use pool::{BlockId, BufferPool, PoolStats, StaticPool};
pub use message::{MessageService, Msg, MsgQueue};
pub use scheduler::{CriticalSection, EventMask, Scheduler};
pub use task::{DefaultTaskTable, HandlerId, TaskTable};
pub use timer::{Expiry, Ticks, TimerId, TimerMsg, TimerService};
pub use tick::TickClock;
pub use kernel::{Kernel, KernelStats};
