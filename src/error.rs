//! Kernel error type
//!
//! Pool exhaustion is not here: it is an ordinary `None` from allocation.
//! These variants cover misuse that the kernel can detect cheaply.

/// Errors reported by the kernel core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Timer resolution of zero milliseconds per tick.
    #[error("tick period must be at least one millisecond")]
    ZeroTickPeriod,
    /// Every timer slot has already been declared.
    #[error("timer table is full")]
    TimerTableFull,
    /// Every handler slot has already been registered.
    #[error("handler table is full")]
    HandlerTableFull,
    /// A timer was given an owner the scheduler does not know.
    #[error("handler {0} is not registered")]
    UnknownHandler(u8),
    /// `remove` was given an element that does not follow the given predecessor.
    #[error("element is not linked at the given position")]
    NotLinked,
    /// A block was returned to a pool that does not have it allocated.
    #[error("block {0} is not allocated from this pool")]
    ForeignBuffer(u16),
}
