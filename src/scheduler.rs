//! Scheduler contract
//!
//! The message and timer services never run on their own. They are called
//! from task context and from interrupt context (the tick source), and rely
//! on the host scheduler for exactly two things: a critical section around
//! every mutation of shared queues, and a way to mark a handler ready.
//!
//! Author: Moroya Sakamoto

use bitflags::bitflags;

use crate::message::MsgQueue;
use crate::task::HandlerId;

bitflags! {
    /// Pending-work bits OR'ed into a handler's event mask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u8 {
        /// A message was queued to the handler's inbox
        const MSG_QUEUE = 0x01;
        /// One of the handler's timers reached zero
        const TIMER = 0x02;
        /// Generic handler event, meaning is up to the handler
        const HANDLER = 0x04;
        // Remaining bits are free for handler-defined events
        const _ = !0;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for EventMask {
    fn format(&self, f: defmt::Formatter<'_>) {
        defmt::write!(f, "EventMask({=u8:#x})", self.bits())
    }
}

/// Capabilities the host scheduler supplies to the kernel core
///
/// `lock`/`unlock` must nest and must be callable from interrupt context.
/// The core always pairs them within a single call and never holds the
/// section across calls.
pub trait Scheduler {
    /// Enter the critical section
    fn lock(&self);

    /// Leave the critical section entered by the matching `lock`
    fn unlock(&self);

    /// OR `events` into the handler's pending mask and make it eligible to run
    fn mark_ready(&self, handler: HandlerId, events: EventMask);

    /// Run `f` against the handler's inbox
    fn with_inbox<R>(&self, handler: HandlerId, f: impl FnOnce(&mut MsgQueue) -> R) -> R;

    /// Can `handler` be signalled and given messages?
    fn is_registered(&self, handler: HandlerId) -> bool;
}

impl<S: Scheduler> Scheduler for &S {
    fn lock(&self) {
        (**self).lock()
    }

    fn unlock(&self) {
        (**self).unlock()
    }

    fn mark_ready(&self, handler: HandlerId, events: EventMask) {
        (**self).mark_ready(handler, events)
    }

    fn with_inbox<R>(&self, handler: HandlerId, f: impl FnOnce(&mut MsgQueue) -> R) -> R {
        (**self).with_inbox(handler, f)
    }

    fn is_registered(&self, handler: HandlerId) -> bool {
        (**self).is_registered(handler)
    }
}

/// Scoped critical section: `lock` on entry, `unlock` on drop
#[must_use = "the critical section ends as soon as the guard is dropped"]
pub struct CriticalSection<'a, S: Scheduler + ?Sized> {
    sched: &'a S,
}

impl<'a, S: Scheduler + ?Sized> CriticalSection<'a, S> {
    /// Enter the scheduler's critical section
    pub fn enter(sched: &'a S) -> Self {
        sched.lock();
        Self { sched }
    }
}

impl<S: Scheduler + ?Sized> Drop for CriticalSection<'_, S> {
    fn drop(&mut self) {
        self.sched.unlock();
    }
}
