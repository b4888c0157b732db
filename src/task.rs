//! Task table — static, no-alloc handler registry
//!
//! Reference [`Scheduler`] for a cooperative dispatch loop: one slot per
//! handler holding its pending event mask and message inbox. State is kept
//! in `critical_section::Mutex` cells so the table can live in a `static`
//! and be signalled from interrupt handlers.
//!
//! Author: Moroya Sakamoto

use core::cell::Cell;

use critical_section::{Mutex, RestoreState};

use crate::config::{MAX_HANDLERS, TASK_NAME_LEN};
use crate::error::Error;
use crate::message::MsgQueue;
use crate::scheduler::{EventMask, Scheduler};

/// Opaque handler identifier (message and timer recipient)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandlerId(pub u8);

impl HandlerId {
    /// Slot index
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Per-handler state
struct Slot {
    name: [u8; TASK_NAME_LEN],
    events: Mutex<Cell<EventMask>>,
    inbox: Mutex<Cell<MsgQueue>>,
}

const EMPTY_SLOT: Slot = Slot {
    name: [0u8; TASK_NAME_LEN],
    events: Mutex::new(Cell::new(EventMask::empty())),
    inbox: Mutex::new(Cell::new(MsgQueue::new())),
};

/// Static handler table
///
/// Handlers are registered once at startup (`&mut self`), after which the
/// table is shared by reference between the services and the dispatch loop.
pub struct TaskTable<const N: usize> {
    slots: [Slot; N],
    count: usize,
    /// Nesting depth of `lock`
    depth: Mutex<Cell<u8>>,
    /// State to restore when the outermost section ends
    restore: Mutex<Cell<Option<RestoreState>>>,
}

impl<const N: usize> TaskTable<N> {
    /// Create an empty table
    pub const fn new() -> Self {
        Self {
            slots: [EMPTY_SLOT; N],
            count: 0,
            depth: Mutex::new(Cell::new(0)),
            restore: Mutex::new(Cell::new(None)),
        }
    }

    /// Register a handler, returns its id
    pub fn register(&mut self, name: &[u8]) -> Result<HandlerId, Error> {
        if self.count >= N || self.count > u8::MAX as usize {
            return Err(Error::HandlerTableFull);
        }
        let id = HandlerId(self.count as u8);
        let len = name.len().min(TASK_NAME_LEN);
        self.slots[self.count].name[..len].copy_from_slice(&name[..len]);
        self.count += 1;
        debug!("handler {} registered", id.0);
        Ok(id)
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.count
    }

    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Handler name (zero padded)
    pub fn name(&self, handler: HandlerId) -> &[u8] {
        &self.slot(handler).name
    }

    /// Pending events, left in place
    pub fn pending(&self, handler: HandlerId) -> EventMask {
        let slot = self.slot(handler);
        critical_section::with(|cs| slot.events.borrow(cs).get())
    }

    /// Take and clear the pending events
    ///
    /// This is what a dispatch loop does before running the handler.
    pub fn take_events(&self, handler: HandlerId) -> EventMask {
        let slot = self.slot(handler);
        critical_section::with(|cs| slot.events.borrow(cs).replace(EventMask::empty()))
    }

    /// Does any handler have pending work?
    pub fn any_pending(&self) -> bool {
        critical_section::with(|cs| {
            self.slots[..self.count]
                .iter()
                .any(|slot| !slot.events.borrow(cs).get().is_empty())
        })
    }

    /// Is the handler's inbox empty?
    pub fn inbox_is_empty(&self, handler: HandlerId) -> bool {
        self.with_inbox(handler, |inbox| inbox.is_empty())
    }

    /// # Panics
    ///
    /// On a handler that was never registered.
    fn slot(&self, handler: HandlerId) -> &Slot {
        assert!(
            handler.index() < self.count,
            "handler {} not registered",
            handler.0
        );
        &self.slots[handler.index()]
    }
}

/// Table sized for the default handler limit
pub type DefaultTaskTable = TaskTable<MAX_HANDLERS>;

impl<const N: usize> Default for TaskTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw critical-section backend
trait RawSection {
    /// # Safety
    ///
    /// Each call must be paired with one `release`, properly nested.
    unsafe fn acquire() -> RestoreState;

    /// # Safety
    ///
    /// `state` must come from the innermost unreleased `acquire`.
    unsafe fn release(state: RestoreState);
}

/// The `critical_section` implementation linked into the binary
struct Global;

impl RawSection for Global {
    unsafe fn acquire() -> RestoreState {
        critical_section::acquire()
    }

    unsafe fn release(state: RestoreState) {
        critical_section::release(state)
    }
}

impl<const N: usize> TaskTable<N> {
    fn enter<R: RawSection>(&self) {
        // SAFETY: the outermost state is released by `exit`, a nested one
        // right below, before anything else is acquired.
        let state = unsafe { R::acquire() };
        // SAFETY: we are inside the critical section acquired above.
        let cs = unsafe { critical_section::CriticalSection::new() };
        let depth = self.depth.borrow(cs);
        depth.set(depth.get() + 1);
        if depth.get() == 1 {
            self.restore.borrow(cs).set(Some(state));
        } else {
            // SAFETY: innermost acquire; the outer section stays held.
            unsafe { R::release(state) };
        }
    }

    fn exit<R: RawSection>(&self) {
        // SAFETY: `exit` is only called while holding an `enter`.
        let cs = unsafe { critical_section::CriticalSection::new() };
        let depth = self.depth.borrow(cs);
        assert!(depth.get() > 0, "unlock without lock");
        depth.set(depth.get() - 1);
        if depth.get() == 0 {
            if let Some(state) = self.restore.borrow(cs).take() {
                // SAFETY: `state` came from the outermost acquire.
                unsafe { R::release(state) };
            }
        }
    }
}

impl<const N: usize> Scheduler for TaskTable<N> {
    fn lock(&self) {
        self.enter::<Global>();
    }

    fn unlock(&self) {
        self.exit::<Global>();
    }

    fn mark_ready(&self, handler: HandlerId, events: EventMask) {
        let slot = self.slot(handler);
        critical_section::with(|cs| {
            let mask = slot.events.borrow(cs);
            mask.set(mask.get() | events);
        });
    }

    fn with_inbox<R>(&self, handler: HandlerId, f: impl FnOnce(&mut MsgQueue) -> R) -> R {
        let slot = self.slot(handler);
        critical_section::with(|cs| {
            let cell = slot.inbox.borrow(cs);
            let mut inbox = cell.take();
            let result = f(&mut inbox);
            cell.set(inbox);
            result
        })
    }

    fn is_registered(&self, handler: HandlerId) -> bool {
        handler.index() < self.count
    }
}
