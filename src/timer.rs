//! Software timer service
//!
//! Multiplexes many countdown timers over one tick source. Running timers
//! sit in a single queue sorted by remaining ticks. `update` subtracts the
//! same amount from every member, so the order set at insertion never
//! needs re-sorting and the head always holds the next expiry.
//!
//! Timer storage is a fixed table owned by the service. A subsystem
//! declares its timers once and keeps the returned [`TimerId`]; starting
//! and stopping only relinks the slot.
//!
//! Per timer:
//! - Idle -> Running on start; Running -> Running on restart (never additive)
//! - Running -> Idle on stop
//! - Running -> Expired when its ticks reach zero during `update`
//! - Expired -> Idle once returned by `service_expired`
//!
//! Author: Moroya Sakamoto

use core::cell::Cell;

use critical_section::Mutex;

use crate::config::TimerConfig;
use crate::error::Error;
use crate::queue::{Links, Queue};
use crate::scheduler::{CriticalSection, EventMask, Scheduler};
use crate::task::HandlerId;

/// Timer resolution unit
pub type Ticks = u32;

/// Handle to a declared timer
///
/// Only valid on the service that declared it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerId {
    service: u16,
    slot: u16,
}

impl TimerId {
    /// Slot index
    pub const fn index(self) -> usize {
        self.slot as usize
    }
}

/// Tag handed to the next service; wraps after 65536 services
static NEXT_SERVICE: Mutex<Cell<u16>> = Mutex::new(Cell::new(0));

fn next_service_tag() -> u16 {
    critical_section::with(|cs| {
        let next = NEXT_SERVICE.borrow(cs);
        let tag = next.get();
        next.set(tag.wrapping_add(1));
        tag
    })
}

/// Notification context delivered verbatim on expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerMsg {
    /// Correlation parameter (connection id, index, ...)
    pub param: u16,
    /// Event code the owner dispatches on
    pub event: u8,
    /// Status byte
    pub status: u8,
}

impl TimerMsg {
    /// Message with an event code and parameter, status zero
    pub const fn new(event: u8, param: u16) -> Self {
        Self {
            param,
            event,
            status: 0,
        }
    }
}

/// A timer returned by [`TimerService::service_expired`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Expiry {
    /// Expired timer, now idle
    pub timer: TimerId,
    /// Its owner
    pub handler: HandlerId,
    /// Its notification context
    pub msg: TimerMsg,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    next: Option<TimerId>,
    ticks: Ticks,
    handler: HandlerId,
    msg: TimerMsg,
    started: bool,
}

impl Timer {
    const IDLE: Self = Self {
        next: None,
        ticks: 0,
        handler: HandlerId(0),
        msg: TimerMsg {
            param: 0,
            event: 0,
            status: 0,
        },
        started: false,
    };
}

struct Slots<const N: usize>([Timer; N]);

impl<const N: usize> Links<TimerId> for Slots<N> {
    fn next(&self, item: TimerId) -> Option<TimerId> {
        self.0[item.index()].next
    }

    fn set_next(&mut self, item: TimerId, next: Option<TimerId>) {
        self.0[item.index()].next = next;
    }
}

/// Timer table plus its sorted queue
struct TimerList<const N: usize> {
    slots: Slots<N>,
    queue: Queue<TimerId>,
}

impl<const N: usize> TimerList<N> {
    fn get(&self, id: TimerId) -> &Timer {
        &self.slots.0[id.index()]
    }

    fn get_mut(&mut self, id: TimerId) -> &mut Timer {
        &mut self.slots.0[id.index()]
    }

    /// Link `id` behind every timer with no more ticks than it has
    fn insert_sorted(&mut self, id: TimerId) {
        let ticks = self.get(id).ticks;
        let mut prev = None;
        for elem in self.queue.iter(&self.slots) {
            if self.get(elem).ticks > ticks {
                break;
            }
            prev = Some(elem);
        }
        self.queue.insert_after(&mut self.slots, id, prev);
    }

    /// Unlink `id` if queued; returns whether it was
    fn unlink(&mut self, id: TimerId) -> bool {
        let Some(prev) = self.queue.position(&self.slots, id) else {
            return false;
        };
        if self.queue.remove(&mut self.slots, id, prev).is_err() {
            return false;
        }
        self.get_mut(id).started = false;
        true
    }
}

/// Timer service over a scheduler, with room for `N` timers
pub struct TimerService<S, const N: usize> {
    sched: S,
    config: TimerConfig,
    /// Stamped into every id this service declares
    tag: u16,
    timers: TimerList<N>,
    declared: usize,
}

impl<S: Scheduler, const N: usize> TimerService<S, N> {
    /// Set up the service with an empty queue
    pub fn new(sched: S, config: TimerConfig) -> Result<Self, Error> {
        config.validate()?;
        debug!("timer service up, {} ms/tick", config.ms_per_tick);
        Ok(Self {
            sched,
            config,
            tag: next_service_tag(),
            timers: TimerList {
                slots: Slots([Timer::IDLE; N]),
                queue: Queue::new(),
            },
            declared: 0,
        })
    }

    /// Reserve a timer slot owned by `handler`
    pub fn declare(&mut self, handler: HandlerId, msg: TimerMsg) -> Result<TimerId, Error> {
        self.check_handler(handler)?;
        if self.declared >= N || self.declared > u16::MAX as usize {
            return Err(Error::TimerTableFull);
        }
        let id = TimerId {
            service: self.tag,
            slot: self.declared as u16,
        };
        self.declared += 1;

        let _cs = CriticalSection::enter(&self.sched);
        let timer = self.timers.get_mut(id);
        timer.handler = handler;
        timer.msg = msg;
        Ok(id)
    }

    /// Change a timer's owner and notification context
    ///
    /// Takes effect for the next expiry, running or not.
    pub fn configure(
        &mut self,
        id: TimerId,
        handler: HandlerId,
        msg: TimerMsg,
    ) -> Result<(), Error> {
        self.check(id);
        self.check_handler(handler)?;
        let _cs = CriticalSection::enter(&self.sched);
        let timer = self.timers.get_mut(id);
        timer.handler = handler;
        timer.msg = msg;
        Ok(())
    }

    /// Change only the notification context
    pub fn set_msg(&mut self, id: TimerId, msg: TimerMsg) {
        self.check(id);
        let _cs = CriticalSection::enter(&self.sched);
        self.timers.get_mut(id).msg = msg;
    }

    /// Start (or restart) a timer for `secs` seconds
    pub fn start_sec(&mut self, id: TimerId, secs: u32) {
        let ticks = secs.saturating_mul(self.config.ticks_per_sec());
        self.start_ticks(id, ticks);
    }

    /// Start (or restart) a timer for `ms` milliseconds
    ///
    /// Truncates to whole ticks; less than one tick fires on the next update.
    pub fn start_ms(&mut self, id: TimerId, ms: u32) {
        let ticks = ms / self.config.ms_per_tick;
        self.start_ticks(id, ticks);
    }

    /// Start (or restart) a timer for `ticks` ticks
    pub fn start_ticks(&mut self, id: TimerId, ticks: Ticks) {
        self.check(id);
        let _cs = CriticalSection::enter(&self.sched);

        if self.timers.get(id).started {
            self.timers.unlink(id);
        }
        let timer = self.timers.get_mut(id);
        timer.ticks = ticks;
        timer.started = true;
        self.timers.insert_sorted(id);
        trace!("timer {} start, {} ticks", id.slot, ticks);
    }

    /// Stop a timer; no-op when it is not running
    pub fn stop(&mut self, id: TimerId) {
        self.check(id);
        let _cs = CriticalSection::enter(&self.sched);
        if self.timers.unlink(id) {
            trace!("timer {} stop", id.slot);
        }
    }

    /// Account for `elapsed` ticks on every running timer
    ///
    /// Timers reaching zero stay queued at zero and mark their owner ready
    /// with [`EventMask::TIMER`]. Safe to call from the tick interrupt.
    pub fn update(&mut self, elapsed: Ticks) {
        let _cs = CriticalSection::enter(&self.sched);
        let mut cursor = self.timers.queue.peek();
        while let Some(id) = cursor {
            let timer = self.timers.get_mut(id);
            if timer.ticks > elapsed {
                timer.ticks -= elapsed;
            } else {
                timer.ticks = 0;
                self.sched.mark_ready(timer.handler, EventMask::TIMER);
            }
            cursor = timer.next;
        }
    }

    /// Ticks until the next expiry, `None` when no timer is running
    ///
    /// `Some(0)`: a timer has expired but has not been serviced yet.
    pub fn next_expiration(&self) -> Option<Ticks> {
        let _cs = CriticalSection::enter(&self.sched);
        let head = self.timers.queue.peek()?;
        Some(self.timers.get(head).ticks)
    }

    /// Take one expired timer owned by `handler`
    ///
    /// Walks the expired (zero-tick) run at the head of the queue and
    /// unlinks the first timer `handler` owns. One timer per call: callers
    /// loop until this returns `None`.
    pub fn service_expired(&mut self, handler: HandlerId) -> Option<Expiry> {
        let _cs = CriticalSection::enter(&self.sched);
        let mut prev = None;
        let mut cursor = self.timers.queue.peek();
        while let Some(id) = cursor {
            let timer = *self.timers.get(id);
            if timer.ticks != 0 {
                break;
            }
            if timer.handler == handler {
                if self.timers.queue.remove(&mut self.timers.slots, id, prev).is_err() {
                    break;
                }
                self.timers.get_mut(id).started = false;
                debug!("timer {} expired, event {}", id.slot, timer.msg.event);
                return Some(Expiry {
                    timer: id,
                    handler,
                    msg: timer.msg,
                });
            }
            prev = Some(id);
            cursor = timer.next;
        }
        None
    }

    /// Is the timer started and not yet serviced?
    pub fn is_running(&self, id: TimerId) -> bool {
        self.check(id);
        let _cs = CriticalSection::enter(&self.sched);
        self.timers.get(id).started
    }

    /// Remaining ticks, `None` when idle
    pub fn remaining(&self, id: TimerId) -> Option<Ticks> {
        self.check(id);
        let _cs = CriticalSection::enter(&self.sched);
        let timer = self.timers.get(id);
        timer.started.then_some(timer.ticks)
    }

    /// Notification context
    pub fn msg(&self, id: TimerId) -> TimerMsg {
        self.check(id);
        self.timers.get(id).msg
    }

    /// Owning handler
    pub fn handler(&self, id: TimerId) -> HandlerId {
        self.check(id);
        self.timers.get(id).handler
    }

    /// Number of running timers
    pub fn running_count(&self) -> usize {
        let _cs = CriticalSection::enter(&self.sched);
        self.timers.queue.count(&self.timers.slots)
    }

    /// Running timers, soonest first
    pub fn for_each_running(&self, mut f: impl FnMut(TimerId, Ticks)) {
        let _cs = CriticalSection::enter(&self.sched);
        for id in self.timers.queue.iter(&self.timers.slots) {
            f(id, self.timers.get(id).ticks);
        }
    }

    /// Number of declared timers
    pub fn declared(&self) -> usize {
        self.declared
    }

    /// Active configuration
    pub fn config(&self) -> TimerConfig {
        self.config
    }

    /// # Panics
    ///
    /// On an id this service never handed out.
    fn check(&self, id: TimerId) {
        assert!(
            id.service == self.tag && id.index() < self.declared,
            "timer {} not declared",
            id.slot
        );
    }

    fn check_handler(&self, handler: HandlerId) -> Result<(), Error> {
        if self.sched.is_registered(handler) {
            Ok(())
        } else {
            warn!("timer owner {} not registered", handler.0);
            Err(Error::UnknownHandler(handler.0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::mock::{MockScheduler, MOCK_HANDLERS};

    const APP: HandlerId = HandlerId(0);
    const HCI: HandlerId = HandlerId(1);

    fn service(sched: &MockScheduler) -> TimerService<&MockScheduler, 8> {
        TimerService::new(sched, TimerConfig::new(10)).unwrap()
    }

    fn order(svc: &TimerService<&MockScheduler, 8>) -> Vec<(TimerId, Ticks)> {
        let mut out = Vec::new();
        svc.for_each_running(|id, ticks| out.push((id, ticks)));
        out
    }

    #[test]
    fn test_zero_tick_period() {
        let sched = MockScheduler::new();
        let svc = TimerService::<_, 4>::new(&sched, TimerConfig::new(0));
        assert_eq!(svc.err(), Some(Error::ZeroTickPeriod));
    }

    #[test]
    fn test_declare_until_full() {
        let sched = MockScheduler::new();
        let mut svc = TimerService::<_, 2>::new(&sched, TimerConfig::default()).unwrap();
        let a = svc.declare(APP, TimerMsg::new(1, 0)).unwrap();
        let b = svc.declare(HCI, TimerMsg::new(2, 0)).unwrap();
        assert_ne!(a, b);
        assert_eq!(svc.declare(APP, TimerMsg::default()), Err(Error::TimerTableFull));
        assert_eq!(svc.declared(), 2);
        assert_eq!(svc.handler(b), HCI);
        assert!(!svc.is_running(a));
    }

    #[test]
    fn test_duration_conversion() {
        let sched = MockScheduler::new();
        let mut svc = service(&sched);
        let t = svc.declare(APP, TimerMsg::default()).unwrap();

        svc.start_ms(t, 250);
        assert_eq!(svc.remaining(t), Some(25));
        svc.start_ms(t, 19);
        assert_eq!(svc.remaining(t), Some(1));
        svc.start_sec(t, 3);
        assert_eq!(svc.remaining(t), Some(300));
        svc.start_sec(t, u32::MAX);
        assert_eq!(svc.remaining(t), Some(u32::MAX));
    }

    #[test]
    fn test_sorted_insertion_stable_ties() {
        let sched = MockScheduler::new();
        let mut svc = service(&sched);
        let ids: Vec<TimerId> = (0..4)
            .map(|_| svc.declare(APP, TimerMsg::default()).unwrap())
            .collect();

        svc.start_ticks(ids[0], 50);
        svc.start_ticks(ids[1], 20);
        svc.start_ticks(ids[2], 50);
        svc.start_ticks(ids[3], 70);
        assert_eq!(
            order(&svc),
            [(ids[1], 20), (ids[0], 50), (ids[2], 50), (ids[3], 70)]
        );
        assert_eq!(svc.next_expiration(), Some(20));
        assert_eq!(svc.running_count(), 4);
    }

    #[test]
    fn test_restart_replaces_schedule() {
        let sched = MockScheduler::new();
        let mut svc = service(&sched);
        let a = svc.declare(APP, TimerMsg::default()).unwrap();
        let b = svc.declare(APP, TimerMsg::default()).unwrap();

        svc.start_ticks(a, 10);
        svc.start_ticks(b, 30);
        svc.start_ticks(a, 40);
        assert_eq!(order(&svc), [(b, 30), (a, 40)]);
        assert_eq!(svc.running_count(), 2);
    }

    #[test]
    fn test_stop_running_and_idle() {
        let sched = MockScheduler::new();
        let mut svc = service(&sched);
        let a = svc.declare(APP, TimerMsg::default()).unwrap();
        let b = svc.declare(APP, TimerMsg::default()).unwrap();
        svc.start_ticks(a, 5);

        svc.stop(b);
        assert_eq!(order(&svc), [(a, 5)]);

        svc.stop(a);
        assert!(!svc.is_running(a));
        assert_eq!(svc.remaining(a), None);
        assert_eq!(svc.next_expiration(), None);

        svc.stop(a);
        assert_eq!(svc.next_expiration(), None);
        assert_eq!(sched.depth(), 0);
    }

    #[test]
    fn test_update_clamps_and_signals() {
        let sched = MockScheduler::new();
        let mut svc = service(&sched);
        let a = svc.declare(APP, TimerMsg::default()).unwrap();
        let b = svc.declare(HCI, TimerMsg::default()).unwrap();
        svc.start_ticks(a, 3);
        svc.start_ticks(b, 10);

        svc.update(5);
        assert_eq!(svc.remaining(a), Some(0));
        assert_eq!(svc.remaining(b), Some(5));
        assert_eq!(sched.take_ready(), [(APP, EventMask::TIMER)]);
        assert_eq!(svc.next_expiration(), Some(0));
    }

    #[test]
    fn test_sub_tick_fires_next_update() {
        let sched = MockScheduler::new();
        let mut svc = service(&sched);
        let t = svc.declare(APP, TimerMsg::new(9, 0)).unwrap();
        svc.start_ms(t, 4);
        assert_eq!(svc.next_expiration(), Some(0));

        svc.update(1);
        assert_eq!(sched.take_ready(), [(APP, EventMask::TIMER)]);
        assert_eq!(svc.service_expired(APP).map(|e| e.msg.event), Some(9));
    }

    #[test]
    fn test_service_expired_one_per_call() {
        let sched = MockScheduler::new();
        let mut svc = service(&sched);
        let a = svc.declare(APP, TimerMsg::new(1, 0x10)).unwrap();
        let b = svc.declare(APP, TimerMsg::new(2, 0x20)).unwrap();
        let c = svc.declare(APP, TimerMsg::new(3, 0x30)).unwrap();
        svc.start_ticks(a, 2);
        svc.start_ticks(b, 2);
        svc.start_ticks(c, 9);
        svc.update(2);

        let first = svc.service_expired(APP).unwrap();
        assert_eq!(first.timer, a);
        assert_eq!(first.msg, TimerMsg::new(1, 0x10));
        assert!(svc.is_running(b));

        let second = svc.service_expired(APP).unwrap();
        assert_eq!(second.timer, b);
        assert_eq!(svc.service_expired(APP), None);
        assert_eq!(svc.next_expiration(), Some(7));
    }

    #[test]
    fn test_service_expired_filters_owner() {
        let sched = MockScheduler::new();
        let mut svc = service(&sched);
        let app = svc.declare(APP, TimerMsg::new(1, 0)).unwrap();
        let hci = svc.declare(HCI, TimerMsg::new(2, 0)).unwrap();
        svc.start_ticks(app, 1);
        svc.start_ticks(hci, 1);
        svc.update(1);

        let expiry = svc.service_expired(HCI).unwrap();
        assert_eq!(expiry.timer, hci);
        assert_eq!(expiry.handler, HCI);
        assert_eq!(svc.service_expired(HCI), None);
        assert_eq!(svc.service_expired(APP).map(|e| e.timer), Some(app));
        assert_eq!(svc.next_expiration(), None);
    }

    #[test]
    fn test_configure_changes_delivery() {
        let sched = MockScheduler::new();
        let mut svc = service(&sched);
        let t = svc.declare(APP, TimerMsg::default()).unwrap();
        svc.start_ticks(t, 1);
        svc.configure(t, HCI, TimerMsg::new(7, 3)).unwrap();
        svc.set_msg(t, TimerMsg { param: 3, event: 7, status: 1 });
        svc.update(1);

        assert_eq!(sched.take_ready(), [(HCI, EventMask::TIMER)]);
        let expiry = svc.service_expired(HCI).unwrap();
        assert_eq!(expiry.msg.status, 1);
        assert_eq!(svc.msg(t).event, 7);
    }

    #[test]
    #[should_panic(expected = "not declared")]
    fn test_undeclared_timer_panics() {
        let sched = MockScheduler::new();
        let mut svc = service(&sched);
        let other = {
            let mut donor = service(&sched);
            donor.declare(APP, TimerMsg::default()).unwrap()
        };
        svc.stop(other);
    }

    #[test]
    #[should_panic(expected = "not declared")]
    fn test_timer_from_other_service_panics() {
        let sched = MockScheduler::new();
        let mut svc = service(&sched);
        let mut other = service(&sched);
        svc.declare(APP, TimerMsg::default()).unwrap();
        let foreign = other.declare(APP, TimerMsg::default()).unwrap();
        assert_eq!(foreign.index(), 0);
        svc.start_ticks(foreign, 5);
    }

    #[test]
    fn test_declare_rejects_unknown_handler() {
        let sched = MockScheduler::new();
        let mut svc = service(&sched);
        let stranger = HandlerId(MOCK_HANDLERS as u8);
        assert_eq!(
            svc.declare(stranger, TimerMsg::default()),
            Err(Error::UnknownHandler(stranger.0))
        );
        assert_eq!(svc.declared(), 0);

        let t = svc.declare(APP, TimerMsg::default()).unwrap();
        assert_eq!(
            svc.configure(t, stranger, TimerMsg::default()),
            Err(Error::UnknownHandler(stranger.0))
        );
        assert_eq!(svc.handler(t), APP);

        svc.start_ticks(t, 1);
        svc.update(1);
        assert_eq!(sched.take_ready(), [(APP, EventMask::TIMER)]);
    }

    #[test]
    fn test_every_operation_balances_lock() {
        let sched = MockScheduler::new();
        let mut svc = service(&sched);
        let t = svc.declare(APP, TimerMsg::default()).unwrap();
        svc.start_ms(t, 100);
        svc.update(3);
        let _ = svc.next_expiration();
        let _ = svc.service_expired(APP);
        svc.stop(t);
        assert_eq!(sched.depth(), 0);
        assert!(sched.locks() >= 6);
    }
}
