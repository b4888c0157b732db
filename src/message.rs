//! Message service
//!
//! Moves discrete buffers between handlers. A message is one pool block:
//! a routing [`Header`] the application never sees, plus the payload it
//! asked for. [`Msg`] is the ownership token for that block, so sending,
//! queueing or freeing a message gives it away.
//!
//! Author: Moroya Sakamoto

use crate::error::Error;
use crate::pool::{BlockId, BufferPool};
use crate::queue::Queue;
use crate::scheduler::{CriticalSection, EventMask, Scheduler};
use crate::task::HandlerId;

/// Routing header stored beside each payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub(crate) handler: HandlerId,
}

impl Header {
    /// Header of a freshly allocated block
    pub const EMPTY: Self = Self {
        handler: HandlerId(0),
    };
}

/// An allocated message
///
/// Not `Clone`: the token is the message. Hand it back to
/// [`MessageService::free`] once processed.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a dropped message leaks its pool block"]
pub struct Msg {
    block: BlockId,
}

impl Msg {
    /// Pool block holding this message
    pub fn block(&self) -> BlockId {
        self.block
    }
}

/// Queue of messages, linked through their pool blocks
///
/// Not `Clone`: a copy would hand out the same blocks twice.
#[derive(Debug, PartialEq, Eq, Default)]
pub struct MsgQueue(Queue<BlockId>);

impl MsgQueue {
    /// Create an empty queue
    pub const fn new() -> Self {
        Self(Queue::new())
    }

    /// Is the queue empty?
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Message service over a scheduler and a buffer pool
pub struct MessageService<S, P> {
    sched: S,
    pool: P,
}

impl<S: Scheduler, P: BufferPool> MessageService<S, P> {
    /// Create a service
    pub fn new(sched: S, pool: P) -> Self {
        Self { sched, pool }
    }

    /// Allocate a message with `len` payload bytes
    ///
    /// `None` when the pool is exhausted; the caller drops its unit of work.
    pub fn alloc(&mut self, len: usize) -> Option<Msg> {
        let block = self.pool.allocate(len)?;
        *self.pool.header_mut(block) = Header::EMPTY;
        Some(Msg { block })
    }

    /// Return a message to the pool
    pub fn free(&mut self, msg: Msg) -> Result<(), Error> {
        self.pool.free(msg.block)
    }

    /// Queue `msg` to the handler's inbox and mark it ready
    pub fn send(&mut self, handler: HandlerId, msg: Msg) {
        {
            let _cs = CriticalSection::enter(&self.sched);
            let pool = &mut self.pool;
            self.sched
                .with_inbox(handler, |inbox| link(pool, inbox, handler, msg));
        }
        trace!("msg sent to handler {}", handler.0);
        self.sched.mark_ready(handler, EventMask::MSG_QUEUE);
    }

    /// Append `msg` to a private queue, tagged with `handler`
    pub fn enqueue(&mut self, queue: &mut MsgQueue, handler: HandlerId, msg: Msg) {
        let _cs = CriticalSection::enter(&self.sched);
        link(&mut self.pool, queue, handler, msg);
    }

    /// Remove the head message and its handler tag
    pub fn dequeue(&mut self, queue: &mut MsgQueue) -> Option<(HandlerId, Msg)> {
        let _cs = CriticalSection::enter(&self.sched);
        let block = queue.0.dequeue(&mut self.pool)?;
        Some((self.pool.header(block).handler, Msg { block }))
    }

    /// Head message's handler tag and payload, left in place
    pub fn peek(&self, queue: &MsgQueue) -> Option<(HandlerId, &[u8])> {
        let _cs = CriticalSection::enter(&self.sched);
        let block = queue.0.peek()?;
        Some((self.pool.header(block).handler, self.pool.payload(block)))
    }

    /// Take the next message from the handler's own inbox
    pub fn receive(&mut self, handler: HandlerId) -> Option<Msg> {
        let _cs = CriticalSection::enter(&self.sched);
        let pool = &mut self.pool;
        let block = self
            .sched
            .with_inbox(handler, |inbox| inbox.0.dequeue(pool))?;
        Some(Msg { block })
    }

    /// Payload of a message
    pub fn payload(&self, msg: &Msg) -> &[u8] {
        self.pool.payload(msg.block)
    }

    /// Mutable payload of a message
    pub fn payload_mut(&mut self, msg: &Msg) -> &mut [u8] {
        self.pool.payload_mut(msg.block)
    }

    /// Number of messages in a queue
    pub fn queue_len(&self, queue: &MsgQueue) -> usize {
        let _cs = CriticalSection::enter(&self.sched);
        queue.0.count(&self.pool)
    }

    /// Backing pool
    pub fn pool(&self) -> &P {
        &self.pool
    }

    /// Scheduler handle
    pub fn scheduler(&self) -> &S {
        &self.sched
    }
}

/// Tag and append; caller holds the critical section
fn link<P: BufferPool>(pool: &mut P, queue: &mut MsgQueue, handler: HandlerId, msg: Msg) {
    pool.header_mut(msg.block).handler = handler;
    queue.0.enqueue(pool, msg.block);
}
