//! Intrusive FIFO queue
//!
//! The queue itself holds only head and tail. Each element keeps its own
//! "next" slot in whatever storage owns it (a pool block, a timer slot),
//! reached through [`Links`]. Elements are named by small `Copy` indices,
//! so the queue never borrows or moves them.
//!
//! Invariants:
//! - `head` is `None` iff the queue is empty
//! - the tail's next slot is always `None`
//! - following next slots from head reaches tail
//!
//! Author: Moroya Sakamoto

use crate::error::Error;

/// Storage that carries the next slot of each queueable element
pub trait Links<I> {
    /// Element linked after `item`
    fn next(&self, item: I) -> Option<I>;
    /// Relink `item`
    fn set_next(&mut self, item: I, next: Option<I>);
}

/// Singly-linked intrusive queue
///
/// Size: two `Option<I>`, no per-element overhead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Queue<I> {
    head: Option<I>,
    tail: Option<I>,
}

impl<I: Copy + Eq> Queue<I> {
    /// Create an empty queue
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    /// Append at the tail
    pub fn enqueue<L: Links<I> + ?Sized>(&mut self, links: &mut L, item: I) {
        links.set_next(item, None);
        match self.tail {
            Some(tail) => links.set_next(tail, Some(item)),
            None => self.head = Some(item),
        }
        self.tail = Some(item);
    }

    /// Insert at the head
    pub fn push<L: Links<I> + ?Sized>(&mut self, links: &mut L, item: I) {
        links.set_next(item, self.head);
        if self.head.is_none() {
            self.tail = Some(item);
        }
        self.head = Some(item);
    }

    /// Remove from the head
    pub fn dequeue<L: Links<I> + ?Sized>(&mut self, links: &mut L) -> Option<I> {
        let head = self.head?;
        self.head = links.next(head);
        if self.head.is_none() {
            self.tail = None;
        }
        links.set_next(head, None);
        Some(head)
    }

    /// Head element, left in place
    pub fn peek(&self) -> Option<I> {
        self.head
    }

    /// Insert `item` directly after `prev`, or at the head when `prev` is `None`
    ///
    /// The caller locates `prev` by walking the queue; this is what keeps a
    /// queue sorted.
    pub fn insert_after<L: Links<I> + ?Sized>(&mut self, links: &mut L, item: I, prev: Option<I>) {
        match prev {
            None => self.push(links, item),
            Some(prev) => {
                let next = links.next(prev);
                links.set_next(item, next);
                links.set_next(prev, Some(item));
                if next.is_none() {
                    self.tail = Some(item);
                }
            }
        }
    }

    /// Unlink `item`, whose predecessor is `prev` (`None` for the head)
    ///
    /// Fails with [`Error::NotLinked`] and changes nothing if `item` is not
    /// found at that position.
    pub fn remove<L: Links<I> + ?Sized>(
        &mut self,
        links: &mut L,
        item: I,
        prev: Option<I>,
    ) -> Result<(), Error> {
        let next = links.next(item);
        match prev {
            None => {
                if self.head != Some(item) {
                    return Err(Error::NotLinked);
                }
                self.head = next;
            }
            Some(prev) => {
                if links.next(prev) != Some(item) {
                    return Err(Error::NotLinked);
                }
                links.set_next(prev, next);
            }
        }
        if self.tail == Some(item) {
            self.tail = prev;
        }
        links.set_next(item, None);
        Ok(())
    }

    /// Is the queue empty?
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Number of linked elements (walks the queue)
    pub fn count<L: Links<I> + ?Sized>(&self, links: &L) -> usize {
        self.iter(links).count()
    }

    /// Walk the queue from head to tail
    pub fn iter<'a, L: Links<I> + ?Sized>(&self, links: &'a L) -> Iter<'a, I, L> {
        Iter {
            links,
            cursor: self.head,
        }
    }

    /// Find `item` and return its predecessor (`Some(None)` for the head)
    pub fn position<L: Links<I> + ?Sized>(&self, links: &L, item: I) -> Option<Option<I>> {
        let mut prev = None;
        for elem in self.iter(links) {
            if elem == item {
                return Some(prev);
            }
            prev = Some(elem);
        }
        None
    }
}

impl<I: Copy + Eq> Default for Queue<I> {
    fn default() -> Self {
        Self::new()
    }
}

/// Head-to-tail walk over a [`Queue`]
pub struct Iter<'a, I, L: ?Sized> {
    links: &'a L,
    cursor: Option<I>,
}

impl<I: Copy, L: Links<I> + ?Sized> Iterator for Iter<'_, I, L> {
    type Item = I;

    fn next(&mut self) -> Option<I> {
        let item = self.cursor?;
        self.cursor = self.links.next(item);
        Some(item)
    }
}
