//! Message buffer pool
//!
//! The message service does not own memory. It asks a [`BufferPool`] for
//! blocks and gives them back. [`StaticPool`] is a fixed-block pool with no
//! heap, good enough for boards with one message size class; hosts with
//! richer allocators implement the trait themselves.
//!
//! Author: Moroya Sakamoto

use crate::error::Error;
use crate::message::Header;
use crate::queue::{Links, Queue};

/// Index of a pool block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockId(u16);

impl BlockId {
    /// Block id for slot `index`
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Slot index
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Block allocator backing message buffers
///
/// Every block carries a routing [`Header`] and a next slot next to its
/// payload; the pool stores them, only the message service reads them.
/// Accessors may panic on a block id the pool never handed out.
pub trait BufferPool: Links<BlockId> {
    /// Reserve a block with room for `len` payload bytes
    ///
    /// `None` when no block is free; `len` may be zero.
    fn allocate(&mut self, len: usize) -> Option<BlockId>;

    /// Return a block
    fn free(&mut self, block: BlockId) -> Result<(), Error>;

    /// Routing header of a block
    fn header(&self, block: BlockId) -> &Header;

    /// Mutable routing header of a block
    fn header_mut(&mut self, block: BlockId) -> &mut Header;

    /// Payload of the length requested at allocation
    fn payload(&self, block: BlockId) -> &[u8];

    /// Mutable payload of the length requested at allocation
    fn payload_mut(&mut self, block: BlockId) -> &mut [u8];
}

/// Pool allocation statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PoolStats {
    /// Blocks currently allocated
    pub in_use: u16,
    /// High-water mark of `in_use`
    pub max_in_use: u16,
    /// Allocations refused (exhausted or oversized)
    pub failures: u32,
}

#[derive(Clone, Copy)]
struct Block<const SIZE: usize> {
    header: Header,
    next: Option<BlockId>,
    len: usize,
    in_use: bool,
    data: [u8; SIZE],
}

impl<const SIZE: usize> Block<SIZE> {
    const EMPTY: Self = Self {
        header: Header::EMPTY,
        next: None,
        len: 0,
        in_use: false,
        data: [0u8; SIZE],
    };
}

/// Block storage; the next slot doubles as the free-list link
struct Blocks<const N: usize, const SIZE: usize>([Block<SIZE>; N]);

impl<const N: usize, const SIZE: usize> Links<BlockId> for Blocks<N, SIZE> {
    fn next(&self, item: BlockId) -> Option<BlockId> {
        self.0[item.index()].next
    }

    fn set_next(&mut self, item: BlockId, next: Option<BlockId>) {
        self.0[item.index()].next = next;
    }
}

/// Fixed-block pool: `N` blocks of `SIZE` payload bytes
///
/// Never-used blocks are handed out in order; freed blocks go on a free
/// list and are reused first.
pub struct StaticPool<const N: usize, const SIZE: usize> {
    blocks: Blocks<N, SIZE>,
    /// Freed blocks
    free: Queue<BlockId>,
    /// First block never handed out
    unused: usize,
    stats: PoolStats,
}

impl<const N: usize, const SIZE: usize> StaticPool<N, SIZE> {
    /// Blocks that can be handed out; ids and `in_use` are `u16`
    const USABLE: usize = if N < u16::MAX as usize {
        N
    } else {
        u16::MAX as usize
    };

    /// Create a pool with every block free
    pub const fn new() -> Self {
        Self {
            blocks: Blocks([Block::<SIZE>::EMPTY; N]),
            free: Queue::new(),
            unused: 0,
            stats: PoolStats {
                in_use: 0,
                max_in_use: 0,
                failures: 0,
            },
        }
    }

    /// Number of blocks that can be allocated
    pub const fn capacity(&self) -> usize {
        Self::USABLE
    }

    /// Largest payload a block can hold
    pub const fn block_size(&self) -> usize {
        SIZE
    }

    /// Blocks available for allocation
    pub fn available(&self) -> usize {
        Self::USABLE - self.stats.in_use as usize
    }

    /// Allocation statistics
    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    fn take_block(&mut self) -> Option<BlockId> {
        if let Some(block) = self.free.dequeue(&mut self.blocks) {
            return Some(block);
        }
        if self.unused < Self::USABLE {
            let block = BlockId(self.unused as u16);
            self.unused += 1;
            return Some(block);
        }
        None
    }

    fn block(&self, block: BlockId) -> &Block<SIZE> {
        &self.blocks.0[block.index()]
    }

    fn block_mut(&mut self, block: BlockId) -> &mut Block<SIZE> {
        &mut self.blocks.0[block.index()]
    }
}

impl<const N: usize, const SIZE: usize> Default for StaticPool<N, SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize, const SIZE: usize> Links<BlockId> for StaticPool<N, SIZE> {
    fn next(&self, item: BlockId) -> Option<BlockId> {
        self.blocks.next(item)
    }

    fn set_next(&mut self, item: BlockId, next: Option<BlockId>) {
        self.blocks.set_next(item, next)
    }
}

impl<const N: usize, const SIZE: usize> BufferPool for StaticPool<N, SIZE> {
    fn allocate(&mut self, len: usize) -> Option<BlockId> {
        let taken = if len <= SIZE { self.take_block() } else { None };
        let Some(id) = taken else {
            self.stats.failures = self.stats.failures.saturating_add(1);
            warn!("pool alloc failed len={} in_use={}", len, self.stats.in_use);
            return None;
        };

        let block = self.block_mut(id);
        block.header = Header::EMPTY;
        block.next = None;
        block.len = len;
        block.in_use = true;

        self.stats.in_use += 1;
        self.stats.max_in_use = self.stats.max_in_use.max(self.stats.in_use);
        Some(id)
    }

    fn free(&mut self, block: BlockId) -> Result<(), Error> {
        if block.index() >= N || !self.block(block).in_use {
            error!("pool free of unallocated block {}", block.0);
            return Err(Error::ForeignBuffer(block.0));
        }
        self.block_mut(block).in_use = false;
        self.free.enqueue(&mut self.blocks, block);
        self.stats.in_use -= 1;
        Ok(())
    }

    fn header(&self, block: BlockId) -> &Header {
        &self.block(block).header
    }

    fn header_mut(&mut self, block: BlockId) -> &mut Header {
        &mut self.block_mut(block).header
    }

    fn payload(&self, block: BlockId) -> &[u8] {
        let block = self.block(block);
        &block.data[..block.len]
    }

    fn payload_mut(&mut self, block: BlockId) -> &mut [u8] {
        let block = self.block_mut(block);
        &mut block.data[..block.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_until_exhausted() {
        let mut pool = StaticPool::<3, 16>::new();
        assert_eq!(pool.available(), 3);
        let a = pool.allocate(4).unwrap();
        let b = pool.allocate(16).unwrap();
        let c = pool.allocate(0).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(pool.allocate(1), None);

        let stats = pool.stats();
        assert_eq!(stats.in_use, 3);
        assert_eq!(stats.max_in_use, 3);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn test_oversized_request() {
        let mut pool = StaticPool::<2, 8>::new();
        assert_eq!(pool.allocate(9), None);
        assert_eq!(pool.stats().failures, 1);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_payload_len() {
        let mut pool = StaticPool::<2, 8>::new();
        let block = pool.allocate(5).unwrap();
        assert_eq!(pool.payload(block).len(), 5);
        pool.payload_mut(block).copy_from_slice(b"hello");
        assert_eq!(pool.payload(block), b"hello");

        let empty = pool.allocate(0).unwrap();
        assert!(pool.payload(empty).is_empty());
    }

    #[test]
    fn test_freed_block_reused() {
        let mut pool = StaticPool::<2, 8>::new();
        let a = pool.allocate(1).unwrap();
        let _b = pool.allocate(1).unwrap();
        pool.free(a).unwrap();
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.allocate(2), Some(a));
        assert_eq!(pool.stats().max_in_use, 2);
    }

    #[test]
    fn test_usable_blocks_fit_u16() {
        assert_eq!(StaticPool::<4, 8>::USABLE, 4);
        assert_eq!(StaticPool::<65_535, 0>::USABLE, 65_535);
        // Block 65535 would push `in_use` past u16::MAX
        assert_eq!(StaticPool::<65_536, 0>::USABLE, u16::MAX as usize);
        assert_eq!(StaticPool::<100_000, 0>::USABLE, u16::MAX as usize);
    }

    #[test]
    fn test_double_free_rejected() {
        let mut pool = StaticPool::<2, 8>::new();
        let a = pool.allocate(1).unwrap();
        pool.free(a).unwrap();
        assert_eq!(pool.free(a), Err(Error::ForeignBuffer(0)));
        assert_eq!(pool.free(BlockId::new(7)), Err(Error::ForeignBuffer(7)));
        assert_eq!(pool.stats().in_use, 0);
    }
}
