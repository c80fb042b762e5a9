//! Scratch Memory
//!
//! A single fixed-size arena serving the transient strings and parameter
//! blocks builtins need while they run. The arena lives in legacy low memory,
//! so its capacity is a fixed engineering budget rather than something that
//! grows on demand.
//!
//! Design principles:
//! - Every allocation is tracked with the size it was created with
//! - Frees are size-checked, so handler defects show up immediately
//! - Whatever is still live at teardown is reported as leaked
//! - Freed space is coalesced and reused first-fit

use slab::Slab;

/// Default pool capacity (2 KiB of low memory)
pub const POOL_SIZE: usize = 0x800;

/// Largest pool a single segment can address
pub const MAX_POOL_SIZE: usize = 0x10000;

/// Handle to a live scratch allocation
///
/// Handles are cheap to copy. A handle that outlives its allocation is
/// rejected by the pool even if the same slot is reused later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScratchPtr {
    key: usize,
    offset: u16,
    generation: u32,
}

impl ScratchPtr {
    /// Byte offset of the allocation from the start of the pool
    pub fn offset(&self) -> u16 {
        self.offset
    }
}

/// A live allocation
#[derive(Debug, Clone, Copy)]
struct Block {
    offset: usize,
    size: usize,
    generation: u32,
}

/// A run of free bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FreeRange {
    offset: usize,
    size: usize,
}

impl FreeRange {
    fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Scratch memory errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// No free run is large enough for the request
    OutOfMemory { requested: usize, largest_free: usize },
    /// Zero-sized request, or a pool size the legacy layout cannot address
    InvalidSize(usize),
    /// Handle does not name a live allocation (double free, stale handle)
    InvalidPointer,
}

impl std::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfMemory {
                requested,
                largest_free,
            } => write!(
                f,
                "out of scratch memory: requested {} bytes, largest free run {}",
                requested, largest_free
            ),
            Self::InvalidSize(size) => write!(f, "invalid size: {}", size),
            Self::InvalidPointer => write!(f, "invalid scratch pointer"),
        }
    }
}

impl std::error::Error for MemoryError {}

/// Result of a size-checked free
///
/// The memory is released either way; a mismatch is for the caller to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeOutcome {
    /// Size recorded when the block was allocated
    pub recorded: usize,
    /// Size the caller claimed
    pub expected: usize,
}

impl FreeOutcome {
    pub fn is_mismatch(&self) -> bool {
        self.recorded != self.expected
    }
}

/// Pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub used: usize,
    pub peak: usize,
    pub live: usize,
    pub free_ranges: usize,
    pub largest_free: usize,
}

/// The shared scratch arena
#[derive(Debug)]
pub struct ScratchPool {
    /// Backing bytes
    data: Vec<u8>,
    /// Free runs, sorted by offset, never adjacent
    free: Vec<FreeRange>,
    /// Live allocations
    live: Slab<Block>,
    /// Bytes currently allocated
    used: usize,
    /// High-water mark
    peak: usize,
    /// Bumped on every allocation so stale handles never match
    generation: u32,
}

impl ScratchPool {
    /// Reserve a pool of `capacity` bytes
    pub fn new(capacity: usize) -> Result<Self, MemoryError> {
        if capacity == 0 || capacity > MAX_POOL_SIZE {
            return Err(MemoryError::InvalidSize(capacity));
        }

        Ok(Self {
            data: vec![0u8; capacity],
            free: vec![FreeRange {
                offset: 0,
                size: capacity,
            }],
            live: Slab::new(),
            used: 0,
            peak: 0,
            generation: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn available(&self) -> usize {
        self.capacity() - self.used
    }

    pub fn peak(&self) -> usize {
        self.peak
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Size of the largest single request that can currently succeed
    pub fn largest_free(&self) -> usize {
        self.free.iter().map(|r| r.size).max().unwrap_or(0)
    }

    /// Carve `size` bytes out of the pool (first fit, zero-filled)
    pub fn allocate(&mut self, size: usize) -> Result<ScratchPtr, MemoryError> {
        if size == 0 {
            return Err(MemoryError::InvalidSize(size));
        }

        let idx = self
            .free
            .iter()
            .position(|r| r.size >= size)
            .ok_or(MemoryError::OutOfMemory {
                requested: size,
                largest_free: self.largest_free(),
            })?;

        let range = &mut self.free[idx];
        let offset = range.offset;
        if range.size == size {
            self.free.remove(idx);
        } else {
            range.offset += size;
            range.size -= size;
        }

        self.data[offset..offset + size].fill(0);
        self.generation = self.generation.wrapping_add(1);
        let generation = self.generation;
        let key = self.live.insert(Block {
            offset,
            size,
            generation,
        });

        self.used += size;
        self.peak = self.peak.max(self.used);

        Ok(ScratchPtr {
            key,
            // capacity <= MAX_POOL_SIZE, so every offset fits
            offset: offset as u16,
            generation,
        })
    }

    /// Release an allocation, checking the caller's idea of its size
    ///
    /// The block is released even when `expected_size` is wrong.
    pub fn free(
        &mut self,
        ptr: ScratchPtr,
        expected_size: usize,
    ) -> Result<FreeOutcome, MemoryError> {
        let block = self.lookup(ptr)?;
        self.live.remove(ptr.key);
        self.used -= block.size;
        self.release(FreeRange {
            offset: block.offset,
            size: block.size,
        });

        Ok(FreeOutcome {
            recorded: block.size,
            expected: expected_size,
        })
    }

    /// Size an allocation was created with
    pub fn size_of(&self, ptr: ScratchPtr) -> Option<usize> {
        self.lookup(ptr).ok().map(|b| b.size)
    }

    pub fn bytes(&self, ptr: ScratchPtr) -> Option<&[u8]> {
        let block = self.lookup(ptr).ok()?;
        Some(&self.data[block.offset..block.offset + block.size])
    }

    pub fn bytes_mut(&mut self, ptr: ScratchPtr) -> Option<&mut [u8]> {
        let block = self.lookup(ptr).ok()?;
        Some(&mut self.data[block.offset..block.offset + block.size])
    }

    /// Tear the pool down, returning the number of bytes still allocated
    pub fn destroy(self) -> usize {
        self.used
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity(),
            used: self.used,
            peak: self.peak,
            live: self.live.len(),
            free_ranges: self.free.len(),
            largest_free: self.largest_free(),
        }
    }

    fn lookup(&self, ptr: ScratchPtr) -> Result<Block, MemoryError> {
        self.live
            .get(ptr.key)
            .copied()
            .filter(|b| b.generation == ptr.generation)
            .ok_or(MemoryError::InvalidPointer)
    }

    /// Return a range to the free list, merging with its neighbours
    fn release(&mut self, range: FreeRange) {
        let idx = self.free.partition_point(|r| r.offset < range.offset);
        self.free.insert(idx, range);

        if idx + 1 < self.free.len() && self.free[idx].end() == self.free[idx + 1].offset {
            let next = self.free.remove(idx + 1);
            self.free[idx].size += next.size;
        }

        if idx > 0 && self.free[idx - 1].end() == self.free[idx].offset {
            let current = self.free.remove(idx);
            self.free[idx - 1].size += current.size;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_basic() {
        let mut pool = ScratchPool::new(POOL_SIZE).unwrap();
        assert_eq!(pool.capacity(), POOL_SIZE);

        let ptr = pool.allocate(100).unwrap();
        assert_eq!(pool.used(), 100);
        assert_eq!(pool.size_of(ptr), Some(100));
        assert_eq!(pool.live_count(), 1);

        let outcome = pool.free(ptr, 100).unwrap();
        assert!(!outcome.is_mismatch());
        assert_eq!(pool.used(), 0);
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn test_pool_invalid_capacity() {
        assert_eq!(
            ScratchPool::new(0).unwrap_err(),
            MemoryError::InvalidSize(0)
        );
        assert_eq!(
            ScratchPool::new(MAX_POOL_SIZE + 1).unwrap_err(),
            MemoryError::InvalidSize(MAX_POOL_SIZE + 1)
        );
        assert!(ScratchPool::new(MAX_POOL_SIZE).is_ok());
    }

    #[test]
    fn test_zero_size_rejected() {
        let mut pool = ScratchPool::new(64).unwrap();
        assert_eq!(pool.allocate(0), Err(MemoryError::InvalidSize(0)));
    }

    #[test]
    fn test_allocations_do_not_overlap() {
        let mut pool = ScratchPool::new(64).unwrap();
        let a = pool.allocate(16).unwrap();
        let b = pool.allocate(16).unwrap();

        pool.bytes_mut(a).unwrap().fill(0xAA);
        pool.bytes_mut(b).unwrap().fill(0xBB);

        assert!(pool.bytes(a).unwrap().iter().all(|&x| x == 0xAA));
        assert!(pool.bytes(b).unwrap().iter().all(|&x| x == 0xBB));
        assert_eq!(b.offset(), a.offset() + 16);
    }

    #[test]
    fn test_exhaustion() {
        let mut pool = ScratchPool::new(64).unwrap();
        pool.allocate(40).unwrap();

        assert_eq!(
            pool.allocate(32),
            Err(MemoryError::OutOfMemory {
                requested: 32,
                largest_free: 24
            })
        );

        // The remainder is still usable
        assert!(pool.allocate(24).is_ok());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_freed_space_is_reused() {
        let mut pool = ScratchPool::new(64).unwrap();
        let a = pool.allocate(32).unwrap();
        let _b = pool.allocate(32).unwrap();
        assert!(pool.allocate(1).is_err());

        pool.free(a, 32).unwrap();
        let c = pool.allocate(32).unwrap();
        assert_eq!(c.offset(), a.offset());
    }

    #[test]
    fn test_free_ranges_coalesce() {
        let mut pool = ScratchPool::new(48).unwrap();
        let a = pool.allocate(16).unwrap();
        let b = pool.allocate(16).unwrap();
        let c = pool.allocate(16).unwrap();

        pool.free(a, 16).unwrap();
        pool.free(c, 16).unwrap();
        assert_eq!(pool.stats().free_ranges, 2);
        assert_eq!(pool.largest_free(), 16);

        // Freeing the middle block joins all three runs
        pool.free(b, 16).unwrap();
        assert_eq!(pool.stats().free_ranges, 1);
        assert_eq!(pool.largest_free(), 48);
        assert!(pool.allocate(48).is_ok());
    }

    #[test]
    fn test_size_mismatch_still_releases() {
        let mut pool = ScratchPool::new(64).unwrap();
        let ptr = pool.allocate(20).unwrap();

        let outcome = pool.free(ptr, 12).unwrap();
        assert!(outcome.is_mismatch());
        assert_eq!(outcome.recorded, 20);
        assert_eq!(outcome.expected, 12);

        assert_eq!(pool.used(), 0);
        let again = pool.allocate(64).unwrap();
        assert_eq!(again.offset(), 0);
    }

    #[test]
    fn test_double_free_rejected() {
        let mut pool = ScratchPool::new(64).unwrap();
        let ptr = pool.allocate(8).unwrap();
        pool.free(ptr, 8).unwrap();
        assert_eq!(pool.free(ptr, 8), Err(MemoryError::InvalidPointer));
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let mut pool = ScratchPool::new(64).unwrap();
        let old = pool.allocate(8).unwrap();
        pool.free(old, 8).unwrap();

        // Same slab slot and offset, new generation
        let new = pool.allocate(8).unwrap();
        assert_eq!(new.offset(), old.offset());
        assert!(pool.bytes(old).is_none());
        assert_eq!(pool.free(old, 8), Err(MemoryError::InvalidPointer));
        assert_eq!(pool.size_of(new), Some(8));
    }

    #[test]
    fn test_allocation_is_zeroed() {
        let mut pool = ScratchPool::new(32).unwrap();
        let ptr = pool.allocate(32).unwrap();
        pool.bytes_mut(ptr).unwrap().fill(0xFF);
        pool.free(ptr, 32).unwrap();

        let ptr = pool.allocate(32).unwrap();
        assert!(pool.bytes(ptr).unwrap().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_destroy_reports_leaks() {
        let mut pool = ScratchPool::new(POOL_SIZE).unwrap();
        let a = pool.allocate(10).unwrap();
        pool.allocate(30).unwrap();
        pool.free(a, 10).unwrap();
        assert_eq!(pool.destroy(), 30);

        let pool = ScratchPool::new(POOL_SIZE).unwrap();
        assert_eq!(pool.destroy(), 0);
    }

    #[test]
    fn test_pool_peak() {
        let mut pool = ScratchPool::new(256).unwrap();
        let a = pool.allocate(100).unwrap();
        let b = pool.allocate(50).unwrap();
        pool.free(a, 100).unwrap();
        pool.free(b, 50).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.peak, 150);
        assert_eq!(stats.used, 0);
        assert_eq!(stats.live, 0);
    }
}
