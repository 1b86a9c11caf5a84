//! Sandbox heap allocator.
//!
//! Manages a contiguous range of sandbox offsets on behalf of the host.
//! First-fit over an address-ordered free list; freed blocks are coalesced
//! with their neighbours. All block sizes and addresses are 8-byte aligned.
//!
//! The allocator only does bookkeeping. It never reads or writes the memory
//! it manages, so a bogus `free` can fail but cannot corrupt anything.

use std::collections::BTreeMap;

use crate::error::BackendError;

/// Bytes at the end of every region that are never handed out, so that the
/// one-past-the-end address of any allocation still lies inside the region.
pub const TAIL_GUARD: usize = 16;

/// Round `size` up to a multiple of 8.
fn align8(size: usize) -> Option<usize> {
    size.checked_add(7).map(|s| s & !7)
}

/// First-fit allocator over `[base, base + capacity)`.
#[derive(Debug, Clone)]
pub struct HeapAllocator {
    base: u64,
    capacity: usize,
    /// Free blocks keyed by start offset.
    free: BTreeMap<u64, usize>,
    /// Live blocks keyed by start offset.
    live: BTreeMap<u64, usize>,
}

impl HeapAllocator {
    /// Create an allocator for `capacity` bytes starting at offset `base`.
    ///
    /// `base` is rounded up to 8 and `capacity` is trimmed to match.
    pub fn new(base: u64, capacity: usize) -> Self {
        let aligned = (base + 7) & !7;
        let lost = (aligned - base) as usize;
        let capacity = capacity.saturating_sub(lost) & !7;
        let mut free = BTreeMap::new();
        if capacity > 0 {
            free.insert(aligned, capacity);
        }
        Self {
            base: aligned,
            capacity,
            free,
            live: BTreeMap::new(),
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently handed out.
    pub fn used(&self) -> usize {
        self.live.values().sum()
    }

    /// Number of live blocks.
    pub fn live_blocks(&self) -> usize {
        self.live.len()
    }

    /// Allocate at least `size` bytes. Zero-sized requests get 8 bytes.
    pub fn alloc(&mut self, size: usize) -> Result<u64, BackendError> {
        let aligned = align8(size.max(1)).ok_or(BackendError::OutOfMemory(size))?;
        let (addr, len) = self
            .free
            .iter()
            .find(|(_, len)| **len >= aligned)
            .map(|(a, l)| (*a, *l))
            .ok_or(BackendError::OutOfMemory(size))?;

        self.free.remove(&addr);
        if len > aligned {
            self.free.insert(addr + aligned as u64, len - aligned);
        }
        self.live.insert(addr, aligned);
        Ok(addr)
    }

    /// Release the block starting at `addr`.
    pub fn free(&mut self, addr: u64) -> Result<(), BackendError> {
        let mut len = self
            .live
            .remove(&addr)
            .ok_or(BackendError::InvalidAddress(addr))?;
        let mut start = addr;

        // Merge with the following block.
        let next = start + len as u64;
        if let Some(next_len) = self.free.remove(&next) {
            len += next_len;
        }
        // Merge with the preceding block.
        if let Some((&prev, &prev_len)) = self.free.range(..start).next_back() {
            if prev + prev_len as u64 == start {
                self.free.remove(&prev);
                start = prev;
                len += prev_len;
            }
        }
        self.free.insert(start, len);
        Ok(())
    }

    /// True if `addr` is the start of a live block.
    pub fn is_live(&self, addr: u64) -> bool {
        self.live.contains_key(&addr)
    }
}
