//! Process-wide registry of live sandbox memory regions.
//!
//! Backends whose memory is not placed at a size-aligned address cannot
//! recover a region from an interior pointer by masking. They register each
//! region here on create and look it up by address for the handle-free
//! conversions of [`SandboxBackend`](crate::SandboxBackend).

use std::collections::BTreeMap;
use std::sync::RwLock;

static REGIONS: RwLock<BTreeMap<usize, usize>> = RwLock::new(BTreeMap::new());

/// One registered region: `[start, start + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: usize,
    pub len: usize,
}

impl Region {
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr - self.start < self.len
    }
}

/// Record a region. Replaces any region with the same start.
pub fn register(start: usize, len: usize) {
    if let Ok(mut regions) = REGIONS.write() {
        regions.insert(start, len);
    }
}

/// Forget the region starting at `start`.
pub fn unregister(start: usize) {
    if let Ok(mut regions) = REGIONS.write() {
        regions.remove(&start);
    }
}

/// The region containing `addr`, if any.
pub fn find(addr: usize) -> Option<Region> {
    let regions = REGIONS.read().ok()?;
    let (&start, &len) = regions.range(..=addr).next_back()?;
    let region = Region { start, len };
    region.contains(addr).then_some(region)
}

/// True if both addresses fall in the same registered region.
pub fn same_region(a: usize, b: usize) -> bool {
    match find(a) {
        Some(region) => region.contains(b),
        None => false,
    }
}
