//! Directory block cache.
//!
//! A small slot table of whole directory blocks keyed by their device
//! extent. Buffers are shared `Arc<[u8]>` so callers keep them after the
//! slot is recycled. Replacement is half-flush: when every slot is taken the
//! oldest half is dropped and the survivors move down.

use std::sync::Arc;
use tracing::{debug, trace};
use xfsr_block::BlockDevice;
use xfsr_error::Result;
use xfsr_types::BlockNumber;

/// Slots used when the caller does not choose.
pub const DEFAULT_DIR_CACHE_SLOTS: usize = 128;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug)]
struct Slot {
    start: BlockNumber,
    count: u32,
    data: Arc<[u8]>,
}

impl Slot {
    fn holds(&self, start: BlockNumber, count: u32) -> bool {
        self.start == start && self.count == count
    }
}

#[derive(Debug)]
pub struct DirBlockCache {
    /// Oldest first; the last slot is always the most recent insert.
    slots: Vec<Slot>,
    capacity: usize,
    stats: CacheStats,
}

impl Default for DirBlockCache {
    fn default() -> Self {
        Self::new(DEFAULT_DIR_CACHE_SLOTS)
    }
}

impl DirBlockCache {
    /// Capacity is rounded up to an even number of at least two.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_multiple_of(2);
        Self {
            slots: Vec::with_capacity(capacity),
            capacity,
            stats: CacheStats::default(),
        }
    }

    /// Return `count` blocks at `start`, reading them on a miss.
    pub fn get(&mut self, dev: &dyn BlockDevice, start: BlockNumber, count: u32) -> Result<Arc<[u8]>> {
        if let Some(slot) = self.slots.last() {
            if slot.holds(start, count) {
                self.stats.hits += 1;
                trace!(block = start.0, count, "dir_cache_hit_mru");
                return Ok(Arc::clone(&slot.data));
            }
        }
        if let Some(slot) = self.slots.iter().rev().skip(1).find(|s| s.holds(start, count)) {
            self.stats.hits += 1;
            trace!(block = start.0, count, "dir_cache_hit");
            return Ok(Arc::clone(&slot.data));
        }

        self.stats.misses += 1;
        trace!(block = start.0, count, "dir_cache_miss");
        let data: Arc<[u8]> = dev.read_blocks(start, count)?.into_inner().into();
        if self.slots.len() >= self.capacity {
            let half = self.capacity / 2;
            self.slots.drain(..half);
            self.stats.evictions += u64::try_from(half).unwrap_or(u64::MAX);
            debug!(evicted = half, "dir_cache_flush_half");
        }
        self.slots.push(Slot {
            start,
            count,
            data: Arc::clone(&data),
        });
        Ok(data)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every slot and reset the counters.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.stats = CacheStats::default();
    }
}
