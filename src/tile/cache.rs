//! Tile cache for decoded tile bitmaps.
//!
//! This module provides an LRU cache keyed by [`TileIndex`], bounded both by
//! total payload bytes and by entry count.
//!
//! # Eviction
//!
//! Entries are ranked by access sequence, not wall-clock time, so eviction
//! order is fully deterministic. Eviction runs inside `put`: when `put`
//! returns, both bounds hold.
//!
//! # Sharing
//!
//! The cache is written from fetch workers and read from the control
//! thread. A single mutex guards the LRU list and its size accounting, so
//! every operation is atomic. Evicting an entry only drops the cache's own
//! handle on the bitmap; holders of a clone keep it alive.

use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use serde::Serialize;
use tracing::trace;

use crate::geometry::TileIndex;

use super::bitmap::TileBitmap;

/// Default cache capacity: 64MB
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 64 * 1024 * 1024;

/// Default maximum number of cached tiles
pub const DEFAULT_TILE_CACHE_ENTRIES: usize = 1024;

// =============================================================================
// Cache Entry
// =============================================================================

/// A cached bitmap with its last access sequence number.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub bitmap: TileBitmap,
    pub last_access: u64,
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub entries: usize,
    pub size: usize,
}

struct CacheInner {
    entries: LruCache<TileIndex, CacheEntry>,
    size: usize,
    sequence: u64,
    stats: CacheStats,
}

impl CacheInner {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}

// =============================================================================
// Tile Cache
// =============================================================================

/// LRU cache for tile bitmaps with byte and entry limits.
///
/// # Example
///
/// ```
/// use tiled_map::geometry::TileIndex;
/// use tiled_map::tile::{TileBitmap, TileCache};
///
/// let cache = TileCache::with_capacity(1024 * 1024);
/// let index = TileIndex::new(3, 1, 2);
///
/// cache.put(index, TileBitmap::new(index, vec![0u8; 512]));
/// assert!(cache.get(index).is_some());
/// ```
pub struct TileCache {
    inner: Mutex<CacheInner>,

    /// Maximum total payload size in bytes
    max_size: usize,

    /// Maximum number of entries
    max_entries: usize,
}

impl TileCache {
    /// Create a cache with the default limits.
    pub fn new() -> Self {
        Self::with_capacity_and_entries(DEFAULT_TILE_CACHE_CAPACITY, DEFAULT_TILE_CACHE_ENTRIES)
    }

    /// Create a cache holding at most `max_size` bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_TILE_CACHE_ENTRIES)
    }

    /// Create a cache with both a byte limit and an entry limit.
    ///
    /// An entry limit of zero is treated as one.
    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                size: 0,
                sequence: 0,
                stats: CacheStats::default(),
            }),
            max_size,
            max_entries: max_entries.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        // Every critical section leaves the accounting consistent, so a
        // poisoned lock still holds valid data.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a tile and mark it as most recently used.
    pub fn get(&self, index: TileIndex) -> Option<TileBitmap> {
        let mut inner = self.lock();
        let sequence = inner.next_sequence();
        match inner.entries.get_mut(&index) {
            Some(entry) => {
                entry.last_access = sequence;
                let bitmap = entry.bitmap.clone();
                inner.stats.hits += 1;
                Some(bitmap)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Check for a tile without touching its recency.
    pub fn contains(&self, index: TileIndex) -> bool {
        self.lock().entries.contains(&index)
    }

    /// Last access sequence of a cached tile, without touching its recency.
    pub fn last_access(&self, index: TileIndex) -> Option<u64> {
        self.lock().entries.peek(&index).map(|entry| entry.last_access)
    }

    /// Store a tile, evicting least-recently-used entries as needed.
    ///
    /// Replacing an existing tile updates its size and recency. A bitmap
    /// larger than the whole byte capacity is not stored, and any previous
    /// entry for the same index is dropped.
    pub fn put(&self, index: TileIndex, bitmap: TileBitmap) {
        let mut inner = self.lock();

        if let Some(old) = inner.entries.pop(&index) {
            inner.size = inner.size.saturating_sub(old.bitmap.len());
        }

        if bitmap.len() > self.max_size {
            trace!(%index, bytes = bitmap.len(), "Tile larger than cache capacity, not cached");
            inner.stats.entries = inner.entries.len();
            inner.stats.size = inner.size;
            return;
        }

        let sequence = inner.next_sequence();
        inner.size += bitmap.len();
        inner.entries.put(
            index,
            CacheEntry {
                bitmap,
                last_access: sequence,
            },
        );
        inner.stats.insertions += 1;

        self.evict_locked(&mut inner);
    }

    /// Evict least-recently-used entries until both limits hold.
    ///
    /// `put` already does this; it is exposed for callers that shrink
    /// entries externally or want to force a trim.
    pub fn evict_to_capacity(&self) -> usize {
        let mut inner = self.lock();
        self.evict_locked(&mut inner)
    }

    fn evict_locked(&self, inner: &mut CacheInner) -> usize {
        let mut evicted = 0;
        while inner.size > self.max_size || inner.entries.len() > self.max_entries {
            match inner.entries.pop_lru() {
                Some((index, entry)) => {
                    inner.size = inner.size.saturating_sub(entry.bitmap.len());
                    evicted += 1;
                    trace!(%index, last_access = entry.last_access, "Evicted tile");
                }
                None => break,
            }
        }
        inner.stats.evictions += evicted as u64;
        inner.stats.entries = inner.entries.len();
        inner.stats.size = inner.size;
        evicted
    }

    /// Remove a tile, returning it if it was cached.
    pub fn remove(&self, index: TileIndex) -> Option<TileBitmap> {
        let mut inner = self.lock();
        let entry = inner.entries.pop(&index)?;
        inner.size = inner.size.saturating_sub(entry.bitmap.len());
        inner.stats.entries = inner.entries.len();
        inner.stats.size = inner.size;
        Some(entry.bitmap)
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.size = 0;
        inner.stats.entries = 0;
        inner.stats.size = 0;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Current total payload size in bytes.
    pub fn size(&self) -> usize {
        self.lock().size
    }

    /// Maximum capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
