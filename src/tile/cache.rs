//! Cache for decoded tiles.
//!
//! A bounded associative store keyed by `(level, tile column, tile row,
//! channel)`. Values are decoded ARGB tiles behind `Arc`: a `get` hands
//! out a new reference, and an entry stays pinned against eviction while
//! any consumer still holds one. Eviction is least-recently-used over the
//! aggregate byte budget.
//!
//! All operations take a single internal lock, which makes the
//! get/put/release history linearizable; concurrent misses on the same
//! key may decode redundantly, but decoded pixels are deterministic so
//! either result is correct.

use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

/// Default cache budget: 32MB of decoded pixels.
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 32 * 1024 * 1024;

// =============================================================================
// Key and value types
// =============================================================================

/// Cache key for decoded tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    /// Pyramid level index (0 = highest resolution)
    pub level: u32,

    /// Tile column (0-indexed from left)
    pub col: u32,

    /// Tile row (0-indexed from top)
    pub row: u32,

    /// Channel (plane) index
    pub channel: u32,
}

impl TileKey {
    /// Create a new cache key.
    pub fn new(level: u32, col: u32, row: u32, channel: u32) -> Self {
        Self {
            level,
            col,
            row,
            channel,
        }
    }
}

/// A decoded tile: premultiplied ARGB words in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePixels {
    pub width: u32,
    pub height: u32,
    pub argb: Vec<u32>,
}

impl TilePixels {
    /// Allocate a tile filled with a single color.
    pub fn filled(width: u32, height: u32, argb: u32) -> Self {
        TilePixels {
            width,
            height,
            argb: vec![argb; (width as usize) * (height as usize)],
        }
    }

    /// Bytes of pixel data this tile accounts for in the budget.
    pub fn byte_size(&self) -> usize {
        self.argb.len() * 4
    }
}

// =============================================================================
// TileCache
// =============================================================================

struct CacheInner {
    map: LruCache<TileKey, Arc<TilePixels>>,
    current_bytes: usize,
}

/// Shared decoded-tile cache.
pub struct TileCache {
    inner: Mutex<CacheInner>,
    max_bytes: usize,
}

impl TileCache {
    /// Create a cache with the default byte budget.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TILE_CACHE_CAPACITY)
    }

    /// Create a cache with a byte budget.
    pub fn with_capacity(max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: LruCache::unbounded(),
                current_bytes: 0,
            }),
            max_bytes,
        }
    }

    /// Look up a tile, bumping it to most-recently-used.
    ///
    /// The returned `Arc` is the caller's reference; dropping it releases
    /// the entry back to the eviction policy.
    pub fn get(&self, key: &TileKey) -> Option<Arc<TilePixels>> {
        let mut inner = self.inner.lock();
        inner.map.get(key).cloned()
    }

    /// Insert a tile and return a reference to the stored entry.
    ///
    /// Evicts least-recently-used unpinned entries until the aggregate
    /// size fits the budget again. Entries still referenced by a consumer
    /// survive eviction.
    pub fn put(&self, key: TileKey, tile: TilePixels) -> Arc<TilePixels> {
        let tile = Arc::new(tile);
        let mut inner = self.inner.lock();

        if let Some(old) = inner.map.pop(&key) {
            inner.current_bytes -= old.byte_size();
        }

        inner.current_bytes += tile.byte_size();
        inner.map.put(key, Arc::clone(&tile));

        self.evict_over_budget(&mut inner);

        tile
    }

    fn evict_over_budget(&self, inner: &mut CacheInner) {
        // Pinned entries are pulled aside and re-inserted, which also
        // promotes them; an entry busy enough to be pinned is a poor
        // eviction candidate anyway.
        let mut pinned = Vec::new();

        while inner.current_bytes > self.max_bytes {
            match inner.map.pop_lru() {
                Some((key, tile)) => {
                    if Arc::strong_count(&tile) > 1 {
                        pinned.push((key, tile));
                    } else {
                        inner.current_bytes -= tile.byte_size();
                    }
                }
                None => break,
            }
        }

        for (key, tile) in pinned {
            inner.map.put(key, tile);
        }
    }

    /// Number of cached tiles.
    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    /// Aggregate size of cached pixel data in bytes.
    pub fn byte_size(&self) -> usize {
        self.inner.lock().current_bytes
    }

    /// The byte budget.
    pub fn capacity(&self) -> usize {
        self.max_bytes
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.current_bytes = 0;
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
