//! Byte-bounded LRU cache for encoded tiles.
//!
//! Tiles are keyed by the id of the server that rendered them plus every
//! request field that changes the encoded bytes. Because stage ids are
//! derived from the whole upstream chain, two pipelines never share entries
//! unless they produce identical pixels.

use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::RwLock;

use super::encoder::TileFormat;
use super::service::TileRequest;

/// Default cache capacity: 64MB
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 64 * 1024 * 1024;

/// Default maximum number of entries
const DEFAULT_MAX_ENTRIES: usize = 10_000;

// =============================================================================
// Cache Key
// =============================================================================

/// Identity of one encoded tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileCacheKey {
    /// Id of the rendering server
    pub server_id: Arc<str>,
    pub level: usize,
    pub tile_x: u32,
    pub tile_y: u32,
    pub z: u32,
    pub t: u32,
    pub format: TileFormat,
    /// JPEG quality; always 0 for lossless formats
    pub quality: u8,
}

impl TileCacheKey {
    pub fn new(server_id: impl Into<Arc<str>>, request: &TileRequest) -> Self {
        let quality = match request.format {
            TileFormat::Jpeg => request.quality,
            TileFormat::Png => 0,
        };
        Self {
            server_id: server_id.into(),
            level: request.level,
            tile_x: request.tile_x,
            tile_y: request.tile_y,
            z: request.z,
            t: request.t,
            format: request.format,
            quality,
        }
    }
}

// =============================================================================
// Tile Cache
// =============================================================================

struct CacheState {
    entries: LruCache<TileCacheKey, Bytes>,
    size: usize,
}

impl CacheState {
    fn remove(&mut self, key: &TileCacheKey) -> Option<Bytes> {
        let data = self.entries.pop(key)?;
        self.size = self.size.saturating_sub(data.len());
        Some(data)
    }
}

/// LRU cache of encoded tiles, bounded by total byte size and entry count.
///
/// Safe to share across tasks behind an `Arc`.
pub struct TileCache {
    state: RwLock<CacheState>,
    max_size: usize,
}

impl TileCache {
    /// A cache with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TILE_CACHE_CAPACITY)
    }

    /// A cache holding at most `max_size` bytes of encoded tiles.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES)
    }

    /// # Arguments
    ///
    /// * `max_size` - Maximum total size of cached tiles in bytes
    /// * `max_entries` - Maximum number of tiles (at least 1)
    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: RwLock::new(CacheState {
                entries: LruCache::new(max_entries),
                size: 0,
            }),
            max_size,
        }
    }

    /// Look up a tile, marking it recently used.
    pub async fn get(&self, key: &TileCacheKey) -> Option<Bytes> {
        self.state.write().await.entries.get(key).cloned()
    }

    /// Whether a tile is cached, without touching LRU order.
    pub async fn contains(&self, key: &TileCacheKey) -> bool {
        self.state.read().await.entries.contains(key)
    }

    /// Insert or replace a tile, then evict least-recently-used tiles until
    /// the cache fits its byte capacity.
    ///
    /// A tile larger than the whole capacity is not retained.
    pub async fn put(&self, key: TileCacheKey, data: Bytes) {
        let mut state = self.state.write().await;
        state.remove(&key);

        let added = data.len();
        if let Some((_, evicted)) = state.entries.push(key, data) {
            // Entry-count eviction
            state.size = state.size.saturating_sub(evicted.len());
        }
        state.size += added;

        while state.size > self.max_size {
            match state.entries.pop_lru() {
                Some((_, evicted)) => state.size = state.size.saturating_sub(evicted.len()),
                None => break,
            }
        }
    }

    pub async fn remove(&self, key: &TileCacheKey) -> Option<Bytes> {
        self.state.write().await.remove(key)
    }

    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.size = 0;
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Total bytes currently cached.
    pub async fn size(&self) -> usize {
        self.state.read().await.size
    }

    /// Maximum capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
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
