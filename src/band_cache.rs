//! Process-wide LRU cache of decoded band chunks.
//!
//! Scene windows are read strip by strip (or tile by tile), and the same
//! chunks are hit by the reference read, the extended read and every pass
//! over the four bands. Chunks are keyed by source and chunk index, kept
//! behind an `Arc` and bounded by total sample bytes.

use lru::LruCache;
use std::cmp::max;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

const CACHE_CAPACITY_BYTES: usize = 512 * 1024 * 1024;

/// Source identifier (file path) plus strip or tile index
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ChunkKey {
    source: Arc<str>,
    chunk_index: usize,
}

impl ChunkKey {
    fn new(source: &str, chunk_index: usize) -> Self {
        ChunkKey {
            source: Arc::from(source),
            chunk_index,
        }
    }
}

struct CacheEntry {
    data: Arc<Vec<f32>>,
    size_bytes: usize,
}

pub struct BandCache {
    current_bytes: usize,
    capacity_bytes: usize,
    entries: LruCache<ChunkKey, CacheEntry>,
}

impl BandCache {
    fn new(capacity_bytes: usize) -> Self {
        BandCache {
            current_bytes: 0,
            capacity_bytes,
            entries: LruCache::unbounded(),
        }
    }

    fn get(&mut self, key: &ChunkKey) -> Option<Arc<Vec<f32>>> {
        self.entries.get(key).map(|entry| Arc::clone(&entry.data))
    }

    fn contains(&self, key: &ChunkKey) -> bool {
        self.entries.contains(key)
    }

    fn insert(&mut self, key: ChunkKey, data: Arc<Vec<f32>>, size_bytes: usize) {
        if size_bytes > self.capacity_bytes {
            return;
        }

        if let Some(old) = self.entries.pop(&key) {
            self.current_bytes = self.current_bytes.saturating_sub(old.size_bytes);
        }

        while self.current_bytes + size_bytes > self.capacity_bytes {
            if let Some((_key, entry)) = self.entries.pop_lru() {
                self.current_bytes = self.current_bytes.saturating_sub(entry.size_bytes);
            } else {
                break;
            }
        }

        self.current_bytes = self.current_bytes.saturating_add(size_bytes);
        self.entries.put(key, CacheEntry { data, size_bytes });
    }

    fn remove_source(&mut self, source: &str) {
        let stale: Vec<ChunkKey> = self
            .entries
            .iter()
            .filter(|(key, _)| &*key.source == source)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            if let Some(old) = self.entries.pop(&key) {
                self.current_bytes = self.current_bytes.saturating_sub(old.size_bytes);
            }
        }
    }

    fn source_chunks(&self, source: &str) -> usize {
        self.entries.iter().filter(|(key, _)| &*key.source == source).count()
    }
}

static BAND_CACHE: LazyLock<Mutex<BandCache>> = LazyLock::new(|| {
    let cap = max(CACHE_CAPACITY_BYTES, 64 * 1024 * 1024);
    Mutex::new(BandCache::new(cap))
});

// A panic while holding the lock cannot leave the cache inconsistent enough
// to matter; keep serving it.
fn cache() -> MutexGuard<'static, BandCache> {
    BAND_CACHE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cached chunk `chunk_index` of `source`
pub fn get(source: &str, chunk_index: usize) -> Option<Arc<Vec<f32>>> {
    cache().get(&ChunkKey::new(source, chunk_index))
}

/// Check if a chunk is cached without touching its recency
pub fn contains(source: &str, chunk_index: usize) -> bool {
    cache().contains(&ChunkKey::new(source, chunk_index))
}

/// Number of cached chunks of `source`
pub fn cached_chunks(source: &str) -> usize {
    cache().source_chunks(source)
}

/// Cache a decoded chunk; oversized chunks are not cached
pub fn insert(source: &str, chunk_index: usize, data: Arc<Vec<f32>>) {
    let size_bytes = data.len() * std::mem::size_of::<f32>();
    cache().insert(ChunkKey::new(source, chunk_index), data, size_bytes);
}

/// Drop every cached chunk of `source`, e.g. after the file is rewritten
pub fn invalidate(source: &str) {
    cache().remove_source(source);
}

/// Return the cached chunk or decode and cache it
///
/// # Errors
/// Propagates the decoder's error; nothing is cached on failure.
pub fn get_or_load<E>(
    source: &str,
    chunk_index: usize,
    load: impl FnOnce() -> Result<Vec<f32>, E>,
) -> Result<Arc<Vec<f32>>, E> {
    if let Some(hit) = get(source, chunk_index) {
        return Ok(hit);
    }
    let data = Arc::new(load()?);
    insert(source, chunk_index, Arc::clone(&data));
    Ok(data)
}
