//! Image cache with nested HashMap structure
//!
//! Structure: HashMap<ClipId, HashMap<time, Arc<Image>>>
//! - Outer map: clip identity -> images
//! - Inner map: time (f64 bits) -> image
//!
//! Entries are immutable `Arc<Image>`. Evicting or replacing an entry drops
//! the cache's reference only; readers holding a handle keep the pixels.
//! Memory accounting counts host-owned bytes; linked buffers cost nothing.
//!
//! The maps and the LRU order live behind one mutex, so a replace is never
//! observed half done by a concurrent `get`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexSet;
use log::debug;

use crate::core::cache_man::CacheManager;
use crate::entities::clip::ClipId;
use crate::entities::image::Image;
use crate::entities::traits::{CacheStatsSnapshot, MemoryCache};

/// Cache statistics for monitoring performance
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.hits() + self.misses()
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

/// Time as a hashable key; `-0.0` and `0.0` share a slot.
fn time_key(time: f64) -> u64 {
    if time == 0.0 { 0.0f64.to_bits() } else { time.to_bits() }
}

/// Entry in LRU eviction queue
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
struct CacheKey {
    clip: ClipId,
    time: u64,
}

impl CacheKey {
    fn new(clip: &ClipId, time: f64) -> Self {
        Self {
            clip: clip.clone(),
            time: time_key(time),
        }
    }
}

type ClipImages = HashMap<u64, Arc<Image>>;

/// Images and their LRU order. `lru` holds exactly the keys of `images`.
#[derive(Debug, Default)]
struct Inner {
    images: HashMap<ClipId, ClipImages>,
    /// Front = oldest
    lru: IndexSet<CacheKey>,
}

impl Inner {
    fn len(&self) -> usize {
        self.lru.len()
    }

    fn lookup(&self, key: &CacheKey) -> Option<&Arc<Image>> {
        self.images.get(&key.clip).and_then(|images| images.get(&key.time))
    }

    fn take(&mut self, key: &CacheKey) -> Option<Arc<Image>> {
        let images = self.images.get_mut(&key.clip)?;
        let removed = images.remove(&key.time)?;
        if images.is_empty() {
            self.images.remove(&key.clip);
        }
        self.lru.shift_remove(key);
        Some(removed)
    }

    fn pop_oldest(&mut self) -> Option<(CacheKey, Arc<Image>)> {
        let key = self.lru.first()?.clone();
        let image = self.take(&key)?;
        Some((key, image))
    }
}

/// Image cache with nested HashMap + LRU eviction
///
/// - O(1) clear_clip() on the outer map
/// - O(1) lookup via nested HashMap
/// - LRU order via IndexSet (front = oldest)
#[derive(Debug)]
pub struct MemoryImageCache {
    inner: Mutex<Inner>,
    cache_manager: Arc<CacheManager>,
    stats: Arc<CacheStats>,
    /// Maximum entries (for eviction trigger)
    capacity: usize,
}

impl MemoryImageCache {
    /// Create cache bounded by `capacity` entries and the manager's memory budget.
    pub fn new(capacity: usize, manager: Arc<CacheManager>) -> Self {
        let capacity = capacity.max(1);
        debug!("MemoryImageCache created: capacity={}", capacity);
        Self {
            inner: Mutex::new(Inner {
                images: HashMap::new(),
                lru: IndexSet::with_capacity(capacity.min(4096)),
            }),
            cache_manager: manager,
            stats: Arc::new(CacheStats::new()),
            capacity,
        }
    }

    /// Cache bounded by entry count only.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, Arc::new(CacheManager::with_limit(usize::MAX)))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.cache_manager
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get cache statistics
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Get image from cache
    ///
    /// Updates LRU order on hit (moves to back of queue).
    pub fn get(&self, clip: &ClipId, time: f64) -> Option<Arc<Image>> {
        let key = CacheKey::new(clip, time);
        let mut inner = self.lock();
        let result = inner.lookup(&key).cloned();
        if result.is_some() {
            self.stats.record_hit();
            if inner.lru.shift_remove(&key) {
                inner.lru.insert(key);
            }
        } else {
            self.stats.record_miss();
        }
        result
    }

    /// Check if an image exists (without updating LRU)
    pub fn contains(&self, clip: &ClipId, time: f64) -> bool {
        self.lock().lookup(&CacheKey::new(clip, time)).is_some()
    }

    /// Insert image into cache
    ///
    /// Replaces an existing entry for the same key, then evicts the oldest
    /// entries while over the memory budget or the capacity. All of it
    /// happens under one lock.
    pub fn insert(&self, clip: &ClipId, time: f64, image: Arc<Image>) {
        let size = image.owned_bytes();
        let key = CacheKey::new(clip, time);
        // Dropped after the lock is released
        let mut released = Vec::new();
        {
            let mut inner = self.lock();
            if let Some(old) = inner.take(&key) {
                self.cache_manager.free_memory(old.owned_bytes());
                released.push(old);
            }
            while self.cache_manager.would_exceed(size) || inner.len() >= self.capacity {
                let Some((evicted_key, evicted)) = inner.pop_oldest() else {
                    break;
                };
                let freed = evicted.owned_bytes();
                self.cache_manager.free_memory(freed);
                debug!(
                    "LRU evicted: {}@{} (freed {} bytes)",
                    evicted_key.clip,
                    f64::from_bits(evicted_key.time),
                    freed
                );
                released.push(evicted);
            }
            inner
                .images
                .entry(clip.clone())
                .or_default()
                .insert(key.time, image);
            inner.lru.insert(key);
            self.cache_manager.add_memory(size);
        }
        debug!("Cached image: {}@{} ({} bytes)", clip, time, size);
    }

    /// Remove one entry, returning the cache's handle.
    pub fn remove(&self, clip: &ClipId, time: f64) -> Option<Arc<Image>> {
        let removed = self.lock().take(&CacheKey::new(clip, time))?;
        self.cache_manager.free_memory(removed.owned_bytes());
        Some(removed)
    }

    /// Clear all cached images for one clip - O(1) on the outer map
    pub fn clear_clip(&self, clip: &ClipId) {
        let mut inner = self.lock();
        if let Some(images) = inner.images.remove(clip) {
            let freed: usize = images.values().map(|img| img.owned_bytes()).sum();
            self.cache_manager.free_memory(freed);
            inner.lru.retain(|k| &k.clip != clip);
            debug!("Cleared clip {}: {} images, {} bytes freed", clip, images.len(), freed);
        }
    }

    /// Clear entire cache
    pub fn clear_all(&self) {
        let mut inner = self.lock();
        let freed: usize = inner
            .images
            .values()
            .flat_map(|images| images.values())
            .map(|img| img.owned_bytes())
            .sum();
        self.cache_manager.free_memory(freed);
        inner.images.clear();
        inner.lru.clear();

        debug!("Cleared entire cache");
    }

    /// Get current cache size (total number of images)
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().images.is_empty()
    }

    /// Number of clips with at least one cached image
    pub fn clip_count(&self) -> usize {
        self.lock().images.len()
    }

    /// Number of cached times for one clip
    pub fn clip_entry_count(&self, clip: &ClipId) -> usize {
        self.lock().images.get(clip).map(|images| images.len()).unwrap_or(0)
    }

    /// Host-owned bytes currently cached
    pub fn memory(&self) -> usize {
        self.cache_manager.mem().0
    }
}

impl MemoryCache for MemoryImageCache {
    fn put(&self, clip: &ClipId, time: f64, image: Arc<Image>) {
        self.insert(clip, time, image)
    }

    fn get(&self, clip: &ClipId, time: f64) -> Option<Arc<Image>> {
        MemoryImageCache::get(self, clip, time)
    }

    fn contains(&self, clip: &ClipId, time: f64) -> bool {
        MemoryImageCache::contains(self, clip, time)
    }

    fn remove(&self, clip: &ClipId, time: f64) -> Option<Arc<Image>> {
        MemoryImageCache::remove(self, clip, time)
    }

    fn clear_clip(&self, clip: &ClipId) {
        MemoryImageCache::clear_clip(self, clip)
    }

    fn clear(&self) {
        self.clear_all()
    }

    fn len(&self) -> usize {
        MemoryImageCache::len(self)
    }

    fn stats_snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            size: MemoryImageCache::len(self),
            memory: self.memory(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::image::{ImageLayout, PixelData};
    use crate::entities::region::RectI;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use uuid::Uuid;

    fn make_image(clip: &ClipId, time: f64, w: i32, h: i32) -> Arc<Image> {
        let layout = ImageLayout::default();
        let data = vec![0u8; (w * h) as usize * layout.bytes_per_pixel()];
        Arc::new(Image::new(clip.clone(), time, RectI::new(0, 0, w, h), layout, PixelData::Owned(data)).unwrap())
    }

    #[test]
    fn test_round_trip_keeps_identity() {
        let cache = MemoryImageCache::with_capacity(100);
        let clip = ClipId::output_of(Uuid::new_v4());
        let image = make_image(&clip, 1.0, 8, 8);

        cache.put(&clip, 1.0, Arc::clone(&image));
        let hit = MemoryCache::get(&cache, &clip, 1.0).unwrap();
        assert!(Arc::ptr_eq(&hit, &image));
        assert_eq!(hit.memlen(), image.memlen());
        assert!(MemoryCache::get(&cache, &clip, 2.0).is_none());
        assert!(MemoryCache::get(&cache, &ClipId::output_of(Uuid::new_v4()), 1.0).is_none());
    }

    #[test]
    fn test_put_replaces_and_tracks_memory() {
        let cache = MemoryImageCache::with_capacity(100);
        let clip = ClipId::output_of(Uuid::new_v4());
        cache.put(&clip, 0.0, make_image(&clip, 0.0, 4, 4));
        cache.put(&clip, -0.0, make_image(&clip, 0.0, 2, 2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.memory(), 2 * 2 * 16);
        cache.clear_all();
        assert_eq!(cache.memory(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction_keeps_live_handles() {
        let cache = MemoryImageCache::with_capacity(2);
        let clip = ClipId::output_of(Uuid::new_v4());
        let first = make_image(&clip, 0.0, 2, 2);
        cache.put(&clip, 0.0, Arc::clone(&first));
        cache.put(&clip, 1.0, make_image(&clip, 1.0, 2, 2));

        // Touch 0.0 so 1.0 becomes the oldest
        assert!(MemoryCache::get(&cache, &clip, 0.0).is_some());
        cache.put(&clip, 2.0, make_image(&clip, 2.0, 2, 2));

        assert!(cache.contains(&clip, 0.0));
        assert!(!cache.contains(&clip, 1.0));
        assert!(cache.contains(&clip, 2.0));

        cache.clear_all();
        assert_eq!(first.data().len(), 2 * 2 * 16);
    }

    #[test]
    fn test_memory_budget_evicts_oldest() {
        let manager = Arc::new(CacheManager::with_limit(3 * 64));
        let cache = MemoryImageCache::new(100, manager);
        let clip = ClipId::output_of(Uuid::new_v4());
        for t in 0..4 {
            cache.put(&clip, t as f64, make_image(&clip, t as f64, 2, 2));
        }
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&clip, 0.0));
        assert!(cache.memory() <= 3 * 64);
    }

    #[test]
    fn test_clear_clip_and_statistics() {
        let cache = MemoryImageCache::with_capacity(100);
        let a = ClipId::output_of(Uuid::new_v4());
        let b = ClipId::output_of(Uuid::new_v4());
        for t in 0..5 {
            cache.put(&a, t as f64, make_image(&a, t as f64, 1, 1));
        }
        cache.put(&b, 0.0, make_image(&b, 0.0, 1, 1));
        assert_eq!(cache.clip_entry_count(&a), 5);
        assert_eq!(cache.clip_count(), 2);

        cache.clear_clip(&a);
        assert_eq!(cache.clip_entry_count(&a), 0);
        assert!(cache.contains(&b, 0.0));

        let _ = MemoryCache::get(&cache, &b, 0.0);
        let _ = MemoryCache::get(&cache, &a, 0.0);
        let stats = cache.stats_snapshot();
        assert_eq!((stats.hits, stats.misses, stats.size), (1, 1, 1));
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_concurrent_put_get() {
        let cache = Arc::new(MemoryImageCache::with_capacity(1000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    let clip = ClipId::output_of(Uuid::new_v4());
                    for t in 0..50 {
                        let image = make_image(&clip, t as f64, 1, 1);
                        cache.put(&clip, t as f64, Arc::clone(&image));
                        let hit = MemoryCache::get(&*cache, &clip, t as f64).unwrap();
                        assert!(Arc::ptr_eq(&hit, &image));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 200);
    }

    #[test]
    fn test_replace_is_atomic_for_readers() {
        let cache = Arc::new(MemoryImageCache::with_capacity(1));
        let clip = ClipId::output_of(Uuid::new_v4());
        cache.put(&clip, 1.0, make_image(&clip, 1.0, 1, 1));

        let done = Arc::new(AtomicBool::new(false));
        let reader = {
            let cache = Arc::clone(&cache);
            let clip = clip.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut misses = 0usize;
                while !done.load(Ordering::SeqCst) {
                    if MemoryCache::get(&*cache, &clip, 1.0).is_none() {
                        misses += 1;
                    }
                }
                misses
            })
        };
        for _ in 0..5000 {
            cache.put(&clip, 1.0, make_image(&clip, 1.0, 1, 1));
        }
        done.store(true, Ordering::SeqCst);

        assert_eq!(reader.join().unwrap(), 0);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.memory(), 16);
    }

    #[test]
    fn test_capacity_holds_under_concurrent_writers() {
        let cache = Arc::new(MemoryImageCache::with_capacity(8));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    let clip = ClipId::output_of(Uuid::new_v4());
                    for t in 0..100 {
                        cache.put(&clip, t as f64, make_image(&clip, t as f64, 1, 1));
                        let _ = MemoryCache::get(&*cache, &clip, (t / 2) as f64);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 8);
        assert_eq!(cache.memory(), 8 * 16);
    }
}
