//! Abstract traits for dependency inversion.
//!
//! These traits define interfaces that `entities` needs from infrastructure,
//! allowing `core` to depend on `entities` (not vice versa).
//!
//! Implementations live in `core/` module, except the trivial monitors.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::clip::ClipId;
use super::image::Image;

/// Simple cache statistics (subset exposed via trait)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
    /// Bytes owned by cached images (linked buffers excluded)
    pub memory: usize,
}

impl CacheStatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

/// Abstract image cache interface.
///
/// Keyed by (clip identity, time). Entries are immutable `Arc<Image>`;
/// eviction drops the cache's reference only, live handles stay valid.
pub trait MemoryCache: Send + Sync {
    /// Insert or replace the entry for `(clip, time)`.
    fn put(&self, clip: &ClipId, time: f64, image: Arc<Image>);

    /// Shared handle on the entry, or None if not published.
    fn get(&self, clip: &ClipId, time: f64) -> Option<Arc<Image>>;

    /// Check presence without touching LRU order or statistics.
    fn contains(&self, clip: &ClipId, time: f64) -> bool;

    fn remove(&self, clip: &ClipId, time: f64) -> Option<Arc<Image>>;

    /// Drop every time of one clip.
    fn clear_clip(&self, clip: &ClipId);

    fn clear(&self);

    /// Number of cached entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats_snapshot(&self) -> CacheStatsSnapshot;
}

/// Abort and progress suite threaded into a render.
///
/// Called from worker threads while tiles render.
pub trait RenderMonitor: Send + Sync {
    /// True once the render should stop.
    fn abort(&self) -> bool;

    fn progress_start(&self, _label: &str) {}

    /// Report completion in `0.0..=1.0`. Returning false requests cancellation.
    fn progress_update(&self, _fraction: f64) -> bool {
        true
    }

    fn progress_end(&self) {}
}

/// Monitor that never aborts and ignores progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMonitor;

impl RenderMonitor for NullMonitor {
    fn abort(&self) -> bool {
        false
    }
}

/// Shared abort switch; clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag {
    flag: Arc<AtomicBool>,
}

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl RenderMonitor for AbortFlag {
    fn abort(&self) -> bool {
        self.is_set()
    }
}

/// Blanket impl: Arc<T> implements traits if T does
impl<T: MemoryCache + ?Sized> MemoryCache for Arc<T> {
    fn put(&self, clip: &ClipId, time: f64, image: Arc<Image>) {
        (**self).put(clip, time, image)
    }

    fn get(&self, clip: &ClipId, time: f64) -> Option<Arc<Image>> {
        (**self).get(clip, time)
    }

    fn contains(&self, clip: &ClipId, time: f64) -> bool {
        (**self).contains(clip, time)
    }

    fn remove(&self, clip: &ClipId, time: f64) -> Option<Arc<Image>> {
        (**self).remove(clip, time)
    }

    fn clear_clip(&self, clip: &ClipId) {
        (**self).clear_clip(clip)
    }

    fn clear(&self) {
        (**self).clear()
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn stats_snapshot(&self) -> CacheStatsSnapshot {
        (**self).stats_snapshot()
    }
}

impl<T: RenderMonitor + ?Sized> RenderMonitor for Arc<T> {
    fn abort(&self) -> bool {
        (**self).abort()
    }

    fn progress_start(&self, label: &str) {
        (**self).progress_start(label)
    }

    fn progress_update(&self, fraction: f64) -> bool {
        (**self).progress_update(fraction)
    }

    fn progress_end(&self) {
        (**self).progress_end()
    }
}
