//! Cache memory manager.
//!
//! Tracks bytes owned by cached images against a budget derived from the
//! memory available on the machine (or set explicitly). The image cache
//! evicts least recently used entries while the budget would be exceeded.

use log::{debug, info};
use std::sync::atomic::{AtomicUsize, Ordering};
use sysinfo::System;

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Memory budget shared by cache instances.
#[derive(Debug)]
pub struct CacheManager {
    /// Atomically tracked memory usage (bytes)
    memory_usage: AtomicUsize,
    /// Maximum allowed memory (bytes)
    max_memory_bytes: usize,
}

impl CacheManager {
    /// Create cache manager with memory limit
    ///
    /// # Arguments
    ///
    /// * `mem_fraction` - Fraction of available memory (0.0-1.0, e.g. 0.75 = 75%)
    /// * `reserve_gb` - Reserve memory for system (GB, e.g. 2.0 = 2GB)
    pub fn new(mem_fraction: f64, reserve_gb: f64) -> Self {
        let max_memory_bytes = available_budget(mem_fraction, reserve_gb);
        info!(
            "CacheManager init: limit={} MB ({}% of available, {} GB reserved)",
            max_memory_bytes / 1024 / 1024,
            (mem_fraction * 100.0) as u32,
            reserve_gb
        );
        Self::with_limit(max_memory_bytes)
    }

    /// Create cache manager with an absolute limit in bytes.
    pub fn with_limit(max_memory_bytes: usize) -> Self {
        Self {
            memory_usage: AtomicUsize::new(0),
            max_memory_bytes,
        }
    }

    /// Would adding `bytes` exceed the limit?
    pub fn would_exceed(&self, bytes: usize) -> bool {
        self.memory_usage.load(Ordering::Relaxed).saturating_add(bytes) > self.max_memory_bytes
    }

    /// Get memory statistics (usage, limit)
    pub fn mem(&self) -> (usize, usize) {
        (self.memory_usage.load(Ordering::Relaxed), self.max_memory_bytes)
    }

    /// Add memory usage
    pub fn add_memory(&self, bytes: usize) {
        let new_usage = self.memory_usage.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let limit = self.max_memory_bytes;
        if new_usage > limit {
            debug!(
                "Memory limit exceeded: {} MB / {} MB",
                new_usage / 1024 / 1024,
                limit / 1024 / 1024
            );
        }
    }

    /// Free memory usage (saturating subtraction to prevent underflow)
    pub fn free_memory(&self, bytes: usize) {
        let _ = self
            .memory_usage
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| Some(current.saturating_sub(bytes)));
    }
}

/// `mem_fraction` of the memory available after reserving `reserve_gb`.
fn available_budget(mem_fraction: f64, reserve_gb: f64) -> usize {
    let mut sys = System::new();
    sys.refresh_memory();

    let available = sys.available_memory() as usize;
    let reserve = (reserve_gb * GB) as usize;
    let usable = available.saturating_sub(reserve);
    (usable as f64 * mem_fraction.clamp(0.0, 1.0)) as usize
}
