//! Core engine modules - cache, events, graph and the render driver.

pub mod cache_man;
pub mod event_bus;
pub mod graph;
pub mod host;
pub mod memory_cache;
pub mod process;

// Re-exports for convenience
pub use cache_man::CacheManager;
pub use event_bus::{EventBus, EventEmitter, NodeEventEmitter};
pub use graph::Graph;
pub use host::Host;
pub use memory_cache::{CacheStats, MemoryImageCache};
pub use process::{FrameReport, ProcessDriver, RenderOutcome, RenderReport};
