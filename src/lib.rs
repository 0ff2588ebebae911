//! fxgraph - render-graph host runtime for image effect plugins.
//!
//! A [`Graph`] of effect and buffer-input nodes is rendered frame by frame
//! by a [`ProcessDriver`]: regions of definition flow forward, regions of
//! interest flow backward, and rendered images are shared through a
//! [`MemoryImageCache`] owned by the [`Host`] session.

// Core engine (cache, events, graph, driver)
pub mod core;

pub mod config;
pub mod entities;
pub mod error;
pub mod logging;

#[cfg(test)]
mod test_support;

// Re-export commonly used types from core
pub use core::cache_man::CacheManager;
pub use core::event_bus::{EventBus, EventEmitter, NodeEventEmitter};
pub use core::graph::Graph;
pub use core::host::Host;
pub use core::memory_cache::MemoryImageCache;
pub use core::process::{FrameReport, ProcessDriver, RenderOutcome, RenderReport};

// Re-export entities
pub use config::HostConfig;
pub use entities::{
    AttrValue, Attrs, EffectDescriptor, ImageEffect, ImageEffectNode, InputBufferNode, Node, NodeKind, ProjectSettings,
    RectD, RectI, Status,
};
pub use error::{HostError, HostResult};
