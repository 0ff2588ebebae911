//! Host session: configuration, image cache, event bus and abort switch
//! shared by the graphs it creates and renders.

use std::sync::Arc;

use log::info;
use uuid::Uuid;

use crate::config::HostConfig;
use crate::core::event_bus::{EventBus, NodeEventEmitter};
use crate::core::graph::Graph;
use crate::core::memory_cache::MemoryImageCache;
use crate::core::process::{FrameReport, ProcessDriver, RenderOutcome};
use crate::entities::plugin::Field;
use crate::entities::region::PointD;
use crate::entities::traits::AbortFlag;
use crate::error::HostResult;

#[derive(Debug)]
pub struct Host {
    config: HostConfig,
    cache: Arc<MemoryImageCache>,
    bus: EventBus,
    abort: AbortFlag,
    tiles: usize,
}

impl Default for Host {
    fn default() -> Self {
        Self::new(HostConfig::default())
    }
}

impl Host {
    pub fn new(config: HostConfig) -> Self {
        let manager = config.cache_manager();
        let cache = Arc::new(MemoryImageCache::new(config.cache_capacity, manager));
        let tiles = config.resolve_tiles();
        info!(
            "Host ready: cache capacity {}, {} tile(s), project {}x{}",
            config.cache_capacity, tiles, config.project.size.x, config.project.size.y
        );
        Self {
            config,
            cache,
            bus: EventBus::new(),
            abort: AbortFlag::new(),
            tiles,
        }
    }

    /// Empty graph wired to this session: its params report changes on the
    /// session bus and its effects see the configured project.
    pub fn graph(&self) -> Graph {
        let mut graph = Graph::with_emitter(NodeEventEmitter::from_emitter(self.bus.emitter()));
        graph.set_project(self.config.project.clone());
        graph
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<MemoryImageCache> {
        &self.cache
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Switch observed by running renders; clones may be moved to other threads.
    pub fn abort_flag(&self) -> &AbortFlag {
        &self.abort
    }

    pub fn tiles(&self) -> usize {
        self.tiles
    }

    fn driver(&self) -> ProcessDriver<'_> {
        ProcessDriver::new(self.cache.as_ref(), &self.abort)
            .with_bus(&self.bus)
            .tiles(self.tiles)
    }

    pub fn render(&self, graph: &mut Graph, outputs: &[Uuid], time: f64) -> HostResult<RenderOutcome> {
        self.render_range(graph, outputs, time, time, 1.0)
    }

    /// Render a frame range at full scale. A triggered abort flag is
    /// cleared once the render has stopped.
    pub fn render_range(
        &self,
        graph: &mut Graph,
        outputs: &[Uuid],
        start: f64,
        end: f64,
        step: f64,
    ) -> HostResult<RenderOutcome> {
        self.render_with(graph, outputs, start, end, step, PointD::unit(), Field::None)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn render_with(
        &self,
        graph: &mut Graph,
        outputs: &[Uuid],
        start: f64,
        end: f64,
        step: f64,
        render_scale: PointD,
        field: Field,
    ) -> HostResult<RenderOutcome> {
        let outcome = self
            .driver()
            .render_scale(render_scale)
            .field(field)
            .render_range(graph, outputs, start, end, step);
        if matches!(outcome, Ok(RenderOutcome::Cancelled)) {
            self.abort.reset();
        }
        outcome
    }

    /// Memory estimate of rendering `outputs` at `time`.
    pub fn infos(&self, graph: &mut Graph, outputs: &[Uuid], time: f64) -> HostResult<FrameReport> {
        self.driver().infos(graph, outputs, time)
    }
}
