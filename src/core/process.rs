//! Process driver - renders frames of a graph.
//!
//! One frame is three ordered passes over the subgraph feeding the
//! requested outputs:
//! 1. forward: each node sees the RoD and layout of its upstream outputs,
//!    then computes its own RoD (`pre_process_finish`)
//! 2. backward: starting at the outputs, each node receives the union of
//!    what its consumers asked for, clamped to its RoD, and turns it into
//!    RoIs on its own sources (`pre_process_initialize`)
//! 3. process: in dependency order, sources are resolved from the image
//!    their producer holds (the cache when it holds none) and each node
//!    renders its window (`process`, `post_process`)
//!
//! Before the process pass, nodes whose cached image already covers their
//! window at the same render scale and field are reused as is, and nothing
//! upstream of them is rendered unless another consumer needs it. Cached
//! images are dropped when a node turns stale: an evaluating param or the
//! project changed, a buffer was relinked, or its inputs were relinked.
//!
//! `begin` and `end` bracket the whole frame range. Queued parameter
//! changes are delivered before the first frame and between frames.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use indexmap::IndexMap;
use log::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::core::event_bus::EventBus;
use crate::core::graph::Graph;
use crate::entities::clip::ClipId;
use crate::entities::image::Image;
use crate::entities::node::{Node, NodeType, ProcessContext, ProcessInfos, ProcessOptions};
use crate::entities::node_kind::NodeKind;
use crate::entities::params::ParamChangedEvent;
use crate::entities::plugin::Field;
use crate::entities::region::{PointD, RectD};
use crate::entities::traits::{MemoryCache, RenderMonitor};
use crate::error::{HostError, HostResult, Phase};

/// Most frames one render call may cover.
pub const MAX_RANGE_FRAMES: usize = 1_000_000;

/// Per-frame render information.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub time: f64,
    pub infos: IndexMap<Uuid, ProcessInfos>,
}

impl FrameReport {
    /// Estimated bytes for all node outputs of the frame.
    pub fn memory(&self) -> usize {
        self.infos.values().map(|i| i.memory).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderReport {
    pub frames: Vec<FrameReport>,
}

impl RenderReport {
    /// Largest per-frame estimate of the range.
    pub fn peak_memory(&self) -> usize {
        self.frames.iter().map(FrameReport::memory).max().unwrap_or(0)
    }
}

/// How a render ended. Failures are `Err`; a cancelled render is not.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderOutcome {
    Completed(RenderReport),
    Cancelled,
}

impl RenderOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RenderOutcome::Cancelled)
    }

    pub fn report(&self) -> Option<&RenderReport> {
        match self {
            RenderOutcome::Completed(r) => Some(r),
            RenderOutcome::Cancelled => None,
        }
    }
}

pub struct ProcessDriver<'a> {
    cache: &'a dyn MemoryCache,
    monitor: &'a dyn RenderMonitor,
    bus: Option<&'a EventBus>,
    tiles: usize,
    render_scale: PointD,
    interactive: bool,
    field: Field,
}

impl<'a> ProcessDriver<'a> {
    pub fn new(cache: &'a dyn MemoryCache, monitor: &'a dyn RenderMonitor) -> Self {
        Self {
            cache,
            monitor,
            bus: None,
            tiles: 1,
            render_scale: PointD::unit(),
            interactive: false,
            field: Field::None,
        }
    }

    /// Deliver parameter changes queued on `bus` at frame boundaries.
    pub fn with_bus(mut self, bus: &'a EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn tiles(mut self, tiles: usize) -> Self {
        self.tiles = tiles.max(1);
        self
    }

    pub fn render_scale(mut self, scale: PointD) -> Self {
        self.render_scale = scale;
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.field = field;
        self
    }

    pub fn render_frame(&self, graph: &mut Graph, outputs: &[Uuid], time: f64) -> HostResult<RenderOutcome> {
        self.render_range(graph, outputs, time, time, 1.0)
    }

    /// Render `outputs` at every frame of `start..=end`.
    pub fn render_range(
        &self,
        graph: &mut Graph,
        outputs: &[Uuid],
        start: f64,
        end: f64,
        step: f64,
    ) -> HostResult<RenderOutcome> {
        let times = frame_times(start, end, step)?;
        let order = graph.subgraph_order(outputs)?;
        debug!(
            "Rendering {} node(s) over [{}, {}] step {} ({} frame(s))",
            order.len(),
            start,
            end,
            step,
            times.len()
        );

        let base = self.options(start, end, step);
        self.sync(graph)?;
        self.begin_all(graph, &order, &base)?;

        let mut report = RenderReport::default();
        let mut result = Ok(());
        for (i, &time) in times.iter().enumerate() {
            if i > 0
                && let Err(e) = self.sync(graph)
            {
                result = Err(e);
                break;
            }
            if self.monitor.abort() {
                result = Err(HostError::Cancelled);
                break;
            }
            match self.frame(graph, &order, outputs, &base, time, true) {
                Ok(infos) => report.frames.push(FrameReport { time, infos }),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        let ended = self.end_all(graph, &order, &base);
        match result.and(ended) {
            Ok(()) => {
                debug!("Render done: {} frame(s), peak estimate {} bytes", report.frames.len(), report.peak_memory());
                Ok(RenderOutcome::Completed(report))
            }
            Err(e) if e.is_cancelled() => {
                info!("Render cancelled after {} frame(s)", report.frames.len());
                Ok(RenderOutcome::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    /// Run the region passes at `time` without rendering and report the
    /// per-node memory estimates.
    pub fn infos(&self, graph: &mut Graph, outputs: &[Uuid], time: f64) -> HostResult<FrameReport> {
        let order = graph.subgraph_order(outputs)?;
        let base = self.options(time, time, 1.0);
        self.begin_all(graph, &order, &base)?;
        let infos = self.frame(graph, &order, outputs, &base, time, false);
        let ended = self.end_all(graph, &order, &base);
        let infos = infos?;
        ended?;
        Ok(FrameReport { time, infos })
    }

    fn options(&self, start: f64, end: f64, step: f64) -> ProcessOptions {
        ProcessOptions {
            interactive: self.interactive,
            render_scale: self.render_scale,
            field: self.field,
            ..ProcessOptions::range(start, end, step)
        }
    }

    /// Deliver queued parameter changes, then drop the images made stale by
    /// them or by graph edits.
    fn sync(&self, graph: &mut Graph) -> HostResult<()> {
        self.deliver_changes(graph)?;
        for uuid in graph.take_stale() {
            self.invalidate(graph, uuid);
        }
        Ok(())
    }

    fn deliver_changes(&self, graph: &mut Graph) -> HostResult<()> {
        let Some(bus) = self.bus else { return Ok(()) };
        for event in bus.take::<ParamChangedEvent>() {
            match graph.node_mut(event.node) {
                Ok(node) => {
                    trace!("Delivering change of `{}` to `{}`", event.param, node.name());
                    node.instance_changed(&event, self.render_scale)?;
                }
                Err(_) => debug!("Dropping change of `{}` for removed node {}", event.param, event.node),
            }
        }
        Ok(())
    }

    /// Drop the images of `uuid` and of everything downstream of it, cached
    /// or held by output clips. `uuid` may name a removed node.
    fn invalidate(&self, graph: &mut Graph, uuid: Uuid) {
        self.cache.clear_clip(&ClipId::output_of(uuid));
        let mut stack = vec![uuid];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Ok(node) = graph.node_mut(current) {
                trace!("Invalidating `{}`", node.name());
                let output = node.output_clip_mut();
                self.cache.clear_clip(&output.id());
                output.clear_image();
                stack.extend(output.downstream().iter().map(|c| c.node));
            }
        }
    }

    /// Begin every node; on failure, end the ones already begun.
    fn begin_all(&self, graph: &mut Graph, order: &[Uuid], base: &ProcessOptions) -> HostResult<()> {
        for (i, &uuid) in order.iter().enumerate() {
            let node = graph.node_mut(uuid)?;
            if let Err(e) = node.begin(base) {
                let e = failed(node.name(), Phase::Begin, e);
                let _ = self.end_all(graph, &order[..i], base);
                return Err(e);
            }
        }
        Ok(())
    }

    /// End every node, reporting the first failure after trying them all.
    fn end_all(&self, graph: &mut Graph, order: &[Uuid], base: &ProcessOptions) -> HostResult<()> {
        let mut first = None;
        for &uuid in order {
            let res = graph.node_mut(uuid).and_then(|node| {
                node.end(base).map_err(|e| {
                    warn!("`{}` failed to end: {}", node.name(), e);
                    e
                })
            });
            if let Err(e) = res {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    fn frame(
        &self,
        graph: &mut Graph,
        order: &[Uuid],
        outputs: &[Uuid],
        base: &ProcessOptions,
        time: f64,
        render: bool,
    ) -> HostResult<IndexMap<Uuid, ProcessInfos>> {
        trace!("Frame {}: {} node(s)", time, order.len());
        let mut opts = self.forward(graph, order, base, time)?;
        self.backward(graph, order, outputs, &mut opts)?;

        let mut infos = IndexMap::new();
        for &uuid in order {
            if let Some(o) = opts.get(&uuid) {
                infos.insert(uuid, graph.node(uuid)?.pre_process_infos(o));
            }
        }

        if render {
            let ctx = ProcessContext {
                cache: self.cache,
                monitor: self.monitor,
                tiles: self.tiles,
            };
            let plan = self.plan(graph, order, outputs, &opts)?;
            for &uuid in order {
                if self.monitor.abort() {
                    return Err(HostError::Cancelled);
                }
                let (Some(o), Some(reuse)) = (opts.get(&uuid), plan.get(&uuid)) else { continue };
                if let Some(image) = reuse {
                    let node = graph.node_mut(uuid)?;
                    trace!("`{}`: reusing cached image at {}", node.name(), time);
                    node.output_clip_mut().set_image(Arc::clone(image));
                    continue;
                }
                self.resolve_sources(graph, uuid, time)?;
                let node = graph.node_mut(uuid)?;
                node.process(o, &ctx).map_err(|e| failed(node.name(), Phase::Process, e))?;
                node.post_process(o).map_err(|e| failed(node.name(), Phase::PostProcess, e))?;
            }
        }
        Ok(infos)
    }

    /// RoD pass, inputs to outputs.
    fn forward(
        &self,
        graph: &mut Graph,
        order: &[Uuid],
        base: &ProcessOptions,
        time: f64,
    ) -> HostResult<HashMap<Uuid, ProcessOptions>> {
        let mut all = HashMap::new();
        for &uuid in order {
            let inputs = graph.node(uuid)?.inputs();
            for (clip, up) in inputs {
                let Some(up) = up else { continue };
                let producer = graph.node(up.node)?.output_clip();
                let layout = producer.layout();
                let rod = producer.rod().ok_or_else(|| {
                    HostError::connection(format!("upstream of clip `{}` has no region of definition", clip))
                })?;
                if let Some(source) = graph.node_mut(uuid)?.clip_mut(&clip)?.into_source() {
                    source.bind_upstream(rod, layout);
                }
            }

            let mut opts = ProcessOptions { time, ..base.clone() };
            let node = graph.node_mut(uuid)?;
            node.pre_process_finish(&mut opts)
                .map_err(|e| failed(node.name(), Phase::PreProcessFinish, e))?;
            all.insert(uuid, opts);
        }
        Ok(all)
    }

    /// RoI pass, outputs to inputs. A node is visited only after all its
    /// consumers, since the order is reversed.
    fn backward(
        &self,
        graph: &mut Graph,
        order: &[Uuid],
        outputs: &[Uuid],
        all: &mut HashMap<Uuid, ProcessOptions>,
    ) -> HostResult<()> {
        let mut requests: HashMap<Uuid, RectD> = HashMap::new();
        for &uuid in order.iter().rev() {
            let Some(opts) = all.get_mut(&uuid) else { continue };
            let rod = opts.render_roi;
            opts.render_roi = if outputs.contains(&uuid) {
                rod
            } else {
                requests.get(&uuid).map_or(rod, |r| r.intersect(&rod))
            };

            let node = graph.node_mut(uuid)?;
            node.pre_process_initialize(opts)
                .map_err(|e| failed(node.name(), Phase::PreProcessInitialize, e))?;

            for (clip, up) in node.inputs() {
                let (Some(up), Some(roi)) = (up, opts.inputs_roi.get(&clip)) else { continue };
                requests
                    .entry(up.node)
                    .and_modify(|acc| *acc = acc.union(roi))
                    .or_insert(*roi);
            }
        }
        Ok(())
    }

    /// Nodes to visit in the process pass, walking back from the outputs.
    /// A node mapped to an image reuses it; its inputs are needed only if
    /// another rendering consumer asks for them.
    fn plan(
        &self,
        graph: &Graph,
        order: &[Uuid],
        outputs: &[Uuid],
        all: &HashMap<Uuid, ProcessOptions>,
    ) -> HostResult<HashMap<Uuid, Option<Arc<Image>>>> {
        let mut wanted: HashSet<Uuid> = outputs.iter().copied().collect();
        let mut plan = HashMap::new();
        for &uuid in order.iter().rev() {
            let Some(opts) = all.get(&uuid) else { continue };
            if !wanted.contains(&uuid) {
                continue;
            }
            let cached = self.reusable(graph.node(uuid)?, opts)?;
            if cached.is_none() {
                wanted.extend(graph.upstream(uuid)?);
            }
            plan.insert(uuid, cached);
        }
        Ok(plan)
    }

    /// Cached output of `node` if it covers the render window of `opts`.
    /// Buffer nodes always republish.
    fn reusable(&self, node: &NodeKind, opts: &ProcessOptions) -> HostResult<Option<Arc<Image>>> {
        if node.node_type() == NodeType::InputBuffer {
            return Ok(None);
        }
        let output = node.output_clip();
        let id = output.id();
        if !self.cache.contains(&id, opts.time) {
            return Ok(None);
        }
        let window = opts.render_roi.to_pixel_window()?;
        Ok(self.cache.get(&id, opts.time).filter(|image| {
            image.bounds().contains(&window)
                && image.layout() == output.layout()
                && image.render_scale() == opts.render_scale
                && image.field() == opts.field
        }))
    }

    /// Hand each connected source the image its producer holds for `time`,
    /// or the cached one.
    fn resolve_sources(&self, graph: &mut Graph, uuid: Uuid, time: f64) -> HostResult<()> {
        let inputs = graph.node(uuid)?.inputs();
        for (clip, up) in inputs {
            let Some(up) = up else { continue };
            let held = graph
                .node(up.node)?
                .output_image()
                .filter(|image| image.time() == time)
                .cloned();
            let image = held
                .or_else(|| self.cache.get(&up, time))
                .ok_or_else(|| HostError::not_found(format!("image of {} at {}", up, time)))?;
            if let Some(source) = graph.node_mut(uuid)?.clip_mut(&clip)?.into_source() {
                source.set_image(image);
            }
        }
        Ok(())
    }
}

/// Log a phase failure with the node name. Cancellation is not a failure.
fn failed(node: &str, phase: Phase, e: HostError) -> HostError {
    if !e.is_cancelled() && !matches!(e, HostError::Status { .. }) {
        error!("`{}` failed in {}: {}", node, phase, e);
    }
    e
}

/// Frame times of `start..=end` by `step`.
fn frame_times(start: f64, end: f64, step: f64) -> HostResult<Vec<f64>> {
    if !step.is_finite() || step <= 0.0 {
        return Err(HostError::numeric(format!("frame step must be positive, got {}", step)));
    }
    if !start.is_finite() || !end.is_finite() || end < start {
        return Err(HostError::numeric(format!("invalid frame range [{}, {}]", start, end)));
    }
    let span = ((end - start) / step + 1e-9).floor();
    if span + 1.0 > MAX_RANGE_FRAMES as f64 {
        return Err(HostError::numeric(format!(
            "range [{}, {}] by {} exceeds {} frames",
            start, end, step, MAX_RANGE_FRAMES
        )));
    }
    let count = span as usize + 1;
    Ok((0..count).map(|i| start + i as f64 * step).collect())
}
