//! ImageEffectNode - graph node wrapping a loaded effect instance.
//!
//! Implements the render phases on top of the [`ImageEffect`] actions and
//! supplies the host defaults when an action replies "default":
//! - clip preferences: output takes the deepest source depth and the
//!   components of the single input (project settings for generators)
//! - region of definition: union of connected source RoDs, project extent
//!   for generators
//! - regions of interest: the render RoI for every connected source
//!
//! Rendering splits the pixel window into row strips. Strips run on the
//! rayon pool unless the effect declares itself thread unsafe, and each
//! strip checks the abort flag before it starts.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use log::{debug, error, trace};
use rayon::prelude::*;
use uuid::Uuid;

use super::clip::{Attribute, AttributeMut, ClipDirection, ClipId, OutputClip, SourceClip};
use super::image::{BitDepth, Image, ImageLayout, PixelData};
use super::keys::{OUTPUT_CLIP, SIMPLE_SOURCE_CLIP};
use super::node::{Node, NodeType, ProcessContext, ProcessOptions};
use super::params::{ParamChangedEvent, ParamSet};
use super::plugin::{
    ClipPreferences, DstTile, EffectContext, EffectDescriptor, Field, ImageEffect, InstanceChangedArgs,
    RenderArgs, RenderContext, RenderThreadSafety, RodArgs, RoiArgs, Status, StatusResult,
};
use super::project::ProjectSettings;
use super::region::{PointD, RectD, RectI, rows_per_strip};
use crate::core::event_bus::NodeEventEmitter;
use crate::error::{HostError, HostResult, Phase};

/// Why a strip stopped.
enum TileStop {
    Cancelled,
    Status(Status),
}

#[derive(Clone)]
pub struct ImageEffectNode {
    uuid: Uuid,
    name: String,
    descriptor: EffectDescriptor,
    effect: Box<dyn ImageEffect>,
    params: ParamSet,
    sources: IndexMap<String, SourceClip>,
    output: OutputClip,
    project: ProjectSettings,
    emitter: NodeEventEmitter,
    /// Current time, set by `pre_process_finish` or the timeline suite
    time: f64,
    output_fielding: Field,
    /// Range set by the effect; project bounds when unset
    effect_frame_range: Option<(f64, f64)>,
    /// Project changed since the last `take_stale`
    stale: bool,
}

impl ImageEffectNode {
    /// Instantiate an effect from its own descriptor.
    ///
    /// The descriptor must declare exactly one output clip, named `Output`,
    /// and unique clip names.
    pub fn new(effect: Box<dyn ImageEffect>) -> HostResult<Self> {
        let descriptor = effect.describe();
        let uuid = Uuid::new_v4();

        let mut output = None;
        let mut sources = IndexMap::new();
        for desc in &descriptor.clips {
            match desc.direction {
                ClipDirection::Output => {
                    if desc.name != OUTPUT_CLIP || output.is_some() {
                        return Err(HostError::unsupported(
                            NodeType::ImageEffect.name(),
                            format!("output clip `{}` in `{}`", desc.name, descriptor.identifier),
                        ));
                    }
                    output = Some(OutputClip::new(uuid, desc));
                }
                ClipDirection::Source => {
                    if desc.name == OUTPUT_CLIP || sources.contains_key(&desc.name) {
                        return Err(HostError::connection(format!(
                            "duplicate clip `{}` in `{}`",
                            desc.name, descriptor.identifier
                        )));
                    }
                    sources.insert(desc.name.clone(), SourceClip::new(uuid, desc));
                }
            }
        }
        let output = output.ok_or_else(|| {
            HostError::connection(format!("`{}` declares no output clip", descriptor.identifier))
        })?;
        let params = ParamSet::from_descriptors(uuid, &descriptor.params)?;

        debug!(
            "ImageEffectNode created: {} v{}.{}.{} ({} sources, {} params)",
            descriptor.identifier,
            descriptor.version[0],
            descriptor.version[1],
            descriptor.version[2],
            sources.len(),
            params.len()
        );

        Ok(Self {
            uuid,
            name: descriptor.label.clone(),
            descriptor,
            effect,
            params,
            sources,
            output,
            project: ProjectSettings::default(),
            emitter: NodeEventEmitter::dummy(),
            time: 0.0,
            output_fielding: Field::None,
            effect_frame_range: None,
            stale: false,
        })
    }

    pub fn with_project(mut self, project: ProjectSettings) -> Self {
        self.project = project;
        self
    }

    pub fn set_project(&mut self, project: ProjectSettings) {
        self.project = project;
        self.stale = true;
    }

    pub fn descriptor(&self) -> &EffectDescriptor {
        &self.descriptor
    }

    pub fn plugin_id(&self) -> &str {
        &self.descriptor.identifier
    }

    pub fn effect(&self) -> &dyn ImageEffect {
        self.effect.as_ref()
    }

    pub fn source_clips(&self) -> impl Iterator<Item = &SourceClip> {
        self.sources.values()
    }

    // === Timeline suite ===

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn goto_time(&mut self, time: f64) {
        self.time = time;
    }

    pub fn time_bounds(&self) -> (f64, f64) {
        self.project.time_bounds()
    }

    // === Project queries ===

    pub fn project(&self) -> &ProjectSettings {
        &self.project
    }

    pub fn project_size(&self) -> PointD {
        self.project.size
    }

    pub fn project_offset(&self) -> PointD {
        self.project.offset
    }

    pub fn project_extent(&self) -> PointD {
        self.project.extent
    }

    pub fn project_pixel_aspect_ratio(&self) -> f64 {
        self.project.pixel_aspect_ratio
    }

    pub fn frame_rate(&self) -> f64 {
        self.project.frame_rate
    }

    pub fn duration(&self) -> f64 {
        self.project.duration
    }

    /// Frame range over which the effect can produce images.
    pub fn effect_frame_range(&self) -> (f64, f64) {
        self.effect_frame_range.unwrap_or_else(|| self.project.time_bounds())
    }

    /// Narrow or widen the frame range reported for this effect.
    pub fn set_effect_frame_range(&mut self, begin: f64, end: f64) -> HostResult<()> {
        if !begin.is_finite() || !end.is_finite() || end < begin {
            return Err(HostError::numeric(format!(
                "node `{}`: invalid frame range [{}, {}]",
                self.name, begin, end
            )));
        }
        self.effect_frame_range = Some((begin, end));
        Ok(())
    }

    /// Fielding negotiated by the last clip preferences.
    pub fn output_fielding(&self) -> Field {
        self.output_fielding
    }

    fn status_error(&self, phase: Phase, action: &'static str, status: Status) -> HostError {
        error!("{} `{}` {}: {} returned {:?}", NodeType::ImageEffect, self.name, phase, action, status);
        HostError::Status {
            node: self.name.clone(),
            phase,
            action,
            status,
        }
    }

    /// `Some` on success, `None` when the effect asked for the host default.
    fn reply<T>(&self, phase: Phase, action: &'static str, res: StatusResult<T>) -> HostResult<Option<T>> {
        match res {
            Ok(v) => Ok(Some(v)),
            Err(Status::ReplyDefault) => Ok(None),
            Err(status) => Err(self.status_error(phase, action, status)),
        }
    }

    fn check_connections(&self) -> HostResult<()> {
        for clip in self.sources.values() {
            if !clip.is_optional() && !clip.is_connected() {
                return Err(HostError::connection(format!(
                    "node `{}`: mandatory clip `{}` is not connected",
                    self.name,
                    clip.name()
                )));
            }
        }
        Ok(())
    }

    /// Host clip preferences, propagated from reads to writes.
    fn default_clip_preferences(&self) -> ClipPreferences {
        let project_layout = ImageLayout {
            components: self.project.components,
            depth: self.project.bit_depth,
            pixel_aspect_ratio: self.project.pixel_aspect_ratio,
        };
        let mut layouts = IndexMap::new();
        let mut deepest: Option<BitDepth> = None;
        for clip in self.sources.values() {
            let layout = if clip.is_connected() { clip.layout() } else { project_layout };
            if clip.is_connected() {
                deepest = Some(deepest.map_or(layout.depth, |d| d.max(layout.depth)));
            }
            layouts.insert(clip.name().to_string(), layout);
        }

        let mut output = match self.single_input_clip() {
            Ok(clip) if clip.is_connected() => clip.layout(),
            _ => project_layout,
        };
        if let Some(depth) = deepest {
            output.depth = depth;
        }
        layouts.insert(OUTPUT_CLIP.to_string(), output);

        ClipPreferences {
            layouts,
            output_fielding: Field::None,
        }
    }

    /// Union of connected source RoDs, or the project extent.
    fn default_region_of_definition(&self) -> RectD {
        self.sources
            .values()
            .filter(|c| c.is_connected())
            .filter_map(|c| c.rod())
            .reduce(|acc, r| acc.union(&r))
            .unwrap_or_else(|| self.project.extent_rect())
    }

    fn render_tiles(
        &self,
        window: RectI,
        layout: ImageLayout,
        data: &mut [u8],
        opts: &ProcessOptions,
        ctx: &ProcessContext<'_>,
    ) -> Result<(), TileStop> {
        let row_bytes = window.width() * layout.bytes_per_pixel();
        let height = window.height();
        if row_bytes == 0 || height == 0 {
            return Ok(());
        }

        let tiles = if self.descriptor.supports_tiles { ctx.tiles.max(1) } else { 1 };
        let rows = rows_per_strip(height, tiles);
        let total = height.div_ceil(rows);
        let done = AtomicUsize::new(0);

        let rctx = RenderContext {
            effect: context(&self.name, &self.params, &self.sources, &self.output, &self.project, self.time),
            monitor: ctx.monitor,
        };
        let args = RenderArgs {
            time: opts.time,
            field: opts.field,
            render_scale: opts.render_scale,
            window,
        };
        let effect = self.effect.as_ref();

        let render_strip = |(i, chunk): (usize, &mut [u8])| -> Result<(), TileStop> {
            if ctx.monitor.abort() {
                return Err(TileStop::Cancelled);
            }
            let y1 = window.y1 + (i * rows) as i32;
            let y2 = y1 + (chunk.len() / row_bytes) as i32;
            let mut tile = DstTile {
                window: RectI::new(window.x1, y1, window.x2, y2),
                layout,
                row_bytes,
                data: chunk,
            };
            effect.render(&rctx, &args, &mut tile).map_err(TileStop::Status)?;

            let finished = done.fetch_add(1, Ordering::SeqCst) + 1;
            trace!("{}: tile {}/{} rows {}..{}", self.name, finished, total, y1, y2);
            if !ctx.monitor.progress_update(finished as f64 / total as f64) {
                return Err(TileStop::Cancelled);
            }
            Ok(())
        };

        if self.descriptor.thread_safety == RenderThreadSafety::Unsafe || total == 1 {
            data.chunks_mut(rows * row_bytes).enumerate().try_for_each(render_strip)
        } else {
            data.par_chunks_mut(rows * row_bytes).enumerate().try_for_each(render_strip)
        }
    }
}

/// Effect view built from disjoint node fields, so the effect itself can be
/// borrowed mutably alongside.
fn context<'a>(
    name: &'a str,
    params: &'a ParamSet,
    sources: &'a IndexMap<String, SourceClip>,
    output: &'a OutputClip,
    project: &'a ProjectSettings,
    time: f64,
) -> EffectContext<'a> {
    EffectContext {
        name,
        params,
        sources,
        output,
        project,
        time,
    }
}

impl Node for ImageEffectNode {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    fn version(&self) -> [u32; 3] {
        self.descriptor.version
    }

    fn node_type(&self) -> NodeType {
        NodeType::ImageEffect
    }

    fn param_set(&self) -> HostResult<&ParamSet> {
        Ok(&self.params)
    }

    fn param_set_mut(&mut self) -> HostResult<&mut ParamSet> {
        Ok(&mut self.params)
    }

    fn clip(&self, name: &str) -> HostResult<Attribute<'_>> {
        if name == OUTPUT_CLIP {
            return Ok(Attribute::Output(&self.output));
        }
        self.sources
            .get(name)
            .map(Attribute::Source)
            .ok_or_else(|| HostError::not_found(format!("clip `{}` on node `{}`", name, self.name)))
    }

    fn clip_mut(&mut self, name: &str) -> HostResult<AttributeMut<'_>> {
        if name == OUTPUT_CLIP {
            return Ok(AttributeMut::Output(&mut self.output));
        }
        match self.sources.get_mut(name) {
            Some(clip) => Ok(AttributeMut::Source(clip)),
            None => Err(HostError::not_found(format!("clip `{}` on node `{}`", name, self.name))),
        }
    }

    fn output_clip(&self) -> &OutputClip {
        &self.output
    }

    fn output_clip_mut(&mut self) -> &mut OutputClip {
        &mut self.output
    }

    fn single_input_clip(&self) -> HostResult<&SourceClip> {
        self.sources
            .get(SIMPLE_SOURCE_CLIP)
            .or_else(|| self.sources.first().map(|(_, clip)| clip))
            .ok_or_else(|| HostError::connection(format!("node `{}` has no input clip", self.name)))
    }

    fn inputs(&self) -> Vec<(String, Option<ClipId>)> {
        self.sources
            .values()
            .map(|c| (c.name().to_string(), c.upstream().cloned()))
            .collect()
    }

    fn connect_input(&mut self, clip: &str, upstream: ClipId) -> HostResult<()> {
        if upstream.node == self.uuid {
            return Err(HostError::connection(format!("node `{}` cannot feed itself", self.name)));
        }
        let name = self.name.clone();
        let source = self
            .sources
            .get_mut(clip)
            .ok_or_else(|| HostError::connection(format!("node `{}` has no input clip `{}`", name, clip)))?;
        source.connect(upstream);
        Ok(())
    }

    fn disconnect_input(&mut self, clip: &str) -> HostResult<Option<ClipId>> {
        let name = self.name.clone();
        let source = self
            .sources
            .get_mut(clip)
            .ok_or_else(|| HostError::not_found(format!("clip `{}` on node `{}`", clip, name)))?;
        Ok(source.disconnect())
    }

    fn attach(&mut self, emitter: NodeEventEmitter) {
        self.params.attach(self.uuid, emitter.clone());
        self.emitter = emitter;
    }

    fn rekey(&mut self, uuid: Uuid) {
        self.uuid = uuid;
        self.output.set_owner(uuid);
        self.output.clear_image();
        for clip in self.sources.values_mut() {
            clip.set_owner(uuid);
            clip.disconnect();
        }
        self.params.attach(uuid, self.emitter.clone());
    }

    fn begin(&mut self, opts: &ProcessOptions) -> HostResult<()> {
        trace!("{} `{}`: begin [{}, {}]", NodeType::ImageEffect, self.name, opts.start_frame, opts.end_frame);
        let res = self.effect.begin_render(&opts.sequence_args());
        self.reply(Phase::Begin, "begin_render", res)?;
        Ok(())
    }

    fn pre_process_finish(&mut self, opts: &mut ProcessOptions) -> HostResult<()> {
        trace!("{} `{}`: preProcess_finish at {}", NodeType::ImageEffect, self.name, opts.time);
        self.time = opts.time;
        self.check_connections()?;

        // Clip preferences, then reads -> writes
        let defaults = self.default_clip_preferences();
        let mut prefs = defaults.clone();
        let ctx = context(&self.name, &self.params, &self.sources, &self.output, &self.project, self.time);
        let res = self.effect.clip_preferences(&ctx, &mut prefs);
        let prefs = match self.reply(Phase::PreProcessFinish, "clip_preferences", res)? {
            Some(()) => prefs,
            None => defaults,
        };
        for (name, clip) in self.sources.iter_mut() {
            if let Some(layout) = prefs.layouts.get(name) {
                clip.set_layout(*layout);
            }
        }
        if let Some(layout) = prefs.layouts.get(OUTPUT_CLIP) {
            self.output.set_layout(*layout);
        }
        self.output_fielding = prefs.output_fielding;

        // Region of definition
        let args = RodArgs {
            time: opts.time,
            render_scale: opts.render_scale,
        };
        let ctx = context(&self.name, &self.params, &self.sources, &self.output, &self.project, self.time);
        let res = self.effect.region_of_definition(&ctx, &args);
        let rod = match self.reply(Phase::PreProcessFinish, "region_of_definition", res)? {
            Some(rod) => rod,
            None => self.default_region_of_definition(),
        };

        self.output.set_rod(rod);
        opts.render_roi = rod;
        opts.inputs_roi.clear();
        trace!("{} `{}`: rod {:?}", NodeType::ImageEffect, self.name, rod);
        Ok(())
    }

    fn pre_process_initialize(&mut self, opts: &mut ProcessOptions) -> HostResult<()> {
        trace!(
            "{} `{}`: preProcess_initialize roi {:?}",
            NodeType::ImageEffect,
            self.name,
            opts.render_roi
        );

        // Writes -> reads
        if !self.descriptor.supports_multiple_clip_depths {
            let depth = self.output.layout().depth;
            for clip in self.sources.values_mut() {
                let mut layout = clip.layout();
                layout.depth = depth;
                clip.set_layout(layout);
            }
        }

        // Regions of interest
        let defaults: HashMap<String, RectD> = self
            .sources
            .values()
            .filter(|c| c.is_connected())
            .map(|c| (c.name().to_string(), opts.render_roi))
            .collect();
        let mut rois = defaults.clone();
        let args = RoiArgs {
            time: opts.time,
            render_scale: opts.render_scale,
            region: opts.render_roi,
        };
        let ctx = context(&self.name, &self.params, &self.sources, &self.output, &self.project, self.time);
        let res = self.effect.regions_of_interest(&ctx, &args, &mut rois);
        let rois = match self.reply(Phase::PreProcessInitialize, "regions_of_interest", res)? {
            Some(()) => rois,
            None => defaults,
        };

        opts.inputs_roi.clear();
        for clip in self.sources.values_mut().filter(|c| c.is_connected()) {
            let requested = rois.get(clip.name()).copied().unwrap_or(opts.render_roi);
            let roi = match clip.rod() {
                Some(rod) => requested.intersect(&rod),
                None => requested,
            };
            clip.set_roi(roi);
            opts.inputs_roi.insert(clip.name().to_string(), roi);
        }
        Ok(())
    }

    fn process(&mut self, opts: &ProcessOptions, ctx: &ProcessContext<'_>) -> HostResult<()> {
        let window = opts.render_roi.to_pixel_window()?;
        let layout = self.output.layout();
        trace!("{} `{}`: process window {:?} at {}", NodeType::ImageEffect, self.name, window, opts.time);

        let mut data = vec![0u8; window.area() * layout.bytes_per_pixel()];
        ctx.monitor.progress_start(&self.name);
        let res = self.render_tiles(window, layout, &mut data, opts, ctx);
        ctx.monitor.progress_end();

        match res {
            Ok(()) => {}
            Err(TileStop::Cancelled) => {
                debug!("{} `{}`: render cancelled", NodeType::ImageEffect, self.name);
                return Err(HostError::Cancelled);
            }
            Err(TileStop::Status(status)) => {
                return Err(self.status_error(Phase::Process, "render", status));
            }
        }

        let id = self.output.id();
        let image = Image::new(id.clone(), opts.time, window, layout, PixelData::Owned(data))?
            .rendered_at(opts.render_scale, opts.field);
        let image = Arc::new(image);
        ctx.cache.put(&id, opts.time, Arc::clone(&image));
        self.output.set_image(image);
        Ok(())
    }

    fn post_process(&mut self, _opts: &ProcessOptions) -> HostResult<()> {
        for clip in self.sources.values_mut() {
            clip.release_image();
        }
        Ok(())
    }

    fn end(&mut self, opts: &ProcessOptions) -> HostResult<()> {
        trace!("{} `{}`: end", NodeType::ImageEffect, self.name);
        let res = self.effect.end_render(&opts.sequence_args());
        self.reply(Phase::End, "end_render", res)?;
        Ok(())
    }

    fn instance_changed(&mut self, event: &ParamChangedEvent, render_scale: PointD) -> HostResult<()> {
        let args = InstanceChangedArgs {
            param: event.param.clone(),
            reason: event.reason,
            time: event.time.unwrap_or(self.time),
            render_scale,
        };
        let ctx = context(&self.name, &self.params, &self.sources, &self.output, &self.project, self.time);
        let res = self.effect.instance_changed(&ctx, &args);
        self.reply(Phase::InstanceChanged, "instance_changed", res)?;
        Ok(())
    }

    fn take_stale(&mut self) -> bool {
        let params = self.params.take_dirty();
        std::mem::take(&mut self.stale) || params
    }
}

/// Same plugin and same parameter values.
impl PartialEq for ImageEffectNode {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor.identifier == other.descriptor.identifier && self.params.values() == other.params.values()
    }
}

impl fmt::Debug for ImageEffectNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageEffectNode")
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("plugin", &self.descriptor.identifier)
            .field("time", &self.time)
            .finish()
    }
}

impl fmt::Display for ImageEffectNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [major, minor, patch] = self.descriptor.version;
        writeln!(f, "{} ({} v{}.{}.{})", self.name, self.descriptor.identifier, major, minor, patch)?;
        for clip in self.sources.values() {
            match clip.upstream() {
                Some(up) => writeln!(f, "  clip {} <- {}", clip.name(), up)?,
                None => writeln!(f, "  clip {} (unconnected)", clip.name())?,
            }
        }
        for (name, value) in self.params.values() {
            writeln!(f, "  param {} = {:?}", name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory_cache::MemoryImageCache;
    use crate::entities::image::Components;
    use crate::entities::plugin::MessageType;
    use crate::entities::traits::{AbortFlag, MemoryCache, NullMonitor};
    use crate::test_support::{
        AbortingEffect, ClipsEffect, ConstantEffect, FailingEffect, GrowRoiEffect, read_rgba,
    };

    fn bind_source(node: &mut ImageEffectNode, clip: &str, rod: RectD) {
        let upstream = ClipId::output_of(Uuid::new_v4());
        node.connect_input(clip, upstream).unwrap();
        let src = node.clip_mut(clip).unwrap().into_source().unwrap();
        src.bind_upstream(rod, ImageLayout::default());
    }

    #[test]
    fn single_input_prefers_simple_source() {
        let node = ImageEffectNode::new(Box::new(ClipsEffect::new(&["A", "B", "Source"]))).unwrap();
        assert_eq!(node.single_input_clip().unwrap().name(), "Source");

        let node = ImageEffectNode::new(Box::new(ClipsEffect::new(&["A", "B"]))).unwrap();
        assert_eq!(node.single_input_clip().unwrap().name(), "A");

        let node = ImageEffectNode::new(Box::new(ClipsEffect::new(&["Mask"]))).unwrap();
        assert_eq!(node.single_input_clip().unwrap().name(), "Mask");

        let node = ImageEffectNode::new(Box::new(ClipsEffect::new(&[]))).unwrap();
        assert!(matches!(node.single_input_clip(), Err(HostError::Connection(_))));
    }

    #[test]
    fn unconnected_mandatory_clip_fails_finish() {
        let mut node = ImageEffectNode::new(Box::new(ClipsEffect::new(&["Source"]))).unwrap();
        let mut opts = ProcessOptions::at_time(0.0);
        let err = node.pre_process_finish(&mut opts).unwrap_err();
        assert!(matches!(err, HostError::Connection(_)));
    }

    #[test]
    fn default_rod_is_union_of_sources() {
        let mut node = ImageEffectNode::new(Box::new(ClipsEffect::new(&["A", "B"]))).unwrap();
        bind_source(&mut node, "A", RectD::new(0.0, 0.0, 10.0, 10.0));
        bind_source(&mut node, "B", RectD::new(5.0, -5.0, 20.0, 8.0));
        let mut opts = ProcessOptions::at_time(2.0);
        node.pre_process_finish(&mut opts).unwrap();
        let rod = RectD::new(0.0, -5.0, 20.0, 10.0);
        assert_eq!(node.region_of_definition(), Some(rod));
        assert_eq!(opts.render_roi, rod);
        assert_eq!(node.time(), 2.0);
    }

    #[test]
    fn generator_rod_defaults_to_project_extent() {
        let mut node = ImageEffectNode::new(Box::new(ConstantEffect::new(0.5)))
            .unwrap()
            .with_project(ProjectSettings::with_size(32.0, 16.0));
        let mut opts = ProcessOptions::at_time(0.0);
        node.pre_process_finish(&mut opts).unwrap();
        assert_eq!(node.region_of_definition(), Some(RectD::from_size(32.0, 16.0)));
    }

    #[test]
    fn rois_are_clamped_to_source_rod() {
        let mut node = ImageEffectNode::new(Box::new(GrowRoiEffect::new(4.0))).unwrap();
        let rod = RectD::from_size(16.0, 16.0);
        bind_source(&mut node, "Source", rod);
        let mut opts = ProcessOptions::at_time(0.0);
        node.pre_process_finish(&mut opts).unwrap();
        node.pre_process_initialize(&mut opts).unwrap();
        let roi = opts.inputs_roi["Source"];
        assert_eq!(roi, rod);
        assert!(rod.contains(&roi));

        opts.render_roi = RectD::new(6.0, 6.0, 8.0, 8.0);
        node.pre_process_initialize(&mut opts).unwrap();
        assert_eq!(opts.inputs_roi["Source"], RectD::new(2.0, 2.0, 12.0, 12.0));
    }

    #[test]
    fn output_takes_deepest_source_depth() {
        let mut node = ImageEffectNode::new(Box::new(ClipsEffect::new(&["A", "B"]))).unwrap();
        for (clip, depth) in [("A", BitDepth::UByte), ("B", BitDepth::UShort)] {
            node.connect_input(clip, ClipId::output_of(Uuid::new_v4())).unwrap();
            let src = node.clip_mut(clip).unwrap().into_source().unwrap();
            src.bind_upstream(RectD::from_size(4.0, 4.0), ImageLayout::new(Components::Rgb, depth));
        }
        let mut opts = ProcessOptions::at_time(0.0);
        node.pre_process_finish(&mut opts).unwrap();
        assert_eq!(node.output_clip().layout().depth, BitDepth::UShort);

        node.pre_process_initialize(&mut opts).unwrap();
        for clip in node.source_clips() {
            assert_eq!(clip.layout().depth, BitDepth::UShort);
        }
    }

    #[test]
    fn process_publishes_full_window() {
        let cache = MemoryImageCache::with_capacity(16);
        let mut node = ImageEffectNode::new(Box::new(ConstantEffect::new(0.25)))
            .unwrap()
            .with_project(ProjectSettings::with_size(8.0, 6.0));
        let mut opts = ProcessOptions::at_time(1.0);
        node.pre_process_finish(&mut opts).unwrap();
        node.pre_process_initialize(&mut opts).unwrap();
        opts.render_roi = RectD::new(0.5, 0.2, 7.5, 5.9);
        let ctx = ProcessContext {
            cache: &cache,
            monitor: &NullMonitor,
            tiles: 3,
        };
        node.process(&opts, &ctx).unwrap();

        let image = cache.get(&ClipId::output_of(node.uuid()), 1.0).unwrap();
        assert_eq!(image.bounds(), RectI::new(0, 0, 8, 6));
        assert!(Arc::ptr_eq(&image, node.output_image().unwrap()));
        for y in 0..6 {
            for x in 0..8 {
                assert_eq!(read_rgba(&image, x, y), [0.25; 4]);
            }
        }
    }

    #[test]
    fn abort_stops_before_all_tiles() {
        let flag = AbortFlag::new();
        let effect = AbortingEffect::new(flag.clone(), 2);
        let rendered = effect.rendered();
        let cache = MemoryImageCache::with_capacity(16);
        let mut node = ImageEffectNode::new(Box::new(effect))
            .unwrap()
            .with_project(ProjectSettings::with_size(4.0, 8.0));
        let mut opts = ProcessOptions::at_time(0.0);
        node.pre_process_finish(&mut opts).unwrap();
        node.pre_process_initialize(&mut opts).unwrap();
        let ctx = ProcessContext {
            cache: &cache,
            monitor: &flag,
            tiles: 8,
        };
        let err = node.process(&opts, &ctx).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(rendered.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
        assert!(node.output_image().is_none());
    }

    #[test]
    fn failing_render_reports_node_and_phase() {
        let cache = MemoryImageCache::with_capacity(16);
        let mut node = ImageEffectNode::new(Box::new(FailingEffect)).unwrap();
        node.set_name("broken");
        let mut opts = ProcessOptions::at_time(0.0);
        node.pre_process_finish(&mut opts).unwrap();
        let ctx = ProcessContext {
            cache: &cache,
            monitor: &NullMonitor,
            tiles: 1,
        };
        match node.process(&opts, &ctx).unwrap_err() {
            HostError::Status { node, phase, status, .. } => {
                assert_eq!(node, "broken");
                assert_eq!(phase, Phase::Process);
                assert_eq!(status, Status::Failed);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn clones_are_equal_until_params_diverge() {
        let node = ImageEffectNode::new(Box::new(ConstantEffect::new(0.5))).unwrap();
        let mut copy = node.clone();
        assert_eq!(node, copy);
        copy.param_set_mut()
            .unwrap()
            .get_mut("value")
            .unwrap()
            .as_double_mut()
            .unwrap()
            .set(0.75, crate::entities::params::ChangeReason::PluginEdited);
        assert_ne!(node, copy);
        assert!(node.to_string().contains("param value"));
    }

    #[test]
    fn effect_frame_range_defaults_to_project() {
        let mut project = ProjectSettings::with_size(8.0, 8.0);
        project.duration = 48.0;
        let mut node = ImageEffectNode::new(Box::new(ConstantEffect::new(0.5)))
            .unwrap()
            .with_project(project.clone());
        assert_eq!(node.effect_frame_range(), project.time_bounds());

        node.set_effect_frame_range(10.0, 20.0).unwrap();
        assert_eq!(node.effect_frame_range(), (10.0, 20.0));
        assert!(matches!(node.set_effect_frame_range(5.0, 4.0), Err(HostError::Numeric(_))));
        assert!(matches!(node.set_effect_frame_range(f64::NAN, 4.0), Err(HostError::Numeric(_))));
        assert_eq!(node.effect_frame_range(), (10.0, 20.0));
    }

    #[test]
    fn messages_go_to_the_log_unanswered() {
        let mut node = ImageEffectNode::new(Box::new(ConstantEffect::new(0.5))).unwrap();
        node.set_name("grade");
        let ctx = context(&node.name, &node.params, &node.sources, &node.output, &node.project, node.time);
        assert_eq!(ctx.name(), "grade");
        for kind in [
            MessageType::Fatal,
            MessageType::Error,
            MessageType::Warning,
            MessageType::Message,
            MessageType::Log,
            MessageType::Question,
        ] {
            assert!(!ctx.message(kind, "net.fx.constant", "hello"));
        }
        let rctx = RenderContext {
            effect: ctx,
            monitor: &NullMonitor,
        };
        assert!(!rctx.message(MessageType::Question, "net.fx.constant", "overwrite?"));
    }

    #[test]
    fn project_and_evaluating_params_mark_stale() {
        let mut node = ImageEffectNode::new(Box::new(ConstantEffect::new(0.5))).unwrap();
        assert!(!node.take_stale());

        node.set_project(ProjectSettings::with_size(4.0, 4.0));
        assert!(node.take_stale());
        assert!(!node.take_stale());

        node.param_set_mut()
            .unwrap()
            .get_mut("value")
            .unwrap()
            .as_double_mut()
            .unwrap()
            .set(0.75, crate::entities::params::ChangeReason::UserEdited);
        assert!(node.take_stale());
        assert!(!node.take_stale());
    }

    #[test]
    fn output_image_records_render_scale() {
        let cache = MemoryImageCache::with_capacity(4);
        let mut node = ImageEffectNode::new(Box::new(ConstantEffect::new(0.5)))
            .unwrap()
            .with_project(ProjectSettings::with_size(4.0, 4.0));
        let mut opts = ProcessOptions::at_time(0.0);
        opts.render_scale = PointD::new(0.5, 0.5);
        opts.field = Field::Lower;
        node.pre_process_finish(&mut opts).unwrap();
        node.pre_process_initialize(&mut opts).unwrap();
        let ctx = ProcessContext {
            cache: &cache,
            monitor: &NullMonitor,
            tiles: 1,
        };
        node.process(&opts, &ctx).unwrap();
        let image = node.output_image().unwrap();
        assert_eq!(image.render_scale(), PointD::new(0.5, 0.5));
        assert_eq!(image.field(), Field::Lower);
    }

    #[test]
    fn rekey_drops_links() {
        let mut node = ImageEffectNode::new(Box::new(ClipsEffect::new(&["Source"]))).unwrap();
        node.connect_input("Source", ClipId::output_of(Uuid::new_v4())).unwrap();
        let fresh = Uuid::new_v4();
        node.rekey(fresh);
        assert_eq!(node.output_clip().id(), ClipId::output_of(fresh));
        assert!(node.inputs().iter().all(|(_, up)| up.is_none()));
    }
}
