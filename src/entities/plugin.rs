//! Effect plugin protocol, host side.
//!
//! An [`ImageEffect`] is the loaded effect implementation wrapped by an
//! image effect node. Actions return `Ok` on success or a non-OK [`Status`];
//! [`Status::ReplyDefault`] asks the host to apply its default behaviour.
//!
//! Out-parameters (clip preferences, regions of interest) are pre-filled by
//! the host with its defaults; an action that returns `Ok` may edit them in
//! place.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use super::clip::{Attribute, ClipDescriptor, ClipDirection, OutputClip, SourceClip};
use super::image::{Image, ImageLayout};
use super::params::{ChangeReason, Param, ParamDescriptor, ParamSet};
use super::project::ProjectSettings;
use super::region::{PointD, RectD, RectI};
use super::traits::RenderMonitor;
use crate::error::HostResult;

/// Non-OK protocol status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Failed,
    ErrFatal,
    ErrUnknown,
    ErrBadHandle,
    ErrBadIndex,
    ErrValue,
    ErrMemory,
    ErrUnsupported,
    /// Action not implemented, use the host default
    ReplyDefault,
}

pub type StatusResult<T> = Result<T, Status>;

/// Field order of interlaced material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Field {
    #[default]
    None,
    Both,
    Lower,
    Upper,
}

/// Severity of a message posted by an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Fatal,
    Error,
    Warning,
    Message,
    Log,
    /// Yes/no questions are not supported headless; logged and answered `false`
    Question,
}

/// How far the host may parallelise `render` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RenderThreadSafety {
    /// One render at a time, no tiling across threads
    Unsafe,
    InstanceSafe,
    #[default]
    FullySafe,
}

/// Static metadata of an effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectDescriptor {
    pub identifier: String,
    pub label: String,
    pub version: [u32; 3],
    pub clips: Vec<ClipDescriptor>,
    pub params: Vec<ParamDescriptor>,
    pub supports_tiles: bool,
    pub supports_multiple_clip_depths: bool,
    pub thread_safety: RenderThreadSafety,
}

impl EffectDescriptor {
    /// Descriptor with the mandatory output clip and nothing else.
    pub fn new(identifier: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            label: label.into(),
            version: [1, 0, 0],
            clips: vec![ClipDescriptor::output()],
            params: Vec::new(),
            supports_tiles: true,
            supports_multiple_clip_depths: false,
            thread_safety: RenderThreadSafety::FullySafe,
        }
    }

    pub fn version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.version = [major, minor, patch];
        self
    }

    pub fn clip(mut self, clip: ClipDescriptor) -> Self {
        self.clips.push(clip);
        self
    }

    pub fn param(mut self, param: ParamDescriptor) -> Self {
        self.params.push(param);
        self
    }

    pub fn tiles(mut self, supported: bool) -> Self {
        self.supports_tiles = supported;
        self
    }

    pub fn multiple_clip_depths(mut self, supported: bool) -> Self {
        self.supports_multiple_clip_depths = supported;
        self
    }

    pub fn thread_safety(mut self, safety: RenderThreadSafety) -> Self {
        self.thread_safety = safety;
        self
    }

    /// Declared source clip names, in declaration order.
    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.clips
            .iter()
            .filter(|c| c.direction == ClipDirection::Source)
            .map(|c| c.name.as_str())
    }

    /// Effects without source clips generate their image.
    pub fn is_generator(&self) -> bool {
        self.source_names().next().is_none()
    }
}

/// Arguments of begin/end render: the batch of frames about to be rendered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceArgs {
    pub start: f64,
    pub end: f64,
    pub step: f64,
    pub interactive: bool,
    pub render_scale: PointD,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RodArgs {
    pub time: f64,
    pub render_scale: PointD,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiArgs {
    pub time: f64,
    pub render_scale: PointD,
    /// Region of the output that must be rendered
    pub region: RectD,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderArgs {
    pub time: f64,
    pub field: Field,
    pub render_scale: PointD,
    /// Whole pixel window of this render; tiles are sub-windows of it
    pub window: RectI,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceChangedArgs {
    pub param: String,
    pub reason: ChangeReason,
    pub time: f64,
    pub render_scale: PointD,
}

/// Negotiated clip layouts, keyed by clip name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClipPreferences {
    pub layouts: IndexMap<String, ImageLayout>,
    pub output_fielding: Field,
}

/// Destination slice of one render tile: rows `window.y1..window.y2` of the
/// output image, `row_bytes` apart.
pub struct DstTile<'a> {
    pub window: RectI,
    pub layout: ImageLayout,
    pub row_bytes: usize,
    pub data: &'a mut [u8],
}

impl DstTile<'_> {
    /// Mutable bytes of row `y` (absolute pixel coordinate).
    pub fn row_mut(&mut self, y: i32) -> Option<&mut [u8]> {
        if y < self.window.y1 || y >= self.window.y2 {
            return None;
        }
        let start = (y - self.window.y1) as usize * self.row_bytes;
        self.data.get_mut(start..start + self.row_bytes)
    }
}

impl fmt::Debug for DstTile<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DstTile")
            .field("window", &self.window)
            .field("row_bytes", &self.row_bytes)
            .finish()
    }
}

/// Read-only view of the owning node offered to actions.
#[derive(Clone, Copy)]
pub struct EffectContext<'a> {
    pub(crate) name: &'a str,
    pub(crate) params: &'a ParamSet,
    pub(crate) sources: &'a IndexMap<String, SourceClip>,
    pub(crate) output: &'a OutputClip,
    pub(crate) project: &'a ProjectSettings,
    pub(crate) time: f64,
}

impl<'a> EffectContext<'a> {
    pub fn param(&self, name: &str) -> HostResult<&'a Param> {
        self.params.get(name)
    }

    pub fn params(&self) -> &'a ParamSet {
        self.params
    }

    pub fn clip(&self, name: &str) -> Option<Attribute<'a>> {
        if name == self.output.name() {
            return Some(Attribute::Output(self.output));
        }
        self.sources.get(name).map(Attribute::Source)
    }

    pub fn source(&self, name: &str) -> Option<&'a SourceClip> {
        self.sources.get(name)
    }

    /// RoD of the upstream output connected to source `name`.
    pub fn source_rod(&self, name: &str) -> Option<RectD> {
        self.sources.get(name).and_then(|c| c.rod())
    }

    /// Upstream image resolved for the current render.
    pub fn source_image(&self, name: &str) -> Option<&'a Image> {
        self.sources
            .get(name)
            .and_then(|c| c.image())
            .map(|img| img.as_ref())
    }

    pub fn output(&self) -> &'a OutputClip {
        self.output
    }

    pub fn project(&self) -> &'a ProjectSettings {
        self.project
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Name of the node running the effect.
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Post a message to the host log. Returns the answer to a question,
    /// which is always `false`.
    pub fn message(&self, kind: MessageType, id: &str, text: &str) -> bool {
        let node = self.name;
        match kind {
            MessageType::Fatal | MessageType::Error => error!("[{}] {}: {}", node, id, text),
            MessageType::Warning => warn!("[{}] {}: {}", node, id, text),
            MessageType::Message => info!("[{}] {}: {}", node, id, text),
            MessageType::Log => debug!("[{}] {}: {}", node, id, text),
            MessageType::Question => warn!("[{}] {}: {} (unanswered)", node, id, text),
        }
        false
    }
}

/// Context of a render call: node view plus the abort/progress suite.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    pub effect: EffectContext<'a>,
    pub(crate) monitor: &'a dyn RenderMonitor,
}

impl RenderContext<'_> {
    /// True once the caller asked to stop.
    pub fn abort(&self) -> bool {
        self.monitor.abort()
    }

    pub fn progress_start(&self, label: &str) {
        self.monitor.progress_start(label)
    }

    /// False once the host wants the render to stop.
    pub fn progress_update(&self, fraction: f64) -> bool {
        self.monitor.progress_update(fraction)
    }

    pub fn progress_end(&self) {
        self.monitor.progress_end()
    }

    pub fn message(&self, kind: MessageType, id: &str, text: &str) -> bool {
        self.effect.message(kind, id, text)
    }
}

/// A loaded effect instance.
///
/// Default action bodies reply "default", except begin/end render and
/// instance changed which succeed without doing anything.
pub trait ImageEffect: Send + Sync {
    fn describe(&self) -> EffectDescriptor;

    fn box_clone(&self) -> Box<dyn ImageEffect>;

    fn begin_render(&mut self, _args: &SequenceArgs) -> StatusResult<()> {
        Ok(())
    }

    fn end_render(&mut self, _args: &SequenceArgs) -> StatusResult<()> {
        Ok(())
    }

    fn clip_preferences(&self, _ctx: &EffectContext<'_>, _prefs: &mut ClipPreferences) -> StatusResult<()> {
        Err(Status::ReplyDefault)
    }

    fn region_of_definition(&self, _ctx: &EffectContext<'_>, _args: &RodArgs) -> StatusResult<RectD> {
        Err(Status::ReplyDefault)
    }

    fn regions_of_interest(
        &self,
        _ctx: &EffectContext<'_>,
        _args: &RoiArgs,
        _rois: &mut HashMap<String, RectD>,
    ) -> StatusResult<()> {
        Err(Status::ReplyDefault)
    }

    /// Render `dst.window`. Called once per tile, possibly concurrently.
    fn render(&self, ctx: &RenderContext<'_>, args: &RenderArgs, dst: &mut DstTile<'_>) -> StatusResult<()>;

    fn instance_changed(&mut self, _ctx: &EffectContext<'_>, _args: &InstanceChangedArgs) -> StatusResult<()> {
        Ok(())
    }
}

impl Clone for Box<dyn ImageEffect> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}
