//! Node trait - base interface for all node kinds of a render graph.
//!
//! Nodes are the vertices of the graph:
//! - ImageEffectNode: wraps a loaded effect and runs the render protocol
//! - InputBufferNode: injects caller-owned pixels into the cache
//!
//! Every node owns one output clip named `Output`. Rendering a frame drives
//! each node through the phases, in this order:
//!
//! `begin → pre_process_finish → pre_process_initialize → process →
//! post_process → end`
//!
//! `pre_process_finish` is the forward pass (RoD from inputs to output),
//! `pre_process_initialize` the backward pass (RoI from output to inputs).
//! Cross-node state (upstream RoD, requested RoI, resolved source images)
//! is bound by the process driver between phases.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use enum_dispatch::enum_dispatch;
use uuid::Uuid;

use super::clip::{Attribute, AttributeMut, ClipId, OutputClip, SourceClip};
use super::image::Image;
use super::keys::ESTIMATE_BYTES_PER_PIXEL;
use super::params::{ParamChangedEvent, ParamSet};
use super::plugin::{Field, SequenceArgs};
use super::region::{PointD, RectD};
use super::traits::{MemoryCache, RenderMonitor};
use crate::core::event_bus::NodeEventEmitter;
use crate::error::HostResult;

/// Node kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    ImageEffect,
    InputBuffer,
}

impl NodeType {
    pub fn name(&self) -> &'static str {
        match self {
            NodeType::ImageEffect => "image effect",
            NodeType::InputBuffer => "input buffer",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-frame options threaded through the traversal, one copy per node.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOptions {
    pub start_frame: f64,
    pub end_frame: f64,
    pub step: f64,
    pub interactive: bool,
    pub render_scale: PointD,
    pub time: f64,
    pub field: Field,
    /// Region of the output to compute; RoD after `pre_process_finish`,
    /// narrowed by the driver to what consumers need
    pub render_roi: RectD,
    /// RoI per source clip, filled by `pre_process_initialize`
    pub inputs_roi: HashMap<String, RectD>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            start_frame: 0.0,
            end_frame: 0.0,
            step: 1.0,
            interactive: false,
            render_scale: PointD::unit(),
            time: 0.0,
            field: Field::None,
            render_roi: RectD::default(),
            inputs_roi: HashMap::new(),
        }
    }
}

impl ProcessOptions {
    /// Options for a single frame at `time`.
    pub fn at_time(time: f64) -> Self {
        Self {
            start_frame: time,
            end_frame: time,
            time,
            ..Self::default()
        }
    }

    /// Options for the batch `start..=end`, current time at `start`.
    pub fn range(start: f64, end: f64, step: f64) -> Self {
        Self {
            start_frame: start,
            end_frame: end,
            step,
            time: start,
            ..Self::default()
        }
    }

    pub fn sequence_args(&self) -> SequenceArgs {
        SequenceArgs {
            start: self.start_frame,
            end: self.end_frame,
            step: self.step,
            interactive: self.interactive,
            render_scale: self.render_scale,
        }
    }
}

/// Derived per-node render information.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProcessInfos {
    pub rod: RectD,
    /// Estimated bytes for the node output at full RoD
    pub memory: usize,
}

impl ProcessInfos {
    pub fn from_rod(rod: RectD) -> Self {
        Self {
            rod,
            memory: (rod.area() as usize).saturating_mul(ESTIMATE_BYTES_PER_PIXEL),
        }
    }
}

/// Resources a node may use while processing.
pub struct ProcessContext<'a> {
    pub cache: &'a dyn MemoryCache,
    pub monitor: &'a dyn RenderMonitor,
    /// Upper bound on render tiles; 1 disables tiling
    pub tiles: usize,
}

/// Base trait for all node kinds.
#[enum_dispatch]
pub trait Node: Send + Sync {
    /// Unique identifier for this node
    fn uuid(&self) -> Uuid;

    /// Display name, unique within a graph
    fn name(&self) -> &str;

    fn set_name(&mut self, name: &str);

    fn version(&self) -> [u32; 3];

    fn node_type(&self) -> NodeType;

    fn param_set(&self) -> HostResult<&ParamSet>;

    fn param_set_mut(&mut self) -> HostResult<&mut ParamSet>;

    /// Clip of either direction by name.
    fn clip(&self, name: &str) -> HostResult<Attribute<'_>>;

    fn clip_mut(&mut self, name: &str) -> HostResult<AttributeMut<'_>>;

    fn output_clip(&self) -> &OutputClip;

    fn output_clip_mut(&mut self) -> &mut OutputClip;

    /// The input used when a connection names no clip: the only source, or
    /// `Source` among several, or the first declared.
    fn single_input_clip(&self) -> HostResult<&SourceClip>;

    /// Source clip names with their upstream link, in declaration order.
    fn inputs(&self) -> Vec<(String, Option<ClipId>)>;

    /// Link source `clip` to an upstream output.
    fn connect_input(&mut self, clip: &str, upstream: ClipId) -> HostResult<()>;

    fn disconnect_input(&mut self, clip: &str) -> HostResult<Option<ClipId>>;

    /// Route change notifications of this node to `emitter`.
    fn attach(&mut self, emitter: NodeEventEmitter);

    /// Take a new identity; links are dropped.
    fn rekey(&mut self, uuid: Uuid);

    fn begin(&mut self, opts: &ProcessOptions) -> HostResult<()>;

    /// Forward pass: validate links, negotiate layouts, compute RoD.
    fn pre_process_finish(&mut self, opts: &mut ProcessOptions) -> HostResult<()>;

    /// Backward pass: propagate layouts to sources, compute RoIs.
    fn pre_process_initialize(&mut self, opts: &mut ProcessOptions) -> HostResult<()>;

    fn pre_process_infos(&self, _opts: &ProcessOptions) -> ProcessInfos {
        ProcessInfos::from_rod(self.region_of_definition().unwrap_or_default())
    }

    fn process(&mut self, opts: &ProcessOptions, ctx: &ProcessContext<'_>) -> HostResult<()>;

    fn post_process(&mut self, _opts: &ProcessOptions) -> HostResult<()> {
        Ok(())
    }

    fn end(&mut self, opts: &ProcessOptions) -> HostResult<()>;

    /// Deliver a queued parameter change.
    fn instance_changed(&mut self, _event: &ParamChangedEvent, _render_scale: PointD) -> HostResult<()> {
        Ok(())
    }

    /// True once if something affecting the rendered pixels changed since the
    /// last call (evaluating params, project, linked buffer).
    fn take_stale(&mut self) -> bool {
        false
    }

    /// RoD computed by the last `pre_process_finish`.
    fn region_of_definition(&self) -> Option<RectD> {
        self.output_clip().rod()
    }

    /// Image produced by the last `process`.
    fn output_image(&self) -> Option<&Arc<Image>> {
        self.output_clip().image()
    }
}
