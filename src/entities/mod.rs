//! Entities module - graph data model and the plugin protocol.
//!
//! - regions, images and clips: what flows along links
//! - params and attrs: what plugins are controlled by
//! - nodes: effect and buffer-input vertices behind one `NodeKind` enum

pub mod attrs;
pub mod buffer_node;
pub mod clip;
pub mod effect_node;
pub mod image;
pub mod keys;
pub mod node;
pub mod node_kind;
pub mod params;
pub mod plugin;
pub mod project;
pub mod region;
pub mod traits;

pub use attrs::{AttrValue, Attrs};
pub use buffer_node::InputBufferNode;
pub use clip::{Attribute, AttributeMut, ClipDescriptor, ClipDirection, ClipId, OutputClip, SourceClip};
pub use effect_node::ImageEffectNode;
pub use image::{BitDepth, Components, ExternalBuffer, Image, ImageLayout, PixelData};
pub use node::{Node, NodeType, ProcessContext, ProcessInfos, ProcessOptions};
pub use node_kind::NodeKind;
pub use params::{ChangeReason, Param, ParamChangedEvent, ParamDescriptor, ParamSet, ParamType};
pub use plugin::{EffectDescriptor, ImageEffect, Status, StatusResult};
pub use project::ProjectSettings;
pub use region::{PointD, RectD, RectI};
pub use traits::{AbortFlag, MemoryCache, NullMonitor, RenderMonitor};
