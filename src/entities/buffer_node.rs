//! InputBufferNode - injects caller-owned pixels into the graph.
//!
//! The node runs no plugin action. Its process phase publishes the linked
//! buffer in the cache under its output clip and the requested time, so
//! downstream effects read it as if an upstream effect had rendered it.
//! The bytes are never copied; the caller keeps them alive through the
//! shared handle.

use std::fmt;
use std::sync::Arc;

use log::{debug, trace};
use uuid::Uuid;

use super::clip::{Attribute, AttributeMut, ClipDescriptor, ClipId, OutputClip, SourceClip};
use super::image::{ExternalBuffer, Image, ImageLayout, PixelData};
use super::keys::OUTPUT_CLIP;
use super::node::{Node, NodeType, ProcessContext, ProcessOptions};
use super::params::ParamSet;
use super::region::{RectD, RectI};
use crate::core::event_bus::NodeEventEmitter;
use crate::error::{HostError, HostResult};

/// Caller buffer with its pixel geometry.
#[derive(Clone)]
struct RawBuffer {
    data: Arc<dyn ExternalBuffer>,
    width: i32,
    height: i32,
    layout: ImageLayout,
}

#[derive(Clone)]
pub struct InputBufferNode {
    uuid: Uuid,
    name: String,
    output: OutputClip,
    buffer: Option<RawBuffer>,
    /// Buffer swapped since the last `take_stale`
    stale: bool,
}

impl InputBufferNode {
    pub fn new(name: impl Into<String>) -> Self {
        let uuid = Uuid::new_v4();
        Self {
            uuid,
            name: name.into(),
            output: OutputClip::new(uuid, &ClipDescriptor::output()),
            buffer: None,
            stale: false,
        }
    }

    /// Link `width x height` pixels of `layout` from caller memory.
    /// Fails if the buffer is too short for that geometry.
    pub fn set_raw_buffer(
        &mut self,
        data: Arc<dyn ExternalBuffer>,
        width: i32,
        height: i32,
        layout: ImageLayout,
    ) -> HostResult<()> {
        if width < 0 || height < 0 {
            return Err(HostError::numeric(format!("negative buffer size {}x{}", width, height)));
        }
        let needed = width as usize * height as usize * layout.bytes_per_pixel();
        let available = data.as_bytes().len();
        if available < needed {
            return Err(HostError::numeric(format!(
                "buffer for `{}` holds {} bytes, {}x{} needs {}",
                self.name, available, width, height, needed
            )));
        }
        debug!("InputBufferNode `{}`: linked {}x{} buffer ({} bytes)", self.name, width, height, needed);
        self.buffer = Some(RawBuffer {
            data,
            width,
            height,
            layout,
        });
        self.stale = true;
        Ok(())
    }

    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    fn unsupported(&self, op: impl Into<String>) -> HostError {
        HostError::unsupported(NodeType::InputBuffer.name(), op)
    }

    fn raw(&self) -> HostResult<&RawBuffer> {
        self.buffer
            .as_ref()
            .ok_or_else(|| HostError::not_found(format!("no buffer linked to `{}`", self.name)))
    }
}

impl Node for InputBufferNode {
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
        [1, 0, 0]
    }

    fn node_type(&self) -> NodeType {
        NodeType::InputBuffer
    }

    fn param_set(&self) -> HostResult<&ParamSet> {
        Err(self.unsupported("param_set"))
    }

    fn param_set_mut(&mut self) -> HostResult<&mut ParamSet> {
        Err(self.unsupported("param_set_mut"))
    }

    fn clip(&self, name: &str) -> HostResult<Attribute<'_>> {
        if name == OUTPUT_CLIP {
            Ok(Attribute::Output(&self.output))
        } else {
            Err(self.unsupported(format!("clip `{}`", name)))
        }
    }

    fn clip_mut(&mut self, name: &str) -> HostResult<AttributeMut<'_>> {
        if name == OUTPUT_CLIP {
            Ok(AttributeMut::Output(&mut self.output))
        } else {
            Err(self.unsupported(format!("clip `{}`", name)))
        }
    }

    fn output_clip(&self) -> &OutputClip {
        &self.output
    }

    fn output_clip_mut(&mut self) -> &mut OutputClip {
        &mut self.output
    }

    fn single_input_clip(&self) -> HostResult<&SourceClip> {
        Err(self.unsupported("single_input_clip"))
    }

    fn inputs(&self) -> Vec<(String, Option<ClipId>)> {
        Vec::new()
    }

    fn connect_input(&mut self, clip: &str, _upstream: ClipId) -> HostResult<()> {
        Err(self.unsupported(format!("connect `{}`", clip)))
    }

    fn disconnect_input(&mut self, clip: &str) -> HostResult<Option<ClipId>> {
        Err(self.unsupported(format!("disconnect `{}`", clip)))
    }

    fn attach(&mut self, _emitter: NodeEventEmitter) {}

    fn take_stale(&mut self) -> bool {
        std::mem::take(&mut self.stale)
    }

    fn rekey(&mut self, uuid: Uuid) {
        self.uuid = uuid;
        self.output.set_owner(uuid);
        self.output.clear_image();
    }

    fn begin(&mut self, _opts: &ProcessOptions) -> HostResult<()> {
        Ok(())
    }

    fn pre_process_finish(&mut self, opts: &mut ProcessOptions) -> HostResult<()> {
        let raw = self.raw()?;
        let rod = RectD::from_size(raw.width as f64, raw.height as f64);
        let layout = raw.layout;
        self.output.set_layout(layout);
        self.output.set_rod(rod);
        opts.render_roi = rod;
        opts.inputs_roi.clear();
        trace!("{} `{}`: rod {:?}", NodeType::InputBuffer, self.name, rod);
        Ok(())
    }

    fn pre_process_initialize(&mut self, _opts: &mut ProcessOptions) -> HostResult<()> {
        Ok(())
    }

    /// Publish the whole buffer; the requested RoI only narrows what readers use.
    fn process(&mut self, opts: &ProcessOptions, ctx: &ProcessContext<'_>) -> HostResult<()> {
        let raw = self.raw()?;
        let id = self.output.id();
        let image = Image::new(
            id.clone(),
            opts.time,
            RectI::new(0, 0, raw.width, raw.height),
            raw.layout,
            PixelData::Linked(Arc::clone(&raw.data)),
        )?;
        let image = Arc::new(image);
        ctx.cache.put(&id, opts.time, Arc::clone(&image));
        self.output.set_image(image);
        trace!("{} `{}`: published at {}", NodeType::InputBuffer, self.name, opts.time);
        Ok(())
    }

    fn end(&mut self, _opts: &ProcessOptions) -> HostResult<()> {
        Ok(())
    }
}

impl fmt::Debug for InputBufferNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let geometry = self.buffer.as_ref().map(|b| (b.width, b.height));
        f.debug_struct("InputBufferNode")
            .field("uuid", &self.uuid)
            .field("name", &self.name)
            .field("buffer", &geometry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory_cache::MemoryImageCache;
    use crate::entities::traits::{MemoryCache, NullMonitor};

    #[test]
    fn injects_buffer_without_copy() {
        let pixels: Arc<Vec<f32>> = Arc::new(vec![0.0; 100 * 100 * 4]);
        let ptr = pixels.as_ptr() as *const u8;
        let mut node = InputBufferNode::new("plate");
        node.set_raw_buffer(pixels.clone(), 100, 100, ImageLayout::default()).unwrap();

        let cache = MemoryImageCache::with_capacity(8);
        let mut opts = ProcessOptions::at_time(1.0);
        node.begin(&opts).unwrap();
        node.pre_process_finish(&mut opts).unwrap();
        node.pre_process_initialize(&mut opts).unwrap();
        let ctx = ProcessContext {
            cache: &cache,
            monitor: &NullMonitor,
            tiles: 1,
        };
        node.process(&opts, &ctx).unwrap();

        let entry = cache.get(&ClipId::output_of(node.uuid()), 1.0).unwrap();
        assert_eq!(entry.memlen(), 100 * 100 * 4 * std::mem::size_of::<f32>());
        assert_eq!(entry.data().as_ptr(), ptr);
        assert_eq!(cache.stats_snapshot().memory, 0);
    }

    #[test]
    fn only_output_clip_is_reachable() {
        let mut node = InputBufferNode::new("plate");
        assert!(node.clip(OUTPUT_CLIP).is_ok());
        assert!(matches!(node.clip("Source"), Err(HostError::Unsupported { .. })));
        assert!(matches!(node.param_set(), Err(HostError::Unsupported { .. })));
        assert!(node.single_input_clip().is_err());
        assert!(node.connect_input("Source", ClipId::output_of(Uuid::new_v4())).is_err());
        assert!(node.inputs().is_empty());
    }

    #[test]
    fn short_or_missing_buffer_is_rejected() {
        let mut node = InputBufferNode::new("plate");
        let mut opts = ProcessOptions::at_time(0.0);
        assert!(matches!(node.pre_process_finish(&mut opts), Err(HostError::NotFound(_))));
        let small: Arc<Vec<u8>> = Arc::new(vec![0; 10]);
        assert!(node.set_raw_buffer(small, 4, 4, ImageLayout::default()).is_err());
        assert!(!node.has_buffer());
        assert!(!node.take_stale());
    }

    #[test]
    fn linking_a_buffer_marks_stale_once() {
        let mut node = InputBufferNode::new("plate");
        let pixels: Arc<Vec<f32>> = Arc::new(vec![0.0; 4 * 4 * 4]);
        node.set_raw_buffer(pixels, 4, 4, ImageLayout::default()).unwrap();
        assert!(node.take_stale());
        assert!(!node.take_stale());
    }
}
