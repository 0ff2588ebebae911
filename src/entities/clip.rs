//! Clips: named, directional image connection points of a node.
//!
//! A clip owns no pixels. Source clips link to one upstream output clip and
//! carry, during a render, the upstream RoD and their own RoI. Output clips
//! list their downstream consumers and keep a handle on the image they
//! produced for the current time.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::image::{Image, ImageLayout};
use super::keys::OUTPUT_CLIP;
use super::region::RectD;

/// Cache identity of a clip: owning node + clip name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClipId {
    pub node: Uuid,
    pub clip: String,
}

impl ClipId {
    pub fn new(node: Uuid, clip: impl Into<String>) -> Self {
        Self {
            node,
            clip: clip.into(),
        }
    }

    pub fn output_of(node: Uuid) -> Self {
        Self::new(node, OUTPUT_CLIP)
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.clip)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClipDirection {
    Source,
    Output,
}

/// Static clip metadata from the effect descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipDescriptor {
    pub name: String,
    pub direction: ClipDirection,
    pub optional: bool,
    pub supports_tiles: bool,
}

impl ClipDescriptor {
    pub fn source(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            direction: ClipDirection::Source,
            optional: false,
            supports_tiles: true,
        }
    }

    pub fn output() -> Self {
        Self {
            name: OUTPUT_CLIP.to_string(),
            direction: ClipDirection::Output,
            optional: false,
            supports_tiles: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// Input connection point.
#[derive(Debug, Clone)]
pub struct SourceClip {
    name: String,
    owner: Uuid,
    optional: bool,
    layout: ImageLayout,
    upstream: Option<ClipId>,
    /// RoD of the connected output at the current time
    rod: Option<RectD>,
    /// Region requested from upstream at the current time
    roi: Option<RectD>,
    /// Upstream image resolved for the current render
    image: Option<Arc<Image>>,
}

impl SourceClip {
    pub fn new(owner: Uuid, desc: &ClipDescriptor) -> Self {
        Self {
            name: desc.name.clone(),
            owner,
            optional: desc.optional,
            layout: ImageLayout::default(),
            upstream: None,
            rod: None,
            roi: None,
            image: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    pub fn id(&self) -> ClipId {
        ClipId::new(self.owner, self.name.as_str())
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    pub fn set_layout(&mut self, layout: ImageLayout) {
        self.layout = layout;
    }

    pub fn is_connected(&self) -> bool {
        self.upstream.is_some()
    }

    pub fn upstream(&self) -> Option<&ClipId> {
        self.upstream.as_ref()
    }

    pub fn connect(&mut self, upstream: ClipId) {
        self.upstream = Some(upstream);
    }

    pub fn disconnect(&mut self) -> Option<ClipId> {
        self.rod = None;
        self.roi = None;
        self.image = None;
        self.upstream.take()
    }

    /// Resolve the upstream extent and layout for the current time.
    pub fn bind_upstream(&mut self, rod: RectD, layout: ImageLayout) {
        self.rod = Some(rod);
        self.layout = layout;
    }

    pub fn rod(&self) -> Option<RectD> {
        self.rod
    }

    pub fn roi(&self) -> Option<RectD> {
        self.roi
    }

    pub fn set_roi(&mut self, roi: RectD) {
        self.roi = Some(roi);
    }

    pub fn image(&self) -> Option<&Arc<Image>> {
        self.image.as_ref()
    }

    pub fn set_image(&mut self, image: Arc<Image>) {
        self.image = Some(image);
    }

    pub fn release_image(&mut self) {
        self.image = None;
    }

    pub(crate) fn set_owner(&mut self, owner: Uuid) {
        self.owner = owner;
    }
}

/// Output connection point.
#[derive(Debug, Clone)]
pub struct OutputClip {
    name: String,
    owner: Uuid,
    layout: ImageLayout,
    downstream: Vec<ClipId>,
    rod: Option<RectD>,
    image: Option<Arc<Image>>,
}

impl OutputClip {
    pub fn new(owner: Uuid, desc: &ClipDescriptor) -> Self {
        Self {
            name: desc.name.clone(),
            owner,
            layout: ImageLayout::default(),
            downstream: Vec::new(),
            rod: None,
            image: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    pub fn id(&self) -> ClipId {
        ClipId::new(self.owner, self.name.as_str())
    }

    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    pub fn downstream(&self) -> &[ClipId] {
        &self.downstream
    }

    pub fn add_downstream(&mut self, consumer: ClipId) {
        if !self.downstream.contains(&consumer) {
            self.downstream.push(consumer);
        }
    }

    pub fn remove_downstream(&mut self, consumer: &ClipId) {
        self.downstream.retain(|c| c != consumer);
    }

    pub fn rod(&self) -> Option<RectD> {
        self.rod
    }

    pub fn set_rod(&mut self, rod: RectD) {
        self.rod = Some(rod);
    }

    pub fn set_layout(&mut self, layout: ImageLayout) {
        self.layout = layout;
    }

    /// Image computed for the current time.
    pub fn image(&self) -> Option<&Arc<Image>> {
        self.image.as_ref()
    }

    pub fn set_image(&mut self, image: Arc<Image>) {
        self.image = Some(image);
    }

    pub fn clear_image(&mut self) {
        self.image = None;
    }

    pub(crate) fn set_owner(&mut self, owner: Uuid) {
        self.owner = owner;
        self.downstream.clear();
    }
}

/// Borrowed view of a clip of either direction.
#[derive(Debug, Clone, Copy)]
pub enum Attribute<'a> {
    Source(&'a SourceClip),
    Output(&'a OutputClip),
}

impl<'a> Attribute<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            Attribute::Source(c) => &c.name,
            Attribute::Output(c) => &c.name,
        }
    }

    pub fn owner(&self) -> Uuid {
        match self {
            Attribute::Source(c) => c.owner,
            Attribute::Output(c) => c.owner,
        }
    }

    pub fn id(&self) -> ClipId {
        ClipId::new(self.owner(), self.name())
    }

    pub fn direction(&self) -> ClipDirection {
        match self {
            Attribute::Source(_) => ClipDirection::Source,
            Attribute::Output(_) => ClipDirection::Output,
        }
    }

    pub fn layout(&self) -> ImageLayout {
        match self {
            Attribute::Source(c) => c.layout,
            Attribute::Output(c) => c.layout,
        }
    }

    /// RoD at the current time, once resolved.
    pub fn rod(&self) -> Option<RectD> {
        match self {
            Attribute::Source(c) => c.rod,
            Attribute::Output(c) => c.rod,
        }
    }

    pub fn as_source(&self) -> Option<&'a SourceClip> {
        match self {
            Attribute::Source(c) => Some(c),
            Attribute::Output(_) => None,
        }
    }

    pub fn as_output(&self) -> Option<&'a OutputClip> {
        match self {
            Attribute::Output(c) => Some(c),
            Attribute::Source(_) => None,
        }
    }
}

/// Mutable view of a clip of either direction.
#[derive(Debug)]
pub enum AttributeMut<'a> {
    Source(&'a mut SourceClip),
    Output(&'a mut OutputClip),
}

impl<'a> AttributeMut<'a> {
    pub fn direction(&self) -> ClipDirection {
        match self {
            AttributeMut::Source(_) => ClipDirection::Source,
            AttributeMut::Output(_) => ClipDirection::Output,
        }
    }

    pub fn set_layout(&mut self, layout: ImageLayout) {
        match self {
            AttributeMut::Source(c) => c.layout = layout,
            AttributeMut::Output(c) => c.layout = layout,
        }
    }

    pub fn into_source(self) -> Option<&'a mut SourceClip> {
        match self {
            AttributeMut::Source(c) => Some(c),
            AttributeMut::Output(_) => None,
        }
    }

    pub fn into_output(self) -> Option<&'a mut OutputClip> {
        match self {
            AttributeMut::Output(c) => Some(c),
            AttributeMut::Source(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::image::{BitDepth, Components};

    #[test]
    fn clip_id_display_and_output_helper() {
        let node = Uuid::new_v4();
        let id = ClipId::output_of(node);
        assert_eq!(id.clip, "Output");
        assert_eq!(id.to_string(), format!("{}.Output", node));
    }

    #[test]
    fn attribute_views_expose_their_own_ops() {
        let node = Uuid::new_v4();
        let mut src = SourceClip::new(node, &ClipDescriptor::source("Source"));
        let out = OutputClip::new(node, &ClipDescriptor::output());
        assert_eq!(Attribute::Source(&src).direction(), ClipDirection::Source);
        assert_eq!(Attribute::Output(&out).direction(), ClipDirection::Output);
        assert!(Attribute::Source(&src).as_output().is_none());
        assert_eq!(Attribute::Output(&out).id(), ClipId::output_of(node));

        let upstream = ClipId::output_of(Uuid::new_v4());
        assert!(!src.is_connected());
        src.connect(upstream.clone());
        assert_eq!(src.upstream(), Some(&upstream));
        src.bind_upstream(RectD::from_size(4.0, 4.0), ImageLayout::new(Components::Alpha, BitDepth::UByte));
        let view = Attribute::Source(&src);
        assert_eq!(view.rod(), Some(RectD::from_size(4.0, 4.0)));
        assert_eq!(view.layout().components, Components::Alpha);

        let mut m = AttributeMut::Source(&mut src);
        m.set_layout(ImageLayout::default());
        let s = m.into_source().unwrap();
        assert_eq!(s.layout(), ImageLayout::default());
        assert_eq!(s.disconnect(), Some(upstream));
        assert!(s.rod().is_none());
    }

    #[test]
    fn downstream_links_are_unique() {
        let mut out = OutputClip::new(Uuid::new_v4(), &ClipDescriptor::output());
        let consumer = ClipId::new(Uuid::new_v4(), "Source");
        out.add_downstream(consumer.clone());
        out.add_downstream(consumer.clone());
        assert_eq!(out.downstream().len(), 1);
        out.remove_downstream(&consumer);
        assert!(out.downstream().is_empty());
    }
}
