//! Image buffers published in the memory cache.
//!
//! An [`Image`] is immutable once built. Its pixels are either owned bytes
//! computed by a render, or a linked view over caller-owned memory
//! ([`ExternalBuffer`]) that the cache never copies.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::clip::ClipId;
use super::plugin::Field;
use super::region::{PointD, RectI};
use crate::error::{HostError, HostResult};

/// Pixel components of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Components {
    None,
    Alpha,
    Rgb,
    #[default]
    Rgba,
}

impl Components {
    pub fn count(&self) -> usize {
        match self {
            Components::None => 0,
            Components::Alpha => 1,
            Components::Rgb => 3,
            Components::Rgba => 4,
        }
    }
}

/// Bit depth of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum BitDepth {
    None,
    UByte,
    UShort,
    Half,
    #[default]
    Float,
}

impl BitDepth {
    pub fn bytes(&self) -> usize {
        match self {
            BitDepth::None => 0,
            BitDepth::UByte => 1,
            BitDepth::UShort | BitDepth::Half => 2,
            BitDepth::Float => 4,
        }
    }
}

/// Effective pixel layout of a clip (negotiated through clip preferences).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageLayout {
    pub components: Components,
    pub depth: BitDepth,
    pub pixel_aspect_ratio: f64,
}

impl Default for ImageLayout {
    fn default() -> Self {
        Self {
            components: Components::Rgba,
            depth: BitDepth::Float,
            pixel_aspect_ratio: 1.0,
        }
    }
}

impl ImageLayout {
    pub fn new(components: Components, depth: BitDepth) -> Self {
        Self {
            components,
            depth,
            pixel_aspect_ratio: 1.0,
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.components.count() * self.depth.bytes()
    }
}

/// Caller-owned pixel memory that can be linked into the cache.
pub trait ExternalBuffer: Send + Sync {
    fn as_bytes(&self) -> &[u8];
}

impl<T: bytemuck::Pod + Send + Sync> ExternalBuffer for Vec<T> {
    fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.as_slice())
    }
}

impl<T: bytemuck::Pod + Send + Sync> ExternalBuffer for Box<[T]> {
    fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self)
    }
}

/// Pixel storage of an image.
#[derive(Clone)]
pub enum PixelData {
    /// Bytes computed and owned by the host
    Owned(Vec<u8>),
    /// Externally owned memory; the caller keeps it alive through the `Arc`
    Linked(Arc<dyn ExternalBuffer>),
}

impl PixelData {
    pub fn bytes(&self) -> &[u8] {
        match self {
            PixelData::Owned(v) => v,
            PixelData::Linked(buf) => buf.as_bytes(),
        }
    }

    pub fn is_linked(&self) -> bool {
        matches!(self, PixelData::Linked(_))
    }
}

impl fmt::Debug for PixelData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelData::Owned(v) => write!(f, "Owned({} bytes)", v.len()),
            PixelData::Linked(b) => write!(f, "Linked({} bytes)", b.as_bytes().len()),
        }
    }
}

/// Image produced by a clip at a given time.
#[derive(Debug, Clone)]
pub struct Image {
    clip: ClipId,
    time: f64,
    bounds: RectI,
    layout: ImageLayout,
    data: PixelData,
    /// Render scale and field the pixels were produced at
    render_scale: PointD,
    field: Field,
}

impl Image {
    /// Wrap pixel data covering `bounds`. Fails if the data is shorter than
    /// the layout requires.
    pub fn new(clip: ClipId, time: f64, bounds: RectI, layout: ImageLayout, data: PixelData) -> HostResult<Self> {
        let memlen = bounds.area() * layout.bytes_per_pixel();
        let available = data.bytes().len();
        if available < memlen {
            return Err(HostError::numeric(format!(
                "image for {} needs {} bytes, buffer holds {}",
                clip, memlen, available
            )));
        }
        Ok(Self {
            clip,
            time,
            bounds,
            layout,
            data,
            render_scale: PointD::unit(),
            field: Field::None,
        })
    }

    /// Tag the image with the render scale and field it was produced at.
    pub fn rendered_at(mut self, render_scale: PointD, field: Field) -> Self {
        self.render_scale = render_scale;
        self.field = field;
        self
    }

    pub fn render_scale(&self) -> PointD {
        self.render_scale
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn clip(&self) -> &ClipId {
        &self.clip
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn bounds(&self) -> RectI {
        self.bounds
    }

    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    pub fn row_bytes(&self) -> usize {
        self.bounds.width() * self.layout.bytes_per_pixel()
    }

    /// Reported length in bytes: bounds x bytes per pixel.
    pub fn memlen(&self) -> usize {
        self.bounds.area() * self.layout.bytes_per_pixel()
    }

    /// Pixel bytes, exactly `memlen()` long.
    pub fn data(&self) -> &[u8] {
        &self.data.bytes()[..self.memlen()]
    }

    pub fn is_linked(&self) -> bool {
        self.data.is_linked()
    }

    /// Bytes owned by the host (linked memory is not ours to account for).
    pub fn owned_bytes(&self) -> usize {
        match &self.data {
            PixelData::Owned(v) => v.len(),
            PixelData::Linked(_) => 0,
        }
    }

    /// Bytes of the pixel at `(x, y)` in pixel coordinates.
    pub fn pixel(&self, x: i32, y: i32) -> Option<&[u8]> {
        if !self.bounds.contains_point(x, y) {
            return None;
        }
        let bpp = self.layout.bytes_per_pixel();
        let col = (x - self.bounds.x1) as usize;
        let row = (y - self.bounds.y1) as usize;
        let start = row * self.row_bytes() + col * bpp;
        self.data().get(start..start + bpp)
    }

    /// Row `y` of the image, if inside the bounds.
    pub fn row(&self, y: i32) -> Option<&[u8]> {
        if y < self.bounds.y1 || y >= self.bounds.y2 {
            return None;
        }
        let rb = self.row_bytes();
        let start = (y - self.bounds.y1) as usize * rb;
        self.data().get(start..start + rb)
    }
}
