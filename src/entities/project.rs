//! Project-wide settings seen by every effect of a graph.

use serde::{Deserialize, Serialize};

use super::image::{BitDepth, Components};
use super::region::{PointD, RectD};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    /// Project size in canonical coordinates
    pub size: PointD,
    pub offset: PointD,
    /// Full extent; normally `offset + size`
    pub extent: PointD,
    pub pixel_aspect_ratio: f64,
    pub frame_rate: f64,
    /// Duration in frames
    pub duration: f64,
    pub bit_depth: BitDepth,
    pub components: Components,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            size: PointD::new(1920.0, 1080.0),
            offset: PointD::new(0.0, 0.0),
            extent: PointD::new(1920.0, 1080.0),
            pixel_aspect_ratio: 1.0,
            frame_rate: 25.0,
            duration: 1.0,
            bit_depth: BitDepth::Float,
            components: Components::Rgba,
        }
    }
}

impl ProjectSettings {
    /// Project with the given size, extent following it.
    pub fn with_size(w: f64, h: f64) -> Self {
        Self {
            size: PointD::new(w, h),
            extent: PointD::new(w, h),
            ..Self::default()
        }
    }

    /// Rectangle `(0, 0) .. extent`, the RoD of generators by default.
    pub fn extent_rect(&self) -> RectD {
        RectD::from_size(self.extent.x, self.extent.y)
    }

    /// Inclusive frame bounds of the project timeline.
    pub fn time_bounds(&self) -> (f64, f64) {
        (0.0, (self.duration - 1.0).max(0.0))
    }
}
