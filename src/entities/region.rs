//! Rectangles in canonical (f64) and pixel (i32) coordinates.
//!
//! `RectD` carries regions of definition and interest, `RectI` the integer
//! render window handed to the plugin. Rectangles are half-open:
//! `x1 <= x < x2`, `y1 <= y < y2`.

use serde::{Deserialize, Serialize};

use crate::error::{HostError, HostResult};

/// 2D point / scale factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointD {
    pub x: f64,
    pub y: f64,
}

impl PointD {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Render scale 1:1
    pub const fn unit() -> Self {
        Self { x: 1.0, y: 1.0 }
    }
}

impl Default for PointD {
    fn default() -> Self {
        Self::unit()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RectD {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl RectD {
    pub const fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Rectangle rooted at the origin.
    pub const fn from_size(w: f64, h: f64) -> Self {
        Self::new(0.0, 0.0, w, h)
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    /// Intersection; an empty result collapses onto `self.x1, self.y1`.
    pub fn intersect(&self, other: &RectD) -> RectD {
        let r = RectD::new(
            self.x1.max(other.x1),
            self.y1.max(other.y1),
            self.x2.min(other.x2),
            self.y2.min(other.y2),
        );
        if r.is_empty() {
            RectD::new(r.x1, r.y1, r.x1, r.y1)
        } else {
            r
        }
    }

    /// Bounding box of both. Empty operands are ignored.
    pub fn union(&self, other: &RectD) -> RectD {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        RectD::new(
            self.x1.min(other.x1),
            self.y1.min(other.y1),
            self.x2.max(other.x2),
            self.y2.max(other.y2),
        )
    }

    pub fn contains(&self, other: &RectD) -> bool {
        other.x1 >= self.x1 && other.y1 >= self.y1 && other.x2 <= self.x2 && other.y2 <= self.y2
    }

    /// Integer window covering this rectangle: lower bounds floored, upper
    /// bounds ceiled. Fails if a bound is not finite or leaves the i32 range.
    pub fn to_pixel_window(&self) -> HostResult<RectI> {
        Ok(RectI {
            x1: to_i32(self.x1.floor())?,
            y1: to_i32(self.y1.floor())?,
            x2: to_i32(self.x2.ceil())?,
            y2: to_i32(self.y2.ceil())?,
        })
    }
}

fn to_i32(v: f64) -> HostResult<i32> {
    if !v.is_finite() || v < i32::MIN as f64 || v > i32::MAX as f64 {
        return Err(HostError::numeric(format!("{} does not fit a pixel coordinate", v)));
    }
    Ok(v as i32)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RectI {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl RectI {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> usize {
        (self.x2 as i64 - self.x1 as i64).max(0) as usize
    }

    pub fn height(&self) -> usize {
        (self.y2 as i64 - self.y1 as i64).max(0) as usize
    }

    pub fn area(&self) -> usize {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x1 && x < self.x2 && y >= self.y1 && y < self.y2
    }

    /// True if `other` lies inside; an empty `other` always does.
    pub fn contains(&self, other: &RectI) -> bool {
        other.is_empty() || (other.x1 >= self.x1 && other.y1 >= self.y1 && other.x2 <= self.x2 && other.y2 <= self.y2)
    }

    pub fn to_rect_d(&self) -> RectD {
        RectD::new(self.x1 as f64, self.y1 as f64, self.x2 as f64, self.y2 as f64)
    }

    /// Split into at most `count` horizontal strips of whole rows.
    /// Strips are contiguous, non-overlapping and cover the window exactly.
    pub fn row_strips(&self, count: usize) -> Vec<RectI> {
        let h = self.height();
        if h == 0 || self.width() == 0 {
            return Vec::new();
        }
        let rows = rows_per_strip(h, count);
        let mut strips = Vec::with_capacity(h.div_ceil(rows));
        let mut y = self.y1;
        while y < self.y2 {
            let y2 = (y as i64 + rows as i64).min(self.y2 as i64) as i32;
            strips.push(RectI::new(self.x1, y, self.x2, y2));
            y = y2;
        }
        strips
    }
}

/// Rows per strip so that `height` rows split into at most `count` strips.
pub fn rows_per_strip(height: usize, count: usize) -> usize {
    height.div_ceil(count.max(1)).max(1)
}
