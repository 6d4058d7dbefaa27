//! Axis-aligned rectangle helpers
//!
//! Intersection, area and overlap metrics used by deduplication and the
//! confirmation reticle. Degenerate rectangles have zero area and never overlap.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Square of half-side `radius` centred on `(cx, cy)`
    pub fn centered(cx: f32, cy: f32, radius: f32) -> Self {
        Self::new(cx - radius, cy - radius, cx + radius, cy + radius)
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// True when the rectangle encloses no area (inverted or edge-only)
    pub fn is_empty(&self) -> bool {
        !(self.left < self.right && self.top < self.bottom)
    }

    /// Area, zero for empty rectangles
    pub fn area(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.width() * self.height()
        }
    }

    /// Intersection with another rectangle, `None` when it has no area
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if self.is_empty() || other.is_empty() {
            return None;
        }

        let rect = Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );

        if rect.is_empty() {
            None
        } else {
            Some(rect)
        }
    }

    /// True when both rectangles share a region of positive area
    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersection(other).is_some()
    }

    /// Intersection area divided by union area
    pub fn intersection_over_union(&self, other: &Rect) -> f32 {
        let Some(intersection) = self.intersection(other) else {
            return 0.0;
        };

        let intersection_area = intersection.area();
        let union_area = self.area() + other.area() - intersection_area;
        if union_area <= 0.0 {
            return 0.0;
        }

        intersection_area / union_area
    }

    /// Intersection area as a fraction of the smaller rectangle's area
    pub fn overlap_fraction(&self, other: &Rect) -> f32 {
        let Some(intersection) = self.intersection(other) else {
            return 0.0;
        };

        let smaller = self.area().min(other.area());
        if smaller <= 0.0 {
            return 0.0;
        }

        intersection.area() / smaller
    }

    /// Clamp to `[0, width] x [0, height]`
    pub fn clamp_to(&self, width: f32, height: f32) -> Rect {
        Rect::new(
            self.left.clamp(0.0, width),
            self.top.clamp(0.0, height),
            self.right.clamp(0.0, width),
            self.bottom.clamp(0.0, height),
        )
    }
}
