//! Axis-Aligned Rectangles
//!
//! Top-left anchored rectangles used for platforms, walls, the goal
//! region and player bounding boxes.

use serde::{Serialize, Deserialize};

use super::vec2::Vec2;

/// Axis-aligned rectangle anchored at its top-left corner.
#[derive(Clone, Copy, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width (extends right)
    pub width: f32,
    /// Height (extends down)
    pub height: f32,
}

/// Penetration depth of one rectangle into another, per side.
///
/// Each value is how far the moving rectangle must travel in that
/// direction to stop overlapping.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Penetration {
    /// Push distance toward -x
    pub left: f32,
    /// Push distance toward +x
    pub right: f32,
    /// Push distance toward -y
    pub up: f32,
    /// Push distance toward +y
    pub down: f32,
}

impl Penetration {
    /// Smallest horizontal push.
    #[inline]
    pub fn min_horizontal(&self) -> f32 {
        self.left.min(self.right)
    }

    /// Smallest vertical push.
    #[inline]
    pub fn min_vertical(&self) -> f32 {
        self.up.min(self.down)
    }
}

impl Rect {
    /// Create a rectangle.
    #[inline]
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle of `size` with its top-left corner at `position`.
    #[inline]
    pub fn at(position: Vec2, size: Vec2) -> Self {
        Self::new(position.x, position.y, size.x, size.y)
    }

    /// Right edge.
    #[inline]
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    /// Bottom edge.
    #[inline]
    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Top-left corner.
    #[inline]
    pub fn origin(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    /// Strict overlap test. Rectangles that only share an edge do not overlap.
    #[inline]
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.x < other.right()
            && self.right() > other.x
            && self.y < other.bottom()
            && self.bottom() > other.y
    }

    /// Penetration of `self` into `other`, or `None` if they do not overlap.
    pub fn penetration(&self, other: &Rect) -> Option<Penetration> {
        if !self.overlaps(other) {
            return None;
        }
        Some(Penetration {
            left: self.right() - other.x,
            right: other.right() - self.x,
            up: self.bottom() - other.y,
            down: other.bottom() - self.y,
        })
    }

    /// True when every coordinate is finite and the size is non-negative.
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width >= 0.0
            && self.height >= 0.0
    }
}
