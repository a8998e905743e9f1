use std::f32::consts::PI;

use crate::geometry::Point;
use crate::packed::{self, normalize_angle};

/// Flip, rotation and translation of a group of objects about a pivot.
///
/// Applied in the order mirror (about the vertical line through the pivot),
/// rotate about the pivot, then translate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    center: Point,
    rotation: f32,
    flipped: bool,
    offset: Point,
    sin: f32,
    cos: f32,
}

impl Default for Placement {
    fn default() -> Self {
        Self::about(Point::ORIGIN)
    }
}

impl Placement {
    pub fn new(center: Point, rotation: f32, flipped: bool, offset: Point) -> Self {
        let rotation = normalize_angle(rotation);
        let (sin, cos) = rotation.sin_cos();
        Self {
            center,
            rotation,
            flipped,
            offset,
            sin,
            cos,
        }
    }

    pub fn about(center: Point) -> Self {
        Self::new(center, 0.0, false, Point::ORIGIN)
    }

    pub fn center(&self) -> Point {
        self.center
    }

    pub fn rotation(&self) -> f32 {
        self.rotation
    }

    pub fn flipped(&self) -> bool {
        self.flipped
    }

    pub fn offset(&self) -> Point {
        self.offset
    }

    /// Same flip and rotation, no translation.
    pub fn without_offset(&self) -> Self {
        Self {
            offset: Point::ORIGIN,
            ..*self
        }
    }

    pub fn is_identity(&self) -> bool {
        self.rotation == 0.0 && !self.flipped && self.offset == Point::ORIGIN
    }

    /// Transform a point given relative to the pivot; the result is relative too.
    pub fn apply_local(&self, local: Point) -> Point {
        let mirrored = if self.flipped {
            Point::new(-local.x, local.y)
        } else {
            local
        };
        mirrored.rotated(self.sin, self.cos)
    }

    /// Transform a point in board coordinates.
    pub fn apply(&self, p: Point) -> Point {
        let local = self.apply_local(p.offset_from(&self.center));
        Point::new(
            self.center.x + local.x + self.offset.x,
            self.center.y + local.y + self.offset.y,
        )
    }

    /// New orientation of an instance that had `angle` before.
    ///
    /// Mirroring about a vertical axis maps an orientation `a` to `π - a`.
    pub fn apply_angle(&self, angle: f32) -> f32 {
        let base = if self.flipped { PI - angle } else { angle };
        normalize_angle(base + self.rotation)
    }

    /// Rewrite a packed state word: new angle, flags kept, moving bit as given.
    pub fn apply_word(&self, word: u32, moving: bool) -> u32 {
        let rotated = packed::with_angle(word, self.apply_angle(packed::angle_of(word)));
        packed::with_moving(rotated, moving)
    }
}
