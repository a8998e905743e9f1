use serde::{Deserialize, Serialize};

/// A 2D point in board coordinates (millimeters).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn from_array(xy: [f32; 2]) -> Self {
        Self::new(xy[0], xy[1])
    }

    pub fn to_array(self) -> [f32; 2] {
        [self.x, self.y]
    }

    pub fn distance_to(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    pub fn offset_from(&self, origin: &Point) -> Self {
        Self::new(self.x - origin.x, self.y - origin.y)
    }

    /// Rotate a vector about the origin by precomputed `(sin, cos)`.
    pub fn rotated(&self, sin: f32, cos: f32) -> Self {
        Self::new(self.x * cos - self.y * sin, self.x * sin + self.y * cos)
    }
}

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min: Point,
    pub max: Point,
}

impl BBox {
    pub fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// Build from the `[min_x, min_y, max_x, max_y]` form used on the wire.
    pub fn from_bounds(bounds: [f32; 4]) -> Self {
        Self::new(
            Point::new(bounds[0].min(bounds[2]), bounds[1].min(bounds[3])),
            Point::new(bounds[0].max(bounds[2]), bounds[1].max(bounds[3])),
        )
    }

    pub fn to_bounds(&self) -> [f32; 4] {
        [self.min.x, self.min.y, self.max.x, self.max.y]
    }

    pub fn from_points(points: &[Point]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_x = f32::MAX;
        let mut min_y = f32::MAX;
        let mut max_x = f32::MIN;
        let mut max_y = f32::MIN;
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self {
            min: Point::new(min_x, min_y),
            max: Point::new(max_x, max_y),
        })
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
        )
    }

    pub fn intersects(&self, other: &BBox) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn union(&self, other: &BBox) -> Self {
        Self {
            min: Point::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Point::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert_relative_eq!(a.distance_to(&b), 5.0);
    }

    #[test]
    fn test_point_rotated_quarter_turn() {
        let p = Point::new(1.0, 0.0).rotated(FRAC_PI_2.sin(), FRAC_PI_2.cos());
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_bbox_from_bounds_and_center() {
        let bb = BBox::from_bounds([4.0, 2.0, 0.0, 0.0]);
        assert_eq!(bb.min, Point::new(0.0, 0.0));
        assert_eq!(bb.center(), Point::new(2.0, 1.0));
        assert_eq!(bb.to_bounds(), [0.0, 0.0, 4.0, 2.0]);
    }

    #[test]
    fn test_bbox_intersection() {
        let a = BBox::new(Point::new(0.0, 0.0), Point::new(10.0, 10.0));
        let b = BBox::new(Point::new(5.0, 5.0), Point::new(15.0, 15.0));
        let c = BBox::new(Point::new(20.0, 20.0), Point::new(30.0, 30.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert_eq!(a.union(&c).max, Point::new(30.0, 30.0));
    }
}
