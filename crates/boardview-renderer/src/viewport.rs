use boardview_core::BBox;
use serde::{Deserialize, Serialize};

use crate::compositor::select_lod_with;

const MIN_ZOOM: f64 = 0.001;
const MAX_ZOOM: f64 = 1_000_000.0;

/// The camera over the board canvas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Center X in board coordinates.
    pub center_x: f64,
    /// Center Y in board coordinates.
    pub center_y: f64,
    /// Zoom level (pixels per board unit).
    pub zoom: f64,
    /// Canvas width in pixels.
    pub canvas_width: f64,
    /// Canvas height in pixels.
    pub canvas_height: f64,
}

impl Viewport {
    pub fn new(canvas_width: f64, canvas_height: f64) -> Self {
        Self {
            center_x: 0.0,
            center_y: 0.0,
            zoom: 1.0,
            canvas_width,
            canvas_height,
        }
    }

    /// Pan by a delta in screen pixels.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.center_x -= dx / self.zoom;
        self.center_y -= dy / self.zoom;
    }

    /// Zoom about a screen position, keeping the board point under it fixed.
    pub fn zoom_at(&mut self, screen_x: f64, screen_y: f64, factor: f64) {
        let board_x = self.screen_to_board_x(screen_x);
        let board_y = self.screen_to_board_y(screen_y);

        self.zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);

        self.center_x -= self.screen_to_board_x(screen_x) - board_x;
        self.center_y -= self.screen_to_board_y(screen_y) - board_y;
    }

    /// Frame a bounding box with a 10% margin. Degenerate boxes only recenter.
    pub fn fit_bbox(&mut self, bbox: &BBox) {
        let center = bbox.center();
        self.center_x = center.x as f64;
        self.center_y = center.y as f64;

        let width = bbox.width() as f64;
        let height = bbox.height() as f64;
        if width <= 0.0 || height <= 0.0 {
            return;
        }
        let zoom_x = self.canvas_width / width * 0.9;
        let zoom_y = self.canvas_height / height * 0.9;
        self.zoom = zoom_x.min(zoom_y).clamp(MIN_ZOOM, MAX_ZOOM);
    }

    pub fn screen_to_board_x(&self, screen_x: f64) -> f64 {
        (screen_x - self.canvas_width / 2.0) / self.zoom + self.center_x
    }

    pub fn screen_to_board_y(&self, screen_y: f64) -> f64 {
        (screen_y - self.canvas_height / 2.0) / self.zoom + self.center_y
    }

    pub fn board_to_screen_x(&self, board_x: f64) -> f64 {
        (board_x - self.center_x) * self.zoom + self.canvas_width / 2.0
    }

    pub fn board_to_screen_y(&self, board_y: f64) -> f64 {
        (board_y - self.center_y) * self.zoom + self.canvas_height / 2.0
    }

    /// Visible area in board coordinates.
    pub fn visible_bounds(&self) -> BBox {
        let half_w = self.canvas_width / (2.0 * self.zoom);
        let half_h = self.canvas_height / (2.0 * self.zoom);
        BBox::from_bounds([
            (self.center_x - half_w) as f32,
            (self.center_y - half_h) as f32,
            (self.center_x + half_w) as f32,
            (self.center_y + half_h) as f32,
        ])
    }

    /// LOD tier for the current zoom.
    pub fn lod_tier(&self, breakpoints: &[f32; 4]) -> usize {
        select_lod_with(breakpoints, self.zoom as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::DEFAULT_LOD_BREAKPOINTS;
    use approx::assert_relative_eq;

    #[test]
    fn test_zoom_at_keeps_cursor_point() {
        let mut vp = Viewport::new(800.0, 600.0);
        let before = vp.screen_to_board_x(100.0);
        vp.zoom_at(100.0, 50.0, 4.0);
        assert_relative_eq!(vp.screen_to_board_x(100.0), before, epsilon = 1e-9);
        assert_eq!(vp.zoom, 4.0);
    }

    #[test]
    fn test_fit_bbox_and_tier() {
        let mut vp = Viewport::new(1000.0, 1000.0);
        vp.fit_bbox(&BBox::from_bounds([0.0, 0.0, 10.0, 20.0]));
        assert_eq!((vp.center_x, vp.center_y), (5.0, 10.0));
        assert_relative_eq!(vp.zoom, 45.0);
        assert_eq!(vp.lod_tier(&DEFAULT_LOD_BREAKPOINTS), 0);

        vp.zoom_at(500.0, 500.0, 0.02);
        assert_eq!(vp.lod_tier(&DEFAULT_LOD_BREAKPOINTS), 3);
    }

    #[test]
    fn test_screen_roundtrip() {
        let mut vp = Viewport::new(640.0, 480.0);
        vp.pan(30.0, -12.0);
        vp.zoom_at(0.0, 0.0, 2.5);
        let sx = vp.board_to_screen_x(12.5);
        assert_relative_eq!(vp.screen_to_board_x(sx), 12.5, epsilon = 1e-9);
        let bounds = vp.visible_bounds();
        assert_relative_eq!(bounds.width(), 256.0, epsilon = 1e-3);
    }
}
