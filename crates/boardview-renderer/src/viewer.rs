use boardview_core::{LayerPayload, ObjectId, ObjectRange, PayloadError, Point, Rgba};
use uuid::Uuid;

use crate::compositor::{FrameCompositor, FrameStats};
use crate::config::ViewerConfig;
use crate::gpu::GpuDevice;
use crate::history::CommandHistory;
use crate::scene::SceneState;
use crate::store::LoadSummary;
use crate::transform::{TransformEngine, TransformError, TransformSummary};
use crate::visibility::VisibilityEngine;

/// Everything the board view needs, wired to one device.
pub struct Viewer<D: GpuDevice> {
    device: D,
    scene: SceneState,
    visibility: VisibilityEngine,
    transform: TransformEngine,
    history: CommandHistory,
    compositor: FrameCompositor,
}

impl<D: GpuDevice> Viewer<D> {
    pub fn new(device: D, config: ViewerConfig) -> Self {
        let history = CommandHistory::new(config.undo_limit);
        Self {
            device,
            scene: SceneState::new(config),
            visibility: VisibilityEngine::new(),
            transform: TransformEngine::new(),
            history,
            compositor: FrameCompositor::new(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn scene(&self) -> &SceneState {
        &self.scene
    }

    pub fn visibility(&self) -> &VisibilityEngine {
        &self.visibility
    }

    pub fn transform(&self) -> &TransformEngine {
        &self.transform
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    // ── layers ─────────────────────────────────────────────────────────

    pub fn load_layer(&mut self, payload: LayerPayload) -> Result<LoadSummary, PayloadError> {
        let summary = self.scene.load_layer(&mut self.device, payload)?;
        // Buffer contents changed under any cached coordinates or patches.
        self.transform.invalidate_local_cache();
        self.history.clear();
        Ok(summary)
    }

    pub fn unload_layer_geometry(&mut self, layer_id: &str) -> bool {
        self.transform.invalidate_local_cache();
        self.history.clear();
        self.scene.unload_layer_geometry(&mut self.device, layer_id)
    }

    /// Replace the DRC overlay geometry.
    pub fn set_drc_regions(&mut self, payload: LayerPayload) -> Result<LoadSummary, PayloadError> {
        self.scene.load_layer(&mut self.device, payload)
    }

    pub fn set_layer_visible(&mut self, layer_id: &str, visible: bool) -> bool {
        self.scene.set_layer_visible(layer_id, visible)
    }

    pub fn set_layer_color(&mut self, layer_id: &str, color: Rgba) -> bool {
        self.scene.set_layer_color(layer_id, color)
    }

    pub fn reset_layer_color(&mut self, layer_id: &str) {
        self.scene.reset_layer_color(layer_id);
    }

    pub fn toggle_layer_visibility(&mut self, layer_id: &str) {
        self.scene.toggle_layer_visibility(layer_id);
    }

    pub fn move_layer(&mut self, layer_id: &str, position: usize) -> bool {
        self.scene.move_layer(layer_id, position)
    }

    pub fn set_vias_on_top(&mut self, enabled: bool) {
        self.scene.set_vias_on_top(enabled);
    }

    pub fn set_drc_overlay_visible(&mut self, visible: bool) {
        self.scene.set_drc_overlay_visible(visible);
    }

    // ── visibility ─────────────────────────────────────────────────────

    pub fn hide(&mut self, range: &ObjectRange) {
        self.visibility.hide(&mut self.scene, &mut self.device, range);
    }

    pub fn show(&mut self, range: &ObjectRange) {
        self.visibility.show(&mut self.scene, &mut self.device, range);
    }

    pub fn hide_many(&mut self, ranges: &[ObjectRange]) {
        self.visibility.hide_many(&mut self.scene, &mut self.device, ranges);
    }

    pub fn show_many(&mut self, ranges: &[ObjectRange]) {
        self.visibility.show_many(&mut self.scene, &mut self.device, ranges);
    }

    pub fn show_all_hidden(&mut self) -> usize {
        self.visibility.show_all_hidden(&mut self.scene, &mut self.device)
    }

    pub fn is_hidden(&self, id: ObjectId) -> bool {
        self.visibility.is_hidden(id)
    }

    pub fn highlight(&mut self, range: &ObjectRange) {
        self.highlight_multiple(std::slice::from_ref(range));
    }

    /// A new highlight starts a new editing context, so cached component
    /// coordinates are dropped.
    pub fn highlight_multiple(&mut self, ranges: &[ObjectRange]) {
        self.transform.invalidate_local_cache();
        self.visibility
            .highlight_multiple(&mut self.scene, &mut self.device, ranges);
    }

    pub fn clear_highlight(&mut self) {
        self.transform.invalidate_local_cache();
        self.visibility.clear_highlight(&mut self.scene, &mut self.device);
    }

    pub fn highlighted_ids(&self) -> Vec<ObjectId> {
        self.visibility.highlighted_ids().collect()
    }

    // ── transform ──────────────────────────────────────────────────────

    pub fn start_move(&mut self, ranges: &[ObjectRange]) -> Result<Uuid, TransformError> {
        self.transform.start_move(&mut self.scene, &mut self.device, ranges)
    }

    pub fn setup_component_rotation(&mut self) -> Result<Point, TransformError> {
        self.transform
            .setup_component_rotation(&mut self.scene, &mut self.device)
    }

    pub fn update_move(&mut self, dx: f32, dy: f32) -> Result<(), TransformError> {
        self.transform.update_move(&mut self.scene, dx, dy)
    }

    pub fn add_rotation(&mut self, delta: f32) -> Result<f32, TransformError> {
        self.transform
            .add_rotation(&mut self.scene, &mut self.device, delta)
    }

    pub fn toggle_flip(&mut self) -> Result<bool, TransformError> {
        self.transform.toggle_flip(&mut self.scene, &mut self.device)
    }

    /// Commit the session and record it for undo.
    pub fn end_move(&mut self) -> Result<TransformSummary, TransformError> {
        let committed = self.transform.end_move(&mut self.scene, &mut self.device)?;
        self.history.record(Box::new(committed.command));
        Ok(committed.summary)
    }

    pub fn cancel_move(&mut self) -> Result<(), TransformError> {
        self.transform.cancel_move(&mut self.scene, &mut self.device)
    }

    pub fn undo(&mut self) -> Result<bool, TransformError> {
        if let Some(id) = self.transform.session_id() {
            return Err(TransformError::SessionActive(id));
        }
        self.transform.invalidate_local_cache();
        Ok(self.history.undo(&mut self.scene, &mut self.device))
    }

    pub fn redo(&mut self) -> Result<bool, TransformError> {
        if let Some(id) = self.transform.session_id() {
            return Err(TransformError::SessionActive(id));
        }
        self.transform.invalidate_local_cache();
        Ok(self.history.redo(&mut self.scene, &mut self.device))
    }

    // ── frame ──────────────────────────────────────────────────────────

    /// Force the next `render_frame` to draw.
    pub fn request_redraw(&mut self) {
        self.scene.mark_dirty();
    }

    /// Draw if anything changed since the last frame.
    pub fn render_frame(&mut self, zoom: f32) -> Option<FrameStats> {
        let motion = self.transform.frame_uniform();
        self.compositor
            .render_frame(&mut self.scene, &mut self.device, zoom, motion)
    }

    pub fn into_device(self) -> D {
        self.device
    }
}
