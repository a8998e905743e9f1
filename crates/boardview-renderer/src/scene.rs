//! State shared by the engines: layers, geometry, overlay switches and the
//! redraw flag.

use boardview_core::{Layer, LayerPayload, LayerStack, PayloadError, Rgba, DRC_OVERLAY_LAYER_ID};

use crate::config::ViewerConfig;
use crate::gpu::GpuDevice;
use crate::store::{GeometryStore, LoadSummary};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayFlags {
    pub vias_on_top: bool,
    pub drc_overlay: bool,
}

/// Owned by the viewer and lent to each engine for the duration of a call.
///
/// Every mutation sets the redraw flag; only the frame compositor clears it.
#[derive(Debug)]
pub struct SceneState {
    pub(crate) config: ViewerConfig,
    pub(crate) layers: LayerStack,
    pub(crate) store: GeometryStore,
    pub(crate) overlays: OverlayFlags,
    needs_redraw: bool,
}

impl SceneState {
    pub fn new(config: ViewerConfig) -> Self {
        Self {
            config,
            layers: LayerStack::new(),
            store: GeometryStore::new(),
            overlays: OverlayFlags::default(),
            needs_redraw: false,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn layers(&self) -> &LayerStack {
        &self.layers
    }

    pub fn store(&self) -> &GeometryStore {
        &self.store
    }

    pub fn overlays(&self) -> OverlayFlags {
        self.overlays
    }

    pub fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    pub fn needs_redraw(&self) -> bool {
        self.needs_redraw
    }

    pub(crate) fn take_redraw(&mut self) -> bool {
        std::mem::replace(&mut self.needs_redraw, false)
    }

    /// Upload a layer's geometry, creating the layer on first sight.
    ///
    /// The DRC overlay id is stored like any layer but never enters the
    /// layer stack.
    pub fn load_layer(
        &mut self,
        device: &mut dyn GpuDevice,
        payload: LayerPayload,
    ) -> Result<LoadSummary, PayloadError> {
        let mut layer = Layer::new(&payload.layer_id, &payload.layer_name, payload.default_color);
        if let Some(function) = payload.layer_function.as_deref() {
            layer = layer.with_function(function);
        }
        let summary = self.store.load_layer(device, payload)?;
        if layer.id != DRC_OVERLAY_LAYER_ID {
            self.layers.add_layer(layer);
        }
        self.mark_dirty();
        Ok(summary)
    }

    pub fn unload_layer_geometry(&mut self, device: &mut dyn GpuDevice, layer_id: &str) -> bool {
        let removed = self.store.unload_layer_geometry(device, layer_id);
        if removed {
            self.mark_dirty();
        }
        removed
    }

    pub fn set_layer_visible(&mut self, layer_id: &str, visible: bool) -> bool {
        let found = self.layers.set_visibility(layer_id, visible);
        if found {
            self.mark_dirty();
        }
        found
    }

    pub fn toggle_layer_visibility(&mut self, layer_id: &str) {
        self.layers.toggle_visibility(layer_id);
        self.mark_dirty();
    }

    pub fn set_layer_color(&mut self, layer_id: &str, color: Rgba) -> bool {
        let found = self.layers.set_color(layer_id, color);
        if found {
            self.mark_dirty();
        }
        found
    }

    pub fn reset_layer_color(&mut self, layer_id: &str) {
        self.layers.reset_color(layer_id);
        self.mark_dirty();
    }

    pub fn move_layer(&mut self, layer_id: &str, position: usize) -> bool {
        let moved = self.layers.move_layer(layer_id, position);
        if moved {
            self.mark_dirty();
        }
        moved
    }

    pub fn set_vias_on_top(&mut self, enabled: bool) {
        self.overlays.vias_on_top = enabled;
        self.mark_dirty();
    }

    pub fn set_drc_overlay_visible(&mut self, visible: bool) {
        self.overlays.drc_overlay = visible;
        self.mark_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessDevice;
    use boardview_core::{EntityKind, LodPayload};

    fn payload(id: &str) -> LayerPayload {
        LayerPayload::new(id, id, [0.2, 0.4, 0.6, 1.0])
            .with_entity(EntityKind::Batch, vec![LodPayload::new(vec![0.0, 0.0, 1.0, 1.0])])
    }

    #[test]
    fn test_load_creates_layer_and_marks_dirty() {
        let mut device = HeadlessDevice::new();
        let mut scene = SceneState::new(ViewerConfig::default());
        assert!(!scene.needs_redraw());
        scene.load_layer(&mut device, payload("F.Cu")).unwrap();
        assert!(scene.layers().contains("F.Cu"));
        assert!(scene.take_redraw());
        assert!(!scene.needs_redraw());
    }

    #[test]
    fn test_reload_keeps_layer_state() {
        let mut device = HeadlessDevice::new();
        let mut scene = SceneState::new(ViewerConfig::default());
        scene.load_layer(&mut device, payload("F.Cu")).unwrap();
        scene.set_layer_visible("F.Cu", false);
        scene.set_layer_color("F.Cu", [1.0, 1.0, 1.0, 1.0]);
        scene.load_layer(&mut device, payload("F.Cu")).unwrap();
        let layer = scene.layers().get_layer("F.Cu").unwrap();
        assert!(!layer.visible);
        assert_eq!(layer.color(), [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(scene.layers().layer_count(), 1);
    }

    #[test]
    fn test_overlay_layer_stays_out_of_stack() {
        let mut device = HeadlessDevice::new();
        let mut scene = SceneState::new(ViewerConfig::default());
        scene.load_layer(&mut device, payload(DRC_OVERLAY_LAYER_ID)).unwrap();
        assert_eq!(scene.layers().layer_count(), 0);
        assert!(scene.store().contains_layer(DRC_OVERLAY_LAYER_ID));
    }
}
