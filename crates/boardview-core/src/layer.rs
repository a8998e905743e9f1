use serde::{Deserialize, Serialize};

/// A board layer identifier as used by the layout authority (e.g. `"F.Cu"`).
pub type LayerId = String;

/// RGBA color with components in `0.0..=1.0`.
pub type Rgba = [f32; 4];

pub const DEFAULT_LAYER_COLOR: Rgba = [0.5, 0.5, 0.5, 1.0];

/// Reserved identifier for the DRC overlay geometry. Never part of a [`LayerStack`].
pub const DRC_OVERLAY_LAYER_ID: &str = "__drc_overlay__";

/// A board layer as known to the renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    /// Layer function reported by the authority (SIGNAL, PLANE, SOLDERMASK, ...).
    pub function: Option<String>,
    pub default_color: Rgba,
    /// User override; `None` draws with `default_color`.
    pub color_override: Option<Rgba>,
    pub visible: bool,
    /// Position in the draw order, 0 drawn first.
    pub render_order: usize,
}

impl Layer {
    pub fn new(id: &str, name: &str, default_color: Rgba) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            function: None,
            default_color,
            color_override: None,
            visible: true,
            render_order: 0,
        }
    }

    pub fn with_function(mut self, function: &str) -> Self {
        self.function = Some(function.to_string());
        self
    }

    pub fn color(&self) -> Rgba {
        self.color_override.unwrap_or(self.default_color)
    }
}

/// The ordered set of layers of the loaded document.
///
/// Layers are kept sorted by `render_order`, so iterating draws in order
/// without sorting per frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerStack {
    layers: Vec<Layer>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Append a layer at the end of the draw order. A layer with the same id
    /// keeps its place, visibility and override; name and defaults are refreshed.
    pub fn add_layer(&mut self, mut layer: Layer) -> &mut Layer {
        if let Some(pos) = self.position(&layer.id) {
            let existing = &mut self.layers[pos];
            existing.name = layer.name;
            existing.default_color = layer.default_color;
            if layer.function.is_some() {
                existing.function = layer.function;
            }
            return existing;
        }
        layer.render_order = self.layers.len();
        self.layers.push(layer);
        let last = self.layers.len() - 1;
        &mut self.layers[last]
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn get_layer(&self, id: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn get_layer_mut(&mut self, id: &str) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    pub fn visible_layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter().filter(|l| l.visible)
    }

    pub fn all_layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn toggle_visibility(&mut self, id: &str) {
        if let Some(layer) = self.get_layer_mut(id) {
            layer.visible = !layer.visible;
        }
    }

    pub fn set_visibility(&mut self, id: &str, visible: bool) -> bool {
        match self.get_layer_mut(id) {
            Some(layer) => {
                layer.visible = visible;
                true
            }
            None => false,
        }
    }

    pub fn set_color(&mut self, id: &str, color: Rgba) -> bool {
        match self.get_layer_mut(id) {
            Some(layer) => {
                layer.color_override = Some(color);
                true
            }
            None => false,
        }
    }

    pub fn reset_color(&mut self, id: &str) {
        if let Some(layer) = self.get_layer_mut(id) {
            layer.color_override = None;
        }
    }

    /// Move a layer to `position` in the draw order (clamped to the end).
    pub fn move_layer(&mut self, id: &str, position: usize) -> bool {
        let Some(from) = self.position(id) else {
            return false;
        };
        let layer = self.layers.remove(from);
        let to = position.min(self.layers.len());
        self.layers.insert(to, layer);
        for (order, layer) in self.layers.iter_mut().enumerate() {
            layer.render_order = order;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack() -> LayerStack {
        let mut stack = LayerStack::new();
        stack.add_layer(Layer::new("F.Cu", "Top", [1.0, 0.0, 0.0, 1.0]));
        stack.add_layer(Layer::new("In1.Cu", "Inner 1", [0.0, 1.0, 0.0, 1.0]));
        stack.add_layer(Layer::new("B.Cu", "Bottom", [0.0, 0.0, 1.0, 1.0]));
        stack
    }

    #[test]
    fn test_layers_keep_insertion_order() {
        let stack = stack();
        let ids: Vec<&str> = stack.all_layers().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, ["F.Cu", "In1.Cu", "B.Cu"]);
        assert_eq!(stack.get_layer("B.Cu").unwrap().render_order, 2);
    }

    #[test]
    fn test_re_adding_keeps_state() {
        let mut stack = stack();
        stack.set_visibility("F.Cu", false);
        stack.set_color("F.Cu", [1.0, 1.0, 1.0, 1.0]);
        stack.add_layer(Layer::new("F.Cu", "Top copper", [0.9, 0.1, 0.1, 1.0]));
        let layer = stack.get_layer("F.Cu").unwrap();
        assert_eq!(stack.layer_count(), 3);
        assert!(!layer.visible);
        assert_eq!(layer.name, "Top copper");
        assert_eq!(layer.color(), [1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_move_layer_renumbers() {
        let mut stack = stack();
        assert!(stack.move_layer("B.Cu", 0));
        let order: Vec<(&str, usize)> = stack
            .all_layers()
            .iter()
            .map(|l| (l.id.as_str(), l.render_order))
            .collect();
        assert_eq!(order, [("B.Cu", 0), ("F.Cu", 1), ("In1.Cu", 2)]);
        assert!(!stack.move_layer("Edge.Cuts", 0));
    }

    #[test]
    fn test_visible_layers_filter() {
        let mut stack = stack();
        stack.toggle_visibility("In1.Cu");
        assert_eq!(stack.visible_layers().count(), 2);
        stack.toggle_visibility("In1.Cu");
        assert_eq!(stack.visible_layers().count(), 3);
    }
}
