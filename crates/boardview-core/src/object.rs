//! Object identity as supplied by the layout authority.
//!
//! The renderer never invents identity: every object it touches arrives as an
//! [`ObjectRange`] from a selection or highlight query.

use serde::{Deserialize, Serialize};

use crate::geometry::{BBox, Point};
use crate::layer::LayerId;

pub type ObjectId = u64;

/// Kind of board object. On the wire this is the numeric `obj_type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ObjectKind {
    Polyline,
    Polygon,
    Via,
    Pad,
}

impl ObjectKind {
    /// The render entity that holds geometry of this kind.
    pub fn entity_kind(self) -> EntityKind {
        match self {
            ObjectKind::Polyline => EntityKind::Batch,
            ObjectKind::Polygon => EntityKind::BatchColored,
            ObjectKind::Via => EntityKind::Instanced,
            ObjectKind::Pad => EntityKind::InstancedRot,
        }
    }

    pub fn is_instanced(self) -> bool {
        self.entity_kind().is_instanced()
    }
}

impl TryFrom<u8> for ObjectKind {
    type Error = String;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(ObjectKind::Polyline),
            1 => Ok(ObjectKind::Polygon),
            2 => Ok(ObjectKind::Via),
            3 => Ok(ObjectKind::Pad),
            other => Err(format!("unknown object type tag {other}")),
        }
    }
}

impl From<ObjectKind> for u8 {
    fn from(kind: ObjectKind) -> u8 {
        match kind {
            ObjectKind::Polyline => 0,
            ObjectKind::Polygon => 1,
            ObjectKind::Via => 2,
            ObjectKind::Pad => 3,
        }
    }
}

/// Geometry variant of a render entity; one pipeline each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// Polylines: shared vertex stream, opaque.
    Batch,
    /// Polygons: shared vertex stream with per-vertex alpha.
    BatchColored,
    /// Vias: one shape, many placements, no rotation.
    Instanced,
    /// Pads: one shape, many placements, packed rotation.
    InstancedRot,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Batch,
        EntityKind::BatchColored,
        EntityKind::Instanced,
        EntityKind::InstancedRot,
    ];

    /// Order in which a layer's entities are drawn: fills, traces, pads, vias.
    pub const DRAW_ORDER: [EntityKind; 4] = [
        EntityKind::BatchColored,
        EntityKind::Batch,
        EntityKind::InstancedRot,
        EntityKind::Instanced,
    ];

    pub fn is_instanced(self) -> bool {
        matches!(self, EntityKind::Instanced | EntityKind::InstancedRot)
    }

    /// Dense index for per-layer slot arrays.
    pub fn slot(self) -> usize {
        match self {
            EntityKind::Batch => 0,
            EntityKind::BatchColored => 1,
            EntityKind::Instanced => 2,
            EntityKind::InstancedRot => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Batch => "batch",
            EntityKind::BatchColored => "batch_colored",
            EntityKind::Instanced => "instanced",
            EntityKind::InstancedRot => "instanced_rot",
        }
    }
}

/// Contiguous run of vertices belonging to one object in one LOD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u32, u32)", into = "(u32, u32)")]
pub struct VertexSpan {
    pub start: u32,
    pub count: u32,
}

impl VertexSpan {
    pub fn new(start: u32, count: u32) -> Self {
        Self { start, count }
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        let start = self.start as usize;
        start..start + self.count as usize
    }
}

impl From<(u32, u32)> for VertexSpan {
    fn from((start, count): (u32, u32)) -> Self {
        Self { start, count }
    }
}

impl From<VertexSpan> for (u32, u32) {
    fn from(span: VertexSpan) -> Self {
        (span.start, span.count)
    }
}

/// Where one object lives in the renderer's buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRange {
    pub id: ObjectId,
    pub layer_id: LayerId,
    #[serde(rename = "obj_type")]
    pub kind: ObjectKind,
    /// One span per LOD, index = LOD level (batched kinds).
    #[serde(default)]
    pub vertex_ranges: Vec<VertexSpan>,
    #[serde(default)]
    pub instance_index: Option<u32>,
    #[serde(default)]
    pub shape_index: Option<u32>,
    /// `[min_x, min_y, max_x, max_y]`
    pub bounds: [f32; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_center: Option<[f32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polar_radius: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polar_angle: Option<f32>,
}

impl ObjectRange {
    /// A batched object with one vertex span per LOD.
    pub fn batched(
        id: ObjectId,
        layer_id: &str,
        kind: ObjectKind,
        spans: Vec<VertexSpan>,
        bounds: [f32; 4],
    ) -> Self {
        Self {
            id,
            layer_id: layer_id.to_string(),
            kind,
            vertex_ranges: spans,
            instance_index: None,
            shape_index: None,
            bounds,
            net_name: None,
            component_ref: None,
            pin_ref: None,
            component_center: None,
            polar_radius: None,
            polar_angle: None,
        }
    }

    /// An instanced object (pad or via) at `instance_index` of shape `shape_index`.
    pub fn instanced(
        id: ObjectId,
        layer_id: &str,
        kind: ObjectKind,
        shape_index: u32,
        instance_index: u32,
        bounds: [f32; 4],
    ) -> Self {
        Self {
            instance_index: Some(instance_index),
            shape_index: Some(shape_index),
            ..Self::batched(id, layer_id, kind, Vec::new(), bounds)
        }
    }

    pub fn with_component(mut self, component_ref: &str, center: Option<[f32; 2]>) -> Self {
        self.component_ref = Some(component_ref.to_string());
        self.component_center = center;
        if let Some(c) = center {
            let object_center = self.bbox().center();
            let dx = object_center.x - c[0];
            let dy = object_center.y - c[1];
            self.polar_radius = Some((dx * dx + dy * dy).sqrt());
            self.polar_angle = Some(dy.atan2(dx));
        }
        self
    }

    pub fn bbox(&self) -> BBox {
        BBox::from_bounds(self.bounds)
    }

    pub fn center(&self) -> Point {
        self.bbox().center()
    }

    pub fn entity_kind(&self) -> EntityKind {
        self.kind.entity_kind()
    }

    pub fn is_instanced(&self) -> bool {
        self.kind.is_instanced()
    }
}

/// Union of the bounds of a set of objects.
pub fn union_bounds<'a>(ranges: impl IntoIterator<Item = &'a ObjectRange>) -> Option<BBox> {
    ranges
        .into_iter()
        .map(ObjectRange::bbox)
        .reduce(|acc, bb| acc.union(&bb))
}
