use boardview_core::{BBox, EntityKind, LayerPayload, LodPayload, Rgba, DRC_OVERLAY_LAYER_ID};

use crate::region::DrcRegion;

pub const OVERLAY_COLOR: Rgba = [1.0, 0.0, 0.0, 0.6];

/// All region triangles as one batched LOD under the overlay layer id.
///
/// No regions yields a payload without geometry, which clears the overlay
/// when loaded.
pub fn overlay_payload(regions: &[DrcRegion]) -> LayerPayload {
    let payload = LayerPayload::new(DRC_OVERLAY_LAYER_ID, "DRC", OVERLAY_COLOR);
    let vertices: Vec<f32> = regions
        .iter()
        .filter(|r| r.triangle_vertices.len() % 6 == 0)
        .flat_map(|r| r.triangle_vertices.iter().copied())
        .collect();
    if vertices.is_empty() {
        return payload;
    }
    log::debug!("DRC overlay: {} triangles from {} regions", vertices.len() / 6, regions.len());
    payload.with_entity(EntityKind::Batch, vec![LodPayload::new(vertices)])
}

/// Bounds of one region, for framing it in the viewport.
pub fn region_bounds(regions: &[DrcRegion], id: u32) -> Option<BBox> {
    regions.iter().find(|r| r.id == id).map(DrcRegion::bbox)
}
