use boardview_core::{BBox, LayerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DrcError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("region {id}: {len} triangle floats is not a whole number of triangles")]
    MalformedTriangles { id: u32, len: usize },
}

/// A fused clearance violation: adjacent triangle pairs that are closer
/// than the rules allow, reported as one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrcRegion {
    pub id: u32,
    pub layer_id: LayerId,
    /// Smallest distance found inside the region.
    pub min_distance_mm: f32,
    /// Clearance the rules require.
    pub clearance_mm: f32,
    #[serde(default)]
    pub net_a: Option<String>,
    #[serde(default)]
    pub net_b: Option<String>,
    /// Bounding box [min_x, min_y, max_x, max_y]
    pub bounds: [f32; 4],
    pub center: [f32; 2],
    /// Objects involved, for highlighting.
    #[serde(default)]
    pub object_ids: Vec<u64>,
    /// Flattened triangles `[x0, y0, x1, y1, x2, y2, ...]`.
    #[serde(default)]
    pub triangle_vertices: Vec<f32>,
}

impl DrcRegion {
    pub fn bbox(&self) -> BBox {
        BBox::from_bounds(self.bounds)
    }

    pub fn triangle_count(&self) -> usize {
        self.triangle_vertices.len() / 6
    }

    /// How far short of the clearance the region falls.
    pub fn shortfall_mm(&self) -> f32 {
        (self.clearance_mm - self.min_distance_mm).max(0.0)
    }

    fn validate(&self) -> Result<(), DrcError> {
        if self.triangle_vertices.len() % 6 != 0 {
            return Err(DrcError::MalformedTriangles {
                id: self.id,
                len: self.triangle_vertices.len(),
            });
        }
        Ok(())
    }
}

/// Parse a JSON array of regions, rejecting any with partial triangles.
pub fn parse_regions(json: &str) -> Result<Vec<DrcRegion>, DrcError> {
    let regions: Vec<DrcRegion> = serde_json::from_str(json)?;
    for region in &regions {
        region.validate()?;
    }
    log::debug!("parsed {} DRC regions", regions.len());
    Ok(regions)
}
