use rstar::primitives::GeomWithData;
use rstar::{PointDistance, RTree};

use crate::geometry::Point;
use crate::packed::InstanceRecord;

/// An instance placement in the R-tree, tagged with its slot in the buffer.
pub type InstanceEntry = GeomWithData<[f32; 2], usize>;

/// Spatial index over the placements of one instanced shape.
///
/// Used to recover an instance whose index went stale after its backing
/// buffer was rewritten: the placement closest to where the object is
/// expected to be is taken as the object.
pub struct InstanceLocator {
    tree: RTree<InstanceEntry>,
}

impl InstanceLocator {
    pub fn new() -> Self {
        Self { tree: RTree::new() }
    }

    /// Build the index from the records of an instance buffer.
    pub fn build(records: &[InstanceRecord]) -> Self {
        let entries = records
            .iter()
            .enumerate()
            .map(|(slot, r)| InstanceEntry::new([r.x, r.y], slot))
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Slot of the placement nearest to `target`, if within `tolerance`.
    pub fn nearest_within(&self, target: Point, tolerance: f32) -> Option<usize> {
        let query = target.to_array();
        self.tree
            .nearest_neighbor(&query)
            .filter(|entry| entry.geom().distance_2(&query) <= tolerance * tolerance)
            .map(|entry| entry.data)
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

impl Default for InstanceLocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> Vec<InstanceRecord> {
        vec![
            InstanceRecord::new(0.0, 0.0, 1),
            InstanceRecord::new(10.0, 10.0, 1),
            InstanceRecord::new(10.3, 10.0, 1),
            InstanceRecord::new(50.0, -5.0, 1),
        ]
    }

    #[test]
    fn test_nearest_within_tolerance() {
        let locator = InstanceLocator::build(&records());
        assert_eq!(locator.len(), 4);
        assert_eq!(locator.nearest_within(Point::new(10.25, 10.0), 0.5), Some(2));
        assert_eq!(locator.nearest_within(Point::new(49.8, -5.1), 0.5), Some(3));
    }

    #[test]
    fn test_nothing_near() {
        let locator = InstanceLocator::build(&records());
        assert_eq!(locator.nearest_within(Point::new(30.0, 30.0), 0.5), None);
        assert!(InstanceLocator::new().nearest_within(Point::ORIGIN, 1.0).is_none());
    }
}
