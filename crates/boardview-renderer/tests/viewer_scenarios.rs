use std::f32::consts::{FRAC_PI_2, PI};

use approx::assert_relative_eq;
use boardview_core::packed::{angular_distance, pack, unpack, ANGLE_QUANTUM};
use boardview_core::{
    EntityKind, InstanceRecord, LayerPayload, LodPayload, ObjectKind, ObjectRange, Point, VertexSpan,
};
use boardview_renderer::store::InstanceSlot;
use boardview_renderer::{HeadlessDevice, RenderEntity, TransformError, Viewer, ViewerConfig};

const FILL: [f32; 8] = [9.0, 11.0, 11.0, 11.0, 11.0, 13.0, 9.0, 13.0];

fn layer() -> LayerPayload {
    let pads = [
        InstanceRecord::new(10.0, 10.0, pack(true, false, false, 0.0)),
        InstanceRecord::new(10.0, 14.0, pack(true, false, false, FRAC_PI_2)),
    ];
    let vias = [InstanceRecord::new(20.0, 20.0, 1)];
    let pad_shape = || LodPayload::new(vec![-0.5, -0.5, 0.5, -0.5, 0.5, 0.5]).with_instance_records(&pads);
    let via_shape = LodPayload::new(vec![-0.2, -0.2, 0.2, -0.2, 0.0, 0.2]).with_instance_records(&vias);
    LayerPayload::new("F.Cu", "Top", [0.8, 0.2, 0.2, 1.0])
        .with_entity(EntityKind::InstancedRot, vec![pad_shape(), pad_shape(), pad_shape()])
        .with_entity(EntityKind::Instanced, vec![via_shape])
        .with_entity(
            EntityKind::BatchColored,
            vec![
                LodPayload::new(FILL.to_vec()).with_indices(vec![0, 1, 2, 0, 2, 3]),
                LodPayload::new(FILL.to_vec()),
            ],
        )
}

fn viewer() -> Viewer<HeadlessDevice> {
    let mut viewer = Viewer::new(HeadlessDevice::new(), ViewerConfig::default());
    viewer.load_layer(layer()).unwrap();
    viewer
}

fn pad(index: u32, x: f32, y: f32, center: [f32; 2]) -> ObjectRange {
    ObjectRange::instanced(index as u64 + 1, "F.Cu", ObjectKind::Pad, 0, index, [x - 0.5, y - 0.5, x + 0.5, y + 0.5])
        .with_component("U1", Some(center))
}

fn fill() -> ObjectRange {
    ObjectRange::batched(100, "F.Cu", ObjectKind::Polygon, vec![VertexSpan::new(0, 4)], [9.0, 11.0, 11.0, 13.0])
        .with_component("U1", Some([10.0, 12.0]))
}

fn record(viewer: &Viewer<HeadlessDevice>, instance: usize) -> InstanceRecord {
    let slot = InstanceSlot {
        layer_id: "F.Cu".into(),
        kind: EntityKind::InstancedRot,
        shape: 0,
        instance,
    };
    viewer.scene().store().instance_records(&slot).unwrap()[0].1
}

fn fill_coords(viewer: &Viewer<HeadlessDevice>) -> Vec<f32> {
    viewer
        .scene()
        .store()
        .read_vertices("F.Cu", EntityKind::BatchColored, 0, VertexSpan::new(0, 4))
        .unwrap()
}

fn snapshot(viewer: &Viewer<HeadlessDevice>) -> (InstanceRecord, InstanceRecord, Vec<f32>, Vec<f32>) {
    let levels = viewer.scene().store().read_levels(&fill()).unwrap();
    (record(viewer, 0), record(viewer, 1), fill_coords(viewer), levels[0].levels.clone())
}

fn assert_mirrored(viewer: &Viewer<HeadlessDevice>) {
    let device = viewer.device();
    for entity in viewer.scene().store().entities() {
        assert!(entity.uniforms().mirrored_by(device));
        match entity {
            RenderEntity::Batch { lods, .. } => {
                for lod in lods {
                    assert!(lod.vertices.mirrored_by(device));
                    assert!(lod.visibility.mirrored_by(device));
                    assert!(lod.alpha.mirrored_by(device));
                    assert!(lod.indices.as_ref().map_or(true, |i| i.mirrored_by(device)));
                }
            }
            RenderEntity::Instanced { grid, .. } => {
                for lod in grid.levels() {
                    assert!(lod.vertices.mirrored_by(device));
                    assert!(lod.instances.mirrored_by(device));
                    assert!(lod.indices.as_ref().map_or(true, |i| i.mirrored_by(device)));
                }
            }
        }
    }
}

#[test]
fn test_pad_move_and_rotate_end_to_end() {
    let mut viewer = viewer();
    let pad = pad(0, 10.0, 10.0, [10.0, 10.0]);
    viewer.start_move(&[pad]).unwrap();
    viewer.update_move(2.0, 2.0).unwrap();
    assert_eq!(viewer.setup_component_rotation().unwrap(), Point::new(10.0, 10.0));
    viewer.add_rotation(PI).unwrap();

    let preview = record(&viewer, 0);
    assert_relative_eq!(preview.x, 10.0, epsilon = 1e-4);
    assert_relative_eq!(preview.y, 10.0, epsilon = 1e-4);
    let state = unpack(preview.packed);
    assert!(state.moving && state.visible);
    assert!(angular_distance(state.angle, PI) <= ANGLE_QUANTUM);
    assert_mirrored(&viewer);

    let summary = viewer.end_move().unwrap();
    let committed = record(&viewer, 0);
    assert_relative_eq!(committed.x, 12.0, epsilon = 1e-4);
    assert_relative_eq!(committed.y, 12.0, epsilon = 1e-4);
    let state = unpack(committed.packed);
    assert!(!state.moving && state.visible);
    assert!(angular_distance(state.angle, PI) <= ANGLE_QUANTUM);
    assert_eq!(summary.delta_x, 2.0);
    assert_eq!(summary.component_center, Some([10.0, 10.0]));
    assert_mirrored(&viewer);
}

#[test]
fn test_cancel_is_byte_identical() {
    let mut viewer = viewer();
    let before = snapshot(&viewer);
    viewer.start_move(&[pad(0, 10.0, 10.0, [10.0, 12.0]), fill()]).unwrap();
    viewer.update_move(5.0, -3.0).unwrap();
    viewer.cancel_move().unwrap();
    assert_eq!(snapshot(&viewer), before);
    assert!(!viewer.transform().is_active());
    assert_mirrored(&viewer);
}

#[test]
fn test_four_quarter_turns_restore_positions() {
    let mut viewer = viewer();
    let before = snapshot(&viewer);
    viewer
        .start_move(&[pad(0, 10.0, 10.0, [10.0, 12.0]), pad(1, 10.0, 14.0, [10.0, 12.0]), fill()])
        .unwrap();
    viewer.setup_component_rotation().unwrap();
    for _ in 0..4 {
        viewer.add_rotation(FRAC_PI_2).unwrap();
    }
    viewer.end_move().unwrap();

    let (a, b, coords, levels) = snapshot(&viewer);
    for (got, want) in [(a, before.0), (b, before.1)] {
        assert_relative_eq!(got.x, want.x, epsilon = 1e-4);
        assert_relative_eq!(got.y, want.y, epsilon = 1e-4);
        assert!(angular_distance(unpack(got.packed).angle, unpack(want.packed).angle) <= 2.0 * ANGLE_QUANTUM);
    }
    for (got, want) in coords.iter().zip(&before.2) {
        assert_relative_eq!(*got, *want, epsilon = 1e-4);
    }
    assert_eq!(levels, before.3);
    assert_mirrored(&viewer);
}

#[test]
fn test_flip_twice_is_a_no_op() {
    let mut viewer = viewer();
    let before = snapshot(&viewer);
    viewer.start_move(&[pad(1, 10.0, 14.0, [12.0, 12.0]), fill()]).unwrap();
    viewer.setup_component_rotation().unwrap();
    assert!(viewer.toggle_flip().unwrap());
    assert_relative_eq!(record(&viewer, 1).x, 14.0, epsilon = 1e-4);
    assert!(!viewer.toggle_flip().unwrap());
    viewer.end_move().unwrap();

    let (_, b, coords, _) = snapshot(&viewer);
    assert_eq!(b, before.1);
    assert_eq!(coords, before.2);
}

#[test]
fn test_stale_instance_index_resolved_by_position() {
    let mut viewer = viewer();
    // index 1 is stale: the object actually sits on instance 0
    let stale = ObjectRange::instanced(7, "F.Cu", ObjectKind::Pad, 0, 1, [9.5, 9.5, 10.5, 10.5]);
    viewer.hide(&stale);
    assert!(!unpack(record(&viewer, 0).packed).visible);
    assert!(unpack(record(&viewer, 1).packed).visible);
    assert!(viewer.is_hidden(7));

    viewer.show(&stale);
    assert!(unpack(record(&viewer, 0).packed).visible);
    assert_mirrored(&viewer);
}

#[test]
fn test_unplaced_object_is_not_resolved() {
    let mut viewer = viewer();
    let before = snapshot(&viewer);
    // index 0 exists but no pad lies near these bounds
    let elsewhere = ObjectRange::instanced(7, "F.Cu", ObjectKind::Pad, 0, 0, [49.5, 49.5, 50.5, 50.5]);
    viewer.hide(&elsewhere);
    assert!(!viewer.is_hidden(7));
    assert_eq!(snapshot(&viewer), before);

    viewer.highlight(&elsewhere);
    assert!(viewer.highlighted_ids().is_empty());
    assert_eq!(snapshot(&viewer), before);
}

#[test]
fn test_undo_redo_restores_both_copies() {
    let mut viewer = viewer();
    let before = snapshot(&viewer);
    viewer.start_move(&[pad(0, 10.0, 10.0, [10.0, 12.0]), fill()]).unwrap();
    viewer.setup_component_rotation().unwrap();
    viewer.add_rotation(FRAC_PI_2).unwrap();
    viewer.update_move(1.0, 1.0).unwrap();
    viewer.end_move().unwrap();
    let after = snapshot(&viewer);
    assert_ne!(after, before);

    assert!(viewer.undo().unwrap());
    assert_eq!(snapshot(&viewer), before);
    assert_mirrored(&viewer);
    assert!(!viewer.transform().has_local_cache());

    assert!(viewer.redo().unwrap());
    assert_eq!(snapshot(&viewer), after);
    assert_mirrored(&viewer);
    assert!(!viewer.redo().unwrap());
}

#[test]
fn test_undo_refused_during_session() {
    let mut viewer = viewer();
    let id = viewer.start_move(&[pad(0, 10.0, 10.0, [10.0, 12.0])]).unwrap();
    assert_eq!(viewer.undo(), Err(TransformError::SessionActive(id)));
    viewer.cancel_move().unwrap();
    assert_eq!(viewer.undo(), Ok(false));
}

#[test]
fn test_highlight_and_reload_drop_local_cache() {
    let mut viewer = viewer();
    let members = [pad(0, 10.0, 10.0, [10.0, 12.0]), fill()];
    viewer.start_move(&members).unwrap();
    viewer.setup_component_rotation().unwrap();
    viewer.end_move().unwrap();
    assert!(viewer.transform().has_local_cache());

    viewer.highlight(&fill());
    assert!(!viewer.transform().has_local_cache());
    assert_eq!(viewer.highlighted_ids(), vec![100]);
    assert_eq!(viewer.scene().store().read_levels(&fill()).unwrap()[0].levels, vec![2.0; 4]);
    assert_mirrored(&viewer);

    viewer.start_move(&members).unwrap();
    viewer.setup_component_rotation().unwrap();
    viewer.add_rotation(FRAC_PI_2).unwrap();
    viewer.end_move().unwrap();
    assert!(viewer.transform().has_local_cache());
    assert!(viewer.history().can_undo());

    viewer.load_layer(layer()).unwrap();
    assert!(!viewer.transform().has_local_cache());
    assert!(!viewer.history().can_undo());
    assert_eq!(fill_coords(&viewer), FILL.to_vec());
    assert_mirrored(&viewer);
}

#[test]
fn test_frames_follow_the_redraw_flag() {
    let mut viewer = viewer();
    let stats = viewer.render_frame(12.0).unwrap();
    assert_eq!(stats.tier, 0);
    assert_eq!(stats.layers_drawn, 1);
    assert!(viewer.render_frame(12.0).is_none());

    viewer.start_move(&[pad(0, 10.0, 10.0, [10.0, 12.0])]).unwrap();
    viewer.update_move(3.0, 4.0).unwrap();
    let stats = viewer.render_frame(0.1).unwrap();
    assert_eq!(stats.tier, 4);
    assert!(stats.draw_calls > 0);
    assert_mirrored(&viewer);
}
