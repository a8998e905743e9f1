use boardview_core::{EntityKind, InstanceRecord};
use uuid::Uuid;

use crate::gpu::GpuDevice;
use crate::scene::SceneState;
use crate::store::InstanceSlot;

/// A reversible change to the scene.
pub trait Command: std::fmt::Debug {
    /// Apply (or re-apply) the change.
    fn execute(&mut self, scene: &mut SceneState, device: &mut dyn GpuDevice);
    /// Reverse the change.
    fn undo(&mut self, scene: &mut SceneState, device: &mut dyn GpuDevice);
    /// Human-readable description for the undo/redo history.
    fn description(&self) -> &str;
}

/// Before/after contents of one range of one buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferPatch {
    Instance {
        slot: InstanceSlot,
        tier: usize,
        before: InstanceRecord,
        after: InstanceRecord,
    },
    Vertices {
        layer_id: String,
        kind: EntityKind,
        lod: usize,
        first_vertex: usize,
        before: Vec<f32>,
        after: Vec<f32>,
    },
}

impl BufferPatch {
    fn write(&self, scene: &mut SceneState, device: &mut dyn GpuDevice, forward: bool) {
        let result = match self {
            BufferPatch::Instance {
                slot,
                tier,
                before,
                after,
            } => {
                let record = if forward { *after } else { *before };
                scene.store.write_instance(device, slot, *tier, record)
            }
            BufferPatch::Vertices {
                layer_id,
                kind,
                lod,
                first_vertex,
                before,
                after,
            } => {
                let coords = if forward { after } else { before };
                scene
                    .store
                    .write_vertices(device, layer_id, *kind, *lod, *first_vertex, coords)
            }
        };
        match result {
            Err(e) if e.is_stale() => log::debug!("history patch skipped: {}", e),
            Err(e) => log::warn!("history patch skipped: {}", e),
            Ok(()) => {}
        }
    }
}

/// A committed move/rotate/flip, replayable in both directions.
#[derive(Debug)]
pub struct TransformCommand {
    session_id: Uuid,
    description: String,
    patches: Vec<BufferPatch>,
}

impl TransformCommand {
    pub fn new(session_id: Uuid, description: String, patches: Vec<BufferPatch>) -> Self {
        Self {
            session_id,
            description,
            patches,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn patches(&self) -> &[BufferPatch] {
        &self.patches
    }
}

impl Command for TransformCommand {
    fn execute(&mut self, scene: &mut SceneState, device: &mut dyn GpuDevice) {
        for patch in &self.patches {
            patch.write(scene, device, true);
        }
        scene.mark_dirty();
        device.submit();
    }

    fn undo(&mut self, scene: &mut SceneState, device: &mut dyn GpuDevice) {
        for patch in self.patches.iter().rev() {
            patch.write(scene, device, false);
        }
        scene.mark_dirty();
        device.submit();
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Bounded undo/redo stacks.
#[derive(Debug)]
pub struct CommandHistory {
    undo_stack: Vec<Box<dyn Command>>,
    redo_stack: Vec<Box<dyn Command>>,
    limit: usize,
}

impl CommandHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            limit: limit.max(1),
        }
    }

    pub fn execute(&mut self, mut command: Box<dyn Command>, scene: &mut SceneState, device: &mut dyn GpuDevice) {
        command.execute(scene, device);
        self.record(command);
    }

    /// Push a command whose effect is already in place.
    pub fn record(&mut self, command: Box<dyn Command>) {
        self.undo_stack.push(command);
        // A new command invalidates everything that was undone.
        self.redo_stack.clear();
        if self.undo_stack.len() > self.limit {
            let excess = self.undo_stack.len() - self.limit;
            self.undo_stack.drain(..excess);
        }
    }

    pub fn undo(&mut self, scene: &mut SceneState, device: &mut dyn GpuDevice) -> bool {
        if let Some(mut command) = self.undo_stack.pop() {
            command.undo(scene, device);
            self.redo_stack.push(command);
            true
        } else {
            false
        }
    }

    pub fn redo(&mut self, scene: &mut SceneState, device: &mut dyn GpuDevice) -> bool {
        if let Some(mut command) = self.redo_stack.pop() {
            command.execute(scene, device);
            self.undo_stack.push(command);
            true
        } else {
            false
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<&str> {
        self.undo_stack.last().map(|c| c.description())
    }

    pub fn redo_description(&self) -> Option<&str> {
        self.redo_stack.last().map(|c| c.description())
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewerConfig;
    use crate::gpu::HeadlessDevice;
    use boardview_core::packed::pack;
    use boardview_core::{LayerPayload, LodPayload, VertexSpan};

    fn setup() -> (HeadlessDevice, SceneState) {
        let mut device = HeadlessDevice::new();
        let mut scene = SceneState::new(ViewerConfig::default());
        let via = LodPayload::new(vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0])
            .with_instance_records(&[InstanceRecord::new(1.0, 1.0, pack(true, false, false, 0.0))]);
        let payload = LayerPayload::new("F.Cu", "Top", [1.0; 4])
            .with_entity(EntityKind::Instanced, vec![via])
            .with_entity(EntityKind::Batch, vec![LodPayload::new(vec![0.0, 0.0, 1.0, 1.0])]);
        scene.load_layer(&mut device, payload).unwrap();
        (device, scene)
    }

    fn move_command(id: u128, dx: f32) -> Box<dyn Command> {
        let slot = InstanceSlot {
            layer_id: "F.Cu".into(),
            kind: EntityKind::Instanced,
            shape: 0,
            instance: 0,
        };
        let word = pack(true, false, false, 0.0);
        Box::new(TransformCommand::new(
            Uuid::from_u128(id),
            format!("Move by {dx}"),
            vec![
                BufferPatch::Instance {
                    slot,
                    tier: 0,
                    before: InstanceRecord::new(1.0, 1.0, word),
                    after: InstanceRecord::new(1.0 + dx, 1.0, word),
                },
                BufferPatch::Vertices {
                    layer_id: "F.Cu".into(),
                    kind: EntityKind::Batch,
                    lod: 0,
                    first_vertex: 0,
                    before: vec![0.0, 0.0, 1.0, 1.0],
                    after: vec![dx, 0.0, 1.0 + dx, 1.0],
                },
            ],
        ))
    }

    fn via_x(scene: &SceneState) -> f32 {
        let slot = InstanceSlot {
            layer_id: "F.Cu".into(),
            kind: EntityKind::Instanced,
            shape: 0,
            instance: 0,
        };
        scene.store().instance_records(&slot).unwrap()[0].1.x
    }

    #[test]
    fn test_undo_redo_roundtrip() {
        let (mut device, mut scene) = setup();
        let mut history = CommandHistory::new(10);
        history.execute(move_command(1, 3.0), &mut scene, &mut device);
        assert_eq!(via_x(&scene), 4.0);
        assert_eq!(history.undo_description(), Some("Move by 3"));

        assert!(history.undo(&mut scene, &mut device));
        assert_eq!(via_x(&scene), 1.0);
        let verts = scene
            .store()
            .read_vertices("F.Cu", EntityKind::Batch, 0, VertexSpan::new(0, 2))
            .unwrap();
        assert_eq!(verts, vec![0.0, 0.0, 1.0, 1.0]);
        assert!(history.can_redo());

        assert!(history.redo(&mut scene, &mut device));
        assert_eq!(via_x(&scene), 4.0);
        assert!(!history.redo(&mut scene, &mut device));
    }

    #[test]
    fn test_new_command_clears_redo() {
        let (mut device, mut scene) = setup();
        let mut history = CommandHistory::new(10);
        history.execute(move_command(1, 1.0), &mut scene, &mut device);
        history.undo(&mut scene, &mut device);
        history.execute(move_command(2, 2.0), &mut scene, &mut device);
        assert!(!history.can_redo());
        assert_eq!(history.undo_depth(), 1);
    }

    #[test]
    fn test_limit_drops_oldest() {
        let (mut device, mut scene) = setup();
        let mut history = CommandHistory::new(2);
        for i in 0..5 {
            history.execute(move_command(i, i as f32), &mut scene, &mut device);
        }
        assert_eq!(history.undo_depth(), 2);
        assert_eq!(history.undo_description(), Some("Move by 4"));
        history.clear();
        assert!(!history.can_undo());
    }
}
