//! Per-frame draw submission.
//!
//! Layers are drawn bottom to top in render order; within a layer the entity
//! order is fixed (fills, traces, pads, vias). Two optional passes follow:
//! vias redrawn on top of everything, then the DRC overlay.

use boardview_core::{EntityKind, Rgba, DRC_OVERLAY_LAYER_ID};
use serde::Serialize;

use crate::gpu::{DrawCall, DrawPass, GpuDevice, IndexBinding};
use crate::scene::SceneState;
use crate::store::{EntityUniforms, RenderEntity};
use crate::transform::MoveUniform;

pub const DEFAULT_LOD_BREAKPOINTS: [f32; 4] = [10.0, 5.0, 2.0, 0.5];

/// Number of batched LOD levels `select_lod` can return.
pub const LOD_LEVELS: usize = 5;

/// Detail level for a camera zoom: 0 is full detail, 4 the coarsest.
pub fn select_lod(zoom: f32) -> usize {
    select_lod_with(&DEFAULT_LOD_BREAKPOINTS, zoom)
}

pub fn select_lod_with(breakpoints: &[f32; 4], zoom: f32) -> usize {
    breakpoints
        .iter()
        .position(|&min_zoom| zoom >= min_zoom)
        .unwrap_or(LOD_LEVELS - 1)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameStats {
    pub tier: usize,
    pub draw_calls: usize,
    pub layers_drawn: usize,
}

#[derive(Debug, Clone, Copy)]
struct PassParams {
    pass: DrawPass,
    tier: usize,
    instanced_cap: usize,
    color: Rgba,
    motion: MoveUniform,
}

#[derive(Debug, Default)]
pub struct FrameCompositor {
    frames: u64,
}

impl FrameCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_drawn(&self) -> u64 {
        self.frames
    }

    /// Draw one frame if anything changed since the last one.
    pub fn render_frame(
        &mut self,
        scene: &mut SceneState,
        device: &mut dyn GpuDevice,
        zoom: f32,
        motion: MoveUniform,
    ) -> Option<FrameStats> {
        if !scene.take_redraw() {
            return None;
        }
        let tier = select_lod_with(&scene.config.lod_breakpoints, zoom);
        let instanced_cap = scene.config.instanced_tier_cap;
        let mut stats = FrameStats {
            tier,
            ..FrameStats::default()
        };
        let SceneState {
            config,
            layers,
            store,
            overlays,
            ..
        } = scene;

        for layer in layers.visible_layers() {
            let params = PassParams {
                pass: DrawPass::Layer,
                tier,
                instanced_cap,
                color: layer.color(),
                motion,
            };
            let mut drawn = 0;
            for kind in EntityKind::DRAW_ORDER {
                if let Some(entity) = store.entity_mut(&layer.id, kind) {
                    drawn += draw_entity(device, entity, &params);
                }
            }
            if drawn > 0 {
                stats.layers_drawn += 1;
            }
            stats.draw_calls += drawn;
        }

        if overlays.vias_on_top {
            for layer in layers.visible_layers() {
                if let Some(entity) = store.entity_mut(&layer.id, EntityKind::Instanced) {
                    let params = PassParams {
                        pass: DrawPass::ViasOnTop,
                        tier,
                        instanced_cap,
                        color: config.via_overlay_color,
                        motion,
                    };
                    stats.draw_calls += draw_entity(device, entity, &params);
                }
            }
        }

        if overlays.drc_overlay {
            if let Some(entity) = store.entity_mut(DRC_OVERLAY_LAYER_ID, EntityKind::Batch) {
                let params = PassParams {
                    pass: DrawPass::DrcOverlay,
                    tier: 0,
                    instanced_cap,
                    color: config.drc_overlay_color,
                    motion: MoveUniform::default(),
                };
                stats.draw_calls += draw_entity(device, entity, &params);
            }
        }

        device.submit();
        self.frames += 1;
        log::trace!(
            "frame {}: tier {}, {} draws over {} layers",
            self.frames,
            stats.tier,
            stats.draw_calls,
            stats.layers_drawn
        );
        Some(stats)
    }
}

fn index_binding(indices: Option<&crate::synced::SyncedBuffer<u32>>) -> Option<IndexBinding> {
    indices.map(|buffer| IndexBinding {
        buffer: buffer.gpu(),
        count: buffer.len() as u32,
    })
}

/// Write the pass uniforms and issue the entity's draws. Returns the draw count.
fn draw_entity(device: &mut dyn GpuDevice, entity: &mut RenderEntity, params: &PassParams) -> usize {
    let uniforms = EntityUniforms {
        color: params.color,
        move_offset: params.motion.offset,
        move_rotation: params.motion.rotation,
        _pad: 0.0,
    };
    let slot = params.pass.uniform_slot();
    let uniform_offset = (slot * std::mem::size_of::<EntityUniforms>()) as u64;

    match entity {
        RenderEntity::Batch { kind, lods, uniforms: buffer } => {
            let Some(lod) = lods.get(params.tier.min(lods.len().saturating_sub(1))) else {
                return 0;
            };
            if lod.vertex_count == 0 {
                return 0;
            }
            if let Err(e) = buffer.set(device, slot, uniforms) {
                log::warn!("{} uniforms: {}", kind.label(), e);
                return 0;
            }
            device.draw(&DrawCall {
                pass: params.pass,
                pipeline: *kind,
                vertices: lod.vertices.gpu(),
                vertex_count: lod.vertex_count,
                indices: index_binding(lod.indices.as_ref()),
                state: lod.visibility.gpu(),
                alpha: (*kind == EntityKind::BatchColored).then(|| lod.alpha.gpu()),
                instance_count: 1,
                uniforms: buffer.gpu(),
                uniform_offset,
            });
            1
        }
        RenderEntity::Instanced { kind, grid, uniforms: buffer } => {
            let tier = params
                .tier
                .min(params.instanced_cap)
                .min(grid.tiers().saturating_sub(1));
            let shapes = grid.tier(tier);
            if shapes.iter().all(|lod| lod.instances.is_empty() || lod.vertex_count == 0) {
                return 0;
            }
            if let Err(e) = buffer.set(device, slot, uniforms) {
                log::warn!("{} uniforms: {}", kind.label(), e);
                return 0;
            }
            let mut draws = 0;
            for lod in shapes {
                if lod.instances.is_empty() || lod.vertex_count == 0 {
                    continue;
                }
                device.draw(&DrawCall {
                    pass: params.pass,
                    pipeline: *kind,
                    vertices: lod.vertices.gpu(),
                    vertex_count: lod.vertex_count,
                    indices: index_binding(lod.indices.as_ref()),
                    state: lod.instances.gpu(),
                    alpha: None,
                    instance_count: lod.instance_count(),
                    uniforms: buffer.gpu(),
                    uniform_offset,
                });
                draws += 1;
            }
            draws
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewerConfig;
    use crate::gpu::HeadlessDevice;
    use boardview_core::packed::pack;
    use boardview_core::{InstanceRecord, LayerPayload, LodPayload};

    const TRI: [f32; 6] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0];

    fn via_lods(count: usize) -> Vec<LodPayload> {
        let records = [InstanceRecord::new(3.0, 3.0, pack(true, false, false, 0.0))];
        (0..count)
            .map(|_| LodPayload::new(TRI.to_vec()).with_instance_records(&records))
            .collect()
    }

    fn scene(device: &mut HeadlessDevice) -> SceneState {
        let mut scene = SceneState::new(ViewerConfig::default());
        let top = LayerPayload::new("F.Cu", "Top", [1.0, 0.0, 0.0, 1.0])
            .with_entity(EntityKind::Instanced, via_lods(3))
            .with_entity(
                EntityKind::Batch,
                vec![
                    LodPayload::new(TRI.to_vec()).with_indices(vec![0, 1, 2]),
                    LodPayload::new(TRI.to_vec()),
                ],
            )
            .with_entity(EntityKind::BatchColored, vec![LodPayload::new(TRI.to_vec())]);
        let bottom = LayerPayload::new("B.Cu", "Bottom", [0.0, 0.0, 1.0, 1.0])
            .with_entity(EntityKind::Batch, vec![LodPayload::new(TRI.to_vec())]);
        scene.load_layer(device, top).unwrap();
        scene.load_layer(device, bottom).unwrap();
        scene
    }

    #[test]
    fn test_select_lod_breakpoints() {
        assert_eq!(select_lod(12.0), 0);
        assert_eq!(select_lod(10.0), 0);
        assert_eq!(select_lod(7.0), 1);
        assert_eq!(select_lod(3.0), 2);
        assert_eq!(select_lod(0.6), 3);
        assert_eq!(select_lod(0.1), 4);
        assert_eq!(select_lod(f32::NAN), 4);
    }

    #[test]
    fn test_select_lod_is_monotonic() {
        let mut last = 0;
        for step in (1..2000).rev() {
            let lod = select_lod(step as f32 * 0.01);
            assert!(lod >= last);
            last = lod;
        }
    }

    #[test]
    fn test_no_draw_without_redraw_flag() {
        let mut device = HeadlessDevice::new();
        let mut scene = scene(&mut device);
        let mut compositor = FrameCompositor::new();
        assert!(compositor.render_frame(&mut scene, &mut device, 20.0, MoveUniform::default()).is_some());
        device.take_draws();
        assert!(compositor.render_frame(&mut scene, &mut device, 20.0, MoveUniform::default()).is_none());
        assert!(device.draws().is_empty());
        assert_eq!(compositor.frames_drawn(), 1);
    }

    #[test]
    fn test_draw_order_and_indexing() {
        let mut device = HeadlessDevice::new();
        let mut scene = scene(&mut device);
        let stats = FrameCompositor::new()
            .render_frame(&mut scene, &mut device, 20.0, MoveUniform::default())
            .unwrap();
        assert_eq!(stats, FrameStats { tier: 0, draw_calls: 4, layers_drawn: 2 });
        let pipelines: Vec<EntityKind> = device.draws().iter().map(|d| d.pipeline).collect();
        assert_eq!(
            pipelines,
            [EntityKind::BatchColored, EntityKind::Batch, EntityKind::Instanced, EntityKind::Batch]
        );
        assert!(device.draws()[1].is_indexed());
        assert!(!device.draws()[0].is_indexed());
        assert!(device.draws()[0].alpha.is_some());
        assert_eq!(device.draws()[2].instance_count, 1);
    }

    #[test]
    fn test_tier_clamping() {
        let mut device = HeadlessDevice::new();
        let mut scene = scene(&mut device);
        let stats = FrameCompositor::new()
            .render_frame(&mut scene, &mut device, 0.1, MoveUniform::default())
            .unwrap();
        assert_eq!(stats.tier, 4);
        let top_batch = match scene.store().entity("F.Cu", EntityKind::Batch) {
            Some(RenderEntity::Batch { lods, .. }) => lods[1].vertices.gpu(),
            _ => unreachable!(),
        };
        let top_vias = match scene.store().entity("F.Cu", EntityKind::Instanced) {
            Some(RenderEntity::Instanced { grid, .. }) => grid.get(2, 0).map(|l| l.vertices.gpu()),
            _ => unreachable!(),
        };
        assert!(device.draws().iter().any(|d| d.vertices == top_batch));
        assert!(device.draws().iter().any(|d| Some(d.vertices) == top_vias));
    }

    #[test]
    fn test_hidden_layer_skipped_and_color_written() {
        let mut device = HeadlessDevice::new();
        let mut scene = scene(&mut device);
        scene.set_layer_visible("F.Cu", false);
        scene.set_layer_color("B.Cu", [0.5, 0.5, 0.5, 1.0]);
        let stats = FrameCompositor::new()
            .render_frame(&mut scene, &mut device, 20.0, MoveUniform { offset: [1.0, 2.0], rotation: 0.0 })
            .unwrap();
        assert_eq!(stats.layers_drawn, 1);
        let entity = scene.store().entity("B.Cu", EntityKind::Batch).unwrap();
        let uniforms = entity.uniforms().as_slice()[DrawPass::Layer.uniform_slot()];
        assert_eq!(uniforms.color, [0.5, 0.5, 0.5, 1.0]);
        assert_eq!(uniforms.move_offset, [1.0, 2.0]);
        assert!(entity.uniforms().mirrored_by(&device));
    }

    #[test]
    fn test_overlay_passes_come_last() {
        let mut device = HeadlessDevice::new();
        let mut scene = scene(&mut device);
        let overlay = LayerPayload::new(DRC_OVERLAY_LAYER_ID, "DRC", [1.0, 0.0, 0.0, 0.5])
            .with_entity(EntityKind::Batch, vec![LodPayload::new(TRI.to_vec())]);
        scene.load_layer(&mut device, overlay).unwrap();
        scene.set_vias_on_top(true);
        scene.set_drc_overlay_visible(true);
        let stats = FrameCompositor::new()
            .render_frame(&mut scene, &mut device, 20.0, MoveUniform::default())
            .unwrap();
        assert_eq!(stats.draw_calls, 6);
        let passes: Vec<DrawPass> = device.draws().iter().map(|d| d.pass).collect();
        assert_eq!(passes[4], DrawPass::ViasOnTop);
        assert_eq!(passes[5], DrawPass::DrcOverlay);
        let vias = scene.store().entity("F.Cu", EntityKind::Instanced).unwrap();
        let gold = vias.uniforms().as_slice()[DrawPass::ViasOnTop.uniform_slot()].color;
        assert_eq!(gold, scene.config().via_overlay_color);
        assert_eq!(device.draws()[4].uniform_offset, std::mem::size_of::<EntityUniforms>() as u64);
    }
}
