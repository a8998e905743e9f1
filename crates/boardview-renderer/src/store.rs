//! GPU-resident geometry, organized as render entities per layer.
//!
//! Every layer owns up to four entities, one per [`EntityKind`]. Batched
//! entities keep an ordered LOD list; instanced entities keep a
//! [`ShapeLodGrid`] addressed by `(lod, shape)`.

use std::collections::HashMap;
use std::ops::Range;

use boardview_core::payload::{DecodedLod, MAX_BATCH_LODS};
use boardview_core::{
    EntityKind, InstanceLocator, InstanceRecord, LayerPayload, ObjectRange, PayloadError, Rgba,
    VertexSpan,
};
use bytemuck::{Pod, Zeroable};
use serde::Serialize;
use thiserror::Error;

use crate::gpu::{BufferUsage, DrawPass, GpuDevice};
use crate::synced::{BufferError, SyncedBuffer};

/// LOD tiers per shape in an instanced entity.
pub const INSTANCED_TIERS: usize = 3;

/// Per-entity uniform block, one per draw pass.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct EntityUniforms {
    pub color: Rgba,
    pub move_offset: [f32; 2],
    pub move_rotation: f32,
    pub _pad: f32,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("layer '{layer}' has no {kind} entity")]
    MissingEntity { layer: String, kind: &'static str },

    #[error("{kind} entity on '{layer}' has no LOD {lod} for shape {shape}")]
    MissingLod {
        layer: String,
        kind: &'static str,
        lod: usize,
        shape: usize,
    },

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

impl StoreError {
    /// The reference points at geometry that is not (or no longer) loaded.
    pub fn is_stale(&self) -> bool {
        !matches!(self, StoreError::Buffer(_))
    }

    fn missing(layer: &str, kind: EntityKind) -> Self {
        StoreError::MissingEntity {
            layer: layer.to_string(),
            kind: kind.label(),
        }
    }
}

/// Log a skipped write at the level its cause deserves.
pub(crate) fn log_skipped(object: u64, err: &StoreError) {
    if err.is_stale() {
        log::debug!("object {}: {}", object, err);
    } else {
        log::warn!("object {}: skipped write: {}", object, err);
    }
}

fn float_range(span: VertexSpan) -> Range<usize> {
    let r = span.range();
    r.start * 2..r.end * 2
}

#[derive(Debug)]
pub struct BatchLod {
    pub vertices: SyncedBuffer<f32>,
    pub vertex_count: u32,
    pub indices: Option<SyncedBuffer<u32>>,
    pub visibility: SyncedBuffer<f32>,
    pub alpha: SyncedBuffer<f32>,
}

impl BatchLod {
    fn upload(device: &mut dyn GpuDevice, label: &str, lod: DecodedLod) -> Self {
        Self {
            vertex_count: lod.vertex_count as u32,
            vertices: SyncedBuffer::new(device, &format!("{label}/vertices"), BufferUsage::Vertex, lod.vertices),
            indices: lod
                .indices
                .map(|i| SyncedBuffer::new(device, &format!("{label}/indices"), BufferUsage::Index, i)),
            visibility: SyncedBuffer::new(
                device,
                &format!("{label}/visibility"),
                BufferUsage::Visibility,
                lod.visibility,
            ),
            alpha: SyncedBuffer::new(device, &format!("{label}/alpha"), BufferUsage::Alpha, lod.alpha),
        }
    }

    fn byte_len(&self) -> usize {
        self.vertices.byte_len()
            + self.indices.as_ref().map_or(0, SyncedBuffer::byte_len)
            + self.visibility.byte_len()
            + self.alpha.byte_len()
    }

    fn release(self, device: &mut dyn GpuDevice) {
        self.vertices.release(device);
        if let Some(indices) = self.indices {
            indices.release(device);
        }
        self.visibility.release(device);
        self.alpha.release(device);
    }
}

#[derive(Debug)]
pub struct InstancedLod {
    pub vertices: SyncedBuffer<f32>,
    pub vertex_count: u32,
    pub indices: Option<SyncedBuffer<u32>>,
    pub instances: SyncedBuffer<InstanceRecord>,
}

impl InstancedLod {
    fn upload(device: &mut dyn GpuDevice, label: &str, lod: DecodedLod) -> Self {
        Self {
            vertex_count: lod.vertex_count as u32,
            vertices: SyncedBuffer::new(device, &format!("{label}/vertices"), BufferUsage::Vertex, lod.vertices),
            indices: lod
                .indices
                .map(|i| SyncedBuffer::new(device, &format!("{label}/indices"), BufferUsage::Index, i)),
            instances: SyncedBuffer::new(
                device,
                &format!("{label}/instances"),
                BufferUsage::Instance,
                lod.instances,
            ),
        }
    }

    pub fn instance_count(&self) -> u32 {
        self.instances.len() as u32
    }

    fn byte_len(&self) -> usize {
        self.vertices.byte_len()
            + self.indices.as_ref().map_or(0, SyncedBuffer::byte_len)
            + self.instances.byte_len()
    }

    fn release(self, device: &mut dyn GpuDevice) {
        self.vertices.release(device);
        if let Some(indices) = self.indices {
            indices.release(device);
        }
        self.instances.release(device);
    }
}

/// LOD levels of an instanced entity, stored `lod * shapes + shape`.
#[derive(Debug)]
pub struct ShapeLodGrid<T> {
    tiers: usize,
    shapes: usize,
    levels: Vec<T>,
}

impl<T> ShapeLodGrid<T> {
    /// A list whose length is not a positive multiple of [`INSTANCED_TIERS`]
    /// is taken as a single tier of shapes.
    pub fn new(levels: Vec<T>) -> Self {
        let len = levels.len();
        let (tiers, shapes) = if len > 0 && len % INSTANCED_TIERS == 0 {
            (INSTANCED_TIERS, len / INSTANCED_TIERS)
        } else {
            (1, len)
        };
        Self {
            tiers,
            shapes,
            levels,
        }
    }

    pub fn tiers(&self) -> usize {
        self.tiers
    }

    pub fn shapes(&self) -> usize {
        self.shapes
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn index(&self, lod: usize, shape: usize) -> Option<usize> {
        (lod < self.tiers && shape < self.shapes).then(|| lod * self.shapes + shape)
    }

    pub fn get(&self, lod: usize, shape: usize) -> Option<&T> {
        self.index(lod, shape).map(|i| &self.levels[i])
    }

    pub fn get_mut(&mut self, lod: usize, shape: usize) -> Option<&mut T> {
        self.index(lod, shape).map(move |i| &mut self.levels[i])
    }

    /// All shapes of one tier.
    pub fn tier(&self, lod: usize) -> &[T] {
        if lod < self.tiers {
            &self.levels[lod * self.shapes..(lod + 1) * self.shapes]
        } else {
            &[]
        }
    }

    pub fn levels(&self) -> &[T] {
        &self.levels
    }

    fn into_levels(self) -> Vec<T> {
        self.levels
    }
}

/// The unit of GPU submission for one `(layer, kind)`.
#[derive(Debug)]
pub enum RenderEntity {
    Batch {
        kind: EntityKind,
        lods: Vec<BatchLod>,
        uniforms: SyncedBuffer<EntityUniforms>,
    },
    Instanced {
        kind: EntityKind,
        grid: ShapeLodGrid<InstancedLod>,
        uniforms: SyncedBuffer<EntityUniforms>,
    },
}

impl RenderEntity {
    fn upload(device: &mut dyn GpuDevice, layer_id: &str, kind: EntityKind, lods: Vec<DecodedLod>) -> Self {
        let uniforms = SyncedBuffer::new(
            device,
            &format!("{layer_id}/{}/uniforms", kind.label()),
            BufferUsage::Uniform,
            vec![EntityUniforms::default(); DrawPass::COUNT],
        );
        let labelled = lods
            .into_iter()
            .enumerate()
            .map(|(i, lod)| (format!("{layer_id}/{}/lod{i}", kind.label()), lod));
        if kind.is_instanced() {
            let levels = labelled
                .map(|(label, lod)| InstancedLod::upload(device, &label, lod))
                .collect();
            RenderEntity::Instanced {
                kind,
                grid: ShapeLodGrid::new(levels),
                uniforms,
            }
        } else {
            let lods = labelled
                .map(|(label, lod)| BatchLod::upload(device, &label, lod))
                .collect();
            RenderEntity::Batch {
                kind,
                lods,
                uniforms,
            }
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            RenderEntity::Batch { kind, .. } | RenderEntity::Instanced { kind, .. } => *kind,
        }
    }

    pub fn uniforms(&self) -> &SyncedBuffer<EntityUniforms> {
        match self {
            RenderEntity::Batch { uniforms, .. } | RenderEntity::Instanced { uniforms, .. } => uniforms,
        }
    }

    pub fn lod_count(&self) -> usize {
        match self {
            RenderEntity::Batch { lods, .. } => lods.len(),
            RenderEntity::Instanced { grid, .. } => grid.len(),
        }
    }

    pub fn instance_count(&self) -> usize {
        match self {
            RenderEntity::Batch { .. } => 0,
            RenderEntity::Instanced { grid, .. } => grid
                .tier(0)
                .iter()
                .map(|lod| lod.instances.len())
                .sum(),
        }
    }

    pub fn byte_len(&self) -> usize {
        match self {
            RenderEntity::Batch { lods, uniforms, .. } => {
                uniforms.byte_len() + lods.iter().map(BatchLod::byte_len).sum::<usize>()
            }
            RenderEntity::Instanced { grid, uniforms, .. } => {
                uniforms.byte_len() + grid.levels().iter().map(InstancedLod::byte_len).sum::<usize>()
            }
        }
    }

    fn release(self, device: &mut dyn GpuDevice) {
        match self {
            RenderEntity::Batch { lods, uniforms, .. } => {
                lods.into_iter().for_each(|lod| lod.release(device));
                uniforms.release(device);
            }
            RenderEntity::Instanced { grid, uniforms, .. } => {
                grid.into_levels().into_iter().for_each(|lod| lod.release(device));
                uniforms.release(device);
            }
        }
    }
}

/// One instance of one shape, across all of that shape's tiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceSlot {
    pub layer_id: String,
    pub kind: EntityKind,
    pub shape: usize,
    pub instance: usize,
}

/// Batched vertex span of one LOD together with its state levels.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanLevels {
    pub lod: usize,
    pub span: VertexSpan,
    pub levels: Vec<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub entities: usize,
    pub lods: usize,
    pub instances: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub layers: usize,
    pub entities: usize,
    pub lods: usize,
    pub bytes: usize,
}

type EntitySlots = [Option<RenderEntity>; 4];

/// All render entities, keyed by layer id and indexed by [`EntityKind::slot`].
#[derive(Debug, Default)]
pub struct GeometryStore {
    layers: HashMap<String, EntitySlots>,
}

impl GeometryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode and upload every entity of a layer payload.
    ///
    /// Nothing is uploaded unless every channel decodes; a payload for a
    /// layer that is already loaded replaces its entities.
    pub fn load_layer(
        &mut self,
        device: &mut dyn GpuDevice,
        payload: LayerPayload,
    ) -> Result<LoadSummary, PayloadError> {
        let layer_id = payload.layer_id;
        let mut decoded = Vec::new();
        for (kind, lods) in payload.geometry.into_entries() {
            if !kind.is_instanced() && lods.len() > MAX_BATCH_LODS {
                return Err(PayloadError::TooManyLods {
                    kind: kind.label(),
                    count: lods.len(),
                    max: MAX_BATCH_LODS,
                });
            }
            let stride = if kind == EntityKind::InstancedRot { 3 } else { 2 };
            let lods = lods
                .into_iter()
                .map(|lod| lod.decode(stride))
                .collect::<Result<Vec<_>, _>>()?;
            decoded.push((kind, lods));
        }

        let mut slots = EntitySlots::default();
        let mut summary = LoadSummary::default();
        for (kind, lods) in decoded {
            let entity = RenderEntity::upload(device, &layer_id, kind, lods);
            summary.entities += 1;
            summary.lods += entity.lod_count();
            summary.instances += entity.instance_count();
            summary.bytes += entity.byte_len();
            slots[kind.slot()] = Some(entity);
        }

        if let Some(old) = self.layers.insert(layer_id.clone(), slots) {
            log::debug!("replacing geometry of layer '{}'", layer_id);
            old.into_iter().flatten().for_each(|e| e.release(device));
        }
        log::info!(
            "loaded layer '{}': {} entities, {} LODs, {} instances, {} bytes",
            layer_id,
            summary.entities,
            summary.lods,
            summary.instances,
            summary.bytes
        );
        Ok(summary)
    }

    /// Drop a layer's entities and their buffers.
    pub fn unload_layer_geometry(&mut self, device: &mut dyn GpuDevice, layer_id: &str) -> bool {
        match self.layers.remove(layer_id) {
            Some(slots) => {
                slots.into_iter().flatten().for_each(|e| e.release(device));
                log::info!("unloaded geometry of layer '{}'", layer_id);
                true
            }
            None => false,
        }
    }

    pub fn contains_layer(&self, layer_id: &str) -> bool {
        self.layers.contains_key(layer_id)
    }

    pub fn layer_ids(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    pub fn entity(&self, layer_id: &str, kind: EntityKind) -> Option<&RenderEntity> {
        self.layers.get(layer_id)?[kind.slot()].as_ref()
    }

    pub fn entity_mut(&mut self, layer_id: &str, kind: EntityKind) -> Option<&mut RenderEntity> {
        self.layers.get_mut(layer_id)?[kind.slot()].as_mut()
    }

    pub fn entities(&self) -> impl Iterator<Item = &RenderEntity> {
        self.layers.values().flat_map(|slots| slots.iter().flatten())
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            layers: self.layers.len(),
            ..StoreStats::default()
        };
        for entity in self.entities() {
            stats.entities += 1;
            stats.lods += entity.lod_count();
            stats.bytes += entity.byte_len();
        }
        stats
    }

    // ── batched objects ────────────────────────────────────────────────

    fn batch_lods(&self, layer_id: &str, kind: EntityKind) -> Result<&[BatchLod], StoreError> {
        match self.entity(layer_id, kind) {
            Some(RenderEntity::Batch { lods, .. }) => Ok(lods),
            _ => Err(StoreError::missing(layer_id, kind)),
        }
    }

    fn batch_lod_mut(&mut self, layer_id: &str, kind: EntityKind, lod: usize) -> Result<&mut BatchLod, StoreError> {
        match self.entity_mut(layer_id, kind) {
            Some(RenderEntity::Batch { lods, .. }) => lods.get_mut(lod).ok_or(StoreError::MissingLod {
                layer: layer_id.to_string(),
                kind: kind.label(),
                lod,
                shape: 0,
            }),
            _ => Err(StoreError::missing(layer_id, kind)),
        }
    }

    /// Rewrite the state level of every vertex the object lists, in every LOD.
    ///
    /// A span that does not fit its LOD is skipped and logged; the other
    /// LODs are still written. Returns the number of spans written.
    pub fn update_levels(
        &mut self,
        device: &mut dyn GpuDevice,
        range: &ObjectRange,
        mut f: impl FnMut(f32) -> f32,
    ) -> Result<usize, StoreError> {
        let kind = range.entity_kind();
        let lods = match self.entity_mut(&range.layer_id, kind) {
            Some(RenderEntity::Batch { lods, .. }) => lods,
            _ => return Err(StoreError::missing(&range.layer_id, kind)),
        };
        let mut written = 0;
        for (lod_index, span) in range.vertex_ranges.iter().enumerate() {
            let Some(lod) = lods.get_mut(lod_index) else {
                log::debug!("object {}: no LOD {} on '{}'", range.id, lod_index, range.layer_id);
                continue;
            };
            match lod.visibility.update(device, span.range(), |v| *v = f(*v)) {
                Ok(_) => written += 1,
                Err(e) => log::warn!("object {}: skipping LOD {}: {}", range.id, lod_index, e),
            }
        }
        Ok(written)
    }

    /// Current state levels of every span the object lists.
    pub fn read_levels(&self, range: &ObjectRange) -> Result<Vec<SpanLevels>, StoreError> {
        let lods = self.batch_lods(&range.layer_id, range.entity_kind())?;
        let mut out = Vec::with_capacity(range.vertex_ranges.len());
        for (lod_index, span) in range.vertex_ranges.iter().enumerate() {
            let Some(lod) = lods.get(lod_index) else {
                continue;
            };
            match lod.visibility.read(span.range()) {
                Ok(levels) => out.push(SpanLevels {
                    lod: lod_index,
                    span: *span,
                    levels,
                }),
                Err(e) => log::warn!("object {}: skipping LOD {}: {}", range.id, lod_index, e),
            }
        }
        Ok(out)
    }

    pub fn write_levels(
        &mut self,
        device: &mut dyn GpuDevice,
        layer_id: &str,
        kind: EntityKind,
        lod: usize,
        first_vertex: usize,
        levels: &[f32],
    ) -> Result<(), StoreError> {
        let lod = self.batch_lod_mut(layer_id, kind, lod)?;
        lod.visibility.write(device, first_vertex, levels)?;
        Ok(())
    }

    /// Flat `[x, y, ...]` coordinates of a span.
    pub fn read_vertices(
        &self,
        layer_id: &str,
        kind: EntityKind,
        lod: usize,
        span: VertexSpan,
    ) -> Result<Vec<f32>, StoreError> {
        let lods = self.batch_lods(layer_id, kind)?;
        let lod_data = lods.get(lod).ok_or(StoreError::MissingLod {
            layer: layer_id.to_string(),
            kind: kind.label(),
            lod,
            shape: 0,
        })?;
        Ok(lod_data.vertices.read(float_range(span))?)
    }

    pub fn write_vertices(
        &mut self,
        device: &mut dyn GpuDevice,
        layer_id: &str,
        kind: EntityKind,
        lod: usize,
        first_vertex: usize,
        coords: &[f32],
    ) -> Result<(), StoreError> {
        let lod = self.batch_lod_mut(layer_id, kind, lod)?;
        lod.vertices.write(device, first_vertex * 2, coords)?;
        Ok(())
    }

    // ── instanced objects ──────────────────────────────────────────────

    fn grid(&self, layer_id: &str, kind: EntityKind) -> Result<&ShapeLodGrid<InstancedLod>, StoreError> {
        match self.entity(layer_id, kind) {
            Some(RenderEntity::Instanced { grid, .. }) => Ok(grid),
            _ => Err(StoreError::missing(layer_id, kind)),
        }
    }

    fn grid_mut(&mut self, layer_id: &str, kind: EntityKind) -> Result<&mut ShapeLodGrid<InstancedLod>, StoreError> {
        match self.entity_mut(layer_id, kind) {
            Some(RenderEntity::Instanced { grid, .. }) => Ok(grid),
            _ => Err(StoreError::missing(layer_id, kind)),
        }
    }

    /// Find the buffer slot of an instanced object.
    ///
    /// The supplied instance index is trusted when its LOD-0 placement lies
    /// within `tolerance` of the object's bounds center. Otherwise the
    /// nearest placement within tolerance wins; with none, the object is
    /// not resolved.
    pub fn resolve_instance(&self, range: &ObjectRange, tolerance: f32) -> Option<InstanceSlot> {
        let kind = range.entity_kind();
        let Some(shape) = range.shape_index.map(|s| s as usize) else {
            log::debug!("object {}: instanced object without shape index", range.id);
            return None;
        };
        let grid = match self.grid(&range.layer_id, kind) {
            Ok(grid) => grid,
            Err(e) => {
                log::debug!("object {}: {}", range.id, e);
                return None;
            }
        };
        let Some(base) = grid.get(0, shape) else {
            log::debug!("object {}: shape {} not loaded on '{}'", range.id, shape, range.layer_id);
            return None;
        };

        let records = base.instances.as_slice();
        let expected = range.center();
        let supplied = range
            .instance_index
            .map(|i| i as usize)
            .filter(|&i| i < records.len());
        let slot = |instance| InstanceSlot {
            layer_id: range.layer_id.clone(),
            kind,
            shape,
            instance,
        };

        if let Some(i) = supplied {
            if records[i].position().distance_to(&expected) <= tolerance {
                return Some(slot(i));
            }
        }
        if let Some(i) = InstanceLocator::build(records).nearest_within(expected, tolerance) {
            log::debug!(
                "object {}: instance index {:?} resolved to {} by position",
                range.id,
                range.instance_index,
                i
            );
            return Some(slot(i));
        }
        log::debug!(
            "object {}: no instance within {} of ({}, {}), dropped",
            range.id,
            tolerance,
            expected.x,
            expected.y
        );
        None
    }

    /// Rewrite the packed word of an instance in every tier of its shape.
    /// Returns the number of tiers written.
    pub fn update_instance(
        &mut self,
        device: &mut dyn GpuDevice,
        slot: &InstanceSlot,
        mut f: impl FnMut(u32) -> u32,
    ) -> Result<usize, StoreError> {
        let grid = self.grid_mut(&slot.layer_id, slot.kind)?;
        let mut written = 0;
        for tier in 0..grid.tiers() {
            let Some(lod) = grid.get_mut(tier, slot.shape) else {
                continue;
            };
            let range = slot.instance..slot.instance + 1;
            match lod.instances.update(device, range, |r| r.packed = f(r.packed)) {
                Ok(_) => written += 1,
                Err(e) => log::warn!(
                    "instance {} of shape {} on '{}': skipping tier {}: {}",
                    slot.instance,
                    slot.shape,
                    slot.layer_id,
                    tier,
                    e
                ),
            }
        }
        Ok(written)
    }

    /// The instance's record in every tier that has it, as `(tier, record)`.
    pub fn instance_records(&self, slot: &InstanceSlot) -> Result<Vec<(usize, InstanceRecord)>, StoreError> {
        let grid = self.grid(&slot.layer_id, slot.kind)?;
        Ok((0..grid.tiers())
            .filter_map(|tier| {
                let lod = grid.get(tier, slot.shape)?;
                lod.instances.get(slot.instance).map(|r| (tier, *r))
            })
            .collect())
    }

    pub fn write_instance(
        &mut self,
        device: &mut dyn GpuDevice,
        slot: &InstanceSlot,
        tier: usize,
        record: InstanceRecord,
    ) -> Result<(), StoreError> {
        let grid = self.grid_mut(&slot.layer_id, slot.kind)?;
        let lod = grid.get_mut(tier, slot.shape).ok_or(StoreError::MissingLod {
            layer: slot.layer_id.clone(),
            kind: slot.kind.label(),
            lod: tier,
            shape: slot.shape,
        })?;
        lod.instances.set(device, slot.instance, record)?;
        Ok(())
    }
}
