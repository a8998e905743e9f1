//! Interactive move, rotate and flip of a selection.
//!
//! A session snapshots every member when it starts and marks it as moving.
//! Translation always rides the entity uniform (the shader offsets moving
//! geometry), so dragging costs nothing per object. Rotation and flip about a
//! pivot are rewritten into the buffers from the snapshot on every change;
//! without a pivot, rotation rides the uniform too and spins each instance
//! about its own placement. Batched objects in such a session are turned
//! about their own bounds center when the session is committed.
//!
//! Flipping a session that has no pivot installs one at the center of the
//! selection's bounds. From then on the whole accumulated rotation, including
//! any applied before the flip, is taken about that pivot, exactly as if the
//! pivot had been set up first.
//!
//! `end_move` bakes the whole placement into the buffers and clears the
//! moving state; `cancel_move` writes the snapshot back.

use std::collections::{BTreeMap, HashMap};

use boardview_core::object::union_bounds;
use boardview_core::packed::{normalize_angle, with_moving};
use boardview_core::{
    BatchLevel, EntityKind, InstanceRecord, ObjectId, ObjectRange, Placement, Point, VertexSpan,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::gpu::GpuDevice;
use crate::history::{BufferPatch, TransformCommand};
use crate::scene::SceneState;
use crate::store::{log_skipped, GeometryStore, InstanceSlot, SpanLevels};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("no transform session is active")]
    NoSession,

    #[error("transform session {0} is still active")]
    SessionActive(Uuid),

    #[error("nothing in the selection could be moved")]
    EmptySelection,

    #[error("selection does not belong to a single component")]
    MixedComponents,

    #[error("no member of component {0} carries a component center")]
    MissingComponentCenter(String),
}

/// Move state handed to every entity uniform each frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveUniform {
    pub offset: [f32; 2],
    pub rotation: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ObjectOffset {
    pub dx: f32,
    pub dy: f32,
}

/// What the layout authority is told when a session is committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformSummary {
    pub session_id: Uuid,
    pub object_ids: Vec<ObjectId>,
    pub delta_x: f32,
    pub delta_y: f32,
    pub rotation_radians: f32,
    pub per_object_offsets: BTreeMap<ObjectId, ObjectOffset>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_center: Option<[f32; 2]>,
    pub flipped: bool,
}

/// Result of `end_move`: the summary plus the undoable record of the writes.
#[derive(Debug)]
pub struct CommittedTransform {
    pub summary: TransformSummary,
    pub command: TransformCommand,
}

#[derive(Debug)]
enum MemberState {
    Instanced {
        slot: InstanceSlot,
        originals: Vec<(usize, InstanceRecord)>,
    },
    Batched {
        levels: Vec<SpanLevels>,
    },
}

#[derive(Debug)]
struct Member {
    range: ObjectRange,
    state: MemberState,
}

/// Coordinates of one span, absolute and relative to the pivot.
#[derive(Debug, Clone)]
struct SpanCoords {
    lod: usize,
    first_vertex: usize,
    world: Vec<f32>,
    local: Vec<Point>,
}

/// Batched member geometry relative to a pivot.
///
/// Built when a pivot is established; kept after commit (moved along with
/// the objects) so the next rotation of the same component can start from
/// it without reading the buffers again.
#[derive(Debug, Clone)]
struct LocalFrame {
    component: Option<String>,
    center: Point,
    members: Vec<ObjectId>,
    spans: HashMap<ObjectId, Vec<SpanCoords>>,
}

impl LocalFrame {
    fn matches(&self, component: &str, members: &[ObjectId]) -> bool {
        self.component.as_deref() == Some(component) && self.members == members
    }

    /// Advance to where the committed placement left the objects.
    fn fold(&mut self, placement: &Placement) {
        self.center = placement.apply(self.center);
        for spans in self.spans.values_mut() {
            for span in spans.iter_mut() {
                for local in span.local.iter_mut() {
                    *local = placement.apply_local(*local);
                }
                span.world = absolute(self.center, &span.local);
            }
        }
    }
}

fn absolute(center: Point, local: &[Point]) -> Vec<f32> {
    local
        .iter()
        .flat_map(|p| [center.x + p.x, center.y + p.y])
        .collect()
}

fn batched_ids(members: &[Member]) -> Vec<ObjectId> {
    let mut ids: Vec<ObjectId> = members
        .iter()
        .filter(|m| matches!(m.state, MemberState::Batched { .. }))
        .map(|m| m.range.id)
        .collect();
    ids.sort_unstable();
    ids
}

#[derive(Debug)]
struct Pivot {
    center: Point,
    frame: LocalFrame,
}

#[derive(Debug)]
struct TransformSession {
    id: Uuid,
    members: Vec<Member>,
    offset: Point,
    rotation: f32,
    flips: u32,
    pivot: Option<Pivot>,
}

impl TransformSession {
    fn flipped(&self) -> bool {
        self.flips % 2 == 1
    }
}

#[derive(Debug, Default)]
pub struct TransformEngine {
    session: Option<TransformSession>,
    cache: Option<LocalFrame>,
}

impl TransformEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn session_offset(&self) -> Option<Point> {
        self.session.as_ref().map(|s| s.offset)
    }

    pub fn pivot(&self) -> Option<Point> {
        self.session.as_ref()?.pivot.as_ref().map(|p| p.center)
    }

    /// Uniform move state for this frame.
    pub fn frame_uniform(&self) -> MoveUniform {
        match &self.session {
            Some(session) => MoveUniform {
                offset: session.offset.to_array(),
                rotation: if session.pivot.is_some() { 0.0 } else { session.rotation },
            },
            None => MoveUniform::default(),
        }
    }

    pub fn has_local_cache(&self) -> bool {
        self.cache.is_some()
    }

    /// Forget cached local coordinates, e.g. after geometry changed under them.
    pub fn invalidate_local_cache(&mut self) {
        if self.cache.take().is_some() {
            log::debug!("local coordinate cache dropped");
        }
    }

    pub fn start_move(
        &mut self,
        scene: &mut SceneState,
        device: &mut dyn GpuDevice,
        ranges: &[ObjectRange],
    ) -> Result<Uuid, TransformError> {
        if let Some(session) = &self.session {
            return Err(TransformError::SessionActive(session.id));
        }
        let tolerance = scene.config.position_tolerance;
        let store = &mut scene.store;
        let mut members: Vec<Member> = Vec::with_capacity(ranges.len());

        for range in ranges {
            if members.iter().any(|m| m.range.id == range.id) {
                continue;
            }
            let state = if range.is_instanced() {
                let Some(slot) = store.resolve_instance(range, tolerance) else {
                    continue;
                };
                let originals = match store.instance_records(&slot) {
                    Ok(records) if !records.is_empty() => records,
                    Ok(_) => continue,
                    Err(e) => {
                        log_skipped(range.id, &e);
                        continue;
                    }
                };
                if let Err(e) = store.update_instance(device, &slot, |w| with_moving(w, true)) {
                    log_skipped(range.id, &e);
                }
                MemberState::Instanced { slot, originals }
            } else {
                let levels = match store.read_levels(range) {
                    Ok(levels) if !levels.is_empty() => levels,
                    Ok(_) => continue,
                    Err(e) => {
                        log_skipped(range.id, &e);
                        continue;
                    }
                };
                let moving = BatchLevel::Moving.value();
                let result = store.update_levels(device, range, |level| {
                    if BatchLevel::from_value(level) == BatchLevel::Hidden {
                        level
                    } else {
                        moving
                    }
                });
                if let Err(e) = result {
                    log_skipped(range.id, &e);
                }
                MemberState::Batched { levels }
            };
            members.push(Member {
                range: range.clone(),
                state,
            });
        }

        if members.is_empty() {
            return Err(TransformError::EmptySelection);
        }

        let id = Uuid::new_v4();
        log::info!("transform session {} started with {} objects", id, members.len());
        self.session = Some(TransformSession {
            id,
            members,
            offset: Point::ORIGIN,
            rotation: 0.0,
            flips: 0,
            pivot: None,
        });
        scene.mark_dirty();
        device.submit();
        Ok(id)
    }

    /// Pivot the session about the component center shared by its members.
    pub fn setup_component_rotation(
        &mut self,
        scene: &mut SceneState,
        device: &mut dyn GpuDevice,
    ) -> Result<Point, TransformError> {
        let session = self.session.as_mut().ok_or(TransformError::NoSession)?;

        let mut component: Option<&str> = None;
        for member in &session.members {
            match (member.range.component_ref.as_deref(), component) {
                (None, _) => return Err(TransformError::MixedComponents),
                (Some(c), Some(seen)) if c != seen => return Err(TransformError::MixedComponents),
                (Some(c), _) => component = Some(c),
            }
        }
        let Some(component) = component.map(str::to_string) else {
            return Err(TransformError::EmptySelection);
        };
        let center = session
            .members
            .iter()
            .find_map(|m| m.range.component_center)
            .map(Point::from_array)
            .ok_or_else(|| TransformError::MissingComponentCenter(component.clone()))?;

        let ids = batched_ids(&session.members);
        let frame = match self.cache.take() {
            Some(cached) if cached.matches(&component, &ids) => {
                log::debug!("reusing local coordinates of component {}", component);
                cached
            }
            other => {
                self.cache = other;
                // A pivot set earlier in this session already holds the
                // untransformed coordinates; the buffers may not.
                let previous = session.pivot.take().map(|p| p.frame);
                build_frame(&scene.store, &session.members, center, previous.as_ref(), Some(component))
            }
        };
        let center = frame.center;
        session.pivot = Some(Pivot { center, frame });
        write_preview(session, &mut scene.store, device);
        log::debug!("session {} pivots about ({}, {})", session.id, center.x, center.y);
        scene.mark_dirty();
        device.submit();
        Ok(center)
    }

    /// Set the absolute translation of the session.
    pub fn update_move(&mut self, scene: &mut SceneState, dx: f32, dy: f32) -> Result<(), TransformError> {
        let session = self.session.as_mut().ok_or(TransformError::NoSession)?;
        session.offset = Point::new(dx, dy);
        scene.mark_dirty();
        Ok(())
    }

    pub fn add_rotation(
        &mut self,
        scene: &mut SceneState,
        device: &mut dyn GpuDevice,
        delta: f32,
    ) -> Result<f32, TransformError> {
        let session = self.session.as_mut().ok_or(TransformError::NoSession)?;
        session.rotation = normalize_angle(session.rotation + delta);
        if session.pivot.is_some() {
            write_preview(session, &mut scene.store, device);
            device.submit();
        }
        scene.mark_dirty();
        Ok(session.rotation)
    }

    /// Mirror the selection about the vertical line through the pivot.
    ///
    /// Without a component pivot the center of the selection's bounds becomes
    /// the pivot, and rotation already accumulated is re-applied about it.
    pub fn toggle_flip(&mut self, scene: &mut SceneState, device: &mut dyn GpuDevice) -> Result<bool, TransformError> {
        let session = self.session.as_mut().ok_or(TransformError::NoSession)?;
        if session.pivot.is_none() {
            let center = union_bounds(session.members.iter().map(|m| &m.range))
                .map(|bb| bb.center())
                .ok_or(TransformError::EmptySelection)?;
            let frame = build_frame(&scene.store, &session.members, center, None, None);
            session.pivot = Some(Pivot { center, frame });
        }
        session.flips += 1;
        write_preview(session, &mut scene.store, device);
        scene.mark_dirty();
        device.submit();
        Ok(session.flipped())
    }

    /// Bake the session into the buffers and clear the moving state.
    pub fn end_move(
        &mut self,
        scene: &mut SceneState,
        device: &mut dyn GpuDevice,
    ) -> Result<CommittedTransform, TransformError> {
        let session = self.session.take().ok_or(TransformError::NoSession)?;
        let flipped = session.flipped();
        let full = session
            .pivot
            .as_ref()
            .map(|p| Placement::new(p.center, session.rotation, flipped, session.offset));
        let store = &mut scene.store;
        let mut patches = Vec::new();
        let mut offsets = BTreeMap::new();

        for member in &session.members {
            let range = &member.range;
            let center = range.center();
            let moved = match &full {
                Some(placement) => placement.apply(center),
                None => center.translate(session.offset.x, session.offset.y),
            };
            offsets.insert(
                range.id,
                ObjectOffset {
                    dx: moved.x - center.x,
                    dy: moved.y - center.y,
                },
            );

            match &member.state {
                MemberState::Instanced { slot, originals } => {
                    for &(tier, before) in originals {
                        let placement = full.unwrap_or_else(|| {
                            Placement::new(before.position(), session.rotation, false, session.offset)
                        });
                        let p = placement.apply(before.position());
                        let after = InstanceRecord::new(p.x, p.y, placement.apply_word(before.packed, false));
                        match store.write_instance(device, slot, tier, after) {
                            Ok(()) if after != before => patches.push(BufferPatch::Instance {
                                slot: slot.clone(),
                                tier,
                                before,
                                after,
                            }),
                            Ok(()) => {}
                            Err(e) => log_skipped(range.id, &e),
                        }
                    }
                }
                MemberState::Batched { levels } => {
                    let kind = range.entity_kind();
                    let pivot_spans = session
                        .pivot
                        .as_ref()
                        .and_then(|p| p.frame.spans.get(&range.id));
                    match (&full, pivot_spans) {
                        (Some(placement), Some(spans)) => {
                            for span in spans {
                                let after = placed(placement, &span.local);
                                commit_vertices(store, device, &mut patches, range, kind, span.lod, span.first_vertex, span.world.clone(), after);
                            }
                        }
                        _ if session.offset != Point::ORIGIN || session.rotation != 0.0 => {
                            // no pivot: each object turns about its own bounds center
                            let own = Placement::new(center, session.rotation, false, session.offset);
                            for sl in levels {
                                let before = match store.read_vertices(&range.layer_id, kind, sl.lod, sl.span) {
                                    Ok(coords) => coords,
                                    Err(e) => {
                                        log_skipped(range.id, &e);
                                        continue;
                                    }
                                };
                                let after = if session.rotation == 0.0 {
                                    translated(&before, session.offset)
                                } else {
                                    mapped(&own, &before)
                                };
                                commit_vertices(store, device, &mut patches, range, kind, sl.lod, sl.span.start as usize, before, after);
                            }
                        }
                        _ => {}
                    }
                    restore_levels(store, device, range, levels);
                }
            }
        }

        let component_center = session.pivot.as_ref().map(|p| p.center.to_array());
        self.cache = match (session.pivot, &full) {
            (Some(mut pivot), Some(placement)) if pivot.frame.component.is_some() => {
                pivot.frame.fold(placement);
                Some(pivot.frame)
            }
            _ => None,
        };

        let summary = TransformSummary {
            session_id: session.id,
            object_ids: session.members.iter().map(|m| m.range.id).collect(),
            delta_x: session.offset.x,
            delta_y: session.offset.y,
            rotation_radians: session.rotation,
            per_object_offsets: offsets,
            component_center,
            flipped,
        };
        log::info!(
            "transform session {} committed: {} objects, delta ({}, {}), rotation {}, flipped {}",
            summary.session_id,
            summary.object_ids.len(),
            summary.delta_x,
            summary.delta_y,
            summary.rotation_radians,
            summary.flipped
        );
        let description = format!("Transform {} objects", summary.object_ids.len());
        let command = TransformCommand::new(session.id, description, patches);
        scene.mark_dirty();
        device.submit();
        Ok(CommittedTransform { summary, command })
    }

    /// Put every member back exactly as it was when the session started.
    pub fn cancel_move(&mut self, scene: &mut SceneState, device: &mut dyn GpuDevice) -> Result<(), TransformError> {
        let session = self.session.take().ok_or(TransformError::NoSession)?;
        let store = &mut scene.store;
        for member in &session.members {
            let range = &member.range;
            match &member.state {
                MemberState::Instanced { slot, originals } => {
                    for &(tier, record) in originals {
                        if let Err(e) = store.write_instance(device, slot, tier, record) {
                            log_skipped(range.id, &e);
                        }
                    }
                }
                MemberState::Batched { levels } => {
                    let kind = range.entity_kind();
                    if let Some(spans) = session.pivot.as_ref().and_then(|p| p.frame.spans.get(&range.id)) {
                        for span in spans {
                            if let Err(e) = store.write_vertices(device, &range.layer_id, kind, span.lod, span.first_vertex, &span.world) {
                                log_skipped(range.id, &e);
                            }
                        }
                    }
                    restore_levels(store, device, range, levels);
                }
            }
        }
        if let Some(pivot) = session.pivot {
            if pivot.frame.component.is_some() {
                self.cache = Some(pivot.frame);
            }
        }
        log::info!("transform session {} cancelled", session.id);
        scene.mark_dirty();
        device.submit();
        Ok(())
    }
}

/// Local coordinates of every batched member about `center`.
///
/// Absolute coordinates come from `previous` when given (it was built before
/// anything was written), otherwise from the buffers.
fn build_frame(
    store: &GeometryStore,
    members: &[Member],
    center: Point,
    previous: Option<&LocalFrame>,
    component: Option<String>,
) -> LocalFrame {
    let mut spans = HashMap::new();
    for member in members {
        let MemberState::Batched { levels } = &member.state else {
            continue;
        };
        let range = &member.range;
        let coords: Vec<SpanCoords> = match previous.and_then(|f| f.spans.get(&range.id)) {
            Some(earlier) => earlier
                .iter()
                .map(|s| SpanCoords {
                    lod: s.lod,
                    first_vertex: s.first_vertex,
                    local: relative(&s.world, center),
                    world: s.world.clone(),
                })
                .collect(),
            None => levels
                .iter()
                .filter_map(|sl| read_span(store, range, sl.lod, sl.span))
                .map(|(lod, first_vertex, world)| SpanCoords {
                    lod,
                    first_vertex,
                    local: relative(&world, center),
                    world,
                })
                .collect(),
        };
        spans.insert(range.id, coords);
    }
    LocalFrame {
        component,
        center,
        members: batched_ids(members),
        spans,
    }
}

fn read_span(store: &GeometryStore, range: &ObjectRange, lod: usize, span: VertexSpan) -> Option<(usize, usize, Vec<f32>)> {
    match store.read_vertices(&range.layer_id, range.entity_kind(), lod, span) {
        Ok(world) => Some((lod, span.start as usize, world)),
        Err(e) => {
            log_skipped(range.id, &e);
            None
        }
    }
}

fn relative(world: &[f32], center: Point) -> Vec<Point> {
    world
        .chunks_exact(2)
        .map(|c| Point::new(c[0] - center.x, c[1] - center.y))
        .collect()
}

fn translated(coords: &[f32], offset: Point) -> Vec<f32> {
    coords
        .chunks_exact(2)
        .flat_map(|c| [c[0] + offset.x, c[1] + offset.y])
        .collect()
}

fn mapped(placement: &Placement, coords: &[f32]) -> Vec<f32> {
    coords
        .chunks_exact(2)
        .flat_map(|c| placement.apply(Point::new(c[0], c[1])).to_array())
        .collect()
}

/// Absolute coordinates of local points under a placement about its center.
fn placed(placement: &Placement, local: &[Point]) -> Vec<f32> {
    let origin = placement.center();
    let offset = placement.offset();
    local
        .iter()
        .flat_map(|l| {
            let p = placement.apply_local(*l);
            [origin.x + p.x + offset.x, origin.y + p.y + offset.y]
        })
        .collect()
}

/// Rewrite the pivot members with flip and rotation, leaving translation
/// to the uniform.
fn write_preview(session: &TransformSession, store: &mut GeometryStore, device: &mut dyn GpuDevice) {
    let Some(pivot) = &session.pivot else {
        return;
    };
    let placement = Placement::new(pivot.center, session.rotation, session.flipped(), Point::ORIGIN);
    for member in &session.members {
        let range = &member.range;
        match &member.state {
            MemberState::Instanced { slot, originals } => {
                for &(tier, original) in originals {
                    let p = placement.apply(original.position());
                    let record = InstanceRecord::new(p.x, p.y, placement.apply_word(original.packed, true));
                    if let Err(e) = store.write_instance(device, slot, tier, record) {
                        log_skipped(range.id, &e);
                    }
                }
            }
            MemberState::Batched { .. } => {
                let Some(spans) = pivot.frame.spans.get(&range.id) else {
                    continue;
                };
                let kind = range.entity_kind();
                for span in spans {
                    let coords = placed(&placement, &span.local);
                    if let Err(e) = store.write_vertices(device, &range.layer_id, kind, span.lod, span.first_vertex, &coords) {
                        log_skipped(range.id, &e);
                    }
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn commit_vertices(
    store: &mut GeometryStore,
    device: &mut dyn GpuDevice,
    patches: &mut Vec<BufferPatch>,
    range: &ObjectRange,
    kind: EntityKind,
    lod: usize,
    first_vertex: usize,
    before: Vec<f32>,
    after: Vec<f32>,
) {
    match store.write_vertices(device, &range.layer_id, kind, lod, first_vertex, &after) {
        Ok(()) => patches.push(BufferPatch::Vertices {
            layer_id: range.layer_id.clone(),
            kind,
            lod,
            first_vertex,
            before,
            after,
        }),
        Err(e) => log_skipped(range.id, &e),
    }
}

fn restore_levels(store: &mut GeometryStore, device: &mut dyn GpuDevice, range: &ObjectRange, levels: &[SpanLevels]) {
    let kind = range.entity_kind();
    for sl in levels {
        if let Err(e) = store.write_levels(device, &range.layer_id, kind, sl.lod, sl.span.start as usize, &sl.levels) {
            log_skipped(range.id, &e);
        }
    }
}
