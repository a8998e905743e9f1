//! Hide, show and highlight individual objects by rewriting their state in
//! place: per-vertex levels for batched geometry, flag bits of the packed
//! word for instances.

use std::collections::BTreeMap;

use boardview_core::packed::{with_highlighted, with_visible};
use boardview_core::{BatchLevel, ObjectId, ObjectRange};

use crate::gpu::GpuDevice;
use crate::scene::SceneState;
use crate::store::log_skipped;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StateEdit {
    Hide,
    Show,
    Highlight,
    Unhighlight,
}

impl StateEdit {
    fn level(self, level: f32) -> f32 {
        let current = BatchLevel::from_value(level);
        match self {
            StateEdit::Hide => BatchLevel::Hidden.value(),
            StateEdit::Show => BatchLevel::Normal.value(),
            StateEdit::Highlight if current == BatchLevel::Normal => BatchLevel::Highlighted.value(),
            StateEdit::Unhighlight if current == BatchLevel::Highlighted => BatchLevel::Normal.value(),
            StateEdit::Highlight | StateEdit::Unhighlight => level,
        }
    }

    fn word(self, word: u32) -> u32 {
        match self {
            StateEdit::Hide => with_visible(word, false),
            StateEdit::Show => with_visible(word, true),
            StateEdit::Highlight => with_highlighted(word, true),
            StateEdit::Unhighlight => with_highlighted(word, false),
        }
    }
}

/// Write `edit` into every copy of the object's state. Returns false when
/// the object could not be found in the loaded geometry.
fn apply(scene: &mut SceneState, device: &mut dyn GpuDevice, range: &ObjectRange, edit: StateEdit) -> bool {
    let tolerance = scene.config.position_tolerance;
    let store = &mut scene.store;
    let result = if range.is_instanced() {
        match store.resolve_instance(range, tolerance) {
            Some(slot) => store.update_instance(device, &slot, |w| edit.word(w)),
            None => return false,
        }
    } else {
        store.update_levels(device, range, |l| edit.level(l))
    };
    match result {
        Ok(written) => written > 0,
        Err(e) => {
            log_skipped(range.id, &e);
            false
        }
    }
}

/// Tracks which objects are hidden or highlighted through it.
#[derive(Debug, Default)]
pub struct VisibilityEngine {
    highlighted: Vec<ObjectRange>,
    hidden: BTreeMap<ObjectId, ObjectRange>,
}

impl VisibilityEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hide(&mut self, scene: &mut SceneState, device: &mut dyn GpuDevice, range: &ObjectRange) {
        self.hide_many(scene, device, std::slice::from_ref(range));
    }

    pub fn show(&mut self, scene: &mut SceneState, device: &mut dyn GpuDevice, range: &ObjectRange) {
        self.show_many(scene, device, std::slice::from_ref(range));
    }

    pub fn hide_many(&mut self, scene: &mut SceneState, device: &mut dyn GpuDevice, ranges: &[ObjectRange]) {
        for range in ranges {
            if apply(scene, device, range, StateEdit::Hide) {
                self.hidden.insert(range.id, range.clone());
            }
        }
        scene.mark_dirty();
        device.submit();
    }

    pub fn show_many(&mut self, scene: &mut SceneState, device: &mut dyn GpuDevice, ranges: &[ObjectRange]) {
        for range in ranges {
            apply(scene, device, range, StateEdit::Show);
            self.hidden.remove(&range.id);
        }
        scene.mark_dirty();
        device.submit();
    }

    /// Show every object hidden through this engine. Returns how many.
    pub fn show_all_hidden(&mut self, scene: &mut SceneState, device: &mut dyn GpuDevice) -> usize {
        let hidden = std::mem::take(&mut self.hidden);
        for range in hidden.values() {
            apply(scene, device, range, StateEdit::Show);
        }
        scene.mark_dirty();
        device.submit();
        hidden.len()
    }

    pub fn is_hidden(&self, id: ObjectId) -> bool {
        self.hidden.contains_key(&id)
    }

    pub fn hidden_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.hidden.keys().copied()
    }

    pub fn highlight(&mut self, scene: &mut SceneState, device: &mut dyn GpuDevice, range: &ObjectRange) {
        self.highlight_multiple(scene, device, std::slice::from_ref(range));
    }

    /// Replace the highlight set. Hidden objects are marked but stay hidden.
    pub fn highlight_multiple(&mut self, scene: &mut SceneState, device: &mut dyn GpuDevice, ranges: &[ObjectRange]) {
        self.unhighlight_current(scene, device);
        for range in ranges {
            if apply(scene, device, range, StateEdit::Highlight) {
                self.highlighted.push(range.clone());
            }
        }
        log::debug!("highlighted {} of {} objects", self.highlighted.len(), ranges.len());
        scene.mark_dirty();
        device.submit();
    }

    pub fn clear_highlight(&mut self, scene: &mut SceneState, device: &mut dyn GpuDevice) {
        self.unhighlight_current(scene, device);
        scene.mark_dirty();
        device.submit();
    }

    fn unhighlight_current(&mut self, scene: &mut SceneState, device: &mut dyn GpuDevice) {
        for range in std::mem::take(&mut self.highlighted) {
            apply(scene, device, &range, StateEdit::Unhighlight);
        }
    }

    pub fn highlighted_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.highlighted.iter().map(|r| r.id)
    }

    pub fn highlighted(&self) -> &[ObjectRange] {
        &self.highlighted
    }
}
