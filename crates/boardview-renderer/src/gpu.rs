//! The seam between the renderer and the graphics device.
//!
//! The renderer only ever creates buffers, writes byte ranges into them and
//! issues draws. It never reads a buffer back: every read is served from the
//! CPU shadow copy held next to the buffer (see [`crate::synced`]).

use boardview_core::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    Instance,
    Visibility,
    Alpha,
    Uniform,
}

/// Which pass of the frame a draw belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawPass {
    Layer,
    ViasOnTop,
    DrcOverlay,
}

impl DrawPass {
    pub const COUNT: usize = 3;

    /// Slot of this pass in an entity's uniform buffer.
    pub fn uniform_slot(self) -> usize {
        match self {
            DrawPass::Layer => 0,
            DrawPass::ViasOnTop => 1,
            DrawPass::DrcOverlay => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBinding {
    pub buffer: BufferId,
    pub count: u32,
}

/// One draw submission. Built on the stack each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub pass: DrawPass,
    pub pipeline: EntityKind,
    pub vertices: BufferId,
    pub vertex_count: u32,
    pub indices: Option<IndexBinding>,
    /// Per-vertex visibility (batched) or per-instance records (instanced).
    pub state: BufferId,
    pub alpha: Option<BufferId>,
    pub instance_count: u32,
    pub uniforms: BufferId,
    pub uniform_offset: u64,
}

impl DrawCall {
    pub fn is_indexed(&self) -> bool {
        self.indices.is_some()
    }
}

pub trait GpuDevice {
    fn create_buffer(&mut self, label: &str, usage: BufferUsage, contents: &[u8]) -> BufferId;

    /// Overwrite `data.len()` bytes starting at `byte_offset`.
    fn write_buffer(&mut self, buffer: BufferId, byte_offset: u64, data: &[u8]);

    fn destroy_buffer(&mut self, buffer: BufferId);

    fn draw(&mut self, call: &DrawCall);

    /// Close the current batch of writes and draws.
    fn submit(&mut self);
}

#[derive(Debug)]
struct HeadlessBuffer {
    label: String,
    bytes: Vec<u8>,
}

/// In-memory device: keeps every buffer's bytes and records draws.
///
/// Used by tests and the CLI to observe exactly what would reach a GPU.
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    buffers: Vec<Option<HeadlessBuffer>>,
    draws: Vec<DrawCall>,
    writes: usize,
    submissions: usize,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&self, id: BufferId) -> Option<&HeadlessBuffer> {
        self.buffers.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub fn buffer_bytes(&self, id: BufferId) -> Option<&[u8]> {
        self.buffer(id).map(|b| b.bytes.as_slice())
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }

    pub fn draws(&self) -> &[DrawCall] {
        &self.draws
    }

    pub fn take_draws(&mut self) -> Vec<DrawCall> {
        std::mem::take(&mut self.draws)
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn submissions(&self) -> usize {
        self.submissions
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_buffer(&mut self, label: &str, usage: BufferUsage, contents: &[u8]) -> BufferId {
        let id = BufferId(self.buffers.len() as u32);
        log::trace!("buffer {} '{}': {:?}, {} bytes", id.0, label, usage, contents.len());
        self.buffers.push(Some(HeadlessBuffer {
            label: label.to_string(),
            bytes: contents.to_vec(),
        }));
        id
    }

    fn write_buffer(&mut self, buffer: BufferId, byte_offset: u64, data: &[u8]) {
        let Some(Some(target)) = self.buffers.get_mut(buffer.0 as usize) else {
            log::error!("write to unknown buffer {:?}", buffer);
            return;
        };
        let start = byte_offset as usize;
        let end = start + data.len();
        if end > target.bytes.len() {
            log::error!(
                "write {}..{} overruns buffer '{}' of {} bytes",
                start,
                end,
                target.label,
                target.bytes.len()
            );
            return;
        }
        target.bytes[start..end].copy_from_slice(data);
        self.writes += 1;
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(slot) = self.buffers.get_mut(buffer.0 as usize) {
            *slot = None;
        }
    }

    fn draw(&mut self, call: &DrawCall) {
        self.draws.push(*call);
    }

    fn submit(&mut self) {
        self.submissions += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_write_and_destroy() {
        let mut device = HeadlessDevice::new();
        let id = device.create_buffer("test", BufferUsage::Vertex, &[0u8; 8]);
        device.write_buffer(id, 4, &[1, 2, 3, 4]);
        assert_eq!(device.buffer_bytes(id).unwrap(), &[0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(device.writes(), 1);
        device.destroy_buffer(id);
        assert!(device.buffer_bytes(id).is_none());
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_headless_rejects_overrun() {
        let mut device = HeadlessDevice::new();
        let id = device.create_buffer("small", BufferUsage::Uniform, &[0u8; 4]);
        device.write_buffer(id, 2, &[9, 9, 9, 9]);
        assert_eq!(device.buffer_bytes(id).unwrap(), &[0, 0, 0, 0]);
        assert_eq!(device.writes(), 0);
    }
}
