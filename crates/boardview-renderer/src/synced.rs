//! A GPU buffer and its CPU shadow, owned together.
//!
//! All writes go through [`SyncedBuffer::write`] (or the helpers built on it),
//! which updates the shadow and then the device with the same bytes. Reads
//! only ever look at the shadow.

use std::ops::Range;

use bytemuck::Pod;
use thiserror::Error;

use crate::gpu::{BufferId, BufferUsage, GpuDevice, HeadlessDevice};

/// Contents used for buffers that would otherwise be empty; devices reject
/// zero-sized bindings.
const PLACEHOLDER: [u8; 4] = [0; 4];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("write of {len} elements at {offset} exceeds buffer of {capacity}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
}

#[derive(Debug)]
pub struct SyncedBuffer<T: Pod> {
    shadow: Vec<T>,
    gpu: BufferId,
}

impl<T: Pod> SyncedBuffer<T> {
    pub fn new(device: &mut dyn GpuDevice, label: &str, usage: BufferUsage, data: Vec<T>) -> Self {
        let gpu = if data.is_empty() {
            device.create_buffer(label, usage, &PLACEHOLDER)
        } else {
            device.create_buffer(label, usage, bytemuck::cast_slice(&data))
        };
        Self { shadow: data, gpu }
    }

    pub fn gpu(&self) -> BufferId {
        self.gpu
    }

    pub fn as_slice(&self) -> &[T] {
        &self.shadow
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.shadow.get(index)
    }

    pub fn len(&self) -> usize {
        self.shadow.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shadow.is_empty()
    }

    pub fn byte_len(&self) -> usize {
        std::mem::size_of_val(self.shadow.as_slice())
    }

    fn check(&self, offset: usize, len: usize) -> Result<Range<usize>, BufferError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.shadow.len() => Ok(offset..end),
            _ => Err(BufferError::OutOfBounds {
                offset,
                len,
                capacity: self.shadow.len(),
            }),
        }
    }

    fn upload(&self, device: &mut dyn GpuDevice, range: Range<usize>) {
        let byte_offset = (range.start * std::mem::size_of::<T>()) as u64;
        device.write_buffer(self.gpu, byte_offset, bytemuck::cast_slice(&self.shadow[range]));
    }

    /// Overwrite `data.len()` elements starting at element `offset`.
    pub fn write(
        &mut self,
        device: &mut dyn GpuDevice,
        offset: usize,
        data: &[T],
    ) -> Result<(), BufferError> {
        let range = self.check(offset, data.len())?;
        self.shadow[range.clone()].copy_from_slice(data);
        self.upload(device, range);
        Ok(())
    }

    pub fn set(&mut self, device: &mut dyn GpuDevice, index: usize, value: T) -> Result<(), BufferError> {
        self.write(device, index, std::slice::from_ref(&value))
    }

    /// Rewrite a range in place. The device only sees the range if `f`
    /// changed at least one element.
    pub fn update(
        &mut self,
        device: &mut dyn GpuDevice,
        range: Range<usize>,
        mut f: impl FnMut(&mut T),
    ) -> Result<bool, BufferError> {
        let range = self.check(range.start, range.len())?;
        let mut changed = false;
        for value in &mut self.shadow[range.clone()] {
            let before = *value;
            f(value);
            changed |= bytemuck::bytes_of(&before) != bytemuck::bytes_of(value);
        }
        if changed {
            self.upload(device, range);
        }
        Ok(changed)
    }

    /// Copy of a range of the shadow.
    pub fn read(&self, range: Range<usize>) -> Result<Vec<T>, BufferError> {
        let range = self.check(range.start, range.len())?;
        Ok(self.shadow[range].to_vec())
    }

    pub fn release(self, device: &mut dyn GpuDevice) {
        device.destroy_buffer(self.gpu);
    }

    /// True if the headless device holds exactly the shadow's bytes.
    pub fn mirrored_by(&self, device: &HeadlessDevice) -> bool {
        match device.buffer_bytes(self.gpu) {
            Some(bytes) if self.shadow.is_empty() => bytes == PLACEHOLDER,
            Some(bytes) => bytes == bytemuck::cast_slice::<T, u8>(&self.shadow),
            None => false,
        }
    }
}
