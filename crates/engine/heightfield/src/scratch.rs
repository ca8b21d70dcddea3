//! Caller-supplied scratch memory for height field edits
//!
//! `set_heights` and `set_materials` borrow temporary buffers from an
//! allocator passed in per call and hand every buffer back before returning,
//! on success and on failure. The shape never keeps a reference to it.

/// Source of transient per-call buffers
///
/// Buffers are returned zero-filled with exactly the requested length.
pub trait ScratchAllocator {
    fn alloc_f32(&mut self, len: usize) -> Vec<f32>;
    fn free_f32(&mut self, buffer: Vec<f32>);
    fn alloc_u16(&mut self, len: usize) -> Vec<u16>;
    fn free_u16(&mut self, buffer: Vec<u16>);
}

/// Allocates from the heap on every request and drops on release
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapScratch;

impl ScratchAllocator for HeapScratch {
    fn alloc_f32(&mut self, len: usize) -> Vec<f32> {
        vec![0.0; len]
    }

    fn free_f32(&mut self, _buffer: Vec<f32>) {}

    fn alloc_u16(&mut self, len: usize) -> Vec<u16> {
        vec![0; len]
    }

    fn free_u16(&mut self, _buffer: Vec<u16>) {}
}

/// Recycles buffers between calls
///
/// Keeps released buffers around so repeated edits of similar size stop
/// allocating after the first call. `outstanding()` counts buffers handed
/// out and not yet returned.
#[derive(Debug, Default)]
pub struct ScratchPool {
    f32_buffers: Vec<Vec<f32>>,
    u16_buffers: Vec<Vec<u16>>,
    outstanding: usize,
}

impl ScratchPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers currently lent out
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Buffers waiting for reuse
    pub fn pooled(&self) -> usize {
        self.f32_buffers.len() + self.u16_buffers.len()
    }

    /// Drop every pooled buffer
    pub fn clear(&mut self) {
        self.f32_buffers.clear();
        self.u16_buffers.clear();
    }
}

fn take<T: Copy + Default>(pool: &mut Vec<Vec<T>>, len: usize) -> Vec<T> {
    let mut buffer = pool.pop().unwrap_or_default();
    buffer.clear();
    buffer.resize(len, T::default());
    buffer
}

impl ScratchAllocator for ScratchPool {
    fn alloc_f32(&mut self, len: usize) -> Vec<f32> {
        self.outstanding += 1;
        take(&mut self.f32_buffers, len)
    }

    fn free_f32(&mut self, buffer: Vec<f32>) {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.f32_buffers.push(buffer);
    }

    fn alloc_u16(&mut self, len: usize) -> Vec<u16> {
        self.outstanding += 1;
        take(&mut self.u16_buffers, len)
    }

    fn free_u16(&mut self, buffer: Vec<u16>) {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.u16_buffers.push(buffer);
    }
}
