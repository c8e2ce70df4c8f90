//! System-memory device for tests and headless embeddings.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::Mutex;

use crate::device::{
    BufferHandle, BufferUsage, GpuAllocation, GpuDevice, GpuError, MemoryFlags, Result,
};

struct HeadlessBuffer {
    data: Box<[u8]>,
}

/// A [`GpuDevice`] backed by host memory.
///
/// Tracks live buffers so tests can assert on retirement behavior, and can
/// be told to fail the next allocation to exercise error paths.
pub struct HeadlessDevice {
    buffers: Mutex<HashMap<u64, HeadlessBuffer>>,
    next_id: AtomicU64,
    fail_next_create: AtomicBool,
}

impl HeadlessDevice {
    /// Create an empty device
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            fail_next_create: AtomicBool::new(false),
        }
    }

    /// Number of live (created, not destroyed) buffers
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Whether a handle refers to a live buffer
    pub fn is_live(&self, buffer: BufferHandle) -> bool {
        self.buffers.lock().contains_key(&buffer.0)
    }

    /// Make the next `create_buffer` call fail
    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::Release);
    }

    /// Read back a buffer's contents
    pub fn read_buffer(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.buffers
            .lock()
            .get(&buffer.0)
            .map(|entry| entry.data.to_vec())
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_buffer(
        &self,
        size: u64,
        _usage: BufferUsage,
        _memory: MemoryFlags,
    ) -> Result<(BufferHandle, GpuAllocation)> {
        if self.fail_next_create.swap(false, Ordering::AcqRel) {
            return Err(GpuError::AllocationFailed(
                "simulated allocation failure".to_string(),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.buffers.lock().insert(
            id,
            HeadlessBuffer {
                data: vec![0u8; size as usize].into_boxed_slice(),
            },
        );

        Ok((BufferHandle(id), GpuAllocation { id, size }))
    }

    fn map(&self, allocation: &GpuAllocation) -> Result<*mut u8> {
        let mut buffers = self.buffers.lock();
        let buffer = buffers
            .get_mut(&allocation.id)
            .ok_or(GpuError::InvalidHandle)?;
        Ok(buffer.data.as_mut_ptr())
    }

    fn unmap(&self, _allocation: &GpuAllocation) {}

    fn destroy_buffer(&self, buffer: BufferHandle, _allocation: GpuAllocation) {
        self.buffers.lock().remove(&buffer.0);
    }

    fn submit_transfer(&self, src: BufferHandle, dst: BufferHandle, size: u64) -> Result<()> {
        let mut buffers = self.buffers.lock();
        let source = buffers
            .get(&src.0)
            .ok_or(GpuError::InvalidHandle)?
            .data
            .clone();
        let destination = buffers.get_mut(&dst.0).ok_or(GpuError::InvalidHandle)?;

        let length = size as usize;
        if length > source.len() || length > destination.data.len() {
            return Err(GpuError::TransferFailed("copy out of range".to_string()));
        }
        destination.data[..length].copy_from_slice(&source[..length]);
        Ok(())
    }
}
