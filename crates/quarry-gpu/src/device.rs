//! The abstract device boundary the core calls into.

use bitflags::bitflags;
use thiserror::Error;

/// GPU-side error type.
#[derive(Error, Debug, Clone)]
pub enum GpuError {
    /// Buffer or memory allocation failed
    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    /// Mapping host-visible memory failed
    #[error("map failed: {0}")]
    MapFailed(String),

    /// A handle did not refer to a live resource
    #[error("invalid handle")]
    InvalidHandle,

    /// Transfer submission failed
    #[error("transfer failed: {0}")]
    TransferFailed(String),
}

/// Result alias for device operations.
pub type Result<T> = std::result::Result<T, GpuError>;

/// Opaque handle to a device buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

impl BufferHandle {
    /// The null handle
    pub const NULL: Self = Self(0);

    /// Whether this is the null handle
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Opaque handle to the memory backing a buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GpuAllocation {
    /// Device-assigned allocation id
    pub id: u64,
    /// Allocation size in bytes
    pub size: u64,
}

bitflags! {
    /// Buffer usage flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BufferUsage: u32 {
        /// Vertex input
        const VERTEX = 1 << 0;
        /// Index input
        const INDEX = 1 << 1;
        /// Shader storage
        const STORAGE = 1 << 2;
        /// Transfer source
        const TRANSFER_SRC = 1 << 3;
        /// Transfer destination
        const TRANSFER_DST = 1 << 4;
    }
}

bitflags! {
    /// Memory property flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MemoryFlags: u32 {
        /// Fast device-only memory
        const DEVICE_LOCAL = 1 << 0;
        /// Mappable from the host
        const HOST_VISIBLE = 1 << 1;
        /// No explicit flush needed after host writes
        const HOST_COHERENT = 1 << 2;
    }
}

/// The device operations the core consumes.
///
/// The renderer provides the real implementation over its graphics API;
/// the core calls these and nothing else.
pub trait GpuDevice: Send + Sync {
    /// Create a buffer with backing memory.
    fn create_buffer(
        &self,
        size: u64,
        usage: BufferUsage,
        memory: MemoryFlags,
    ) -> Result<(BufferHandle, GpuAllocation)>;

    /// Map host-visible memory.
    ///
    /// The pointer stays valid until [`unmap`](GpuDevice::unmap); the
    /// caller must not destroy the buffer while it is mapped.
    fn map(&self, allocation: &GpuAllocation) -> Result<*mut u8>;

    /// Unmap a previously mapped allocation.
    fn unmap(&self, allocation: &GpuAllocation);

    /// Destroy a buffer and free its memory.
    fn destroy_buffer(&self, buffer: BufferHandle, allocation: GpuAllocation);

    /// Synchronously copy between device buffers. Used only on upload
    /// fallback paths where memory is not host-visible.
    fn submit_transfer(&self, src: BufferHandle, dst: BufferHandle, size: u64) -> Result<()>;
}
