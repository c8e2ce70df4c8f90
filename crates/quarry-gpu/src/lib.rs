//! GPU device boundary and the asynchronous upload pipeline.
//!
//! The engine core never talks to a graphics API directly: it depends on
//! the [`GpuDevice`] trait for buffer create/destroy, map/unmap, and
//! transfer submission. The renderer supplies the real implementation;
//! [`headless::HeadlessDevice`] backs tests and headless embeddings.

pub mod device;
pub mod headless;
pub mod instance;
pub mod uploader;

pub use device::{BufferHandle, BufferUsage, GpuAllocation, GpuDevice, GpuError, MemoryFlags};
pub use instance::{FaceInstance, FaceInstanceData};
pub use uploader::{AsyncUploader, BufferInfo, GpuPayload};
