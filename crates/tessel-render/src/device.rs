//! Graphics Device Abstraction
//!
//! The narrow surface the light system needs from a GPU backend: resident
//! buffers it can write from the CPU, and a command recorder that clears
//! buffers and issues compute dispatches.

use bitflags::bitflags;
use smallvec::SmallVec;
use tessel_core::Handle;

use crate::RenderResult;

/// Marker for device buffer handles
#[derive(Debug)]
pub enum DeviceBuffer {}

/// Opaque handle to a device-resident buffer
pub type BufferHandle = Handle<DeviceBuffer>;

bitflags! {
    /// How a buffer will be used
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Written from the CPU every frame
        const UPLOAD = 1 << 0;
        /// Read by shaders as a structured buffer
        const STORAGE = 1 << 1;
        /// Written by compute shaders
        const UNORDERED_ACCESS = 1 << 2;
        /// Cleared by the command recorder
        const CLEARABLE = 1 << 3;
    }
}

/// Buffer allocation request
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    /// Debug label
    pub label: &'a str,
    /// Size in bytes
    pub size: u64,
    /// Intended usage
    pub usage: BufferUsage,
}

/// Device-side buffer allocation and CPU writes
pub trait GraphicsDevice {
    /// Allocate a resident buffer
    fn allocate_buffer(&self, desc: &BufferDesc<'_>) -> RenderResult<BufferHandle>;

    /// Release a buffer. The backend defers destruction until the GPU is done with it.
    fn release_buffer(&self, buffer: BufferHandle);

    /// Size of a live buffer in bytes
    fn buffer_size(&self, buffer: BufferHandle) -> RenderResult<u64>;

    /// Copy `data` into a buffer at `offset`
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()>;
}

/// Compute kernels the culling driver dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullingKernel {
    /// Builds one view-space frustum per screen tile
    GridFrustums,
    /// Intersects lights with tile frustums and writes per-tile index lists
    CullLights,
}

impl CullingKernel {
    /// Debug name
    pub fn name(&self) -> &'static str {
        match self {
            Self::GridFrustums => "grid_frustums",
            Self::CullLights => "cull_lights",
        }
    }
}

/// Buffer bound to a kernel binding slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferBinding {
    /// Binding index in the kernel's bind group
    pub binding: u32,
    /// Bound buffer
    pub buffer: BufferHandle,
}

/// Buffer bindings of one dispatch
pub type BufferBindings = SmallVec<[BufferBinding; 6]>;

/// One compute dispatch
#[derive(Debug, Clone)]
pub struct ComputeDispatch<'a> {
    /// Kernel to run
    pub kernel: CullingKernel,
    /// Workgroup counts
    pub thread_groups: [u32; 3],
    /// Raw bytes of the kernel's constant block (binding 0)
    pub constants: &'a [u8],
    /// Storage buffer bindings
    pub bindings: BufferBindings,
}

/// Records GPU work for the current frame
pub trait CommandRecorder {
    /// Zero the contents of a buffer
    fn clear_buffer(&mut self, buffer: BufferHandle);

    /// Record a compute dispatch
    fn dispatch(&mut self, dispatch: &ComputeDispatch<'_>) -> RenderResult<()>;
}
