//! Headless Device
//!
//! Host-memory implementation of the device traits. Buffers live in plain
//! byte vectors and recorded commands are kept for inspection, which makes it
//! the backend for tools, CI and tests.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tessel_core::{FreeList, MemoryBudget, MemoryTracker};

use crate::device::{
    BufferBindings, BufferDesc, BufferHandle, BufferUsage, CommandRecorder, ComputeDispatch,
    CullingKernel, GraphicsDevice,
};
use crate::{RenderError, RenderResult};

#[derive(Debug)]
struct HostBuffer {
    label: String,
    usage: BufferUsage,
    data: Vec<u8>,
}

/// Device that keeps buffers in host memory
#[derive(Debug)]
pub struct HeadlessDevice {
    buffers: Mutex<FreeList<HostBuffer>>,
    memory: MemoryTracker,
    bytes_written: AtomicU64,
    write_calls: AtomicU64,
}

impl HeadlessDevice {
    /// Create a device with an unlimited memory budget
    pub fn new() -> Self {
        Self::with_budget(MemoryBudget::unlimited())
    }

    /// Create a device whose allocations fail once `budget` is exhausted
    pub fn with_budget(budget: MemoryBudget) -> Self {
        Self {
            buffers: Mutex::new(FreeList::new()),
            memory: MemoryTracker::new(budget),
            bytes_written: AtomicU64::new(0),
            write_calls: AtomicU64::new(0),
        }
    }

    /// Copy of a buffer's contents
    pub fn read_buffer(&self, buffer: BufferHandle) -> RenderResult<Vec<u8>> {
        let buffers = self.buffers.lock();
        buffers
            .get(buffer.cast())
            .map(|host| host.data.clone())
            .ok_or(RenderError::InvalidBuffer(buffer))
    }

    /// Label a buffer was allocated with
    pub fn buffer_label(&self, buffer: BufferHandle) -> Option<String> {
        self.buffers.lock().get(buffer.cast()).map(|host| host.label.clone())
    }

    /// Usage a buffer was allocated with
    pub fn buffer_usage(&self, buffer: BufferHandle) -> Option<BufferUsage> {
        self.buffers.lock().get(buffer.cast()).map(|host| host.usage)
    }

    /// Number of live buffers
    pub fn live_buffer_count(&self) -> usize {
        self.buffers.lock().len()
    }

    /// Total bytes written through [`GraphicsDevice::write_buffer`]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Number of [`GraphicsDevice::write_buffer`] calls
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::Relaxed)
    }

    /// Memory accounting for this device
    pub fn memory(&self) -> &MemoryTracker {
        &self.memory
    }

    fn clear(&self, buffer: BufferHandle) {
        if let Some(host) = self.buffers.lock().get_mut(buffer.cast()) {
            host.data.fill(0);
        }
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn allocate_buffer(&self, desc: &BufferDesc<'_>) -> RenderResult<BufferHandle> {
        let size = usize::try_from(desc.size).map_err(|_| RenderError::OutOfDeviceMemory {
            label: desc.label.to_string(),
            requested: desc.size,
        })?;

        self.memory
            .try_reserve(size)
            .map_err(|_| RenderError::OutOfDeviceMemory {
                label: desc.label.to_string(),
                requested: desc.size,
            })?;

        let handle = self.buffers.lock().add(HostBuffer {
            label: desc.label.to_string(),
            usage: desc.usage,
            data: vec![0; size],
        });

        log::trace!("allocated '{}' ({} bytes)", desc.label, size);
        Ok(handle.cast())
    }

    fn release_buffer(&self, buffer: BufferHandle) {
        if let Some(host) = self.buffers.lock().remove(buffer.cast()) {
            self.memory.release(host.data.len());
        }
    }

    fn buffer_size(&self, buffer: BufferHandle) -> RenderResult<u64> {
        self.buffers
            .lock()
            .get(buffer.cast())
            .map(|host| host.data.len() as u64)
            .ok_or(RenderError::InvalidBuffer(buffer))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        let mut buffers = self.buffers.lock();
        let host = buffers
            .get_mut(buffer.cast())
            .ok_or(RenderError::InvalidBuffer(buffer))?;

        let size = host.data.len() as u64;
        let end = offset + data.len() as u64;
        if end > size {
            return Err(RenderError::WriteOutOfBounds {
                offset,
                len: data.len() as u64,
                size,
            });
        }

        host.data[offset as usize..end as usize].copy_from_slice(data);
        self.bytes_written.fetch_add(data.len() as u64, Ordering::Relaxed);
        self.write_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Command captured by a [`HeadlessRecorder`]
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    /// Buffer clear
    Clear {
        /// Cleared buffer
        buffer: BufferHandle,
    },
    /// Compute dispatch
    Dispatch {
        /// Kernel
        kernel: CullingKernel,
        /// Workgroup counts
        thread_groups: [u32; 3],
        /// Constant block bytes
        constants: Vec<u8>,
        /// Storage bindings
        bindings: BufferBindings,
    },
}

/// Recorder that logs commands and applies clears to a [`HeadlessDevice`]
#[derive(Debug)]
pub struct HeadlessRecorder<'a> {
    device: &'a HeadlessDevice,
    commands: Vec<RecordedCommand>,
}

impl<'a> HeadlessRecorder<'a> {
    /// Create a recorder targeting `device`
    pub fn new(device: &'a HeadlessDevice) -> Self {
        Self {
            device,
            commands: Vec::new(),
        }
    }

    /// Commands recorded so far
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Number of dispatches of `kernel` recorded so far
    pub fn dispatch_count(&self, kernel: CullingKernel) -> usize {
        self.commands
            .iter()
            .filter(|command| matches!(command, RecordedCommand::Dispatch { kernel: k, .. } if *k == kernel))
            .count()
    }

    /// Drop recorded commands, keeping the recorder usable for the next frame
    pub fn reset(&mut self) {
        self.commands.clear();
    }
}

impl CommandRecorder for HeadlessRecorder<'_> {
    fn clear_buffer(&mut self, buffer: BufferHandle) {
        self.device.clear(buffer);
        self.commands.push(RecordedCommand::Clear { buffer });
    }

    fn dispatch(&mut self, dispatch: &ComputeDispatch<'_>) -> RenderResult<()> {
        for binding in &dispatch.bindings {
            self.device.buffer_size(binding.buffer)?;
        }

        self.commands.push(RecordedCommand::Dispatch {
            kernel: dispatch.kernel,
            thread_groups: dispatch.thread_groups,
            constants: dispatch.constants.to_vec(),
            bindings: dispatch.bindings.clone(),
        });
        Ok(())
    }
}
