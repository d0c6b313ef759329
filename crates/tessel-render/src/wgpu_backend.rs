//! wgpu Backend
//!
//! [`GraphicsDevice`] and [`CommandRecorder`] over a `wgpu` device. Buffers
//! are storage buffers written through the queue; dispatches bind a fresh
//! uniform buffer for the kernel constants.

use parking_lot::Mutex;
use tessel_core::math::align_size_up;
use tessel_core::{FreeList, MemoryBudget, MemoryTracker};
use wgpu::util::DeviceExt;

use crate::device::{
    BufferDesc, BufferHandle, CommandRecorder, ComputeDispatch, CullingKernel, GraphicsDevice,
};
use crate::{RenderError, RenderResult};

const GRID_FRUSTUMS_SOURCE: &str = include_str!("shaders/grid_frustums.wgsl");
const CULL_LIGHTS_SOURCE: &str = include_str!("shaders/cull_lights.wgsl");

#[derive(Debug)]
struct GpuBuffer {
    buffer: wgpu::Buffer,
    size: u64,
}

/// Graphics device backed by wgpu
#[derive(Debug)]
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffers: Mutex<FreeList<GpuBuffer>>,
    memory: MemoryTracker,
    grid_frustums: wgpu::ComputePipeline,
    cull_lights: wgpu::ComputePipeline,
}

impl WgpuDevice {
    /// Connect to the default adapter of `instance`
    pub async fn connect(instance: &wgpu::Instance, budget: MemoryBudget) -> RenderResult<Self> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| RenderError::DeviceCreation("no compatible adapter".into()))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("tessel"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|err| RenderError::DeviceCreation(err.to_string()))?;

        log::info!("connected to {}", adapter.get_info().name);
        Self::new(device, queue, budget).await
    }

    /// Wrap an existing device and queue, compiling the culling kernels
    pub async fn new(device: wgpu::Device, queue: wgpu::Queue, budget: MemoryBudget) -> RenderResult<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let grid_frustums = create_kernel(&device, CullingKernel::GridFrustums, GRID_FRUSTUMS_SOURCE);
        let cull_lights = create_kernel(&device, CullingKernel::CullLights, CULL_LIGHTS_SOURCE);
        if let Some(err) = device.pop_error_scope().await {
            return Err(RenderError::PipelineCreation(err.to_string()));
        }

        Ok(Self {
            device,
            queue,
            buffers: Mutex::new(FreeList::new()),
            memory: MemoryTracker::new(budget),
            grid_frustums,
            cull_lights,
        })
    }

    /// Underlying wgpu device
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Underlying wgpu queue
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Memory accounting for this device
    pub fn memory(&self) -> &MemoryTracker {
        &self.memory
    }

    /// Start recording a frame's commands
    pub fn recorder(&self) -> WgpuRecorder<'_> {
        WgpuRecorder {
            device: self,
            encoder: self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("light culling"),
            }),
        }
    }

    fn pipeline(&self, kernel: CullingKernel) -> &wgpu::ComputePipeline {
        match kernel {
            CullingKernel::GridFrustums => &self.grid_frustums,
            CullingKernel::CullLights => &self.cull_lights,
        }
    }
}

fn create_kernel(device: &wgpu::Device, kernel: CullingKernel, source: &str) -> wgpu::ComputePipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(kernel.name()),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(kernel.name()),
        layout: None,
        module: &module,
        entry_point: Some("main"),
        compilation_options: Default::default(),
        cache: None,
    })
}

impl GraphicsDevice for WgpuDevice {
    fn allocate_buffer(&self, desc: &BufferDesc<'_>) -> RenderResult<BufferHandle> {
        let size = align_size_up(desc.size.max(wgpu::COPY_BUFFER_ALIGNMENT), wgpu::COPY_BUFFER_ALIGNMENT);
        let out_of_memory = || RenderError::OutOfDeviceMemory {
            label: desc.label.to_string(),
            requested: size,
        };

        if size > self.device.limits().max_buffer_size {
            return Err(out_of_memory());
        }
        let reserved = usize::try_from(size).map_err(|_| out_of_memory())?;
        self.memory.try_reserve(reserved).map_err(|_| out_of_memory())?;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let handle = self.buffers.lock().add(GpuBuffer { buffer, size });
        log::trace!("allocated '{}' ({} bytes)", desc.label, size);
        Ok(handle.cast())
    }

    fn release_buffer(&self, buffer: BufferHandle) {
        // wgpu keeps the allocation alive until submitted work using it completes
        if let Some(gpu) = self.buffers.lock().remove(buffer.cast()) {
            self.memory.release(gpu.size as usize);
        }
    }

    fn buffer_size(&self, buffer: BufferHandle) -> RenderResult<u64> {
        self.buffers
            .lock()
            .get(buffer.cast())
            .map(|gpu| gpu.size)
            .ok_or(RenderError::InvalidBuffer(buffer))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> RenderResult<()> {
        let buffers = self.buffers.lock();
        let gpu = buffers
            .get(buffer.cast())
            .ok_or(RenderError::InvalidBuffer(buffer))?;

        let len = data.len() as u64;
        if offset + len > gpu.size {
            return Err(RenderError::WriteOutOfBounds {
                offset,
                len,
                size: gpu.size,
            });
        }

        self.queue.write_buffer(&gpu.buffer, offset, data);
        Ok(())
    }
}

/// Records culling work into a wgpu command encoder
#[derive(Debug)]
pub struct WgpuRecorder<'a> {
    device: &'a WgpuDevice,
    encoder: wgpu::CommandEncoder,
}

impl WgpuRecorder<'_> {
    /// Finish recording
    pub fn finish(self) -> wgpu::CommandBuffer {
        self.encoder.finish()
    }

    /// Finish recording and submit to the device queue
    pub fn submit(self) -> wgpu::SubmissionIndex {
        let queue = &self.device.queue;
        queue.submit(Some(self.encoder.finish()))
    }
}

impl CommandRecorder for WgpuRecorder<'_> {
    fn clear_buffer(&mut self, buffer: BufferHandle) {
        let buffers = self.device.buffers.lock();
        if let Some(gpu) = buffers.get(buffer.cast()) {
            self.encoder.clear_buffer(&gpu.buffer, 0, None);
        }
    }

    fn dispatch(&mut self, dispatch: &ComputeDispatch<'_>) -> RenderResult<()> {
        let device = &self.device.device;
        let pipeline = self.device.pipeline(dispatch.kernel);

        let constants = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(dispatch.kernel.name()),
            contents: dispatch.constants,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = {
            let buffers = self.device.buffers.lock();
            let mut entries = Vec::with_capacity(dispatch.bindings.len() + 1);
            entries.push(wgpu::BindGroupEntry {
                binding: 0,
                resource: constants.as_entire_binding(),
            });
            for binding in &dispatch.bindings {
                let gpu = buffers
                    .get(binding.buffer.cast())
                    .ok_or(RenderError::InvalidBuffer(binding.buffer))?;
                entries.push(wgpu::BindGroupEntry {
                    binding: binding.binding,
                    resource: gpu.buffer.as_entire_binding(),
                });
            }

            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(dispatch.kernel.name()),
                layout: &pipeline.get_bind_group_layout(0),
                entries: &entries,
            })
        };

        let [x, y, z] = dispatch.thread_groups;
        let mut pass = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(dispatch.kernel.name()),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(x, y, z);
        Ok(())
    }
}
