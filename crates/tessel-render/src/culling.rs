//! Tile Culling
//!
//! Drives the two compute kernels of tiled light culling. The grid-frustum
//! kernel runs whenever the surface size or field of view changes; the
//! culling kernel runs every frame against the enabled cullable lights of the
//! frame slot's light mirror.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2};
use serde::Serialize;
use smallvec::smallvec;
use tessel_core::math::{div_ceil, is_equal};
use tessel_core::{FreeList, Handle};

use crate::device::{
    BufferBinding, BufferDesc, BufferHandle, BufferUsage, CommandRecorder, ComputeDispatch,
    CullingKernel, GraphicsDevice,
};
use crate::light::{LightBuffer, LightCullingInfo, LightSetKey};
use crate::{LightingConfig, RenderError, RenderResult};

/// Bytes of one tile frustum (four planes)
pub const FRUSTUM_SIZE: u64 = 4 * 16;
/// Bytes of one light grid cell (offset, count)
pub const LIGHT_GRID_CELL_SIZE: u64 = 2 * 4;
/// Bytes of one light index
pub const LIGHT_INDEX_SIZE: u64 = 4;
/// Workgroup edge of both kernels, `@workgroup_size(16, 16, 1)`
pub const KERNEL_GROUP_SIZE: u32 = 16;
/// Capacity of the culling kernel's per-tile light list
pub const MAX_LIGHTS_PER_TILE: u32 = 256;

/// Camera state culling depends on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraInfo {
    /// View matrix
    pub view: Mat4,
    /// Projection matrix
    pub projection: Mat4,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Near plane distance
    pub near: f32,
    /// Far plane distance
    pub far: f32,
}

impl CameraInfo {
    /// Right-handed perspective camera
    pub fn perspective(view: Mat4, fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            view,
            projection: Mat4::perspective_rh(fov_y, aspect, near, far),
            fov_y,
            near,
            far,
        }
    }
}

/// Per-frame inputs of the lighting system
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    /// Frame slot being recorded
    pub frame_index: u32,
    /// Render target width in pixels
    pub width: u32,
    /// Render target height in pixels
    pub height: u32,
    /// Active camera
    pub camera: CameraInfo,
    /// Light set to synchronize and cull
    pub light_set: LightSetKey,
}

/// Tile layout of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileGrid {
    /// Tile edge in pixels
    pub tile_size: u32,
    /// Tiles per axis
    pub tile_count: [u32; 2],
}

impl TileGrid {
    /// Tile layout covering `width` x `height` pixels
    pub fn new(width: u32, height: u32, tile_size: u32) -> Self {
        assert!(tile_size > 0);
        Self {
            tile_size,
            tile_count: [div_ceil(width, tile_size), div_ceil(height, tile_size)],
        }
    }

    /// Total tiles
    pub fn tiles(&self) -> u32 {
        self.tile_count[0] * self.tile_count[1]
    }

    /// Threads of the grid-frustum kernel: one per tile
    pub fn frustum_threads(&self) -> [u32; 2] {
        self.tile_count
    }

    /// Workgroups of the grid-frustum kernel
    pub fn frustum_groups(&self) -> [u32; 3] {
        [
            div_ceil(self.tile_count[0], KERNEL_GROUP_SIZE),
            div_ceil(self.tile_count[1], KERNEL_GROUP_SIZE),
            1,
        ]
    }

    /// Threads of the culling kernel: one workgroup per tile
    pub fn culling_threads(&self) -> [u32; 2] {
        [
            self.tile_count[0] * KERNEL_GROUP_SIZE,
            self.tile_count[1] * KERNEL_GROUP_SIZE,
        ]
    }

    /// Workgroups of the culling kernel
    pub fn culling_groups(&self) -> [u32; 3] {
        [self.tile_count[0], self.tile_count[1], 1]
    }
}

/// Constant block shared by both kernels (binding 0)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct CullingConstants {
    pub inverse_projection: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub view_size: [f32; 2],
    pub num_threads: [u32; 2],
    pub num_thread_groups: [u32; 2],
    pub num_lights: u32,
    pub max_lights_per_tile: u32,
    /// Camera near and far distances
    pub depth_range: [f32; 2],
    /// Tile edge in pixels
    pub tile_size: u32,
    pub _pad: u32,
}

impl CullingConstants {
    fn new(frame: &FrameInfo, tile_size: u32, threads: [u32; 2], groups: [u32; 3]) -> Self {
        Self {
            inverse_projection: frame.camera.projection.inverse().to_cols_array_2d(),
            view: frame.camera.view.to_cols_array_2d(),
            view_size: [frame.width as f32, frame.height as f32],
            num_threads: threads,
            num_thread_groups: [groups[0], groups[1]],
            depth_range: [frame.camera.near, frame.camera.far],
            tile_size,
            ..Default::default()
        }
    }
}

/// Why a culling pass issued no dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The surface has no pixels
    EmptySurface,
    /// No lights now and the grid was already cleared
    NoLights,
    /// The frame's light mirrors failed to synchronize
    DegradedMirror,
    /// Tile buffers for the surface could not be allocated
    TileBuffersUnavailable,
}

/// Result of one culling pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullOutcome {
    /// The culling kernel was dispatched
    Culled {
        /// Tiles per axis
        tile_count: UVec2,
        /// Lights tested against the grid; zero clears stale results
        num_lights: u32,
        /// Whether tile frustums were rebuilt first
        regridded: bool,
    },
    /// No culling dispatch was issued
    Skipped(SkipReason),
}

/// Per-frame-slot culling state
#[derive(Debug)]
struct CullingParameters {
    frustums: Option<BufferHandle>,
    light_grid: Option<BufferHandle>,
    light_index_list: Option<BufferHandle>,
    index_counter: Option<BufferHandle>,
    // Bound in place of the light mirror before any light was synchronized
    empty_lights: Option<BufferHandle>,
    tile_capacity: u32,
    width: u32,
    height: u32,
    fov_y: f32,
    grid: TileGrid,
    has_lights: bool,
}

impl CullingParameters {
    fn new(tile_size: u32) -> Self {
        Self {
            frustums: None,
            light_grid: None,
            light_index_list: None,
            index_counter: None,
            empty_lights: None,
            tile_capacity: 0,
            width: 0,
            height: 0,
            fov_y: 0.0,
            grid: TileGrid::new(0, 0, tile_size),
            has_lights: true,
        }
    }

    fn needs_resize(&self, frame: &FrameInfo) -> bool {
        self.width != frame.width || self.height != frame.height || !is_equal(self.fov_y, frame.camera.fov_y)
    }

    /// Grow buffers for the new tile count and rebuild the tile frustums
    fn resize(
        &mut self,
        device: &dyn GraphicsDevice,
        recorder: &mut dyn CommandRecorder,
        frame: &FrameInfo,
        max_lights_per_tile: u32,
    ) -> RenderResult<()> {
        let grid = TileGrid::new(frame.width, frame.height, self.grid.tile_size);
        let tiles = grid.tiles();

        if tiles > self.tile_capacity {
            let compute = BufferUsage::STORAGE | BufferUsage::UNORDERED_ACCESS;
            replace(device, &mut self.frustums, "tile frustums", tiles as u64 * FRUSTUM_SIZE, compute)?;
            replace(device, &mut self.light_grid, "light grid", tiles as u64 * LIGHT_GRID_CELL_SIZE, compute)?;
            replace(
                device,
                &mut self.light_index_list,
                "light index list",
                tiles as u64 * max_lights_per_tile as u64 * LIGHT_INDEX_SIZE,
                compute,
            )?;
            self.tile_capacity = tiles;
        }

        if self.index_counter.is_none() {
            replace(
                device,
                &mut self.index_counter,
                "light index counter",
                LIGHT_INDEX_SIZE,
                BufferUsage::STORAGE | BufferUsage::UNORDERED_ACCESS | BufferUsage::CLEARABLE,
            )?;
        }
        if self.empty_lights.is_none() {
            replace(
                device,
                &mut self.empty_lights,
                "empty light list",
                std::mem::size_of::<LightCullingInfo>() as u64,
                BufferUsage::STORAGE,
            )?;
        }

        let Some(frustums) = self.frustums else {
            unreachable!("tile buffers allocated above");
        };

        let mut constants = CullingConstants::new(frame, grid.tile_size, grid.frustum_threads(), grid.frustum_groups());
        constants.max_lights_per_tile = max_lights_per_tile;
        recorder.dispatch(&ComputeDispatch {
            kernel: CullingKernel::GridFrustums,
            thread_groups: grid.frustum_groups(),
            constants: bytemuck::bytes_of(&constants),
            bindings: smallvec![BufferBinding {
                binding: 1,
                buffer: frustums
            }],
        })?;

        log::debug!(
            "tile grid {}x{} for {}x{} (fov {:.3})",
            grid.tile_count[0],
            grid.tile_count[1],
            frame.width,
            frame.height,
            frame.camera.fov_y
        );

        self.grid = grid;
        self.width = frame.width;
        self.height = frame.height;
        self.fov_y = frame.camera.fov_y;
        Ok(())
    }

    fn release(&mut self, device: &dyn GraphicsDevice) {
        for buffer in [
            self.frustums.take(),
            self.light_grid.take(),
            self.light_index_list.take(),
            self.index_counter.take(),
            self.empty_lights.take(),
        ]
        .into_iter()
        .flatten()
        {
            device.release_buffer(buffer);
        }
        self.tile_capacity = 0;
        self.width = 0;
        self.height = 0;
    }
}

/// Allocate a buffer into `slot`, releasing the previous one after success
fn replace(
    device: &dyn GraphicsDevice,
    slot: &mut Option<BufferHandle>,
    label: &str,
    size: u64,
    usage: BufferUsage,
) -> RenderResult<()> {
    let buffer = device.allocate_buffer(&BufferDesc { label, size, usage })?;
    if let Some(old) = slot.replace(buffer) {
        device.release_buffer(old);
    }
    Ok(())
}

/// Culling state of one view, one parameter block per frame slot
#[derive(Debug)]
pub struct LightCuller {
    parameters: Vec<CullingParameters>,
}

/// Handle to a view's culler
pub type CullerId = Handle<LightCuller>;

/// Tile culling driver
#[derive(Debug)]
pub struct TileCulling {
    tile_size: u32,
    max_lights_per_tile: u32,
    frame_count: u32,
    cullers: FreeList<LightCuller>,
}

impl TileCulling {
    /// Create a driver with the tile settings of `config`
    pub fn new(config: &LightingConfig) -> Self {
        Self {
            tile_size: config.tile_size,
            max_lights_per_tile: config.max_lights_per_tile,
            frame_count: config.frames_in_flight,
            cullers: FreeList::new(),
        }
    }

    /// Tile edge in pixels
    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Register a view
    pub fn add_culler(&mut self) -> CullerId {
        let tile_size = self.tile_size;
        self.cullers.add(LightCuller {
            parameters: (0..self.frame_count)
                .map(|_| CullingParameters::new(tile_size))
                .collect(),
        })
    }

    /// Unregister a view and release its buffers
    pub fn remove_culler(&mut self, device: &dyn GraphicsDevice, id: CullerId) {
        if let Some(mut culler) = self.cullers.remove(id) {
            for parameters in &mut culler.parameters {
                parameters.release(device);
            }
        }
    }

    /// Whether `id` refers to a registered view
    pub fn contains(&self, id: CullerId) -> bool {
        self.cullers.is_valid(id)
    }

    /// Number of registered views
    pub fn culler_count(&self) -> usize {
        self.cullers.len()
    }

    /// Record this frame's culling work for view `id` against `lights`
    pub fn cull(
        &mut self,
        device: &dyn GraphicsDevice,
        recorder: &mut dyn CommandRecorder,
        id: CullerId,
        frame: &FrameInfo,
        lights: &LightBuffer,
    ) -> RenderResult<CullOutcome> {
        let _span = tracing::trace_span!("tile_culling", frame = frame.frame_index).entered();

        if lights.is_degraded() {
            return Ok(CullOutcome::Skipped(SkipReason::DegradedMirror));
        }
        if frame.width == 0 || frame.height == 0 {
            return Ok(CullOutcome::Skipped(SkipReason::EmptySurface));
        }

        let max_lights_per_tile = self.max_lights_per_tile;
        let params = &mut self.cullers[id].parameters[frame.frame_index as usize];

        let regridded = params.needs_resize(frame);
        if regridded {
            match params.resize(device, recorder, frame, max_lights_per_tile) {
                Ok(()) => {}
                Err(err @ RenderError::OutOfDeviceMemory { .. }) => {
                    log::warn!("frame {}: light culling skipped: {err}", frame.frame_index);
                    return Ok(CullOutcome::Skipped(SkipReason::TileBuffersUnavailable));
                }
                Err(err) => return Err(err),
            }
        }

        let num_lights = lights.cullable_count();
        if num_lights == 0 && !params.has_lights {
            log::trace!("frame {}: no lights, culling suppressed", frame.frame_index);
            return Ok(CullOutcome::Skipped(SkipReason::NoLights));
        }
        params.has_lights = num_lights > 0;

        let (Some(frustums), Some(light_grid), Some(index_list), Some(counter), Some(empty)) = (
            params.frustums,
            params.light_grid,
            params.light_index_list,
            params.index_counter,
            params.empty_lights,
        ) else {
            unreachable!("culling buffers exist once a grid was built");
        };
        let culling_info = match lights.culling_info_buffer() {
            Some(buffer) if num_lights > 0 => buffer,
            _ => empty,
        };

        let grid = params.grid;
        let mut constants = CullingConstants::new(frame, grid.tile_size, grid.culling_threads(), grid.culling_groups());
        constants.num_lights = num_lights;
        constants.max_lights_per_tile = max_lights_per_tile;

        recorder.clear_buffer(counter);
        recorder.dispatch(&ComputeDispatch {
            kernel: CullingKernel::CullLights,
            thread_groups: grid.culling_groups(),
            constants: bytemuck::bytes_of(&constants),
            bindings: smallvec![
                BufferBinding { binding: 1, buffer: frustums },
                BufferBinding { binding: 2, buffer: culling_info },
                BufferBinding { binding: 3, buffer: light_grid },
                BufferBinding { binding: 4, buffer: index_list },
                BufferBinding { binding: 5, buffer: counter },
            ],
        })?;

        log::trace!(
            "frame {}: culled {} lights over {} tiles",
            frame.frame_index,
            num_lights,
            grid.tiles()
        );

        Ok(CullOutcome::Culled {
            tile_count: UVec2::from_array(grid.tile_count),
            num_lights,
            regridded,
        })
    }

    /// Tile grid of view `id` in frame slot `frame_index`
    pub fn tile_grid(&self, id: CullerId, frame_index: u32) -> TileGrid {
        self.cullers[id].parameters[frame_index as usize].grid
    }

    /// Per-tile (offset, count) buffer of view `id` in frame slot `frame_index`
    pub fn light_grid_buffer(&self, id: CullerId, frame_index: u32) -> Option<BufferHandle> {
        self.cullers[id].parameters[frame_index as usize].light_grid
    }

    /// Compact light index list of view `id` in frame slot `frame_index`
    pub fn light_index_list_buffer(&self, id: CullerId, frame_index: u32) -> Option<BufferHandle> {
        self.cullers[id].parameters[frame_index as usize].light_index_list
    }

    /// Tile frustum buffer of view `id` in frame slot `frame_index`
    pub fn frustum_buffer(&self, id: CullerId, frame_index: u32) -> Option<BufferHandle> {
        self.cullers[id].parameters[frame_index as usize].frustums
    }

    /// Release every view's buffers
    pub fn shutdown(&mut self, device: &dyn GraphicsDevice) {
        let ids: Vec<CullerId> = self.cullers.iter().map(|(id, _)| id).collect();
        for id in ids {
            self.remove_culler(device, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessDevice, HeadlessRecorder, RecordedCommand};
    use crate::light::{LightId, LightInitInfo, LightSet};
    use glam::Vec3;
    use tessel_core::{Transform, TransformStore};

    fn config() -> LightingConfig {
        LightingConfig {
            frames_in_flight: 1,
            ..Default::default()
        }
    }

    fn frame(width: u32, height: u32) -> FrameInfo {
        FrameInfo {
            frame_index: 0,
            width,
            height,
            camera: CameraInfo::perspective(Mat4::IDENTITY, 1.0, width as f32 / height.max(1) as f32, 0.1, 100.0),
            light_set: 1,
        }
    }

    fn populated(device: &HeadlessDevice, count: usize) -> (TransformStore, LightSet, LightBuffer, Vec<LightId>) {
        let mut store = TransformStore::new();
        let mut set = LightSet::new(1);
        let ids = (0..count)
            .map(|i| {
                let entity = store.spawn(Transform::from_position(Vec3::new(i as f32, 0.0, -5.0)));
                set.add(&LightInitInfo::point(entity, Vec3::ONE, 1.0, 3.0, Vec3::ONE), &store)
            })
            .collect();
        let mut buffer = LightBuffer::new(0, 1.5);
        buffer.sync(device, &mut set, 1).unwrap();
        (store, set, buffer, ids)
    }

    #[test]
    fn test_tile_grid() {
        let grid = TileGrid::new(1920, 1080, 16);
        assert_eq!(grid.tile_count, [120, 68]);
        assert_eq!(grid.frustum_groups(), [8, 5, 1]);
        assert_eq!(grid.culling_threads(), [1920, 1088]);
        assert_eq!(grid.culling_groups(), [120, 68, 1]);
    }

    #[test]
    fn test_large_tiles_cover_surface() {
        let grid = TileGrid::new(1920, 1080, 32);
        assert_eq!(grid.tile_count, [60, 34]);
        let groups = grid.frustum_groups();
        assert_eq!(groups, [4, 3, 1]);
        assert!(groups[0] * KERNEL_GROUP_SIZE >= 60);
        assert!(groups[1] * KERNEL_GROUP_SIZE >= 34);
        assert_eq!(grid.culling_threads(), [960, 544]);
        assert_eq!(grid.culling_groups(), [60, 34, 1]);

        let device = HeadlessDevice::new();
        let (_store, _set, lights, _) = populated(&device, 2);
        let mut culling = TileCulling::new(&LightingConfig {
            tile_size: 32,
            ..config()
        });
        let view = culling.add_culler();
        let mut recorder = HeadlessRecorder::new(&device);
        culling.cull(&device, &mut recorder, view, &frame(1920, 1080), &lights).unwrap();

        let mut dispatches = 0;
        for command in recorder.commands() {
            let RecordedCommand::Dispatch {
                kernel,
                thread_groups,
                constants,
                ..
            } = command
            else {
                continue;
            };
            dispatches += 1;
            let constants: CullingConstants = bytemuck::pod_read_unaligned(constants);
            assert_eq!(constants.tile_size, 32);
            match kernel {
                CullingKernel::GridFrustums => {
                    assert_eq!(*thread_groups, [4, 3, 1]);
                    assert_eq!(constants.num_threads, [60, 34]);
                }
                CullingKernel::CullLights => assert_eq!(*thread_groups, [60, 34, 1]),
            }
        }
        assert_eq!(dispatches, 2);
    }

    #[test]
    fn test_tile_buffer_exhaustion_skips_culling() {
        // Fits the two-record light mirrors and one tile, not a 20x15 grid
        let device = HeadlessDevice::with_budget(tessel_core::MemoryBudget::with_max_bytes(1024));
        let (_store, _set, lights, _) = populated(&device, 1);
        let mut culling = TileCulling::new(&LightingConfig {
            max_lights_per_tile: 16,
            ..config()
        });
        let view = culling.add_culler();
        let mut recorder = HeadlessRecorder::new(&device);

        let outcome = culling.cull(&device, &mut recorder, view, &frame(320, 240), &lights).unwrap();
        assert_eq!(outcome, CullOutcome::Skipped(SkipReason::TileBuffersUnavailable));
        assert!(recorder.commands().is_empty());
        assert_eq!(culling.frustum_buffer(view, 0), None);

        let outcome = culling.cull(&device, &mut recorder, view, &frame(16, 16), &lights).unwrap();
        assert!(matches!(outcome, CullOutcome::Culled { regridded: true, num_lights: 1, .. }));
    }

    #[test]
    fn test_constants_layout() {
        assert_eq!(std::mem::size_of::<CullingConstants>(), 176);
    }

    #[test]
    fn test_resize_rebuilds_grid_once() {
        let device = HeadlessDevice::new();
        let (_store, _set, lights, _) = populated(&device, 4);
        let mut culling = TileCulling::new(&config());
        let view = culling.add_culler();
        let mut recorder = HeadlessRecorder::new(&device);

        let outcome = culling.cull(&device, &mut recorder, view, &frame(1920, 1080), &lights).unwrap();
        assert_eq!(
            outcome,
            CullOutcome::Culled {
                tile_count: UVec2::new(120, 68),
                num_lights: 4,
                regridded: true
            }
        );
        let frustums = culling.frustum_buffer(view, 0).unwrap();
        assert_eq!(device.buffer_size(frustums).unwrap(), 120 * 68 * FRUSTUM_SIZE);

        culling.cull(&device, &mut recorder, view, &frame(1920, 1080), &lights).unwrap();
        assert_eq!(recorder.dispatch_count(CullingKernel::GridFrustums), 1);

        recorder.reset();
        let outcome = culling.cull(&device, &mut recorder, view, &frame(2560, 1440), &lights).unwrap();
        assert!(matches!(outcome, CullOutcome::Culled { regridded: true, .. }));
        assert_eq!(culling.tile_grid(view, 0).tile_count, [160, 90]);
        assert_eq!(recorder.dispatch_count(CullingKernel::GridFrustums), 1);

        let frustums = culling.frustum_buffer(view, 0).unwrap();
        assert_eq!(device.buffer_size(frustums).unwrap(), 160 * 90 * FRUSTUM_SIZE);
        let index_list = culling.light_index_list_buffer(view, 0).unwrap();
        assert_eq!(device.buffer_size(index_list).unwrap(), 160 * 90 * 256 * LIGHT_INDEX_SIZE);
    }

    #[test]
    fn test_shrinking_keeps_buffers() {
        let device = HeadlessDevice::new();
        let (_store, _set, lights, _) = populated(&device, 1);
        let mut culling = TileCulling::new(&config());
        let view = culling.add_culler();
        let mut recorder = HeadlessRecorder::new(&device);

        culling.cull(&device, &mut recorder, view, &frame(2560, 1440), &lights).unwrap();
        let frustums = culling.frustum_buffer(view, 0);
        culling.cull(&device, &mut recorder, view, &frame(640, 480), &lights).unwrap();

        assert_eq!(culling.frustum_buffer(view, 0), frustums);
        assert_eq!(culling.tile_grid(view, 0).tile_count, [40, 30]);
        assert_eq!(recorder.dispatch_count(CullingKernel::GridFrustums), 2);
    }

    #[test]
    fn test_fov_change_regrids() {
        let device = HeadlessDevice::new();
        let (_store, _set, lights, _) = populated(&device, 1);
        let mut culling = TileCulling::new(&config());
        let view = culling.add_culler();
        let mut recorder = HeadlessRecorder::new(&device);

        let mut info = frame(800, 600);
        culling.cull(&device, &mut recorder, view, &info, &lights).unwrap();

        info.camera.fov_y += 1e-7;
        culling.cull(&device, &mut recorder, view, &info, &lights).unwrap();
        assert_eq!(recorder.dispatch_count(CullingKernel::GridFrustums), 1);

        info.camera.fov_y += 0.2;
        culling.cull(&device, &mut recorder, view, &info, &lights).unwrap();
        assert_eq!(recorder.dispatch_count(CullingKernel::GridFrustums), 2);
    }

    #[test]
    fn test_empty_set_clears_once() {
        let device = HeadlessDevice::new();
        let (mut store, mut set, mut lights, ids) = populated(&device, 3);
        let mut culling = TileCulling::new(&config());
        let view = culling.add_culler();
        let mut recorder = HeadlessRecorder::new(&device);
        let info = frame(1280, 720);

        culling.cull(&device, &mut recorder, view, &info, &lights).unwrap();
        assert_eq!(recorder.dispatch_count(CullingKernel::CullLights), 1);

        for id in ids {
            set.remove(id);
        }
        lights.sync(&device, &mut set, 1).unwrap();

        let outcome = culling.cull(&device, &mut recorder, view, &info, &lights).unwrap();
        assert!(matches!(outcome, CullOutcome::Culled { num_lights: 0, .. }));
        assert_eq!(recorder.dispatch_count(CullingKernel::CullLights), 2);

        for _ in 0..3 {
            let outcome = culling.cull(&device, &mut recorder, view, &info, &lights).unwrap();
            assert_eq!(outcome, CullOutcome::Skipped(SkipReason::NoLights));
        }
        assert_eq!(recorder.dispatch_count(CullingKernel::CullLights), 2);

        let entity = store.spawn(Transform::IDENTITY);
        set.add(&LightInitInfo::point(entity, Vec3::ONE, 1.0, 3.0, Vec3::ONE), &store);
        lights.sync(&device, &mut set, 1).unwrap();

        culling.cull(&device, &mut recorder, view, &info, &lights).unwrap();
        assert_eq!(recorder.dispatch_count(CullingKernel::CullLights), 3);
    }

    #[test]
    fn test_first_frame_without_lights_clears() {
        let device = HeadlessDevice::new();
        let lights = LightBuffer::new(0, 1.5);
        let mut culling = TileCulling::new(&config());
        let view = culling.add_culler();
        let mut recorder = HeadlessRecorder::new(&device);

        let outcome = culling.cull(&device, &mut recorder, view, &frame(64, 64), &lights).unwrap();
        assert!(matches!(outcome, CullOutcome::Culled { num_lights: 0, .. }));

        let outcome = culling.cull(&device, &mut recorder, view, &frame(64, 64), &lights).unwrap();
        assert_eq!(outcome, CullOutcome::Skipped(SkipReason::NoLights));
    }

    #[test]
    fn test_culling_dispatch_shape() {
        let device = HeadlessDevice::new();
        let (_store, _set, lights, _) = populated(&device, 5);
        let mut culling = TileCulling::new(&config());
        let view = culling.add_culler();
        let mut recorder = HeadlessRecorder::new(&device);

        culling.cull(&device, &mut recorder, view, &frame(100, 50), &lights).unwrap();

        let commands = recorder.commands();
        assert_eq!(commands.len(), 3);
        assert!(matches!(commands[1], RecordedCommand::Clear { .. }));
        let RecordedCommand::Dispatch {
            kernel,
            thread_groups,
            constants,
            bindings,
        } = &commands[2]
        else {
            panic!("expected a dispatch");
        };

        assert_eq!(*kernel, CullingKernel::CullLights);
        assert_eq!(*thread_groups, [7, 4, 1]);
        assert_eq!(bindings.len(), 5);
        assert_eq!(bindings[1].buffer, lights.culling_info_buffer().unwrap());

        let constants: CullingConstants = bytemuck::pod_read_unaligned(constants);
        assert_eq!(constants.num_lights, 5);
        assert_eq!(constants.num_threads, [112, 64]);
        assert_eq!(constants.num_thread_groups, [7, 4]);
        assert_eq!(constants.max_lights_per_tile, 256);
        assert_eq!(constants.view_size, [100.0, 50.0]);
    }

    #[test]
    fn test_skips_degraded_and_empty_surfaces() {
        let device = HeadlessDevice::with_budget(tessel_core::MemoryBudget::with_max_bytes(0));
        let mut store = TransformStore::new();
        let mut set = LightSet::new(1);
        let entity = store.spawn(Transform::IDENTITY);
        set.add(&LightInitInfo::point(entity, Vec3::ONE, 1.0, 1.0, Vec3::ONE), &store);
        let mut lights = LightBuffer::new(0, 1.5);
        assert!(lights.sync(&device, &mut set, 1).is_err());

        let mut culling = TileCulling::new(&config());
        let view = culling.add_culler();
        let mut recorder = HeadlessRecorder::new(&device);

        let outcome = culling.cull(&device, &mut recorder, view, &frame(64, 64), &lights).unwrap();
        assert_eq!(outcome, CullOutcome::Skipped(SkipReason::DegradedMirror));

        let healthy = LightBuffer::new(0, 1.5);
        let outcome = culling.cull(&device, &mut recorder, view, &frame(0, 64), &healthy).unwrap();
        assert_eq!(outcome, CullOutcome::Skipped(SkipReason::EmptySurface));
        assert!(recorder.commands().is_empty());
    }

    #[test]
    fn test_remove_culler_releases_buffers() {
        let device = HeadlessDevice::new();
        let lights = LightBuffer::new(0, 1.5);
        let mut culling = TileCulling::new(&config());
        let view = culling.add_culler();
        let mut recorder = HeadlessRecorder::new(&device);
        culling.cull(&device, &mut recorder, view, &frame(64, 64), &lights).unwrap();
        assert_eq!(device.live_buffer_count(), 5);

        culling.remove_culler(&device, view);
        assert!(!culling.contains(view));
        assert_eq!(device.live_buffer_count(), 0);
    }
}
