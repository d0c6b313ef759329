//! Lighting System
//!
//! Frame orchestration for dynamic lights: registry mutation on the
//! simulation side, then one synchronize-and-cull step per frame slot on the
//! render side.

use tessel_core::TransformSource;

use crate::culling::{CullOutcome, CullerId, FrameInfo, TileCulling};
use crate::device::{CommandRecorder, GraphicsDevice};
use crate::light::{LightRegistry, LightSetKey, SyncReport};
use crate::{LightingConfig, RenderError, RenderResult};

/// What one frame's lighting step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    /// Mirror synchronization, `None` when it failed for lack of memory
    pub sync: Option<SyncReport>,
    /// Culling outcome
    pub cull: CullOutcome,
}

/// Light registry plus tile culling driver
#[derive(Debug)]
pub struct LightingSystem {
    config: LightingConfig,
    registry: LightRegistry,
    culling: TileCulling,
}

impl LightingSystem {
    /// Create a lighting system
    pub fn new(config: LightingConfig) -> RenderResult<Self> {
        config.validate()?;
        log::debug!(
            "lighting: {} frames in flight, {}px tiles, {} lights per tile",
            config.frames_in_flight,
            config.tile_size,
            config.max_lights_per_tile
        );

        Ok(Self {
            registry: LightRegistry::new(config.frames_in_flight, config.mirror_growth),
            culling: TileCulling::new(&config),
            config,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &LightingConfig {
        &self.config
    }

    /// Light registry
    pub fn registry(&self) -> &LightRegistry {
        &self.registry
    }

    /// Mutable light registry
    pub fn registry_mut(&mut self) -> &mut LightRegistry {
        &mut self.registry
    }

    /// Tile culling driver
    pub fn culling(&self) -> &TileCulling {
        &self.culling
    }

    /// Register a view for culling
    pub fn add_view(&mut self) -> CullerId {
        self.culling.add_culler()
    }

    /// Unregister a view
    pub fn remove_view(&mut self, device: &dyn GraphicsDevice, view: CullerId) {
        self.culling.remove_culler(device, view);
    }

    /// Refresh light transforms of a set
    pub fn update_transforms(&mut self, key: LightSetKey, transforms: &dyn TransformSource) {
        self.registry.update_transforms(key, transforms);
    }

    /// Synchronize the frame slot's mirrors and record culling for `view`.
    ///
    /// Running out of device memory while growing a mirror or the tile
    /// buffers skips culling for this frame instead of failing it.
    pub fn sync_and_cull(
        &mut self,
        device: &dyn GraphicsDevice,
        recorder: &mut dyn CommandRecorder,
        view: CullerId,
        frame: &FrameInfo,
    ) -> RenderResult<FrameReport> {
        let _span = tracing::debug_span!("sync_and_cull", frame = frame.frame_index).entered();

        let sync = match self.registry.sync(device, frame.light_set, frame.frame_index) {
            Ok(report) => Some(report),
            Err(err @ RenderError::OutOfDeviceMemory { .. }) => {
                log::warn!("frame {}: light culling skipped: {err}", frame.frame_index);
                None
            }
            Err(err) => return Err(err),
        };

        let lights = self.registry.buffer(frame.frame_index);
        let cull = self.culling.cull(device, recorder, view, frame, lights)?;
        Ok(FrameReport { sync, cull })
    }

    /// Release all device resources. Light sets must have been removed.
    pub fn shutdown(&mut self, device: &dyn GraphicsDevice) {
        self.culling.shutdown(device);
        self.registry.shutdown(device);
    }
}
