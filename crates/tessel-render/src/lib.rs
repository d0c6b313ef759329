//! # Tessel Render
//!
//! Dynamic lights and tiled light culling.
//!
//! ## Features
//! - Light registry keyed by scene, with O(1) enable/disable over a packed
//!   array of enabled point and spot lights
//! - Per-frame-slot device mirrors updated with sparse dirty copies
//! - Tile frustum and light culling dispatches, rebuilt on resize
//! - Headless (host memory) and wgpu device backends

pub mod culling;
pub mod device;
pub mod headless;
pub mod light;
pub mod lighting;
pub mod wgpu_backend;

pub use culling::{CameraInfo, CullOutcome, CullerId, FrameInfo, SkipReason, TileCulling, TileGrid};
pub use device::{BufferHandle, BufferUsage, CommandRecorder, GraphicsDevice};
pub use headless::{HeadlessDevice, HeadlessRecorder};
pub use light::{Light, LightId, LightInitInfo, LightKind, LightParameter, LightRegistry, LightSetKey, LightType};
pub use lighting::{FrameReport, LightingSystem};
pub use wgpu_backend::{WgpuDevice, WgpuRecorder};

use culling::MAX_LIGHTS_PER_TILE;
use serde::{Deserialize, Serialize};
use tessel_core::MAX_FRAMES_IN_FLIGHT;
use thiserror::Error;

/// Render errors
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("GPU device creation failed: {0}")]
    DeviceCreation(String),

    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    #[error("Out of device memory allocating '{label}' ({requested} bytes)")]
    OutOfDeviceMemory { label: String, requested: u64 },

    #[error("Invalid buffer handle {0:?}")]
    InvalidBuffer(BufferHandle),

    #[error("Write of {len} bytes at offset {offset} exceeds buffer size {size}")]
    WriteOutOfBounds { offset: u64, len: u64, size: u64 },

    #[error("Invalid lighting configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for render operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Lighting configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    /// Frame slots that may be in flight on the device
    pub frames_in_flight: u32,
    /// Tile edge in pixels
    pub tile_size: u32,
    /// Capacity of each tile's light list
    pub max_lights_per_tile: u32,
    /// Growth factor of the cullable light mirrors
    pub mirror_growth: f32,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            tile_size: 16,
            max_lights_per_tile: 256,
            mirror_growth: 1.5,
        }
    }
}

impl LightingConfig {
    /// Check the configuration for values the light system cannot run with
    pub fn validate(&self) -> RenderResult<()> {
        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(RenderError::InvalidConfig(format!(
                "frames_in_flight must be in 1..={MAX_FRAMES_IN_FLIGHT}, got {}",
                self.frames_in_flight
            )));
        }
        if self.tile_size == 0 {
            return Err(RenderError::InvalidConfig("tile_size must be positive".into()));
        }
        if self.max_lights_per_tile == 0 || self.max_lights_per_tile > MAX_LIGHTS_PER_TILE {
            return Err(RenderError::InvalidConfig(format!(
                "max_lights_per_tile must be in 1..={MAX_LIGHTS_PER_TILE}, got {}",
                self.max_lights_per_tile
            )));
        }
        if self.mirror_growth.is_nan() || self.mirror_growth < 1.0 {
            return Err(RenderError::InvalidConfig(format!(
                "mirror_growth must be at least 1.0, got {}",
                self.mirror_growth
            )));
        }
        Ok(())
    }
}
