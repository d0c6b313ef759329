//! Headless Light Stress Scenario
//!
//! Two light sets share one transform store. Each frame toggles and moves a
//! handful of random lights, refreshes transforms, then synchronizes and
//! culls the active set on the headless device. The view grows halfway
//! through and the active set alternates every few frames.

use std::f32::consts::PI;
use std::path::Path;

use anyhow::{Context, Result};
use glam::{Mat4, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tessel_core::{MemoryBudget, Transform, TransformStore};
use tessel_render::device::CullingKernel;
use tessel_render::{
    CameraInfo, CullOutcome, FrameInfo, HeadlessDevice, HeadlessRecorder, Light, LightInitInfo, LightSetKey,
    LightingConfig, LightingSystem,
};

const LIGHT_SETS: [LightSetKey; 2] = [1, 2];
const DIRECTIONAL_PER_SET: u32 = 3;
const SET_SWITCH_INTERVAL: u32 = 16;
const LIGHT_SPACING: f32 = 4.0;

/// Settings file accepted by `tessel simulate --config`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Lighting system settings
    pub lighting: LightingConfig,
    /// Device memory limit of the headless device
    pub memory: MemoryBudget,
}

impl SimulationConfig {
    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        config.lighting.validate()?;
        Ok(config)
    }
}

/// Scenario shape
#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub frames: u32,
    /// Lights per grid axis in each set
    pub grid: u32,
    pub seed: u64,
    pub width: u32,
    pub height: u32,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            frames: 120,
            grid: 8,
            seed: 1,
            width: 1280,
            height: 720,
        }
    }
}

/// Dispatch totals over the run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchCounts {
    pub grid_frustums: usize,
    pub cull_lights: usize,
}

/// What the scenario did, printed as JSON
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationSummary {
    pub frames: u32,
    pub light_sets: usize,
    pub lights_per_set: u32,
    pub directional_per_set: u32,
    pub dispatches: DispatchCounts,
    pub full_copies: u32,
    pub records_copied: u64,
    pub culled_frames: u32,
    pub skipped_frames: u32,
    pub degraded_frames: u32,
    pub final_tile_count: [u32; 2],
    pub enabled_cullable: Vec<u32>,
    pub peak_device_bytes: usize,
    pub bytes_written: u64,
    pub write_calls: u64,
}

/// Run the scenario on a fresh headless device, tearing everything down at the end
pub fn run_simulation(config: &SimulationConfig, options: &SimulationOptions) -> Result<SimulationSummary> {
    let device = HeadlessDevice::with_budget(config.memory.clone());
    let mut system = LightingSystem::new(config.lighting.clone())?;
    let view = system.add_view();
    let mut store = TransformStore::new();
    let mut rng = StdRng::seed_from_u64(options.seed);

    let mut lights: Vec<Vec<Light>> = Vec::with_capacity(LIGHT_SETS.len());
    for key in LIGHT_SETS {
        lights.push(populate_set(&mut system, &mut store, &mut rng, key, options.grid));
    }
    store.end_frame();

    let mut summary = SimulationSummary {
        frames: options.frames,
        light_sets: LIGHT_SETS.len(),
        lights_per_set: options.grid.pow(3),
        directional_per_set: DIRECTIONAL_PER_SET,
        ..Default::default()
    };

    let frames_in_flight = system.config().frames_in_flight;
    let (mut width, mut height) = (options.width, options.height);
    let mut recorder = HeadlessRecorder::new(&device);

    for frame in 0..options.frames {
        if frame == options.frames / 2 {
            width = width.saturating_mul(3) / 2;
            height = height.saturating_mul(3) / 2;
            log::debug!("frame {}: resizing view to {}x{}", frame, width, height);
        }

        for set_lights in &lights {
            mutate_lights(&mut system, &mut store, &mut rng, set_lights);
        }
        for key in LIGHT_SETS {
            system.update_transforms(key, &store);
        }

        let light_set = LIGHT_SETS[((frame / SET_SWITCH_INTERVAL) as usize) % LIGHT_SETS.len()];
        let info = FrameInfo {
            frame_index: frame % frames_in_flight,
            width,
            height,
            camera: camera(width, height, options.grid),
            light_set,
        };

        let report = system.sync_and_cull(&device, &mut recorder, view, &info)?;
        match report.sync {
            Some(sync) => {
                summary.full_copies += u32::from(sync.full_copy);
                summary.records_copied += u64::from(sync.records_copied);
            }
            None => summary.degraded_frames += 1,
        }
        match report.cull {
            CullOutcome::Culled { tile_count, .. } => {
                summary.culled_frames += 1;
                summary.final_tile_count = tile_count.to_array();
            }
            CullOutcome::Skipped(reason) => {
                log::trace!("frame {}: culling skipped ({:?})", frame, reason);
                summary.skipped_frames += 1;
            }
        }

        summary.dispatches.grid_frustums += recorder.dispatch_count(CullingKernel::GridFrustums);
        summary.dispatches.cull_lights += recorder.dispatch_count(CullingKernel::CullLights);
        recorder.reset();
        store.end_frame();
    }
    drop(recorder);

    summary.enabled_cullable = LIGHT_SETS
        .iter()
        .map(|&key| system.registry().cullable_light_count(key))
        .collect();
    summary.peak_device_bytes = device.memory().stats().peak_usage();
    summary.bytes_written = device.bytes_written();
    summary.write_calls = device.write_calls();

    for (key, set_lights) in LIGHT_SETS.into_iter().zip(lights) {
        let registry = system.registry_mut();
        for light in set_lights {
            registry.remove(light);
        }
        registry.remove_light_set(key);
    }
    system.shutdown(&device);
    anyhow::ensure!(
        device.live_buffer_count() == 0,
        "{} device buffers leaked",
        device.live_buffer_count()
    );

    log::info!(
        "{} frames culled, {} skipped, {} records copied",
        summary.culled_frames,
        summary.skipped_frames,
        summary.records_copied
    );
    Ok(summary)
}

fn populate_set(
    system: &mut LightingSystem,
    store: &mut TransformStore,
    rng: &mut StdRng,
    key: LightSetKey,
    grid: u32,
) -> Vec<Light> {
    let registry = system.registry_mut();
    let mut lights = Vec::with_capacity((grid.pow(3) + DIRECTIONAL_PER_SET) as usize);

    for i in 0..DIRECTIONAL_PER_SET {
        let pitch = -0.3 - 0.2 * i as f32;
        let yaw = i as f32 * 2.0;
        let sun = store.spawn(Transform::from_position_euler(Vec3::ZERO, Vec3::new(pitch, yaw, 0.0)));
        let color = Vec3::new(1.0, 0.95, 0.85);
        lights.push(registry.add(key, &LightInitInfo::directional(sun, color, 0.5 + i as f32 * 0.25), &*store));
    }

    let half = (grid as f32 - 1.0) * 0.5;
    for x in 0..grid {
        for y in 0..grid {
            for z in 0..grid {
                let position = Vec3::new(x as f32 - half, y as f32 - half, -(z as f32) - 2.0) * LIGHT_SPACING;
                let euler = Vec3::new(rng.gen_range(-0.5..0.5), rng.gen_range(-PI..PI), 0.0);
                let entity = store.spawn(Transform::from_position_euler(position, euler));

                let color = Vec3::new(rng.r#gen(), rng.r#gen(), rng.r#gen());
                let intensity = rng.gen_range(0.5..4.0);
                let range = rng.gen_range(1.0..LIGHT_SPACING * 2.0);
                let attenuation = Vec3::new(1.0, 0.09, 0.032);

                let info = if rng.gen_bool(0.5) {
                    LightInitInfo::point(entity, color, intensity, range, attenuation)
                } else {
                    let umbra = rng.gen_range(0.2..1.0);
                    let penumbra = umbra + rng.gen_range(0.0..0.6);
                    LightInitInfo::spot(entity, color, intensity, range, attenuation, umbra, penumbra)
                };
                lights.push(registry.add(key, &info.enabled(rng.gen_bool(0.75)), &*store));
            }
        }
    }

    lights
}

fn mutate_lights(system: &mut LightingSystem, store: &mut TransformStore, rng: &mut StdRng, lights: &[Light]) {
    if lights.is_empty() {
        return;
    }
    let registry = system.registry_mut();
    let touches = (lights.len() / 16).max(1);

    for _ in 0..touches {
        let light = lights[rng.gen_range(0..lights.len())];
        let is_enabled = light.is_enabled(registry);
        light.set_enabled(registry, !is_enabled);
    }

    for _ in 0..touches {
        let light = lights[rng.gen_range(0..lights.len())];
        let delta = Vec3::new(rng.gen_range(-0.5..0.5), rng.gen_range(-0.5..0.5), rng.gen_range(-0.5..0.5));
        store.translate(light.entity(registry), delta);
    }

    let light = lights[rng.gen_range(0..lights.len())];
    light.set_intensity(registry, rng.gen_range(0.5..4.0));
}

fn camera(width: u32, height: u32, grid: u32) -> CameraInfo {
    let aspect = width.max(1) as f32 / height.max(1) as f32;
    let far = (grid as f32 + 4.0) * LIGHT_SPACING * 2.0;
    CameraInfo::perspective(Mat4::IDENTITY, 60f32.to_radians(), aspect, 0.1, far)
}
