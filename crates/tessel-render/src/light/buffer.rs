//! Light Buffer Synchronization
//!
//! One [`LightBuffer`] per frame slot mirrors a [`LightSet`] into device
//! buffers. Directional lights are rewritten whole each frame. Cullable
//! records are copied whole after a resize or a set switch, otherwise only
//! records whose dirty bit for this slot is set.

use std::mem::size_of;

use super::set::LightSet;
use super::{DirectionalLightParameters, LightCullingInfo, LightParameters, LightSetKey};
use crate::device::{BufferDesc, BufferHandle, BufferUsage, GraphicsDevice};
use crate::RenderResult;

const NON_CULLABLE_STRIDE: u64 = size_of::<DirectionalLightParameters>() as u64;
const LIGHT_STRIDE: u64 = size_of::<LightParameters>() as u64;
const CULLING_INFO_STRIDE: u64 = size_of::<LightCullingInfo>() as u64;

/// Outcome of one [`LightBuffer::sync`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Whether the cullable mirrors were rewritten whole
    pub full_copy: bool,
    /// Cullable records written
    pub records_copied: u32,
    /// Enabled directional lights uploaded
    pub non_cullable_count: u32,
    /// Enabled point and spot lights mirrored
    pub cullable_count: u32,
}

#[derive(Debug, Clone, Copy)]
struct Mirror {
    buffer: BufferHandle,
    capacity: u32,
}

/// Device mirrors of a light set for one frame slot
#[derive(Debug)]
pub struct LightBuffer {
    frame_index: u32,
    growth: f32,
    non_cullable: Option<Mirror>,
    cullable_lights: Option<Mirror>,
    culling_info: Option<Mirror>,
    current_set: Option<LightSetKey>,
    staging: Vec<DirectionalLightParameters>,
    non_cullable_count: u32,
    cullable_count: u32,
    degraded: bool,
}

impl LightBuffer {
    /// Create empty mirrors for `frame_index`; cullable mirrors grow by `growth`
    pub fn new(frame_index: u32, growth: f32) -> Self {
        assert!(growth >= 1.0);
        Self {
            frame_index,
            growth,
            non_cullable: None,
            cullable_lights: None,
            culling_info: None,
            current_set: None,
            staging: Vec::new(),
            non_cullable_count: 0,
            cullable_count: 0,
            degraded: false,
        }
    }

    /// Bring the mirrors up to date with `set`.
    ///
    /// On failure the previous mirrors stay bound, the buffer is flagged
    /// degraded and the next successful sync performs a full copy.
    pub fn sync(
        &mut self,
        device: &dyn GraphicsDevice,
        set: &mut LightSet,
        set_key: LightSetKey,
    ) -> RenderResult<SyncReport> {
        let _span = tracing::trace_span!("light_buffer_sync", frame = self.frame_index).entered();

        match self.sync_mirrors(device, set, set_key) {
            Ok(report) => {
                if self.degraded {
                    log::info!("light buffer {} recovered", self.frame_index);
                }
                self.degraded = false;
                Ok(report)
            }
            Err(err) => {
                self.degraded = true;
                self.current_set = None;
                Err(err)
            }
        }
    }

    fn sync_mirrors(
        &mut self,
        device: &dyn GraphicsDevice,
        set: &mut LightSet,
        set_key: LightSetKey,
    ) -> RenderResult<SyncReport> {
        let frame = self.frame_index;

        set.write_non_cullable_lights(&mut self.staging);
        let non_cullable_count = self.staging.len() as u32;
        if non_cullable_count > 0 {
            reserve(
                device,
                &mut self.non_cullable,
                "non-cullable lights",
                NON_CULLABLE_STRIDE,
                non_cullable_count,
                non_cullable_count,
            )?;
            if let Some(mirror) = self.non_cullable {
                device.write_buffer(mirror.buffer, 0, bytemuck::cast_slice(&self.staging))?;
            }
        }
        self.non_cullable_count = non_cullable_count;

        let count = set.cullable_light_count();
        let mut report = SyncReport {
            non_cullable_count,
            cullable_count: count,
            ..Default::default()
        };

        if count > 0 {
            let target = self.grown_capacity(count);
            let mut resized = reserve(
                device,
                &mut self.cullable_lights,
                "cullable lights",
                LIGHT_STRIDE,
                count,
                target,
            )?;
            resized |= reserve(
                device,
                &mut self.culling_info,
                "light culling info",
                CULLING_INFO_STRIDE,
                count,
                target,
            )?;

            let (Some(lights), Some(info)) = (self.cullable_lights, self.culling_info) else {
                unreachable!("mirrors reserved above");
            };

            if resized || self.current_set != Some(set_key) {
                device.write_buffer(lights.buffer, 0, bytemuck::cast_slice(set.cullable_lights()))?;
                device.write_buffer(info.buffer, 0, bytemuck::cast_slice(set.culling_info()))?;
                set.clear_dirty_prefix(count as usize, frame);

                report.full_copy = true;
                report.records_copied = count;
            } else if set.is_frame_dirty(frame) {
                for index in 0..count as usize {
                    if !set.is_dirty(index, frame) {
                        continue;
                    }

                    let light = set.cullable_lights()[index];
                    let culling = set.culling_info()[index];
                    device.write_buffer(lights.buffer, index as u64 * LIGHT_STRIDE, bytemuck::bytes_of(&light))?;
                    device.write_buffer(info.buffer, index as u64 * CULLING_INFO_STRIDE, bytemuck::bytes_of(&culling))?;
                    set.clear_dirty(index, frame);
                    report.records_copied += 1;
                }
            }

            self.current_set = Some(set_key);
        }

        set.clear_frame_dirty(frame);
        self.cullable_count = count;

        if report.records_copied > 0 {
            log::trace!(
                "frame {}: {} light records copied (full: {})",
                frame,
                report.records_copied,
                report.full_copy
            );
        }
        Ok(report)
    }

    fn grown_capacity(&self, count: u32) -> u32 {
        let grown = (count as f64 * self.growth as f64).ceil() as u32;
        grown.max(count)
    }

    /// Frame slot this buffer mirrors into
    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    /// Directional light mirror
    pub fn non_cullable_buffer(&self) -> Option<BufferHandle> {
        self.non_cullable.map(|mirror| mirror.buffer)
    }

    /// Point and spot light mirror
    pub fn cullable_light_buffer(&self) -> Option<BufferHandle> {
        self.cullable_lights.map(|mirror| mirror.buffer)
    }

    /// Culling info mirror
    pub fn culling_info_buffer(&self) -> Option<BufferHandle> {
        self.culling_info.map(|mirror| mirror.buffer)
    }

    /// Record capacity of the cullable mirrors
    pub fn cullable_capacity(&self) -> u32 {
        self.cullable_lights.map_or(0, |mirror| mirror.capacity)
    }

    /// Directional lights uploaded by the last sync
    pub fn non_cullable_count(&self) -> u32 {
        self.non_cullable_count
    }

    /// Cullable lights mirrored by the last sync
    pub fn cullable_count(&self) -> u32 {
        self.cullable_count
    }

    /// Whether the last sync failed and the mirrors may be stale
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Set mirrored by the last successful sync
    pub fn current_set(&self) -> Option<LightSetKey> {
        self.current_set
    }

    /// Release every mirror
    pub fn release(&mut self, device: &dyn GraphicsDevice) {
        for mirror in [
            self.non_cullable.take(),
            self.cullable_lights.take(),
            self.culling_info.take(),
        ]
        .into_iter()
        .flatten()
        {
            device.release_buffer(mirror.buffer);
        }

        self.current_set = None;
        self.non_cullable_count = 0;
        self.cullable_count = 0;
    }
}

/// Grow `mirror` to `target` records when it holds fewer than `needed`.
///
/// The replacement is allocated before the old buffer is released, so a
/// failed allocation leaves the old mirror in place. Returns whether the
/// mirror was replaced.
fn reserve(
    device: &dyn GraphicsDevice,
    mirror: &mut Option<Mirror>,
    label: &str,
    stride: u64,
    needed: u32,
    target: u32,
) -> RenderResult<bool> {
    if needed == 0 || mirror.is_some_and(|m| m.capacity >= needed) {
        return Ok(false);
    }

    let buffer = device.allocate_buffer(&BufferDesc {
        label,
        size: target as u64 * stride,
        usage: BufferUsage::UPLOAD | BufferUsage::STORAGE,
    })?;

    if let Some(old) = mirror.replace(Mirror {
        buffer,
        capacity: target,
    }) {
        device.release_buffer(old.buffer);
    }

    log::debug!("{label} mirror grown to {target} records");
    Ok(true)
}
