//! Light Registry
//!
//! Maps scene keys to light sets and owns the per-frame-slot device mirrors
//! they are synchronized into.

use ahash::AHashMap;
use bytemuck::Pod;
use glam::Vec3;
use tessel_core::{TransformSource, MAX_FRAMES_IN_FLIGHT};

use super::buffer::{LightBuffer, SyncReport};
use super::set::LightSet;
use super::{Light, LightInitInfo, LightParameter, LightSetKey};
use crate::device::GraphicsDevice;
use crate::RenderResult;

/// Light sets by key plus one mirror set per frame slot
#[derive(Debug)]
pub struct LightRegistry {
    frame_count: u32,
    sets: AHashMap<LightSetKey, LightSet>,
    buffers: Vec<LightBuffer>,
}

impl LightRegistry {
    /// Create a registry for `frame_count` frames in flight
    pub fn new(frame_count: u32, mirror_growth: f32) -> Self {
        assert!(frame_count > 0 && frame_count <= MAX_FRAMES_IN_FLIGHT);
        Self {
            frame_count,
            sets: AHashMap::new(),
            buffers: (0..frame_count)
                .map(|frame_index| LightBuffer::new(frame_index, mirror_growth))
                .collect(),
        }
    }

    /// Number of frame slots
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Create an empty light set under `key`
    pub fn create_light_set(&mut self, key: LightSetKey) {
        assert!(!self.sets.contains_key(&key), "light set {key} already exists");
        self.sets.insert(key, LightSet::new(self.frame_count));
        log::debug!("created light set {key}");
    }

    /// Remove the light set under `key`; it must hold no lights
    pub fn remove_light_set(&mut self, key: LightSetKey) {
        let set = self.sets.remove(&key);
        assert!(set.is_some(), "unknown light set {key}");
        assert!(set.is_some_and(|set| !set.has_lights()), "light set {key} still holds lights");
        log::debug!("removed light set {key}");
    }

    /// Whether a light set exists under `key`
    pub fn has_light_set(&self, key: LightSetKey) -> bool {
        self.sets.contains_key(&key)
    }

    /// Light set under `key`
    pub fn light_set(&self, key: LightSetKey) -> Option<&LightSet> {
        self.sets.get(&key)
    }

    /// Mutable light set under `key`
    pub fn light_set_mut(&mut self, key: LightSetKey) -> Option<&mut LightSet> {
        self.sets.get_mut(&key)
    }

    /// Keys of every light set
    pub fn light_set_keys(&self) -> impl Iterator<Item = LightSetKey> + '_ {
        self.sets.keys().copied()
    }

    pub(crate) fn set(&self, key: LightSetKey) -> &LightSet {
        match self.sets.get(&key) {
            Some(set) => set,
            None => panic!("unknown light set {key}"),
        }
    }

    pub(crate) fn set_mut(&mut self, key: LightSetKey) -> &mut LightSet {
        match self.sets.get_mut(&key) {
            Some(set) => set,
            None => panic!("unknown light set {key}"),
        }
    }

    fn set_or_create(&mut self, key: LightSetKey) -> &mut LightSet {
        let frame_count = self.frame_count;
        self.sets.entry(key).or_insert_with(|| {
            log::debug!("created light set {key} on first use");
            LightSet::new(frame_count)
        })
    }

    /// Add a light to the set under `key`, creating the set if needed
    pub fn add(&mut self, key: LightSetKey, info: &LightInitInfo, transforms: &dyn TransformSource) -> Light {
        let id = self.set_or_create(key).add(info, transforms);
        Light { id, set_key: key }
    }

    /// Remove a light
    pub fn remove(&mut self, light: Light) {
        self.set_mut(light.set_key).remove(light.id);
    }

    /// Write a parameter from its byte encoding.
    ///
    /// `data` must be exactly [`LightParameter::size`] bytes and the
    /// parameter writable; both are contract violations otherwise.
    pub fn set_parameter(&mut self, light: Light, parameter: LightParameter, data: &[u8]) {
        assert!(parameter.is_writable(), "{parameter:?} is read-only");
        assert_eq!(data.len(), parameter.size(), "size mismatch for {parameter:?}");
        let set = self.set_mut(light.set_key);
        let id = light.id;

        match parameter {
            LightParameter::IsEnabled => {
                debug_assert!(data[0] <= 1);
                set.set_enabled(id, data[0] != 0);
            }
            LightParameter::Intensity => set.set_intensity(id, read(data)),
            LightParameter::Color => set.set_color(id, Vec3::from_array(read(data))),
            LightParameter::Attenuation => set.set_attenuation(id, Vec3::from_array(read(data))),
            LightParameter::Range => set.set_range(id, read(data)),
            LightParameter::Umbra => set.set_umbra(id, read(data)),
            LightParameter::Penumbra => set.set_penumbra(id, read(data)),
            LightParameter::Type | LightParameter::EntityId => unreachable!(),
        }
    }

    /// Read a parameter into its byte encoding
    pub fn get_parameter(&self, light: Light, parameter: LightParameter, out: &mut [u8]) {
        assert_eq!(out.len(), parameter.size(), "size mismatch for {parameter:?}");
        let set = self.set(light.set_key);
        let id = light.id;

        match parameter {
            LightParameter::IsEnabled => out[0] = u8::from(set.is_enabled(id)),
            LightParameter::Intensity => write(out, set.intensity(id)),
            LightParameter::Color => write(out, set.color(id).to_array()),
            LightParameter::Attenuation => write(out, set.attenuation(id).to_array()),
            LightParameter::Range => write(out, set.range(id)),
            LightParameter::Umbra => write(out, set.umbra(id)),
            LightParameter::Penumbra => write(out, set.penumbra(id)),
            LightParameter::Type => write(out, set.light_type(id) as u32),
            LightParameter::EntityId => write(out, set.entity(id).to_bits()),
        }
    }

    /// Refresh transforms of the set under `key`
    pub fn update_transforms(&mut self, key: LightSetKey, transforms: &dyn TransformSource) {
        if let Some(set) = self.sets.get_mut(&key) {
            set.update_transforms(transforms);
        }
    }

    /// Synchronize the set under `key` into frame slot `frame_index`
    pub fn sync(
        &mut self,
        device: &dyn GraphicsDevice,
        key: LightSetKey,
        frame_index: u32,
    ) -> RenderResult<SyncReport> {
        assert!(frame_index < self.frame_count);
        let frame_count = self.frame_count;
        let set = self.sets.entry(key).or_insert_with(|| LightSet::new(frame_count));
        self.buffers[frame_index as usize].sync(device, set, key)
    }

    /// Mirrors of frame slot `frame_index`
    pub fn buffer(&self, frame_index: u32) -> &LightBuffer {
        &self.buffers[frame_index as usize]
    }

    /// Enabled directional lights in the set under `key`
    pub fn non_cullable_light_count(&self, key: LightSetKey) -> u32 {
        self.sets.get(&key).map_or(0, LightSet::non_cullable_light_count)
    }

    /// Enabled point and spot lights in the set under `key`
    pub fn cullable_light_count(&self, key: LightSetKey) -> u32 {
        self.sets.get(&key).map_or(0, LightSet::cullable_light_count)
    }

    /// Release every mirror. All light sets must have been removed.
    pub fn shutdown(&mut self, device: &dyn GraphicsDevice) {
        assert!(self.sets.is_empty(), "{} light sets still alive at shutdown", self.sets.len());
        for buffer in &mut self.buffers {
            buffer.release(device);
        }
    }
}

fn read<T: Pod>(data: &[u8]) -> T {
    bytemuck::pod_read_unaligned(data)
}

fn write<T: Pod>(out: &mut [u8], value: T) {
    out.copy_from_slice(bytemuck::bytes_of(&value));
}
