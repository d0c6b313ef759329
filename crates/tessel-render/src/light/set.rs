//! Light sets
//!
//! One set per scene key. Directional lights live in a holey array that is
//! re-uploaded whole every frame. Point and spot lights live in parallel
//! dense arrays kept so that enabled lights fill `[0, enabled_count)`;
//! enabling or disabling costs at most one swap.

use std::f32::consts::PI;

use glam::Vec3;
use tessel_core::{Entity, FreeList, TransformSource};

use super::dirty::DirtyMask;
use super::{
    DirectionalLightParameters, LightCullingInfo, LightId, LightInitInfo, LightKind,
    LightParameters, LightType,
};

/// Owner record of a light handle
#[derive(Debug, Clone)]
pub struct LightOwner {
    pub(crate) entity: Entity,
    /// Position in the directional or cullable arrays; changes on swaps
    pub(crate) data_index: u32,
    pub(crate) light_type: LightType,
    pub(crate) is_enabled: bool,
}

/// Cone radius at the far end of a spot light
pub fn cone_radius(range: f32, cos_penumbra: f32) -> f32 {
    let sin_penumbra = (1.0 - cos_penumbra * cos_penumbra).max(0.0).sqrt();
    sin_penumbra * range
}

fn half_angle_cos(angle: f32) -> f32 {
    (angle * 0.5).cos()
}

fn full_angle(cos_half: f32) -> f32 {
    cos_half.clamp(-1.0, 1.0).acos() * 2.0
}

/// Lights of one scene
#[derive(Debug)]
pub struct LightSet {
    owners: FreeList<LightOwner>,

    // Not packed: removed entries leave invalid owners behind
    non_cullable_lights: Vec<DirectionalLightParameters>,
    non_cullable_owners: Vec<LightId>,

    // Packed: enabled lights occupy [0, enabled_count)
    cullable_lights: Vec<LightParameters>,
    culling_info: Vec<LightCullingInfo>,
    cullable_entities: Vec<Entity>,
    cullable_owners: Vec<LightId>,
    dirty_bits: Vec<DirtyMask>,

    transform_flags: Vec<bool>,
    enabled_count: u32,
    /// Union of all dirty bits
    dirty: DirtyMask,
    all_frames: DirtyMask,
}

impl LightSet {
    /// Create an empty set tracking `frame_count` buffer slots
    pub fn new(frame_count: u32) -> Self {
        Self {
            owners: FreeList::new(),
            non_cullable_lights: Vec::new(),
            non_cullable_owners: Vec::new(),
            cullable_lights: Vec::new(),
            culling_info: Vec::new(),
            cullable_entities: Vec::new(),
            cullable_owners: Vec::new(),
            dirty_bits: Vec::new(),
            transform_flags: Vec::new(),
            enabled_count: 0,
            dirty: DirtyMask::CLEAN,
            all_frames: DirtyMask::all(frame_count),
        }
    }

    /// Add a light and read its initial transform
    pub fn add(&mut self, info: &LightInitInfo, transforms: &dyn TransformSource) -> LightId {
        match info.kind {
            LightKind::Directional => self.add_non_cullable(info, transforms),
            LightKind::Point { .. } | LightKind::Spot { .. } => self.add_cullable(info, transforms),
        }
    }

    fn add_non_cullable(&mut self, info: &LightInitInfo, transforms: &dyn TransformSource) -> LightId {
        let index = match self.non_cullable_owners.iter().position(|id| !id.is_valid()) {
            Some(index) => index,
            None => {
                self.non_cullable_owners.push(LightId::INVALID);
                self.non_cullable_lights.push(DirectionalLightParameters::default());
                self.non_cullable_owners.len() - 1
            }
        };

        self.non_cullable_lights[index] = DirectionalLightParameters {
            direction: transforms.orientation(info.entity).to_array(),
            intensity: info.intensity.max(0.0),
            color: info.color.to_array(),
            _pad: 0.0,
        };

        let id = self.owners.add(LightOwner {
            entity: info.entity,
            data_index: index as u32,
            light_type: LightType::Directional,
            is_enabled: info.is_enabled,
        });
        self.non_cullable_owners[index] = id;
        id
    }

    fn add_cullable(&mut self, info: &LightInitInfo, transforms: &dyn TransformSource) -> LightId {
        // First hole past the enabled prefix, else append
        let start = self.enabled_count as usize;
        let index = match self.cullable_owners[start..].iter().position(|id| !id.is_valid()) {
            Some(offset) => start + offset,
            None => {
                self.cullable_lights.push(LightParameters::default());
                self.culling_info.push(LightCullingInfo::default());
                self.cullable_entities.push(Entity::INVALID);
                self.cullable_owners.push(LightId::INVALID);
                self.dirty_bits.push(DirtyMask::CLEAN);
                self.cullable_owners.len() - 1
            }
        };

        let params = cullable_parameters(info);
        self.culling_info[index] = culling_info_for(&params);
        self.cullable_lights[index] = params;

        let id = self.owners.add(LightOwner {
            entity: info.entity,
            data_index: index as u32,
            light_type: info.kind.light_type(),
            is_enabled: info.is_enabled,
        });
        self.cullable_entities[index] = info.entity;
        self.cullable_owners[index] = id;
        self.make_dirty(index);
        self.set_enabled(id, info.is_enabled);

        let index = self.owners[id].data_index as usize;
        self.refresh_transform(index, transforms);
        id
    }

    /// Disable a light and release its handle
    pub fn remove(&mut self, id: LightId) {
        self.set_enabled(id, false);

        let owner = &self.owners[id];
        let index = owner.data_index as usize;
        if owner.light_type == LightType::Directional {
            self.non_cullable_owners[index] = LightId::INVALID;
        } else {
            debug_assert_eq!(self.cullable_owners[index], id);
            self.cullable_owners[index] = LightId::INVALID;
        }
        self.owners.remove(id);
    }

    /// Enable or disable a light, keeping enabled cullable lights packed
    pub fn set_enabled(&mut self, id: LightId, is_enabled: bool) {
        let owner = &mut self.owners[id];
        owner.is_enabled = is_enabled;

        if owner.light_type == LightType::Directional {
            return;
        }

        let data_index = owner.data_index;
        let count = self.enabled_count;

        // Swaps set the dirty bits
        if is_enabled {
            if data_index > count {
                assert!((count as usize) < self.cullable_lights.len());
                self.swap_cullable_lights(data_index, count);
                self.enabled_count += 1;
            } else if data_index == count {
                // Edits made while disabled may have skipped every mirror
                self.make_dirty(data_index as usize);
                self.enabled_count += 1;
            }
        } else if count > 0 {
            let last = count - 1;
            if data_index < last {
                self.swap_cullable_lights(data_index, last);
                self.enabled_count -= 1;
            } else if data_index == last {
                self.enabled_count -= 1;
            }
        }
    }

    /// Refresh world-space fields from the transform source.
    ///
    /// Directional lights always re-read their direction. Cullable lights in
    /// the enabled prefix are refreshed only when their entity moved.
    pub fn update_transforms(&mut self, transforms: &dyn TransformSource) {
        for (index, &id) in self.non_cullable_owners.iter().enumerate() {
            if !id.is_valid() {
                continue;
            }

            let owner = &self.owners[id];
            if owner.is_enabled {
                self.non_cullable_lights[index].direction = transforms.orientation(owner.entity).to_array();
            }
        }

        let count = self.enabled_count as usize;
        if count == 0 {
            return;
        }

        self.transform_flags.resize(count, false);
        transforms.changed_flags(&self.cullable_entities[..count], &mut self.transform_flags[..count]);

        for index in 0..count {
            if self.transform_flags[index] {
                self.refresh_transform(index, transforms);
            }
        }
    }

    /// Set intensity; negative values clamp to zero
    pub fn set_intensity(&mut self, id: LightId, intensity: f32) {
        let intensity = intensity.max(0.0);
        let (light_type, index) = self.locate(id);

        if light_type == LightType::Directional {
            self.non_cullable_lights[index].intensity = intensity;
        } else {
            self.cullable_lights[index].intensity = intensity;
            self.make_dirty(index);
        }
    }

    /// Set color; components must lie in `[0, 1]`
    pub fn set_color(&mut self, id: LightId, color: Vec3) {
        debug_assert!(color.cmple(Vec3::ONE).all() && color.cmpge(Vec3::ZERO).all());
        let (light_type, index) = self.locate(id);

        if light_type == LightType::Directional {
            self.non_cullable_lights[index].color = color.to_array();
        } else {
            self.cullable_lights[index].color = color.to_array();
            self.make_dirty(index);
        }
    }

    /// Set attenuation of a point or spot light
    pub fn set_attenuation(&mut self, id: LightId, attenuation: Vec3) {
        debug_assert!(attenuation.cmpge(Vec3::ZERO).all());
        let index = self.cullable_index(id);
        self.cullable_lights[index].attenuation = attenuation.to_array();
        self.make_dirty(index);
    }

    /// Set range of a point or spot light
    pub fn set_range(&mut self, id: LightId, range: f32) {
        debug_assert!(range >= 0.0);
        let index = self.cullable_index(id);

        let params = &mut self.cullable_lights[index];
        params.range = range;
        let info = &mut self.culling_info[index];
        info.range = range;
        if params.light_type == LightType::Spot as u32 {
            info.cone_radius = cone_radius(range, params.cos_penumbra);
        }
        self.make_dirty(index);
    }

    /// Set the full umbra angle of a spot light, clamped to `[0, π]`.
    ///
    /// Raises the penumbra if it would fall below the new umbra.
    pub fn set_umbra(&mut self, id: LightId, umbra: f32) {
        let index = self.spot_index(id);
        let umbra = umbra.clamp(0.0, PI);
        self.cullable_lights[index].cos_umbra = half_angle_cos(umbra);
        self.make_dirty(index);

        if self.penumbra(id) < umbra {
            self.set_penumbra(id, umbra);
        }
    }

    /// Set the full penumbra angle of a spot light, clamped to `[umbra, π]`
    pub fn set_penumbra(&mut self, id: LightId, penumbra: f32) {
        let index = self.spot_index(id);
        let umbra = self.umbra(id).min(PI);
        let penumbra = penumbra.clamp(umbra, PI);

        let params = &mut self.cullable_lights[index];
        params.cos_penumbra = half_angle_cos(penumbra);
        self.culling_info[index].cone_radius = cone_radius(params.range, params.cos_penumbra);
        self.make_dirty(index);
    }

    /// Whether a light is enabled
    pub fn is_enabled(&self, id: LightId) -> bool {
        self.owners[id].is_enabled
    }

    /// Intensity of a light
    pub fn intensity(&self, id: LightId) -> f32 {
        let (light_type, index) = self.locate(id);
        if light_type == LightType::Directional {
            self.non_cullable_lights[index].intensity
        } else {
            self.cullable_lights[index].intensity
        }
    }

    /// Color of a light
    pub fn color(&self, id: LightId) -> Vec3 {
        let (light_type, index) = self.locate(id);
        if light_type == LightType::Directional {
            Vec3::from_array(self.non_cullable_lights[index].color)
        } else {
            Vec3::from_array(self.cullable_lights[index].color)
        }
    }

    /// Attenuation of a point or spot light
    pub fn attenuation(&self, id: LightId) -> Vec3 {
        Vec3::from_array(self.cullable_lights[self.cullable_index(id)].attenuation)
    }

    /// Range of a point or spot light
    pub fn range(&self, id: LightId) -> f32 {
        self.cullable_lights[self.cullable_index(id)].range
    }

    /// Full umbra angle of a spot light
    pub fn umbra(&self, id: LightId) -> f32 {
        full_angle(self.cullable_lights[self.spot_index(id)].cos_umbra)
    }

    /// Full penumbra angle of a spot light
    pub fn penumbra(&self, id: LightId) -> f32 {
        full_angle(self.cullable_lights[self.spot_index(id)].cos_penumbra)
    }

    /// Type of a light
    pub fn light_type(&self, id: LightId) -> LightType {
        self.owners[id].light_type
    }

    /// Entity supplying a light's transform
    pub fn entity(&self, id: LightId) -> Entity {
        self.owners[id].entity
    }

    /// Current position of a point or spot light in the cullable arrays
    pub fn tier_index(&self, id: LightId) -> u32 {
        let owner = &self.owners[id];
        assert!(owner.light_type != LightType::Directional);
        owner.data_index
    }

    /// Whether `id` refers to a live light of this set
    pub fn contains(&self, id: LightId) -> bool {
        self.owners.is_valid(id)
    }

    /// Number of live lights, enabled or not
    pub fn light_count(&self) -> usize {
        self.owners.len()
    }

    /// Whether any light is live
    pub fn has_lights(&self) -> bool {
        !self.owners.is_empty()
    }

    /// Number of enabled directional lights
    pub fn non_cullable_light_count(&self) -> u32 {
        self.non_cullable_owners
            .iter()
            .filter(|id| id.is_valid() && self.owners[**id].is_enabled)
            .count() as u32
    }

    /// Write enabled directional lights into `out`, in slot order
    pub fn write_non_cullable_lights(&self, out: &mut Vec<DirectionalLightParameters>) {
        out.clear();
        for (index, id) in self.non_cullable_owners.iter().enumerate() {
            if !id.is_valid() {
                continue;
            }

            let owner = &self.owners[*id];
            if owner.is_enabled {
                debug_assert_eq!(owner.data_index as usize, index);
                out.push(self.non_cullable_lights[index]);
            }
        }
    }

    /// Number of enabled point and spot lights
    pub fn cullable_light_count(&self) -> u32 {
        self.enabled_count
    }

    /// Size of the cullable arrays, holes and disabled lights included
    pub fn cullable_capacity(&self) -> usize {
        self.cullable_owners.len()
    }

    /// Owner at a cullable index, if the slot is occupied
    pub fn cullable_owner_at(&self, index: usize) -> Option<LightId> {
        self.cullable_owners.get(index).copied().filter(LightId::is_valid)
    }

    /// Parameters of the enabled point and spot lights
    pub fn cullable_lights(&self) -> &[LightParameters] {
        &self.cullable_lights[..self.enabled_count as usize]
    }

    /// Culling info of the enabled point and spot lights
    pub fn culling_info(&self) -> &[LightCullingInfo] {
        &self.culling_info[..self.enabled_count as usize]
    }

    /// Whether the record at `index` is dirty for `frame_index`
    pub fn is_dirty(&self, index: usize, frame_index: u32) -> bool {
        self.dirty_bits[index].contains(frame_index)
    }

    /// Whether any record is dirty for `frame_index`
    pub fn is_frame_dirty(&self, frame_index: u32) -> bool {
        self.dirty.contains(frame_index)
    }

    pub(crate) fn clear_dirty(&mut self, index: usize, frame_index: u32) {
        self.dirty_bits[index].clear(frame_index);
    }

    pub(crate) fn clear_dirty_prefix(&mut self, count: usize, frame_index: u32) {
        for bits in &mut self.dirty_bits[..count] {
            bits.clear(frame_index);
        }
    }

    pub(crate) fn clear_frame_dirty(&mut self, frame_index: u32) {
        self.dirty.clear(frame_index);
    }

    fn locate(&self, id: LightId) -> (LightType, usize) {
        let owner = &self.owners[id];
        let index = owner.data_index as usize;
        if owner.light_type != LightType::Directional {
            debug_assert_eq!(self.cullable_owners[index], id);
        }
        (owner.light_type, index)
    }

    fn cullable_index(&self, id: LightId) -> usize {
        let (light_type, index) = self.locate(id);
        assert!(light_type != LightType::Directional, "parameter requires a point or spot light");
        index
    }

    fn spot_index(&self, id: LightId) -> usize {
        let (light_type, index) = self.locate(id);
        assert!(light_type == LightType::Spot, "cone angles require a spot light");
        index
    }

    fn refresh_transform(&mut self, index: usize, transforms: &dyn TransformSource) {
        let entity = self.cullable_entities[index];
        let position = transforms.position(entity).to_array();

        let params = &mut self.cullable_lights[index];
        params.position = position;
        let info = &mut self.culling_info[index];
        info.position = position;

        if params.light_type == LightType::Spot as u32 {
            let direction = transforms.orientation(entity).to_array();
            params.direction = direction;
            info.direction = direction;
        }

        self.make_dirty(index);
    }

    fn swap_cullable_lights(&mut self, index1: u32, index2: u32) {
        debug_assert_ne!(index1, index2);
        let (mut a, mut b) = (index1 as usize, index2 as usize);
        assert!(self.cullable_owners[a].is_valid() || self.cullable_owners[b].is_valid());

        if !self.cullable_owners[b].is_valid() {
            std::mem::swap(&mut a, &mut b);
        }

        if !self.cullable_owners[a].is_valid() {
            // Move the light at `b` into the hole at `a`
            let id = self.cullable_owners[b];
            debug_assert_eq!(self.owners[id].data_index as usize, b);
            self.owners[id].data_index = a as u32;

            self.cullable_lights[a] = self.cullable_lights[b];
            self.culling_info[a] = self.culling_info[b];
            self.cullable_entities[a] = self.cullable_entities[b];
            self.cullable_owners.swap(a, b);
            self.make_dirty(a);
            debug_assert!(!self.cullable_owners[b].is_valid());
        } else {
            let id_a = self.cullable_owners[a];
            let id_b = self.cullable_owners[b];
            debug_assert_eq!(self.owners[id_a].data_index as usize, a);
            debug_assert_eq!(self.owners[id_b].data_index as usize, b);
            self.owners[id_a].data_index = b as u32;
            self.owners[id_b].data_index = a as u32;

            self.cullable_lights.swap(a, b);
            self.culling_info.swap(a, b);
            self.cullable_entities.swap(a, b);
            self.cullable_owners.swap(a, b);
            self.make_dirty(a);
            self.make_dirty(b);
        }
    }

    fn make_dirty(&mut self, index: usize) {
        self.dirty_bits[index] = self.all_frames;
        self.dirty = self.all_frames;
    }

    /// Check the packing and owner invariants
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let count = self.enabled_count as usize;
        let mut enabled = 0;

        for (index, &id) in self.cullable_owners.iter().enumerate() {
            if !id.is_valid() {
                assert!(index >= count, "hole at {index} inside enabled prefix {count}");
                continue;
            }

            let owner = &self.owners[id];
            assert_eq!(owner.data_index as usize, index, "owner index out of sync");
            assert_eq!(owner.entity, self.cullable_entities[index], "entity out of sync");
            assert_eq!(owner.light_type as u32, self.cullable_lights[index].light_type);
            assert_eq!(owner.is_enabled, index < count, "light at {index} misplaced for prefix {count}");
            enabled += usize::from(owner.is_enabled);
        }
        assert_eq!(enabled, count);

        for (index, &id) in self.non_cullable_owners.iter().enumerate() {
            if id.is_valid() {
                assert_eq!(self.owners[id].data_index as usize, index);
            }
        }
    }
}

fn cullable_parameters(info: &LightInitInfo) -> LightParameters {
    let mut params = LightParameters {
        intensity: info.intensity.max(0.0),
        color: info.color.to_array(),
        light_type: info.kind.light_type() as u32,
        ..Default::default()
    };

    match info.kind {
        LightKind::Point { range, attenuation } => {
            params.range = range;
            params.attenuation = attenuation.to_array();
        }
        LightKind::Spot {
            range,
            attenuation,
            umbra,
            penumbra,
        } => {
            let umbra = umbra.clamp(0.0, PI);
            let penumbra = penumbra.clamp(umbra, PI);
            params.range = range;
            params.attenuation = attenuation.to_array();
            params.cos_umbra = half_angle_cos(umbra);
            params.cos_penumbra = half_angle_cos(penumbra);
        }
        LightKind::Directional => unreachable!("directional lights are not cullable"),
    }

    params
}

fn culling_info_for(params: &LightParameters) -> LightCullingInfo {
    let cone = if params.light_type == LightType::Spot as u32 {
        cone_radius(params.range, params.cos_penumbra)
    } else {
        0.0
    };

    LightCullingInfo {
        position: params.position,
        range: params.range,
        direction: params.direction,
        cone_radius: cone,
        light_type: params.light_type,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tessel_core::{Transform, TransformStore};

    const FRAMES: u32 = 3;

    fn point(entity: Entity, enabled: bool) -> LightInitInfo {
        LightInitInfo::point(entity, Vec3::ONE, 1.0, 4.0, Vec3::ONE).enabled(enabled)
    }

    fn spawn(store: &mut TransformStore, x: f32) -> Entity {
        store.spawn(Transform::from_position(Vec3::new(x, 0.0, 0.0)))
    }

    fn clear_all_dirty(set: &mut LightSet) {
        for frame in 0..FRAMES {
            set.clear_dirty_prefix(set.cullable_capacity(), frame);
            set.clear_frame_dirty(frame);
        }
    }

    #[test]
    fn test_add_packs_enabled_lights() {
        let mut store = TransformStore::new();
        let mut set = LightSet::new(FRAMES);
        let (ea, eb, ec) = (spawn(&mut store, 1.0), spawn(&mut store, 2.0), spawn(&mut store, 3.0));

        let a = set.add(&point(ea, true), &store);
        let b = set.add(&point(eb, false), &store);
        let c = set.add(&point(ec, true), &store);

        assert_eq!(set.cullable_light_count(), 2);
        assert_eq!(set.tier_index(a), 0);
        assert_eq!(set.tier_index(c), 1);
        assert_eq!(set.tier_index(b), 2);
        assert_eq!(set.cullable_owner_at(2), Some(b));
        set.assert_consistent();
    }

    #[test]
    fn test_disable_swaps_with_last_enabled() {
        let mut store = TransformStore::new();
        let mut set = LightSet::new(FRAMES);
        let (ea, eb, ec) = (spawn(&mut store, 1.0), spawn(&mut store, 2.0), spawn(&mut store, 3.0));
        let a = set.add(&point(ea, true), &store);
        let b = set.add(&point(eb, false), &store);
        let c = set.add(&point(ec, true), &store);
        clear_all_dirty(&mut set);

        set.set_enabled(a, false);

        assert_eq!(set.cullable_light_count(), 1);
        assert_eq!(set.tier_index(c), 0);
        assert_eq!(set.tier_index(a), 1);
        assert_eq!(set.tier_index(b), 2);
        for frame in 0..FRAMES {
            assert!(set.is_dirty(0, frame));
            assert!(set.is_dirty(1, frame));
            assert!(!set.is_dirty(2, frame));
        }
        // Records travel with their owners
        assert_eq!(set.cullable_lights()[0].position, [3.0, 0.0, 0.0]);
        set.assert_consistent();
    }

    #[test]
    fn test_reenable_moves_into_prefix() {
        let mut store = TransformStore::new();
        let mut set = LightSet::new(FRAMES);
        let (ea, eb, ec) = (spawn(&mut store, 1.0), spawn(&mut store, 2.0), spawn(&mut store, 3.0));
        let a = set.add(&point(ea, true), &store);
        let b = set.add(&point(eb, false), &store);
        let c = set.add(&point(ec, true), &store);
        set.set_enabled(a, false);

        set.set_enabled(b, true);

        assert_eq!(set.cullable_light_count(), 2);
        assert_eq!(set.tier_index(c), 0);
        assert_eq!(set.tier_index(b), 1);
        assert_eq!(set.tier_index(a), 2);
        set.assert_consistent();
    }

    #[test]
    fn test_enable_is_idempotent() {
        let mut store = TransformStore::new();
        let mut set = LightSet::new(FRAMES);
        let a = set.add(&point(spawn(&mut store, 0.0), true), &store);
        let b = set.add(&point(spawn(&mut store, 1.0), false), &store);

        set.set_enabled(a, true);
        set.set_enabled(b, false);

        assert_eq!(set.cullable_light_count(), 1);
        assert_eq!(set.tier_index(a), 0);
        assert_eq!(set.tier_index(b), 1);
        set.assert_consistent();
    }

    #[test]
    fn test_remove_leaves_reusable_hole() {
        let mut store = TransformStore::new();
        let mut set = LightSet::new(FRAMES);
        let a = set.add(&point(spawn(&mut store, 0.0), true), &store);
        let b = set.add(&point(spawn(&mut store, 1.0), true), &store);
        let c = set.add(&point(spawn(&mut store, 2.0), false), &store);

        set.remove(a);
        assert!(!set.contains(a));
        assert_eq!(set.cullable_light_count(), 1);
        assert_eq!(set.tier_index(b), 0);
        assert_eq!(set.cullable_owner_at(1), None);
        set.assert_consistent();

        // Enabling `c` moves it into the hole at the prefix boundary
        set.set_enabled(c, true);
        assert_eq!(set.tier_index(c), 1);
        assert_eq!(set.cullable_owner_at(2), None);
        set.assert_consistent();

        // The next add reuses the hole instead of growing
        let d = set.add(&point(spawn(&mut store, 3.0), false), &store);
        assert_eq!(set.tier_index(d), 2);
        assert_eq!(set.cullable_capacity(), 3);
        set.assert_consistent();
    }

    #[test]
    fn test_directional_lights_reuse_holes() {
        let mut store = TransformStore::new();
        let mut set = LightSet::new(FRAMES);
        let sun = store.spawn(Transform::IDENTITY);
        let fill = store.spawn(Transform::IDENTITY);

        let a = set.add(&LightInitInfo::directional(sun, Vec3::ONE, 1.0), &store);
        let b = set.add(&LightInitInfo::directional(fill, Vec3::splat(0.5), 0.5).enabled(false), &store);
        assert_eq!(set.non_cullable_light_count(), 1);

        set.remove(a);
        let c = set.add(&LightInitInfo::directional(sun, Vec3::ONE, 2.0), &store);
        assert_eq!(set.light_count(), 2);

        let mut out = Vec::new();
        set.write_non_cullable_lights(&mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].intensity, 2.0);
        assert_eq!(out[0].direction, [0.0, 0.0, -1.0]);

        set.set_enabled(b, true);
        set.write_non_cullable_lights(&mut out);
        assert_eq!(out.len(), 2);
        assert!(set.is_enabled(c));
        set.assert_consistent();
    }

    #[test]
    fn test_update_transforms_only_touches_moved_enabled_lights() {
        let mut store = TransformStore::new();
        let mut set = LightSet::new(FRAMES);
        let ea = spawn(&mut store, 0.0);
        let eb = spawn(&mut store, 1.0);
        let ec = spawn(&mut store, 2.0);
        let a = set.add(&point(ea, true), &store);
        let b = set.add(&point(eb, true), &store);
        let c = set.add(&point(ec, false), &store);
        store.end_frame();
        clear_all_dirty(&mut set);

        store.translate(eb, Vec3::Y);
        store.translate(ec, Vec3::Y);
        set.update_transforms(&store);

        assert!(!set.is_dirty(set.tier_index(a) as usize, 0));
        assert!(set.is_dirty(set.tier_index(b) as usize, 0));
        assert!(!set.is_dirty(set.tier_index(c) as usize, 0));
        assert_eq!(set.cullable_lights()[1].position, [1.0, 1.0, 0.0]);
        assert_eq!(set.culling_info()[1].position, [1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_directional_direction_follows_entity() {
        let mut store = TransformStore::new();
        let mut set = LightSet::new(FRAMES);
        let sun = store.spawn(Transform::IDENTITY);
        set.add(&LightInitInfo::directional(sun, Vec3::ONE, 1.0), &store);

        store.set_transform(sun, Transform::from_position_euler(Vec3::ZERO, Vec3::new(0.0, PI * 0.5, 0.0)));
        set.update_transforms(&store);

        let mut out = Vec::new();
        set.write_non_cullable_lights(&mut out);
        assert!((Vec3::from_array(out[0].direction) - Vec3::NEG_X).length() < 1e-5);
    }

    #[test]
    fn test_parameter_changes_dirty_every_frame() {
        let mut store = TransformStore::new();
        let mut set = LightSet::new(FRAMES);
        let a = set.add(&point(spawn(&mut store, 0.0), true), &store);
        clear_all_dirty(&mut set);

        set.set_intensity(a, 3.0);
        for frame in 0..FRAMES {
            assert!(set.is_dirty(0, frame));
            assert!(set.is_frame_dirty(frame));
        }

        set.clear_dirty(0, 1);
        assert!(set.is_dirty(0, 0));
        assert!(!set.is_dirty(0, 1));
        assert!(set.is_dirty(0, 2));
    }

    #[test]
    fn test_intensity_clamps_to_zero() {
        let mut store = TransformStore::new();
        let mut set = LightSet::new(FRAMES);
        let a = set.add(&point(spawn(&mut store, 0.0), true), &store);

        set.set_intensity(a, -2.0);
        assert_eq!(set.intensity(a), 0.0);
    }

    #[test]
    fn test_spot_cone_clamping() {
        let mut store = TransformStore::new();
        let mut set = LightSet::new(FRAMES);
        let entity = spawn(&mut store, 0.0);
        let spot = set.add(&LightInitInfo::spot(entity, Vec3::ONE, 1.0, 10.0, Vec3::ONE, 0.5, 1.0), &store);

        assert!((set.umbra(spot) - 0.5).abs() < 1e-5);
        assert!((set.penumbra(spot) - 1.0).abs() < 1e-5);

        // Penumbra follows a wider umbra
        set.set_umbra(spot, 1.5);
        assert!((set.penumbra(spot) - 1.5).abs() < 1e-4);

        // Penumbra never drops below the umbra
        set.set_penumbra(spot, 0.2);
        assert!((set.penumbra(spot) - set.umbra(spot)).abs() < 1e-4);

        // Angles clamp to π
        set.set_umbra(spot, 10.0);
        assert!((set.umbra(spot) - PI).abs() < 1e-3);
    }

    #[test]
    fn test_cone_radius_tracks_range_and_penumbra() {
        let mut store = TransformStore::new();
        let mut set = LightSet::new(FRAMES);
        let entity = spawn(&mut store, 0.0);
        let spot = set.add(&LightInitInfo::spot(entity, Vec3::ONE, 1.0, 10.0, Vec3::ONE, 0.5, 1.0), &store);
        let index = set.tier_index(spot) as usize;

        assert!((set.culling_info()[index].cone_radius - 10.0 * 0.5f32.sin()).abs() < 1e-4);

        set.set_range(spot, 20.0);
        assert!((set.culling_info()[index].cone_radius - 20.0 * 0.5f32.sin()).abs() < 1e-4);

        set.set_penumbra(spot, 2.0);
        assert!((set.culling_info()[index].cone_radius - 20.0 * 1.0f32.sin()).abs() < 1e-4);
        assert_eq!(set.culling_info()[index].range, 20.0);
    }

    #[test]
    fn test_spot_direction_from_entity() {
        let mut store = TransformStore::new();
        let mut set = LightSet::new(FRAMES);
        let entity = store.spawn(Transform::from_position_euler(Vec3::ONE, Vec3::new(0.0, PI * 0.5, 0.0)));
        let spot = set.add(&LightInitInfo::spot(entity, Vec3::ONE, 1.0, 5.0, Vec3::ONE, 0.3, 0.6), &store);
        let index = set.tier_index(spot) as usize;

        let direction = Vec3::from_array(set.culling_info()[index].direction);
        assert!((direction - Vec3::NEG_X).length() < 1e-5);
        assert_eq!(set.cullable_lights()[index].position, [1.0, 1.0, 1.0]);
    }

    #[test]
    #[should_panic(expected = "cone angles require a spot light")]
    fn test_cone_on_point_light_panics() {
        let mut store = TransformStore::new();
        let mut set = LightSet::new(FRAMES);
        let a = set.add(&point(spawn(&mut store, 0.0), true), &store);
        set.umbra(a);
    }

    #[test]
    #[should_panic(expected = "requires a point or spot light")]
    fn test_range_on_directional_panics() {
        let mut store = TransformStore::new();
        let mut set = LightSet::new(FRAMES);
        let sun = store.spawn(Transform::IDENTITY);
        let a = set.add(&LightInitInfo::directional(sun, Vec3::ONE, 1.0), &store);
        set.set_range(a, 1.0);
    }

    #[test]
    #[should_panic]
    fn test_stale_handle_panics() {
        let mut store = TransformStore::new();
        let mut set = LightSet::new(FRAMES);
        let a = set.add(&point(spawn(&mut store, 0.0), true), &store);
        set.remove(a);
        set.intensity(a);
    }

    #[test]
    fn test_random_operations_keep_invariants() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut store = TransformStore::new();
        let mut set = LightSet::new(FRAMES);
        let mut live: Vec<(LightId, Entity)> = Vec::new();

        for _ in 0..4000 {
            match rng.gen_range(0..10) {
                0..=2 => {
                    let entity = spawn(&mut store, rng.gen_range(-10.0..10.0));
                    let info = if rng.gen_bool(0.5) {
                        point(entity, rng.gen_bool(0.6))
                    } else {
                        LightInitInfo::spot(entity, Vec3::ONE, 1.0, 3.0, Vec3::ONE, 0.4, 0.8)
                            .enabled(rng.gen_bool(0.6))
                    };
                    let id = set.add(&info, &store);
                    live.push((id, entity));
                }
                3 if !live.is_empty() => {
                    let (id, entity) = live.swap_remove(rng.gen_range(0..live.len()));
                    set.remove(id);
                    store.despawn(entity);
                }
                4..=7 if !live.is_empty() => {
                    let (id, _) = live[rng.gen_range(0..live.len())];
                    set.set_enabled(id, rng.gen_bool(0.5));
                }
                _ if !live.is_empty() => {
                    let (_, entity) = live[rng.gen_range(0..live.len())];
                    store.translate(entity, Vec3::X);
                    set.update_transforms(&store);
                    store.end_frame();
                }
                _ => {}
            }

            set.assert_consistent();
        }

        assert_eq!(set.light_count(), live.len());
        for (id, entity) in &live {
            assert_eq!(set.entity(*id), *entity);
        }
    }
}
