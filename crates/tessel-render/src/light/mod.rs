//! Dynamic Lights
//!
//! Light types, GPU record layouts and the typed [`Light`] handle. Storage
//! lives in [`set::LightSet`], per-frame device mirrors in
//! [`buffer::LightBuffer`] and the keyed collection of both in
//! [`registry::LightRegistry`].

pub mod buffer;
pub mod dirty;
pub mod registry;
pub mod set;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use tessel_core::{Entity, Handle};

pub use buffer::{LightBuffer, SyncReport};
pub use dirty::DirtyMask;
pub use registry::LightRegistry;
pub use set::{LightOwner, LightSet};

/// Key selecting a light set, typically one per scene
pub type LightSetKey = u64;

/// Handle to a light inside a [`LightSet`]
pub type LightId = Handle<LightOwner>;

/// Light types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum LightType {
    /// Infinitely distant light, never culled
    Directional = 0,
    /// Omnidirectional light with a range
    Point = 1,
    /// Cone light with umbra and penumbra angles
    Spot = 2,
}

impl LightType {
    /// Decode the value stored in GPU records
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Directional),
            1 => Some(Self::Point),
            2 => Some(Self::Spot),
            _ => None,
        }
    }

    /// Whether lights of this type go through tile culling
    pub fn is_cullable(self) -> bool {
        self != Self::Directional
    }
}

/// Type-specific creation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    /// Directional light
    Directional,
    /// Point light
    Point {
        /// Influence radius
        range: f32,
        /// Constant, linear and quadratic attenuation
        attenuation: Vec3,
    },
    /// Spot light
    Spot {
        /// Influence distance along the cone
        range: f32,
        /// Constant, linear and quadratic attenuation
        attenuation: Vec3,
        /// Full inner cone angle in radians
        umbra: f32,
        /// Full outer cone angle in radians
        penumbra: f32,
    },
}

impl LightKind {
    /// Light type of this kind
    pub fn light_type(&self) -> LightType {
        match self {
            Self::Directional => LightType::Directional,
            Self::Point { .. } => LightType::Point,
            Self::Spot { .. } => LightType::Spot,
        }
    }
}

/// Light creation parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightInitInfo {
    /// Entity supplying position and orientation
    pub entity: Entity,
    /// Linear color, components in `[0, 1]`
    pub color: Vec3,
    /// Intensity; negative values clamp to zero
    pub intensity: f32,
    /// Initial enabled state
    pub is_enabled: bool,
    /// Type-specific parameters
    pub kind: LightKind,
}

impl LightInitInfo {
    /// Enabled directional light
    pub fn directional(entity: Entity, color: Vec3, intensity: f32) -> Self {
        Self {
            entity,
            color,
            intensity,
            is_enabled: true,
            kind: LightKind::Directional,
        }
    }

    /// Enabled point light
    pub fn point(entity: Entity, color: Vec3, intensity: f32, range: f32, attenuation: Vec3) -> Self {
        Self {
            entity,
            color,
            intensity,
            is_enabled: true,
            kind: LightKind::Point { range, attenuation },
        }
    }

    /// Enabled spot light
    pub fn spot(
        entity: Entity,
        color: Vec3,
        intensity: f32,
        range: f32,
        attenuation: Vec3,
        umbra: f32,
        penumbra: f32,
    ) -> Self {
        Self {
            entity,
            color,
            intensity,
            is_enabled: true,
            kind: LightKind::Spot {
                range,
                attenuation,
                umbra,
                penumbra,
            },
        }
    }

    /// Override the initial enabled state
    pub fn enabled(mut self, is_enabled: bool) -> Self {
        self.is_enabled = is_enabled;
        self
    }
}

/// GPU record of a directional light
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct DirectionalLightParameters {
    /// World-space direction the light travels
    pub direction: [f32; 3],
    /// Intensity
    pub intensity: f32,
    /// Linear color
    pub color: [f32; 3],
    pub _pad: f32,
}

/// GPU record of a point or spot light
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct LightParameters {
    pub position: [f32; 3],
    pub intensity: f32,
    pub direction: [f32; 3],
    /// [`LightType`] as `u32`
    pub light_type: u32,
    pub color: [f32; 3],
    pub range: f32,
    pub attenuation: [f32; 3],
    /// Cosine of half the umbra angle
    pub cos_umbra: f32,
    /// Cosine of half the penumbra angle
    pub cos_penumbra: f32,
    pub _pad: [f32; 3],
}

/// Compact record the culling kernel reads
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct LightCullingInfo {
    pub position: [f32; 3],
    pub range: f32,
    pub direction: [f32; 3],
    /// Radius of the cone's far cap, spot lights only
    pub cone_radius: f32,
    pub light_type: u32,
    pub _pad: [u32; 3],
}

/// Parameters addressable through the byte-level registry API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightParameter {
    /// `u8`, 0 or 1
    IsEnabled,
    /// `f32`
    Intensity,
    /// `[f32; 3]`
    Color,
    /// `[f32; 3]`
    Attenuation,
    /// `f32`
    Range,
    /// `f32`, full angle in radians
    Umbra,
    /// `f32`, full angle in radians
    Penumbra,
    /// `u32`, read-only
    Type,
    /// `u64` entity bits, read-only
    EntityId,
}

impl LightParameter {
    /// Exact byte size of the parameter's encoding
    pub fn size(self) -> usize {
        match self {
            Self::IsEnabled => 1,
            Self::Intensity | Self::Range | Self::Umbra | Self::Penumbra | Self::Type => 4,
            Self::Color | Self::Attenuation => 12,
            Self::EntityId => 8,
        }
    }

    /// Whether the parameter can be written
    pub fn is_writable(self) -> bool {
        !matches!(self, Self::Type | Self::EntityId)
    }
}

/// Typed handle to a light in a [`LightRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Light {
    /// Light within its set
    pub id: LightId,
    /// Owning set
    pub set_key: LightSetKey,
}

impl Light {
    /// Whether the handle still refers to a live light
    pub fn is_valid(&self, registry: &LightRegistry) -> bool {
        registry
            .light_set(self.set_key)
            .is_some_and(|set| set.contains(self.id))
    }

    fn write<T: Pod>(&self, registry: &mut LightRegistry, parameter: LightParameter, value: T) {
        registry.set_parameter(*self, parameter, bytemuck::bytes_of(&value));
    }

    fn read<T: Pod>(&self, registry: &LightRegistry, parameter: LightParameter) -> T {
        let mut value = T::zeroed();
        registry.get_parameter(*self, parameter, bytemuck::bytes_of_mut(&mut value));
        value
    }

    /// Enable or disable the light
    pub fn set_enabled(&self, registry: &mut LightRegistry, is_enabled: bool) {
        self.write(registry, LightParameter::IsEnabled, u8::from(is_enabled));
    }

    /// Whether the light is enabled
    pub fn is_enabled(&self, registry: &LightRegistry) -> bool {
        self.read::<u8>(registry, LightParameter::IsEnabled) != 0
    }

    /// Set intensity
    pub fn set_intensity(&self, registry: &mut LightRegistry, intensity: f32) {
        self.write(registry, LightParameter::Intensity, intensity);
    }

    pub fn intensity(&self, registry: &LightRegistry) -> f32 {
        self.read(registry, LightParameter::Intensity)
    }

    /// Set color
    pub fn set_color(&self, registry: &mut LightRegistry, color: Vec3) {
        self.write(registry, LightParameter::Color, color.to_array());
    }

    pub fn color(&self, registry: &LightRegistry) -> Vec3 {
        Vec3::from_array(self.read(registry, LightParameter::Color))
    }

    /// Set attenuation of a point or spot light
    pub fn set_attenuation(&self, registry: &mut LightRegistry, attenuation: Vec3) {
        self.write(registry, LightParameter::Attenuation, attenuation.to_array());
    }

    pub fn attenuation(&self, registry: &LightRegistry) -> Vec3 {
        Vec3::from_array(self.read(registry, LightParameter::Attenuation))
    }

    /// Set range of a point or spot light
    pub fn set_range(&self, registry: &mut LightRegistry, range: f32) {
        self.write(registry, LightParameter::Range, range);
    }

    pub fn range(&self, registry: &LightRegistry) -> f32 {
        self.read(registry, LightParameter::Range)
    }

    /// Set both cone angles of a spot light.
    ///
    /// The umbra goes first so the penumbra clamps against the new value.
    pub fn set_cone_angles(&self, registry: &mut LightRegistry, umbra: f32, penumbra: f32) {
        self.write(registry, LightParameter::Umbra, umbra);
        self.write(registry, LightParameter::Penumbra, penumbra);
    }

    pub fn umbra(&self, registry: &LightRegistry) -> f32 {
        self.read(registry, LightParameter::Umbra)
    }

    pub fn penumbra(&self, registry: &LightRegistry) -> f32 {
        self.read(registry, LightParameter::Penumbra)
    }

    /// Light type
    pub fn light_type(&self, registry: &LightRegistry) -> LightType {
        let value = self.read::<u32>(registry, LightParameter::Type);
        match LightType::from_u32(value) {
            Some(light_type) => light_type,
            None => unreachable!("corrupt light type {value}"),
        }
    }

    /// Entity supplying the light's transform
    pub fn entity(&self, registry: &LightRegistry) -> Entity {
        Entity::from_bits(self.read(registry, LightParameter::EntityId))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_layouts() {
        assert_eq!(std::mem::size_of::<DirectionalLightParameters>(), 32);
        assert_eq!(std::mem::size_of::<LightParameters>(), 80);
        assert_eq!(std::mem::size_of::<LightCullingInfo>(), 48);
    }

    #[test]
    fn test_light_type_roundtrip() {
        for light_type in [LightType::Directional, LightType::Point, LightType::Spot] {
            assert_eq!(LightType::from_u32(light_type as u32), Some(light_type));
        }
        assert_eq!(LightType::from_u32(7), None);
        assert!(!LightType::Directional.is_cullable());
        assert!(LightType::Spot.is_cullable());
    }

    #[test]
    fn test_parameter_sizes() {
        assert_eq!(LightParameter::IsEnabled.size(), 1);
        assert_eq!(LightParameter::Color.size(), 12);
        assert_eq!(LightParameter::EntityId.size(), 8);
        assert!(!LightParameter::Type.is_writable());
        assert!(LightParameter::Penumbra.is_writable());
    }

    #[test]
    fn test_init_info_builders() {
        let info = LightInitInfo::point(Entity::INVALID, Vec3::ONE, 2.0, 5.0, Vec3::X).enabled(false);
        assert!(!info.is_enabled);
        assert_eq!(info.kind.light_type(), LightType::Point);
    }
}
