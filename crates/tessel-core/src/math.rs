//! Math utilities
//!
//! Re-exports from glam and the small integer/float helpers GPU bookkeeping needs.

pub use glam::{Mat4, Quat, UVec2, UVec3, Vec2, Vec3, Vec4};

/// Tolerance used by [`is_equal`]
pub const EPSILON: f32 = 1e-5;

/// Ceiling division
#[inline]
pub fn div_ceil(value: u32, divisor: u32) -> u32 {
    debug_assert!(divisor > 0);
    value.div_ceil(divisor)
}

/// Round `size` up to the next multiple of `alignment` (a power of two)
#[inline]
pub fn align_size_up(size: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    let mask = alignment - 1;
    (size + mask) & !mask
}

/// Approximate float equality
#[inline]
pub fn is_equal(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}
