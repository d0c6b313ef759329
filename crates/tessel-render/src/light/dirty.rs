//! Per-frame-slot dirty masks.
//!
//! Bit `k` set means the record changed since frame slot `k` last copied it.

use tessel_core::MAX_FRAMES_IN_FLIGHT;

const _: () = assert!(MAX_FRAMES_IN_FLIGHT <= u8::BITS);

/// One dirty bit per frame slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtyMask(u8);

impl DirtyMask {
    /// No slot dirty
    pub const CLEAN: Self = Self(0);

    /// Mask with the low `frame_count` bits set
    pub fn all(frame_count: u32) -> Self {
        assert!(frame_count > 0 && frame_count <= MAX_FRAMES_IN_FLIGHT);
        Self((u16::MAX >> (u16::BITS - frame_count)) as u8)
    }

    /// Whether slot `frame_index` is dirty
    pub fn contains(self, frame_index: u32) -> bool {
        self.0 & Self::bit(frame_index) != 0
    }

    /// Clear slot `frame_index`
    pub fn clear(&mut self, frame_index: u32) {
        self.0 &= !Self::bit(frame_index);
    }

    fn bit(frame_index: u32) -> u8 {
        debug_assert!(frame_index < MAX_FRAMES_IN_FLIGHT);
        1 << frame_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all() {
        assert_eq!(DirtyMask::all(1), DirtyMask(0b1));
        assert_eq!(DirtyMask::all(3), DirtyMask(0b111));
        assert_eq!(DirtyMask::all(8), DirtyMask(0xff));
    }

    #[test]
    fn test_clear_only_touches_one_slot() {
        let mut mask = DirtyMask::all(3);
        mask.clear(1);

        assert!(mask.contains(0));
        assert!(!mask.contains(1));
        assert!(mask.contains(2));

        mask.clear(0);
        mask.clear(2);
        assert_eq!(mask, DirtyMask::CLEAN);
    }

    #[test]
    #[should_panic]
    fn test_zero_frames_rejected() {
        DirtyMask::all(0);
    }
}
