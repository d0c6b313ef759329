//! # Tessel Core
//!
//! Core runtime pieces shared by the Tessel crates.
//!
//! This crate provides:
//! - **Handles**: Generational slot allocator with a free list
//! - **Transforms**: Entity placement and per-frame change queries
//! - **Memory**: Budgets and statistics for externally allocated memory
//! - **Math**: glam re-exports and integer helpers for GPU bookkeeping

pub mod handle;
pub mod math;
pub mod memory;
pub mod transform;

pub use handle::{FreeList, Handle};
pub use memory::{BudgetExceeded, MemoryBudget, MemoryStats, MemoryTracker};
pub use transform::{Entity, Transform, TransformSource, TransformStore};

/// Upper bound on frames the CPU may run ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: u32 = 8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_handles_are_generational() {
        let mut store = TransformStore::new();
        let first = store.spawn(Transform::IDENTITY);
        store.despawn(first);
        let second = store.spawn(Transform::IDENTITY);

        assert_eq!(first.index(), second.index());
        assert!(!store.is_alive(first));
        assert!(store.is_alive(second));
    }
}
