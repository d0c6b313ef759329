//! Generational Handles
//!
//! Stable identifiers backed by a slot array with a free list:
//! - Each handle carries the generation of the slot it was minted from
//! - Freed slots are recycled and their generation bumped
//! - Stale handles fail validation instead of aliasing a new occupant

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// Typed handle with an index and a generation counter
pub struct Handle<T> {
    /// Slot index
    index: u32,
    /// Generation counter to detect stale references
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// Handle that never refers to a live slot
    pub const INVALID: Self = Self {
        index: u32::MAX,
        generation: 0,
        _marker: PhantomData,
    };

    /// Create a handle from its parts
    pub const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// Get the slot index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Get the generation
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Whether this handle was ever minted by an allocator
    pub fn is_valid(&self) -> bool {
        self.index != u32::MAX
    }

    /// Pack into a `u64` with the generation in the high word
    pub fn to_bits(&self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    /// Inverse of [`Handle::to_bits`]
    pub fn from_bits(bits: u64) -> Self {
        Self::new(bits as u32, (bits >> 32) as u32)
    }

    /// Reinterpret as a handle of another type.
    ///
    /// Backends that keep private storage use this to hand out handles typed
    /// after a public marker.
    pub fn cast<U>(self) -> Handle<U> {
        Handle::new(self.index, self.generation)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_bits().hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Handle({}v{})", self.index, self.generation)
        } else {
            f.write_str("Handle(invalid)")
        }
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot array that recycles freed indices
#[derive(Debug)]
pub struct FreeList<T> {
    slots: Vec<Slot<T>>,
    /// Free slot indices for recycling
    free_indices: Vec<u32>,
    len: usize,
}

impl<T> FreeList<T> {
    /// Create an empty free list
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_indices: Vec::new(),
            len: 0,
        }
    }

    /// Store a value and return its handle
    pub fn add(&mut self, value: T) -> Handle<T> {
        self.len += 1;

        if let Some(index) = self.free_indices.pop() {
            let slot = &mut self.slots[index as usize];
            debug_assert!(slot.value.is_none());
            slot.value = Some(value);
            return Handle::new(index, slot.generation);
        }

        assert!(self.slots.len() < u32::MAX as usize, "free list index space exhausted");
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Handle::new(index, 0)
    }

    /// Remove the value behind a handle, returning it if the handle was live
    pub fn remove(&mut self, handle: Handle<T>) -> Option<T> {
        if !self.is_valid(handle) {
            return None;
        }

        let slot = &mut self.slots[handle.index as usize];
        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free_indices.push(handle.index);
        self.len -= 1;
        value
    }

    /// Check if a handle refers to a live value
    pub fn is_valid(&self, handle: Handle<T>) -> bool {
        self.slots
            .get(handle.index as usize)
            .is_some_and(|slot| slot.value.is_some() && slot.generation == handle.generation)
    }

    /// Get the value behind a handle
    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Get the value behind a handle mutably
    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no values are live
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate over live values with their handles
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (Handle::new(index as u32, slot.generation), value))
        })
    }
}

impl<T> Default for FreeList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Handle<T>> for FreeList<T> {
    type Output = T;

    fn index(&self, handle: Handle<T>) -> &T {
        match self.get(handle) {
            Some(value) => value,
            None => panic!("stale or invalid handle {handle:?}"),
        }
    }
}

impl<T> IndexMut<Handle<T>> for FreeList<T> {
    fn index_mut(&mut self, handle: Handle<T>) -> &mut T {
        match self.get_mut(handle) {
            Some(value) => value,
            None => panic!("stale or invalid handle {handle:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_get() {
        let mut list = FreeList::new();
        let a = list.add("a");
        let b = list.add("b");

        assert_eq!(list.len(), 2);
        assert_eq!(list[a], "a");
        assert_eq!(list.get(b), Some(&"b"));
    }

    #[test]
    fn test_recycling() {
        let mut list = FreeList::new();
        let first = list.add(1);
        assert_eq!(list.remove(first), Some(1));
        let second = list.add(2);

        // Same index, different generation
        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());

        // Old handle is no longer valid
        assert!(!list.is_valid(first));
        assert!(list.get(first).is_none());
        assert!(list.is_valid(second));
    }

    #[test]
    fn test_double_remove() {
        let mut list = FreeList::new();
        let handle = list.add(7);
        assert_eq!(list.remove(handle), Some(7));
        assert_eq!(list.remove(handle), None);
        assert!(list.is_empty());
    }

    #[test]
    fn test_invalid_handle() {
        let list: FreeList<u32> = FreeList::new();
        let handle = Handle::<u32>::INVALID;
        assert!(!handle.is_valid());
        assert!(!list.is_valid(handle));
        assert_eq!(Handle::<u32>::default(), handle);
    }

    #[test]
    fn test_bits_roundtrip() {
        let handle = Handle::<u8>::new(42, 3);
        assert_eq!(Handle::<u8>::from_bits(handle.to_bits()), handle);
        assert_eq!(handle.cast::<u16>().index(), 42);
    }

    #[test]
    fn test_iter_skips_holes() {
        let mut list = FreeList::new();
        let a = list.add('a');
        let b = list.add('b');
        let c = list.add('c');
        list.remove(b);

        let live: Vec<_> = list.iter().map(|(h, v)| (h, *v)).collect();
        assert_eq!(live, vec![(a, 'a'), (c, 'c')]);
    }

    #[test]
    #[should_panic]
    fn test_index_stale_panics() {
        let mut list = FreeList::new();
        let handle = list.add(0);
        list.remove(handle);
        let _ = list[handle];
    }
}
