// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Generational slot arena.
//!
//! Slots are reused through a free list; every reuse bumps the slot generation
//! so identifiers handed out earlier go stale instead of aliasing new entries.

use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;

/// Untyped generational identifier: slot index plus generation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawId(u32, u32);

impl RawId {
    #[allow(
        clippy::cast_possible_truncation,
        reason = "Arena identifiers use 32-bit indices by design."
    )]
    const fn new(idx: usize, generation: u32) -> Self {
        Self(idx as u32, generation)
    }

    /// Slot index.
    pub const fn idx(self) -> usize {
        self.0 as usize
    }

    /// Generation of the slot when this identifier was issued.
    pub const fn generation(self) -> u32 {
        self.1
    }

    /// Returns true if `self` was issued after `other`.
    pub fn is_newer_than(self, other: Self) -> bool {
        (self.1 > other.1) || (self.1 == other.1 && self.0 > other.0)
    }
}

/// Typed wrapper around a [`RawId`].
///
/// Implement it with [`arena_id!`](crate::arena_id) rather than by hand.
pub trait ArenaId: Copy {
    /// Wrap a raw identifier.
    fn from_raw(raw: RawId) -> Self;
    /// Unwrap to the raw identifier.
    fn raw(self) -> RawId;
}

/// Declare a typed arena identifier.
///
/// ```rust
/// use understory_view_tree::{Arena, arena_id};
///
/// arena_id! {
///     /// Identifies a widget.
///     pub struct WidgetId;
/// }
///
/// let mut arena: Arena<WidgetId, &str> = Arena::new();
/// let id = arena.insert("button");
/// assert_eq!(arena.get(id), Some(&"button"));
/// ```
#[macro_export]
macro_rules! arena_id {
    ($(#[$meta:meta])* $vis:vis struct $name:ident;) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        $vis struct $name($crate::RawId);

        impl $crate::ArenaId for $name {
            fn from_raw(raw: $crate::RawId) -> Self {
                Self(raw)
            }

            fn raw(self) -> $crate::RawId {
                self.0
            }
        }
    };
}

struct Slot<T> {
    generation: u32,
    value: T,
}

/// Slot arena keyed by generational identifiers of type `I`.
pub struct Arena<I, T> {
    /// slots
    slots: Vec<Option<Slot<T>>>,
    /// last generation per slot (persists across frees)
    generations: Vec<u32>,
    free_list: Vec<usize>,
    len: usize,
    _id: PhantomData<fn() -> I>,
}

impl<I, T> fmt::Debug for Arena<I, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("slots_total", &self.slots.len())
            .field("slots_alive", &self.len)
            .field("free_list", &self.free_list.len())
            .finish_non_exhaustive()
    }
}

impl<I: ArenaId, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: ArenaId, T> Arena<I, T> {
    /// Create an empty arena.
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            len: 0,
            _id: PhantomData,
        }
    }

    /// Number of live entries.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no entry is live.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert a value and return its identifier.
    pub fn insert(&mut self, value: T) -> I {
        self.insert_with(|_| value)
    }

    /// Insert a value built from its own identifier.
    pub fn insert_with(&mut self, make: impl FnOnce(I) -> T) -> I {
        let (idx, generation) = if let Some(idx) = self.free_list.pop() {
            let generation = self.generations[idx].saturating_add(1);
            self.generations[idx] = generation;
            (idx, generation)
        } else {
            self.slots.push(None);
            self.generations.push(1);
            (self.slots.len() - 1, 1)
        };
        let id = I::from_raw(RawId::new(idx, generation));
        self.slots[idx] = Some(Slot {
            generation,
            value: make(id),
        });
        self.len += 1;
        id
    }

    /// Remove an entry. Returns `None` for stale identifiers.
    pub fn remove(&mut self, id: I) -> Option<T> {
        let raw = id.raw();
        let slot = self.slots.get_mut(raw.idx())?;
        if slot.as_ref().map(|s| s.generation) != Some(raw.generation()) {
            return None;
        }
        let value = slot.take().map(|s| s.value);
        self.free_list.push(raw.idx());
        self.len -= 1;
        value
    }

    /// Returns true if `id` refers to a live entry.
    pub fn contains(&self, id: I) -> bool {
        self.get(id).is_some()
    }

    /// Shared access to a live entry.
    pub fn get(&self, id: I) -> Option<&T> {
        let raw = id.raw();
        self.slots
            .get(raw.idx())?
            .as_ref()
            .filter(|s| s.generation == raw.generation())
            .map(|s| &s.value)
    }

    /// Mutable access to a live entry.
    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        let raw = id.raw();
        self.slots
            .get_mut(raw.idx())?
            .as_mut()
            .filter(|s| s.generation == raw.generation())
            .map(|s| &mut s.value)
    }

    /// Iterate live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(idx, slot)| {
            slot.as_ref()
                .map(|s| (I::from_raw(RawId::new(idx, s.generation)), &s.value))
        })
    }
}

impl<I: ArenaId, T> core::ops::Index<I> for Arena<I, T> {
    type Output = T;

    fn index(&self, id: I) -> &T {
        self.get(id).expect("dangling arena id")
    }
}

impl<I: ArenaId, T> core::ops::IndexMut<I> for Arena<I, T> {
    fn index_mut(&mut self, id: I) -> &mut T {
        self.get_mut(id).expect("dangling arena id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    arena_id! {
        struct TestId;
    }

    #[test]
    fn liveness_insert_remove_reuse() {
        let mut arena: Arena<TestId, u32> = Arena::new();
        let a = arena.insert(1);
        let b = arena.insert(2);
        assert_eq!(arena.len(), 2);

        assert_eq!(arena.remove(a), Some(1));
        assert!(!arena.contains(a));
        assert_eq!(arena.remove(a), None, "double remove must be a no-op");

        let c = arena.insert(3);
        assert!(arena.contains(c));
        assert!(!arena.contains(a), "stale id must not see the new entry");
        if a.0.idx() == c.0.idx() {
            assert!(c.0.generation() > a.0.generation(), "generation must increase on reuse");
        }
        assert_eq!(arena[b], 2);
    }

    #[test]
    fn insert_with_sees_own_id() {
        let mut arena: Arena<TestId, Option<TestId>> = Arena::new();
        let id = arena.insert_with(Some);
        assert_eq!(arena[id], Some(id));
    }

    #[test]
    fn iter_skips_free_slots() {
        let mut arena: Arena<TestId, u32> = Arena::new();
        let a = arena.insert(1);
        let _b = arena.insert(2);
        arena.remove(a);
        let live: Vec<u32> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(live, [2]);
    }

    #[test]
    fn newer_than_semantics() {
        let old = RawId::new(10, 1);
        let newer_same_slot = RawId::new(10, 2);
        let same_gen_higher_slot = RawId::new(11, 2);
        let same_gen_lower_slot = RawId::new(9, 2);

        assert!(newer_same_slot.is_newer_than(old));
        assert!(same_gen_higher_slot.is_newer_than(newer_same_slot));
        assert!(!same_gen_lower_slot.is_newer_than(newer_same_slot));
    }
}
