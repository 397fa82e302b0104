//! Frame indices and per-slot resource arenas

use std::ops::{Index, IndexMut};

/// Monotonic count of frames started
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FrameIndex(pub u64);

impl FrameIndex {
    /// Slot used by this frame with `frames_in_flight` slots
    pub fn slot(self, frames_in_flight: usize) -> FrameSlot {
        FrameSlot((self.0 % frames_in_flight as u64) as usize)
    }

    /// The following frame
    pub fn next(self) -> FrameIndex {
        FrameIndex(self.0 + 1)
    }
}

/// One of the `K` interchangeable frame-in-flight resource sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSlot(pub usize);

/// Fixed-size arena with one entry per frame slot
///
/// Entries are only reachable through a [`FrameSlot`], so per-frame
/// resources are reused strictly cyclically.
#[derive(Debug, Clone)]
pub struct PerFrame<T> {
    items: Box<[T]>,
}

impl<T> PerFrame<T> {
    /// Build one entry per slot
    pub fn new<E>(frames_in_flight: usize, mut make: impl FnMut(FrameSlot) -> Result<T, E>) -> Result<Self, E> {
        let items = (0..frames_in_flight)
            .map(|slot| make(FrameSlot(slot)))
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Self {
            items: items.into_boxed_slice(),
        })
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether there are no slots
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate all entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Iterate all entries mutably in slot order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }
}

impl<T> Index<FrameSlot> for PerFrame<T> {
    type Output = T;

    fn index(&self, slot: FrameSlot) -> &T {
        &self.items[slot.0 % self.items.len()]
    }
}

impl<T> IndexMut<FrameSlot> for PerFrame<T> {
    fn index_mut(&mut self, slot: FrameSlot) -> &mut T {
        let len = self.items.len();
        &mut self.items[slot.0 % len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_index_cycles_through_slots() {
        let slots: Vec<usize> = (0..7).map(|i| FrameIndex(i).slot(3).0).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_per_frame_builds_one_entry_per_slot() {
        let arena: PerFrame<usize> = PerFrame::new(2, |slot| Ok::<_, ()>(slot.0 * 10)).unwrap();
        assert_eq!(arena.len(), 2);
        assert_eq!(arena[FrameSlot(1)], 10);
    }

    #[test]
    fn test_per_frame_propagates_construction_error() {
        let result: Result<PerFrame<u32>, &str> =
            PerFrame::new(3, |slot| if slot.0 == 2 { Err("boom") } else { Ok(1) });
        assert_eq!(result.unwrap_err(), "boom");
    }
}
