//! Generational arena correlating backend replies with their continuation.
//!
//! Each outbound backend call stores its continuation in a slot and carries
//! the slot's [`CorrelationId`]. A slot's generation advances every time it
//! is vacated, so a stale or duplicated reply resolves to nothing instead of
//! to whichever continuation reused the slot.

use derive_more::Display;

/// Handle to a pending continuation: slot index plus generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[display("{index}v{generation}")]
pub struct CorrelationId {
    index: usize,
    generation: u32,
}

impl CorrelationId {
    /// Raw parts, for tests and diagnostics.
    #[must_use]
    pub const fn from_parts(index: usize, generation: u32) -> Self { Self { index, generation } }

    #[must_use]
    pub const fn index(self) -> usize { self.index }

    #[must_use]
    pub const fn generation(self) -> u32 { self.generation }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Arena of pending continuations.
#[derive(Debug)]
pub struct CorrelationArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Default for CorrelationArena<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> CorrelationArena<T> {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Store `value`, returning the id that retrieves it.
    pub fn insert(&mut self, value: T) -> CorrelationId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.value = Some(value);
            return CorrelationId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len();
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        CorrelationId {
            index,
            generation: 0,
        }
    }

    /// Take the continuation for `id`. Each id resolves at most once.
    pub fn remove(&mut self, id: CorrelationId) -> Option<T> {
        let slot = self.slots.get_mut(id.index)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    #[must_use]
    pub fn get(&self, id: CorrelationId) -> Option<&T> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    #[must_use]
    pub fn len(&self) -> usize { self.len }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Remove every pending continuation.
    pub fn drain(&mut self) -> Vec<T> {
        let drained: Vec<T> = self
            .slots
            .iter_mut()
            .filter_map(|slot| {
                let value = slot.value.take()?;
                slot.generation = slot.generation.wrapping_add(1);
                Some(value)
            })
            .collect();
        self.free = (0..self.slots.len()).rev().collect();
        self.len = 0;
        drained
    }
}
