//! Dense source storage with generation-checked handles.
//!
//! Sources sit contiguously so the per-frame pass walks a plain slice, and a
//! settled source is dropped with swap-with-last. Callers hold
//! [`SourceHandle`]s that go through a slot table, so moving a source during
//! compaction never redirects a handle to a different sound, and a handle to
//! a removed source simply stops resolving.

use crate::source::SoundSource;

const INITIAL_CAPACITY: usize = 16;

/// Opaque handle to a source in the engine's pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceHandle {
    slot: u32,
    generation: u32,
}

impl std::fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SourceHandle({}v{})", self.slot, self.generation)
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    dense: Option<usize>,
}

struct Entry {
    slot: u32,
    source: SoundSource,
}

pub(crate) struct SourcePool {
    entries: Vec<Entry>,
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
}

impl SourcePool {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(INITIAL_CAPACITY),
            slots: Vec::with_capacity(INITIAL_CAPACITY),
            free_slots: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn insert(&mut self, source: SoundSource) -> SourceHandle {
        let dense = self.entries.len();
        let slot = match self.free_slots.pop() {
            Some(slot) => {
                self.slots[slot as usize].dense = Some(dense);
                slot
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    dense: Some(dense),
                });
                (self.slots.len() - 1) as u32
            }
        };
        self.entries.push(Entry { slot, source });
        SourceHandle {
            slot,
            generation: self.slots[slot as usize].generation,
        }
    }

    fn dense_index(&self, handle: SourceHandle) -> Option<usize> {
        let slot = self.slots.get(handle.slot as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.dense
    }

    pub fn get(&self, handle: SourceHandle) -> Option<&SoundSource> {
        let index = self.dense_index(handle)?;
        Some(&self.entries[index].source)
    }

    pub fn get_mut(&mut self, handle: SourceHandle) -> Option<&mut SoundSource> {
        let index = self.dense_index(handle)?;
        Some(&mut self.entries[index].source)
    }

    pub fn get_index_mut(&mut self, index: usize) -> &mut SoundSource {
        &mut self.entries[index].source
    }

    /// Removes the source at dense `index` by moving the last one into its place.
    pub fn swap_remove(&mut self, index: usize) -> SoundSource {
        let entry = self.entries.swap_remove(index);
        let slot = &mut self.slots[entry.slot as usize];
        slot.dense = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_slots.push(entry.slot);
        if let Some(moved) = self.entries.get(index) {
            self.slots[moved.slot as usize].dense = Some(index);
        }
        entry.source
    }

    pub fn iter(&self) -> impl Iterator<Item = &SoundSource> {
        self.entries.iter().map(|e| &e.source)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SoundSource> {
        self.entries.iter_mut().map(|e| &mut e.source)
    }
}
