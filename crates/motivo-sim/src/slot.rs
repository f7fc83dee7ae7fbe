//! The active context slot (§4.7): the single point of contact between the
//! context engine (which may take many ticks to finish a computation) and
//! the simulation loop (which reads it once per tick, lock-free on the hot
//! path).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use motivo_cache::ContextVector;

/// Shared, versioned holder for the currently active context vector.
///
/// Readers (the simulation loop) take a generation number alongside the
/// value so stale writers (a superseded background computation) can detect
/// they've been overtaken and discard their result instead of clobbering a
/// newer one.
#[derive(Debug, Default)]
pub struct ActiveContextSlot {
    value: RwLock<Option<ContextVector>>,
    generation: AtomicU64,
}

impl ActiveContextSlot {
    /// Creates an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation counter, incremented on every `set`/`clear`.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Reads a clone of the active context, if any.
    pub fn get(&self) -> Option<ContextVector> {
        self.value
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Unconditionally replaces the active context, bumping the generation.
    /// Returns the new generation.
    pub fn set(&self, value: ContextVector) -> u64 {
        *self.value.write().unwrap_or_else(|e| e.into_inner()) = Some(value);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Replaces the active context only if `expected_generation` still
    /// matches the slot's generation — i.e. nobody else has written since
    /// the caller started its computation. Returns `true` on success.
    pub fn compare_and_set(&self, expected_generation: u64, value: ContextVector) -> bool {
        if self.generation.load(Ordering::Acquire) != expected_generation {
            return false;
        }
        let mut guard = self.value.write().unwrap_or_else(|e| e.into_inner());
        if self.generation.load(Ordering::Acquire) != expected_generation {
            return false;
        }
        *guard = Some(value);
        self.generation.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Clears the active context, bumping the generation.
    pub fn clear(&self) {
        *self.value.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let slot = ActiveContextSlot::new();
        slot.set(ContextVector(vec![1.0, 2.0]));
        assert_eq!(slot.get().unwrap().0, vec![1.0, 2.0]);
    }

    #[test]
    fn compare_and_set_rejects_stale_generation() {
        let slot = ActiveContextSlot::new();
        let gen0 = slot.generation();
        slot.set(ContextVector(vec![1.0]));
        assert!(!slot.compare_and_set(gen0, ContextVector(vec![9.0])));
        assert_eq!(slot.get().unwrap().0, vec![1.0]);
    }

    #[test]
    fn compare_and_set_accepts_current_generation() {
        let slot = ActiveContextSlot::new();
        let gen = slot.generation();
        assert!(slot.compare_and_set(gen, ContextVector(vec![5.0])));
        assert_eq!(slot.get().unwrap().0, vec![5.0]);
    }

    #[test]
    fn clear_empties_slot_and_bumps_generation() {
        let slot = ActiveContextSlot::new();
        slot.set(ContextVector(vec![1.0]));
        let gen_before = slot.generation();
        slot.clear();
        assert!(slot.get().is_none());
        assert_eq!(slot.generation(), gen_before + 1);
    }
}
