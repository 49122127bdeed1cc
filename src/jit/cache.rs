//! The compiled-entry cache (§4.5.4): one slot per `(function_index,
//! loop_index)` pair, generation-counted so a stale entry referenced by an
//! in-flight call can be told apart from its replacement.

use crate::jit::ir::JitIrProgram;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone)]
struct CacheEntry {
    generation: u32,
    program: JitIrProgram,
}

/// Keyed by `(function_index, loop_index)`. A cache hit returns the
/// installed program only if the caller's `generation` argument is either
/// `0` ("give me whatever is latest") or matches the entry's current
/// generation exactly.
#[derive(Debug, Default)]
pub struct EntryCache {
    entries: FxHashMap<(u32, u32), CacheEntry>,
}

impl EntryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `program` for `(function_index, loop_index)`, replacing any
    /// existing entry and bumping the generation. Returns the new
    /// generation number.
    pub fn install_entry(&mut self, function_index: u32, loop_index: u32, program: JitIrProgram) -> u32 {
        let generation = self
            .entries
            .get(&(function_index, loop_index))
            .map(|e| e.generation + 1)
            .unwrap_or(1);
        self.entries.insert((function_index, loop_index), CacheEntry { generation, program });
        generation
    }

    /// Looks up the entry for `(function_index, loop_index)`. `generation
    /// == 0` means "the current entry, whatever it is"; any other value
    /// only matches if it is still the live generation.
    pub fn lookup_entry(&self, function_index: u32, loop_index: u32, generation: u32) -> Option<&JitIrProgram> {
        let entry = self.entries.get(&(function_index, loop_index))?;
        if generation != 0 && generation != entry.generation {
            return None;
        }
        Some(&entry.program)
    }

    /// Removes the entry for `(function_index, loop_index)` if `generation`
    /// is `0` or matches the live generation; a mismatched generation means
    /// the invalidation request is stale and is a no-op (§4.5.4).
    pub fn invalidate_entry(&mut self, function_index: u32, loop_index: u32, generation: u32) -> bool {
        let Some(entry) = self.entries.get(&(function_index, loop_index)) else {
            return false;
        };
        if generation != 0 && generation != entry.generation {
            return false;
        }
        self.entries.remove(&(function_index, loop_index));
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_then_lookup_with_generation_zero_always_hits() {
        let mut cache = EntryCache::new();
        cache.install_entry(0, 0, JitIrProgram::new());
        assert!(cache.lookup_entry(0, 0, 0).is_some());
    }

    #[test]
    fn reinstalling_bumps_the_generation_and_invalidates_the_old_one() {
        let mut cache = EntryCache::new();
        let first_gen = cache.install_entry(0, 0, JitIrProgram::new());
        let second_gen = cache.install_entry(0, 0, JitIrProgram::new());
        assert_eq!(second_gen, first_gen + 1);
        assert!(cache.lookup_entry(0, 0, first_gen).is_none());
        assert!(cache.lookup_entry(0, 0, second_gen).is_some());
    }

    #[test]
    fn invalidate_with_a_stale_generation_is_a_no_op() {
        let mut cache = EntryCache::new();
        let gen = cache.install_entry(0, 0, JitIrProgram::new());
        assert!(!cache.invalidate_entry(0, 0, gen + 1));
        assert!(cache.lookup_entry(0, 0, 0).is_some());
    }

    #[test]
    fn invalidate_with_generation_zero_always_removes() {
        let mut cache = EntryCache::new();
        cache.install_entry(0, 0, JitIrProgram::new());
        assert!(cache.invalidate_entry(0, 0, 0));
        assert!(cache.lookup_entry(0, 0, 0).is_none());
    }

    #[test]
    fn missing_entries_report_no_hit() {
        let cache = EntryCache::new();
        assert!(cache.lookup_entry(5, 5, 0).is_none());
    }
}
