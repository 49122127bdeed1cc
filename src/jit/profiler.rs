//! Execution profiling (§4.4): per-opcode instruction counts, hash-addressed
//! loop back-edge hits, and function-entry hits, feeding the tier-up
//! controller in [`crate::jit::policy`].
//!
//! Structured as a module/function profile split, but using plain
//! `Cell<u32>` counters rather than atomics: the execution model here is
//! single-threaded and cooperative, so there is no concurrent writer to
//! guard against.

use std::cell::Cell;
use rustc_hash::FxHashMap;

/// Per-function call/loop hit counters and compile-state flags.
#[derive(Debug, Default)]
pub struct FunctionProfile {
    call_count: Cell<u32>,
    loop_count: Cell<u32>,
    compiling: Cell<bool>,
    jit_available: Cell<bool>,
}

impl FunctionProfile {
    pub fn record_call(&self) -> u32 {
        let next = self.call_count.get() + 1;
        self.call_count.set(next);
        next
    }

    pub fn record_loop(&self) -> u32 {
        let next = self.loop_count.get() + 1;
        self.loop_count.set(next);
        next
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.get()
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count.get()
    }

    /// Claims the "currently compiling" flag, returning `false` if another
    /// tier-up attempt already holds it (cooperative single-threaded
    /// re-entrancy guard, not a concurrency lock).
    pub fn try_start_compile(&self) -> bool {
        if self.compiling.get() {
            return false;
        }
        self.compiling.set(true);
        true
    }

    pub fn finish_compile(&self, available: bool) {
        self.compiling.set(false);
        self.jit_available.set(available);
    }

    pub fn is_jit_available(&self) -> bool {
        self.jit_available.get()
    }
}

/// Per-module profile: one [`FunctionProfile`] per function index, plus a
/// hash-addressed table of per-loop back-edge hit counts (§4.4).
#[derive(Debug, Default)]
pub struct ModuleProfile {
    functions: Vec<FunctionProfile>,
    loop_hits: FxHashMap<(u32, u32), Cell<u32>>,
    active: Cell<bool>,
}

impl ModuleProfile {
    pub fn new(function_count: usize) -> Self {
        ModuleProfile {
            functions: (0..function_count).map(|_| FunctionProfile::default()).collect(),
            loop_hits: FxHashMap::default(),
            active: Cell::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn set_active(&self, active: bool) {
        self.active.set(active);
    }

    pub fn function(&self, function_index: u32) -> Option<&FunctionProfile> {
        self.functions.get(function_index as usize)
    }

    /// Records a function-entry hit, a no-op while profiling is inactive.
    pub fn record_call(&self, function_index: u32) -> u32 {
        if !self.is_active() {
            return 0;
        }
        self.function(function_index).map(FunctionProfile::record_call).unwrap_or(0)
    }

    /// Records a loop back-edge hit, keyed by `(function_index, loop_index)`.
    pub fn record_loop(&mut self, function_index: u32, loop_index: u32) -> u32 {
        if !self.is_active() {
            return 0;
        }
        self.function(function_index).map(FunctionProfile::record_loop);
        let counter = self.loop_hits.entry((function_index, loop_index)).or_insert_with(|| Cell::new(0));
        let next = counter.get() + 1;
        counter.set(next);
        next
    }

    pub fn loop_hit_count(&self, function_index: u32, loop_index: u32) -> u32 {
        self.loop_hits.get(&(function_index, loop_index)).map(Cell::get).unwrap_or(0)
    }

    pub fn function_hit_count(&self, function_index: u32) -> u32 {
        self.function(function_index).map(FunctionProfile::call_count).unwrap_or(0)
    }

    /// Whether `(function_index, loop_index)` has crossed the loop
    /// threshold and should be considered hot (§4.4's `is_hot_path`).
    pub fn is_hot_path(&self, function_index: u32, loop_index: u32, loop_threshold: u32) -> bool {
        self.loop_hit_count(function_index, loop_index) >= loop_threshold
    }

    /// Every loop currently above `loop_threshold`, for a profiling export
    /// snapshot (§6.4).
    pub fn hot_path_samples(&self, loop_threshold: u32) -> Vec<HotPathSample> {
        self.loop_hits
            .iter()
            .filter(|(_, count)| count.get() >= loop_threshold)
            .map(|(&(function_index, loop_index), count)| HotPathSample {
                function_index,
                loop_index,
                hit_count: count.get(),
            })
            .collect()
    }
}

/// A single hot loop observation (§4.4), used both by the tier-up
/// controller and by the profiling data export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct HotPathSample {
    pub function_index: u32,
    pub loop_index: u32,
    pub hit_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_profile_does_not_count_calls() {
        let profile = ModuleProfile::new(1);
        profile.set_active(false);
        assert_eq!(profile.record_call(0), 0);
        assert_eq!(profile.function_hit_count(0), 0);
    }

    #[test]
    fn loop_hits_are_tracked_per_function_and_loop_index() {
        let mut profile = ModuleProfile::new(2);
        profile.record_loop(0, 0);
        profile.record_loop(0, 0);
        profile.record_loop(1, 0);
        assert_eq!(profile.loop_hit_count(0, 0), 2);
        assert_eq!(profile.loop_hit_count(1, 0), 1);
        assert_eq!(profile.loop_hit_count(0, 1), 0);
    }

    #[test]
    fn is_hot_path_respects_the_threshold() {
        let mut profile = ModuleProfile::new(1);
        for _ in 0..5 {
            profile.record_loop(0, 0);
        }
        assert!(!profile.is_hot_path(0, 0, 10));
        assert!(profile.is_hot_path(0, 0, 5));
    }

    #[test]
    fn try_start_compile_is_a_single_claim() {
        let function = FunctionProfile::default();
        assert!(function.try_start_compile());
        assert!(!function.try_start_compile());
        function.finish_compile(true);
        assert!(function.try_start_compile());
        assert!(function.is_jit_available());
    }

    #[test]
    fn hot_path_samples_only_include_loops_past_the_threshold() {
        let mut profile = ModuleProfile::new(1);
        profile.record_loop(0, 0);
        let samples = profile.hot_path_samples(2);
        assert!(samples.is_empty());
        profile.record_loop(0, 0);
        let samples = profile.hot_path_samples(2);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].hit_count, 2);
    }
}
