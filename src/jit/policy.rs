//! Tier-up gating (§4.4): decides whether a hot loop should be queued for
//! translation, extending a `CompilationPolicy::should_compile`-style
//! threshold check with the cache-lookup and blocklist steps this core
//! adds.

use crate::config::CoreConfig;
use crate::jit::cache::EntryCache;
use crate::jit::failure_log::FailureLog;
use crate::jit::profiler::ModuleProfile;
use rustc_hash::FxHashSet;

/// Why a tier-up request was not queued (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierUpRejection {
    /// The JIT pipeline is disabled, or no backend is linked in.
    JitDisabled,
    /// `loop_index` does not address a real loop in the named function.
    LoopIndexOutOfBounds,
    /// This `(function, loop)` pair previously failed translation and is
    /// blocklisted (§4.5.3).
    PreviouslyBlocklisted,
    /// `function_index` does not address a real function.
    FunctionIndexInvalid,
    /// An IR program already exists in the cache for this `(function,
    /// loop)` pair. A live, callable entry is checked and entered by the
    /// caller before this gate ever runs, so reaching this rejection means
    /// the cached program is a fallback left behind by an earlier backend
    /// rejection — there is nothing to enter and nothing worth retranslating.
    AlreadyCached,
    /// The loop has not yet crossed the hit-count threshold.
    NotHotEnough,
}

/// The blocklist of `(function_index, loop_index)` pairs whose translation
/// previously failed with an unsupported-shape error (§4.5.3).
#[derive(Debug, Default)]
pub struct Blocklist {
    entries: FxHashSet<(u32, u32)>,
}

impl Blocklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, function_index: u32, loop_index: u32) {
        self.entries.insert((function_index, loop_index));
    }

    pub fn contains(&self, function_index: u32, loop_index: u32) -> bool {
        self.entries.contains(&(function_index, loop_index))
    }
}

/// The tier-up controller's five-step admission gate (§4.4):
///
/// 1. the JIT pipeline must be enabled (and, by construction, a backend
///    must be present for a real translation to matter)
/// 2. `loop_index` must be within the bounds of the function's loop count
/// 3. the pair must not already be blocklisted
/// 4. `function_index` must resolve to a real function
/// 5. the entry cache must not already hold a live entry for the pair
///
/// Returns `Ok(())` once all five steps pass and the loop has crossed the
/// configured hit threshold, or the first [`TierUpRejection`] encountered.
pub fn queue_tier_up(
    config: &CoreConfig,
    profile: &ModuleProfile,
    blocklist: &Blocklist,
    cache: &EntryCache,
    function_index: u32,
    function_count: usize,
    loop_index: u32,
    loop_count_in_function: u32,
) -> Result<(), TierUpRejection> {
    if !config.jit_enabled {
        return Err(TierUpRejection::JitDisabled);
    }
    if loop_index >= loop_count_in_function {
        return Err(TierUpRejection::LoopIndexOutOfBounds);
    }
    if blocklist.contains(function_index, loop_index) {
        return Err(TierUpRejection::PreviouslyBlocklisted);
    }
    if function_index as usize >= function_count {
        return Err(TierUpRejection::FunctionIndexInvalid);
    }
    if cache.lookup_entry(function_index, loop_index, 0).is_some() {
        return Err(TierUpRejection::AlreadyCached);
    }
    if !profile.is_hot_path(function_index, loop_index, config.loop_threshold) {
        return Err(TierUpRejection::NotHotEnough);
    }
    Ok(())
}

/// Records a translation failure against the blocklist and failure log in
/// one step (§4.5.3): once a loop's shape is unsupported it is never
/// re-queued.
pub fn reject_after_failure(
    blocklist: &mut Blocklist,
    log: &mut FailureLog,
    function_index: u32,
    loop_index: u32,
    reason: crate::jit::failure_log::FailureReason,
) {
    blocklist.insert(function_index, loop_index);
    log.record(function_index, loop_index, reason);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::cache::EntryCache;
    use crate::jit::ir::JitIrProgram;

    fn hot_profile(function_index: u32, loop_index: u32, hits: u32) -> ModuleProfile {
        let mut profile = ModuleProfile::new((function_index + 1) as usize);
        for _ in 0..hits {
            profile.record_loop(function_index, loop_index);
        }
        profile
    }

    #[test]
    fn disabled_jit_rejects_before_anything_else() {
        let mut config = CoreConfig::default();
        config.jit_enabled = false;
        let profile = hot_profile(0, 0, 100_000);
        let blocklist = Blocklist::new();
        let cache = EntryCache::new();
        let result = queue_tier_up(&config, &profile, &blocklist, &cache, 0, 1, 0, 1);
        assert_eq!(result, Err(TierUpRejection::JitDisabled));
    }

    #[test]
    fn out_of_bounds_loop_index_is_rejected() {
        let config = CoreConfig::default();
        let profile = hot_profile(0, 0, 100_000);
        let blocklist = Blocklist::new();
        let cache = EntryCache::new();
        let result = queue_tier_up(&config, &profile, &blocklist, &cache, 0, 1, 3, 1);
        assert_eq!(result, Err(TierUpRejection::LoopIndexOutOfBounds));
    }

    #[test]
    fn blocklisted_pairs_are_never_requeued() {
        let config = CoreConfig::default();
        let profile = hot_profile(0, 0, 100_000);
        let mut blocklist = Blocklist::new();
        blocklist.insert(0, 0);
        let cache = EntryCache::new();
        let result = queue_tier_up(&config, &profile, &blocklist, &cache, 0, 1, 0, 1);
        assert_eq!(result, Err(TierUpRejection::PreviouslyBlocklisted));
    }

    #[test]
    fn cached_entries_are_not_requeued() {
        let config = CoreConfig::default();
        let profile = hot_profile(0, 0, 100_000);
        let blocklist = Blocklist::new();
        let mut cache = EntryCache::new();
        cache.install_entry(0, 0, JitIrProgram::new());
        let result = queue_tier_up(&config, &profile, &blocklist, &cache, 0, 1, 0, 1);
        assert_eq!(result, Err(TierUpRejection::AlreadyCached));
    }

    #[test]
    fn cold_loops_are_rejected_as_not_hot_enough() {
        let config = CoreConfig::default();
        let profile = hot_profile(0, 0, 1);
        let blocklist = Blocklist::new();
        let cache = EntryCache::new();
        let result = queue_tier_up(&config, &profile, &blocklist, &cache, 0, 1, 0, 1);
        assert_eq!(result, Err(TierUpRejection::NotHotEnough));
    }

    #[test]
    fn a_hot_uncached_unblocklisted_loop_is_queued() {
        let config = CoreConfig::default();
        let profile = hot_profile(0, 0, config.loop_threshold);
        let blocklist = Blocklist::new();
        let cache = EntryCache::new();
        let result = queue_tier_up(&config, &profile, &blocklist, &cache, 0, 1, 0, 1);
        assert_eq!(result, Ok(()));
    }
}
