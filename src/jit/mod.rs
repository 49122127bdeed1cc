//! The tiered JIT subsystem (§4.4-§4.5, §6.3-§6.4): a profiler that
//! observes interpreted execution, a tier-up controller that decides when a
//! hot loop is worth translating, a single-pass translator that lowers
//! bytecode to IR, a generation-counted entry cache, and a minimal backend
//! seam a real code generator plugs into.

pub mod backend;
pub mod cache;
pub mod export;
pub mod failure_log;
pub mod ir;
pub mod policy;
pub mod profiler;
pub mod translator;
pub mod value_kind;

pub use backend::{BackendError, CompiledEntry, JitBackend, StubBackend};
pub use cache::EntryCache;
pub use export::ProfilingSnapshot;
pub use failure_log::{FailureLog, FailureReason};
pub use ir::{JitIrInstr, JitIrOp, JitIrProgram};
pub use policy::{queue_tier_up, Blocklist, TierUpRejection};
pub use profiler::{HotPathSample, ModuleProfile};
pub use translator::{translate_loop, TranslationError};
pub use value_kind::{JitValueKind, RolloutStage};

use crate::chunk::Chunk;
use crate::config::CoreConfig;
use rustc_hash::FxHashMap;

/// The JIT subsystem's session state: one per running module, tying the
/// profiler, blocklist, failure log, entry cache, and backend together
/// behind the tier-up/translate/install pipeline (§4.4-§4.5.4).
pub struct JitSession<B: JitBackend> {
    pub config: CoreConfig,
    pub profile: ModuleProfile,
    pub blocklist: Blocklist,
    pub failures: FailureLog,
    pub cache: EntryCache,
    pub backend: B,
    /// Backend-compiled entries actually callable via [`JitBackend::enter`],
    /// keyed the same as `cache`. A pair can have a `cache` entry (the IR,
    /// kept for bookkeeping and future recompiles) without one here — that
    /// is the fallback-after-backend-rejection case, where there is nothing
    /// to enter.
    entries: FxHashMap<(u32, u32), CompiledEntry>,
    /// Total number of times a compiled entry has been entered.
    jit_invocation_count: u64,
    /// Loop hits served directly from `entries` without revisiting the
    /// tier-up gate.
    cache_hit_count: u64,
    /// Loop hits that found nothing in `entries` and fell through to the
    /// tier-up gate.
    cache_miss_count: u64,
    /// Set while a compiled entry is executing and cleared immediately
    /// after it returns; lets a deopt request raised mid-execution defer
    /// its cache invalidation until control is safely back in this
    /// session (§4.5.4).
    pending_invalidate: Option<(u32, u32, u32)>,
}

impl<B: JitBackend> JitSession<B> {
    pub fn new(config: CoreConfig, function_count: usize, backend: B) -> Self {
        let failure_history_capacity = config.failure_history_capacity;
        JitSession {
            profile: ModuleProfile::new(function_count),
            blocklist: Blocklist::new(),
            failures: FailureLog::new(failure_history_capacity),
            cache: EntryCache::new(),
            backend,
            config,
            entries: FxHashMap::default(),
            jit_invocation_count: 0,
            cache_hit_count: 0,
            cache_miss_count: 0,
            pending_invalidate: None,
        }
    }

    /// Records a function-entry hit (§4.4).
    pub fn record_call(&self, function_index: u32) {
        self.profile.record_call(function_index);
    }

    /// Records a loop back-edge hit. If an already-compiled entry exists
    /// for this `(function, loop)` pair, enters it directly (a cache hit,
    /// §4.5.4's "valid entry_point" path). Otherwise falls through to the
    /// tier-up gate and, if this crosses it, attempts to translate, compile,
    /// and enter the loop for the first time (§4.4-§4.5.4). Returns `true`
    /// if a compiled entry was entered, by either path.
    pub fn record_loop_and_maybe_tier_up(
        &mut self,
        function_index: u32,
        function_count: usize,
        loop_index: u32,
        loop_count_in_function: u32,
        chunk: &Chunk,
        loop_header_offset: usize,
    ) -> bool {
        self.profile.record_loop(function_index, loop_index);

        if let Some(entry) = self.entries.get(&(function_index, loop_index)) {
            self.backend.enter(entry);
            self.jit_invocation_count += 1;
            self.cache_hit_count += 1;
            return true;
        }
        self.cache_miss_count += 1;

        let gate = queue_tier_up(
            &self.config,
            &self.profile,
            &self.blocklist,
            &self.cache,
            function_index,
            function_count,
            loop_index,
            loop_count_in_function,
        );
        if gate.is_err() {
            return false;
        }

        match translate_loop(chunk, loop_header_offset, self.config.rollout_stage, self.config.safepoint_interval) {
            Ok(program) => match self.backend.compile_ir(&program) {
                Ok(entry) => {
                    self.backend.enter(&entry);
                    self.jit_invocation_count += 1;
                    self.entries.insert((function_index, loop_index), entry);
                    self.cache.install_entry(function_index, loop_index, program);
                    true
                }
                Err(_) => {
                    // The backend could not produce executable code;
                    // install the one-instruction fallback so the
                    // profiler stops re-queueing, but do not blocklist —
                    // a future backend swap might succeed (§4.5.3).
                    self.cache.install_entry(function_index, loop_index, JitIrProgram::fallback_return());
                    false
                }
            },
            Err(err) => {
                let reason = match err {
                    TranslationError::UnsupportedOpcode { .. } => FailureReason::UnsupportedOpcode,
                    TranslationError::UnsupportedLoopShape { .. } => FailureReason::UnsupportedLoopShape,
                    TranslationError::RolloutDisabled { .. } => FailureReason::RolloutDisabled,
                    TranslationError::KindMismatch { .. } => FailureReason::KindMismatch,
                };
                policy::reject_after_failure(&mut self.blocklist, &mut self.failures, function_index, loop_index, reason);
                self.cache.install_entry(function_index, loop_index, JitIrProgram::fallback_return());
                false
            }
        }
    }

    /// Raised by the backend mid-execution (e.g. a deopt). The actual
    /// cache mutation is deferred to [`JitSession::drain_pending_invalidate`]
    /// so it never races the entry that is still executing (§4.5.4).
    pub fn request_invalidate(&mut self, function_index: u32, loop_index: u32, generation: u32) {
        self.pending_invalidate = Some((function_index, loop_index, generation));
    }

    /// Consumed immediately after a compiled entry returns control to this
    /// session; applies any invalidation the backend requested while it ran.
    pub fn drain_pending_invalidate(&mut self) {
        if let Some((function_index, loop_index, generation)) = self.pending_invalidate.take() {
            if self.cache.invalidate_entry(function_index, loop_index, generation) {
                self.entries.remove(&(function_index, loop_index));
            }
        }
    }

    pub fn jit_invocation_count(&self) -> u64 {
        self.jit_invocation_count
    }

    pub fn cache_hit_count(&self) -> u64 {
        self.cache_hit_count
    }

    pub fn cache_miss_count(&self) -> u64 {
        self.cache_miss_count
    }

    pub fn snapshot(&self, function_count: usize) -> ProfilingSnapshot {
        ProfilingSnapshot::capture_with_jit_stats(
            &self.profile,
            function_count,
            self.config.loop_threshold,
            self.jit_invocation_count,
            self.cache_hit_count,
            self.cache_miss_count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_cold_loop_never_reaches_the_backend() {
        let config = CoreConfig::default();
        let mut session = JitSession::new(config, 1, StubBackend);
        let chunk = Chunk::new();
        let installed = session.record_loop_and_maybe_tier_up(0, 1, 0, 1, &chunk, 0);
        assert!(!installed);
        assert!(session.cache.is_empty());
    }

    #[test]
    fn a_hot_loop_with_an_unsupported_body_is_blocklisted_and_given_a_fallback() {
        let mut config = CoreConfig::default();
        config.loop_threshold = 1;
        let mut session = JitSession::new(config, 1, StubBackend);
        let mut chunk = Chunk::new();
        chunk.write_opcode(crate::opcode::Opcode::MakeArray, 1, 1);
        chunk.write_u8_operand(0, 1, 1);
        chunk.write_u16(0, 1, 1);
        let installed = session.record_loop_and_maybe_tier_up(0, 1, 0, 1, &chunk, 0);
        assert!(!installed);
        assert!(session.blocklist.contains(0, 0));
        assert!(session.cache.lookup_entry(0, 0, 0).is_some());
        assert_eq!(session.failures.len(), 1);
    }

    #[test]
    fn a_hot_loop_that_translates_but_the_stub_backend_rejects_is_not_blocklisted() {
        let mut config = CoreConfig::default();
        config.loop_threshold = 1;
        let mut session = JitSession::new(config, 1, StubBackend);
        let mut chunk = Chunk::new();
        chunk.write_opcode(crate::opcode::Opcode::ReturnVoid, 1, 1);
        let installed = session.record_loop_and_maybe_tier_up(0, 1, 0, 1, &chunk, 0);
        assert!(!installed);
        assert!(!session.blocklist.contains(0, 0));
        assert!(session.cache.lookup_entry(0, 0, 0).is_some());
    }

    /// A backend that always compiles successfully, counting every `enter`
    /// call. Stands in for a real code generator to exercise the
    /// first-compile-then-cache-hit path `StubBackend` can never reach.
    #[derive(Default)]
    struct CountingBackend {
        enters: std::cell::Cell<u32>,
    }

    impl JitBackend for CountingBackend {
        fn compile_ir(&self, _program: &JitIrProgram) -> Result<CompiledEntry, BackendError> {
            Ok(CompiledEntry::new(Box::new(())))
        }

        fn enter(&self, _entry: &CompiledEntry) {
            self.enters.set(self.enters.get() + 1);
        }
    }

    #[test]
    fn a_successful_compile_is_entered_immediately_and_again_on_the_next_hit() {
        let mut config = CoreConfig::default();
        config.loop_threshold = 1;
        let mut chunk = Chunk::new();
        chunk.write_opcode(crate::opcode::Opcode::AddI32, 1, 1);
        chunk.write_u8_operand(2, 1, 1);
        chunk.write_u8_operand(0, 1, 1);
        chunk.write_u8_operand(1, 1, 1);
        let mut session = JitSession::new(config, 1, CountingBackend::default());

        let installed = session.record_loop_and_maybe_tier_up(0, 1, 0, 1, &chunk, 0);
        assert!(installed, "a backend that compiles successfully is entered on first tier-up");
        assert_eq!(session.backend.enters.get(), 1);
        assert_eq!(session.jit_invocation_count(), 1);
        assert_eq!(session.cache_hit_count(), 0);
        assert_eq!(session.cache_miss_count(), 1);

        let installed_again = session.record_loop_and_maybe_tier_up(0, 1, 0, 1, &chunk, 0);
        assert!(installed_again, "a subsequent hit serves the already-compiled entry");
        assert_eq!(session.backend.enters.get(), 2);
        assert_eq!(session.jit_invocation_count(), 2);
        assert_eq!(session.cache_hit_count(), 1);
        assert_eq!(session.cache_miss_count(), 1, "the cache-hit path does not re-count as a miss");
    }
}
