//! End-to-end tier-up scenarios driving `JitSession` over a hand-built
//! chunk, covering both a successful hit-then-invalidate cycle and a
//! rollout-stage rejection.

use orus_core::chunk::Chunk;
use orus_core::config::CoreConfig;
use orus_core::jit::{BackendError, CompiledEntry, JitBackend, JitIrProgram, JitSession, RolloutStage, StubBackend};
use orus_core::opcode::Opcode;
use std::cell::Cell;

fn add_loop_chunk() -> Chunk {
    let mut chunk = Chunk::new();
    let header = chunk.offset();
    chunk.write_opcode(Opcode::AddI32, 1, 1);
    chunk.write_u8_operand(2, 1, 1);
    chunk.write_u8_operand(0, 1, 1);
    chunk.write_u8_operand(1, 1, 1);
    chunk.write_opcode(Opcode::LoopShort, 1, 1);
    let back_offset = (chunk.offset() + 1) - header;
    chunk.write_u8_operand(back_offset as u8, 1, 1);
    chunk
}

/// A loop under the hit threshold never reaches translation; once it
/// crosses the threshold the stub backend rejects the compiled program, so
/// a fallback single-instruction program is cached instead and the pair is
/// not blocklisted (§4.4, §4.5.2).
#[test]
fn a_loop_tiers_up_after_crossing_the_threshold_then_falls_back() {
    let chunk = add_loop_chunk();
    let mut config = CoreConfig::default();
    config.loop_threshold = 3;
    let mut session = JitSession::new(config, 1, StubBackend);

    for _ in 0..2 {
        let installed = session.record_loop_and_maybe_tier_up(0, 1, 0, 1, &chunk, 0);
        assert!(!installed);
        assert!(session.cache.lookup_entry(0, 0, 0).is_none());
    }

    let installed = session.record_loop_and_maybe_tier_up(0, 1, 0, 1, &chunk, 0);
    assert!(!installed, "the stub backend always rejects compile_ir");
    assert!(session.cache.lookup_entry(0, 0, 0).is_some(), "a fallback program is cached regardless");
    assert!(!session.blocklist.contains(0, 0), "a backend rejection is not a shape failure");

    session.request_invalidate(0, 0, 0);
    session.drain_pending_invalidate();
    assert!(session.cache.lookup_entry(0, 0, 0).is_none(), "generation 0 invalidates the latest entry");
}

/// At the `I32Only` rollout stage a loop touching `f64` registers fails
/// translation with an unsupported-shape-adjacent rollout rejection, which
/// blocklists the pair so it is never re-queued.
#[test]
fn a_float_loop_is_rejected_and_blocklisted_at_the_i32_only_stage() {
    let mut chunk = Chunk::new();
    chunk.write_opcode(Opcode::AddF64, 1, 1);
    chunk.write_u8_operand(2, 1, 1);
    chunk.write_u8_operand(0, 1, 1);
    chunk.write_u8_operand(1, 1, 1);

    let mut config = CoreConfig::default();
    config.loop_threshold = 1;
    config.rollout_stage = RolloutStage::I32Only;
    let mut session = JitSession::new(config, 1, StubBackend);

    let installed = session.record_loop_and_maybe_tier_up(0, 1, 0, 1, &chunk, 0);
    assert!(!installed);
    assert!(session.blocklist.contains(0, 0));
    assert_eq!(session.failures.len(), 1);

    // A second hit is rejected immediately by the blocklist, before
    // translation is attempted again.
    let installed_again = session.record_loop_and_maybe_tier_up(0, 1, 0, 1, &chunk, 0);
    assert!(!installed_again);
    assert_eq!(session.failures.len(), 1, "blocklisted pairs are not re-translated");
}

/// The profiling snapshot exported via `JitSession::snapshot` reflects call
/// counts and hot-path samples gathered along the way.
#[test]
fn the_session_snapshot_reflects_recorded_activity() {
    let config = CoreConfig::default();
    let session = JitSession::new(config, 2, StubBackend);
    session.record_call(0);
    session.record_call(0);
    session.record_call(1);

    let snapshot = session.snapshot(2);
    assert_eq!(snapshot.functions.len(), 2);
    assert_eq!(snapshot.functions[0].call_count, 2);
    assert_eq!(snapshot.functions[1].call_count, 1);
}

/// A backend that always compiles, so a tier-up actually produces a
/// callable entry instead of falling back.
#[derive(Default)]
struct AlwaysCompiles {
    enters: Cell<u32>,
}

impl JitBackend for AlwaysCompiles {
    fn compile_ir(&self, _program: &JitIrProgram) -> Result<CompiledEntry, BackendError> {
        Ok(CompiledEntry::new(Box::new(())))
    }

    fn enter(&self, _entry: &CompiledEntry) {
        self.enters.set(self.enters.get() + 1);
    }
}

/// Once a loop's first tier-up attempt produces a real compiled entry, the
/// next hit serves it straight from the session's cache and enters it
/// again, without ever retranslating (§4.5.4, the JITEntry invariant that a
/// cached entry with a valid entry point is callable).
#[test]
fn a_cached_entry_is_entered_again_on_the_next_hit_instead_of_retranslating() {
    let chunk = add_loop_chunk();
    let mut config = CoreConfig::default();
    config.loop_threshold = 1;
    let mut session = JitSession::new(config, 1, AlwaysCompiles::default());

    let installed = session.record_loop_and_maybe_tier_up(0, 1, 0, 1, &chunk, 0);
    assert!(installed);
    assert_eq!(session.jit_invocation_count(), 1);
    assert_eq!(session.cache_hit_count(), 0);
    assert_eq!(session.cache_miss_count(), 1);

    let installed_again = session.record_loop_and_maybe_tier_up(0, 1, 0, 1, &chunk, 0);
    assert!(installed_again);
    assert_eq!(session.backend.enters.get(), 2);
    assert_eq!(session.jit_invocation_count(), 2);
    assert_eq!(session.cache_hit_count(), 1, "the second hit is served from the compiled-entry cache");
    assert_eq!(session.cache_miss_count(), 1);

    let snapshot = session.snapshot(1);
    assert_eq!(snapshot.jit_invocation_count, 2);
    assert_eq!(snapshot.cache_hit_count, 1);
    assert_eq!(snapshot.cache_miss_count, 1);
}
