//! Standalone tier-up pipeline benchmark.
//!
//! Measures hot-loop detection, translation, and entry-cache throughput
//! end to end through `JitSession`, and compares a hot run (translation +
//! cache install) against a cold run (profiling only, never crossing the
//! tier-up threshold).
//!
//! Run with:
//!   cargo run --example jit_bench --release

use std::hint::black_box;
use std::time::{Duration, Instant};

use orus_core::chunk::Chunk;
use orus_core::config::CoreConfig;
use orus_core::jit::{JitSession, StubBackend};
use orus_core::opcode::Opcode;

fn build_add_loop(repeat: usize) -> Chunk {
    let mut chunk = Chunk::new();
    let header = chunk.offset();
    for _ in 0..repeat {
        chunk.write_opcode(Opcode::AddI32, 1, 1);
        chunk.write_u8_operand(2, 1, 1);
        chunk.write_u8_operand(0, 1, 1);
        chunk.write_u8_operand(1, 1, 1);
    }
    chunk.write_opcode(Opcode::LoopShort, 1, 1);
    let back_offset = (chunk.offset() + 1) - header;
    chunk.write_u8_operand(back_offset as u8, 1, 1);
    chunk
}

fn time_it<F: FnMut()>(label: &str, iterations: u32, mut f: F) -> Duration {
    let start = Instant::now();
    for _ in 0..iterations {
        f();
    }
    let elapsed = start.elapsed();
    println!(
        "{label}: {iterations} iterations in {elapsed:?} ({:.1} ns/iter)",
        elapsed.as_nanos() as f64 / iterations as f64
    );
    elapsed
}

/// Drives a loop past the tier-up threshold and times the hot path: the
/// record-loop call that crosses the threshold, translates the loop body,
/// and installs the resulting program in the entry cache. A fresh session
/// is built per iteration so every call actually re-translates instead of
/// hitting the entry cache installed by a prior iteration.
fn bench_hot_tier_up() {
    let chunk = build_add_loop(8);

    time_it("hot tier-up (translate, reject at stub backend)", 10_000, || {
        let config = CoreConfig { loop_threshold: 1, ..CoreConfig::default() };
        let mut session = JitSession::new(config, 1, StubBackend);
        black_box(session.record_loop_and_maybe_tier_up(0, 1, 0, 1, &chunk, 0));
    });
}

/// A loop that never crosses the hit threshold: only profiling overhead is
/// paid, translation is never attempted.
fn bench_cold_loop() {
    let chunk = build_add_loop(8);
    let config = CoreConfig { loop_threshold: u32::MAX, ..CoreConfig::default() };
    let mut session = JitSession::new(config, 1, StubBackend);

    time_it("cold loop (profiling only)", 100_000, || {
        black_box(session.record_loop_and_maybe_tier_up(0, 1, 0, 1, &chunk, 0));
    });
}

fn bench_call_recording() {
    let config = CoreConfig::default();
    let session = JitSession::new(config, 1, StubBackend);

    time_it("call recording", 1_000_000, || {
        session.record_call(0);
    });
}

fn main() {
    println!("=== Tier-up pipeline benchmark ===\n");
    bench_call_recording();
    bench_cold_loop();
    bench_hot_tier_up();
}
