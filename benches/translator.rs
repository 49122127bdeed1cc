use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use orus_core::chunk::Chunk;
use orus_core::jit::{translate_loop, RolloutStage};
use orus_core::opcode::Opcode;

/// Builds a loop whose header does `repeat` back-to-back i32 adds before
/// looping back to the header with a `LoopShort`.
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

fn bench_translate_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("translate_loop");

    for &repeat in &[1usize, 16, 256] {
        let chunk = build_add_loop(repeat);
        group.throughput(Throughput::Elements(repeat as u64));
        group.bench_with_input(BenchmarkId::new("add_loop", repeat), &chunk, |b, chunk| {
            b.iter(|| translate_loop(black_box(chunk), 0, RolloutStage::I32Only, 64).unwrap());
        });
    }

    group.finish();
}

fn bench_rejected_rollout(c: &mut Criterion) {
    let mut chunk = Chunk::new();
    chunk.write_opcode(Opcode::AddF64, 1, 1);
    chunk.write_u8_operand(2, 1, 1);
    chunk.write_u8_operand(0, 1, 1);
    chunk.write_u8_operand(1, 1, 1);

    c.bench_function("translate_loop/rollout_rejection", |b| {
        b.iter(|| {
            let _ = translate_loop(black_box(&chunk), 0, RolloutStage::I32Only, 64);
        });
    });
}

criterion_group!(benches, bench_translate_loop, bench_rejected_rollout);
criterion_main!(benches);
