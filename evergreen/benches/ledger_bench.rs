//! Benchmarks for usage aggregation and the preprocessing gate.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use evergreen::gate::PreprocessingGate;
use evergreen::ledger::{self, Usage};
use evergreen::testing::transcript_of_words;

fn ledger_benchmark(c: &mut Criterion) {
    let usages: Vec<Usage> = (0..64)
        .map(|i| Usage::new(1_000 + i, 500 + i, 0.001 * i as f64, 100 + i))
        .collect();

    c.bench_function("ledger_sequential_64", |b| {
        b.iter(|| ledger::sequential(black_box(&usages).iter().copied()))
    });
    c.bench_function("ledger_parallel_64", |b| {
        b.iter(|| ledger::parallel(black_box(&usages).iter().copied()))
    });
    c.bench_function("cost_for_dated_model", |b| {
        b.iter(|| ledger::cost_for(black_box("claude-sonnet-4-20250514"), 12_000, 3_000))
    });
}

fn gate_benchmark(c: &mut Criterion) {
    let gate = PreprocessingGate::default();
    let short = transcript_of_words(500);
    let long = transcript_of_words(12_000);

    c.bench_function("gate_500_words", |b| b.iter(|| gate.evaluate(black_box(&short))));
    c.bench_function("gate_12k_words", |b| b.iter(|| gate.evaluate(black_box(&long))));
}

criterion_group!(benches, ledger_benchmark, gate_benchmark);
criterion_main!(benches);
