// ─────────────────────────────────────────────────────────────────────
// Glacier Inversion — Emulator Benchmark
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────

use criterion::{criterion_group, criterion_main, Criterion};
use glacier_ml::cnn::ConvEmulator;
use glacier_ml::emulator::IceFlowEmulator;
use ndarray::Array3;
use std::hint::black_box;

/// Benchmark: forward and backward pass of a 4 -> 16 -> 16 -> 4 network
/// on a 64x64 grid.
fn bench_conv_emulator(c: &mut Criterion) {
    let emulator = ConvEmulator::random(&[4, 16, 16, 4], 3, 2024).unwrap();
    let input = Array3::from_shape_fn((4, 64, 64), |(k, j, i)| {
        ((k * 7 + j * 3 + i) % 11) as f64 / 11.0
    });
    let (output, trace) = emulator.forward(&input).unwrap();
    let cotangent = output.mapv(|v| v.signum());

    let mut group = c.benchmark_group("conv_emulator_64x64");
    group.sample_size(20);
    group.bench_function("forward", |b| {
        b.iter(|| black_box(emulator.forward(&input).unwrap()))
    });
    group.bench_function("backward", |b| {
        b.iter(|| black_box(emulator.backward(&trace, &cotangent).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_conv_emulator);
criterion_main!(benches);
