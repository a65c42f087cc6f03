use criterion::{criterion_group, criterion_main, Criterion};
use glacier_math::smoothing::gaussian_filter;
use glacier_math::stencil::{divflux, divflux_adjoint, gradient_2d};
use ndarray::Array2;
use std::hint::black_box;

fn sample(ny: usize, nx: usize) -> Array2<f64> {
    Array2::from_shape_fn((ny, nx), |(j, i)| ((j * 31 + i * 17) % 97) as f64)
}

fn bench_gradient_256(c: &mut Criterion) {
    let usurf = sample(256, 256);
    c.bench_function("gradient_2d_256x256", |b| {
        b.iter(|| black_box(gradient_2d(&usurf, 100.0)))
    });
}

fn bench_divflux_256(c: &mut Criterion) {
    let u = sample(256, 256);
    let v = u.mapv(|x| 0.5 * x);
    let h = u.mapv(|x| 10.0 + x);
    let g = Array2::ones((256, 256));

    let mut group = c.benchmark_group("divflux_256x256");
    group.bench_function("forward", |b| {
        b.iter(|| black_box(divflux(&u, &v, &h, 100.0)))
    });
    group.bench_function("adjoint", |b| {
        b.iter(|| black_box(divflux_adjoint(&u, &v, &h, 100.0, &g)))
    });
    group.finish();
}

fn bench_gaussian_filter(c: &mut Criterion) {
    let field = sample(128, 128);
    let mut group = c.benchmark_group("gaussian_filter_128x128");
    group.sample_size(20);
    group.bench_function("sigma3", |b| {
        b.iter(|| black_box(gaussian_filter(&field, 3.0, 4.0)))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_gradient_256,
    bench_divflux_256,
    bench_gaussian_filter
);
criterion_main!(benches);
