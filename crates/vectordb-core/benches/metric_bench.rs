use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::Rng;
use vectordb_core::metric::{CosineMetric, DistanceMetric, EuclideanMetric};

const DIM: usize = 128;

fn criterion_benchmark(c: &mut Criterion) {
    let mut rng = rand::thread_rng();

    let v1: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let v2: Vec<f32> = (0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect();

    let mut group = c.benchmark_group("distance_kernels");

    group.bench_function("euclidean", |b| {
        b.iter(|| black_box(EuclideanMetric.distance(black_box(&v1), black_box(&v2))))
    });

    group.bench_function("cosine", |b| {
        b.iter(|| black_box(CosineMetric.distance(black_box(&v1), black_box(&v2))))
    });

    group.bench_function("euclidean_scalar_naive", |b| {
        b.iter(|| {
            let mut sum_sq = 0.0f32;
            for i in 0..DIM {
                let diff = v1[i] - v2[i];
                sum_sq += diff * diff;
            }
            black_box(sum_sq.sqrt())
        })
    });

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
