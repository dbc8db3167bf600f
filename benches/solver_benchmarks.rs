//! Criterion benchmarks for hierarchy setup and preconditioned solves.

use amg_solver::{solve, AmgConfig, CsrMatrix, Hierarchy, SolverConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn laplace_2d(nx: usize) -> CsrMatrix {
    let n = nx * nx;
    let mut t = Vec::new();
    for y in 0..nx {
        for x in 0..nx {
            let i = y * nx + x;
            t.push((i, i, 4.0));
            if x > 0 {
                t.push((i, i - 1, -1.0));
            }
            if x + 1 < nx {
                t.push((i, i + 1, -1.0));
            }
            if y > 0 {
                t.push((i, i - nx, -1.0));
            }
            if y + 1 < nx {
                t.push((i, i + nx, -1.0));
            }
        }
    }
    CsrMatrix::from_triplets(t, n, n).unwrap()
}

fn bench_setup(c: &mut Criterion) {
    let mut group = c.benchmark_group("amg_setup");
    for nx in [32usize, 64, 128] {
        let a = laplace_2d(nx);
        group.bench_with_input(BenchmarkId::from_parameter(nx * nx), &a, |bench, a| {
            bench.iter(|| {
                let h = Hierarchy::setup(black_box(a.clone()), &AmgConfig::default()).unwrap();
                black_box(h.level_count())
            })
        });
    }
    group.finish();
}

fn bench_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("amg_pcg_solve");
    group.sample_size(20);
    for nx in [32usize, 64, 128] {
        let a = laplace_2d(nx);
        let b = vec![1.0; a.rows()];
        group.bench_with_input(BenchmarkId::from_parameter(nx * nx), &a, |bench, a| {
            bench.iter(|| {
                let mut x = vec![0.0; a.rows()];
                let report = solve(
                    black_box(a),
                    black_box(&b),
                    &mut x,
                    &SolverConfig::default(),
                    &AmgConfig::default(),
                )
                .unwrap();
                black_box(report.iterations)
            })
        });
    }
    group.finish();
}

fn bench_spmv(c: &mut Criterion) {
    use amg_solver::SparseOperator;
    let a = laplace_2d(128);
    let x = vec![1.0; a.rows()];
    let mut y = vec![0.0; a.rows()];
    c.bench_function("spmv_128x128", |bench| {
        bench.iter(|| {
            a.apply(black_box(&x), &mut y).unwrap();
            black_box(y[0])
        })
    });
}

criterion_group!(benches, bench_setup, bench_solve, bench_spmv);
criterion_main!(benches);
