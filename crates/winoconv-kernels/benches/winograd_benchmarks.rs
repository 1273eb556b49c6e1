//! Criterion benchmarks for the Winograd convolution pipeline.
//!
//! Measures full `execute` calls per kernel shape and tile, the batched GEMM on
//! its own, and the weight transform.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use winoconv_kernels::gemm::{BatchedBlockedGemm, M_BLOCK, N_BLOCK, OperandStrides};
use winoconv_kernels::{KernelShape, PaddingType, Shape2D, Tensor4DShape, WinogradConfig, WinogradConvolution};

fn data(len: usize) -> Vec<f32> {
    (0..len).map(|i| ((i * 31 % 97) as f32 / 97.0) - 0.5).collect()
}

fn bench_execute(c: &mut Criterion) {
    let mut group = c.benchmark_group("execute");
    let cases = [
        ("3x3_auto", (3, 3), None),
        ("3x3_2x2", (3, 3), Some(Shape2D::new(2, 2))),
        ("5x5_auto", (5, 5), None),
        ("5x5_4x4", (5, 5), Some(Shape2D::new(4, 4))),
        ("1x3_auto", (1, 3), None),
        ("1x7_auto", (1, 7), None),
    ];
    let (rows, cols, n_in, n_out) = (56, 56, 32, 32);

    for (label, (kr, kc), tile) in cases {
        let kernel = KernelShape::hwio(kr, kc, n_in, n_out).unwrap();
        let input_shape = Tensor4DShape::nhwc(1, rows, cols, n_in).unwrap();
        let config = WinogradConfig { output_tile: tile, ..WinogradConfig::default() };
        let mut conv =
            WinogradConvolution::<f32>::with_config(&kernel, &input_shape, PaddingType::Same, None, &config).unwrap();
        conv.transform_weights(&data(kernel.size()), None).unwrap();
        let input = data(input_shape.size());
        let mut output = vec![0.0f32; conv.output_shape().size()];

        group.throughput(Throughput::Elements((rows * cols * n_in * n_out * kr * kc) as u64));
        for n_threads in [1, 4] {
            group.bench_with_input(BenchmarkId::new(label, n_threads), &n_threads, |b, &n_threads| {
                b.iter(|| conv.execute(black_box(&mut output), black_box(&input), None, n_threads).unwrap());
            });
        }
    }
    group.finish();
}

fn bench_gemm(c: &mut Criterion) {
    let mut group = c.benchmark_group("batched_gemm");
    for (g, m, k, n) in [(36, 196, 32, 32), (16, 784, 32, 32), (64, 64, 64, 64)] {
        let a = data(g * m * k);
        let b = data(g * k * n);
        let mut out = vec![0.0f32; g * m * n];
        group.throughput(Throughput::Elements((g * m * k * n) as u64));
        group.bench_function(BenchmarkId::from_parameter(format!("{g}x{m}x{k}x{n}")), |bencher| {
            bencher.iter(|| {
                let gemm = BatchedBlockedGemm::<f32, M_BLOCK, N_BLOCK>::new(
                    g,
                    m,
                    k,
                    n,
                    black_box(&a),
                    OperandStrides::new(m * k, k),
                    black_box(&b),
                    OperandStrides::new(k * n, n),
                    &mut out,
                    OperandStrides::new(m * n, n),
                )
                .unwrap();
                gemm.run(0, g).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_transform_weights(c: &mut Criterion) {
    let kernel = KernelShape::hwio(3, 3, 64, 64).unwrap();
    let input_shape = Tensor4DShape::nhwc(1, 28, 28, 64).unwrap();
    let weights = data(kernel.size());
    let mut conv = WinogradConvolution::<f32>::new(&kernel, &input_shape, PaddingType::Same, None).unwrap();
    c.bench_function("transform_weights/3x3_64x64", |b| {
        b.iter(|| conv.transform_weights(black_box(&weights), None).unwrap());
    });
}

criterion_group!(benches, bench_execute, bench_gemm, bench_transform_weights);
criterion_main!(benches);
