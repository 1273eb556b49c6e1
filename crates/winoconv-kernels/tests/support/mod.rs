//! Shared helpers for winoconv-kernels integration tests.

#![allow(dead_code)]

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use winoconv_kernels::{Activation, KernelShape, PaddingType, Tensor4DShape, TensorOrdering, get_output_shape};

/// Route engine logs to the test harness once; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_env_filter("winoconv_kernels=debug").try_init();
}

/// `len` uniform values in `[-1, 1)` from a fixed seed.
pub fn seeded_values(seed: u64, len: usize) -> Vec<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

/// Direct convolution over NHWC input and HWIO weights, accumulating in f64.
pub fn naive_conv_nhwc(
    input: &[f32],
    input_shape: &Tensor4DShape,
    weights: &[f32],
    kernel_shape: &KernelShape,
    padding: PaddingType,
    bias: Option<&[f32]>,
    activation: Activation,
) -> Vec<f32> {
    let out_shape = get_output_shape(kernel_shape, input_shape, padding).unwrap();
    let (kr, kc) = (kernel_shape.n_rows(), kernel_shape.n_cols());
    let (ci, co) = (kernel_shape.n_input_channels(), kernel_shape.n_output_channels());
    let (ih, iw) = (input_shape.n_rows() as isize, input_shape.n_cols() as isize);
    let (pad_top, pad_left) = padding.top_left(kernel_shape.spatial());
    let (lo, hi) = activation.bounds();

    let mut out = vec![0.0f32; out_shape.size()];
    for b in 0..out_shape.n_batches() {
        for oy in 0..out_shape.n_rows() {
            for ox in 0..out_shape.n_cols() {
                for o in 0..co {
                    let mut acc = bias.map_or(0.0, |b| b[o] as f64);
                    for ky in 0..kr {
                        for kx in 0..kc {
                            let y = (oy + ky) as isize - pad_top as isize;
                            let x = (ox + kx) as isize - pad_left as isize;
                            if y < 0 || x < 0 || y >= ih || x >= iw {
                                continue;
                            }
                            let base = ((b as isize * ih + y) * iw + x) as usize * ci;
                            for i in 0..ci {
                                let w = weights[((ky * kc + kx) * ci + i) * co + o];
                                acc += input[base + i] as f64 * w as f64;
                            }
                        }
                    }
                    let idx = ((b * out_shape.n_rows() + oy) * out_shape.n_cols() + ox) * co + o;
                    out[idx] = (acc as f32).clamp(lo, hi);
                }
            }
        }
    }
    out
}

/// NCHW tensor built from an NHWC one of the same dimensions.
pub fn nhwc_to_nchw(src: &[f32], shape: &Tensor4DShape) -> Vec<f32> {
    assert_eq!(shape.ordering(), TensorOrdering::Nhwc);
    let (n, h, w, c) = (shape.n_batches(), shape.n_rows(), shape.n_cols(), shape.n_channels());
    let mut dst = vec![0.0; src.len()];
    for b in 0..n {
        for y in 0..h {
            for x in 0..w {
                for ch in 0..c {
                    dst[((b * c + ch) * h + y) * w + x] = src[((b * h + y) * w + x) * c + ch];
                }
            }
        }
    }
    dst
}

/// OIHW weights built from HWIO ones.
pub fn hwio_to_oihw(src: &[f32], shape: &KernelShape) -> Vec<f32> {
    let (kr, kc, ci, co) = (shape.n_rows(), shape.n_cols(), shape.n_input_channels(), shape.n_output_channels());
    let mut dst = vec![0.0; src.len()];
    for y in 0..kr {
        for x in 0..kc {
            for i in 0..ci {
                for o in 0..co {
                    dst[((o * ci + i) * kr + y) * kc + x] = src[((y * kc + x) * ci + i) * co + o];
                }
            }
        }
    }
    dst
}

/// Largest absolute difference, panicking on length mismatch.
pub fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "length mismatch");
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
}
