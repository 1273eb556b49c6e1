//! Element types the engine can convolve.

use crate::transforms::TransformRegistry;
use bytemuck::Pod;
use half::f16;
use std::fmt::Debug;
use std::ops::{Add, Mul, Sub};
use std::sync::OnceLock;

/// Full-block GEMM routine: `c[rows x cols] = a[rows x k] · b[k x cols]` for
/// one fixed `(M_BLOCK, N_BLOCK)` block shape.
pub type GemmBlockKernel<T> =
    fn(k: usize, a: &[T], lda: usize, b: &[T], ldb: usize, c: &mut [T], ldc: usize);

/// Scalar type flowing through every stage of the pipeline.
///
/// All arithmetic, including GEMM accumulation, happens in `Self`.
pub trait WinogradElement:
    Pod
    + Default
    + PartialOrd
    + Debug
    + Send
    + Sync
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + 'static
{
    const ZERO: Self;
    const NAME: &'static str;

    fn from_f32(v: f32) -> Self;

    /// Smallest representable value, used as an open lower clamp.
    fn lowest() -> Self;
    /// Largest representable value, used as an open upper clamp.
    fn highest() -> Self;

    /// Transforms compiled in for this element type.
    fn transform_registry() -> &'static TransformRegistry<Self>;

    /// Hand-tuned full-block GEMM for the given block shape, if one exists.
    fn specialised_gemm_block(_m_block: usize, _n_block: usize) -> Option<GemmBlockKernel<Self>> {
        None
    }
}

impl WinogradElement for f32 {
    const ZERO: Self = 0.0;
    const NAME: &'static str = "fp32";

    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }

    fn lowest() -> Self {
        f32::NEG_INFINITY
    }

    fn highest() -> Self {
        f32::INFINITY
    }

    fn transform_registry() -> &'static TransformRegistry<Self> {
        static REGISTRY: OnceLock<TransformRegistry<f32>> = OnceLock::new();
        REGISTRY.get_or_init(|| {
            #[allow(unused_mut)]
            let mut registry = TransformRegistry::portable();
            #[cfg(all(target_arch = "aarch64", feature = "neon"))]
            crate::transforms::neon::register(&mut registry);
            registry
        })
    }

    fn specialised_gemm_block(m_block: usize, n_block: usize) -> Option<GemmBlockKernel<Self>> {
        match (m_block, n_block) {
            #[cfg(all(target_arch = "aarch64", feature = "neon"))]
            (8, 12) => Some(crate::gemm::neon::block_8x12_f32),
            _ => None,
        }
    }
}

impl WinogradElement for f16 {
    const ZERO: Self = f16::ZERO;
    const NAME: &'static str = "fp16";

    #[inline]
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }

    fn lowest() -> Self {
        f16::NEG_INFINITY
    }

    fn highest() -> Self {
        f16::INFINITY
    }

    fn transform_registry() -> &'static TransformRegistry<Self> {
        static REGISTRY: OnceLock<TransformRegistry<f16>> = OnceLock::new();
        REGISTRY.get_or_init(TransformRegistry::portable)
    }
}
