//! NEON kernels for aarch64.

use super::matrices::F2_3;
use super::tile::{MatrixRowMut, TileSource};
use super::{HardwareRequirement, InputTransformImpl, TransformRegistry, unrolled};
use std::arch::aarch64::*;

/// Add the NEON transforms to an `f32` registry.
pub fn register(registry: &mut TransformRegistry<f32>) {
    registry.push_input(
        InputTransformImpl::new("input_4x4_neon", &F2_3, &F2_3, 15, input_4x4_f32)
            .with_requirement(HardwareRequirement::NEON),
    );
}

/// F(2x2, 3x3) input transform, four channels per vector.
///
/// Only dense tiles are vectorised; padded and indirect tiles and the channel
/// remainder go through the scalar kernel.
pub fn input_4x4_f32(
    transform: &InputTransformImpl<f32>,
    n_channels: usize,
    tile: &TileSource<'_, f32>,
    out: &mut MatrixRowMut<'_, f32>,
) {
    let TileSource::Strided { data, ld_row, ld_col } = *tile else {
        return unrolled::input_4x4(transform, n_channels, tile, out);
    };

    let vector_channels = n_channels - n_channels % 4;
    if vector_channels > 0 {
        assert!(
            3 * ld_row + 3 * ld_col + vector_channels <= data.len(),
            "4x4 tile with {vector_channels} channels exceeds source of {}",
            data.len()
        );
        assert!(out.row_len() >= vector_channels);
        // SAFETY: the selector only picks this kernel when NEON is present, and
        // every load stays inside `data` (asserted above).
        unsafe { input_4x4_strided(data, ld_row, ld_col, vector_channels, out) }
    }
    for c in vector_channels..n_channels {
        unrolled::input_4x4_channel(tile, c, out);
    }
}

#[target_feature(enable = "neon")]
unsafe fn input_4x4_strided(
    data: &[f32],
    ld_row: usize,
    ld_col: usize,
    n_channels: usize,
    out: &mut MatrixRowMut<'_, f32>,
) {
    unsafe {
        let base = data.as_ptr();
        let zero = vdupq_n_f32(0.0);
        for c in (0..n_channels).step_by(4) {
            let mut d = [[zero; 4]; 4];
            for (i, row) in d.iter_mut().enumerate() {
                for (j, v) in row.iter_mut().enumerate() {
                    *v = vld1q_f32(base.add(i * ld_row + j * ld_col + c));
                }
            }

            let mut x = [[zero; 4]; 4];
            for j in 0..4 {
                x[0][j] = vsubq_f32(d[0][j], d[2][j]);
                x[1][j] = vaddq_f32(d[1][j], d[2][j]);
                x[2][j] = vsubq_f32(d[2][j], d[1][j]);
                x[3][j] = vsubq_f32(d[1][j], d[3][j]);
            }

            for (i, r) in x.iter().enumerate() {
                let v = [
                    vsubq_f32(r[0], r[2]),
                    vaddq_f32(r[1], r[2]),
                    vsubq_f32(r[2], r[1]),
                    vsubq_f32(r[1], r[3]),
                ];
                for (j, v) in v.into_iter().enumerate() {
                    let dst = &mut out.row_mut(i * 4 + j)[c..c + 4];
                    vst1q_f32(dst.as_mut_ptr(), v);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neon_input_matches_scalar() {
        if !std::arch::is_aarch64_feature_detected!("neon") {
            return;
        }
        let t = InputTransformImpl::<f32>::new("i", &F2_3, &F2_3, 0, input_4x4_f32);
        // 7 channels: one vector plus three remainder channels.
        let n = 7;
        let data: Vec<f32> = (0..16 * n).map(|i| ((i * 13 % 17) as f32 - 8.0) * 0.25).collect();
        let src = TileSource::Strided { data: &data, ld_row: 4 * n, ld_col: n };

        let mut fast = vec![0.0f32; 16 * n];
        let mut slow = vec![0.0f32; 16 * n];
        input_4x4_f32(&t, n, &src, &mut MatrixRowMut::over(&mut fast, 0, n, 16, n));
        unrolled::input_4x4(&t, n, &src, &mut MatrixRowMut::over(&mut slow, 0, n, 16, n));
        assert_eq!(fast, slow);
    }

    #[test]
    fn registers_behind_neon_requirement() {
        let mut r = TransformRegistry::<f32>::portable();
        register(&mut r);
        let neon = r.input_transforms().iter().find(|t| t.name == "input_4x4_neon").unwrap();
        assert!(neon.requirement.neon);
        let pos = |name: &str| r.input_transforms().iter().position(|t| t.name == name).unwrap();
        assert!(pos("input_4x4_neon") < pos("input_4x4"));
    }
}
