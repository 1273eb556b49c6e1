//! NEON 8x12 `f32` GEMM block.

use std::arch::aarch64::*;

const ROWS: usize = 8;
const COLS: usize = 12;

/// `c[8 x 12] = a[8 x k] · b[k x 12]` with 24 vector accumulators.
///
/// # Panics
/// Panics if any operand is too short for the block.
pub fn block_8x12_f32(k: usize, a: &[f32], lda: usize, b: &[f32], ldb: usize, c: &mut [f32], ldc: usize) {
    assert!(lda >= k && ldb >= COLS && ldc >= COLS);
    assert!(a.len() >= (ROWS - 1) * lda + k, "A block exceeds its buffer");
    assert!(k == 0 || b.len() >= (k - 1) * ldb + COLS, "B block exceeds its buffer");
    assert!(c.len() >= (ROWS - 1) * ldc + COLS, "C block exceeds its buffer");
    // SAFETY: only registered for aarch64 builds, where NEON is mandatory, and
    // every access is inside the bounds asserted above.
    unsafe { block_8x12_neon(k, a, lda, b, ldb, c, ldc) }
}

#[target_feature(enable = "neon")]
unsafe fn block_8x12_neon(k: usize, a: &[f32], lda: usize, b: &[f32], ldb: usize, c: &mut [f32], ldc: usize) {
    unsafe {
        let zero = vdupq_n_f32(0.0);
        let mut acc = [[zero; 3]; ROWS];
        let (a, b) = (a.as_ptr(), b.as_ptr());

        for p in 0..k {
            let row = b.add(p * ldb);
            let b0 = vld1q_f32(row);
            let b1 = vld1q_f32(row.add(4));
            let b2 = vld1q_f32(row.add(8));
            for (i, acc) in acc.iter_mut().enumerate() {
                let a_ip = *a.add(i * lda + p);
                acc[0] = vfmaq_n_f32(acc[0], b0, a_ip);
                acc[1] = vfmaq_n_f32(acc[1], b1, a_ip);
                acc[2] = vfmaq_n_f32(acc[2], b2, a_ip);
            }
        }

        let c = c.as_mut_ptr();
        for (i, acc) in acc.iter().enumerate() {
            let row = c.add(i * ldc);
            vst1q_f32(row, acc[0]);
            vst1q_f32(row.add(4), acc[1]);
            vst1q_f32(row.add(8), acc[2]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemm::generic_block;

    #[test]
    fn matches_generic_block() {
        let k = 12;
        let a: Vec<f32> = (0..ROWS * k).map(|i| (i % 9) as f32 - 4.0).collect();
        let b: Vec<f32> = (0..k * COLS).map(|i| (i % 7) as f32 - 3.0).collect();
        let mut fast = vec![0.0f32; ROWS * COLS];
        let mut slow = vec![0.0f32; ROWS * COLS];
        block_8x12_f32(k, &a, k, &b, COLS, &mut fast, COLS);
        generic_block(ROWS, COLS, k, &a, k, &b, COLS, &mut slow, COLS);
        // Small integers: fused and unfused products are both exact.
        assert_eq!(fast, slow);
    }
}
