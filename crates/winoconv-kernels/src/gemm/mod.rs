//! Batched blocked GEMM over the Winograd-domain matrices.
//!
//! `n_gemms` independent products `C[g] = A[g] · B[g]` (`M x K` times
//! `K x N`), one per frequency slot. Each product is cut into
//! `M_BLOCK x N_BLOCK` blocks of C; full blocks may go to a hand-tuned kernel
//! for the element type, edge blocks always take the generic one.

#[cfg(all(target_arch = "aarch64", feature = "neon"))]
pub mod neon;

use crate::element::{GemmBlockKernel, WinogradElement};
use crate::parallel::{SharedMut, UnitClaims};
use winoconv_common::{Result, WinogradError};

/// Row block of the pipeline's GEMM.
pub const M_BLOCK: usize = 4;
/// Column block of the pipeline's GEMM.
pub const N_BLOCK: usize = 16;

/// Strides of one operand family, in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandStrides {
    pub matrix: usize,
    pub row: usize,
}

impl OperandStrides {
    pub const fn new(matrix: usize, row: usize) -> Self {
        Self { matrix, row }
    }
}

fn check_operand(what: &'static str, len: usize, n_gemms: usize, rows: usize, cols: usize, s: OperandStrides) -> Result<()> {
    if s.row < cols {
        return Err(WinogradError::invalid_usage(format!(
            "{what} row stride {} is shorter than a row of {cols}",
            s.row
        )));
    }
    let needed = (n_gemms - 1) * s.matrix + (rows - 1) * s.row + cols;
    if len < needed {
        return Err(WinogradError::ShapeMismatch { what, expected: needed, actual: len });
    }
    Ok(())
}

/// `n_gemms` independent GEMMs sharing base buffers.
///
/// The window unit is one GEMM; any partition of `0..get_window()` may run
/// concurrently.
pub struct BatchedBlockedGemm<'a, T: WinogradElement, const MB: usize, const NB: usize> {
    n_gemms: usize,
    m: usize,
    k: usize,
    n: usize,
    a: &'a [T],
    a_strides: OperandStrides,
    b: &'a [T],
    b_strides: OperandStrides,
    c: SharedMut<'a, T>,
    c_strides: OperandStrides,
    specialised: Option<GemmBlockKernel<T>>,
    claims: UnitClaims,
}

impl<'a, T: WinogradElement, const MB: usize, const NB: usize> BatchedBlockedGemm<'a, T, MB, NB> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        n_gemms: usize,
        m: usize,
        k: usize,
        n: usize,
        a: &'a [T],
        a_strides: OperandStrides,
        b: &'a [T],
        b_strides: OperandStrides,
        c: &'a mut [T],
        c_strides: OperandStrides,
    ) -> Result<Self> {
        if n_gemms == 0 || m == 0 || k == 0 || n == 0 {
            return Err(WinogradError::invalid_usage(format!(
                "empty GEMM batch: {n_gemms} x ({m} x {k}) · ({k} x {n})"
            )));
        }
        check_operand("gemm A", a.len(), n_gemms, m, k, a_strides)?;
        check_operand("gemm B", b.len(), n_gemms, k, n, b_strides)?;
        check_operand("gemm C", c.len(), n_gemms, m, n, c_strides)?;
        if n_gemms > 1 && c_strides.matrix < (m - 1) * c_strides.row + n {
            return Err(WinogradError::invalid_usage(format!(
                "C matrix stride {} overlaps a {m} x {n} matrix with row stride {}",
                c_strides.matrix, c_strides.row
            )));
        }

        let specialised = T::specialised_gemm_block(MB, NB);
        tracing::trace!(n_gemms, m, k, n, specialised = specialised.is_some(), "batched gemm");
        Ok(Self {
            n_gemms,
            m,
            k,
            n,
            a,
            a_strides,
            b,
            b_strides,
            c: SharedMut::new(c),
            c_strides,
            specialised,
            claims: UnitClaims::new(n_gemms),
        })
    }

    pub fn get_window(&self) -> usize {
        self.n_gemms
    }

    /// Run GEMMs `start..stop` on the calling thread.
    pub fn run(&self, start: usize, stop: usize) -> Result<()> {
        if start >= stop || stop > self.n_gemms {
            return Err(WinogradError::invalid_usage(format!(
                "gemm range {start}..{stop} is not a non-empty part of 0..{}",
                self.n_gemms
            )));
        }
        self.claims.claim_range(start, stop)?;
        for g in start..stop {
            // SAFETY: GEMM `g` was claimed and its C matrix does not overlap
            // the next one (checked in `new`).
            let c = unsafe { self.c.slice_mut(g * self.c_strides.matrix, (self.m - 1) * self.c_strides.row + self.n) };
            self.run_one(&self.a[g * self.a_strides.matrix..], &self.b[g * self.b_strides.matrix..], c);
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.claims.reset();
    }

    fn run_one(&self, a: &[T], b: &[T], c: &mut [T]) {
        let (lda, ldb, ldc) = (self.a_strides.row, self.b_strides.row, self.c_strides.row);
        for i0 in (0..self.m).step_by(MB) {
            let rows = MB.min(self.m - i0);
            for j0 in (0..self.n).step_by(NB) {
                let cols = NB.min(self.n - j0);
                let a_blk = &a[i0 * lda..];
                let b_blk = &b[j0..];
                let c_blk = &mut c[i0 * ldc + j0..];
                match self.specialised {
                    Some(kernel) if rows == MB && cols == NB => kernel(self.k, a_blk, lda, b_blk, ldb, c_blk, ldc),
                    _ => generic_block(rows, cols, self.k, a_blk, lda, b_blk, ldb, c_blk, ldc),
                }
            }
        }
    }
}

/// `c[rows x cols] = a[rows x k] · b[k x cols]`, accumulating in `T`.
#[allow(clippy::too_many_arguments)]
pub fn generic_block<T: WinogradElement>(
    rows: usize,
    cols: usize,
    k: usize,
    a: &[T],
    lda: usize,
    b: &[T],
    ldb: usize,
    c: &mut [T],
    ldc: usize,
) {
    for i in 0..rows {
        let c_row = &mut c[i * ldc..i * ldc + cols];
        c_row.fill(T::ZERO);
        for p in 0..k {
            let a_ip = a[i * lda + p];
            let b_row = &b[p * ldb..p * ldb + cols];
            for (cv, bv) in c_row.iter_mut().zip(b_row) {
                *cv = *cv + a_ip * *bv;
            }
        }
    }
}
