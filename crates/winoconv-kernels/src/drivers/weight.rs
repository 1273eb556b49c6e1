//! Weight transform driver: HWIO weights into the weight GEMM matrices.

use super::MatrixLayout;
use crate::element::WinogradElement;
use crate::parallel::{SharedMut, UnitClaims};
use crate::transforms::WeightTransformImpl;
use crate::transforms::tile::MatrixRowMut;
use winoconv_common::{Result, WinogradError, ceil_div};

/// Input channels handled per window unit.
pub const WEIGHT_CHANNEL_BLOCK: usize = 16;

/// Writes row `ic` of every weight matrix from the `kernel`-sized slab of
/// input channel `ic`. A window unit is a run of [`WEIGHT_CHANNEL_BLOCK`]
/// input channels, so neighbouring threads never share a cache line of rows.
pub struct WeightTransformDriver<'a, T: WinogradElement> {
    transform: &'a WeightTransformImpl<T>,
    n_input_channels: usize,
    n_output_channels: usize,
    weights: &'a [T],
    ld_row: usize,
    ld_col: usize,
    ld_in: usize,
    matrices: SharedMut<'a, T>,
    layout: MatrixLayout,
    claims: UnitClaims,
}

impl<'a, T: WinogradElement> WeightTransformDriver<'a, T> {
    /// `weights` is HWIO with element strides `(ld_row, ld_col, ld_in)` and
    /// contiguous output channels.
    pub fn new(
        transform: &'a WeightTransformImpl<T>,
        n_input_channels: usize,
        n_output_channels: usize,
        weights: &'a [T],
        (ld_row, ld_col, ld_in): (usize, usize, usize),
        matrices: &'a mut [T],
        layout: MatrixLayout,
    ) -> Result<Self> {
        if layout.n_matrices != transform.inner_tile().area()
            || layout.ld_row < n_output_channels
            || layout.ld_matrix < n_input_channels * layout.ld_row
        {
            return Err(WinogradError::invalid_usage(format!(
                "weight matrix layout {layout:?} cannot hold {n_input_channels}x{n_output_channels} weights"
            )));
        }
        layout.check_fits("weight", matrices.len())?;

        let kernel = transform.kernel;
        let last = (kernel.rows - 1) * ld_row
            + (kernel.cols - 1) * ld_col
            + (n_input_channels - 1) * ld_in
            + n_output_channels;
        if weights.len() < last {
            return Err(WinogradError::ShapeMismatch { what: "weights", expected: last, actual: weights.len() });
        }

        Ok(Self {
            transform,
            n_input_channels,
            n_output_channels,
            weights,
            ld_row,
            ld_col,
            ld_in,
            matrices: SharedMut::new(matrices),
            layout,
            claims: UnitClaims::new(ceil_div(n_input_channels, WEIGHT_CHANNEL_BLOCK)),
        })
    }

    pub fn get_window(&self) -> usize {
        self.claims.len()
    }

    pub fn run(&self, start: usize, stop: usize) -> Result<()> {
        self.claims.claim_range(start, stop)?;
        for unit in start..stop {
            let first = unit * WEIGHT_CHANNEL_BLOCK;
            let last = (first + WEIGHT_CHANNEL_BLOCK).min(self.n_input_channels);
            for ic in first..last {
                // SAFETY: row `ic` of every matrix belongs to the claimed unit.
                let mut out = unsafe {
                    MatrixRowMut::new(
                        self.matrices,
                        ic * self.layout.ld_row,
                        self.layout.ld_matrix,
                        self.layout.n_matrices,
                        self.n_output_channels,
                    )
                };
                (self.transform.micro_kernel)(
                    self.transform,
                    self.n_output_channels,
                    &self.weights[ic * self.ld_in..],
                    self.ld_row,
                    self.ld_col,
                    &mut out,
                );
            }
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.claims.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::generic;
    use crate::transforms::matrices::F2_3;
    use winoconv_common::round_up;

    #[test]
    fn window_groups_input_channels() {
        let t = WeightTransformImpl::<f32>::new("w", &F2_3, &F2_3, 0, generic::weight_tile);
        let (n_in, n_out) = (33, 3);
        let weights = vec![1.0f32; 9 * n_in * n_out];
        let layout = MatrixLayout { ld_matrix: n_in * 16, ld_batch: 0, ld_row: 16, n_matrices: 16 };
        let mut matrices = vec![0.0f32; layout.len()];
        let driver = WeightTransformDriver::new(
            &t,
            n_in,
            n_out,
            &weights,
            (3 * n_in * n_out, n_in * n_out, n_out),
            &mut matrices,
            layout,
        )
        .unwrap();
        assert_eq!(driver.get_window(), 3);
        driver.run(2, 3).unwrap();
        driver.run(0, 2).unwrap();
        assert!(driver.run(1, 2).is_err());
    }

    #[test]
    fn each_input_channel_fills_its_row() {
        let t = WeightTransformImpl::<f32>::new("w", &F2_3, &F2_3, 0, generic::weight_tile);
        let (n_in, n_out) = (2, 5);
        let ld_row_out = round_up(n_out, 16);
        // HWIO where every weight equals its input channel + 1.
        let weights: Vec<f32> = (0..9 * n_in * n_out).map(|i| ((i / n_out) % n_in) as f32 + 1.0).collect();
        let layout = MatrixLayout { ld_matrix: n_in * ld_row_out, ld_batch: 0, ld_row: ld_row_out, n_matrices: 16 };
        let mut matrices = vec![0.0f32; layout.len()];
        let driver =
            WeightTransformDriver::new(&t, n_in, n_out, &weights, (3 * n_in * n_out, n_in * n_out, n_out), &mut matrices, layout)
                .unwrap();
        driver.run(0, driver.get_window()).unwrap();
        drop(driver);

        // Slot (0, 0) of G·g·G^T is g[0][0].
        for ic in 0..n_in {
            let row = &matrices[ic * ld_row_out..ic * ld_row_out + ld_row_out];
            assert!(row[..n_out].iter().all(|v| *v == ic as f32 + 1.0));
            assert!(row[n_out..].iter().all(|v| *v == 0.0));
        }
    }
}
