//! Output transform driver: output GEMM matrices back into an NHWC tensor.

use super::{MatrixLayout, TileAddressing, TileGrid};
use crate::activation::ClampBounds;
use crate::element::WinogradElement;
use crate::parallel::{SharedMut, UnitClaims};
use crate::transforms::OutputTransformImpl;
use crate::transforms::tile::{MAX_TILE_POINTS, MatrixRow, TileSink};
use winoconv_common::{Result, WinogradError};

/// Transforms every GEMM output row into one output tile, adding bias and
/// clamping on the way out.
///
/// A window unit is one `(batch, tile row)` and owns the band of output rows
/// that tile row covers.
pub struct OutputTransformDriver<'a, T: WinogradElement> {
    transform: &'a OutputTransformImpl<T>,
    addressing: TileAddressing,
    grid: TileGrid,
    n_channels: usize,
    matrices: &'a [T],
    layout: MatrixLayout,
    bias: Option<&'a [T]>,
    clamp: ClampBounds<T>,
    output: SharedMut<'a, T>,
    ld_batch: usize,
    ld_row: usize,
    ld_col: usize,
    claims: UnitClaims,
}

impl<'a, T: WinogradElement> OutputTransformDriver<'a, T> {
    /// `output` is NHWC with element strides `(ld_batch, ld_row, ld_col)` and
    /// contiguous channels; rows and batches must not interleave.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transform: &'a OutputTransformImpl<T>,
        addressing: TileAddressing,
        grid: TileGrid,
        n_channels: usize,
        matrices: &'a [T],
        layout: MatrixLayout,
        bias: Option<&'a [T]>,
        clamp: ClampBounds<T>,
        output: &'a mut [T],
        (ld_batch, ld_row, ld_col): (usize, usize, usize),
    ) -> Result<Self> {
        if transform.inner_tile() != grid.inner_tile || transform.output_tile != grid.output_tile {
            return Err(WinogradError::invalid_usage(format!(
                "output transform {} ({} from {}) does not fit a grid of {} tiles from {}",
                transform.name,
                transform.output_tile,
                transform.inner_tile(),
                grid.output_tile,
                grid.inner_tile
            )));
        }
        if layout.n_matrices != grid.inner_tile.area()
            || layout.ld_row < n_channels
            || layout.ld_batch < grid.tiles_per_batch() * layout.ld_row
            || layout.ld_matrix < grid.n_batches * layout.ld_batch
        {
            return Err(WinogradError::invalid_usage(format!(
                "output matrix layout {layout:?} cannot hold {} tiles of {n_channels} channels",
                grid.n_batches * grid.tiles_per_batch()
            )));
        }
        layout.check_fits("output", matrices.len())?;
        if let Some(bias) = bias
            && bias.len() != n_channels
        {
            return Err(WinogradError::ShapeMismatch { what: "bias", expected: n_channels, actual: bias.len() });
        }

        let row_extent = (grid.output.cols - 1) * ld_col + n_channels;
        if ld_col < n_channels || ld_row < row_extent || ld_batch < grid.output.rows * ld_row {
            return Err(WinogradError::invalid_usage(format!(
                "output strides ({ld_batch}, {ld_row}, {ld_col}) overlap for {n_channels} channels"
            )));
        }
        let last = (grid.n_batches - 1) * ld_batch + (grid.output.rows - 1) * ld_row + row_extent;
        if output.len() < last {
            return Err(WinogradError::ShapeMismatch { what: "output tensor", expected: last, actual: output.len() });
        }

        Ok(Self {
            transform,
            addressing,
            grid,
            n_channels,
            matrices,
            layout,
            bias,
            clamp,
            output: SharedMut::new(output),
            ld_batch,
            ld_row,
            ld_col,
            claims: UnitClaims::new(grid.n_units()),
        })
    }

    pub fn get_window(&self) -> usize {
        self.grid.n_units()
    }

    /// Scratch elements one `run` call needs for the copy path.
    pub fn scratch_len(&self) -> usize {
        self.grid.output_tile.area() * self.n_channels
    }

    pub fn run(&self, start: usize, stop: usize, scratch: &mut [T]) -> Result<()> {
        self.check_scratch(scratch)?;
        self.claims.claim_range(start, stop)?;
        (start..stop).for_each(|unit| self.process_unit(unit, scratch));
        Ok(())
    }

    pub fn run_strided(&self, thread_id: usize, n_threads: usize, scratch: &mut [T]) -> Result<()> {
        if thread_id >= n_threads {
            return Err(WinogradError::invalid_usage(format!("thread {thread_id} of {n_threads}")));
        }
        self.check_scratch(scratch)?;
        for unit in (thread_id..self.get_window()).step_by(n_threads) {
            self.claims.claim(unit)?;
            self.process_unit(unit, scratch);
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.claims.reset();
    }

    fn check_scratch(&self, scratch: &[T]) -> Result<()> {
        if scratch.len() < self.scratch_len() {
            return Err(WinogradError::invalid_usage(format!(
                "output transform needs {} scratch elements, got {}",
                self.scratch_len(),
                scratch.len()
            )));
        }
        Ok(())
    }

    fn process_unit(&self, unit: usize, scratch: &mut [T]) {
        let (batch, ti) = self.grid.unit(unit);
        let otile = self.grid.output_tile;
        let n = self.n_channels;
        let (ld_row, ld_col) = (self.ld_row, self.ld_col);

        let first_row = ti * otile.rows;
        let band_rows = (self.grid.output.rows - first_row).min(otile.rows);
        let band_start = batch * self.ld_batch + first_row * ld_row;
        let band_len = (band_rows - 1) * ld_row + (self.grid.output.cols - 1) * ld_col + n;
        // SAFETY: the unit was claimed and its band ends before the next tile
        // row (or batch) starts, which `new` checked via the strides.
        let band = unsafe { self.output.slice_mut(band_start, band_len) };

        let mut points = [None; MAX_TILE_POINTS];
        for tj in 0..self.grid.tile_cols {
            let valid = self.grid.output_valid(ti, tj);
            let dst = &mut band[tj * otile.cols * ld_col..];
            let row = MatrixRow::new(
                self.matrices,
                batch * self.layout.ld_batch + (ti * self.grid.tile_cols + tj) * self.layout.ld_row,
                self.layout.ld_matrix,
                self.layout.n_matrices,
            );
            let kernel = self.transform.micro_kernel;

            if valid == otile {
                let mut sink = TileSink::Strided { data: dst, ld_row, ld_col, valid };
                kernel(self.transform, n, &row, self.bias, &mut sink, self.clamp);
                continue;
            }
            match self.addressing {
                TileAddressing::Indirect => {
                    for (p, slot) in points[..otile.area()].iter_mut().enumerate() {
                        let (i, j) = (p / otile.cols, p % otile.cols);
                        *slot = (i < valid.rows && j < valid.cols).then(|| i * ld_row + j * ld_col);
                    }
                    let mut sink = TileSink::Indirect { data: dst, points: &points[..otile.area()], cols: otile.cols };
                    kernel(self.transform, n, &row, self.bias, &mut sink, self.clamp);
                }
                TileAddressing::Direct | TileAddressing::UnpaddedCopy => {
                    let patch = &mut scratch[..otile.area() * n];
                    let mut sink =
                        TileSink::Strided { data: &mut *patch, ld_row: otile.cols * n, ld_col: n, valid: otile };
                    kernel(self.transform, n, &row, self.bias, &mut sink, self.clamp);
                    for i in 0..valid.rows {
                        for j in 0..valid.cols {
                            let src = (i * otile.cols + j) * n;
                            let to = i * ld_row + j * ld_col;
                            dst[to..to + n].copy_from_slice(&patch[src..src + n]);
                        }
                    }
                }
            }
        }
    }
}
