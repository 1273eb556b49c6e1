//! Input transform driver: NHWC tensor into the input GEMM matrices.

use super::{MatrixLayout, TileAddressing, TileGrid};
use crate::element::WinogradElement;
use crate::parallel::{SharedMut, UnitClaims};
use crate::transforms::InputTransformImpl;
use crate::transforms::tile::{MAX_TILE_POINTS, MatrixRowMut, TilePadding, TileSource};
use winoconv_common::{Result, WinogradError};

/// Transforms every input tile into one row of each input matrix.
///
/// Tile `(ti, tj)` of batch `b` becomes row `b * ld_batch + (ti * tile_cols + tj)
/// * ld_row` of every matrix. A window unit is one `(batch, tile row)`.
pub struct InputTransformDriver<'a, T: WinogradElement> {
    transform: &'a InputTransformImpl<T>,
    addressing: TileAddressing,
    grid: TileGrid,
    n_channels: usize,
    input: &'a [T],
    ld_batch: usize,
    ld_row: usize,
    ld_col: usize,
    matrices: SharedMut<'a, T>,
    layout: MatrixLayout,
    claims: UnitClaims,
}

impl<'a, T: WinogradElement> InputTransformDriver<'a, T> {
    /// `input` is NHWC with element strides `(ld_batch, ld_row, ld_col)` and
    /// contiguous channels.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transform: &'a InputTransformImpl<T>,
        addressing: TileAddressing,
        grid: TileGrid,
        n_channels: usize,
        input: &'a [T],
        (ld_batch, ld_row, ld_col): (usize, usize, usize),
        matrices: &'a mut [T],
        layout: MatrixLayout,
    ) -> Result<Self> {
        if transform.inner_tile != grid.inner_tile {
            return Err(WinogradError::invalid_usage(format!(
                "input transform {} produces {} tiles, grid uses {}",
                transform.name, transform.inner_tile, grid.inner_tile
            )));
        }
        if layout.n_matrices != grid.inner_tile.area()
            || layout.ld_row < n_channels
            || layout.ld_batch < grid.tiles_per_batch() * layout.ld_row
            || layout.ld_matrix < grid.n_batches * layout.ld_batch
        {
            return Err(WinogradError::invalid_usage(format!(
                "input matrix layout {layout:?} cannot hold {} tiles of {n_channels} channels",
                grid.n_batches * grid.tiles_per_batch()
            )));
        }
        layout.check_fits("input", matrices.len())?;

        let last = (grid.n_batches - 1) * ld_batch
            + (grid.input.rows - 1) * ld_row
            + (grid.input.cols - 1) * ld_col
            + n_channels;
        if input.len() < last {
            return Err(WinogradError::ShapeMismatch { what: "input tensor", expected: last, actual: input.len() });
        }

        Ok(Self {
            transform,
            addressing,
            grid,
            n_channels,
            input,
            ld_batch,
            ld_row,
            ld_col,
            matrices: SharedMut::new(matrices),
            layout,
            claims: UnitClaims::new(grid.n_units()),
        })
    }

    pub fn get_window(&self) -> usize {
        self.grid.n_units()
    }

    /// Scratch elements one `run` call needs for the copy path.
    pub fn scratch_len(&self) -> usize {
        self.grid.inner_tile.area() * self.n_channels
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    /// Process units `start..stop` on the calling thread.
    pub fn run(&self, start: usize, stop: usize, scratch: &mut [T]) -> Result<()> {
        self.check_scratch(scratch)?;
        self.claims.claim_range(start, stop)?;
        (start..stop).for_each(|unit| self.process_unit(unit, scratch));
        Ok(())
    }

    /// Process every `n_threads`-th unit starting at `thread_id`.
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

    /// Allow the window to be processed again.
    pub fn reset(&mut self) {
        self.claims.reset();
    }

    fn check_scratch(&self, scratch: &[T]) -> Result<()> {
        if scratch.len() < self.scratch_len() {
            return Err(WinogradError::invalid_usage(format!(
                "input transform needs {} scratch elements, got {}",
                self.scratch_len(),
                scratch.len()
            )));
        }
        Ok(())
    }

    fn process_unit(&self, unit: usize, scratch: &mut [T]) {
        let (batch, ti) = self.grid.unit(unit);
        let inner = self.grid.inner_tile;
        let mut points = [None; MAX_TILE_POINTS];

        for tj in 0..self.grid.tile_cols {
            let window = self.grid.input_tile(ti, tj);
            let padding = window.padding;
            let origin = batch * self.ld_batch + window.first_row * self.ld_row + window.first_col * self.ld_col;
            let data = &self.input[origin..];

            let row = batch * self.layout.ld_batch + (ti * self.grid.tile_cols + tj) * self.layout.ld_row;
            // SAFETY: the unit was claimed, and rows of tiles (batch, ti, *)
            // belong to this unit alone.
            let mut out = unsafe {
                MatrixRowMut::new(self.matrices, row, self.layout.ld_matrix, self.layout.n_matrices, self.n_channels)
            };

            let (ld_row, ld_col) = (self.ld_row, self.ld_col);
            let source = if padding.is_zero() {
                TileSource::Strided { data, ld_row, ld_col }
            } else {
                match self.addressing {
                    TileAddressing::Direct if padding.is_leading_only() => {
                        TileSource::Padded { data, ld_row, ld_col, padding }
                    }
                    TileAddressing::Indirect => {
                        for (p, slot) in points[..inner.area()].iter_mut().enumerate() {
                            let (i, j) = (p / inner.cols, p % inner.cols);
                            *slot = padding
                                .is_valid(inner, i, j)
                                .then(|| (i - padding.top) * ld_row + (j - padding.left) * ld_col);
                        }
                        TileSource::Indirect { data, points: &points[..inner.area()] }
                    }
                    TileAddressing::Direct | TileAddressing::UnpaddedCopy => {
                        let patch = &mut scratch[..self.scratch_len()];
                        self.copy_patch(data, padding, patch);
                        TileSource::Strided { data: patch, ld_row: inner.cols * self.n_channels, ld_col: self.n_channels }
                    }
                }
            };
            (self.transform.micro_kernel)(self.transform, self.n_channels, &source, &mut out);
        }
    }

    /// Zero `patch` and copy the valid part of the tile into it.
    fn copy_patch(&self, data: &[T], padding: TilePadding, patch: &mut [T]) {
        let inner = self.grid.inner_tile;
        let n = self.n_channels;
        patch.fill(T::ZERO);
        for i in padding.top..inner.rows - padding.bottom {
            for j in padding.left..inner.cols - padding.right {
                let src = (i - padding.top) * self.ld_row + (j - padding.left) * self.ld_col;
                let dst = (i * inner.cols + j) * n;
                patch[dst..dst + n].copy_from_slice(&data[src..src + n]);
            }
        }
    }
}
