//! Transform drivers: walk tiles, resolve boundary padding and call the
//! selected micro-kernel for each one.
//!
//! All three drivers follow the same parallel contract: `get_window()` units,
//! `run(start, stop, ..)` over any sub-range from any thread, and each unit
//! writes a region of the destination no other unit touches.

mod input;
mod output;
mod weight;

pub use input::InputTransformDriver;
pub use output::OutputTransformDriver;
pub use weight::{WEIGHT_CHANNEL_BLOCK, WeightTransformDriver};
pub use winoconv_common::TileAddressing;

use crate::transforms::tile::TilePadding;
use winoconv_common::{Result, Shape2D, WinogradError, ceil_div};

/// Strides of one family of Winograd-domain matrices, in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixLayout {
    /// Distance between consecutive matrices (frequency slots).
    pub ld_matrix: usize,
    /// Distance between the first rows of consecutive batches.
    pub ld_batch: usize,
    /// Distance between consecutive rows.
    pub ld_row: usize,
    pub n_matrices: usize,
}

impl MatrixLayout {
    /// Elements spanned by all matrices.
    pub const fn len(&self) -> usize {
        self.ld_matrix * self.n_matrices
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn check_fits(&self, what: &str, available: usize) -> Result<()> {
        if available < self.len() {
            return Err(WinogradError::invalid_usage(format!(
                "{what} matrices need {} elements, buffer holds {available}",
                self.len()
            )));
        }
        Ok(())
    }
}

/// First valid input point of a tile and the padding around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputTileWindow {
    pub first_row: usize,
    pub first_col: usize,
    pub padding: TilePadding,
}

/// How output tiles cover a batch of images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGrid {
    pub n_batches: usize,
    pub input: Shape2D,
    pub output: Shape2D,
    pub pad_top: usize,
    pub pad_left: usize,
    pub output_tile: Shape2D,
    pub inner_tile: Shape2D,
    pub tile_rows: usize,
    pub tile_cols: usize,
}

impl TileGrid {
    pub fn new(
        n_batches: usize,
        input: Shape2D,
        output: Shape2D,
        (pad_top, pad_left): (usize, usize),
        output_tile: Shape2D,
        kernel: Shape2D,
    ) -> Self {
        Self {
            n_batches,
            input,
            output,
            pad_top,
            pad_left,
            output_tile,
            inner_tile: Shape2D::new(output_tile.rows + kernel.rows - 1, output_tile.cols + kernel.cols - 1),
            tile_rows: ceil_div(output.rows, output_tile.rows),
            tile_cols: ceil_div(output.cols, output_tile.cols),
        }
    }

    pub const fn tiles_per_batch(&self) -> usize {
        self.tile_rows * self.tile_cols
    }

    /// Window of the input and output drivers: one unit per (batch, tile row).
    pub const fn n_units(&self) -> usize {
        self.n_batches * self.tile_rows
    }

    /// `(batch, tile_row)` of a window unit.
    pub const fn unit(&self, unit: usize) -> (usize, usize) {
        (unit / self.tile_rows, unit % self.tile_rows)
    }

    /// Input region read by tile `(ti, tj)`.
    pub fn input_tile(&self, ti: usize, tj: usize) -> InputTileWindow {
        let (first_row, top, bottom) =
            axis_window(ti * self.output_tile.rows, self.pad_top, self.inner_tile.rows, self.input.rows);
        let (first_col, left, right) =
            axis_window(tj * self.output_tile.cols, self.pad_left, self.inner_tile.cols, self.input.cols);
        InputTileWindow { first_row, first_col, padding: TilePadding { top, left, bottom, right } }
    }

    /// Output points tile `(ti, tj)` actually covers.
    pub fn output_valid(&self, ti: usize, tj: usize) -> Shape2D {
        Shape2D::new(
            (self.output.rows - ti * self.output_tile.rows).min(self.output_tile.rows),
            (self.output.cols - tj * self.output_tile.cols).min(self.output_tile.cols),
        )
    }
}

/// `(first valid index, leading padding, trailing padding)` along one axis for
/// a tile of `extent` points starting at `origin - pad` in an axis of `len`.
fn axis_window(origin: usize, pad: usize, extent: usize, len: usize) -> (usize, usize, usize) {
    let leading = pad.saturating_sub(origin).min(extent);
    let first = (origin + leading) - pad;
    let end = origin + extent - pad.min(origin + extent);
    let trailing = end.saturating_sub(len).min(extent - leading);
    (first, leading, trailing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_3x3_same(rows: usize, cols: usize, tile: usize) -> TileGrid {
        let shape = Shape2D::new(rows, cols);
        TileGrid::new(1, shape, shape, (1, 1), Shape2D::new(tile, tile), Shape2D::new(3, 3))
    }

    #[test]
    fn grid_counts_partial_tiles() {
        let g = grid_3x3_same(5, 9, 4);
        assert_eq!((g.tile_rows, g.tile_cols), (2, 3));
        assert_eq!(g.inner_tile, Shape2D::new(6, 6));
        assert_eq!(g.output_valid(1, 2), Shape2D::new(1, 1));
        assert_eq!(g.output_valid(0, 1), Shape2D::new(4, 4));
    }

    #[test]
    fn first_tile_has_leading_padding() {
        let g = grid_3x3_same(8, 8, 2);
        let w = g.input_tile(0, 0);
        assert_eq!((w.first_row, w.first_col), (0, 0));
        assert_eq!(w.padding, TilePadding { top: 1, left: 1, bottom: 0, right: 0 });
    }

    #[test]
    fn interior_tile_is_unpadded() {
        let g = grid_3x3_same(8, 8, 2);
        let w = g.input_tile(1, 2);
        assert_eq!((w.first_row, w.first_col), (1, 3));
        assert!(w.padding.is_zero());
    }

    #[test]
    fn last_tile_overruns_the_input() {
        // 5 output rows in 4-row tiles: tile 1 starts at input row 3 and
        // needs rows 3..9 of a 5-row input.
        let g = grid_3x3_same(5, 5, 4);
        let w = g.input_tile(1, 1);
        assert_eq!((w.first_row, w.first_col), (3, 3));
        assert_eq!(w.padding, TilePadding { top: 0, left: 0, bottom: 4, right: 4 });
    }

    #[test]
    fn tiny_input_pads_both_sides() {
        let g = TileGrid::new(1, Shape2D::new(1, 1), Shape2D::new(1, 1), (2, 2), Shape2D::new(4, 4), Shape2D::new(5, 5));
        let w = g.input_tile(0, 0);
        assert_eq!(w.padding, TilePadding { top: 2, left: 2, bottom: 5, right: 5 });
        assert_eq!(g.inner_tile.rows - w.padding.top - w.padding.bottom, 1);
    }

    #[test]
    fn units_enumerate_batches_then_rows() {
        let shape = Shape2D::new(6, 6);
        let g = TileGrid::new(3, shape, shape, (1, 1), Shape2D::new(2, 2), Shape2D::new(3, 3));
        assert_eq!(g.n_units(), 9);
        assert_eq!(g.unit(4), (1, 1));
        assert_eq!(g.unit(8), (2, 2));
    }
}
