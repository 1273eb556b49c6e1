//! Views through which micro-kernels read and write one tile.

use crate::element::WinogradElement;
use crate::parallel::SharedMut;
use winoconv_common::Shape2D;

/// Upper bound on points in any Winograd-domain tile (8x8).
pub const MAX_TILE_POINTS: usize = 64;

/// Implicit zero padding around a tile, in points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TilePadding {
    pub top: usize,
    pub left: usize,
    pub bottom: usize,
    pub right: usize,
}

impl TilePadding {
    pub const fn is_zero(&self) -> bool {
        self.top == 0 && self.left == 0 && self.bottom == 0 && self.right == 0
    }

    /// Padding only on the leading edges, i.e. the tile is not partial.
    pub const fn is_leading_only(&self) -> bool {
        self.bottom == 0 && self.right == 0
    }

    /// Whether point `(i, j)` of a `tile`-sized tile lies in real data.
    #[inline]
    pub const fn is_valid(&self, tile: Shape2D, i: usize, j: usize) -> bool {
        i >= self.top && i + self.bottom < tile.rows && j >= self.left && j + self.right < tile.cols
    }
}

// ── Input side ──────────────────────────────────────────────────────

/// Where an input micro-kernel reads its tile from.
///
/// Channels are innermost and contiguous in every variant.
#[derive(Debug, Clone, Copy)]
pub enum TileSource<'a, T> {
    /// Dense tile, no padding: point `(i, j)` is at `i * ld_row + j * ld_col`.
    Strided { data: &'a [T], ld_row: usize, ld_col: usize },
    /// Tile with implicit zeros around it; `data` starts at the first valid
    /// point `(padding.top, padding.left)`.
    Padded { data: &'a [T], ld_row: usize, ld_col: usize, padding: TilePadding },
    /// One offset per point in row-major order; `None` reads as zero.
    Indirect { data: &'a [T], points: &'a [Option<usize>] },
}

impl<T: WinogradElement> TileSource<'_, T> {
    /// Copy channel `channel` of a `tile`-sized tile into `dst` (row-major).
    #[inline]
    pub fn gather(&self, tile: Shape2D, channel: usize, dst: &mut [T]) {
        let cols = tile.cols;
        match *self {
            Self::Strided { data, ld_row, ld_col } => {
                for i in 0..tile.rows {
                    for j in 0..cols {
                        dst[i * cols + j] = data[i * ld_row + j * ld_col + channel];
                    }
                }
            }
            Self::Padded { data, ld_row, ld_col, padding } => {
                for i in 0..tile.rows {
                    for j in 0..cols {
                        dst[i * cols + j] = if padding.is_valid(tile, i, j) {
                            data[(i - padding.top) * ld_row + (j - padding.left) * ld_col + channel]
                        } else {
                            T::ZERO
                        };
                    }
                }
            }
            Self::Indirect { data, points } => {
                for (d, p) in dst[..tile.area()].iter_mut().zip(points) {
                    *d = p.map_or(T::ZERO, |offset| data[offset + channel]);
                }
            }
        }
    }
}

// ── Output side ─────────────────────────────────────────────────────

/// Where an output micro-kernel writes its tile to.
#[derive(Debug)]
pub enum TileSink<'a, T> {
    /// Point `(i, j)` goes to `i * ld_row + j * ld_col`; points outside
    /// `valid` are dropped.
    Strided { data: &'a mut [T], ld_row: usize, ld_col: usize, valid: Shape2D },
    /// One offset per point of a `cols`-wide tile; `None` drops the point.
    Indirect { data: &'a mut [T], points: &'a [Option<usize>], cols: usize },
}

impl<T: Copy> TileSink<'_, T> {
    #[inline]
    pub fn store(&mut self, i: usize, j: usize, channel: usize, value: T) {
        match self {
            Self::Strided { data, ld_row, ld_col, valid } => {
                if i < valid.rows && j < valid.cols {
                    data[i * *ld_row + j * *ld_col + channel] = value;
                }
            }
            Self::Indirect { data, points, cols } => {
                if let Some(offset) = points[i * *cols + j] {
                    data[offset + channel] = value;
                }
            }
        }
    }
}

// ── Winograd-domain rows ────────────────────────────────────────────

/// One GEMM row (one tile) read across all Winograd-domain matrices.
#[derive(Debug, Clone, Copy)]
pub struct MatrixRow<'a, T> {
    data: &'a [T],
    offset: usize,
    matrix_stride: usize,
    n_matrices: usize,
}

impl<'a, T: Copy> MatrixRow<'a, T> {
    pub fn new(data: &'a [T], offset: usize, matrix_stride: usize, n_matrices: usize) -> Self {
        Self { data, offset, matrix_stride, n_matrices }
    }

    #[inline]
    pub fn get(&self, matrix: usize, channel: usize) -> T {
        debug_assert!(matrix < self.n_matrices);
        self.data[matrix * self.matrix_stride + self.offset + channel]
    }
}

/// One GEMM row written across all Winograd-domain matrices.
///
/// Row `offset..offset + row_len` of each of the `n_matrices` matrices, which
/// sit `matrix_stride` elements apart.
pub struct MatrixRowMut<'a, T> {
    buf: SharedMut<'a, T>,
    offset: usize,
    matrix_stride: usize,
    n_matrices: usize,
    row_len: usize,
}

impl<'a, T: Copy> MatrixRowMut<'a, T> {
    /// # Panics
    /// Panics if the last row does not fit in `buf`.
    ///
    /// # Safety
    /// While the view lives, no other reference may touch any of its
    /// `n_matrices` rows.
    pub unsafe fn new(
        buf: SharedMut<'a, T>,
        offset: usize,
        matrix_stride: usize,
        n_matrices: usize,
        row_len: usize,
    ) -> Self {
        assert!(n_matrices > 0, "a matrix row spans at least one matrix");
        assert!(
            (n_matrices - 1) * matrix_stride + offset + row_len <= buf.len(),
            "matrix row at {offset} (x{n_matrices}, stride {matrix_stride}) exceeds buffer of {}",
            buf.len()
        );
        Self { buf, offset, matrix_stride, n_matrices, row_len }
    }

    /// View over an exclusively borrowed buffer.
    pub fn over(
        data: &'a mut [T],
        offset: usize,
        matrix_stride: usize,
        n_matrices: usize,
        row_len: usize,
    ) -> Self {
        // SAFETY: `data` is borrowed exclusively for 'a, so nothing else can
        // reach the rows this view covers.
        unsafe { Self::new(SharedMut::new(data), offset, matrix_stride, n_matrices, row_len) }
    }

    pub fn row_len(&self) -> usize {
        self.row_len
    }

    #[inline]
    pub fn set(&mut self, matrix: usize, channel: usize, value: T) {
        assert!(matrix < self.n_matrices && channel < self.row_len);
        // SAFETY: the index lies in a row this view owns (see `new`).
        unsafe { self.buf.write(matrix * self.matrix_stride + self.offset + channel, value) }
    }

    /// The row in `matrix` as a slice.
    pub fn row_mut(&mut self, matrix: usize) -> &mut [T] {
        assert!(matrix < self.n_matrices);
        // SAFETY: the row belongs to this view and the returned borrow is tied
        // to `&mut self`, so it cannot alias another row slice of this view.
        unsafe { self.buf.slice_mut(matrix * self.matrix_stride + self.offset, self.row_len) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padded_gather_fills_zeros() {
        // 2x2 valid block inside a 3x3 tile with top/left padding of 1.
        let data = [1.0f32, 2.0, 3.0, 4.0];
        let src = TileSource::Padded {
            data: &data,
            ld_row: 2,
            ld_col: 1,
            padding: TilePadding { top: 1, left: 1, bottom: 0, right: 0 },
        };
        let mut dst = [9.0f32; 9];
        src.gather(Shape2D::new(3, 3), 0, &mut dst);
        assert_eq!(dst, [0.0, 0.0, 0.0, 0.0, 1.0, 2.0, 0.0, 3.0, 4.0]);
    }

    #[test]
    fn indirect_gather_reads_offsets() {
        let data = [10.0f32, 11.0, 20.0, 21.0];
        let points = [Some(0), None, None, Some(2)];
        let src = TileSource::Indirect { data: &data, points: &points };
        let mut dst = [0.0f32; 4];
        src.gather(Shape2D::new(2, 2), 1, &mut dst);
        assert_eq!(dst, [11.0, 0.0, 0.0, 21.0]);
    }

    #[test]
    fn strided_sink_crops_to_valid() {
        let mut out = [0.0f32; 4];
        let mut sink = TileSink::Strided { data: &mut out, ld_row: 2, ld_col: 1, valid: Shape2D::new(2, 1) };
        sink.store(0, 0, 0, 1.0);
        sink.store(0, 1, 0, 2.0);
        sink.store(1, 0, 0, 3.0);
        assert_eq!(out, [1.0, 0.0, 3.0, 0.0]);
    }

    #[test]
    fn matrix_row_mut_writes_each_matrix() {
        let mut buf = vec![0.0f32; 12];
        let mut row = MatrixRowMut::over(&mut buf, 2, 4, 3, 2);
        for m in 0..3 {
            row.set(m, 0, m as f32 + 1.0);
            row.row_mut(m)[1] = -(m as f32 + 1.0);
        }
        assert_eq!(buf, vec![0., 0., 1., -1., 0., 0., 2., -2., 0., 0., 3., -3.]);
        let read = MatrixRow::new(&buf, 2, 4, 3);
        assert_eq!(read.get(2, 1), -3.0);
        assert_eq!(read.get(1, 0), 2.0);
    }

    #[test]
    fn padding_validity() {
        let p = TilePadding { top: 1, left: 0, bottom: 2, right: 1 };
        let tile = Shape2D::new(4, 4);
        assert!(!p.is_valid(tile, 0, 0));
        assert!(p.is_valid(tile, 1, 2));
        assert!(!p.is_valid(tile, 1, 3));
        assert!(!p.is_valid(tile, 2, 0));
        assert!(!p.is_leading_only());
    }
}
