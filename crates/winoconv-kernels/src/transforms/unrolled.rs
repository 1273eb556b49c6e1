//! Hand-unrolled F(2x2, 3x3) kernels.
//!
//! The 4x4 transforms only add and subtract, so writing them out avoids the
//! multiply-by-zero work the matrix-driven kernels do.

use super::tile::{MatrixRow, MatrixRowMut, TileSink, TileSource};
use super::{InputTransformImpl, OutputTransformImpl, WeightTransformImpl};
use crate::activation::ClampBounds;
use crate::element::WinogradElement;
use winoconv_common::Shape2D;

const INNER: Shape2D = Shape2D { rows: 4, cols: 4 };

#[inline]
fn bt4<T: WinogradElement>(d: [T; 4]) -> [T; 4] {
    [d[0] - d[2], d[1] + d[2], d[2] - d[1], d[1] - d[3]]
}

#[inline]
fn g3<T: WinogradElement>(g: [T; 3], half: T) -> [T; 4] {
    [g[0], (g[0] + g[1] + g[2]) * half, (g[0] - g[1] + g[2]) * half, g[2]]
}

#[inline]
fn at4<T: WinogradElement>(m: [T; 4]) -> [T; 2] {
    [m[0] + m[1] + m[2], m[1] - m[2] - m[3]]
}

pub fn input_4x4<T: WinogradElement>(
    _transform: &InputTransformImpl<T>,
    n_channels: usize,
    tile: &TileSource<'_, T>,
    out: &mut MatrixRowMut<'_, T>,
) {
    for c in 0..n_channels {
        input_4x4_channel(tile, c, out);
    }
}

/// One channel of [`input_4x4`]; also the remainder path of vector kernels.
pub(crate) fn input_4x4_channel<T: WinogradElement>(tile: &TileSource<'_, T>, c: usize, out: &mut MatrixRowMut<'_, T>) {
    let mut d = [T::ZERO; 16];
    tile.gather(INNER, c, &mut d);

    let mut x = [T::ZERO; 16];
    for j in 0..4 {
        let col = bt4([d[j], d[4 + j], d[8 + j], d[12 + j]]);
        for i in 0..4 {
            x[i * 4 + j] = col[i];
        }
    }
    for i in 0..4 {
        let row = bt4([x[i * 4], x[i * 4 + 1], x[i * 4 + 2], x[i * 4 + 3]]);
        for (j, v) in row.into_iter().enumerate() {
            out.set(i * 4 + j, c, v);
        }
    }
}

pub fn weight_2x2_3x3<T: WinogradElement>(
    _transform: &WeightTransformImpl<T>,
    n_channels: usize,
    weights: &[T],
    ld_row: usize,
    ld_col: usize,
    out: &mut MatrixRowMut<'_, T>,
) {
    let half = T::from_f32(0.5);
    for oc in 0..n_channels {
        let w = |i: usize, j: usize| weights[i * ld_row + j * ld_col + oc];

        let mut x = [[T::ZERO; 3]; 4];
        for j in 0..3 {
            let col = g3([w(0, j), w(1, j), w(2, j)], half);
            for i in 0..4 {
                x[i][j] = col[i];
            }
        }
        for (i, row) in x.into_iter().enumerate() {
            for (j, v) in g3(row, half).into_iter().enumerate() {
                out.set(i * 4 + j, oc, v);
            }
        }
    }
}

pub fn output_2x2_3x3<T: WinogradElement>(
    _transform: &OutputTransformImpl<T>,
    n_channels: usize,
    tile: &MatrixRow<'_, T>,
    bias: Option<&[T]>,
    out: &mut TileSink<'_, T>,
    clamp: ClampBounds<T>,
) {
    for c in 0..n_channels {
        let m = |p: usize| tile.get(p, c);

        let mut x = [[T::ZERO; 4]; 2];
        for j in 0..4 {
            let col = at4([m(j), m(4 + j), m(8 + j), m(12 + j)]);
            x[0][j] = col[0];
            x[1][j] = col[1];
        }
        let b = bias.map_or(T::ZERO, |b| b[c]);
        for (i, row) in x.into_iter().enumerate() {
            for (j, v) in at4(row).into_iter().enumerate() {
                out.store(i, j, c, clamp.apply(v + b));
            }
        }
    }
}
