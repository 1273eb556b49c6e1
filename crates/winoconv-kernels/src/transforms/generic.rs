//! Matrix-driven micro-kernels that work for any transform in `matrices`.
//!
//! Each channel is gathered into a stack tile and multiplied from both sides,
//! `left · X · right^T`, with coefficients converted to `T` once per call.

use super::tile::{MAX_TILE_POINTS, MatrixRow, MatrixRowMut, TileSink, TileSource};
use super::{InputTransformImpl, OutputTransformImpl, WeightTransformImpl};
use crate::activation::ClampBounds;
use crate::element::WinogradElement;
use winoconv_common::Shape2D;

fn coefficients<T: WinogradElement>(src: &[f32]) -> [T; MAX_TILE_POINTS] {
    let mut out = [T::ZERO; MAX_TILE_POINTS];
    for (o, s) in out.iter_mut().zip(src) {
        *o = T::from_f32(*s);
    }
    out
}

/// `out = left · x · right^T`, where `x` is `x_dims`, `left` is
/// `out_dims.rows x x_dims.rows` and `right` is `out_dims.cols x x_dims.cols`.
#[inline]
fn sandwich<T: WinogradElement>(left: &[T], right: &[T], x: &[T], x_dims: Shape2D, out_dims: Shape2D, out: &mut [T]) {
    let mut tmp = [T::ZERO; MAX_TILE_POINTS];
    for i in 0..out_dims.rows {
        for j in 0..x_dims.cols {
            let mut acc = T::ZERO;
            for k in 0..x_dims.rows {
                acc = acc + left[i * x_dims.rows + k] * x[k * x_dims.cols + j];
            }
            tmp[i * x_dims.cols + j] = acc;
        }
    }
    for i in 0..out_dims.rows {
        for j in 0..out_dims.cols {
            let mut acc = T::ZERO;
            for k in 0..x_dims.cols {
                acc = acc + tmp[i * x_dims.cols + k] * right[j * x_dims.cols + k];
            }
            out[i * out_dims.cols + j] = acc;
        }
    }
}

/// `U = G_rows · g · G_cols^T` for every output channel.
pub fn weight_tile<T: WinogradElement>(
    transform: &WeightTransformImpl<T>,
    n_channels: usize,
    weights: &[T],
    ld_row: usize,
    ld_col: usize,
    out: &mut MatrixRowMut<'_, T>,
) {
    let g_rows = coefficients::<T>(transform.rows.g);
    let g_cols = coefficients::<T>(transform.cols.g);
    let kernel = transform.kernel;
    let inner = transform.inner_tile();

    let mut g = [T::ZERO; MAX_TILE_POINTS];
    let mut u = [T::ZERO; MAX_TILE_POINTS];
    for oc in 0..n_channels {
        for i in 0..kernel.rows {
            for j in 0..kernel.cols {
                g[i * kernel.cols + j] = weights[i * ld_row + j * ld_col + oc];
            }
        }
        sandwich(&g_rows, &g_cols, &g, kernel, inner, &mut u);
        for (m, v) in u[..inner.area()].iter().enumerate() {
            out.set(m, oc, *v);
        }
    }
}

/// `V = B^T_rows · d · B^T_cols^T` for every channel.
pub fn input_tile<T: WinogradElement>(
    transform: &InputTransformImpl<T>,
    n_channels: usize,
    tile: &TileSource<'_, T>,
    out: &mut MatrixRowMut<'_, T>,
) {
    let bt_rows = coefficients::<T>(transform.rows.bt);
    let bt_cols = coefficients::<T>(transform.cols.bt);
    let inner = transform.inner_tile;

    let mut d = [T::ZERO; MAX_TILE_POINTS];
    let mut v = [T::ZERO; MAX_TILE_POINTS];
    for c in 0..n_channels {
        tile.gather(inner, c, &mut d);
        sandwich(&bt_rows, &bt_cols, &d, inner, inner, &mut v);
        for (m, x) in v[..inner.area()].iter().enumerate() {
            out.set(m, c, *x);
        }
    }
}

/// `Y = A^T_rows · M · A^T_cols^T + bias`, clamped, for every channel.
pub fn output_tile<T: WinogradElement>(
    transform: &OutputTransformImpl<T>,
    n_channels: usize,
    tile: &MatrixRow<'_, T>,
    bias: Option<&[T]>,
    out: &mut TileSink<'_, T>,
    clamp: ClampBounds<T>,
) {
    let at_rows = coefficients::<T>(transform.rows.at);
    let at_cols = coefficients::<T>(transform.cols.at);
    let inner = transform.inner_tile();
    let otile = transform.output_tile;

    let mut m = [T::ZERO; MAX_TILE_POINTS];
    let mut y = [T::ZERO; MAX_TILE_POINTS];
    for c in 0..n_channels {
        for (p, x) in m[..inner.area()].iter_mut().enumerate() {
            *x = tile.get(p, c);
        }
        sandwich(&at_rows, &at_cols, &m, inner, otile, &mut y);
        let b = bias.map_or(T::ZERO, |b| b[c]);
        for i in 0..otile.rows {
            for j in 0..otile.cols {
                out.store(i, j, c, clamp.apply(y[i * otile.cols + j] + b));
            }
        }
    }
}
