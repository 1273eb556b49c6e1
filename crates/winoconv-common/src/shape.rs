//! Tensor, kernel and padding shape descriptions.
//!
//! All shapes are immutable once built and validated: every dimension is
//! non-zero. Any change of shape requires re-planning the convolution.

use crate::error::{Result, WinogradError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── 2D extents ──────────────────────────────────────────────────────

/// A `rows x cols` extent (feature map, kernel or tile).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape2D {
    pub rows: usize,
    pub cols: usize,
}

impl Shape2D {
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub const fn area(&self) -> usize {
        self.rows * self.cols
    }
}

impl fmt::Display for Shape2D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

impl FromStr for Shape2D {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (rows, cols) =
            s.trim().split_once(['x', 'X']).ok_or_else(|| format!("expected ROWSxCOLS, got {s:?}"))?;
        let rows = rows.trim().parse::<usize>().map_err(|e| format!("bad row count in {s:?}: {e}"))?;
        let cols = cols.trim().parse::<usize>().map_err(|e| format!("bad column count in {s:?}: {e}"))?;
        if rows == 0 || cols == 0 {
            return Err(format!("extent must be non-zero, got {s:?}"));
        }
        Ok(Self { rows, cols })
    }
}

// ── Orderings ───────────────────────────────────────────────────────

/// Axis ordering of an activation tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorOrdering {
    Nhwc,
    Nchw,
}

/// Axis ordering of a convolution weight tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelOrdering {
    Hwio,
    Oihw,
}

/// How the borders of the input are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingType {
    /// No padding; the output shrinks by `kernel - 1`.
    Valid,
    /// Zero padding so the output keeps the input's spatial extent.
    Same,
}

impl PaddingType {
    /// Implicit `(top, left)` padding for a kernel of the given extent.
    pub const fn top_left(self, kernel: Shape2D) -> (usize, usize) {
        match self {
            Self::Valid => (0, 0),
            Self::Same => ((kernel.rows - 1) / 2, (kernel.cols - 1) / 2),
        }
    }
}

// ── Tensor4DShape ───────────────────────────────────────────────────

/// Shape of a 4D activation tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tensor4DShape {
    n_batches: usize,
    n_rows: usize,
    n_cols: usize,
    n_channels: usize,
    ordering: TensorOrdering,
}

impl Tensor4DShape {
    /// Build a shape, rejecting zero-sized dimensions.
    pub fn new(
        n_batches: usize,
        n_rows: usize,
        n_cols: usize,
        n_channels: usize,
        ordering: TensorOrdering,
    ) -> Result<Self> {
        if n_batches == 0 || n_rows == 0 || n_cols == 0 || n_channels == 0 {
            return Err(WinogradError::invalid_usage(format!(
                "tensor dimensions must be non-zero, got {n_batches}x{n_rows}x{n_cols}x{n_channels}"
            )));
        }
        Ok(Self { n_batches, n_rows, n_cols, n_channels, ordering })
    }

    /// NHWC shorthand.
    pub fn nhwc(n_batches: usize, n_rows: usize, n_cols: usize, n_channels: usize) -> Result<Self> {
        Self::new(n_batches, n_rows, n_cols, n_channels, TensorOrdering::Nhwc)
    }

    pub const fn n_batches(&self) -> usize {
        self.n_batches
    }

    pub const fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub const fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub const fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub const fn ordering(&self) -> TensorOrdering {
        self.ordering
    }

    pub const fn spatial(&self) -> Shape2D {
        Shape2D::new(self.n_rows, self.n_cols)
    }

    /// Total number of elements.
    pub const fn size(&self) -> usize {
        self.n_batches * self.n_rows * self.n_cols * self.n_channels
    }

    /// Element strides `(ld_batch, ld_row, ld_col, ld_channel)` for this ordering.
    pub const fn strides(&self) -> (usize, usize, usize, usize) {
        let ld_batch = self.n_rows * self.n_cols * self.n_channels;
        match self.ordering {
            TensorOrdering::Nhwc => (ld_batch, self.n_cols * self.n_channels, self.n_channels, 1),
            TensorOrdering::Nchw => (ld_batch, self.n_cols, 1, self.n_rows * self.n_cols),
        }
    }

    /// The same tensor described in another ordering.
    #[must_use]
    pub const fn with_ordering(&self, ordering: TensorOrdering) -> Self {
        Self { ordering, ..*self }
    }
}

impl fmt::Display for Tensor4DShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ord = match self.ordering {
            TensorOrdering::Nhwc => "NHWC",
            TensorOrdering::Nchw => "NCHW",
        };
        write!(f, "{}x{}x{}x{} ({ord})", self.n_batches, self.n_rows, self.n_cols, self.n_channels)
    }
}

// ── KernelShape ─────────────────────────────────────────────────────

/// Shape of a convolution weight tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelShape {
    n_output_channels: usize,
    n_input_channels: usize,
    n_rows: usize,
    n_cols: usize,
    ordering: KernelOrdering,
}

impl KernelShape {
    pub fn new(
        n_output_channels: usize,
        n_input_channels: usize,
        n_rows: usize,
        n_cols: usize,
        ordering: KernelOrdering,
    ) -> Result<Self> {
        if n_output_channels == 0 || n_input_channels == 0 || n_rows == 0 || n_cols == 0 {
            return Err(WinogradError::invalid_usage(format!(
                "kernel dimensions must be non-zero, got {n_output_channels}x{n_input_channels}x{n_rows}x{n_cols}"
            )));
        }
        Ok(Self { n_output_channels, n_input_channels, n_rows, n_cols, ordering })
    }

    /// HWIO shorthand.
    pub fn hwio(n_rows: usize, n_cols: usize, n_input_channels: usize, n_output_channels: usize) -> Result<Self> {
        Self::new(n_output_channels, n_input_channels, n_rows, n_cols, KernelOrdering::Hwio)
    }

    pub const fn n_output_channels(&self) -> usize {
        self.n_output_channels
    }

    pub const fn n_input_channels(&self) -> usize {
        self.n_input_channels
    }

    pub const fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub const fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub const fn ordering(&self) -> KernelOrdering {
        self.ordering
    }

    pub const fn spatial(&self) -> Shape2D {
        Shape2D::new(self.n_rows, self.n_cols)
    }

    pub const fn size(&self) -> usize {
        self.n_output_channels * self.n_input_channels * self.n_rows * self.n_cols
    }

    /// Element strides `(ld_row, ld_col, ld_input_channel, ld_output_channel)`.
    pub const fn strides(&self) -> (usize, usize, usize, usize) {
        match self.ordering {
            KernelOrdering::Hwio => {
                let ld_col = self.n_input_channels * self.n_output_channels;
                (self.n_cols * ld_col, ld_col, self.n_output_channels, 1)
            }
            KernelOrdering::Oihw => {
                let ld_in = self.n_rows * self.n_cols;
                (self.n_cols, 1, ld_in, self.n_input_channels * ld_in)
            }
        }
    }

    #[must_use]
    pub const fn with_ordering(&self, ordering: KernelOrdering) -> Self {
        Self { ordering, ..*self }
    }
}

/// Output tensor shape of a unit-stride convolution.
///
/// VALID shrinks each spatial axis by `kernel - 1`; SAME keeps it. The result
/// carries the input's ordering and the kernel's output channel count.
pub fn get_output_shape(
    kernel_shape: &KernelShape,
    input_shape: &Tensor4DShape,
    padding: PaddingType,
) -> Result<Tensor4DShape> {
    if kernel_shape.n_input_channels() != input_shape.n_channels() {
        return Err(WinogradError::invalid_usage(format!(
            "kernel expects {} input channels, input tensor has {}",
            kernel_shape.n_input_channels(),
            input_shape.n_channels()
        )));
    }
    let (rows, cols) = match padding {
        PaddingType::Same => (input_shape.n_rows(), input_shape.n_cols()),
        PaddingType::Valid => {
            if input_shape.n_rows() < kernel_shape.n_rows() || input_shape.n_cols() < kernel_shape.n_cols() {
                return Err(WinogradError::invalid_usage(format!(
                    "VALID padding needs an input of at least {}x{}, got {}",
                    kernel_shape.n_rows(),
                    kernel_shape.n_cols(),
                    input_shape.spatial()
                )));
            }
            (
                input_shape.n_rows() - kernel_shape.n_rows() + 1,
                input_shape.n_cols() - kernel_shape.n_cols() + 1,
            )
        }
    };
    Tensor4DShape::new(
        input_shape.n_batches(),
        rows,
        cols,
        kernel_shape.n_output_channels(),
        input_shape.ordering(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(Tensor4DShape::nhwc(1, 0, 4, 1).is_err());
        assert!(KernelShape::hwio(3, 3, 0, 8).is_err());
    }

    #[test]
    fn nhwc_and_nchw_strides() {
        let nhwc = Tensor4DShape::nhwc(2, 5, 7, 3).unwrap();
        assert_eq!(nhwc.strides(), (105, 21, 3, 1));
        let nchw = nhwc.with_ordering(TensorOrdering::Nchw);
        assert_eq!(nchw.strides(), (105, 7, 1, 35));
        assert_eq!(nchw.size(), 210);
    }

    #[test]
    fn kernel_strides_follow_ordering() {
        let hwio = KernelShape::hwio(3, 3, 4, 8).unwrap();
        assert_eq!(hwio.strides(), (96, 32, 8, 1));
        let oihw = hwio.with_ordering(KernelOrdering::Oihw);
        assert_eq!(oihw.strides(), (3, 1, 9, 36));
    }

    #[test]
    fn valid_3x3_shrinks_by_two() {
        let k = KernelShape::hwio(3, 3, 1, 1).unwrap();
        let x = Tensor4DShape::nhwc(1, 34, 34, 1).unwrap();
        let y = get_output_shape(&k, &x, PaddingType::Valid).unwrap();
        assert_eq!((y.n_rows(), y.n_cols(), y.n_channels()), (32, 32, 1));
        let y = get_output_shape(&k, &x, PaddingType::Same).unwrap();
        assert_eq!((y.n_rows(), y.n_cols()), (34, 34));
    }

    #[test]
    fn valid_rejects_input_smaller_than_kernel() {
        let k = KernelShape::hwio(5, 5, 1, 1).unwrap();
        let x = Tensor4DShape::nhwc(1, 4, 9, 1).unwrap();
        assert!(get_output_shape(&k, &x, PaddingType::Valid).unwrap_err().is_invalid_usage());
    }

    #[test]
    fn channel_mismatch_is_invalid_usage() {
        let k = KernelShape::hwio(3, 3, 2, 1).unwrap();
        let x = Tensor4DShape::nhwc(1, 8, 8, 3).unwrap();
        assert!(get_output_shape(&k, &x, PaddingType::Same).is_err());
    }

    #[test]
    fn same_padding_amounts() {
        assert_eq!(PaddingType::Same.top_left(Shape2D::new(3, 3)), (1, 1));
        assert_eq!(PaddingType::Same.top_left(Shape2D::new(5, 1)), (2, 0));
        assert_eq!(PaddingType::Valid.top_left(Shape2D::new(5, 5)), (0, 0));
    }

    #[test]
    fn shape2d_parses_tile_strings() {
        assert_eq!("4x4".parse::<Shape2D>().unwrap(), Shape2D::new(4, 4));
        assert_eq!(" 1X4 ".parse::<Shape2D>().unwrap(), Shape2D::new(1, 4));
        assert!("4".parse::<Shape2D>().is_err());
        assert!("0x4".parse::<Shape2D>().is_err());
        assert_eq!(Shape2D::new(2, 3).to_string(), "2x3");
    }
}
