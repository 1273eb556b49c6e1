//! One-dimensional Winograd transform matrices.
//!
//! A 2D transform is the outer product of a row-axis and a column-axis
//! [`Transform1D`]: input `B^T·d·B`, weights `G·g·G^T`, output `A^T·m·A`.
//! Axes a kernel does not extend along use [`IDENTITY`].

/// Matrices of the 1D Winograd algorithm F(`output`, `kernel`).
#[derive(Debug, PartialEq)]
pub struct Transform1D {
    pub kernel: usize,
    pub output: usize,
    /// `inner x inner`, row-major.
    pub bt: &'static [f32],
    /// `inner x kernel`, row-major.
    pub g: &'static [f32],
    /// `output x inner`, row-major.
    pub at: &'static [f32],
}

impl Transform1D {
    /// Points per axis in the Winograd domain.
    pub const fn inner(&self) -> usize {
        self.output + self.kernel - 1
    }
}

/// Degenerate axis of a 1D kernel.
pub static IDENTITY: Transform1D = Transform1D { kernel: 1, output: 1, bt: &[1.0], g: &[1.0], at: &[1.0] };

/// Input transform over the points `0, ±1, ±2, ∞`, shared by every 6-point
/// algorithm.
#[rustfmt::skip]
const BT_6: &[f32] = &[
    4.0,  0.0, -5.0,  0.0, 1.0, 0.0,
    0.0, -4.0, -4.0,  1.0, 1.0, 0.0,
    0.0,  4.0, -4.0, -1.0, 1.0, 0.0,
    0.0, -2.0, -1.0,  2.0, 1.0, 0.0,
    0.0,  2.0, -1.0, -2.0, 1.0, 0.0,
    0.0,  4.0,  0.0, -5.0, 0.0, 1.0,
];

/// Input transform over the points `0, ±1, ±1/2, ±2, ∞`, shared by every
/// 8-point algorithm.
#[rustfmt::skip]
const BT_8: &[f32] = &[
    1.0,  0.0, -21.0 / 4.0,  0.0,         21.0 / 4.0,   0.0,         -1.0, 0.0,
    0.0,  1.0,   1.0,       -17.0 / 4.0, -17.0 / 4.0,   1.0,          1.0, 0.0,
    0.0, -1.0,   1.0,        17.0 / 4.0, -17.0 / 4.0,  -1.0,          1.0, 0.0,
    0.0,  0.5,   0.25,       -5.0 / 2.0,  -5.0 / 4.0,   2.0,          1.0, 0.0,
    0.0, -0.5,   0.25,        5.0 / 2.0,  -5.0 / 4.0,  -2.0,          1.0, 0.0,
    0.0,  2.0,   4.0,        -5.0 / 2.0,  -5.0,         0.5,          1.0, 0.0,
    0.0, -2.0,   4.0,         5.0 / 2.0,  -5.0,        -0.5,          1.0, 0.0,
    0.0, -1.0,   0.0,        21.0 / 4.0,   0.0,       -21.0 / 4.0,    0.0, 1.0,
];

/// F(2, 3).
#[rustfmt::skip]
pub static F2_3: Transform1D = Transform1D {
    kernel: 3,
    output: 2,
    bt: &[
        1.0,  0.0, -1.0,  0.0,
        0.0,  1.0,  1.0,  0.0,
        0.0, -1.0,  1.0,  0.0,
        0.0,  1.0,  0.0, -1.0,
    ],
    g: &[
        1.0,  0.0, 0.0,
        0.5,  0.5, 0.5,
        0.5, -0.5, 0.5,
        0.0,  0.0, 1.0,
    ],
    at: &[
        1.0, 1.0,  1.0,  0.0,
        0.0, 1.0, -1.0, -1.0,
    ],
};

/// F(4, 3).
#[rustfmt::skip]
pub static F4_3: Transform1D = Transform1D {
    kernel: 3,
    output: 4,
    bt: BT_6,
    g: &[
         1.0 / 4.0,   0.0,         0.0,
        -1.0 / 6.0,  -1.0 / 6.0,  -1.0 / 6.0,
        -1.0 / 6.0,   1.0 / 6.0,  -1.0 / 6.0,
         1.0 / 24.0,  1.0 / 12.0,  1.0 / 6.0,
         1.0 / 24.0, -1.0 / 12.0,  1.0 / 6.0,
         0.0,         0.0,         1.0,
    ],
    at: &[
        1.0, 1.0,  1.0, 1.0,  1.0, 0.0,
        0.0, 1.0, -1.0, 2.0, -2.0, 0.0,
        0.0, 1.0,  1.0, 4.0,  4.0, 0.0,
        0.0, 1.0, -1.0, 8.0, -8.0, 1.0,
    ],
};

/// F(2, 5).
#[rustfmt::skip]
pub static F2_5: Transform1D = Transform1D {
    kernel: 5,
    output: 2,
    bt: BT_6,
    g: &[
         1.0 / 4.0,   0.0,         0.0,        0.0,        0.0,
        -1.0 / 6.0,  -1.0 / 6.0,  -1.0 / 6.0, -1.0 / 6.0, -1.0 / 6.0,
        -1.0 / 6.0,   1.0 / 6.0,  -1.0 / 6.0,  1.0 / 6.0, -1.0 / 6.0,
         1.0 / 24.0,  1.0 / 12.0,  1.0 / 6.0,  1.0 / 3.0,  2.0 / 3.0,
         1.0 / 24.0, -1.0 / 12.0,  1.0 / 6.0, -1.0 / 3.0,  2.0 / 3.0,
         0.0,         0.0,         0.0,        0.0,        1.0,
    ],
    at: &[
        1.0, 1.0,  1.0, 1.0,  1.0, 0.0,
        0.0, 1.0, -1.0, 2.0, -2.0, 1.0,
    ],
};

/// F(4, 5).
#[rustfmt::skip]
pub static F4_5: Transform1D = Transform1D {
    kernel: 5,
    output: 4,
    bt: BT_8,
    g: &[
         1.0,          0.0,          0.0,          0.0,          0.0,
        -2.0 / 9.0,   -2.0 / 9.0,   -2.0 / 9.0,   -2.0 / 9.0,   -2.0 / 9.0,
        -2.0 / 9.0,    2.0 / 9.0,   -2.0 / 9.0,    2.0 / 9.0,   -2.0 / 9.0,
         1.0 / 90.0,   1.0 / 45.0,   2.0 / 45.0,   4.0 / 45.0,   8.0 / 45.0,
         1.0 / 90.0,  -1.0 / 45.0,   2.0 / 45.0,  -4.0 / 45.0,   8.0 / 45.0,
         4.0 / 45.0,   2.0 / 45.0,   1.0 / 45.0,   1.0 / 90.0,   1.0 / 180.0,
         4.0 / 45.0,  -2.0 / 45.0,   1.0 / 45.0,  -1.0 / 90.0,   1.0 / 180.0,
         0.0,          0.0,          0.0,          0.0,          1.0,
    ],
    at: &[
        1.0, 1.0,  1.0, 1.0,  1.0, 8.0,  8.0, 0.0,
        0.0, 1.0, -1.0, 2.0, -2.0, 4.0, -4.0, 0.0,
        0.0, 1.0,  1.0, 4.0,  4.0, 2.0,  2.0, 0.0,
        0.0, 1.0, -1.0, 8.0, -8.0, 1.0, -1.0, 1.0,
    ],
};

/// F(6, 3).
#[rustfmt::skip]
pub static F6_3: Transform1D = Transform1D {
    kernel: 3,
    output: 6,
    bt: BT_8,
    g: &[
         1.0,          0.0,          0.0,
        -2.0 / 9.0,   -2.0 / 9.0,   -2.0 / 9.0,
        -2.0 / 9.0,    2.0 / 9.0,   -2.0 / 9.0,
         1.0 / 90.0,   1.0 / 45.0,   2.0 / 45.0,
         1.0 / 90.0,  -1.0 / 45.0,   2.0 / 45.0,
         1.0 / 45.0,   1.0 / 90.0,   1.0 / 180.0,
         1.0 / 45.0,  -1.0 / 90.0,   1.0 / 180.0,
         0.0,          0.0,          1.0,
    ],
    at: &[
        1.0, 1.0,  1.0,  1.0,   1.0, 32.0,  32.0, 0.0,
        0.0, 1.0, -1.0,  2.0,  -2.0, 16.0, -16.0, 0.0,
        0.0, 1.0,  1.0,  4.0,   4.0,  8.0,   8.0, 0.0,
        0.0, 1.0, -1.0,  8.0,  -8.0,  4.0,  -4.0, 0.0,
        0.0, 1.0,  1.0, 16.0,  16.0,  2.0,   2.0, 0.0,
        0.0, 1.0, -1.0, 32.0, -32.0,  1.0,  -1.0, 1.0,
    ],
};

/// F(2, 7).
#[rustfmt::skip]
pub static F2_7: Transform1D = Transform1D {
    kernel: 7,
    output: 2,
    bt: BT_8,
    g: &[
         1.0,          0.0,          0.0,          0.0,          0.0,          0.0,          0.0,
        -2.0 / 9.0,   -2.0 / 9.0,   -2.0 / 9.0,   -2.0 / 9.0,   -2.0 / 9.0,   -2.0 / 9.0,   -2.0 / 9.0,
        -2.0 / 9.0,    2.0 / 9.0,   -2.0 / 9.0,    2.0 / 9.0,   -2.0 / 9.0,    2.0 / 9.0,   -2.0 / 9.0,
         1.0 / 90.0,   1.0 / 45.0,   2.0 / 45.0,   4.0 / 45.0,   8.0 / 45.0,  16.0 / 45.0,  32.0 / 45.0,
         1.0 / 90.0,  -1.0 / 45.0,   2.0 / 45.0,  -4.0 / 45.0,   8.0 / 45.0, -16.0 / 45.0,  32.0 / 45.0,
        16.0 / 45.0,   8.0 / 45.0,   4.0 / 45.0,   2.0 / 45.0,   1.0 / 45.0,   1.0 / 90.0,   1.0 / 180.0,
        16.0 / 45.0,  -8.0 / 45.0,   4.0 / 45.0,  -2.0 / 45.0,   1.0 / 45.0,  -1.0 / 90.0,   1.0 / 180.0,
         0.0,          0.0,          0.0,          0.0,          0.0,          0.0,          1.0,
    ],
    at: &[
        1.0, 1.0,  1.0, 1.0,  1.0, 2.0,  2.0, 0.0,
        0.0, 1.0, -1.0, 2.0, -2.0, 1.0, -1.0, 1.0,
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    fn correlate_1d(t: &Transform1D, d: &[f64], g: &[f64]) -> Vec<f64> {
        let n = t.inner();
        let u: Vec<f64> =
            (0..n).map(|i| (0..t.kernel).map(|k| f64::from(t.g[i * t.kernel + k]) * g[k]).sum()).collect();
        let v: Vec<f64> = (0..n).map(|i| (0..n).map(|k| f64::from(t.bt[i * n + k]) * d[k]).sum()).collect();
        (0..t.output).map(|o| (0..n).map(|i| f64::from(t.at[o * n + i]) * u[i] * v[i]).sum()).collect()
    }

    #[test]
    fn matrix_dimensions_agree() {
        for t in [&IDENTITY, &F2_3, &F4_3, &F2_5, &F4_5, &F6_3, &F2_7] {
            let n = t.inner();
            assert_eq!(t.bt.len(), n * n);
            assert_eq!(t.g.len(), n * t.kernel);
            assert_eq!(t.at.len(), t.output * n);
        }
    }

    #[test]
    fn one_dimensional_transforms_compute_correlation() {
        for t in [&IDENTITY, &F2_3, &F4_3, &F2_5, &F4_5, &F6_3, &F2_7] {
            let n = t.inner();
            let d: Vec<f64> = (0..n).map(|i| (i as f64 * 0.7).sin() + 0.3).collect();
            let g: Vec<f64> = (0..t.kernel).map(|k| 1.0 - k as f64 * 0.45).collect();
            let got = correlate_1d(t, &d, &g);
            for (o, y) in got.iter().enumerate() {
                let expected: f64 = (0..t.kernel).map(|k| d[o + k] * g[k]).sum();
                assert!((y - expected).abs() < 1e-4, "F({},{}) point {o}: {y} vs {expected}", t.output, t.kernel);
            }
        }
    }

    #[test]
    fn algorithms_of_one_size_share_their_input_transform() {
        for t in [&F4_3, &F2_5] {
            assert_eq!(t.bt, BT_6, "F({},{})", t.output, t.kernel);
        }
        for t in [&F4_5, &F6_3, &F2_7] {
            assert_eq!(t.bt, BT_8, "F({},{})", t.output, t.kernel);
        }
    }
}
