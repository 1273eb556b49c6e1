//! Integer helpers used by tile and stride arithmetic.

/// Integer division rounding towards positive infinity.
///
/// # Panics
/// Panics if `d == 0`.
#[inline]
pub const fn ceil_div(n: usize, d: usize) -> usize {
    n.div_ceil(d)
}

/// Round `n` up to the next multiple of `m`.
///
/// # Panics
/// Panics if `m == 0`.
#[inline]
pub const fn round_up(n: usize, m: usize) -> usize {
    ceil_div(n, m) * m
}
