//! Activation functions fused into the output transform.

use crate::element::WinogradElement;

/// Activation applied to every output element after bias.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Activation {
    #[default]
    None,
    Relu,
    /// `min(max(x, 0), upper)`.
    BoundedRelu { upper: f32 },
    /// `min(max(x, lower), upper)`.
    LuBoundedRelu { lower: f32, upper: f32 },
}

impl Activation {
    /// `(min, max)` clamp in `f32`; infinities mean "unbounded".
    pub fn bounds(&self) -> (f32, f32) {
        match *self {
            Self::None => (f32::NEG_INFINITY, f32::INFINITY),
            Self::Relu => (0.0, f32::INFINITY),
            Self::BoundedRelu { upper } => (0.0, upper),
            Self::LuBoundedRelu { lower, upper } => (lower, upper),
        }
    }

    /// Every variant reduces to a clamp, so all of them fuse.
    pub fn is_fusable(&self) -> bool {
        let (lo, hi) = self.bounds();
        lo <= hi
    }

    pub fn clamp_bounds<T: WinogradElement>(&self) -> ClampBounds<T> {
        let (lo, hi) = self.bounds();
        let min = if lo == f32::NEG_INFINITY { T::lowest() } else { T::from_f32(lo) };
        let max = if hi == f32::INFINITY { T::highest() } else { T::from_f32(hi) };
        ClampBounds { min, max }
    }
}

/// Clamp range handed to output micro-kernels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClampBounds<T> {
    pub min: T,
    pub max: T,
}

impl<T: WinogradElement> ClampBounds<T> {
    pub fn unbounded() -> Self {
        Self { min: T::lowest(), max: T::highest() }
    }

    #[inline]
    pub fn apply(&self, v: T) -> T {
        if v < self.min {
            self.min
        } else if v > self.max {
            self.max
        } else {
            v
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relu_maps_zero_to_zero() {
        let c = Activation::Relu.clamp_bounds::<f32>();
        assert_eq!(c.apply(0.0), 0.0);
        assert_eq!(c.apply(-3.0), 0.0);
        assert_eq!(c.apply(7.5), 7.5);
    }

    #[test]
    fn bounded_variants_clamp_both_sides() {
        let c = Activation::BoundedRelu { upper: 6.0 }.clamp_bounds::<f32>();
        assert_eq!(c.apply(9.0), 6.0);
        assert_eq!(c.apply(-1.0), 0.0);
        let c = Activation::LuBoundedRelu { lower: -1.0, upper: 1.0 }.clamp_bounds::<f32>();
        assert_eq!(c.apply(-4.0), -1.0);
        assert_eq!(c.apply(0.25), 0.25);
    }

    #[test]
    fn none_is_identity() {
        let c = Activation::None.clamp_bounds::<f32>();
        assert_eq!(c, ClampBounds::unbounded());
        assert_eq!(c.apply(-1e30), -1e30);
    }

    #[test]
    fn inverted_bounds_are_not_fusable() {
        assert!(Activation::Relu.is_fusable());
        assert!(!Activation::LuBoundedRelu { lower: 2.0, upper: 1.0 }.is_fusable());
    }
}
