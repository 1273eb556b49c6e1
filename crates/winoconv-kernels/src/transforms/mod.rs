//! Winograd transform implementations and the per-type registry.
//!
//! Each implementation is an immutable record naming the kernel and tile
//! shapes it handles, the CPU features it needs and the micro-kernel that
//! transforms one tile. A [`TransformRegistry`] lists them in preference order;
//! the selector takes the first compatible combination.

pub mod generic;
pub mod matrices;
#[cfg(all(target_arch = "aarch64", feature = "neon"))]
pub mod neon;
pub mod tile;
pub mod unrolled;

use crate::activation::ClampBounds;
use crate::element::WinogradElement;
use matrices::{F2_3, F2_5, F2_7, F4_3, F4_5, F6_3, IDENTITY, Transform1D};
use tile::{MatrixRow, MatrixRowMut, TileSink, TileSource};
use winoconv_common::Shape2D;
use winoconv_device_probe::CpuCapabilities;

// ── Micro-kernel signatures ─────────────────────────────────────────

/// Transform the `kernel`-sized weights of one input channel for all
/// `n_channels` output channels. Point `(i, j, oc)` is at
/// `i * ld_row + j * ld_col + oc`.
pub type WeightKernelFn<T> = fn(
    transform: &WeightTransformImpl<T>,
    n_channels: usize,
    weights: &[T],
    ld_row: usize,
    ld_col: usize,
    out: &mut MatrixRowMut<'_, T>,
);

/// Transform one input tile for `n_channels` channels into one GEMM row.
pub type InputKernelFn<T> =
    fn(transform: &InputTransformImpl<T>, n_channels: usize, tile: &TileSource<'_, T>, out: &mut MatrixRowMut<'_, T>);

/// Transform one GEMM row back into an output tile, adding bias and clamping.
pub type OutputKernelFn<T> = fn(
    transform: &OutputTransformImpl<T>,
    n_channels: usize,
    tile: &MatrixRow<'_, T>,
    bias: Option<&[T]>,
    out: &mut TileSink<'_, T>,
    clamp: ClampBounds<T>,
);

// ── Hardware requirements ───────────────────────────────────────────

/// CPU extensions a micro-kernel needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HardwareRequirement {
    pub neon: bool,
    pub sve: bool,
    pub fp16: bool,
}

impl HardwareRequirement {
    /// Runs anywhere.
    pub const NONE: Self = Self { neon: false, sve: false, fp16: false };
    pub const NEON: Self = Self { neon: true, sve: false, fp16: false };

    pub fn is_satisfied_by(&self, caps: &CpuCapabilities) -> bool {
        (!self.neon || caps.has_neon) && (!self.sve || caps.has_sve) && (!self.fp16 || caps.has_fp16)
    }
}

// ── Implementation records ──────────────────────────────────────────

/// A weight transform for one kernel shape and output tile.
#[derive(Debug)]
pub struct WeightTransformImpl<T> {
    pub name: &'static str,
    pub kernel: Shape2D,
    pub output_tile: Shape2D,
    pub requirement: HardwareRequirement,
    /// Lower is preferred.
    pub priority: u32,
    pub rows: &'static Transform1D,
    pub cols: &'static Transform1D,
    pub micro_kernel: WeightKernelFn<T>,
}

impl<T> WeightTransformImpl<T> {
    pub fn new(
        name: &'static str,
        rows: &'static Transform1D,
        cols: &'static Transform1D,
        priority: u32,
        micro_kernel: WeightKernelFn<T>,
    ) -> Self {
        Self {
            name,
            kernel: Shape2D::new(rows.kernel, cols.kernel),
            output_tile: Shape2D::new(rows.output, cols.output),
            requirement: HardwareRequirement::NONE,
            priority,
            rows,
            cols,
            micro_kernel,
        }
    }

    /// Winograd-domain tile this transform produces.
    pub fn inner_tile(&self) -> Shape2D {
        Shape2D::new(self.kernel.rows + self.output_tile.rows - 1, self.kernel.cols + self.output_tile.cols - 1)
    }
}

/// An input transform for one Winograd-domain tile size.
#[derive(Debug)]
pub struct InputTransformImpl<T> {
    pub name: &'static str,
    pub inner_tile: Shape2D,
    pub requirement: HardwareRequirement,
    pub priority: u32,
    pub rows: &'static Transform1D,
    pub cols: &'static Transform1D,
    pub micro_kernel: InputKernelFn<T>,
}

impl<T> InputTransformImpl<T> {
    pub fn new(
        name: &'static str,
        rows: &'static Transform1D,
        cols: &'static Transform1D,
        priority: u32,
        micro_kernel: InputKernelFn<T>,
    ) -> Self {
        Self {
            name,
            inner_tile: Shape2D::new(rows.inner(), cols.inner()),
            requirement: HardwareRequirement::NONE,
            priority,
            rows,
            cols,
            micro_kernel,
        }
    }

    #[must_use]
    pub fn with_requirement(mut self, requirement: HardwareRequirement) -> Self {
        self.requirement = requirement;
        self
    }
}

/// An output transform for one kernel shape and output tile.
#[derive(Debug)]
pub struct OutputTransformImpl<T> {
    pub name: &'static str,
    pub kernel: Shape2D,
    pub output_tile: Shape2D,
    pub requirement: HardwareRequirement,
    pub priority: u32,
    /// Only worth selecting when the input is larger than the output tile.
    pub requires_input_larger_than_tile: bool,
    pub rows: &'static Transform1D,
    pub cols: &'static Transform1D,
    pub micro_kernel: OutputKernelFn<T>,
}

impl<T> OutputTransformImpl<T> {
    pub fn new(
        name: &'static str,
        rows: &'static Transform1D,
        cols: &'static Transform1D,
        priority: u32,
        micro_kernel: OutputKernelFn<T>,
    ) -> Self {
        Self {
            name,
            kernel: Shape2D::new(rows.kernel, cols.kernel),
            output_tile: Shape2D::new(rows.output, cols.output),
            requirement: HardwareRequirement::NONE,
            priority,
            requires_input_larger_than_tile: false,
            rows,
            cols,
            micro_kernel,
        }
    }

    #[must_use]
    pub fn requiring_larger_input(mut self) -> Self {
        self.requires_input_larger_than_tile = true;
        self
    }

    /// Winograd-domain tile this transform consumes.
    pub fn inner_tile(&self) -> Shape2D {
        Shape2D::new(self.kernel.rows + self.output_tile.rows - 1, self.kernel.cols + self.output_tile.cols - 1)
    }
}

// ── Registry ────────────────────────────────────────────────────────

/// Every transform compiled in for element type `T`, in preference order.
///
/// Entries are kept sorted by `priority`; equal priorities keep registration
/// order.
#[derive(Debug)]
pub struct TransformRegistry<T> {
    weights: Vec<WeightTransformImpl<T>>,
    inputs: Vec<InputTransformImpl<T>>,
    outputs: Vec<OutputTransformImpl<T>>,
}

impl<T> Default for TransformRegistry<T> {
    fn default() -> Self {
        Self { weights: Vec::new(), inputs: Vec::new(), outputs: Vec::new() }
    }
}

fn insert_by_priority<I>(list: &mut Vec<I>, item: I, priority: impl Fn(&I) -> u32) {
    let p = priority(&item);
    let at = list.iter().position(|existing| priority(existing) > p).unwrap_or(list.len());
    list.insert(at, item);
}

impl<T: WinogradElement> TransformRegistry<T> {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Transforms that run on any CPU: the hand-unrolled F(2x2, 3x3) kernels
    /// and matrix-driven kernels for every other shape.
    ///
    /// Per kernel shape the preferred tile comes first: 4x4 for 3x3 (2x2 on
    /// tiny inputs), 2x2 for 5x5, 1x6 for 1x3, 1x4 for 1x5 and 1x2 for 1x7,
    /// and the transposes for column kernels.
    pub fn portable() -> Self {
        let mut r = Self::empty();

        r.push_weight(WeightTransformImpl::new("weights_4x4_3x3", &F4_3, &F4_3, 10, generic::weight_tile));
        r.push_weight(WeightTransformImpl::new("weights_2x2_3x3", &F2_3, &F2_3, 20, unrolled::weight_2x2_3x3));
        r.push_weight(WeightTransformImpl::new("weights_2x2_5x5", &F2_5, &F2_5, 10, generic::weight_tile));
        r.push_weight(WeightTransformImpl::new("weights_4x4_5x5", &F4_5, &F4_5, 20, generic::weight_tile));
        r.push_weight(WeightTransformImpl::new("weights_1x6_1x3", &IDENTITY, &F6_3, 10, generic::weight_tile));
        r.push_weight(WeightTransformImpl::new("weights_6x1_3x1", &F6_3, &IDENTITY, 10, generic::weight_tile));
        r.push_weight(WeightTransformImpl::new("weights_1x4_1x3", &IDENTITY, &F4_3, 20, generic::weight_tile));
        r.push_weight(WeightTransformImpl::new("weights_4x1_3x1", &F4_3, &IDENTITY, 20, generic::weight_tile));
        r.push_weight(WeightTransformImpl::new("weights_1x4_1x5", &IDENTITY, &F4_5, 10, generic::weight_tile));
        r.push_weight(WeightTransformImpl::new("weights_4x1_5x1", &F4_5, &IDENTITY, 10, generic::weight_tile));
        r.push_weight(WeightTransformImpl::new("weights_1x2_1x7", &IDENTITY, &F2_7, 10, generic::weight_tile));
        r.push_weight(WeightTransformImpl::new("weights_2x1_7x1", &F2_7, &IDENTITY, 10, generic::weight_tile));

        r.push_input(InputTransformImpl::new("input_6x6", &F4_3, &F4_3, 10, generic::input_tile));
        r.push_input(InputTransformImpl::new("input_4x4", &F2_3, &F2_3, 20, unrolled::input_4x4));
        r.push_input(InputTransformImpl::new("input_8x8", &F4_5, &F4_5, 10, generic::input_tile));
        r.push_input(InputTransformImpl::new("input_1x6", &IDENTITY, &F4_3, 10, generic::input_tile));
        r.push_input(InputTransformImpl::new("input_6x1", &F4_3, &IDENTITY, 10, generic::input_tile));
        r.push_input(InputTransformImpl::new("input_1x8", &IDENTITY, &F4_5, 10, generic::input_tile));
        r.push_input(InputTransformImpl::new("input_8x1", &F4_5, &IDENTITY, 10, generic::input_tile));

        r.push_output(
            OutputTransformImpl::new("output_4x4_3x3", &F4_3, &F4_3, 10, generic::output_tile).requiring_larger_input(),
        );
        r.push_output(OutputTransformImpl::new("output_2x2_3x3", &F2_3, &F2_3, 20, unrolled::output_2x2_3x3));
        r.push_output(OutputTransformImpl::new("output_2x2_5x5", &F2_5, &F2_5, 10, generic::output_tile));
        r.push_output(OutputTransformImpl::new("output_4x4_5x5", &F4_5, &F4_5, 20, generic::output_tile));
        r.push_output(OutputTransformImpl::new("output_1x6_1x3", &IDENTITY, &F6_3, 10, generic::output_tile));
        r.push_output(OutputTransformImpl::new("output_6x1_3x1", &F6_3, &IDENTITY, 10, generic::output_tile));
        r.push_output(OutputTransformImpl::new("output_1x4_1x3", &IDENTITY, &F4_3, 20, generic::output_tile));
        r.push_output(OutputTransformImpl::new("output_4x1_3x1", &F4_3, &IDENTITY, 20, generic::output_tile));
        r.push_output(OutputTransformImpl::new("output_1x4_1x5", &IDENTITY, &F4_5, 10, generic::output_tile));
        r.push_output(OutputTransformImpl::new("output_4x1_5x1", &F4_5, &IDENTITY, 10, generic::output_tile));
        r.push_output(OutputTransformImpl::new("output_1x2_1x7", &IDENTITY, &F2_7, 10, generic::output_tile));
        r.push_output(OutputTransformImpl::new("output_2x1_7x1", &F2_7, &IDENTITY, 10, generic::output_tile));

        tracing::debug!(
            element = T::NAME,
            weights = r.weights.len(),
            inputs = r.inputs.len(),
            outputs = r.outputs.len(),
            "built portable transform registry"
        );
        r
    }

    pub fn push_weight(&mut self, t: WeightTransformImpl<T>) {
        insert_by_priority(&mut self.weights, t, |t| t.priority);
    }

    pub fn push_input(&mut self, t: InputTransformImpl<T>) {
        insert_by_priority(&mut self.inputs, t, |t| t.priority);
    }

    pub fn push_output(&mut self, t: OutputTransformImpl<T>) {
        insert_by_priority(&mut self.outputs, t, |t| t.priority);
    }

    pub fn weight_transforms(&self) -> &[WeightTransformImpl<T>] {
        &self.weights
    }

    pub fn input_transforms(&self) -> &[InputTransformImpl<T>] {
        &self.inputs
    }

    pub fn output_transforms(&self) -> &[OutputTransformImpl<T>] {
        &self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_sorted_by_priority() {
        let r = TransformRegistry::<f32>::portable();
        assert!(r.weight_transforms().windows(2).all(|w| w[0].priority <= w[1].priority));
        assert!(r.input_transforms().windows(2).all(|w| w[0].priority <= w[1].priority));
        assert!(r.output_transforms().windows(2).all(|w| w[0].priority <= w[1].priority));
    }

    #[test]
    fn larger_3x3_tile_is_listed_first() {
        let r = TransformRegistry::<f32>::portable();
        let names: Vec<_> = r
            .output_transforms()
            .iter()
            .filter(|t| t.kernel == Shape2D::new(3, 3))
            .map(|t| t.output_tile)
            .collect();
        assert_eq!(names, vec![Shape2D::new(4, 4), Shape2D::new(2, 2)]);
    }

    #[test]
    fn preferred_tile_per_kernel_shape() {
        let r = TransformRegistry::<f32>::portable();
        let first = |kernel: Shape2D| {
            r.output_transforms().iter().find(|t| t.kernel == kernel).map(|t| t.output_tile)
        };
        let expected = [
            ((5, 5), (2, 2)),
            ((1, 3), (1, 6)),
            ((3, 1), (6, 1)),
            ((1, 5), (1, 4)),
            ((5, 1), (4, 1)),
            ((1, 7), (1, 2)),
            ((7, 1), (2, 1)),
        ];
        for ((kr, kc), (tr, tc)) in expected {
            assert_eq!(first(Shape2D::new(kr, kc)), Some(Shape2D::new(tr, tc)), "{kr}x{kc}");
        }
    }

    #[test]
    fn every_one_dimensional_kernel_has_a_column_twin() {
        let r = TransformRegistry::<f32>::portable();
        for t in r.output_transforms().iter().filter(|t| t.kernel.rows == 1) {
            let twin = Shape2D::new(t.kernel.cols, 1);
            let tile = Shape2D::new(t.output_tile.cols, 1);
            assert!(
                r.output_transforms().iter().any(|o| o.kernel == twin && o.output_tile == tile),
                "{} has no transposed partner",
                t.name
            );
        }
    }

    #[test]
    fn equal_priority_keeps_registration_order() {
        let mut r = TransformRegistry::<f32>::empty();
        r.push_input(InputTransformImpl::new("a", &F2_3, &F2_3, 5, unrolled::input_4x4));
        r.push_input(InputTransformImpl::new("b", &F4_3, &F4_3, 5, generic::input_tile));
        r.push_input(InputTransformImpl::new("c", &F4_5, &F4_5, 1, generic::input_tile));
        let names: Vec<_> = r.input_transforms().iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn one_matrix_family_per_inner_tile() {
        // Input transforms are matched to weights by tile size alone, so a tile
        // size must always mean the same B^T.
        let r = TransformRegistry::<f32>::portable();
        for w in r.weight_transforms() {
            for i in r.input_transforms().iter().filter(|i| i.inner_tile == w.inner_tile()) {
                assert_eq!(i.rows.bt, w.rows.bt, "{} vs {}", i.name, w.name);
                assert_eq!(i.cols.bt, w.cols.bt, "{} vs {}", i.name, w.name);
            }
        }
    }

    #[test]
    fn requirements_respect_capabilities() {
        let bare = CpuCapabilities::baseline();
        assert!(HardwareRequirement::NONE.is_satisfied_by(&bare));
        assert!(!HardwareRequirement::NEON.is_satisfied_by(&bare));
        let neon = CpuCapabilities { has_neon: true, ..bare };
        assert!(HardwareRequirement::NEON.is_satisfied_by(&neon));
    }
}
