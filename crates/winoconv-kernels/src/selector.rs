//! Implementation selection: find a compatible weight/input/output transform
//! triple for a convolution and derive the GEMM geometry around it.

use crate::activation::Activation;
use crate::drivers::{MatrixLayout, TileGrid};
use crate::element::WinogradElement;
use crate::gemm::{M_BLOCK, N_BLOCK};
use crate::transforms::{InputTransformImpl, OutputTransformImpl, WeightTransformImpl};
use tracing::{debug, info};
use winoconv_common::{KernelShape, PaddingType, Result, Shape2D, Tensor4DShape, WinogradConfig, get_output_shape, round_up};
use winoconv_device_probe::CpuCapabilities;

/// Everything the selector needs to know about one convolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvolutionArgs {
    pub n_batches: usize,
    pub input_shape: Shape2D,
    pub n_input_channels: usize,
    pub pad_top: usize,
    pub pad_left: usize,
    pub output_shape: Shape2D,
    pub n_output_channels: usize,
    pub kernel_shape: Shape2D,
    pub activation: Activation,
}

impl ConvolutionArgs {
    /// Derive the arguments from tensor shapes and a padding mode.
    pub fn from_shapes(
        kernel: &KernelShape,
        input: &Tensor4DShape,
        padding: PaddingType,
        activation: Activation,
    ) -> Result<Self> {
        let output = get_output_shape(kernel, input, padding)?;
        let (pad_top, pad_left) = padding.top_left(kernel.spatial());
        Ok(Self {
            n_batches: input.n_batches(),
            input_shape: input.spatial(),
            n_input_channels: input.n_channels(),
            pad_top,
            pad_left,
            output_shape: output.spatial(),
            n_output_channels: kernel.n_output_channels(),
            kernel_shape: kernel.spatial(),
            activation,
        })
    }
}

/// Shape of the batched GEMM stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GemmArgs {
    pub n_gemms: usize,
    pub m: usize,
    pub n: usize,
    pub k: usize,
}

/// Strides of the three Winograd-domain matrix families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WinogradDomainSpec {
    pub weights: MatrixLayout,
    pub input: MatrixLayout,
    pub output: MatrixLayout,
}

impl WinogradDomainSpec {
    fn new(gemm: &GemmArgs, tiles_per_batch: usize) -> Self {
        let m_rounded = round_up(gemm.m, M_BLOCK);
        let n_rounded = round_up(gemm.n, N_BLOCK);
        Self {
            weights: MatrixLayout { ld_matrix: gemm.k * n_rounded, ld_batch: 0, ld_row: n_rounded, n_matrices: gemm.n_gemms },
            input: MatrixLayout {
                ld_matrix: m_rounded * gemm.k,
                ld_batch: tiles_per_batch * gemm.k,
                ld_row: gemm.k,
                n_matrices: gemm.n_gemms,
            },
            output: MatrixLayout {
                ld_matrix: m_rounded * n_rounded,
                ld_batch: tiles_per_batch * n_rounded,
                ld_row: n_rounded,
                n_matrices: gemm.n_gemms,
            },
        }
    }
}

/// Caller preferences that narrow the search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionHints {
    /// Only accept this output tile.
    pub output_tile: Option<Shape2D>,
    /// When false, SIMD-only transforms are treated as unavailable.
    pub allow_simd: bool,
}

impl From<&WinogradConfig> for SelectionHints {
    fn from(config: &WinogradConfig) -> Self {
        Self { output_tile: config.output_tile, allow_simd: config.allow_simd }
    }
}

/// A selected transform triple with the geometry it implies.
#[derive(Debug)]
pub struct WinogradImpl<T: 'static> {
    pub weight_transform: &'static WeightTransformImpl<T>,
    pub input_transform: &'static InputTransformImpl<T>,
    pub output_transform: &'static OutputTransformImpl<T>,
    pub gemm_args: GemmArgs,
    pub winograd_spec: WinogradDomainSpec,
    pub tile_grid: TileGrid,
}

// Not derived: a derive would require `T: Clone`.
impl<T: 'static> Clone for WinogradImpl<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: 'static> Copy for WinogradImpl<T> {}

/// Pick the first compatible triple from `T`'s registry.
///
/// Output transforms are searched outermost, then weight transforms, then
/// input transforms; the first triple whose Winograd-domain tiles agree wins.
/// `None` means the convolution has no Winograd implementation here, which
/// callers treat as "use another algorithm".
pub fn get_implementation<T: WinogradElement>(
    args: &ConvolutionArgs,
    caps: &CpuCapabilities,
    hints: &SelectionHints,
) -> Option<WinogradImpl<T>> {
    let caps = if hints.allow_simd { *caps } else { caps.without_simd() };
    let registry = T::transform_registry();
    let kernel = args.kernel_shape;
    let pinned = hints.output_tile;

    let weights: Vec<&'static WeightTransformImpl<T>> = registry
        .weight_transforms()
        .iter()
        .filter(|w| {
            let keep = w.kernel == kernel
                && w.requirement.is_satisfied_by(&caps)
                && pinned.is_none_or(|tile| tile == w.output_tile);
            if !keep {
                debug!(transform = w.name, "weight transform rejected");
            }
            keep
        })
        .collect();

    let outputs = registry.output_transforms().iter().filter(|o| {
        let larger = !o.requires_input_larger_than_tile
            || (args.input_shape.rows > o.output_tile.rows && args.input_shape.cols > o.output_tile.cols);
        let keep = o.kernel == kernel
            && o.requirement.is_satisfied_by(&caps)
            && pinned.is_none_or(|tile| tile == o.output_tile)
            && larger;
        if !keep {
            debug!(transform = o.name, input = %args.input_shape, "output transform rejected");
        }
        keep
    });

    let pinned_inner = pinned.map(|tile| Shape2D::new(tile.rows + kernel.rows - 1, tile.cols + kernel.cols - 1));
    let inputs: Vec<&'static InputTransformImpl<T>> = registry
        .input_transforms()
        .iter()
        .filter(|i| {
            let keep = i.requirement.is_satisfied_by(&caps) && pinned_inner.is_none_or(|inner| inner == i.inner_tile);
            if !keep {
                debug!(transform = i.name, "input transform rejected");
            }
            keep
        })
        .collect();

    for output in outputs {
        let inner = output.inner_tile();
        for &weight in weights.iter().filter(|w| w.inner_tile() == inner && w.output_tile == output.output_tile) {
            if let Some(&input) = inputs.iter().find(|i| i.inner_tile == inner) {
                info!(
                    element = T::NAME,
                    weights = weight.name,
                    input = input.name,
                    output = output.name,
                    "selected winograd implementation"
                );
                return Some(build_impl(args, weight, input, output));
            }
        }
    }
    debug!(kernel = %kernel, "no winograd implementation");
    None
}

fn build_impl<T: WinogradElement>(
    args: &ConvolutionArgs,
    weight_transform: &'static WeightTransformImpl<T>,
    input_transform: &'static InputTransformImpl<T>,
    output_transform: &'static OutputTransformImpl<T>,
) -> WinogradImpl<T> {
    let tile_grid = TileGrid::new(
        args.n_batches,
        args.input_shape,
        args.output_shape,
        (args.pad_top, args.pad_left),
        output_transform.output_tile,
        args.kernel_shape,
    );
    let gemm_args = GemmArgs {
        n_gemms: input_transform.inner_tile.area(),
        m: args.n_batches * tile_grid.tiles_per_batch(),
        n: args.n_output_channels,
        k: args.n_input_channels,
    };
    WinogradImpl {
        weight_transform,
        input_transform,
        output_transform,
        gemm_args,
        winograd_spec: WinogradDomainSpec::new(&gemm_args, tile_grid.tiles_per_batch()),
        tile_grid,
    }
}
