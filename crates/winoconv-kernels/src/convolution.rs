//! Convolution orchestrator.
//!
//! [`WinogradConvolution`] owns the plan for one fixed problem shape and
//! sequences the pipeline:
//!
//! 1. `transform_weights`: OIHW→HWIO if needed, then the weight transform into
//!    kernel storage.
//! 2. `execute`: NCHW→NHWC if needed, input transform, batched GEMM, output
//!    transform (bias and activation fused), NHWC→NCHW if needed.
//!
//! Each stage is a fork-join over the worker pool; a stage returns only once
//! every partition finished, so the next stage always sees complete data.

use crate::activation::Activation;
use crate::drivers::{InputTransformDriver, OutputTransformDriver, WeightTransformDriver};
use crate::element::WinogradElement;
use crate::gemm::{BatchedBlockedGemm, M_BLOCK, N_BLOCK, OperandStrides};
use crate::parallel::{WorkerPool, WorkerPoolConfig, contiguous_range};
use crate::reorder;
use crate::selector::{ConvolutionArgs, SelectionHints, WinogradImpl, get_implementation};
use tracing::{debug, debug_span, instrument};
use winoconv_common::{
    ArenaLayout, ArenaRequest, KernelOrdering, KernelShape, PaddingType, Result, Tensor4DShape, TensorOrdering,
    TileAddressing, WinogradConfig, WinogradError, ensure_len, get_output_shape, try_alloc_zeroed,
};
use winoconv_device_probe::{CpuCapabilities, probe_cpu};

// ── Plan ────────────────────────────────────────────────────────────

/// Selected implementation plus every size derived from it.
#[derive(Debug, Clone, Copy)]
pub struct ConvolutionPlan<T: 'static> {
    pub kernel_shape: KernelShape,
    pub input_shape: Tensor4DShape,
    pub output_shape: Tensor4DShape,
    pub padding: PaddingType,
    pub args: ConvolutionArgs,
    pub implementation: WinogradImpl<T>,
    pub input_addressing: TileAddressing,
    pub output_addressing: TileAddressing,
    arena_request: ArenaRequest,
}

impl<T: WinogradElement> ConvolutionPlan<T> {
    /// Select an implementation and size all buffers.
    ///
    /// Fails with [`WinogradError::Unsupported`] when no transform triple fits,
    /// which callers should answer with a non-Winograd convolution.
    pub fn new(
        kernel_shape: &KernelShape,
        input_shape: &Tensor4DShape,
        padding: PaddingType,
        activation: Activation,
        caps: &CpuCapabilities,
        config: &WinogradConfig,
    ) -> Result<Self> {
        if !activation.is_fusable() {
            return Err(WinogradError::invalid_usage(format!("activation {activation:?} has an empty range")));
        }
        let args = ConvolutionArgs::from_shapes(kernel_shape, input_shape, padding, activation)?;
        let output_shape = get_output_shape(kernel_shape, input_shape, padding)?;
        let implementation = get_implementation::<T>(&args, caps, &SelectionHints::from(config)).ok_or(
            WinogradError::Unsupported { kernel_rows: kernel_shape.n_rows(), kernel_cols: kernel_shape.n_cols() },
        )?;

        let spec = implementation.winograd_spec;
        let grid = implementation.tile_grid;
        let reorder = match input_shape.ordering() {
            TensorOrdering::Nhwc => 0,
            TensorOrdering::Nchw => input_shape.size().max(output_shape.size()),
        };
        let scratch_per_thread = (grid.inner_tile.area() * args.n_input_channels)
            .max(grid.output_tile.area() * args.n_output_channels);
        let arena_request = ArenaRequest {
            input_matrices: spec.input.len(),
            output_matrices: spec.output.len(),
            reorder,
            scratch_per_thread,
            n_threads: 1,
        };

        Ok(Self {
            kernel_shape: *kernel_shape,
            input_shape: *input_shape,
            output_shape,
            padding,
            args,
            implementation,
            input_addressing: config.input_addressing,
            output_addressing: config.output_addressing,
            arena_request,
        })
    }

    /// Elements of transformed-weight storage.
    pub fn kernel_storage_len(&self) -> usize {
        self.implementation.winograd_spec.weights.len()
    }

    /// Working-space layout for `n_threads` workers.
    pub fn arena(&self, n_threads: usize) -> ArenaLayout {
        ArenaLayout::new(ArenaRequest { n_threads: n_threads.max(1), ..self.arena_request }, size_of::<T>())
    }

    /// Bytes of working space for `n_threads` workers.
    pub fn working_space_size(&self, n_threads: usize) -> usize {
        self.arena(n_threads).total_bytes()
    }
}

// ── Sizing queries ──────────────────────────────────────────────────

fn sizing_plan<T: WinogradElement>(
    kernel_shape: &KernelShape,
    input_shape: &Tensor4DShape,
    padding: PaddingType,
    config: &WinogradConfig,
) -> Result<ConvolutionPlan<T>> {
    config.validate()?;
    ConvolutionPlan::new(kernel_shape, input_shape, padding, Activation::None, &probe_cpu(), config)
}

/// Bytes of transformed-weight storage.
///
/// Takes the input shape and configuration as well: the tile, and so the
/// storage, depends on both. Pass the configuration the convolution will be
/// built with.
pub fn get_kernel_storage_size<T: WinogradElement>(
    kernel_shape: &KernelShape,
    input_shape: &Tensor4DShape,
    padding: PaddingType,
    config: &WinogradConfig,
) -> Result<usize> {
    Ok(sizing_plan::<T>(kernel_shape, input_shape, padding, config)?.kernel_storage_len() * size_of::<T>())
}

/// Bytes of scratch `transform_weights` needs to reorder the weights to HWIO.
pub fn get_kernel_transform_working_size<T: WinogradElement>(kernel_shape: &KernelShape) -> usize {
    match kernel_shape.ordering() {
        KernelOrdering::Hwio => 0,
        KernelOrdering::Oihw => kernel_shape.size() * size_of::<T>(),
    }
}

/// Bytes of working space `execute` needs with `n_threads` workers.
pub fn get_working_space_size<T: WinogradElement>(
    input_shape: &Tensor4DShape,
    kernel_shape: &KernelShape,
    padding: PaddingType,
    n_threads: usize,
    config: &WinogradConfig,
) -> Result<usize> {
    Ok(sizing_plan::<T>(kernel_shape, input_shape, padding, config)?.working_space_size(n_threads))
}

// ── Orchestrator ────────────────────────────────────────────────────

/// Lifecycle of a [`WinogradConvolution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvolutionState {
    Uninitialized,
    WeightsTransformed,
    InputPrepared,
    Executed,
}

enum KernelStorage<'k, T> {
    Owned(Vec<T>),
    Borrowed(&'k mut [T]),
}

impl<T> KernelStorage<'_, T> {
    fn as_slice(&self) -> &[T] {
        match self {
            Self::Owned(v) => v,
            Self::Borrowed(s) => s,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        match self {
            Self::Owned(v) => v,
            Self::Borrowed(s) => s,
        }
    }
}

fn cast_bytes<'b, T: WinogradElement>(what: &str, bytes: &'b mut [u8]) -> Result<&'b mut [T]> {
    bytemuck::try_cast_slice_mut(bytes).map_err(|e| {
        WinogradError::invalid_usage(format!("{what} is not a whole, aligned run of {}: {e}", T::NAME))
    })
}

fn pool_of(own: &Option<WorkerPool>) -> Result<&WorkerPool> {
    match own {
        Some(pool) => Ok(pool),
        None => WorkerPool::global(),
    }
}

/// Winograd convolution for one fixed kernel, input shape and padding.
pub struct WinogradConvolution<'k, T: WinogradElement> {
    plan: ConvolutionPlan<T>,
    kernel_storage: KernelStorage<'k, T>,
    working_space: Vec<T>,
    weight_scratch: Vec<T>,
    bias: Option<Vec<T>>,
    activation: Activation,
    pool: Option<WorkerPool>,
    state: ConvolutionState,
}

impl<'k, T: WinogradElement> WinogradConvolution<'k, T> {
    /// Plan with the default configuration.
    ///
    /// `kernel_storage`, when given, must hold at least
    /// [`get_kernel_storage_size`] bytes aligned for `T`; otherwise storage is
    /// allocated and owned.
    pub fn new(
        kernel_shape: &KernelShape,
        input_shape: &Tensor4DShape,
        padding: PaddingType,
        kernel_storage: Option<&'k mut [u8]>,
    ) -> Result<Self> {
        Self::with_config(kernel_shape, input_shape, padding, kernel_storage, &WinogradConfig::default())
    }

    pub fn with_config(
        kernel_shape: &KernelShape,
        input_shape: &Tensor4DShape,
        padding: PaddingType,
        kernel_storage: Option<&'k mut [u8]>,
        config: &WinogradConfig,
    ) -> Result<Self> {
        config.validate()?;
        let plan = ConvolutionPlan::new(kernel_shape, input_shape, padding, Activation::None, &probe_cpu(), config)?;

        let storage_len = plan.kernel_storage_len();
        let kernel_storage = match kernel_storage {
            Some(bytes) => {
                let elements = cast_bytes::<T>("kernel storage", bytes)?;
                if elements.len() < storage_len {
                    return Err(WinogradError::ShapeMismatch {
                        what: "kernel storage",
                        expected: storage_len * size_of::<T>(),
                        actual: elements.len() * size_of::<T>(),
                    });
                }
                KernelStorage::Borrowed(&mut elements[..storage_len])
            }
            None => KernelStorage::Owned(try_alloc_zeroed(storage_len)?),
        };

        let pool = match config.num_threads {
            0 => None,
            n => Some(WorkerPool::new(WorkerPoolConfig { num_threads: n, ..WorkerPoolConfig::default() })?),
        };

        debug!(
            kernel = %kernel_shape.spatial(),
            input = %input_shape,
            tile = %plan.implementation.tile_grid.output_tile,
            storage = storage_len,
            "planned winograd convolution"
        );
        Ok(Self {
            plan,
            kernel_storage,
            working_space: Vec::new(),
            weight_scratch: Vec::new(),
            bias: None,
            activation: Activation::None,
            pool,
            state: ConvolutionState::Uninitialized,
        })
    }

    pub fn plan(&self) -> &ConvolutionPlan<T> {
        &self.plan
    }

    pub fn state(&self) -> ConvolutionState {
        self.state
    }

    pub fn output_shape(&self) -> Tensor4DShape {
        self.plan.output_shape
    }

    /// Bytes of working space `execute` needs with `n_threads` workers.
    pub fn working_space_size(&self, n_threads: usize) -> usize {
        self.plan.working_space_size(n_threads)
    }

    /// Per-output-channel bias added before the activation.
    pub fn set_bias(&mut self, bias: Option<&[T]>) -> Result<()> {
        if let Some(b) = bias {
            ensure_len("bias", self.plan.kernel_shape.n_output_channels(), b.len())?;
        }
        self.bias = bias.map(<[T]>::to_vec);
        Ok(())
    }

    pub fn set_activation(&mut self, activation: Activation) -> Result<()> {
        if !activation.is_fusable() {
            return Err(WinogradError::invalid_usage(format!("activation {activation:?} has an empty range")));
        }
        self.activation = activation;
        self.plan.args.activation = activation;
        Ok(())
    }

    /// Transform `weights` (HWIO or OIHW, as planned) into kernel storage.
    ///
    /// OIHW weights are reordered through `scratch` (at least
    /// [`get_kernel_transform_working_size`] bytes) or an owned buffer. Calling
    /// this again replaces the previous weights.
    #[instrument(name = "winograd.transform_weights", skip_all)]
    pub fn transform_weights(&mut self, weights: &[T], scratch: Option<&mut [u8]>) -> Result<()> {
        let kernel_shape = self.plan.kernel_shape;
        ensure_len("weights", kernel_shape.size(), weights.len())?;

        let hwio: &[T] = match kernel_shape.ordering() {
            KernelOrdering::Hwio => weights,
            KernelOrdering::Oihw => {
                let size = kernel_shape.size();
                let buf: &mut [T] = match scratch {
                    Some(bytes) => cast_bytes::<T>("weight scratch", bytes)?,
                    None => {
                        if self.weight_scratch.len() < size {
                            self.weight_scratch = try_alloc_zeroed(size)?;
                        }
                        &mut self.weight_scratch[..]
                    }
                };
                if buf.len() < size {
                    return Err(WinogradError::ShapeMismatch {
                        what: "weight scratch",
                        expected: size * size_of::<T>(),
                        actual: buf.len() * size_of::<T>(),
                    });
                }
                let buf = &mut buf[..size];
                reorder::oihw_to_hwio(
                    weights,
                    buf,
                    kernel_shape.n_output_channels(),
                    kernel_shape.n_input_channels(),
                    kernel_shape.n_rows(),
                    kernel_shape.n_cols(),
                )?;
                buf
            }
        };

        let (ld_row, ld_col, ld_in, _) = kernel_shape.with_ordering(KernelOrdering::Hwio).strides();
        let storage = self.kernel_storage.as_mut_slice();
        storage.fill(T::ZERO);
        let implementation = &self.plan.implementation;
        let driver = WeightTransformDriver::new(
            implementation.weight_transform,
            kernel_shape.n_input_channels(),
            kernel_shape.n_output_channels(),
            hwio,
            (ld_row, ld_col, ld_in),
            storage,
            implementation.winograd_spec.weights,
        )?;

        let pool = pool_of(&self.pool)?;
        let window = driver.get_window();
        let parts = pool.num_threads().min(window);
        pool.run_tasks(parts, |p| {
            let r = contiguous_range(window, parts, p);
            driver.run(r.start, r.end)
        })?;

        self.state = ConvolutionState::WeightsTransformed;
        debug!(transform = implementation.weight_transform.name, "weights transformed");
        Ok(())
    }

    /// Convolve `input` into `output` using `n_threads` partitions per stage.
    ///
    /// `working_space`, when given, must hold at least
    /// [`Self::working_space_size`]`(n_threads)` bytes aligned for `T`. It is
    /// zeroed on every call, as is the owned buffer used otherwise.
    #[instrument(name = "winograd.execute", skip_all, fields(n_threads = n_threads))]
    pub fn execute(
        &mut self,
        output: &mut [T],
        input: &[T],
        working_space: Option<&mut [u8]>,
        n_threads: usize,
    ) -> Result<()> {
        if self.state == ConvolutionState::Uninitialized {
            return Err(WinogradError::invalid_usage("execute called before transform_weights"));
        }
        if n_threads == 0 {
            return Err(WinogradError::invalid_usage("execute needs at least one thread"));
        }
        let plan = self.plan;
        ensure_len("input tensor", plan.input_shape.size(), input.len())?;
        ensure_len("output tensor", plan.output_shape.size(), output.len())?;

        let layout = plan.arena(n_threads);
        let arena: &mut [T] = match working_space {
            Some(bytes) => cast_bytes::<T>("working space", bytes)?,
            None => {
                if self.working_space.len() < layout.total_len() {
                    self.working_space = try_alloc_zeroed(layout.total_len())?;
                }
                &mut self.working_space[..]
            }
        };
        layout.validate(arena.len())?;
        let arena = &mut arena[..layout.total_len()];
        arena.fill(T::ZERO);
        let views = layout.split(arena)?;

        let pool = pool_of(&self.pool)?;
        let implementation = &plan.implementation;
        let spec = implementation.winograd_spec;
        let grid = implementation.tile_grid;
        let gemm = implementation.gemm_args;
        let parts = n_threads;
        let nchw = plan.input_shape.ordering() == TensorOrdering::Nchw;

        // Input transform.
        {
            let _span = debug_span!("winograd.input_transform", tiles = gemm.m).entered();
            let shape = plan.input_shape;
            let source: &[T] = if nchw {
                let dst = &mut views.reorder[..shape.size()];
                reorder::nchw_to_nhwc(input, dst, shape.n_batches(), shape.n_channels(), shape.n_rows(), shape.n_cols())?;
                dst
            } else {
                input
            };
            let (ld_batch, ld_row, ld_col, _) = shape.with_ordering(TensorOrdering::Nhwc).strides();
            let driver = InputTransformDriver::new(
                implementation.input_transform,
                plan.input_addressing,
                grid,
                gemm.k,
                source,
                (ld_batch, ld_row, ld_col),
                views.input_matrices,
                spec.input,
            )?;
            pool.run_partitioned(parts, views.thread_scratch, views.scratch_per_thread, |p, scratch| {
                driver.run_strided(p, parts, scratch)
            })?;
        }
        self.state = ConvolutionState::InputPrepared;

        // Batched GEMM.
        {
            let _span = debug_span!("winograd.gemm", n_gemms = gemm.n_gemms, m = gemm.m, n = gemm.n, k = gemm.k)
                .entered();
            let batched = BatchedBlockedGemm::<T, M_BLOCK, N_BLOCK>::new(
                gemm.n_gemms,
                gemm.m,
                gemm.k,
                gemm.n,
                views.input_matrices,
                OperandStrides::new(spec.input.ld_matrix, spec.input.ld_row),
                self.kernel_storage.as_slice(),
                OperandStrides::new(spec.weights.ld_matrix, spec.weights.ld_row),
                views.output_matrices,
                OperandStrides::new(spec.output.ld_matrix, spec.output.ld_row),
            )?;
            let window = batched.get_window();
            let gemm_parts = parts.min(window);
            pool.run_tasks(gemm_parts, |p| {
                let r = contiguous_range(window, gemm_parts, p);
                if r.is_empty() { Ok(()) } else { batched.run(r.start, r.end) }
            })?;
        }

        // Output transform.
        {
            let _span = debug_span!("winograd.output_transform", tiles = gemm.m).entered();
            let shape = plan.output_shape;
            let (ld_batch, ld_row, ld_col, _) = shape.with_ordering(TensorOrdering::Nhwc).strides();
            let dest: &mut [T] = if nchw { &mut views.reorder[..shape.size()] } else { &mut *output };
            let driver = OutputTransformDriver::new(
                implementation.output_transform,
                plan.output_addressing,
                grid,
                gemm.n,
                views.output_matrices,
                spec.output,
                self.bias.as_deref(),
                self.activation.clamp_bounds::<T>(),
                dest,
                (ld_batch, ld_row, ld_col),
            )?;
            let window = driver.get_window();
            pool.run_partitioned(parts, views.thread_scratch, views.scratch_per_thread, |p, scratch| {
                let r = contiguous_range(window, parts, p);
                driver.run(r.start, r.end, scratch)
            })?;
        }

        if nchw {
            let _span = debug_span!("winograd.reorder_output").entered();
            let shape = plan.output_shape;
            reorder::nhwc_to_nchw(
                &views.reorder[..shape.size()],
                output,
                shape.n_batches(),
                shape.n_rows(),
                shape.n_cols(),
                shape.n_channels(),
            )?;
        }

        self.state = ConvolutionState::Executed;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winoconv_common::Shape2D;

    fn shapes() -> (KernelShape, Tensor4DShape) {
        (KernelShape::hwio(3, 3, 2, 3).unwrap(), Tensor4DShape::nhwc(1, 6, 6, 2).unwrap())
    }

    #[test]
    fn execute_before_weights_is_invalid_usage() {
        let (k, i) = shapes();
        let mut conv = WinogradConvolution::<f32>::new(&k, &i, PaddingType::Same, None).unwrap();
        let input = vec![0.0; i.size()];
        let mut output = vec![0.0; conv.output_shape().size()];
        let err = conv.execute(&mut output, &input, None, 1).unwrap_err();
        assert!(err.is_invalid_usage());
        assert_eq!(conv.state(), ConvolutionState::Uninitialized);
    }

    #[test]
    fn state_advances_through_the_pipeline() {
        let (k, i) = shapes();
        let mut conv = WinogradConvolution::<f32>::new(&k, &i, PaddingType::Same, None).unwrap();
        conv.transform_weights(&vec![0.5; k.size()], None).unwrap();
        assert_eq!(conv.state(), ConvolutionState::WeightsTransformed);
        let input = vec![1.0; i.size()];
        let mut output = vec![0.0; conv.output_shape().size()];
        conv.execute(&mut output, &input, None, 2).unwrap();
        assert_eq!(conv.state(), ConvolutionState::Executed);
        // Centre pixel sees all 9 taps of both input channels.
        let centre = (2 * 6 + 2) * 3;
        assert!((output[centre] - 9.0).abs() < 1e-3);
    }

    #[test]
    fn zero_threads_is_invalid_usage() {
        let (k, i) = shapes();
        let mut conv = WinogradConvolution::<f32>::new(&k, &i, PaddingType::Valid, None).unwrap();
        conv.transform_weights(&vec![0.0; k.size()], None).unwrap();
        let input = vec![0.0; i.size()];
        let mut output = vec![0.0; conv.output_shape().size()];
        assert!(conv.execute(&mut output, &input, None, 0).unwrap_err().is_invalid_usage());
    }

    #[test]
    fn borrowed_kernel_storage_must_be_large_enough() {
        let (k, i) = shapes();
        let needed = get_kernel_storage_size::<f32>(&k, &i, PaddingType::Same, &WinogradConfig::default()).unwrap();
        let mut words = vec![0u32; needed / 4 - 1];
        let err = WinogradConvolution::<f32>::new(&k, &i, PaddingType::Same, Some(bytemuck::cast_slice_mut(&mut words)))
            .err()
            .unwrap();
        assert!(err.is_invalid_usage());
    }

    #[test]
    fn sizing_queries_follow_a_pinned_tile() {
        let k = KernelShape::hwio(3, 3, 4, 5).unwrap();
        let i = Tensor4DShape::nhwc(1, 16, 16, 4).unwrap();
        let pinned = WinogradConfig { output_tile: Some(Shape2D::new(2, 2)), ..WinogradConfig::default() };
        let conv = WinogradConvolution::<f32>::with_config(&k, &i, PaddingType::Same, None, &pinned).unwrap();
        assert_eq!(conv.plan().implementation.tile_grid.output_tile, Shape2D::new(2, 2));

        let storage = get_kernel_storage_size::<f32>(&k, &i, PaddingType::Same, &pinned).unwrap();
        assert_eq!(storage, conv.plan().kernel_storage_len() * size_of::<f32>());
        let working = get_working_space_size::<f32>(&i, &k, PaddingType::Same, 3, &pinned).unwrap();
        assert_eq!(working, conv.working_space_size(3));

        let default = WinogradConfig::default();
        assert_ne!(get_kernel_storage_size::<f32>(&k, &i, PaddingType::Same, &default).unwrap(), storage);
    }

    #[test]
    fn sizing_queries_reject_an_invalid_config() {
        let (k, i) = shapes();
        let bad = WinogradConfig { num_threads: 4096, ..WinogradConfig::default() };
        assert!(get_working_space_size::<f32>(&i, &k, PaddingType::Same, 1, &bad).is_err());
    }

    #[test]
    fn unsupported_kernel_is_not_invalid_usage() {
        let k = KernelShape::hwio(7, 7, 1, 1).unwrap();
        let i = Tensor4DShape::nhwc(1, 16, 16, 1).unwrap();
        let err = WinogradConvolution::<f32>::new(&k, &i, PaddingType::Same, None).err().unwrap();
        assert!(matches!(err, WinogradError::Unsupported { kernel_rows: 7, kernel_cols: 7 }));
        assert!(!err.is_invalid_usage());
    }

    #[test]
    fn oihw_weights_need_reorder_scratch() {
        let k = KernelShape::new(3, 2, 3, 3, KernelOrdering::Oihw).unwrap();
        assert_eq!(get_kernel_transform_working_size::<f32>(&k), k.size() * 4);
        let (hwio, _) = shapes();
        assert_eq!(get_kernel_transform_working_size::<f32>(&hwio), 0);
    }
}
