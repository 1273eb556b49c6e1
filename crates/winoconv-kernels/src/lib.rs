//! Winograd-domain 2D convolution kernels.
//!
//! A convolution is planned once for a fixed kernel shape, input shape and
//! padding ([`WinogradConvolution::new`]), its weights are transformed once
//! ([`WinogradConvolution::transform_weights`]), and then any number of
//! inputs of that shape can be convolved ([`WinogradConvolution::execute`]).
//!
//! ```no_run
//! use winoconv_kernels::{KernelShape, PaddingType, Tensor4DShape, WinogradConvolution};
//!
//! # fn main() -> winoconv_kernels::Result<()> {
//! let kernel = KernelShape::hwio(3, 3, 16, 32)?;
//! let input = Tensor4DShape::nhwc(1, 56, 56, 16)?;
//! let mut conv = WinogradConvolution::<f32>::new(&kernel, &input, PaddingType::Same, None)?;
//! conv.transform_weights(&vec![0.0; kernel.size()], None)?;
//! let mut output = vec![0.0; conv.output_shape().size()];
//! conv.execute(&mut output, &vec![0.0; input.size()], None, 4)?;
//! # Ok(())
//! # }
//! ```
//!
//! [`WinogradError::Unsupported`] from planning means no registered transform
//! handles the kernel; callers should fall back to another algorithm.

pub mod activation;
pub mod convolution;
pub mod drivers;
pub mod element;
pub mod gemm;
pub mod parallel;
pub mod reorder;
pub mod selector;
pub mod transforms;

pub use activation::{Activation, ClampBounds};
pub use convolution::{
    ConvolutionPlan, ConvolutionState, WinogradConvolution, get_kernel_storage_size,
    get_kernel_transform_working_size, get_working_space_size,
};
pub use element::WinogradElement;
pub use parallel::{WorkerPool, WorkerPoolConfig};
pub use selector::{ConvolutionArgs, GemmArgs, SelectionHints, WinogradDomainSpec, WinogradImpl, get_implementation};

pub use winoconv_common::{
    KernelOrdering, KernelShape, PaddingType, Result, Shape2D, Tensor4DShape, TensorOrdering, TileAddressing,
    WinogradConfig, WinogradError, get_output_shape,
};
pub use winoconv_device_probe::{CpuCapabilities, probe_cpu};
