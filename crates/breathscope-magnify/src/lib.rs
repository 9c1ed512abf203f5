//! Breathscope Magnify - Eulerian motion magnification
//!
//! Amplifies small periodic motion in a short clip by exaggerating each
//! frame's difference from the clip's temporal mean:
//! - Separable Gaussian blur, box downsample and Laplacian pyramid kernels
//! - A GPU backend running WGSL compute kernels through wgpu
//! - A CPU backend running the same arithmetic on the host
//! - A stage-by-stage pipeline and a batch orchestrator with progress

pub mod backend;
pub mod batch;
pub mod cpu;
pub mod gpu_backend;
pub mod kernels;
pub mod mean;
pub mod pipeline;
pub mod pyramid;

pub use backend::{BackendProvider, CpuBackend, CpuProvider, MagnifyBackend};
pub use batch::{magnify, magnify_with, BatchPhase, BatchProgress};
pub use cpu::FloatImage;
pub use gpu_backend::{GpuBackend, GpuProvider};
pub use kernels::{Kernel, KernelSet};
pub use mean::TemporalMean;
pub use pipeline::{MagnificationPipeline, PipelineState};
pub use pyramid::{level_sizes, Pyramid, PyramidLevel};
