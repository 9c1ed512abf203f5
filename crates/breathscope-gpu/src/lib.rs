//! Breathscope GPU - wgpu device, resources and compute pipelines
//!
//! Every call takes an explicit [`GpuContext`]; nothing here holds a global
//! device.

pub mod buffer;
pub mod context;
pub mod scratch_pool;
pub mod shader;
pub mod texture;
pub mod usage;

pub use buffer::{GpuBuffer, PendingReadback, ReadbackLayout, StagedReadback};
pub use context::{probe_capability, probe_capability_with, ContextStatus, GpuContext};
pub use scratch_pool::ScratchPool;
pub use shader::{
    dispatch_2d, BindGroupLayout, BindingKind, BindingResource, ComputePipeline, LayoutEntry,
    ShaderModule,
};
pub use texture::{readback_layout, GpuTexture};
pub use usage::{BufferUsage, BufferUsageSet, TextureFormat, TextureUsage, TextureUsageSet};
