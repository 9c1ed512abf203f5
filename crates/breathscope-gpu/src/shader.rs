//! Shader compilation and compute-pipeline construction.
//!
//! Bind-group layouts are declared with closed [`BindingKind`] variants and
//! bind groups are checked against them when they are built, so a resource
//! with the wrong usage or format is rejected before any dispatch.

use crate::buffer::GpuBuffer;
use crate::context::GpuContext;
use crate::texture::GpuTexture;
use crate::usage::{BufferUsage, TextureFormat, TextureUsage};
use breathscope_core::{kernel, MagnifyError, Result};
use std::collections::HashSet;
use tracing::debug;

/// A compiled WGSL module.
pub struct ShaderModule {
    pub module: wgpu::ShaderModule,
    pub label: String,
}

/// Kind of resource a layout slot accepts. Visibility is always compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    StorageBuffer { read_only: bool },
    UniformBuffer,
    /// `texture_2d<f32>` read with `textureLoad`.
    SampledTexture,
    /// `texture_storage_2d<format, write>`.
    StorageTexture { format: TextureFormat },
}

impl BindingKind {
    fn to_wgpu(self) -> wgpu::BindingType {
        match self {
            Self::StorageBuffer { read_only } => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            Self::UniformBuffer => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            Self::SampledTexture => wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
            },
            Self::StorageTexture { format } => wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: format.to_wgpu(),
                view_dimension: wgpu::TextureViewDimension::D2,
            },
        }
    }
}

/// One slot of a bind-group layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutEntry {
    pub binding: u32,
    pub kind: BindingKind,
}

impl LayoutEntry {
    pub const fn new(binding: u32, kind: BindingKind) -> Self {
        Self { binding, kind }
    }
}

/// A bind-group layout together with the entries it was built from.
pub struct BindGroupLayout {
    pub layout: wgpu::BindGroupLayout,
    pub entries: Vec<LayoutEntry>,
    pub label: String,
}

/// A compute pipeline bound to one entry point and one layout.
pub struct ComputePipeline {
    pub pipeline: wgpu::ComputePipeline,
    pub entry_point: String,
}

/// A concrete resource for one binding slot.
#[derive(Clone, Copy)]
pub enum BindingResource<'a> {
    Buffer(&'a GpuBuffer),
    Texture(&'a GpuTexture),
}

impl<'a> BindingResource<'a> {
    fn check(&self, kind: BindingKind, binding: u32) -> Result<()> {
        let ok = match (kind, self) {
            (BindingKind::StorageBuffer { .. }, Self::Buffer(b)) => {
                b.usage.contains(BufferUsage::Storage)
            }
            (BindingKind::UniformBuffer, Self::Buffer(b)) => b.usage.contains(BufferUsage::Uniform),
            (BindingKind::SampledTexture, Self::Texture(t)) => {
                t.usage.contains(TextureUsage::Sampled)
            }
            (BindingKind::StorageTexture { format }, Self::Texture(t)) => {
                t.usage.contains(TextureUsage::Storage) && t.format == format
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(MagnifyError::InvalidInput(format!(
                "resource bound at {binding} does not satisfy {kind:?}"
            )))
        }
    }

    fn to_wgpu(self) -> wgpu::BindingResource<'a> {
        match self {
            Self::Buffer(b) => b.buffer.as_entire_binding(),
            Self::Texture(t) => wgpu::BindingResource::TextureView(&t.view),
        }
    }
}

impl GpuContext {
    /// Compile WGSL. Any diagnostic is fatal: a kernel that does not compile
    /// is a build defect, never a transient failure.
    pub fn compile_shader(&self, label: &str, source: &str) -> Result<ShaderModule> {
        self.ensure_ready()?;
        let (module, err) = self.scoped(|| {
            self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
        });
        if let Some(err) = err {
            return Err(MagnifyError::ShaderCompilationFailed {
                label: label.to_string(),
                message: err.to_string(),
                shader_source: source.to_string(),
            });
        }
        debug!(label, "Compiled shader");
        Ok(ShaderModule {
            module,
            label: label.to_string(),
        })
    }

    pub fn create_bind_group_layout(
        &self,
        label: &str,
        entries: &[LayoutEntry],
    ) -> Result<BindGroupLayout> {
        self.ensure_ready()?;
        let mut seen = HashSet::new();
        for entry in entries {
            if !seen.insert(entry.binding) {
                return Err(MagnifyError::InvalidInput(format!(
                    "layout `{label}` declares binding {} twice",
                    entry.binding
                )));
            }
        }

        let wgpu_entries: Vec<wgpu::BindGroupLayoutEntry> = entries
            .iter()
            .map(|e| wgpu::BindGroupLayoutEntry {
                binding: e.binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: e.kind.to_wgpu(),
                count: None,
            })
            .collect();

        let (layout, err) = self.scoped(|| {
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(label),
                    entries: &wgpu_entries,
                })
        });
        if let Some(err) = err {
            return Err(MagnifyError::Device(format!("layout `{label}`: {err}")));
        }

        Ok(BindGroupLayout {
            layout,
            entries: entries.to_vec(),
            label: label.to_string(),
        })
    }

    /// Bind `entry_point` of `shader` to `layout` as bind group 0.
    pub fn create_pipeline(
        &self,
        shader: &ShaderModule,
        entry_point: &str,
        layout: &BindGroupLayout,
    ) -> Result<ComputePipeline> {
        self.ensure_ready()?;
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&layout.label),
                bind_group_layouts: &[&layout.layout],
                push_constant_ranges: &[],
            });

        let (pipeline, err) = self.scoped(|| {
            self.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(entry_point),
                    layout: Some(&pipeline_layout),
                    module: &shader.module,
                    entry_point: Some(entry_point),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
        });
        // A layout mismatch between WGSL and the declared entries is a
        // shader defect like any other compile error.
        if let Some(err) = err {
            return Err(MagnifyError::ShaderCompilationFailed {
                label: format!("{}::{}", shader.label, entry_point),
                message: err.to_string(),
                shader_source: String::new(),
            });
        }

        Ok(ComputePipeline {
            pipeline,
            entry_point: entry_point.to_string(),
        })
    }

    /// Bind concrete resources to `layout`. Every declared slot must be
    /// bound exactly once with a resource of the declared kind.
    pub fn create_bind_group(
        &self,
        layout: &BindGroupLayout,
        resources: &[(u32, BindingResource<'_>)],
    ) -> Result<wgpu::BindGroup> {
        self.ensure_ready()?;
        if resources.len() != layout.entries.len() {
            return Err(MagnifyError::InvalidInput(format!(
                "layout `{}` has {} bindings, {} resources given",
                layout.label,
                layout.entries.len(),
                resources.len()
            )));
        }

        let mut entries = Vec::with_capacity(resources.len());
        for entry in &layout.entries {
            let (_, resource) = resources
                .iter()
                .find(|(binding, _)| *binding == entry.binding)
                .ok_or_else(|| {
                    MagnifyError::InvalidInput(format!(
                        "layout `{}` binding {} left unbound",
                        layout.label, entry.binding
                    ))
                })?;
            resource.check(entry.kind, entry.binding)?;
            entries.push(wgpu::BindGroupEntry {
                binding: entry.binding,
                resource: resource.to_wgpu(),
            });
        }

        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&layout.label),
            layout: &layout.layout,
            entries: &entries,
        }))
    }
}

/// Record one 2-D dispatch covering `width x height` pixels in 8x8 tiles.
pub fn dispatch_2d(
    encoder: &mut wgpu::CommandEncoder,
    pipeline: &ComputePipeline,
    bind_group: &wgpu::BindGroup,
    width: u32,
    height: u32,
) {
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(&pipeline.entry_point),
        timestamp_writes: None,
    });
    pass.set_pipeline(&pipeline.pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.dispatch_workgroups(
        kernel::workgroup_count(width),
        kernel::workgroup_count(height),
        1,
    );
}
