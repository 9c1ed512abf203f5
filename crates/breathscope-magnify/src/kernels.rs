//! Compiled filter kernels.
//!
//! Two WGSL modules cover every kernel: `filter.wgsl` for single-input
//! passes and `combine.wgsl` for two-input passes. The combine module is
//! compiled once per output format.

use breathscope_core::Result;
use breathscope_gpu::{
    BindGroupLayout, BindingKind, ComputePipeline, GpuContext, LayoutEntry, TextureFormat,
};
use bytemuck::{Pod, Zeroable};
use tracing::info;

const FILTER_WGSL: &str = include_str!("shaders/filter.wgsl");
const COMBINE_WGSL: &str = include_str!("shaders/combine.wgsl");

/// Format of every kernel intermediate.
pub const INTERMEDIATE_FORMAT: TextureFormat = TextureFormat::Rgba16F;

/// Uniform block shared by the combine kernels.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GainUniform {
    pub gain: f32,
    _pad: [f32; 3],
}

impl GainUniform {
    pub fn new(gain: f32) -> Self {
        Self {
            gain,
            _pad: [0.0; 3],
        }
    }
}

/// Combine-module source with the storage format filled in.
pub fn combine_source(format: TextureFormat) -> String {
    COMBINE_WGSL.replace("{{OUT_FORMAT}}", format.wgsl_name())
}

fn combine_entries(format: TextureFormat) -> [LayoutEntry; 4] {
    [
        LayoutEntry::new(0, BindingKind::SampledTexture),
        LayoutEntry::new(1, BindingKind::SampledTexture),
        LayoutEntry::new(2, BindingKind::StorageTexture { format }),
        LayoutEntry::new(3, BindingKind::UniformBuffer),
    ]
}

/// Names of the compiled entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    BlurX,
    BlurY,
    Downsample,
    SubtractMean,
    Laplacian,
    BandAmplify,
    Reconstruct,
    Amplify,
    ReconstructOutput,
}

/// Every pipeline the magnification backends dispatch, built once per
/// context.
pub struct KernelSet {
    /// `src` sampled, `dst` intermediate.
    pub filter_layout: BindGroupLayout,
    /// `a`, `b` sampled, `dst` intermediate, gain uniform.
    pub combine_layout: BindGroupLayout,
    /// As `combine_layout` with an RGBA8 destination.
    pub output_layout: BindGroupLayout,

    pub blur_x: ComputePipeline,
    pub blur_y: ComputePipeline,
    pub downsample: ComputePipeline,

    pub subtract_mean: ComputePipeline,
    pub laplacian: ComputePipeline,
    pub band_amplify: ComputePipeline,
    pub reconstruct: ComputePipeline,

    pub amplify: ComputePipeline,
    pub reconstruct_output: ComputePipeline,
}

impl KernelSet {
    pub fn build(ctx: &GpuContext) -> Result<Self> {
        let filter = ctx.compile_shader("filter", FILTER_WGSL)?;
        let combine = ctx.compile_shader("combine", &combine_source(INTERMEDIATE_FORMAT))?;
        let output = ctx.compile_shader("combine_rgba8", &combine_source(TextureFormat::Rgba8))?;

        let filter_layout = ctx.create_bind_group_layout(
            "filter",
            &[
                LayoutEntry::new(0, BindingKind::SampledTexture),
                LayoutEntry::new(
                    1,
                    BindingKind::StorageTexture {
                        format: INTERMEDIATE_FORMAT,
                    },
                ),
            ],
        )?;
        let combine_layout =
            ctx.create_bind_group_layout("combine", &combine_entries(INTERMEDIATE_FORMAT))?;
        let output_layout =
            ctx.create_bind_group_layout("combine_rgba8", &combine_entries(TextureFormat::Rgba8))?;

        let set = Self {
            blur_x: ctx.create_pipeline(&filter, "blur_x", &filter_layout)?,
            blur_y: ctx.create_pipeline(&filter, "blur_y", &filter_layout)?,
            downsample: ctx.create_pipeline(&filter, "downsample", &filter_layout)?,
            subtract_mean: ctx.create_pipeline(&combine, "subtract_mean", &combine_layout)?,
            laplacian: ctx.create_pipeline(&combine, "laplacian", &combine_layout)?,
            band_amplify: ctx.create_pipeline(&combine, "band_amplify", &combine_layout)?,
            reconstruct: ctx.create_pipeline(&combine, "reconstruct", &combine_layout)?,
            amplify: ctx.create_pipeline(&output, "amplify", &output_layout)?,
            reconstruct_output: ctx.create_pipeline(&output, "reconstruct", &output_layout)?,
            filter_layout,
            combine_layout,
            output_layout,
        };
        info!("Magnification kernels compiled");
        Ok(set)
    }

    pub fn pipeline(&self, kernel: Kernel) -> &ComputePipeline {
        match kernel {
            Kernel::BlurX => &self.blur_x,
            Kernel::BlurY => &self.blur_y,
            Kernel::Downsample => &self.downsample,
            Kernel::SubtractMean => &self.subtract_mean,
            Kernel::Laplacian => &self.laplacian,
            Kernel::BandAmplify => &self.band_amplify,
            Kernel::Reconstruct => &self.reconstruct,
            Kernel::Amplify => &self.amplify,
            Kernel::ReconstructOutput => &self.reconstruct_output,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_source_substitutes_format() {
        let src = combine_source(TextureFormat::Rgba8);
        assert!(src.contains("texture_storage_2d<rgba8unorm, write>"));
        assert!(!src.contains("{{OUT_FORMAT}}"));
        assert!(combine_source(INTERMEDIATE_FORMAT).contains("rgba16float"));
    }

    #[test]
    fn test_gain_uniform_is_16_bytes() {
        assert_eq!(std::mem::size_of::<GainUniform>(), 16);
        let uniform = GainUniform::new(2.0);
        let bytes = bytemuck::bytes_of(&uniform);
        assert_eq!(&bytes[..4], &2.0f32.to_ne_bytes());
    }

    #[test]
    fn test_filter_taps_match_constants() {
        use breathscope_core::kernel::GAUSSIAN_TAPS;
        for tap in GAUSSIAN_TAPS {
            assert!(FILTER_WGSL.contains(&format!("{tap}")));
        }
    }

    #[test]
    fn test_kernels_compile() {
        let Ok(ctx) = GpuContext::acquire_blocking(&Default::default()) else {
            return;
        };
        assert!(KernelSet::build(&ctx).is_ok());
    }
}
