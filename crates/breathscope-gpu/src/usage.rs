//! Closed usage-capability sets and texture formats.
//!
//! Usage sets are validated when they are built, so a resource can never
//! be created with a combination the device would reject later.

use breathscope_core::{MagnifyError, Result};

/// Capabilities a buffer may be created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Storage,
    CopySrc,
    CopyDst,
    Uniform,
    MapRead,
}

impl BufferUsage {
    fn to_wgpu(self) -> wgpu::BufferUsages {
        match self {
            Self::Storage => wgpu::BufferUsages::STORAGE,
            Self::CopySrc => wgpu::BufferUsages::COPY_SRC,
            Self::CopyDst => wgpu::BufferUsages::COPY_DST,
            Self::Uniform => wgpu::BufferUsages::UNIFORM,
            Self::MapRead => wgpu::BufferUsages::MAP_READ,
        }
    }
}

/// A validated set of [`BufferUsage`] flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferUsageSet(wgpu::BufferUsages);

impl BufferUsageSet {
    /// Host-readable staging buffer for readback.
    pub const STAGING: Self =
        Self(wgpu::BufferUsages::MAP_READ.union(wgpu::BufferUsages::COPY_DST));
    /// Uniform parameters written from the host.
    pub const UNIFORM: Self = Self(wgpu::BufferUsages::UNIFORM.union(wgpu::BufferUsages::COPY_DST));
    /// Storage buffer that can be uploaded to and read back.
    pub const STORAGE: Self = Self(
        wgpu::BufferUsages::STORAGE
            .union(wgpu::BufferUsages::COPY_SRC)
            .union(wgpu::BufferUsages::COPY_DST),
    );

    pub fn new(usages: &[BufferUsage]) -> Result<Self> {
        let flags = usages
            .iter()
            .fold(wgpu::BufferUsages::empty(), |acc, u| acc | u.to_wgpu());
        if flags.is_empty() {
            return Err(MagnifyError::InvalidInput(
                "buffer usage set must not be empty".into(),
            ));
        }
        if flags.contains(wgpu::BufferUsages::MAP_READ)
            && !(flags - wgpu::BufferUsages::MAP_READ - wgpu::BufferUsages::COPY_DST).is_empty()
        {
            return Err(MagnifyError::InvalidInput(
                "MapRead buffers may only be combined with CopyDst".into(),
            ));
        }
        Ok(Self(flags))
    }

    pub fn contains(self, usage: BufferUsage) -> bool {
        self.0.contains(usage.to_wgpu())
    }

    pub fn to_wgpu(self) -> wgpu::BufferUsages {
        self.0
    }
}

/// Capabilities a texture may be created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    Storage,
    CopySrc,
    CopyDst,
    Sampled,
    RenderTarget,
}

impl TextureUsage {
    fn to_wgpu(self) -> wgpu::TextureUsages {
        match self {
            Self::Storage => wgpu::TextureUsages::STORAGE_BINDING,
            Self::CopySrc => wgpu::TextureUsages::COPY_SRC,
            Self::CopyDst => wgpu::TextureUsages::COPY_DST,
            Self::Sampled => wgpu::TextureUsages::TEXTURE_BINDING,
            Self::RenderTarget => wgpu::TextureUsages::RENDER_ATTACHMENT,
        }
    }
}

/// A validated set of [`TextureUsage`] flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureUsageSet(wgpu::TextureUsages);

impl TextureUsageSet {
    /// Frame uploaded from the host and read by kernels.
    pub const INPUT: Self =
        Self(wgpu::TextureUsages::TEXTURE_BINDING.union(wgpu::TextureUsages::COPY_DST));
    /// Kernel intermediate: written as storage, read as a sampled texture.
    pub const SCRATCH: Self = Self(
        wgpu::TextureUsages::STORAGE_BINDING
            .union(wgpu::TextureUsages::TEXTURE_BINDING)
            .union(wgpu::TextureUsages::COPY_SRC),
    );
    /// Final kernel output copied back to the host.
    pub const OUTPUT: Self =
        Self(wgpu::TextureUsages::STORAGE_BINDING.union(wgpu::TextureUsages::COPY_SRC));

    pub fn new(usages: &[TextureUsage]) -> Result<Self> {
        let flags = usages
            .iter()
            .fold(wgpu::TextureUsages::empty(), |acc, u| acc | u.to_wgpu());
        if flags.is_empty() {
            return Err(MagnifyError::InvalidInput(
                "texture usage set must not be empty".into(),
            ));
        }
        Ok(Self(flags))
    }

    pub fn contains(self, usage: TextureUsage) -> bool {
        self.0.contains(usage.to_wgpu())
    }

    pub fn to_wgpu(self) -> wgpu::TextureUsages {
        self.0
    }
}

/// Texture formats used by the magnification kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit unsigned-normalized RGBA; frames, mean and final output.
    Rgba8,
    R32F,
    Rg32F,
    /// Half-float RGBA; every kernel intermediate.
    Rgba16F,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgba8 | Self::R32F => 4,
            Self::Rg32F | Self::Rgba16F => 8,
        }
    }

    pub fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            Self::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            Self::R32F => wgpu::TextureFormat::R32Float,
            Self::Rg32F => wgpu::TextureFormat::Rg32Float,
            Self::Rgba16F => wgpu::TextureFormat::Rgba16Float,
        }
    }

    /// WGSL storage texel format name.
    pub fn wgsl_name(self) -> &'static str {
        match self {
            Self::Rgba8 => "rgba8unorm",
            Self::R32F => "r32float",
            Self::Rg32F => "rg32float",
            Self::Rgba16F => "rgba16float",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_set() {
        let staging = BufferUsageSet::new(&[BufferUsage::MapRead, BufferUsage::CopyDst]).unwrap();
        assert_eq!(staging, BufferUsageSet::STAGING);
        assert!(staging.contains(BufferUsage::MapRead));
        assert!(!staging.contains(BufferUsage::CopySrc));
    }

    #[test]
    fn test_map_read_exclusive() {
        let err = BufferUsageSet::new(&[BufferUsage::MapRead, BufferUsage::Storage]);
        assert!(err.is_err());
    }

    #[test]
    fn test_empty_sets_rejected() {
        assert!(BufferUsageSet::new(&[]).is_err());
        assert!(TextureUsageSet::new(&[]).is_err());
    }

    #[test]
    fn test_texture_presets() {
        assert!(TextureUsageSet::SCRATCH.contains(TextureUsage::Storage));
        assert!(TextureUsageSet::SCRATCH.contains(TextureUsage::Sampled));
        assert!(!TextureUsageSet::INPUT.contains(TextureUsage::Storage));
        assert!(TextureUsageSet::OUTPUT.contains(TextureUsage::CopySrc));
    }

    #[test]
    fn test_format_sizes() {
        assert_eq!(TextureFormat::Rgba8.bytes_per_pixel(), 4);
        assert_eq!(TextureFormat::Rgba16F.bytes_per_pixel(), 8);
        assert_eq!(TextureFormat::Rgba16F.wgsl_name(), "rgba16float");
        assert_eq!(TextureFormat::Rg32F.to_wgpu(), wgpu::TextureFormat::Rg32Float);
    }
}
