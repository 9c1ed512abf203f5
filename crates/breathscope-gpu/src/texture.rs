//! GPU texture management.

use crate::buffer::{ReadbackLayout, StagedReadback};
use crate::context::GpuContext;
use crate::usage::{BufferUsageSet, TextureFormat, TextureUsage, TextureUsageSet};
use breathscope_core::{Frame, MagnifyError, Result};

/// A 2-D GPU texture. Dimensions and format are fixed at creation.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsageSet,
}

impl GpuTexture {
    /// Memory usage estimate in bytes.
    pub fn memory_size(&self) -> usize {
        (self.width * self.height) as usize * self.format.bytes_per_pixel() as usize
    }

    /// Tightly packed row pitch in bytes.
    pub fn row_pitch(&self) -> u32 {
        self.width * self.format.bytes_per_pixel()
    }

    /// Free the device memory now instead of at drop.
    pub fn destroy(&self) {
        self.texture.destroy();
    }

    fn copy_extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }
}

/// Readback layout for a texture, with rows padded to the copy alignment.
pub fn readback_layout(width: u32, height: u32, format: TextureFormat) -> ReadbackLayout {
    let row_bytes = width * format.bytes_per_pixel();
    let padded = row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
    ReadbackLayout {
        rows: height,
        row_bytes: row_bytes as usize,
        padded_row_bytes: padded as usize,
    }
}

impl GpuContext {
    /// Create a texture. Fails with `AllocationFailed` on zero or
    /// over-limit dimensions and when the device rejects it.
    pub fn create_texture(
        &self,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsageSet,
    ) -> Result<GpuTexture> {
        self.ensure_ready()?;
        let max = self.device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(MagnifyError::AllocationFailed(format!(
                "texture `{label}` is {width}x{height}, device allows 1..={max}"
            )));
        }

        let (texture, err) = self.scoped(|| {
            self.device.create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: format.to_wgpu(),
                usage: usage.to_wgpu(),
                view_formats: &[],
            })
        });
        if let Some(err) = err {
            return Err(MagnifyError::AllocationFailed(format!(
                "texture `{label}`: {err}"
            )));
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(GpuTexture {
            texture,
            view,
            width,
            height,
            format,
            usage,
        })
    }

    /// Enqueue a host-to-device copy of tightly packed texel data
    /// (row pitch = `width * bytes_per_pixel`).
    pub fn upload_texture(&self, texture: &GpuTexture, bytes: &[u8]) -> Result<()> {
        self.ensure_ready()?;
        if !texture.usage.contains(TextureUsage::CopyDst) {
            return Err(MagnifyError::InvalidInput(
                "upload target texture lacks CopyDst usage".into(),
            ));
        }
        let expected = texture.row_pitch() as usize * texture.height as usize;
        if bytes.len() != expected {
            return Err(MagnifyError::InvalidInput(format!(
                "texture upload is {} bytes, expected {} for {}x{}",
                bytes.len(),
                expected,
                texture.width,
                texture.height
            )));
        }

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytes,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(texture.row_pitch()),
                rows_per_image: Some(texture.height),
            },
            texture.copy_extent(),
        );

        Ok(())
    }

    /// Upload a frame into an RGBA8 texture of the same size.
    pub fn upload_frame(&self, texture: &GpuTexture, frame: &Frame) -> Result<()> {
        if texture.format != TextureFormat::Rgba8 {
            return Err(MagnifyError::InvalidInput(
                "frames can only be uploaded to RGBA8 textures".into(),
            ));
        }
        if frame.dimensions() != (texture.width, texture.height) {
            return Err(MagnifyError::InvalidInput(format!(
                "frame size {}x{} doesn't match texture size {}x{}",
                frame.width(),
                frame.height(),
                texture.width,
                texture.height
            )));
        }
        self.upload_texture(texture, frame.data())
    }

    /// Record a copy of `texture` into a padded staging buffer. Call
    /// [`StagedReadback::map`] with the index `submit` returns for the
    /// encoder.
    pub fn begin_texture_readback(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        texture: &GpuTexture,
    ) -> Result<StagedReadback> {
        if !texture.usage.contains(TextureUsage::CopySrc) {
            return Err(MagnifyError::InvalidInput(
                "readback source texture lacks CopySrc usage".into(),
            ));
        }
        let layout = readback_layout(texture.width, texture.height, texture.format);
        let staging = self.create_buffer(
            "texture readback staging",
            layout.staging_size(),
            BufferUsageSet::STAGING,
        )?;

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &texture.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging.buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(layout.padded_row_bytes as u32),
                    rows_per_image: Some(texture.height),
                },
            },
            texture.copy_extent(),
        );

        Ok(StagedReadback::new(staging, layout))
    }

    /// Read a whole texture back to tightly packed host bytes.
    pub async fn download_texture(&self, texture: &GpuTexture) -> Result<Vec<u8>> {
        let mut encoder = self.create_encoder("texture readback");
        let staged = self.begin_texture_readback(&mut encoder, texture)?;
        let submission = self.submit(encoder)?;
        staged.map(submission).finish(self).await
    }
}
