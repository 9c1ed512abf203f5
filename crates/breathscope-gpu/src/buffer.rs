//! GPU buffers and device-to-host readback.

use crate::context::GpuContext;
use crate::usage::{BufferUsage, BufferUsageSet};
use breathscope_core::{MagnifyError, Result};
use tokio::sync::oneshot;
use tracing::debug;

/// A GPU buffer with its declared capabilities.
pub struct GpuBuffer {
    pub buffer: wgpu::Buffer,
    pub size: u64,
    pub usage: BufferUsageSet,
}

impl GpuBuffer {
    /// Free the device memory now instead of at drop.
    pub fn destroy(&self) {
        self.buffer.destroy();
    }
}

impl GpuContext {
    /// Create a buffer of `size_bytes` with the given usage set.
    ///
    /// Fails with `AllocationFailed` on zero size, on sizes above the device
    /// limit, or when the device rejects the allocation.
    pub fn create_buffer(
        &self,
        label: &str,
        size_bytes: u64,
        usage: BufferUsageSet,
    ) -> Result<GpuBuffer> {
        self.ensure_ready()?;
        if size_bytes == 0 {
            return Err(MagnifyError::AllocationFailed(format!(
                "buffer `{label}` has zero size"
            )));
        }
        let max = self.device.limits().max_buffer_size;
        if size_bytes > max {
            return Err(MagnifyError::AllocationFailed(format!(
                "buffer `{label}` is {size_bytes} bytes, device limit is {max}"
            )));
        }
        // Buffer sizes must be a multiple of COPY_BUFFER_ALIGNMENT to be mappable.
        let padded = size_bytes.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);

        let (buffer, err) = self.scoped(|| {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: padded,
                usage: usage.to_wgpu(),
                mapped_at_creation: false,
            })
        });
        if let Some(err) = err {
            return Err(MagnifyError::AllocationFailed(format!("buffer `{label}`: {err}")));
        }

        Ok(GpuBuffer {
            buffer,
            size: size_bytes,
            usage,
        })
    }

    /// Enqueue a host-to-device copy. Returns immediately; the data is
    /// visible to the next submission that reads the buffer.
    pub fn upload_buffer(&self, buffer: &GpuBuffer, bytes: &[u8]) -> Result<()> {
        self.ensure_ready()?;
        if !buffer.usage.contains(BufferUsage::CopyDst) {
            return Err(MagnifyError::InvalidInput(
                "upload target buffer lacks CopyDst usage".into(),
            ));
        }
        if bytes.len() as u64 > buffer.size {
            return Err(MagnifyError::InvalidInput(format!(
                "upload of {} bytes overflows {}-byte buffer",
                bytes.len(),
                buffer.size
            )));
        }
        if bytes.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(MagnifyError::InvalidInput(format!(
                "upload length {} is not a multiple of {}",
                bytes.len(),
                wgpu::COPY_BUFFER_ALIGNMENT
            )));
        }
        self.queue.write_buffer(&buffer.buffer, 0, bytes);
        Ok(())
    }

    /// Upload a plain-old-data value, typically a uniform block.
    pub fn upload_pod<T: bytemuck::Pod>(&self, buffer: &GpuBuffer, value: &T) -> Result<()> {
        self.upload_buffer(buffer, bytemuck::bytes_of(value))
    }

    /// Read `size_bytes` from the start of `buffer` back to the host.
    ///
    /// Allocates a staging buffer, copies on the device, maps it and copies
    /// the bytes out. The staging buffer is destroyed before returning.
    pub async fn download_buffer(&self, buffer: &GpuBuffer, size_bytes: u64) -> Result<Vec<u8>> {
        self.begin_buffer_readback(buffer, size_bytes)?
            .finish(self)
            .await
    }

    /// Record and submit the staging copy for a buffer readback without
    /// waiting for it.
    pub fn begin_buffer_readback(
        &self,
        buffer: &GpuBuffer,
        size_bytes: u64,
    ) -> Result<PendingReadback> {
        if !buffer.usage.contains(BufferUsage::CopySrc) {
            return Err(MagnifyError::InvalidInput(
                "readback source buffer lacks CopySrc usage".into(),
            ));
        }
        if size_bytes > buffer.size {
            return Err(MagnifyError::InvalidInput(format!(
                "readback of {} bytes exceeds {}-byte buffer",
                size_bytes, buffer.size
            )));
        }
        let copy_size = size_bytes.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let staging = self.create_buffer("readback staging", copy_size, BufferUsageSet::STAGING)?;

        let mut encoder = self.create_encoder("buffer readback");
        encoder.copy_buffer_to_buffer(&buffer.buffer, 0, &staging.buffer, 0, copy_size);
        let submission = self.submit(encoder)?;

        let layout = ReadbackLayout {
            rows: 1,
            row_bytes: size_bytes as usize,
            padded_row_bytes: copy_size as usize,
        };
        Ok(StagedReadback::new(staging, layout).map(submission))
    }
}

/// Shape of the data inside a staging buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadbackLayout {
    pub rows: u32,
    /// Meaningful bytes per row.
    pub row_bytes: usize,
    /// Bytes per row in the staging buffer, including alignment padding.
    pub padded_row_bytes: usize,
}

impl ReadbackLayout {
    pub fn staging_size(&self) -> u64 {
        self.padded_row_bytes as u64 * self.rows as u64
    }

    /// Copy rows out of `mapped`, dropping the padding.
    pub fn unpad(&self, mapped: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.row_bytes * self.rows as usize);
        for row in mapped.chunks(self.padded_row_bytes).take(self.rows as usize) {
            out.extend_from_slice(&row[..self.row_bytes]);
        }
        out
    }
}

/// A staging copy that has been recorded but not yet submitted.
///
/// The staging buffer may only be mapped after the submission that
/// writes it, so [`StagedReadback::map`] takes that submission's index.
pub struct StagedReadback {
    staging: GpuBuffer,
    layout: ReadbackLayout,
}

impl StagedReadback {
    pub(crate) fn new(staging: GpuBuffer, layout: ReadbackLayout) -> Self {
        Self { staging, layout }
    }

    pub fn map(self, submission: wgpu::SubmissionIndex) -> PendingReadback {
        let (tx, rx) = oneshot::channel();
        self.staging
            .buffer
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                // Receiver gone means the batch was abandoned.
                let _ = tx.send(result);
            });
        PendingReadback {
            staging: self.staging,
            layout: self.layout,
            submission,
            mapped: rx,
        }
    }
}

/// A submitted staging copy with a map request outstanding.
pub struct PendingReadback {
    staging: GpuBuffer,
    layout: ReadbackLayout,
    submission: wgpu::SubmissionIndex,
    mapped: oneshot::Receiver<std::result::Result<(), wgpu::BufferAsyncError>>,
}

impl PendingReadback {
    /// Wait for this readback's submission, copy the data out, unmap and
    /// destroy the staging buffer. Later submissions are not waited on.
    pub async fn finish(self, ctx: &GpuContext) -> Result<Vec<u8>> {
        ctx.wait_for_submission(self.submission).await?;
        let mapped = self
            .mapped
            .await
            .map_err(|_| MagnifyError::ReadbackFailed("map callback dropped".into()))?;
        if let Err(e) = mapped {
            self.staging.destroy();
            return Err(MagnifyError::ReadbackFailed(e.to_string()));
        }

        let data = {
            let view = self.staging.buffer.slice(..).get_mapped_range();
            self.layout.unpad(&view)
        };
        self.staging.buffer.unmap();
        self.staging.destroy();
        debug!(bytes = data.len(), "Readback complete");
        Ok(data)
    }
}
