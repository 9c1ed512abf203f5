//! wgpu implementation of the magnification backend.
//!
//! A batch is compiled into two dispatch lists: the mean pass, run once
//! after the mean is uploaded, and the frame pass, run for every frame.
//! One scratch set serves the whole batch. Queue order guarantees that a
//! frame's reads of the shared scratch finish before the next frame's
//! upload overwrites them.

use crate::backend::{BackendProvider, MagnifyBackend};
use crate::kernels::{GainUniform, Kernel, KernelSet, INTERMEDIATE_FORMAT};
use crate::pyramid::level_sizes;
use breathscope_core::{
    DeviceConfig, Frame, MagnificationParams, MagnifyConfig, MagnifyError, Result,
};
use breathscope_gpu::{
    dispatch_2d, BindingResource, BufferUsageSet, GpuBuffer, GpuContext, GpuTexture,
    PendingReadback, ScratchPool, TextureFormat, TextureUsageSet,
};
use tracing::{debug, warn};

/// Byte budget for recycled scratch textures.
pub const SCRATCH_POOL_BUDGET: usize = 256 * 1024 * 1024;

struct Dispatch {
    kernel: Kernel,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

struct BatchResources {
    input: GpuTexture,
    mean: GpuTexture,
    output: GpuTexture,
    scratch: Vec<GpuTexture>,
    gains: Vec<GpuBuffer>,
    mean_pass: Vec<Dispatch>,
    frame_pass: Vec<Dispatch>,
}

/// Records dispatches against the batch's textures.
struct PassBuilder<'a> {
    ctx: &'a GpuContext,
    kernels: &'a KernelSet,
}

impl PassBuilder<'_> {
    fn filter(&self, kernel: Kernel, src: &GpuTexture, dst: &GpuTexture) -> Result<Dispatch> {
        let bind_group = self.ctx.create_bind_group(
            &self.kernels.filter_layout,
            &[
                (0, BindingResource::Texture(src)),
                (1, BindingResource::Texture(dst)),
            ],
        )?;
        Ok(Dispatch {
            kernel,
            bind_group,
            width: dst.width,
            height: dst.height,
        })
    }

    fn combine(
        &self,
        kernel: Kernel,
        a: &GpuTexture,
        b: &GpuTexture,
        dst: &GpuTexture,
        gain: &GpuBuffer,
    ) -> Result<Dispatch> {
        let layout = if dst.format == TextureFormat::Rgba8 {
            &self.kernels.output_layout
        } else {
            &self.kernels.combine_layout
        };
        let bind_group = self.ctx.create_bind_group(
            layout,
            &[
                (0, BindingResource::Texture(a)),
                (1, BindingResource::Texture(b)),
                (2, BindingResource::Texture(dst)),
                (3, BindingResource::Buffer(gain)),
            ],
        )?;
        Ok(Dispatch {
            kernel,
            bind_group,
            width: dst.width,
            height: dst.height,
        })
    }
}

/// GPU magnification backend. Owns its context for the length of a batch.
pub struct GpuBackend {
    batch: Option<BatchResources>,
    pending: Vec<(usize, PendingReadback)>,
    completed: Vec<(usize, Vec<u8>)>,
    pool: ScratchPool,
    kernels: KernelSet,
    max_in_flight: usize,
    ctx: GpuContext,
}

impl GpuBackend {
    /// Compile the kernels on `ctx`. Compilation errors are fatal.
    pub fn new(ctx: GpuContext, max_in_flight: usize) -> Result<Self> {
        let kernels = KernelSet::build(&ctx)?;
        Ok(Self {
            batch: None,
            pending: Vec::new(),
            completed: Vec::new(),
            pool: ScratchPool::new(SCRATCH_POOL_BUDGET),
            kernels,
            max_in_flight: max_in_flight.max(1),
            ctx,
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    /// Scratch textures allocated since this backend was created.
    pub fn scratch_created(&self) -> usize {
        self.pool.created_count()
    }

    /// Frames submitted but not yet read back.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    fn scratch(&mut self, label: &str, size: (u32, u32)) -> Result<GpuTexture> {
        self.pool.acquire(
            &self.ctx,
            label,
            size.0,
            size.1,
            INTERMEDIATE_FORMAT,
            TextureUsageSet::SCRATCH,
        )
    }

    fn rgba8(
        &mut self,
        label: &str,
        size: (u32, u32),
        usage: TextureUsageSet,
    ) -> Result<GpuTexture> {
        self.pool.acquire(&self.ctx, label, size.0, size.1, TextureFormat::Rgba8, usage)
    }

    fn gain_buffer(&self, gain: f32) -> Result<GpuBuffer> {
        let buffer = self.ctx.create_buffer(
            "gain",
            std::mem::size_of::<GainUniform>() as u64,
            BufferUsageSet::UNIFORM,
        )?;
        self.ctx.upload_pod(&buffer, &GainUniform::new(gain))?;
        Ok(buffer)
    }

    fn build_batch(
        &mut self,
        width: u32,
        height: u32,
        params: &MagnificationParams,
    ) -> Result<BatchResources> {
        let size = (width, height);
        let input = self.rgba8("frame", size, TextureUsageSet::INPUT)?;
        let mean = self.rgba8("mean", size, TextureUsageSet::INPUT)?;
        let output = self.rgba8("output", size, TextureUsageSet::OUTPUT)?;

        let sizes = level_sizes(width, height, params.pyramid_levels);
        if params.is_pyramid() && sizes.len() < 2 {
            warn!(width, height, "Frame too small for a pyramid, passing frames through");
            let passthrough = MagnificationParams::single_scale(0.0, false);
            return self.build_single(input, mean, output, &passthrough);
        }
        if params.is_pyramid() {
            self.build_pyramid(input, mean, output, params, &sizes)
        } else {
            self.build_single(input, mean, output, params)
        }
    }

    fn build_single(
        &mut self,
        input: GpuTexture,
        mean: GpuTexture,
        output: GpuTexture,
        params: &MagnificationParams,
    ) -> Result<BatchResources> {
        let size = (input.width, input.height);
        let gain = self.gain_buffer(params.gain)?;
        let motion = self.scratch("motion", size)?;
        let blur_set = if params.blur {
            Some((
                self.scratch("blur_tmp", size)?,
                self.scratch("blurred", size)?,
                self.scratch("mean_blurred", size)?,
            ))
        } else {
            None
        };

        let mut scratch = Vec::new();
        let b = PassBuilder {
            ctx: &self.ctx,
            kernels: &self.kernels,
        };
        let (mean_pass, frame_pass) = if let Some((tmp, blurred, mean_blurred)) = blur_set {
            let mean_pass = vec![
                b.filter(Kernel::BlurX, &mean, &tmp)?,
                b.filter(Kernel::BlurY, &tmp, &mean_blurred)?,
            ];
            let frame_pass = vec![
                b.filter(Kernel::BlurX, &input, &tmp)?,
                b.filter(Kernel::BlurY, &tmp, &blurred)?,
                b.combine(Kernel::SubtractMean, &blurred, &mean_blurred, &motion, &gain)?,
                b.combine(Kernel::Amplify, &input, &motion, &output, &gain)?,
            ];
            scratch.extend([tmp, blurred, mean_blurred]);
            (mean_pass, frame_pass)
        } else {
            let frame_pass = vec![
                b.combine(Kernel::SubtractMean, &input, &mean, &motion, &gain)?,
                b.combine(Kernel::Amplify, &input, &motion, &output, &gain)?,
            ];
            (Vec::new(), frame_pass)
        };
        scratch.push(motion);

        Ok(BatchResources {
            input,
            mean,
            output,
            scratch,
            gains: vec![gain],
            mean_pass,
            frame_pass,
        })
    }

    fn build_pyramid(
        &mut self,
        input: GpuTexture,
        mean: GpuTexture,
        output: GpuTexture,
        params: &MagnificationParams,
        sizes: &[(u32, u32)],
    ) -> Result<BatchResources> {
        let n = sizes.len() - 1;

        // gaussians[k] holds G(k + 1); G(0) is the input or mean texture.
        let mut gaussians = Vec::with_capacity(n);
        let mut tmp = Vec::with_capacity(n);
        let mut blurred = Vec::with_capacity(n);
        let mut laps = Vec::with_capacity(n);
        let mut mean_laps = Vec::with_capacity(n);
        let mut bands = Vec::with_capacity(n);
        let mut recon = Vec::with_capacity(n);
        let mut gains = Vec::with_capacity(n);
        for k in 0..n {
            gaussians.push(self.scratch("gaussian", sizes[k + 1])?);
            tmp.push(self.scratch("blur_tmp", sizes[k])?);
            blurred.push(self.scratch("blurred", sizes[k])?);
            laps.push(self.scratch("laplacian", sizes[k])?);
            mean_laps.push(self.scratch("mean_laplacian", sizes[k])?);
            bands.push(self.scratch("band", sizes[k])?);
            if k > 0 {
                recon.push(self.scratch("reconstruct", sizes[k])?);
            }
            gains.push(self.gain_buffer(params.gain_for_level(k))?);
        }

        let b = PassBuilder {
            ctx: &self.ctx,
            kernels: &self.kernels,
        };
        let decompose = |base: &GpuTexture, targets: &[GpuTexture]| -> Result<Vec<Dispatch>> {
            let mut pass = Vec::with_capacity(4 * n);
            for k in 0..n {
                let fine = if k == 0 { base } else { &gaussians[k - 1] };
                pass.push(b.filter(Kernel::BlurX, fine, &tmp[k])?);
                pass.push(b.filter(Kernel::BlurY, &tmp[k], &blurred[k])?);
                pass.push(b.filter(Kernel::Downsample, &blurred[k], &gaussians[k])?);
                pass.push(b.combine(
                    Kernel::Laplacian,
                    fine,
                    &gaussians[k],
                    &targets[k],
                    &gains[k],
                )?);
            }
            Ok(pass)
        };
        let mean_pass = decompose(&mean, &mean_laps)?;
        let mut frame_pass = decompose(&input, &laps)?;

        for k in 0..n {
            frame_pass.push(b.combine(
                Kernel::BandAmplify,
                &laps[k],
                &mean_laps[k],
                &bands[k],
                &gains[k],
            )?);
        }
        for k in (0..n).rev() {
            // recon[k - 1] holds R(k); R(n) is the frame's residual G(n).
            let coarse = if k == n - 1 { &gaussians[n - 1] } else { &recon[k] };
            let dispatch = if k == 0 {
                b.combine(Kernel::ReconstructOutput, &bands[0], coarse, &output, &gains[0])?
            } else {
                b.combine(Kernel::Reconstruct, &bands[k], coarse, &recon[k - 1], &gains[k])?
            };
            frame_pass.push(dispatch);
        }

        debug!(levels = n, "Pyramid passes recorded");
        let scratch = [gaussians, tmp, blurred, laps, mean_laps, bands, recon]
            .into_iter()
            .flatten()
            .collect();
        Ok(BatchResources {
            input,
            mean,
            output,
            scratch,
            gains,
            mean_pass,
            frame_pass,
        })
    }

    fn encode(&self, encoder: &mut wgpu::CommandEncoder, pass: &[Dispatch]) {
        for d in pass {
            dispatch_2d(
                encoder,
                self.kernels.pipeline(d.kernel),
                &d.bind_group,
                d.width,
                d.height,
            );
        }
    }

    fn batch(&self) -> Result<&BatchResources> {
        self.batch
            .as_ref()
            .ok_or_else(|| MagnifyError::InvalidInput("backend not prepared".into()))
    }

    /// Finish every outstanding readback.
    async fn drain(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        for (index, readback) in pending {
            let bytes = readback.finish(&self.ctx).await?;
            self.completed.push((index, bytes));
        }
        Ok(())
    }

    /// Return the batch's textures to the pool and free its buffers.
    fn retire_batch(&mut self) {
        if let Some(batch) = self.batch.take() {
            for tex in [batch.input, batch.mean, batch.output]
                .into_iter()
                .chain(batch.scratch)
            {
                self.pool.release(tex);
            }
            for buffer in &batch.gains {
                buffer.destroy();
            }
        }
    }
}

impl MagnifyBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn prepare(&mut self, width: u32, height: u32, params: &MagnificationParams) -> Result<()> {
        self.ctx.ensure_ready()?;
        self.pending.clear();
        self.completed.clear();
        self.retire_batch();
        let batch = self.build_batch(width, height, params)?;
        debug!(
            width,
            height,
            scratch = batch.scratch.len(),
            frame_dispatches = batch.frame_pass.len(),
            "GPU batch prepared"
        );
        self.batch = Some(batch);
        Ok(())
    }

    fn upload_mean(&mut self, mean: &Frame) -> Result<()> {
        let batch = self.batch()?;
        self.ctx.upload_frame(&batch.mean, mean)?;
        if !batch.mean_pass.is_empty() {
            let mut encoder = self.ctx.create_encoder("mean pass");
            self.encode(&mut encoder, &batch.mean_pass);
            self.ctx.submit(encoder)?;
        }
        Ok(())
    }

    async fn submit_frame(&mut self, index: usize, frame: &Frame) -> Result<()> {
        if self.pending.len() >= self.max_in_flight {
            debug!(in_flight = self.pending.len(), "Draining readbacks");
            self.drain().await?;
        }

        let batch = self.batch()?;
        self.ctx.upload_frame(&batch.input, frame)?;
        let mut encoder = self.ctx.create_encoder("frame pass");
        self.encode(&mut encoder, &batch.frame_pass);
        let staged = self.ctx.begin_texture_readback(&mut encoder, &batch.output)?;
        let submission = self.ctx.submit(encoder)?;
        self.pending.push((index, staged.map(submission)));
        Ok(())
    }

    async fn collect(&mut self) -> Result<Vec<(usize, Vec<u8>)>> {
        self.drain().await?;
        // Faults raised by the device while the batch ran.
        self.ctx.ensure_ready()?;
        Ok(std::mem::take(&mut self.completed))
    }

    fn release(&mut self) {
        self.pending.clear();
        self.completed.clear();
        self.retire_batch();
        self.pool.clear();
        self.ctx.release();
    }
}

/// Acquires a [`GpuContext`] and compiles the kernels on it.
#[derive(Debug, Clone, Copy)]
pub struct GpuProvider {
    pub device: DeviceConfig,
    pub max_frames_in_flight: usize,
}

impl Default for GpuProvider {
    fn default() -> Self {
        Self::from_config(&MagnifyConfig::default())
    }
}

impl GpuProvider {
    pub fn from_config(config: &MagnifyConfig) -> Self {
        Self {
            device: config.device,
            max_frames_in_flight: config.max_frames_in_flight,
        }
    }
}

impl BackendProvider for GpuProvider {
    type Backend = GpuBackend;

    async fn acquire(&self) -> Result<GpuBackend> {
        let ctx = GpuContext::acquire_with(&self.device).await?;
        GpuBackend::new(ctx, self.max_frames_in_flight)
    }
}
