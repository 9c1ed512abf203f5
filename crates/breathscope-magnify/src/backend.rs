//! Backend seam for the magnification pipeline.
//!
//! The pipeline drives a [`MagnifyBackend`]; the GPU backend dispatches the
//! WGSL kernels and [`CpuBackend`] runs the reference kernels on the host.

use crate::cpu::{self, FloatImage};
use crate::pyramid::{self, Pyramid};
use breathscope_core::{Frame, MagnificationParams, MagnifyError, Result};
use std::future::Future;
use tracing::debug;

/// One magnification batch on some compute device.
///
/// Calls arrive in the order `prepare`, `upload_mean`, `submit_frame` for
/// every frame, `collect`. `release` may come at any point and is final.
pub trait MagnifyBackend {
    fn name(&self) -> &'static str;

    /// Allocate per-batch resources for `width x height` frames.
    fn prepare(&mut self, width: u32, height: u32, params: &MagnificationParams) -> Result<()>;

    /// Make the temporal mean available to every later frame.
    fn upload_mean(&mut self, mean: &Frame) -> Result<()>;

    /// Enqueue frame `index`. May return before the frame is processed.
    fn submit_frame(&mut self, index: usize, frame: &Frame)
        -> impl Future<Output = Result<()>>;

    /// Wait for every submitted frame. Results may come back in any order.
    fn collect(&mut self) -> impl Future<Output = Result<Vec<(usize, Vec<u8>)>>>;

    /// Free device resources. Idempotent.
    fn release(&mut self);
}

/// Creates a backend for one batch.
pub trait BackendProvider {
    type Backend: MagnifyBackend;

    fn acquire(&self) -> impl Future<Output = Result<Self::Backend>>;
}

enum CpuMean {
    Single(FloatImage),
    Pyramid(Vec<FloatImage>),
}

/// Host implementation of [`MagnifyBackend`] using the reference kernels.
#[derive(Default)]
pub struct CpuBackend {
    shape: Option<(u32, u32)>,
    params: MagnificationParams,
    mean: Option<CpuMean>,
    outputs: Vec<(usize, Vec<u8>)>,
    released: bool,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn ensure_live(&self) -> Result<()> {
        if self.released {
            Err(MagnifyError::ContextReleased)
        } else {
            Ok(())
        }
    }

    fn check_shape(&self, frame: &Frame) -> Result<()> {
        match self.shape {
            Some(shape) if shape == frame.dimensions() => Ok(()),
            Some((w, h)) => Err(MagnifyError::InvalidInput(format!(
                "frame is {}x{}, batch was prepared for {w}x{h}",
                frame.width(),
                frame.height()
            ))),
            None => Err(MagnifyError::InvalidInput("backend not prepared".into())),
        }
    }
}

impl MagnifyBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn prepare(&mut self, width: u32, height: u32, params: &MagnificationParams) -> Result<()> {
        self.ensure_live()?;
        self.shape = Some((width, height));
        self.params = params.clone();
        self.mean = None;
        self.outputs.clear();
        Ok(())
    }

    fn upload_mean(&mut self, mean: &Frame) -> Result<()> {
        self.ensure_live()?;
        self.check_shape(mean)?;
        let image = FloatImage::from_frame(mean);
        self.mean = Some(if self.params.is_pyramid() {
            let pyramid = Pyramid::decompose(&image, self.params.pyramid_levels);
            CpuMean::Pyramid(pyramid.levels.into_iter().map(|l| l.laplacian).collect())
        } else if self.params.blur {
            CpuMean::Single(cpu::blur(&image))
        } else {
            CpuMean::Single(image)
        });
        Ok(())
    }

    async fn submit_frame(&mut self, index: usize, frame: &Frame) -> Result<()> {
        self.ensure_live()?;
        self.check_shape(frame)?;
        let image = FloatImage::from_frame(frame);
        let out = match &self.mean {
            Some(CpuMean::Single(mean)) => {
                cpu::magnify_single(&image, mean, self.params.gain, self.params.blur)
            }
            Some(CpuMean::Pyramid(bands)) => {
                pyramid::magnify_pyramid(&image, bands, |k| self.params.gain_for_level(k))
            }
            None => return Err(MagnifyError::InvalidInput("mean not uploaded".into())),
        };
        self.outputs.push((index, out.to_rgba8()));
        Ok(())
    }

    async fn collect(&mut self) -> Result<Vec<(usize, Vec<u8>)>> {
        self.ensure_live()?;
        debug!(frames = self.outputs.len(), "CPU batch collected");
        Ok(std::mem::take(&mut self.outputs))
    }

    fn release(&mut self) {
        self.released = true;
        self.mean = None;
        self.outputs.clear();
    }
}

/// Provider for [`CpuBackend`]. Always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuProvider;

impl BackendProvider for CpuProvider {
    type Backend = CpuBackend;

    async fn acquire(&self) -> Result<CpuBackend> {
        Ok(CpuBackend::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cpu_backend_requires_mean() {
        let mut backend = CpuBackend::new();
        let frame = Frame::solid(4, 4, [10, 20, 30, 255]).unwrap();
        backend
            .prepare(4, 4, &MagnificationParams::single_scale(5.0, false))
            .unwrap();
        assert!(backend.submit_frame(0, &frame).await.is_err());
    }

    #[tokio::test]
    async fn test_cpu_backend_static_batch() {
        let mut backend = CpuProvider.acquire().await.unwrap();
        let frame = Frame::test_pattern(8, 8).unwrap();
        backend
            .prepare(8, 8, &MagnificationParams::single_scale(30.0, true))
            .unwrap();
        backend.upload_mean(&frame).unwrap();
        backend.submit_frame(0, &frame).await.unwrap();
        let out = backend.collect().await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, 0);
        assert_eq!(out[0].1, frame.data());
    }

    #[tokio::test]
    async fn test_released_backend_rejects_work() {
        let mut backend = CpuBackend::new();
        backend.release();
        backend.release();
        assert!(backend.is_released());
        let err = backend
            .prepare(2, 2, &MagnificationParams::default())
            .err()
            .unwrap();
        assert!(matches!(err, MagnifyError::ContextReleased));
    }
}
