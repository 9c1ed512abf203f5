//! Batch orchestrator.
//!
//! Validates a frame sequence, acquires a backend, drives the pipeline and
//! releases the backend whether the batch succeeded or not.
//!
//! Progress is reported in two phases: ingest covers 0.0 to 0.5 and
//! magnification covers 0.5 to 1.0. The split is a display policy, not a
//! timing estimate.

use crate::backend::{BackendProvider, MagnifyBackend};
use crate::gpu_backend::GpuProvider;
use crate::pipeline::{MagnificationPipeline, PipelineState};
use breathscope_core::{Frame, MagnificationParams, MagnifyError, Result};
use std::time::Instant;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Share of the progress bar covered by per-frame validation.
const INGEST_FRAMES_WEIGHT: f32 = 0.45;
const INGEST_END: f32 = 0.5;
const SUBMIT_WEIGHT: f32 = 0.45;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Ingest,
    Magnify,
}

/// Progress of a magnification batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchProgress {
    pub phase: BatchPhase,
    /// Overall progress (0.0 to 1.0), never decreasing within a batch.
    pub overall_progress: f32,
    pub frames_done: usize,
    pub total_frames: usize,
}

/// Magnify `frames` on the GPU with default device settings.
pub async fn magnify(
    frames: &[Frame],
    width: u32,
    height: u32,
    gain: f32,
    blur_enabled: bool,
) -> Result<Vec<Frame>> {
    let params = MagnificationParams::single_scale(gain, blur_enabled);
    magnify_with(&GpuProvider::default(), frames, width, height, &params, |_| {}).await
}

/// Magnify `frames` on a backend from `provider`.
///
/// Input is checked before any device is acquired, so invalid input never
/// allocates device resources. Output frames are in input order; on error
/// no frames are returned.
pub async fn magnify_with<P: BackendProvider>(
    provider: &P,
    frames: &[Frame],
    width: u32,
    height: u32,
    params: &MagnificationParams,
    progress: impl FnMut(BatchProgress),
) -> Result<Vec<Frame>> {
    let batch_id = Uuid::new_v4();
    let span = info_span!("magnify_batch", batch_id = %batch_id);
    run_batch(provider, frames, width, height, params, progress)
        .instrument(span)
        .await
}

async fn run_batch<P: BackendProvider>(
    provider: &P,
    frames: &[Frame],
    width: u32,
    height: u32,
    params: &MagnificationParams,
    mut progress: impl FnMut(BatchProgress),
) -> Result<Vec<Frame>> {
    let total = frames.len();
    let mut report = |phase: BatchPhase, overall: f32, done: usize| {
        progress(BatchProgress {
            phase,
            overall_progress: overall,
            frames_done: done,
            total_frames: total,
        })
    };

    params.validate()?;
    if total == 0 {
        return Err(MagnifyError::InvalidInput("batch has no frames".into()));
    }
    for (i, frame) in frames.iter().enumerate() {
        if frame.dimensions() != (width, height) {
            return Err(MagnifyError::InvalidInput(format!(
                "frame {i} is {}x{}, batch is {width}x{height}",
                frame.width(),
                frame.height()
            )));
        }
        let overall = INGEST_FRAMES_WEIGHT * (i + 1) as f32 / total as f32;
        report(BatchPhase::Ingest, overall, i + 1);
    }

    let mut backend = provider.acquire().await?;
    info!(
        frames = total,
        width,
        height,
        gain = params.gain,
        blur = params.blur,
        levels = params.pyramid_levels,
        backend = backend.name(),
        "Starting magnification batch"
    );
    let started = Instant::now();

    let result = {
        let mut pipeline = MagnificationPipeline::new(&mut backend);
        match pipeline.start(frames, params) {
            Ok(()) => {
                pipeline
                    .run(|state| match state {
                        PipelineState::UploadMean => report(BatchPhase::Ingest, INGEST_END, total),
                        PipelineState::PerFrame { next, .. } => report(
                            BatchPhase::Magnify,
                            INGEST_END + SUBMIT_WEIGHT * next as f32 / total as f32,
                            next,
                        ),
                        PipelineState::Collect => {
                            report(BatchPhase::Magnify, INGEST_END + SUBMIT_WEIGHT, total)
                        }
                        PipelineState::Done => report(BatchPhase::Magnify, 1.0, total),
                        _ => {}
                    })
                    .await
            }
            Err(e) => Err(e),
        }
    };
    backend.release();

    match &result {
        Ok(out) => info!(
            frames = out.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Magnification batch complete"
        ),
        Err(e) => error!(error = %e, "Magnification batch failed"),
    }
    result
}
