//! Magnification pipeline state machine.
//!
//! ```text
//! Idle -> ComputeMean -> UploadMean -> PerFrame(0..n) -> Collect -> Done
//!              \______________\______________\______________\--> Failed
//! ```
//!
//! Any stage error moves the pipeline to `Failed` and drops every partial
//! result; a failed batch never yields frames.

use crate::backend::MagnifyBackend;
use crate::mean::TemporalMean;
use breathscope_core::{BatchStage, Frame, MagnificationParams, MagnifyError, Result};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    ComputeMean,
    UploadMean,
    /// Frames `0..next` have been submitted.
    PerFrame { next: usize, total: usize },
    Collect,
    Done,
    Failed { stage: BatchStage },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed { .. })
    }
}

/// Drives one batch through a [`MagnifyBackend`].
pub struct MagnificationPipeline<'b, B: MagnifyBackend> {
    backend: &'b mut B,
    state: PipelineState,
    frames: Vec<Frame>,
    params: MagnificationParams,
    mean: Option<Frame>,
    output: Option<Vec<Frame>>,
}

impl<'b, B: MagnifyBackend> MagnificationPipeline<'b, B> {
    pub fn new(backend: &'b mut B) -> Self {
        Self {
            backend,
            state: PipelineState::Idle,
            frames: Vec::new(),
            params: MagnificationParams::default(),
            mean: None,
            output: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Temporal mean of the current batch, once computed.
    pub fn mean(&self) -> Option<&Frame> {
        self.mean.as_ref()
    }

    /// Accept a batch. Frames must be non-empty and share one shape.
    pub fn start(&mut self, frames: &[Frame], params: &MagnificationParams) -> Result<()> {
        if self.state != PipelineState::Idle {
            return Err(MagnifyError::InvalidInput(format!(
                "pipeline cannot start from {:?}",
                self.state
            )));
        }
        let checked = params.validate().and_then(|()| validate_frames(frames));
        if let Err(e) = checked {
            self.state = PipelineState::Failed {
                stage: BatchStage::Validate,
            };
            return Err(e);
        }
        self.frames = frames.to_vec();
        self.params = params.clone();
        self.state = PipelineState::ComputeMean;
        Ok(())
    }

    /// Run the current stage and return the state it leads to.
    pub async fn step(&mut self) -> Result<PipelineState> {
        let (stage, frame) = match self.state {
            PipelineState::ComputeMean => (BatchStage::ComputeMean, None),
            PipelineState::UploadMean => (BatchStage::UploadMean, None),
            PipelineState::PerFrame { next, .. } => (BatchStage::PerFrame, Some(next)),
            PipelineState::Collect => (BatchStage::Collect, None),
            other => {
                return Err(MagnifyError::InvalidInput(format!(
                    "pipeline has nothing to run in {other:?}"
                )))
            }
        };

        match self.run_stage().await {
            Ok(next) => {
                debug!(from = ?self.state, to = ?next, "Pipeline transition");
                self.state = next;
                Ok(next)
            }
            Err(e) => {
                self.fail(stage);
                Err(e.in_batch(stage, frame))
            }
        }
    }

    async fn run_stage(&mut self) -> Result<PipelineState> {
        let total = self.frames.len();
        match self.state {
            PipelineState::ComputeMean => {
                self.mean = Some(TemporalMean::compute(&self.frames)?);
                Ok(PipelineState::UploadMean)
            }
            PipelineState::UploadMean => {
                let mean = self
                    .mean
                    .as_ref()
                    .ok_or_else(|| MagnifyError::InvalidInput("mean not computed".into()))?;
                let (w, h) = mean.dimensions();
                self.backend.prepare(w, h, &self.params)?;
                self.backend.upload_mean(mean)?;
                Ok(PipelineState::PerFrame { next: 0, total })
            }
            PipelineState::PerFrame { next, total } => {
                self.backend.submit_frame(next, &self.frames[next]).await?;
                if next + 1 < total {
                    Ok(PipelineState::PerFrame {
                        next: next + 1,
                        total,
                    })
                } else {
                    Ok(PipelineState::Collect)
                }
            }
            PipelineState::Collect => {
                let results = self.backend.collect().await?;
                self.output = Some(reassemble(&self.frames, results)?);
                Ok(PipelineState::Done)
            }
            other => Err(MagnifyError::InvalidInput(format!(
                "no stage to run in {other:?}"
            ))),
        }
    }

    fn fail(&mut self, stage: BatchStage) {
        self.state = PipelineState::Failed { stage };
        self.output = None;
        self.mean = None;
        self.frames.clear();
    }

    /// Step until `Done`, calling `on_state` after every transition.
    pub async fn run(&mut self, mut on_state: impl FnMut(PipelineState)) -> Result<Vec<Frame>> {
        while !self.state.is_terminal() {
            let state = self.step().await?;
            on_state(state);
        }
        self.take_output()
            .ok_or_else(|| MagnifyError::InvalidInput("pipeline finished without output".into()))
    }

    /// Output frames in input order. Only available once, after `Done`.
    pub fn take_output(&mut self) -> Option<Vec<Frame>> {
        if self.state == PipelineState::Done {
            self.output.take()
        } else {
            None
        }
    }
}

fn validate_frames(frames: &[Frame]) -> Result<()> {
    let first = frames
        .first()
        .ok_or_else(|| MagnifyError::InvalidInput("batch has no frames".into()))?;
    for (i, f) in frames.iter().enumerate() {
        if !f.same_shape(first) {
            return Err(MagnifyError::InvalidInput(format!(
                "frame {i} is {}x{}, expected {}x{}",
                f.width(),
                f.height(),
                first.width(),
                first.height()
            )));
        }
    }
    Ok(())
}

/// Put backend results back into input order. Every index must appear
/// exactly once.
fn reassemble(frames: &[Frame], results: Vec<(usize, Vec<u8>)>) -> Result<Vec<Frame>> {
    let mut slots: Vec<Option<Frame>> = vec![None; frames.len()];
    for (index, bytes) in results {
        let source = frames.get(index).ok_or_else(|| {
            MagnifyError::ReadbackFailed(format!("result for unknown frame {index}"))
        })?;
        let slot = &mut slots[index];
        if slot.is_some() {
            return Err(MagnifyError::ReadbackFailed(format!(
                "frame {index} returned twice"
            )));
        }
        let mut frame = Frame::new(source.width(), source.height(), bytes)
            .map_err(|e| MagnifyError::ReadbackFailed(format!("frame {index}: {e}")))?;
        if let Some(t) = source.timestamp() {
            frame = frame.with_timestamp(t);
        }
        *slot = Some(frame);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(i, f)| {
            f.ok_or_else(|| MagnifyError::ReadbackFailed(format!("frame {i} never returned")))
        })
        .collect()
}
