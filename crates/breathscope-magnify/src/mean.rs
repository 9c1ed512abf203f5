//! Host-side temporal mean.

use breathscope_core::{Frame, MagnifyError, Result};
use rayon::prelude::*;
use tracing::debug;

/// Per-pixel average of every frame in a batch.
pub struct TemporalMean;

impl TemporalMean {
    /// Average all frames channel by channel, rounding to the nearest
    /// RGBA8 value. Frames must be non-empty and share one shape.
    pub fn compute(frames: &[Frame]) -> Result<Frame> {
        let first = frames
            .first()
            .ok_or_else(|| MagnifyError::InvalidInput("cannot average zero frames".into()))?;
        if let Some((i, _)) = frames.iter().enumerate().find(|(_, f)| !f.same_shape(first)) {
            return Err(MagnifyError::InvalidInput(format!(
                "frame {i} is {}x{}, expected {}x{}",
                frames[i].width(),
                frames[i].height(),
                first.width(),
                first.height()
            )));
        }

        let n = frames.len() as u64;
        let stride = first.stride();
        let mut data = vec![0u8; first.data().len()];
        data.par_chunks_mut(stride)
            .enumerate()
            .for_each(|(row, out)| {
                let start = row * stride;
                let mut sums = vec![0u64; stride];
                for frame in frames {
                    let src = &frame.data()[start..start + stride];
                    for (s, &b) in sums.iter_mut().zip(src) {
                        *s += b as u64;
                    }
                }
                for (o, s) in out.iter_mut().zip(sums) {
                    *o = ((s + n / 2) / n) as u8;
                }
            });

        debug!(
            frames = frames.len(),
            width = first.width(),
            height = first.height(),
            "Temporal mean computed"
        );
        Frame::new(first.width(), first.height(), data)
    }
}
