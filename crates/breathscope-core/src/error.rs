//! Error types for Breathscope.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stage of a magnification batch, used to locate batch failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStage {
    Validate,
    ComputeMean,
    UploadMean,
    PerFrame,
    Collect,
}

impl BatchStage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::ComputeMean => "compute mean",
            Self::UploadMean => "upload mean",
            Self::PerFrame => "per-frame",
            Self::Collect => "collect",
        }
    }
}

impl std::fmt::Display for BatchStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Coarse error classes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// No usable compute backend.
    Unavailable,
    /// A kernel failed to compile. Never transient.
    CompilationFailed,
    /// Buffer or texture creation was refused.
    AllocationFailed,
    /// Staging map or copy-out failed.
    ReadbackFailed,
    /// A per-frame stage failed and the batch was discarded.
    BatchFailed,
    /// Caller supplied inconsistent frames or parameters.
    InvalidInput,
}

/// Main error type for magnification operations.
#[derive(Error, Debug)]
pub enum MagnifyError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    #[error("GPU device request failed: {0}")]
    DeviceRequestFailed(String),

    #[error("shader `{label}` failed to compile: {message}")]
    ShaderCompilationFailed {
        label: String,
        message: String,
        /// Full WGSL text that failed, kept for bug reports.
        shader_source: String,
    },

    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    #[error("readback failed: {0}")]
    ReadbackFailed(String),

    #[error("batch failed during {stage}{}: {reason}", frame_suffix(.frame))]
    BatchFailed {
        stage: BatchStage,
        frame: Option<usize>,
        #[source]
        reason: Box<MagnifyError>,
    },

    #[error("device error: {0}")]
    Device(String),

    #[error("device context already released")]
    ContextReleased,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl MagnifyError {
    /// Wrap an error as a batch failure at `stage`.
    ///
    /// Construction-time errors keep their own kind so callers can still
    /// tell a missing GPU apart from a failed frame.
    pub fn in_batch(self, stage: BatchStage, frame: Option<usize>) -> Self {
        match self {
            Self::NoAdapter
            | Self::DeviceRequestFailed(_)
            | Self::ShaderCompilationFailed { .. }
            | Self::InvalidInput(_)
            | Self::BatchFailed { .. } => self,
            other => Self::BatchFailed {
                stage,
                frame,
                reason: Box::new(other),
            },
        }
    }

    /// Map this error onto the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoAdapter | Self::DeviceRequestFailed(_) => ErrorKind::Unavailable,
            Self::ShaderCompilationFailed { .. } => ErrorKind::CompilationFailed,
            Self::AllocationFailed(_) => ErrorKind::AllocationFailed,
            Self::ReadbackFailed(_) => ErrorKind::ReadbackFailed,
            Self::BatchFailed { .. } | Self::Device(_) | Self::ContextReleased => {
                ErrorKind::BatchFailed
            }
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    /// Whether retrying the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind(),
            ErrorKind::Unavailable | ErrorKind::CompilationFailed | ErrorKind::InvalidInput
        )
    }

    /// A single actionable sentence for end users.
    pub fn user_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Unavailable => "GPU acceleration unavailable",
            ErrorKind::CompilationFailed => {
                "Motion magnification is not supported by this build; please report this issue"
            }
            ErrorKind::AllocationFailed => {
                "Not enough GPU memory; try a shorter clip or a smaller region"
            }
            ErrorKind::ReadbackFailed => "Could not read results back from the GPU; please retry",
            ErrorKind::BatchFailed => "Motion magnification failed; no frames were produced",
            ErrorKind::InvalidInput => "The selected clip cannot be magnified; check frame sizes",
        }
    }
}

fn frame_suffix(frame: &Option<usize>) -> String {
    frame.map(|i| format!(" (frame {i})")).unwrap_or_default()
}

/// Result type alias for magnification operations.
pub type Result<T> = std::result::Result<T, MagnifyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(MagnifyError::NoAdapter.kind(), ErrorKind::Unavailable);
        assert_eq!(
            MagnifyError::DeviceRequestFailed("refused".into()).kind(),
            ErrorKind::Unavailable
        );
        assert_eq!(
            MagnifyError::ReadbackFailed("map".into()).kind(),
            ErrorKind::ReadbackFailed
        );
        assert_eq!(MagnifyError::ContextReleased.kind(), ErrorKind::BatchFailed);
    }

    #[test]
    fn test_in_batch_wraps_frame_errors_only() {
        let wrapped =
            MagnifyError::ReadbackFailed("map".into()).in_batch(BatchStage::Collect, Some(3));
        assert_eq!(wrapped.kind(), ErrorKind::BatchFailed);
        assert!(wrapped.to_string().contains("frame 3"));

        let kept = MagnifyError::NoAdapter.in_batch(BatchStage::UploadMean, None);
        assert!(matches!(kept, MagnifyError::NoAdapter));
    }

    #[test]
    fn test_in_batch_does_not_double_wrap() {
        let once =
            MagnifyError::AllocationFailed("oom".into()).in_batch(BatchStage::PerFrame, Some(1));
        let twice = once.in_batch(BatchStage::Collect, None);
        match twice {
            MagnifyError::BatchFailed { stage, frame, .. } => {
                assert_eq!(stage, BatchStage::PerFrame);
                assert_eq!(frame, Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_user_message_hides_backend_text() {
        let err = MagnifyError::DeviceRequestFailed("VK_ERROR_INITIALIZATION_FAILED".into());
        assert_eq!(err.user_message(), "GPU acceleration unavailable");
        assert!(!err.is_retryable());
        assert!(MagnifyError::ReadbackFailed("timeout".into()).is_retryable());
    }
}
