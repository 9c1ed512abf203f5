//! Magnification parameters and batch configuration.

use crate::error::{MagnifyError, Result};
use crate::kernel::MAX_PYRAMID_LEVELS;
use serde::{Deserialize, Serialize};

/// Per-batch magnification parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MagnificationParams {
    /// Motion gain. Typical breathing footage uses 15-30.
    pub gain: f32,
    /// Pre-blur frames (and the mean) before motion extraction.
    /// Ignored in pyramid mode, which blurs every level itself.
    pub blur: bool,
    /// Number of Laplacian levels. 0 selects single-scale mode.
    pub pyramid_levels: u32,
    /// Optional per-level gains, finest first. Empty means `gain` everywhere.
    pub level_gains: Vec<f32>,
}

impl Default for MagnificationParams {
    fn default() -> Self {
        Self {
            gain: 20.0,
            blur: true,
            pyramid_levels: 0,
            level_gains: Vec::new(),
        }
    }
}

impl MagnificationParams {
    /// Single-scale parameters with the given gain and blur flag.
    pub fn single_scale(gain: f32, blur: bool) -> Self {
        Self {
            gain,
            blur,
            ..Self::default()
        }
    }

    /// Pyramid parameters with `levels` Laplacian levels.
    pub fn pyramid(gain: f32, levels: u32) -> Self {
        Self {
            gain,
            blur: false,
            pyramid_levels: levels,
            level_gains: Vec::new(),
        }
    }

    /// Whether multi-scale mode is selected.
    pub fn is_pyramid(&self) -> bool {
        self.pyramid_levels > 0
    }

    /// Gain applied to Laplacian level `level`.
    pub fn gain_for_level(&self, level: usize) -> f32 {
        self.level_gains.get(level).copied().unwrap_or(self.gain)
    }

    pub fn validate(&self) -> Result<()> {
        check_gain(self.gain, "gain")?;
        if self.pyramid_levels > MAX_PYRAMID_LEVELS {
            return Err(MagnifyError::InvalidInput(format!(
                "pyramid_levels {} exceeds maximum {}",
                self.pyramid_levels, MAX_PYRAMID_LEVELS
            )));
        }
        if !self.level_gains.is_empty() {
            if self.level_gains.len() != self.pyramid_levels as usize {
                return Err(MagnifyError::InvalidInput(format!(
                    "{} level gains given for {} pyramid levels",
                    self.level_gains.len(),
                    self.pyramid_levels
                )));
            }
            for &g in &self.level_gains {
                check_gain(g, "level gain")?;
            }
        }
        Ok(())
    }
}

fn check_gain(gain: f32, what: &str) -> Result<()> {
    if !gain.is_finite() || gain < 0.0 {
        return Err(MagnifyError::InvalidInput(format!(
            "{what} must be a finite non-negative number, got {gain}"
        )));
    }
    Ok(())
}

/// GPU adapter power preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PowerPreference {
    #[default]
    HighPerformance,
    LowPower,
}

/// Which graphics backends the device context may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendSelection {
    /// Vulkan, Metal, DX12 (and WebGPU in browsers).
    #[default]
    Primary,
    /// Every backend, including GL.
    All,
    /// No backend at all. Acquisition always fails with `NoAdapter`.
    None,
}

/// Device acquisition settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub power: PowerPreference,
    pub backends: BackendSelection,
}

/// Complete configuration for a magnification batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MagnifyConfig {
    pub params: MagnificationParams,
    pub device: DeviceConfig,
    /// Upper bound on frames whose readback has not been collected yet.
    pub max_frames_in_flight: usize,
}

impl Default for MagnifyConfig {
    fn default() -> Self {
        Self {
            params: MagnificationParams::default(),
            device: DeviceConfig::default(),
            max_frames_in_flight: 16,
        }
    }
}

impl MagnifyConfig {
    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;
        if self.max_frames_in_flight == 0 {
            return Err(MagnifyError::InvalidInput(
                "max_frames_in_flight must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
