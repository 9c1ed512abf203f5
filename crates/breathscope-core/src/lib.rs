//! Breathscope Core - Foundation types for motion magnification
//!
//! This crate provides the types shared by the GPU and magnification crates:
//! - RGBA8 frames
//! - Magnification parameters and batch configuration
//! - The error taxonomy
//! - Kernel constants shared by the WGSL and CPU implementations

pub mod error;
pub mod frame;
pub mod params;

pub use error::{BatchStage, ErrorKind, MagnifyError, Result};
pub use frame::{Frame, BYTES_PER_PIXEL};
pub use params::{
    BackendSelection, DeviceConfig, MagnificationParams, MagnifyConfig, PowerPreference,
};

/// Constants shared by every kernel implementation.
pub mod kernel {
    /// 5-tap normalized Gaussian (sigma ~= 1.0), centre tap at index 2.
    pub const GAUSSIAN_TAPS: [f32; 5] = [0.06136, 0.24477, 0.38774, 0.24477, 0.06136];

    /// Compute kernels run 8x8 workgroups.
    pub const TILE_SIZE: u32 = 8;

    /// Deepest supported Laplacian pyramid.
    pub const MAX_PYRAMID_LEVELS: u32 = 8;

    /// Signed values in [-1, 1] are stored as `v * 0.5 + 0.5`.
    #[inline]
    pub fn shift(v: f32) -> f32 {
        v * 0.5 + 0.5
    }

    /// Inverse of [`shift`].
    #[inline]
    pub fn unshift(v: f32) -> f32 {
        (v - 0.5) * 2.0
    }

    /// Number of 8x8 workgroups needed to cover `extent` pixels.
    #[inline]
    pub fn workgroup_count(extent: u32) -> u32 {
        extent.div_ceil(TILE_SIZE)
    }
}
