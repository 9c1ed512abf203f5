//! Laplacian pyramid for multi-scale magnification.
//!
//! `G0` is the frame, `G(k+1) = downsample(blur(G(k)))` and
//! `L(k) = G(k) - upsample(G(k+1))`, stored shifted. Level sizes halve
//! with rounding up.

use crate::cpu::{self, FloatImage};

/// Sizes of `G0..=GN` for up to `levels` Laplacian levels.
///
/// Stops early once the smaller side reaches one pixel, so the result
/// holds between 1 and `levels + 1` entries.
pub fn level_sizes(width: u32, height: u32, levels: u32) -> Vec<(u32, u32)> {
    let mut sizes = vec![(width, height)];
    let (mut w, mut h) = (width, height);
    while (sizes.len() as u32) <= levels && w.min(h) >= 2 {
        w = w.div_ceil(2);
        h = h.div_ceil(2);
        sizes.push((w, h));
    }
    sizes
}

/// One Gaussian/Laplacian pair, index 0 being the finest.
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    pub gaussian: FloatImage,
    /// Shifted `gaussian - upsample(next gaussian)`.
    pub laplacian: FloatImage,
}

/// A decomposed image: Laplacian levels plus the coarsest Gaussian.
#[derive(Debug, Clone)]
pub struct Pyramid {
    pub levels: Vec<PyramidLevel>,
    pub residual: FloatImage,
}

impl Pyramid {
    pub fn decompose(image: &FloatImage, levels: u32) -> Self {
        let sizes = level_sizes(image.width(), image.height(), levels);
        let mut out = Vec::with_capacity(sizes.len() - 1);
        let mut current = image.clone();
        for _ in 1..sizes.len() {
            let coarse = cpu::downsample(&cpu::blur(&current));
            let laplacian = cpu::laplacian(&current, &coarse);
            out.push(PyramidLevel {
                gaussian: current,
                laplacian,
            });
            current = coarse;
        }
        Self {
            levels: out,
            residual: current,
        }
    }

    /// Number of Laplacian levels actually built.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Rebuild the image bottom-up from `bands` (one per level, finest
    /// first) and this pyramid's residual.
    pub fn reconstruct_with(&self, bands: &[FloatImage]) -> FloatImage {
        bands
            .iter()
            .rev()
            .fold(self.residual.clone(), |coarse, band| cpu::reconstruct(band, &coarse))
    }

    pub fn reconstruct(&self) -> FloatImage {
        let bands: Vec<FloatImage> = self.levels.iter().map(|l| l.laplacian.clone()).collect();
        self.reconstruct_with(&bands)
    }
}

/// Multi-scale magnification of one frame against the mean's Laplacian
/// levels. The frame's residual is kept unamplified.
pub fn magnify_pyramid(
    frame: &FloatImage,
    mean_bands: &[FloatImage],
    gain_for_level: impl Fn(usize) -> f32,
) -> FloatImage {
    let pyramid = Pyramid::decompose(frame, mean_bands.len() as u32);
    let bands: Vec<FloatImage> = pyramid
        .levels
        .iter()
        .zip(mean_bands)
        .enumerate()
        .map(|(k, (level, mean))| cpu::band_amplify(&level.laplacian, mean, gain_for_level(k)))
        .collect();
    pyramid.reconstruct_with(&bands)
}
