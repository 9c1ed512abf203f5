//! CPU reference kernels.
//!
//! Each function mirrors one WGSL entry point: same taps, same
//! clamp-to-edge reads, same shifted storage of signed values. Results
//! differ from the GPU only by the half-float rounding of intermediates.

use breathscope_core::kernel::{shift, unshift, GAUSSIAN_TAPS};
use breathscope_core::Frame;
use rayon::prelude::*;

pub type Pixel = [f32; 4];

/// A float RGBA image with channels nominally in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct FloatImage {
    width: u32,
    height: u32,
    data: Vec<Pixel>,
}

impl FloatImage {
    pub fn new(width: u32, height: u32, data: Vec<Pixel>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn filled(width: u32, height: u32, value: Pixel) -> Self {
        Self::new(width, height, vec![value; width as usize * height as usize])
    }

    /// Normalize RGBA8 bytes to [0, 1].
    pub fn from_frame(frame: &Frame) -> Self {
        let data = frame
            .data()
            .chunks_exact(4)
            .map(|px| [0, 1, 2, 3].map(|c| px[c] as f32 / 255.0))
            .collect();
        Self::new(frame.width(), frame.height(), data)
    }

    /// Quantize to RGBA8 the way an `rgba8unorm` store does.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.data
            .iter()
            .flat_map(|px| px.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8))
            .collect()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Pixel {
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Read with coordinates clamped to the image edge.
    #[inline]
    pub fn get_clamped(&self, x: i64, y: i64) -> Pixel {
        let x = x.clamp(0, self.width as i64 - 1) as u32;
        let y = y.clamp(0, self.height as i64 - 1) as u32;
        self.get(x, y)
    }

    /// Evaluate `f(x, y)` for every pixel of a `width x height` image,
    /// one row per rayon task.
    fn generate(width: u32, height: u32, f: impl Fn(u32, u32) -> Pixel + Sync) -> Self {
        let mut data = vec![[0.0; 4]; width as usize * height as usize];
        data.par_chunks_mut(width as usize)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, px) in row.iter_mut().enumerate() {
                    *px = f(x as u32, y as u32);
                }
            });
        Self::new(width, height, data)
    }
}

fn map2(a: Pixel, b: Pixel, f: impl Fn(f32, f32) -> f32) -> Pixel {
    [f(a[0], b[0]), f(a[1], b[1]), f(a[2], b[2]), f(a[3], b[3])]
}

fn blur_along(src: &FloatImage, dx: i64, dy: i64) -> FloatImage {
    FloatImage::generate(src.width, src.height, |x, y| {
        let mut acc = [0.0f32; 4];
        for (i, tap) in GAUSSIAN_TAPS.iter().enumerate() {
            let o = i as i64 - 2;
            let px = src.get_clamped(x as i64 + o * dx, y as i64 + o * dy);
            for c in 0..4 {
                acc[c] += tap * px[c];
            }
        }
        acc
    })
}

/// Horizontal 5-tap Gaussian pass.
pub fn blur_x(src: &FloatImage) -> FloatImage {
    blur_along(src, 1, 0)
}

/// Vertical 5-tap Gaussian pass.
pub fn blur_y(src: &FloatImage) -> FloatImage {
    blur_along(src, 0, 1)
}

/// Separable blur: X pass into a temporary, then Y pass.
pub fn blur(src: &FloatImage) -> FloatImage {
    blur_y(&blur_x(src))
}

/// 2x2 box average into a `ceil(w/2) x ceil(h/2)` image.
pub fn downsample(src: &FloatImage) -> FloatImage {
    let (w, h) = (src.width.div_ceil(2), src.height.div_ceil(2));
    FloatImage::generate(w, h, |x, y| {
        let (sx, sy) = (2 * x as i64, 2 * y as i64);
        let mut acc = [0.0f32; 4];
        for (ox, oy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let px = src.get_clamped(sx + ox, sy + oy);
            for c in 0..4 {
                acc[c] += px[c];
            }
        }
        acc.map(|v| v * 0.25)
    })
}

/// Nearest-neighbour upsample: output `(x, y)` copies input `(x/2, y/2)`.
pub fn upsample(src: &FloatImage, width: u32, height: u32) -> FloatImage {
    FloatImage::generate(width, height, |x, y| src.get(x / 2, y / 2))
}

/// `shift(clamp(fine - upsample(coarse), -1, 1))`.
pub fn laplacian(fine: &FloatImage, coarse: &FloatImage) -> FloatImage {
    let up = upsample(coarse, fine.width, fine.height);
    FloatImage::generate(fine.width, fine.height, |x, y| {
        map2(fine.get(x, y), up.get(x, y), |f, c| shift((f - c).clamp(-1.0, 1.0)))
    })
}

/// `clamp(unshift(band) + upsample(coarse), 0, 1)`.
pub fn reconstruct(band: &FloatImage, coarse: &FloatImage) -> FloatImage {
    let up = upsample(coarse, band.width, band.height);
    FloatImage::generate(band.width, band.height, |x, y| {
        map2(band.get(x, y), up.get(x, y), |b, c| (unshift(b) + c).clamp(0.0, 1.0))
    })
}

/// `shift(current - mean)`.
pub fn subtract_mean(current: &FloatImage, mean: &FloatImage) -> FloatImage {
    FloatImage::generate(current.width, current.height, |x, y| {
        map2(current.get(x, y), mean.get(x, y), |c, m| shift(c - m))
    })
}

/// `clamp(original + unshift(motion) * gain, 0, 1)`.
pub fn amplify(original: &FloatImage, motion: &FloatImage, gain: f32) -> FloatImage {
    FloatImage::generate(original.width, original.height, |x, y| {
        map2(original.get(x, y), motion.get(x, y), |o, m| {
            (o + unshift(m) * gain).clamp(0.0, 1.0)
        })
    })
}

/// `shift(clamp(l + gain * (l - l_mean), -1, 1))` on shifted bands.
pub fn band_amplify(band: &FloatImage, band_mean: &FloatImage, gain: f32) -> FloatImage {
    FloatImage::generate(band.width, band.height, |x, y| {
        map2(band.get(x, y), band_mean.get(x, y), |b, m| {
            let (b, m) = (unshift(b), unshift(m));
            shift((b + (b - m) * gain).clamp(-1.0, 1.0))
        })
    })
}

/// Single-scale magnification of one frame. `mean` must already be
/// blurred when `blur` is set.
pub fn magnify_single(
    frame: &FloatImage,
    mean: &FloatImage,
    gain: f32,
    blur_frame: bool,
) -> FloatImage {
    let motion = if blur_frame {
        subtract_mean(&blur(frame), mean)
    } else {
        subtract_mean(frame, mean)
    };
    amplify(frame, &motion, gain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ramp(w: u32, h: u32) -> FloatImage {
        FloatImage::generate(w, h, |x, y| {
            let v = (x + y * w) as f32 / (w * h) as f32;
            [v, 1.0 - v, 0.5, 1.0]
        })
    }

    #[test]
    fn test_blur_preserves_constant() {
        let img = FloatImage::filled(7, 5, [0.3, 0.6, 0.9, 1.0]);
        let out = blur(&img);
        for (a, b) in out.pixels().iter().zip(img.pixels()) {
            for c in 0..4 {
                assert!((a[c] - b[c]).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn test_blur_x_impulse_spreads_taps() {
        let mut data = vec![[0.0; 4]; 9];
        data[4] = [1.0; 4];
        let img = FloatImage::new(9, 1, data);
        let out = blur_x(&img);
        for (i, tap) in GAUSSIAN_TAPS.iter().enumerate() {
            assert!((out.get(2 + i as u32, 0)[0] - tap).abs() < 1e-6);
        }
        assert_eq!(out.get(0, 0)[0], 0.0);
    }

    #[test]
    fn test_blur_clamps_to_edge() {
        // A step at the left border: clamped reads see the edge value.
        let img = FloatImage::generate(6, 1, |x, _| if x == 0 { [1.0; 4] } else { [0.0; 4] });
        let out = blur_x(&img);
        let expected = GAUSSIAN_TAPS[0] + GAUSSIAN_TAPS[1] + GAUSSIAN_TAPS[2];
        assert!((out.get(0, 0)[0] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_downsample_odd_size() {
        let img = ramp(5, 3);
        let down = downsample(&img);
        assert_eq!(down.dimensions(), (3, 2));
        let expected =
            (img.get(0, 0)[0] + img.get(1, 0)[0] + img.get(0, 1)[0] + img.get(1, 1)[0]) / 4.0;
        assert!((down.get(0, 0)[0] - expected).abs() < 1e-6);
        // Right column pairs the last pixel with itself.
        let edge = (img.get(4, 2)[0] * 2.0 + img.get(4, 2)[0] * 2.0) / 4.0;
        assert!((down.get(2, 1)[0] - edge).abs() < 1e-6);
    }

    #[test]
    fn test_upsample_nearest() {
        let img = ramp(2, 2);
        let up = upsample(&img, 4, 3);
        assert_eq!(up.get(3, 2), img.get(1, 1));
        assert_eq!(up.get(1, 0), img.get(0, 0));
    }

    #[test]
    fn test_laplacian_subtracts_upsampled_coarse() {
        let fine = ramp(5, 3);
        let coarse = downsample(&fine);
        let up = upsample(&coarse, 5, 3);
        let band = laplacian(&fine, &coarse);
        for ((b, f), u) in band.pixels().iter().zip(fine.pixels()).zip(up.pixels()) {
            for c in 0..4 {
                assert!((unshift(b[c]) - (f[c] - u[c])).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_laplacian_reconstruct_inverts() {
        let fine = ramp(9, 7);
        let coarse = downsample(&blur(&fine));
        let band = laplacian(&fine, &coarse);
        let back = reconstruct(&band, &coarse);
        for (a, b) in back.pixels().iter().zip(fine.pixels()) {
            for c in 0..4 {
                assert!((a[c] - b[c]).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_subtract_mean_is_shifted() {
        let a = FloatImage::filled(2, 2, [0.75, 0.5, 0.25, 1.0]);
        let b = FloatImage::filled(2, 2, [0.25, 0.5, 0.75, 1.0]);
        let m = subtract_mean(&a, &b);
        assert_eq!(m.get(0, 0), [0.75, 0.5, 0.25, 0.5]);
    }

    #[test]
    fn test_zero_gain_is_identity() {
        let frame = ramp(8, 8);
        let mean = FloatImage::filled(8, 8, [0.5; 4]);
        let out = magnify_single(&frame, &mean, 0.0, true);
        assert_eq!(out, frame);
    }

    #[test]
    fn test_rgba8_roundtrip() {
        let frame = Frame::test_pattern(16, 2).unwrap();
        let img = FloatImage::from_frame(&frame);
        assert_eq!(img.to_rgba8(), frame.data());
    }

    proptest! {
        #[test]
        fn prop_amplify_stays_in_range(
            orig in 0.0f32..=1.0,
            cur in 0.0f32..=1.0,
            mean in 0.0f32..=1.0,
            gain in 0.0f32..200.0,
        ) {
            let o = FloatImage::filled(1, 1, [orig; 4]);
            let motion = subtract_mean(
                &FloatImage::filled(1, 1, [cur; 4]),
                &FloatImage::filled(1, 1, [mean; 4]),
            );
            let out = amplify(&o, &motion, gain);
            for v in out.get(0, 0) {
                prop_assert!((0.0..=1.0).contains(&v));
            }
        }

        #[test]
        fn prop_band_amplify_stays_signed_unit(
            band in 0.0f32..=1.0,
            band_mean in 0.0f32..=1.0,
            gain in 0.0f32..200.0,
        ) {
            let out = band_amplify(
                &FloatImage::filled(1, 1, [band; 4]),
                &FloatImage::filled(1, 1, [band_mean; 4]),
                gain,
            );
            for v in out.get(0, 0) {
                prop_assert!((0.0..=1.0).contains(&v));
            }
        }
    }
}
