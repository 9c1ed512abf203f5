//! Synthetic clips and measurements shared by the integration tests.

use breathscope_core::Frame;
use std::f64::consts::PI;

pub const SIZE: u32 = 64;
pub const RADIUS: f64 = 10.0;
/// Peak horizontal displacement of the circle in pixels.
pub const AMPLITUDE: f64 = 2.0;
/// Background level, `round(0.5 * 255)`.
pub const BACKGROUND: f64 = 128.0;

/// Circle centre offset for frame `k` of a 0.5 Hz oscillation sampled
/// every 0.2 s.
pub fn displacement(k: usize) -> f64 {
    AMPLITUDE * (PI * k as f64 / 5.0).sin()
}

/// A 64x64 grey frame with a slightly brighter anti-aliased disc centred
/// at `(32 + dx, 32)`.
pub fn circle_frame(dx: f64) -> Frame {
    let (cx, cy) = (SIZE as f64 / 2.0 + dx, SIZE as f64 / 2.0);
    Frame::from_fn(SIZE, SIZE, |x, y| {
        let mut inside = 0;
        for sy in 0..4 {
            for sx in 0..4 {
                let px = x as f64 + (sx as f64 + 0.5) / 4.0;
                let py = y as f64 + (sy as f64 + 0.5) / 4.0;
                if (px - cx).powi(2) + (py - cy).powi(2) < RADIUS * RADIUS {
                    inside += 1;
                }
            }
        }
        let coverage = inside as f64 / 16.0;
        let v = ((0.5 + 0.04 * coverage) * 255.0).round() as u8;
        [v, v, v, 255]
    })
    .unwrap()
}

/// Ten frames of the oscillating disc.
pub fn breathing_clip() -> Vec<Frame> {
    (0..10).map(|k| circle_frame(displacement(k))).collect()
}

/// Horizontal centroid of the red channel's departure from the background.
pub fn centroid_x(frame: &Frame) -> f64 {
    let (mut moment, mut weight) = (0.0, 0.0);
    for y in 0..frame.height() {
        for x in 0..frame.width() {
            let w = frame.pixel(x, y)[0] as f64 - BACKGROUND;
            moment += w * (x as f64 + 0.5);
            weight += w;
        }
    }
    moment / weight
}

/// Largest motion the magnifier added, in pixels: the peak of
/// `centroid(output) - centroid(input)` over the clip.
pub fn added_amplitude(input: &[Frame], output: &[Frame]) -> f64 {
    input
        .iter()
        .zip(output)
        .map(|(i, o)| (centroid_x(o) - centroid_x(i)).abs())
        .fold(0.0, f64::max)
}

pub fn max_abs_diff(a: &Frame, b: &Frame) -> u8 {
    a.data()
        .iter()
        .zip(b.data())
        .map(|(x, y)| x.abs_diff(*y))
        .max()
        .unwrap_or(0)
}

/// A textured clip of odd size, so kernels see partial tiles and
/// clamped edges.
pub fn textured_clip(width: u32, height: u32, frames: usize) -> Vec<Frame> {
    (0..frames)
        .map(|k| {
            let phase = k as f64 * 0.7;
            Frame::from_fn(width, height, |x, y| {
                let wave = (x as f64 * 0.45 + phase).sin() * (y as f64 * 0.3).cos();
                let s = (wave * 0.5 + 0.5) * 200.0;
                let r = s as u8 + 20;
                let g = ((x * 7 + y * 3) % 200) as u8 + 20;
                let b = (255.0 - s) as u8;
                [r, g, b, 255]
            })
            .unwrap()
        })
        .collect()
}
