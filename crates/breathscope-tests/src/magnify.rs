//! End-to-end magnification behaviour on the CPU backend.

use crate::fixtures::*;
use breathscope_core::{
    BackendSelection, DeviceConfig, ErrorKind, Frame, MagnificationParams, MagnifyConfig,
};
use breathscope_magnify::{magnify_with, CpuProvider, GpuProvider, TemporalMean};

async fn run_cpu(frames: &[Frame], params: &MagnificationParams) -> Vec<Frame> {
    let (w, h) = frames[0].dimensions();
    magnify_with(&CpuProvider, frames, w, h, params, |_| {})
        .await
        .unwrap()
}

#[tokio::test]
async fn zero_gain_returns_input() {
    let clip = textured_clip(31, 19, 5);
    for blur in [false, true] {
        let out = run_cpu(&clip, &MagnificationParams::single_scale(0.0, blur)).await;
        assert_eq!(out.len(), clip.len());
        for (o, i) in out.iter().zip(&clip) {
            assert!(max_abs_diff(o, i) <= 1);
        }
    }
}

#[tokio::test]
async fn breathing_circle_gain_one() {
    let clip = breathing_clip();
    let out = run_cpu(&clip, &MagnificationParams::single_scale(1.0, false)).await;
    let amplitude = added_amplitude(&clip, &out);
    assert!((amplitude - 2.0).abs() <= 0.5, "amplitude {amplitude}");
}

#[tokio::test]
async fn breathing_circle_gain_ten() {
    let clip = breathing_clip();
    let out = run_cpu(&clip, &MagnificationParams::single_scale(10.0, false)).await;
    let amplitude = added_amplitude(&clip, &out);
    assert!((amplitude - 20.0).abs() <= 2.0, "amplitude {amplitude}");
}

#[tokio::test]
async fn added_motion_scales_linearly_with_gain() {
    let clip = breathing_clip();
    for gain in [2.0f32, 5.0] {
        let out = run_cpu(&clip, &MagnificationParams::single_scale(gain, false)).await;
        let amplitude = added_amplitude(&clip, &out);
        let expected = AMPLITUDE * gain as f64;
        assert!(
            (amplitude / expected - 1.0).abs() <= 0.2,
            "gain {gain}: amplitude {amplitude}, expected about {expected}"
        );
    }
}

#[tokio::test]
async fn static_clip_is_unchanged_at_high_gain() {
    let frame = Frame::test_pattern(40, 24).unwrap();
    let clip = vec![frame.clone(); 6];
    for params in [
        MagnificationParams::single_scale(30.0, true),
        MagnificationParams::pyramid(30.0, 3),
    ] {
        let out = run_cpu(&clip, &params).await;
        for o in &out {
            assert!(max_abs_diff(o, &frame) <= 1);
        }
    }
}

#[tokio::test]
async fn heavy_gain_output_is_clamped() {
    // Saturating gain drives every changed channel to an end of the range.
    let clip = textured_clip(17, 9, 4);
    let out = run_cpu(&clip, &MagnificationParams::single_scale(500.0, false)).await;
    let mean = TemporalMean::compute(&clip).unwrap();
    for (o, i) in out.iter().zip(&clip) {
        for ((&ov, &iv), &mv) in o.data().iter().zip(i.data()).zip(mean.data()) {
            if iv.abs_diff(mv) >= 2 {
                assert!(ov == 0 || ov == 255, "expected saturation, got {ov}");
            }
        }
    }
}

#[tokio::test]
async fn pyramid_roundtrip_within_bound() {
    // All frames equal: every band equals the mean's band, so the output is
    // a plain decompose-and-reconstruct of the input.
    let frame = textured_clip(45, 29, 1).remove(0);
    let clip = vec![frame.clone(); 3];
    let out = run_cpu(&clip, &MagnificationParams::pyramid(1.0, 4)).await;
    let mae = out[0]
        .data()
        .iter()
        .zip(frame.data())
        .map(|(a, b)| a.abs_diff(*b) as f64)
        .sum::<f64>()
        / frame.data().len() as f64;
    assert!(mae < 5.0, "mean absolute error {mae}");
}

#[tokio::test]
async fn pyramid_band_motion_scales_with_gain() {
    // Bands carry edge detail, not bulk displacement, so measure how far
    // the output departs from the input rather than centroid motion.
    let clip = breathing_clip();
    let departure = |out: &[Frame]| -> f64 {
        out.iter()
            .zip(&clip)
            .flat_map(|(o, i)| o.data().iter().zip(i.data()))
            .map(|(a, b)| a.abs_diff(*b) as f64)
            .sum()
    };
    let low = run_cpu(&clip, &MagnificationParams::pyramid(2.0, 3)).await;
    let high = run_cpu(&clip, &MagnificationParams::pyramid(10.0, 3)).await;

    assert!(high.iter().zip(&clip).any(|(o, i)| max_abs_diff(o, i) >= 10));
    let ratio = departure(&high) / departure(&low);
    assert!((3.0..=8.0).contains(&ratio), "ratio {ratio}");
}

#[tokio::test]
async fn missing_backend_is_unavailable() {
    let config = MagnifyConfig {
        device: DeviceConfig {
            backends: BackendSelection::None,
            ..DeviceConfig::default()
        },
        ..MagnifyConfig::default()
    };
    let provider = GpuProvider::from_config(&config);
    let clip = breathing_clip();
    let mut reports = Vec::new();
    let err = magnify_with(
        &provider,
        &clip,
        SIZE,
        SIZE,
        &MagnificationParams::single_scale(1.0, false),
        |p| reports.push(p),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert!(!err.is_retryable());
    assert_eq!(err.user_message(), "GPU acceleration unavailable");
    // Failed before the magnification phase began.
    assert!(reports.iter().all(|p| p.overall_progress < 0.5));
}
