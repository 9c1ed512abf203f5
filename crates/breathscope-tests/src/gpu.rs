//! GPU backend tests. Each test returns early when no compute adapter is
//! present.

use crate::fixtures::*;
use breathscope_core::{
    BatchStage, DeviceConfig, ErrorKind, Frame, MagnificationParams, MagnifyConfig, MagnifyError,
};
use breathscope_gpu::{probe_capability, GpuContext};
use breathscope_magnify::{
    magnify, magnify_with, CpuProvider, GpuBackend, GpuProvider, MagnificationPipeline,
    MagnifyBackend, PipelineState,
};

async fn run<P: breathscope_magnify::BackendProvider>(
    provider: &P,
    frames: &[Frame],
    params: &MagnificationParams,
) -> Vec<Frame> {
    let (w, h) = frames[0].dimensions();
    magnify_with(provider, frames, w, h, params, |_| {})
        .await
        .unwrap()
}

fn assert_close(gpu: &[Frame], cpu: &[Frame], tolerance: u8) {
    assert_eq!(gpu.len(), cpu.len());
    for (i, (g, c)) in gpu.iter().zip(cpu).enumerate() {
        let diff = max_abs_diff(g, c);
        assert!(diff <= tolerance, "frame {i}: max difference {diff}");
    }
}

#[tokio::test]
async fn gpu_zero_gain_returns_input() {
    if !probe_capability() {
        return;
    }
    let clip = textured_clip(29, 21, 4);
    let out = magnify(&clip, 29, 21, 0.0, true).await.unwrap();
    for (o, i) in out.iter().zip(&clip) {
        assert!(max_abs_diff(o, i) <= 1);
    }
}

#[tokio::test]
async fn gpu_matches_cpu_single_scale() {
    if !probe_capability() {
        return;
    }
    let clip = textured_clip(37, 23, 6);
    for blur in [false, true] {
        let params = MagnificationParams::single_scale(5.0, blur);
        let gpu = run(&GpuProvider::default(), &clip, &params).await;
        let cpu = run(&CpuProvider, &clip, &params).await;
        assert_close(&gpu, &cpu, 3);
    }
}

#[tokio::test]
async fn gpu_matches_cpu_pyramid() {
    if !probe_capability() {
        return;
    }
    let clip = textured_clip(45, 30, 5);
    let mut params = MagnificationParams::pyramid(4.0, 3);
    params.level_gains = vec![6.0, 4.0, 2.0];
    let gpu = run(&GpuProvider::default(), &clip, &params).await;
    let cpu = run(&CpuProvider, &clip, &params).await;
    assert_close(&gpu, &cpu, 6);
}

#[tokio::test]
async fn gpu_breathing_circle() {
    if !probe_capability() {
        return;
    }
    let clip = breathing_clip();
    let one = magnify(&clip, SIZE, SIZE, 1.0, false).await.unwrap();
    let ten = magnify(&clip, SIZE, SIZE, 10.0, false).await.unwrap();
    let a1 = added_amplitude(&clip, &one);
    let a10 = added_amplitude(&clip, &ten);
    assert!((a1 - 2.0).abs() <= 0.5, "gain 1 amplitude {a1}");
    assert!((a10 - 20.0).abs() <= 2.0, "gain 10 amplitude {a10}");
}

#[tokio::test]
async fn gpu_bounded_in_flight_keeps_order() {
    if !probe_capability() {
        return;
    }
    let config = MagnifyConfig {
        max_frames_in_flight: 2,
        ..MagnifyConfig::default()
    };
    let clip = textured_clip(16, 16, 9);
    let params = MagnificationParams::single_scale(0.0, false);
    let out = run(&GpuProvider::from_config(&config), &clip, &params).await;
    for (o, i) in out.iter().zip(&clip) {
        assert!(max_abs_diff(o, i) <= 1);
    }
}

async fn run_pipeline(
    backend: &mut GpuBackend,
    frames: &[Frame],
    params: &MagnificationParams,
) -> Vec<Frame> {
    let mut pipeline = MagnificationPipeline::new(backend);
    pipeline.start(frames, params).unwrap();
    pipeline.run(|_| {}).await.unwrap()
}

#[tokio::test]
async fn gpu_scratch_is_allocated_once_per_shape() {
    let Ok(ctx) = GpuContext::acquire_with(&DeviceConfig::default()).await else {
        return;
    };
    let mut backend = GpuBackend::new(ctx, 3).unwrap();
    let clip = textured_clip(24, 24, 12);
    let params = MagnificationParams::single_scale(8.0, true);

    let first = run_pipeline(&mut backend, &clip, &params).await;
    let created = backend.scratch_created();
    // frame, mean, output, motion, blur temp, blurred frame, blurred mean
    assert_eq!(created, 7);

    let second = run_pipeline(&mut backend, &clip, &params).await;
    assert_eq!(backend.scratch_created(), created);
    assert_eq!(first, second);
    assert_eq!(backend.in_flight(), 0);

    backend.release();
    assert!(backend.context().is_released());
}

/// Raise a validation error outside any error scope, as a device fault would.
fn inject_device_fault(device: &wgpu::Device) {
    let _ = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("faulty"),
        size: 16,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::STORAGE,
        mapped_at_creation: false,
    });
}

#[tokio::test]
async fn gpu_device_fault_fails_batch() {
    // Steps before the fault: mean, upload, then frames submitted.
    for (steps, stage, frame) in [
        (3, BatchStage::PerFrame, Some(1)),
        (6, BatchStage::Collect, None),
    ] {
        let Ok(ctx) = GpuContext::acquire_with(&DeviceConfig::default()).await else {
            return;
        };
        let device = std::sync::Arc::clone(&ctx.device);
        let mut backend = GpuBackend::new(ctx, 8).unwrap();
        let clip = textured_clip(20, 20, 4);
        let params = MagnificationParams::single_scale(4.0, false);

        let mut pipeline = MagnificationPipeline::new(&mut backend);
        pipeline.start(&clip, &params).unwrap();
        for _ in 0..steps {
            pipeline.step().await.unwrap();
        }
        inject_device_fault(&device);

        let err = pipeline.run(|_| {}).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BatchFailed);
        match err {
            MagnifyError::BatchFailed {
                stage: s,
                frame: f,
                reason,
            } => {
                assert_eq!(s, stage);
                assert_eq!(f, frame);
                assert!(matches!(*reason, MagnifyError::Device(_)));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(pipeline.state(), PipelineState::Failed { stage });
        assert!(pipeline.take_output().is_none());
    }
}
