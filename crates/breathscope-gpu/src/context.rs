//! GPU context management.
//!
//! A [`GpuContext`] is created once per batch run and passed explicitly to
//! every resource and pipeline call. There is no process-wide device.

use breathscope_core::{BackendSelection, DeviceConfig, MagnifyError, PowerPreference, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Lifecycle status of a device context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStatus {
    /// Not acquired yet, or already released.
    Uninitialized,
    Ready,
    /// The device reported an uncaptured error.
    Error,
}

#[derive(Debug)]
struct ContextState {
    status: ContextStatus,
    last_error: Option<String>,
}

/// GPU context holding adapter, device and queue.
pub struct GpuContext {
    pub adapter: wgpu::Adapter,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    state: Arc<Mutex<ContextState>>,
    released: bool,
}

fn backends_for(selection: BackendSelection) -> wgpu::Backends {
    match selection {
        BackendSelection::Primary => wgpu::Backends::PRIMARY,
        BackendSelection::All => wgpu::Backends::all(),
        BackendSelection::None => wgpu::Backends::empty(),
    }
}

fn adapter_options(config: &DeviceConfig) -> wgpu::RequestAdapterOptions<'static, 'static> {
    wgpu::RequestAdapterOptions {
        power_preference: match config.power {
            PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
            PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
        },
        compatible_surface: None,
        force_fallback_adapter: false,
    }
}

fn new_instance(config: &DeviceConfig) -> wgpu::Instance {
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: backends_for(config.backends),
        ..Default::default()
    })
}

/// Check whether a compute-capable adapter exists, without creating a device.
pub fn probe_capability() -> bool {
    probe_capability_with(&DeviceConfig::default())
}

/// [`probe_capability`] with explicit backend and power settings.
pub fn probe_capability_with(config: &DeviceConfig) -> bool {
    if config.backends == BackendSelection::None {
        return false;
    }
    let instance = new_instance(config);
    match pollster::block_on(instance.request_adapter(&adapter_options(config))) {
        Some(adapter) => adapter
            .get_downlevel_capabilities()
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS),
        None => false,
    }
}

impl GpuContext {
    /// Acquire a context with default settings.
    pub async fn acquire() -> Result<Self> {
        Self::acquire_with(&DeviceConfig::default()).await
    }

    /// Request an adapter, then a device.
    ///
    /// Fails with `NoAdapter` when no backend offers an adapter and with
    /// `DeviceRequestFailed` when the adapter refuses the device.
    pub async fn acquire_with(config: &DeviceConfig) -> Result<Self> {
        if config.backends == BackendSelection::None {
            return Err(MagnifyError::NoAdapter);
        }

        let instance = new_instance(config);
        let adapter = instance
            .request_adapter(&adapter_options(config))
            .await
            .ok_or(MagnifyError::NoAdapter)?;

        info!("Using GPU adapter: {:?}", adapter.get_info());

        let downlevel = adapter.get_downlevel_capabilities();
        if !downlevel.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
            return Err(MagnifyError::DeviceRequestFailed(
                "adapter does not support compute shaders".into(),
            ));
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Breathscope Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults()
                        .using_resolution(adapter.limits()),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| MagnifyError::DeviceRequestFailed(e.to_string()))?;

        let state = Arc::new(Mutex::new(ContextState {
            status: ContextStatus::Ready,
            last_error: None,
        }));

        // Device faults arrive asynchronously; record them instead of panicking.
        let handler_state = Arc::clone(&state);
        device.on_uncaptured_error(Box::new(move |err| {
            error!(error = %err, "Uncaptured GPU error");
            let mut state = handler_state.lock();
            if state.status == ContextStatus::Ready {
                state.status = ContextStatus::Error;
            }
            state.last_error = Some(err.to_string());
        }));

        Ok(Self {
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
            state,
            released: false,
        })
    }

    /// Blocking version of [`GpuContext::acquire_with`].
    pub fn acquire_blocking(config: &DeviceConfig) -> Result<Self> {
        pollster::block_on(Self::acquire_with(config))
    }

    pub fn status(&self) -> ContextStatus {
        self.state.lock().status
    }

    /// Most recent uncaptured device error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    /// Fail if the context was released or the device reported an error.
    pub fn ensure_ready(&self) -> Result<()> {
        let state = self.state.lock();
        match state.status {
            ContextStatus::Ready => Ok(()),
            ContextStatus::Uninitialized => Err(MagnifyError::ContextReleased),
            ContextStatus::Error => Err(MagnifyError::Device(
                state
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "unknown device error".into()),
            )),
        }
    }

    /// Run `f` inside validation and out-of-memory error scopes and return
    /// the first error the device reported for it.
    pub(crate) fn scoped<T>(&self, f: impl FnOnce() -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        (value, validation.or(oom))
    }

    /// Submit recorded commands. Returns immediately.
    pub fn submit(&self, encoder: wgpu::CommandEncoder) -> Result<wgpu::SubmissionIndex> {
        self.ensure_ready()?;
        Ok(self.queue.submit(std::iter::once(encoder.finish())))
    }

    pub fn create_encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    /// Wait until `submission` has finished on the device, firing the map
    /// callbacks it unblocks. The wait runs on tokio's blocking pool so the
    /// calling worker stays free.
    pub async fn wait_for_submission(&self, submission: wgpu::SubmissionIndex) -> Result<()> {
        let device = Arc::clone(&self.device);
        tokio::task::spawn_blocking(move || {
            device.poll(wgpu::Maintain::wait_for(submission));
        })
        .await
        .map_err(|e| MagnifyError::ReadbackFailed(format!("device poll task failed: {e}")))
    }

    /// Destroy the device. Every resource created from this context becomes
    /// invalid. Calling it more than once is a no-op.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.device.destroy();
        let mut state = self.state.lock();
        state.status = ContextStatus::Uninitialized;
        debug!("GPU context released");
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        self.release();
    }
}
