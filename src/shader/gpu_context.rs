//! Process-wide GPU device and submission queue.

use crate::error::BackendError;
use std::sync::{Arc, OnceLock};
use tracing::{error, info};

static SHARED: OnceLock<Result<GpuContext, BackendError>> = OnceLock::new();

/// The one device and queue every pipeline and command buffer goes through.
///
/// Created lazily on first use and never torn down.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Returns the shared context, creating it on the first call.
    ///
    /// An error means no compatible compute device exists; it is cached, so
    /// later calls fail the same way without probing again.
    pub fn shared() -> Result<&'static GpuContext, BackendError> {
        SHARED.get_or_init(Self::create).as_ref().map_err(Clone::clone)
    }

    fn create() -> Result<Self, BackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| BackendError::NoCompatibleDevice(format!("{:?}", e)))?;

        let adapter_info = adapter.get_info();
        let downlevel = adapter.get_downlevel_capabilities();
        if !downlevel.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
            return Err(BackendError::NoCompatibleDevice(format!(
                "{} ({:?}) has no compute shader support",
                adapter_info.name, adapter_info.backend
            )));
        }

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("filterkit device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))
        .map_err(|e| BackendError::DeviceCreation(e.to_string()))?;

        // Errors outside an error scope are logged instead of aborting the process.
        device.on_uncaptured_error(Arc::new(|e: wgpu::Error| error!("Uncaptured GPU error: {}", e)));
        info!("Using GPU adapter {} ({:?})", adapter_info.name, adapter_info.backend);

        Ok(Self {
            device,
            queue,
            adapter_info,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The single FIFO queue all dispatches are submitted to.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext")
            .field("adapter", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .finish()
    }
}
