use crate::config::DeviceConfig;
use crate::core::memory_tracker::ResourceRegistry;
use crate::error::{AccelError, AccelResult, ErrorKind};
use std::sync::Arc;

/// Device capability handed to the scheduler and every stage.
///
/// Owned by the caller and passed explicitly; nothing in this crate keeps a
/// process-wide device.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_info: Option<wgpu::AdapterInfo>,
    pub registry: Arc<ResourceRegistry>,
}

impl GpuContext {
    /// Request a headless adapter and device. `Ok(None)` when no adapter exists.
    pub fn headless(config: &DeviceConfig) -> AccelResult<Option<Self>> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = match pollster::block_on(instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: config.power_preference.into(),
                compatible_surface: None,
                force_fallback_adapter: config.force_fallback_adapter,
            },
        )) {
            Some(adapter) => adapter,
            None => {
                log::warn!("no suitable GPU adapter found");
                return Ok(None);
            }
        };

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some(&config.label),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))
        .map_err(|e| AccelError::allocation(format!("request_device failed: {}", e)))?;

        let info = adapter.get_info();
        log::info!("using adapter '{}' ({:?})", info.name, info.backend);

        Ok(Some(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info: Some(info),
            registry: Arc::new(ResourceRegistry::new()),
        }))
    }

    /// Wrap a device and queue created elsewhere
    pub fn from_parts(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            adapter_info: None,
            registry: Arc::new(ResourceRegistry::new()),
        }
    }

    /// Run `f` inside out-of-memory and validation error scopes and turn any
    /// captured device error into an `AccelError` of the given kind.
    pub fn guarded<T>(
        &self,
        what: &str,
        kind: ErrorKind,
        f: impl FnOnce(&wgpu::Device) -> T,
    ) -> AccelResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());

        match oom.or(validation) {
            None => Ok(value),
            Some(err) => {
                let msg = format!("{}: {}", what, err);
                Err(match kind {
                    ErrorKind::Allocation => AccelError::Allocation(msg),
                    ErrorKind::Submission => AccelError::Submission(msg),
                    ErrorKind::Precondition => AccelError::Precondition(msg),
                })
            }
        }
    }
}

/// Number of workgroups needed to cover `count` invocations
#[inline]
pub fn workgroups_for(count: u32, workgroup_size: u32) -> u32 {
    ((count + workgroup_size - 1) / workgroup_size).max(1)
}
