//! Single-owner GPU buffers that unregister themselves on drop.

use crate::core::memory_tracker::{ResourceId, ResourceRegistry};
use crate::error::{AccelResult, ErrorKind};
use crate::gpu::GpuContext;
use std::fmt;
use std::sync::Arc;
use wgpu::util::DeviceExt;
use wgpu::{Buffer, BufferDescriptor, BufferUsages};

/// Owning handle to a device buffer
///
/// Registered with the context's `ResourceRegistry` while alive. Dropping the
/// handle on any path, including early error returns, releases both the
/// device buffer and its accounting.
pub struct GpuBuffer {
    buffer: Buffer,
    id: ResourceId,
    label: String,
    size: u64,
    usage: BufferUsages,
    registry: Arc<ResourceRegistry>,
}

impl GpuBuffer {
    /// Allocate an uninitialised buffer.
    pub fn new(ctx: &GpuContext, label: &str, size: u64, usage: BufferUsages) -> AccelResult<Self> {
        ctx.registry.check_budget(size)?;
        let buffer = ctx.guarded(label, ErrorKind::Allocation, |device| {
            device.create_buffer(&BufferDescriptor {
                label: Some(label),
                size,
                usage,
                mapped_at_creation: false,
            })
        })?;
        Ok(Self::register(ctx, buffer, label, size, usage))
    }

    /// Allocate a buffer initialised with `contents`.
    pub fn with_contents(
        ctx: &GpuContext,
        label: &str,
        contents: &[u8],
        usage: BufferUsages,
    ) -> AccelResult<Self> {
        let size = contents.len() as u64;
        ctx.registry.check_budget(size)?;
        let buffer = ctx.guarded(label, ErrorKind::Allocation, |device| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage,
            })
        })?;
        Ok(Self::register(ctx, buffer, label, size, usage))
    }

    /// Read-write storage buffer that can also be copied in and out.
    pub fn storage(ctx: &GpuContext, label: &str, size: u64) -> AccelResult<Self> {
        Self::new(
            ctx,
            label,
            size,
            BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
        )
    }

    pub fn storage_init(ctx: &GpuContext, label: &str, contents: &[u8]) -> AccelResult<Self> {
        Self::with_contents(
            ctx,
            label,
            contents,
            BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
        )
    }

    pub fn uniform_init(ctx: &GpuContext, label: &str, contents: &[u8]) -> AccelResult<Self> {
        Self::with_contents(
            ctx,
            label,
            contents,
            BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        )
    }

    /// Host-mappable copy target for readback.
    pub fn readback(ctx: &GpuContext, label: &str, size: u64) -> AccelResult<Self> {
        Self::new(
            ctx,
            label,
            size,
            BufferUsages::MAP_READ | BufferUsages::COPY_DST,
        )
    }

    fn register(
        ctx: &GpuContext,
        buffer: Buffer,
        label: &str,
        size: u64,
        usage: BufferUsages,
    ) -> Self {
        let id = ctx.registry.track_buffer(size, usage);
        log::trace!("allocated {} ({} bytes, {:?})", label, size, id);
        Self {
            buffer,
            id,
            label: label.to_string(),
            size,
            usage,
            registry: ctx.registry.clone(),
        }
    }

    pub fn raw(&self) -> &Buffer {
        &self.buffer
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> BufferUsages {
        self.usage
    }

    pub fn as_entire_binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.registry.free_buffer(self.size, self.usage);
    }
}

impl fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuBuffer")
            .field("label", &self.label)
            .field("id", &self.id)
            .field("size", &self.size)
            .field("usage", &self.usage)
            .finish()
    }
}
