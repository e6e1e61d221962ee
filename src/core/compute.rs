//! Compute kernels and the barrier-checked pass recorder.

use crate::core::barriers::{Access, HazardTracker};
use crate::core::resource::GpuBuffer;
use crate::error::{AccelError, AccelResult, ErrorKind};
use crate::gpu::GpuContext;
use wgpu::{BindGroupLayout, CommandEncoder, ComputePipeline};

/// Binding slot kinds a kernel declares, in binding order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Uniform,
    Storage { read_only: bool },
}

impl Binding {
    pub const READ: Binding = Binding::Storage { read_only: true };
    pub const READ_WRITE: Binding = Binding::Storage { read_only: false };

    fn access(self) -> Access {
        match self {
            Binding::Uniform | Binding::Storage { read_only: true } => Access::Read,
            Binding::Storage { read_only: false } => Access::Write,
        }
    }

    fn layout_entry(self, binding: u32) -> wgpu::BindGroupLayoutEntry {
        let ty = match self {
            Binding::Uniform => wgpu::BufferBindingType::Uniform,
            Binding::Storage { read_only } => wgpu::BufferBindingType::Storage { read_only },
        };
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }
}

/// A compiled compute pipeline with an explicit single bind group layout
pub struct ComputeKernel {
    label: String,
    pipeline: ComputePipeline,
    layout: BindGroupLayout,
    bindings: Vec<Binding>,
}

impl ComputeKernel {
    /// Compile `source` and build a pipeline for `entry_point`.
    ///
    /// Bindings are numbered 0.. in group 0 in the order given.
    pub fn new(
        ctx: &GpuContext,
        label: &str,
        source: &str,
        entry_point: &str,
        bindings: &[Binding],
    ) -> AccelResult<Self> {
        let entries: Vec<_> = bindings
            .iter()
            .enumerate()
            .map(|(i, b)| b.layout_entry(i as u32))
            .collect();

        let (pipeline, layout) = ctx.guarded(label, ErrorKind::Allocation, |device| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &entries,
            });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[&layout],
                push_constant_ranges: &[],
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point,
            });
            (pipeline, layout)
        })?;

        Ok(Self {
            label: label.to_string(),
            pipeline,
            layout,
            bindings: bindings.to_vec(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }
}

/// Records dispatches into one command encoder, one compute pass per
/// dispatch, refusing any dispatch that would race an unbarriered write.
pub struct PassRecorder<'a> {
    ctx: &'a GpuContext,
    encoder: &'a mut CommandEncoder,
    tracker: &'a mut HazardTracker,
}

impl<'a> PassRecorder<'a> {
    pub fn new(
        ctx: &'a GpuContext,
        encoder: &'a mut CommandEncoder,
        tracker: &'a mut HazardTracker,
    ) -> Self {
        Self {
            ctx,
            encoder,
            tracker,
        }
    }

    pub fn context(&self) -> &GpuContext {
        self.ctx
    }

    pub fn tracker(&self) -> &HazardTracker {
        self.tracker
    }

    /// Bind `buffers` to `kernel` (binding i = buffers[i]) and dispatch.
    pub fn dispatch(
        &mut self,
        kernel: &ComputeKernel,
        buffers: &[&GpuBuffer],
        workgroups: u32,
    ) -> AccelResult<()> {
        if buffers.len() != kernel.bindings.len() {
            return Err(AccelError::precondition(format!(
                "kernel '{}' takes {} bindings, got {}",
                kernel.label,
                kernel.bindings.len(),
                buffers.len()
            )));
        }

        let accesses: Vec<_> = kernel
            .bindings
            .iter()
            .zip(buffers)
            .map(|(binding, buffer)| (buffer.id(), buffer.label(), binding.access()))
            .collect();
        self.tracker.check(&kernel.label, &accesses)?;

        let entries: Vec<_> = buffers
            .iter()
            .enumerate()
            .map(|(i, buffer)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let bind_group = self
            .ctx
            .guarded(&kernel.label, ErrorKind::Submission, |device| {
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&kernel.label),
                    layout: &kernel.layout,
                    entries: &entries,
                })
            })?;

        {
            let mut pass = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&kernel.label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }

        self.tracker.record(&kernel.label, &accesses);
        log::trace!("dispatched '{}' x{}", kernel.label, workgroups);
        Ok(())
    }

    /// Zero a buffer with a transfer command; counts as a write.
    pub fn clear(&mut self, buffer: &GpuBuffer) -> AccelResult<()> {
        let access = [(buffer.id(), buffer.label(), Access::Write)];
        self.tracker.check("clear", &access)?;
        self.encoder.clear_buffer(buffer.raw(), 0, None);
        self.tracker.record("clear", &access);
        Ok(())
    }

    /// Copy `size` bytes from the start of `src` to the start of `dst`.
    pub fn copy(&mut self, src: &GpuBuffer, dst: &GpuBuffer, size: u64) -> AccelResult<()> {
        let accesses = [
            (src.id(), src.label(), Access::Read),
            (dst.id(), dst.label(), Access::Write),
        ];
        self.tracker.check("copy", &accesses)?;
        self.encoder
            .copy_buffer_to_buffer(src.raw(), 0, dst.raw(), 0, size);
        self.tracker.record("copy", &accesses);
        Ok(())
    }

    /// Hazard barrier over `buffers`.
    ///
    /// wgpu synchronises storage writes at compute pass boundaries and every
    /// dispatch above ends its own pass, so the device side needs no extra
    /// command here; the tracker enforces that one is placed.
    pub fn barrier(&mut self, buffers: &[&GpuBuffer]) {
        let ids: Vec<_> = buffers.iter().map(|b| b.id()).collect();
        self.tracker.barrier(&ids);
    }
}
