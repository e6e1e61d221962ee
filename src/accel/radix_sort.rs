// src/accel/radix_sort.rs
// GPU LSD radix sort of Morton entries: four 8-bit digits, each a count / prefix-sum / scatter triple.
// Every sub-pass is its own dispatch with a hazard barrier on the buffers it hands to the next one.
// RELEVANT FILES:src/shaders/sort_count.wgsl,src/shaders/sort_prefix_sum.wgsl,src/shaders/sort_scatter.wgsl

use crate::accel::kernels::KernelSources;
use crate::accel::types::MortonEntry;
use crate::core::compute::{Binding, ComputeKernel, PassRecorder};
use crate::core::resource::GpuBuffer;
use crate::error::{AccelError, AccelResult};
use crate::gpu::{workgroups_for, GpuContext};
use bytemuck::{Pod, Zeroable};

/// Bits consumed per pass
pub const RADIX_BITS: u32 = 8;
/// Buckets per pass
pub const RADIX_BUCKETS: usize = 1 << RADIX_BITS;
/// Passes needed for a 32-bit key
pub const RADIX_PASSES: u32 = 32 / RADIX_BITS;

/// Uniforms for one digit of the sort
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SortUniforms {
    count: u32,
    shift: u32,
    _pad0: u32,
    _pad1: u32,
}

/// Sorts a `MortonEntry` buffer ascending by key, in place
///
/// Passes ping-pong between the caller's buffer and an internal scratch
/// buffer; with an even number of passes the result ends in the caller's.
pub struct RadixSortStage {
    count_kernel: ComputeKernel,
    prefix_kernel: ComputeKernel,
    scatter_kernel: ComputeKernel,
    /// One uniform block per digit
    digit_uniforms: Vec<GpuBuffer>,
    scratch: GpuBuffer,
    histogram: GpuBuffer,
    offsets: GpuBuffer,
    count: u32,
}

impl RadixSortStage {
    pub fn new(ctx: &GpuContext, kernels: &KernelSources, count: u32) -> AccelResult<Self> {
        if count == 0 {
            return Err(AccelError::precondition("radix sort of zero entries"));
        }

        let count_kernel = ComputeKernel::new(
            ctx,
            "sort-count",
            &kernels.sort_count,
            KernelSources::ENTRY_POINT,
            &[Binding::Uniform, Binding::READ, Binding::READ_WRITE],
        )?;
        let prefix_kernel = ComputeKernel::new(
            ctx,
            "sort-prefix-sum",
            &kernels.sort_prefix_sum,
            KernelSources::ENTRY_POINT,
            &[Binding::READ, Binding::READ_WRITE],
        )?;
        let scatter_kernel = ComputeKernel::new(
            ctx,
            "sort-scatter",
            &kernels.sort_scatter,
            KernelSources::ENTRY_POINT,
            &[
                Binding::Uniform,
                Binding::READ,
                Binding::READ,
                Binding::READ_WRITE,
            ],
        )?;

        let digit_uniforms = (0..RADIX_PASSES)
            .map(|digit| {
                let uniforms = SortUniforms {
                    count,
                    shift: digit * RADIX_BITS,
                    _pad0: 0,
                    _pad1: 0,
                };
                GpuBuffer::uniform_init(
                    ctx,
                    &format!("sort-uniforms-{}", digit),
                    bytemuck::bytes_of(&uniforms),
                )
            })
            .collect::<AccelResult<Vec<_>>>()?;

        let entry_bytes = count as u64 * std::mem::size_of::<MortonEntry>() as u64;
        let bucket_bytes = (RADIX_BUCKETS * std::mem::size_of::<u32>()) as u64;
        let scratch = GpuBuffer::storage(ctx, "sort-scratch", entry_bytes)?;
        let histogram = GpuBuffer::storage(ctx, "sort-histogram", bucket_bytes)?;
        let offsets = GpuBuffer::storage(ctx, "sort-offsets", bucket_bytes)?;

        Ok(Self {
            count_kernel,
            prefix_kernel,
            scatter_kernel,
            digit_uniforms,
            scratch,
            histogram,
            offsets,
            count,
        })
    }

    /// Record all four digit passes over `entries`.
    ///
    /// `entries` must not have an unbarriered write pending.
    pub fn record(&self, pass: &mut PassRecorder<'_>, entries: &GpuBuffer) -> AccelResult<()> {
        let needed = self.count as u64 * std::mem::size_of::<MortonEntry>() as u64;
        if entries.size() < needed {
            return Err(AccelError::precondition(format!(
                "'{}' holds {} bytes, sort of {} entries needs {}",
                entries.label(),
                entries.size(),
                self.count,
                needed
            )));
        }

        let workgroups = workgroups_for(self.count, crate::config::KERNEL_WORKGROUP_SIZE);
        for digit in 0..RADIX_PASSES as usize {
            let (src, dst) = if digit % 2 == 0 {
                (entries, &self.scratch)
            } else {
                (&self.scratch, entries)
            };
            let uniforms = &self.digit_uniforms[digit];

            pass.clear(&self.histogram)?;
            pass.barrier(&[&self.histogram]);

            pass.dispatch(&self.count_kernel, &[uniforms, src, &self.histogram], workgroups)?;
            pass.barrier(&[&self.histogram]);

            pass.dispatch(&self.prefix_kernel, &[&self.histogram, &self.offsets], 1)?;
            pass.barrier(&[&self.histogram, &self.offsets]);

            pass.dispatch(
                &self.scatter_kernel,
                &[uniforms, src, &self.offsets, dst],
                1,
            )?;
            pass.barrier(&[src, &self.offsets, dst]);

            log::debug!("recorded sort digit {} ({} -> {})", digit, src.label(), dst.label());
        }
        Ok(())
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Device bytes owned by this stage
    pub fn memory_usage_bytes(&self) -> u64 {
        self.scratch.size()
            + self.histogram.size()
            + self.offsets.size()
            + self.digit_uniforms.iter().map(|b| b.size()).sum::<u64>()
    }
}
