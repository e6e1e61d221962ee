// src/accel/bvh_build.rs
// Bottom-up BVH build over Morton-sorted entries: leaf pass, pairwise reduction passes, root pass.
// Nodes live in one flat array (root at 0, leaves from 1, each level appended after the last).
// RELEVANT FILES:src/shaders/bvh_leaves.wgsl,src/shaders/bvh_reduce.wgsl,src/accel/host.rs,src/accel/pipeline.rs

use crate::accel::kernels::KernelSources;
use crate::accel::mesh::GpuMesh;
use crate::accel::types::{BuildCursor, BuildState, BvhNode, CursorUniforms, MortonEntry};
use crate::core::compute::{Binding, ComputeKernel, PassRecorder};
use crate::core::resource::GpuBuffer;
use crate::error::{AccelError, AccelResult};
use crate::gpu::{workgroups_for, GpuContext};

/// Where the root lives in every node array
pub const ROOT_INDEX: u32 = 0;
/// First leaf slot
pub const FIRST_LEAF_INDEX: u32 = 1;

/// Every pass of one build, in dispatch order, and the node array size
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSchedule {
    leaf: BuildCursor,
    reductions: Vec<BuildCursor>,
    root: BuildCursor,
    node_count: u32,
}

impl BuildSchedule {
    pub fn leaf_pass(&self) -> BuildCursor {
        self.leaf
    }

    pub fn reduction_passes(&self) -> &[BuildCursor] {
        &self.reductions
    }

    pub fn root_pass(&self) -> BuildCursor {
        self.root
    }

    /// Nodes the array must hold, root included
    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    pub fn leaf_count(&self) -> u32 {
        self.leaf.output_count()
    }

    pub fn primitive_count(&self) -> u32 {
        self.leaf.remaining_count
    }

    /// Leaf, reductions and root
    pub fn pass_count(&self) -> usize {
        self.reductions.len() + 2
    }
}

/// Decides which inputs each output node unions.
///
/// The GPU kernels in `KernelSources` must pair the same way as `pair`;
/// swapping the rule means swapping `bvh_leaves` and `bvh_reduce` with it.
pub trait PairingRule: Send + Sync {
    fn name(&self) -> &str;

    /// Lay out every pass for `primitive_count` primitives.
    fn schedule(&self, primitive_count: u32) -> AccelResult<BuildSchedule>;

    /// Input indices (relative to the level) unioned into output `slot` of a
    /// level with `count` inputs.
    fn pair(&self, slot: u32, count: u32) -> (u32, u32);
}

/// Adjacent pairs; the last input of an odd level pairs with itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct PairwiseHalving;

impl PairingRule for PairwiseHalving {
    fn name(&self) -> &str {
        "pairwise-halving"
    }

    fn schedule(&self, primitive_count: u32) -> AccelResult<BuildSchedule> {
        if primitive_count == 0 {
            return Err(AccelError::precondition(
                "BVH build requested with zero primitives",
            ));
        }

        let leaf = BuildCursor {
            remaining_count: primitive_count,
            previous_level_base: 0,
            current_level_base: FIRST_LEAF_INDEX,
        };
        let mut remaining = leaf.output_count();
        let mut previous = FIRST_LEAF_INDEX;
        let mut current = FIRST_LEAF_INDEX + remaining;

        let mut reductions = Vec::new();
        while remaining > 2 {
            let cursor = BuildCursor {
                remaining_count: remaining,
                previous_level_base: previous,
                current_level_base: current,
            };
            reductions.push(cursor);
            remaining = cursor.output_count();
            previous = current;
            current = current.checked_add(remaining).ok_or_else(|| {
                AccelError::precondition(format!(
                    "{} primitives overflow a 32-bit node index",
                    primitive_count
                ))
            })?;
        }

        Ok(BuildSchedule {
            leaf,
            reductions,
            root: BuildCursor {
                remaining_count: remaining,
                previous_level_base: previous,
                current_level_base: ROOT_INDEX,
            },
            node_count: current,
        })
    }

    fn pair(&self, slot: u32, count: u32) -> (u32, u32) {
        let left = 2 * slot;
        (left, (left + 1).min(count - 1))
    }
}

/// Records the leaf, reduction and root passes into a flat node buffer
pub struct BvhBuildStage<R: PairingRule = PairwiseHalving> {
    rule: R,
    schedule: BuildSchedule,
    leaf_kernel: ComputeKernel,
    reduce_kernel: ComputeKernel,
    leaf_uniforms: GpuBuffer,
    reduce_uniforms: Vec<GpuBuffer>,
    root_uniforms: GpuBuffer,
    nodes: GpuBuffer,
}

impl BvhBuildStage<PairwiseHalving> {
    pub fn new(ctx: &GpuContext, kernels: &KernelSources, primitive_count: u32) -> AccelResult<Self> {
        Self::with_rule(ctx, kernels, primitive_count, PairwiseHalving)
    }
}

impl<R: PairingRule> BvhBuildStage<R> {
    pub fn with_rule(
        ctx: &GpuContext,
        kernels: &KernelSources,
        primitive_count: u32,
        rule: R,
    ) -> AccelResult<Self> {
        let schedule = rule.schedule(primitive_count)?;

        let leaf_kernel = ComputeKernel::new(
            ctx,
            "bvh-leaves",
            &kernels.bvh_leaves,
            KernelSources::ENTRY_POINT,
            &[
                Binding::Uniform,
                Binding::READ,
                Binding::READ,
                Binding::READ,
                Binding::READ_WRITE,
            ],
        )?;
        let reduce_kernel = ComputeKernel::new(
            ctx,
            "bvh-reduce",
            &kernels.bvh_reduce,
            KernelSources::ENTRY_POINT,
            &[Binding::Uniform, Binding::READ_WRITE],
        )?;

        let cursor_buffer = |label: &str, cursor: BuildCursor| {
            GpuBuffer::uniform_init(
                ctx,
                label,
                bytemuck::bytes_of(&CursorUniforms::from(cursor)),
            )
        };
        let leaf_uniforms = cursor_buffer("bvh-cursor-leaves", schedule.leaf_pass())?;
        let reduce_uniforms = schedule
            .reduction_passes()
            .iter()
            .enumerate()
            .map(|(k, c)| cursor_buffer(&format!("bvh-cursor-reduce-{}", k), *c))
            .collect::<AccelResult<Vec<_>>>()?;
        let root_uniforms = cursor_buffer("bvh-cursor-root", schedule.root_pass())?;

        let nodes = GpuBuffer::storage(
            ctx,
            "bvh-nodes",
            schedule.node_count() as u64 * std::mem::size_of::<BvhNode>() as u64,
        )?;

        log::debug!(
            "BVH stage ({}): {} primitives, {} leaves, {} reduction passes, {} nodes",
            rule.name(),
            primitive_count,
            schedule.leaf_count(),
            schedule.reduction_passes().len(),
            schedule.node_count()
        );

        Ok(Self {
            rule,
            schedule,
            leaf_kernel,
            reduce_kernel,
            leaf_uniforms,
            reduce_uniforms,
            root_uniforms,
            nodes,
        })
    }

    /// Record every build pass, advancing `state` from `Sorting` to `Done`.
    ///
    /// On error `state` is left at the pass that failed.
    pub fn record(
        &self,
        pass: &mut PassRecorder<'_>,
        mesh: &GpuMesh,
        sorted: &GpuBuffer,
        state: &mut BuildState,
    ) -> AccelResult<()> {
        if *state != BuildState::Sorting {
            return Err(AccelError::precondition(format!(
                "BVH passes recorded in state '{}', expected sorted entries",
                state
            )));
        }
        let primitives = self.schedule.primitive_count();
        if mesh.triangle_count() != primitives {
            return Err(AccelError::precondition(format!(
                "BVH stage sized for {} primitives, mesh has {}",
                primitives,
                mesh.triangle_count()
            )));
        }
        let needed = primitives as u64 * std::mem::size_of::<MortonEntry>() as u64;
        if sorted.size() < needed {
            return Err(AccelError::precondition(format!(
                "'{}' is too small for {} sorted entries",
                sorted.label(),
                primitives
            )));
        }

        let wg = crate::config::KERNEL_WORKGROUP_SIZE;

        *state = BuildState::BuildingLeaves;
        pass.barrier(&[&self.nodes]);
        pass.dispatch(
            &self.leaf_kernel,
            &[
                &self.leaf_uniforms,
                mesh.vertices(),
                mesh.indices(),
                sorted,
                &self.nodes,
            ],
            workgroups_for(self.schedule.leaf_count(), wg),
        )?;
        pass.barrier(&[&self.nodes]);

        for (k, (cursor, uniforms)) in self
            .schedule
            .reduction_passes()
            .iter()
            .zip(&self.reduce_uniforms)
            .enumerate()
        {
            *state = BuildState::Reducing(k as u32);
            pass.dispatch(
                &self.reduce_kernel,
                &[uniforms, &self.nodes],
                workgroups_for(cursor.output_count(), wg),
            )?;
            pass.barrier(&[&self.nodes]);
        }

        *state = BuildState::BuildingRoot;
        pass.dispatch(&self.reduce_kernel, &[&self.root_uniforms, &self.nodes], 1)?;
        pass.barrier(&[&self.nodes]);

        *state = BuildState::Done;
        Ok(())
    }

    pub fn rule(&self) -> &R {
        &self.rule
    }

    pub fn schedule(&self) -> &BuildSchedule {
        &self.schedule
    }

    /// Flat node array; only meaningful after a successful `record` has executed
    pub fn nodes(&self) -> &GpuBuffer {
        &self.nodes
    }

    pub fn memory_usage_bytes(&self) -> u64 {
        self.nodes.size()
            + self.leaf_uniforms.size()
            + self.root_uniforms.size()
            + self.reduce_uniforms.iter().map(|b| b.size()).sum::<u64>()
    }
}
