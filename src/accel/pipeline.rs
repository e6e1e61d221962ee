// src/accel/pipeline.rs
// Morton -> radix sort -> BVH build orchestration on top of the task scheduler.
// Owns the stages and the mesh, walks the build state machine and drives per-frame rebuilds.
// RELEVANT FILES:src/accel/morton.rs,src/accel/radix_sort.rs,src/accel/bvh_build.rs,src/core/scheduler.rs

use crate::accel::bvh_build::{BuildSchedule, BvhBuildStage, PairingRule, PairwiseHalving};
use crate::accel::kernels::KernelSources;
use crate::accel::mesh::{GpuMesh, MeshSource};
use crate::accel::morton::MortonCodeStage;
use crate::accel::radix_sort::{RadixSortStage, RADIX_BUCKETS};
use crate::accel::types::{Aabb, BuildState, BuildStats, BvhNode, CursorUniforms, MortonEntry};
use crate::config::AccelConfig;
use crate::core::barriers::HazardTracker;
use crate::core::compute::PassRecorder;
use crate::core::memory_tracker::check_within;
use crate::core::queue::WgpuQueue;
use crate::core::readback::read_buffer;
use crate::core::resource::GpuBuffer;
use crate::core::scheduler::TaskScheduler;
use crate::error::{AccelError, AccelResult};
use crate::gpu::GpuContext;
use std::mem::size_of;
use std::time::Instant;
use wgpu::CommandEncoder;

/// Device bytes a build of this size allocates, mesh included
pub fn estimate_memory_bytes(primitive_count: u32, vertex_count: u32, node_count: u32) -> u64 {
    let entries = primitive_count as u64 * size_of::<MortonEntry>() as u64;
    let mesh = vertex_count as u64 * 16 + primitive_count as u64 * 12;
    let buckets = 2 * (RADIX_BUCKETS * size_of::<u32>()) as u64;
    let nodes = node_count as u64 * size_of::<BvhNode>() as u64;
    // two entry buffers (keys + sort scratch); uniforms are small enough to
    // bound by a generous per-pass allowance
    let uniforms = 64 * size_of::<CursorUniforms>() as u64;
    2 * entries + mesh + buckets + nodes + uniforms
}

/// GPU BVH over one mesh
pub struct BvhPipeline<R: PairingRule = PairwiseHalving> {
    ctx: GpuContext,
    source: MeshSource,
    mesh: GpuMesh,
    morton: MortonCodeStage,
    sort: RadixSortStage,
    bvh: BvhBuildStage<R>,
    state: BuildState,
    rebuild_pending: bool,
    last_stats: Option<BuildStats>,
}

impl BvhPipeline<PairwiseHalving> {
    /// Upload `mesh` and allocate every stage with the built-in kernels.
    pub fn new(
        scheduler: &mut TaskScheduler<WgpuQueue>,
        mesh: &MeshSource,
        config: &AccelConfig,
    ) -> AccelResult<Self> {
        Self::with_parts(
            scheduler,
            mesh,
            config,
            &KernelSources::default(),
            PairwiseHalving,
        )
    }
}

impl<R: PairingRule> BvhPipeline<R> {
    /// Like `new`, with custom kernel sources and pairing rule.
    ///
    /// `config.memory_budget_bytes` bounds this pipeline's own estimate; the
    /// context's shared registry limit is checked but left unchanged.
    pub fn with_parts(
        scheduler: &mut TaskScheduler<WgpuQueue>,
        mesh: &MeshSource,
        config: &AccelConfig,
        kernels: &KernelSources,
        rule: R,
    ) -> AccelResult<Self> {
        config.validate()?;
        mesh.validate()?;
        let ctx = scheduler.queue().context().clone();
        let primitive_count = mesh.triangle_count() as u32;

        let schedule = rule.schedule(primitive_count)?;
        let estimate =
            estimate_memory_bytes(primitive_count, mesh.vertices.len() as u32, schedule.node_count());
        check_within(config.memory_budget_bytes, 0, estimate)?;
        ctx.registry.check_budget(estimate)?;

        let gpu_mesh = GpuMesh::upload(scheduler, mesh)?;
        let scene = mesh.scene_aabb();
        let morton = MortonCodeStage::new(&ctx, kernels, primitive_count, scene)?;
        let sort = RadixSortStage::new(&ctx, kernels, primitive_count)?;
        let bvh = BvhBuildStage::with_rule(&ctx, kernels, primitive_count, rule)?;

        log::info!(
            "BVH pipeline ready: {} primitives, {} nodes, ~{} KiB",
            primitive_count,
            schedule.node_count(),
            estimate / 1024
        );

        Ok(Self {
            ctx,
            source: mesh.clone(),
            mesh: gpu_mesh,
            morton,
            sort,
            bvh,
            state: BuildState::Idle,
            rebuild_pending: true,
            last_stats: None,
        })
    }

    /// Record a full Morton -> sort -> build into the slot that is recording.
    ///
    /// On failure the state stays short of `Done` and the next build starts
    /// again from `Idle`.
    pub fn record_build(&mut self, scheduler: &mut TaskScheduler<WgpuQueue>) -> AccelResult<BuildStats> {
        let started = Instant::now();
        self.state = BuildState::Idle;

        let encoder = scheduler.encoder()?;
        let mut tracker = HazardTracker::new();
        let mut pass = PassRecorder::new(&self.ctx, encoder, &mut tracker);

        self.state = BuildState::Sorting;
        let t = Instant::now();
        self.morton.record(&mut pass, &self.mesh)?;
        pass.barrier(&[self.morton.entries()]);
        let morton_time_ms = t.elapsed().as_secs_f32() * 1000.0;

        let t = Instant::now();
        self.sort.record(&mut pass, self.morton.entries())?;
        let sort_time_ms = t.elapsed().as_secs_f32() * 1000.0;

        let t = Instant::now();
        self.bvh
            .record(&mut pass, &self.mesh, self.morton.entries(), &mut self.state)?;
        let reduce_time_ms = t.elapsed().as_secs_f32() * 1000.0;

        let schedule = self.bvh.schedule();
        let stats = BuildStats {
            build_time_ms: started.elapsed().as_secs_f32() * 1000.0,
            morton_time_ms,
            sort_time_ms,
            reduce_time_ms,
            primitive_count: schedule.primitive_count(),
            leaf_count: schedule.leaf_count(),
            node_count: schedule.node_count(),
            reduction_passes: schedule.reduction_passes().len() as u32,
            dispatch_count: tracker.dispatch_count(),
            barrier_count: tracker.barrier_count(),
            memory_usage_bytes: self.memory_usage_bytes(),
        };
        log::info!(
            "recorded BVH build: {} primitives, {} dispatches, {} barriers in {:.2} ms",
            stats.primitive_count,
            stats.dispatch_count,
            stats.barrier_count,
            stats.build_time_ms
        );

        self.rebuild_pending = false;
        self.last_stats = Some(stats.clone());
        Ok(stats)
    }

    /// Build in a frame of its own: record, build, execute.
    pub fn build(&mut self, scheduler: &mut TaskScheduler<WgpuQueue>) -> AccelResult<BuildStats> {
        scheduler.record()?;
        let built = self.record_build(scheduler);
        let submitted = scheduler.execute();
        match (built, submitted) {
            (Ok(stats), Ok(())) => Ok(stats),
            (Ok(_), Err(e)) => {
                self.discard_unsubmitted_build();
                Err(e)
            }
            (Err(e), submitted) => {
                if let Err(submit_err) = submitted {
                    log::warn!("submitting aborted build also failed: {}", submit_err);
                }
                log::error!("BVH build failed in state '{}': {}", self.state, e);
                Err(e)
            }
        }
    }

    /// One frame: record, rebuild if one is pending, hand the encoder and the
    /// finished node buffer to `work`, execute.
    ///
    /// A failed build skips `work`; the frame is still submitted so the
    /// scheduler stays balanced.
    pub fn frame<F>(&mut self, scheduler: &mut TaskScheduler<WgpuQueue>, work: F) -> AccelResult<()>
    where
        F: FnOnce(&mut CommandEncoder, &GpuBuffer) -> AccelResult<()>,
    {
        scheduler.record()?;

        let rebuilding = self.rebuild_pending;
        let built = if rebuilding {
            self.record_build(scheduler).map(|_| ())
        } else {
            Ok(())
        };
        let result = built.and_then(|()| {
            let nodes = self.nodes()?;
            work(scheduler.encoder()?, nodes)
        });

        let submitted = scheduler.execute();
        if let Err(e) = &result {
            log::error!("frame skipped: {}", e);
        }
        if rebuilding && submitted.is_err() {
            self.discard_unsubmitted_build();
        }
        result?;
        submitted
    }

    /// The recorded build never reached the device; forget it and build again.
    fn discard_unsubmitted_build(&mut self) {
        if self.state.is_done() {
            log::warn!("BVH build was recorded but not submitted; rebuilding next frame");
        }
        self.state = BuildState::Idle;
        self.rebuild_pending = true;
    }

    /// Rebuild on the next `frame`.
    pub fn request_rebuild(&mut self) {
        self.rebuild_pending = true;
    }

    pub fn rebuild_pending(&self) -> bool {
        self.rebuild_pending
    }

    /// Move the mesh's vertices and schedule a rebuild against the new bounds.
    pub fn update_vertices(
        &mut self,
        scheduler: &TaskScheduler<WgpuQueue>,
        vertices: &[[f32; 3]],
    ) -> AccelResult<()> {
        let mut updated = MeshSource::new(vertices.to_vec(), self.source.indices.clone());
        updated.validate()?;
        let scene = updated.scene_aabb();

        self.mesh.update_vertices(scheduler, vertices)?;
        self.morton.set_scene_bounds(&self.ctx, scene)?;
        std::mem::swap(&mut self.source, &mut updated);
        self.request_rebuild();
        Ok(())
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// The finished node array; root at index 0.
    pub fn nodes(&self) -> AccelResult<&GpuBuffer> {
        if !self.state.is_done() {
            return Err(AccelError::precondition(format!(
                "BVH nodes requested while the build is {}",
                self.state
            )));
        }
        Ok(self.bvh.nodes())
    }

    /// The sorted `MortonEntry` buffer
    pub fn sorted_entries(&self) -> AccelResult<&GpuBuffer> {
        if !self.state.is_done() {
            return Err(AccelError::precondition(format!(
                "sorted entries requested while the build is {}",
                self.state
            )));
        }
        Ok(self.morton.entries())
    }

    /// Flush and copy the node array back to the host.
    pub fn read_nodes(&self, scheduler: &mut TaskScheduler<WgpuQueue>) -> AccelResult<Vec<BvhNode>> {
        let count = self.bvh.schedule().node_count() as usize;
        read_buffer(scheduler, self.nodes()?, count)
    }

    /// Flush and copy the sorted entries back to the host.
    pub fn read_sorted_entries(
        &self,
        scheduler: &mut TaskScheduler<WgpuQueue>,
    ) -> AccelResult<Vec<MortonEntry>> {
        let count = self.morton.primitive_count() as usize;
        read_buffer(scheduler, self.sorted_entries()?, count)
    }

    pub fn schedule(&self) -> &BuildSchedule {
        self.bvh.schedule()
    }

    pub fn source(&self) -> &MeshSource {
        &self.source
    }

    pub fn scene_bounds(&self) -> &Aabb {
        self.morton.scene_bounds()
    }

    pub fn last_stats(&self) -> Option<&BuildStats> {
        self.last_stats.as_ref()
    }

    pub fn memory_usage_bytes(&self) -> u64 {
        self.mesh.vertices().size()
            + self.mesh.indices().size()
            + self.morton.entries().size()
            + self.sort.memory_usage_bytes()
            + self.bvh.memory_usage_bytes()
    }
}
