// src/accel/mod.rs
// Acceleration structure module - GPU Morton/sort/reduce BVH construction with a host fallback.
// Provides the build stages, the frame-driven pipeline and a one-call builder for tools and tests.
// RELEVANT FILES:src/accel/pipeline.rs,src/accel/host.rs,src/core/scheduler.rs

pub mod bvh_build;
pub mod host;
pub mod kernels;
pub mod mesh;
pub mod morton;
pub mod pipeline;
pub mod radix_sort;
pub mod types;
pub mod validate;

pub use bvh_build::{BuildSchedule, BvhBuildStage, PairingRule, PairwiseHalving};
pub use host::HostBvh;
pub use kernels::KernelSources;
pub use mesh::{GpuMesh, MeshSource};
pub use morton::MortonCodeStage;
pub use pipeline::BvhPipeline;
pub use radix_sort::RadixSortStage;
pub use types::{Aabb, BuildCursor, BuildState, BuildStats, BvhNode, MortonEntry};

use crate::config::AccelConfig;
use crate::core::queue::WgpuQueue;
use crate::core::scheduler::TaskScheduler;
use crate::gpu::GpuContext;
use anyhow::{Context, Result};

/// Which path produced a `BuiltBvh`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelBackend {
    Gpu,
    Host,
}

/// Host copy of a finished build
#[derive(Debug, Clone)]
pub struct BuiltBvh {
    pub backend: AccelBackend,
    pub entries: Vec<MortonEntry>,
    pub nodes: Vec<BvhNode>,
    pub schedule: BuildSchedule,
    pub world_aabb: Aabb,
    pub stats: BuildStats,
}

impl BuiltBvh {
    pub fn root(&self) -> &BvhNode {
        &self.nodes[bvh_build::ROOT_INDEX as usize]
    }

    pub fn is_gpu(&self) -> bool {
        self.backend == AccelBackend::Gpu
    }
}

impl From<HostBvh> for BuiltBvh {
    fn from(bvh: HostBvh) -> Self {
        Self {
            backend: AccelBackend::Host,
            entries: bvh.entries,
            nodes: bvh.nodes,
            schedule: bvh.schedule,
            world_aabb: bvh.world_aabb,
            stats: bvh.stats,
        }
    }
}

/// Builds on the GPU when a device is available, otherwise on the host
pub struct AccelBuilder {
    config: AccelConfig,
    scheduler: Option<TaskScheduler<WgpuQueue>>,
}

impl AccelBuilder {
    pub fn new(ctx: Option<GpuContext>, config: AccelConfig) -> Result<Self> {
        config.validate().context("invalid acceleration config")?;
        let scheduler = match ctx {
            Some(ctx) if config.prefer_gpu => {
                // the builder owns this context's budget
                ctx.registry.set_budget_limit(config.memory_budget_bytes);
                Some(
                    TaskScheduler::initialize(
                        WgpuQueue::new(ctx),
                        config.frames_in_flight,
                        config.fence_timeout(),
                    )
                    .context("task scheduler initialization failed")?,
                )
            }
            _ => None,
        };
        Ok(Self { config, scheduler })
    }

    /// Build a BVH for `mesh`, falling back to the host if the GPU path fails.
    pub fn build(&mut self, mesh: &MeshSource) -> Result<BuiltBvh> {
        if let Some(scheduler) = self.scheduler.as_mut() {
            match build_on_gpu(scheduler, mesh, &self.config) {
                Ok(bvh) => return Ok(bvh),
                Err(e) => {
                    log::warn!("GPU BVH build failed, falling back to host: {:#}", e);
                }
            }
        }

        host::build(&PairwiseHalving, mesh)
            .map(BuiltBvh::from)
            .context("host BVH build failed")
    }

    pub fn backend_info(&self) -> &'static str {
        match &self.scheduler {
            Some(_) => "GPU + host",
            None => "host only",
        }
    }

    pub fn config(&self) -> &AccelConfig {
        &self.config
    }
}

fn build_on_gpu(
    scheduler: &mut TaskScheduler<WgpuQueue>,
    mesh: &MeshSource,
    config: &AccelConfig,
) -> Result<BuiltBvh> {
    let mut pipeline = BvhPipeline::new(scheduler, mesh, config)?;
    let stats = pipeline.build(scheduler)?;
    let entries = pipeline
        .read_sorted_entries(scheduler)
        .context("reading back sorted entries")?;
    let nodes = pipeline
        .read_nodes(scheduler)
        .context("reading back BVH nodes")?;

    Ok(BuiltBvh {
        backend: AccelBackend::Gpu,
        entries,
        nodes,
        schedule: pipeline.schedule().clone(),
        world_aabb: *pipeline.scene_bounds(),
        stats,
    })
}

/// One-call build: headless device if configured and available, else host.
pub fn build_bvh(mesh: &MeshSource, config: &AccelConfig) -> Result<BuiltBvh> {
    let ctx = if config.prefer_gpu {
        GpuContext::headless(&config.device).context("device creation failed")?
    } else {
        None
    };
    AccelBuilder::new(ctx, config.clone())?.build(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_only_builder_builds_on_host() {
        let mut builder = AccelBuilder::new(None, AccelConfig::default()).unwrap();
        assert_eq!(builder.backend_info(), "host only");
        let bvh = builder.build(&MeshSource::cube()).unwrap();
        assert_eq!(bvh.backend, AccelBackend::Host);
        assert!(bvh.root().aabb.same_bounds(&Aabb::new([0.0; 3], [1.0; 3])));
    }

    #[test]
    fn empty_mesh_fails_on_every_path() {
        let mut builder = AccelBuilder::new(None, AccelConfig::default()).unwrap();
        assert!(builder.build(&MeshSource::default()).is_err());
    }
}
